//! Data models shared across the forecast cycle components.
//!
//! This module contains the ensemble member type and the result records
//! produced by aggregation and retention runs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Index of the control (high-resolution) member.
pub const CONTROL_INDEX: u32 = 0;

/// One stochastic variant of the forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EnsembleMember {
    /// Member index, 0..N-1.
    pub index: u32,
    /// Whether this is the control run (index 0).
    pub is_control: bool,
}

impl EnsembleMember {
    /// Creates a member, tagging index 0 as the control.
    pub fn new(index: u32) -> Self {
        Self {
            index,
            is_control: index == CONTROL_INDEX,
        }
    }

    /// Two-digit zero-padded label, as used in retrieval requests.
    pub fn label(&self) -> String {
        format!("{:02}", self.index)
    }
}

impl fmt::Display for EnsembleMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_control {
            write!(f, "{} (control)", self.index)
        } else {
            write!(f, "{}", self.index)
        }
    }
}

/// Outcome of aggregating one VPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStatus {
    /// Artifacts were (re)written from the member files.
    Aggregated,
    /// A complete artifact already existed; only leftover inputs were removed.
    AlreadyAggregated,
}

impl fmt::Display for AggregationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationStatus::Aggregated => write!(f, "aggregated"),
            AggregationStatus::AlreadyAggregated => write!(f, "already aggregated"),
        }
    }
}

/// Summary of a successful VPU aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationSummary {
    /// VPU code.
    pub vpu: String,
    /// What the run did.
    pub status: AggregationStatus,
    /// Perturbed member indices along the ensemble axis, ascending.
    pub members: Vec<u32>,
    /// Ensemble-dimensioned artifact.
    pub output: PathBuf,
    /// Ensemble-mean artifact.
    pub mean_output: PathBuf,
    /// Number of member files deleted after the write.
    pub inputs_removed: usize,
}

/// What the sweeper decided for one directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SweepDecision {
    /// Older than the cutoff.
    Delete,
    /// Within the retention window.
    Keep,
    /// The currently active cycle; never deleted.
    Active,
    /// Name does not carry a date.
    Skip {
        /// Why the name was rejected.
        reason: String,
    },
}

/// Result of a retention sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Oldest date that is kept, `YYYYMMDD`.
    pub cutoff: String,
    /// Whether deletions were only reported.
    pub dry_run: bool,
    /// Directories deleted (or that would be, in a dry run).
    pub deleted: Vec<String>,
    /// Directories kept, including the active cycle.
    pub kept: Vec<String>,
    /// Directories skipped because of malformed names.
    pub skipped: Vec<String>,
    /// Per-directory failures (the sweep continues past them).
    pub errors: Vec<String>,
}

impl SweepReport {
    /// Returns true if any deletions failed.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
