//! Retention sweep over dated cycle directories.
//!
//! Directories under the forecast root are named with a `YYYYMMDD` prefix
//! (usually the base time, e.g. `2024011000`). Anything older than the
//! resolved cycle date minus the horizon is removed. Planning is pure; the
//! sweep applies the plan one directory at a time and keeps going past
//! failures.

use crate::calendar::format_ymd;
use crate::calendar::resolver::add_days;
use crate::error::{ConfigurationError, ForecastError, Result};
use crate::models::{SweepDecision, SweepReport};
use crate::naming::cycle_dir_date;
use chrono::NaiveDate;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Default number of past days kept.
pub const DEFAULT_HORIZON_DAYS: u32 = 4;

/// Deletes cycle directories that fell out of the retention window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionSweeper {
    horizon_days: u32,
}

impl Default for RetentionSweeper {
    fn default() -> Self {
        Self::new(DEFAULT_HORIZON_DAYS)
    }
}

impl RetentionSweeper {
    pub fn new(horizon_days: u32) -> Self {
        Self { horizon_days }
    }

    pub fn horizon_days(&self) -> u32 {
        self.horizon_days
    }

    /// Oldest date still kept.
    pub fn cutoff(&self, resolved: NaiveDate) -> std::result::Result<NaiveDate, ConfigurationError> {
        add_days(resolved, -i64::from(self.horizon_days))
    }

    /// Decide what happens to each directory name, without touching disk.
    pub fn plan<I, S>(
        &self,
        resolved: NaiveDate,
        active: Option<&str>,
        names: I,
    ) -> std::result::Result<Vec<(String, SweepDecision)>, ConfigurationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cutoff = self.cutoff(resolved)?;

        let decisions = names
            .into_iter()
            .map(Into::into)
            .map(|name| {
                let decision = if active == Some(name.as_str()) {
                    SweepDecision::Active
                } else {
                    match cycle_dir_date(&name) {
                        Ok(date) if date == resolved => SweepDecision::Active,
                        Ok(date) if date < cutoff => SweepDecision::Delete,
                        Ok(_) => SweepDecision::Keep,
                        Err(e) => SweepDecision::Skip {
                            reason: e.to_string(),
                        },
                    }
                };
                (name, decision)
            })
            .collect();

        Ok(decisions)
    }

    /// Sweep the directories directly under `root`.
    ///
    /// Only listing `root` itself is fatal; malformed names and failed
    /// deletions are recorded in the report.
    pub fn sweep(
        &self,
        root: &Path,
        resolved: NaiveDate,
        active: Option<&str>,
        dry_run: bool,
    ) -> Result<SweepReport> {
        self.sweep_with(root, resolved, active, dry_run, |path| fs::remove_dir_all(path))
    }

    /// [`sweep`](Self::sweep) with the directory removal supplied by the caller.
    pub fn sweep_with<F>(
        &self,
        root: &Path,
        resolved: NaiveDate,
        active: Option<&str>,
        dry_run: bool,
        mut remove: F,
    ) -> Result<SweepReport>
    where
        F: FnMut(&Path) -> io::Result<()>,
    {
        let names = list_directories(root)?;
        let plan = self.plan(resolved, active, names)?;
        let cutoff = self.cutoff(resolved)?;

        let mut report = SweepReport {
            cutoff: format_ymd(cutoff),
            dry_run,
            ..SweepReport::default()
        };

        for (name, decision) in plan {
            match decision {
                SweepDecision::Delete if dry_run => {
                    info!("Would delete {}", name);
                    report.deleted.push(name);
                }
                SweepDecision::Delete => match remove(&root.join(&name)) {
                    Ok(()) => {
                        info!("Deleted {}", name);
                        report.deleted.push(name);
                    }
                    Err(e) => {
                        let err = ForecastError::Retention {
                            name: name.clone(),
                            reason: e.to_string(),
                        };
                        warn!("{}", err);
                        report.errors.push(err.to_string());
                    }
                },
                SweepDecision::Keep | SweepDecision::Active => {
                    debug!("Keeping {}", name);
                    report.kept.push(name);
                }
                SweepDecision::Skip { reason } => {
                    let err = ForecastError::Retention { name, reason };
                    warn!("{}", err);
                    report.skipped.push(err.to_string());
                }
            }
        }

        Ok(report)
    }
}

/// Names of the sub-directories directly under `root`, sorted.
fn list_directories(root: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            ForecastError::io(path, e.into())
        })?;
        if entry.file_type().is_dir() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    Ok(names)
}
