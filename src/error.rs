//! Error types for cycle resolution, partitioning, aggregation and retention.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for forecast-cycle operations.
pub type Result<T> = std::result::Result<T, ForecastError>;

/// Invalid recurrence rules, dates and settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// A recurrence axis contains a value outside its allowed range.
    #[error("{axis} value {value} is out of range (allowed: {allowed})")]
    AxisOutOfRange {
        /// Axis name (weekdays, monthdays, months).
        axis: &'static str,
        /// Offending value.
        value: i32,
        /// Human readable allowed range.
        allowed: &'static str,
    },

    /// The rule is well formed but no calendar date can ever satisfy it.
    #[error("recurrence rule {rule} never matches any date")]
    Unsatisfiable {
        /// Rendered rule.
        rule: String,
    },

    /// Date arithmetic left the supported calendar range.
    #[error("date {date} shifted by {days} days is outside the supported calendar range")]
    DateOverflow {
        /// Starting date.
        date: String,
        /// Shift that overflowed.
        days: i64,
    },

    /// A date string could not be parsed.
    #[error("invalid date '{input}': expected YYYYMMDD")]
    InvalidDate {
        /// Raw input.
        input: String,
    },

    /// A recurrence axis list could not be parsed.
    #[error("invalid {axis} list '{input}': {reason}")]
    InvalidAxisList {
        /// Axis name.
        axis: &'static str,
        /// Raw input.
        input: String,
        /// What went wrong.
        reason: String,
    },

    /// Any other invalid setting.
    #[error("invalid setting {key}: {reason}")]
    InvalidSetting {
        /// Setting name.
        key: &'static str,
        /// What went wrong.
        reason: String,
    },
}

/// Invalid member/worker partition requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartitionError {
    /// Worker id is not in `[0, worker_count)`.
    #[error("worker id {worker_id} is out of range for {worker_count} workers")]
    WorkerIdOutOfRange {
        /// Requested worker id.
        worker_id: u32,
        /// Pool size.
        worker_count: u32,
    },

    /// The pool has no workers.
    #[error("worker count must be at least 1 (got {worker_count})")]
    NoWorkers {
        /// Pool size.
        worker_count: u32,
    },

    /// The ensemble has no members.
    #[error("member count must be at least 1 (got {member_count})")]
    NoMembers {
        /// Requested member count.
        member_count: u32,
    },
}

/// Errors that can occur while driving a forecast cycle.
#[derive(Debug, Error)]
pub enum ForecastError {
    /// Invalid configuration or recurrence rule.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Invalid partition request.
    #[error("partition error: {0}")]
    Partition(#[from] PartitionError),

    /// The fan-in barrier found members without output.
    #[error("incomplete ensemble for VPU {vpu}: missing members {missing:?}")]
    IncompleteEnsemble {
        /// VPU being aggregated.
        vpu: String,
        /// Missing member indices, ascending.
        missing: Vec<u32>,
    },

    /// Reading, merging or writing the aggregate failed.
    #[error("aggregation failed for VPU {vpu}: {message}")]
    Aggregation {
        /// VPU being aggregated.
        vpu: String,
        /// Description of the failure.
        message: String,
    },

    /// A retention candidate could not be handled.
    #[error("retention skipped {name}: {reason}")]
    Retention {
        /// Directory name.
        name: String,
        /// Description of the failure.
        reason: String,
    },

    /// Filesystem access failed.
    #[error("io error at {}: {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl ForecastError {
    /// Builds an aggregation error for a VPU.
    pub fn aggregation(vpu: &str, message: impl Into<String>) -> Self {
        Self::Aggregation {
            vpu: vpu.to_string(),
            message: message.into(),
        }
    }

    /// Wraps an io error with the path it came from.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true when the error only means "inputs are not ready yet".
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::IncompleteEnsemble { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_offending_inputs() {
        let err = ForecastError::from(PartitionError::WorkerIdOutOfRange {
            worker_id: 5,
            worker_count: 3,
        });
        assert!(err.to_string().contains("worker id 5"));
        assert!(err.to_string().contains("3 workers"));

        let err = ForecastError::IncompleteEnsemble {
            vpu: "718".to_string(),
            missing: vec![7, 12],
        };
        assert!(err.to_string().contains("[7, 12]"));
        assert!(err.is_incomplete());
    }

    #[test]
    fn test_axis_error_message() {
        let err = ConfigurationError::AxisOutOfRange {
            axis: "weekdays",
            value: 8,
            allowed: "1-7",
        };
        assert_eq!(
            err.to_string(),
            "weekdays value 8 is out of range (allowed: 1-7)"
        );
    }
}
