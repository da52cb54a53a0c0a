//! Cycle date resolution.
//!
//! A forecast cycle runs on the dates selected by a cron-like
//! [`RecurrenceRule`]. The [`CycleDateResolver`] snaps a (shifted) base date
//! onto that sequence and steps along it; [`ForecastCycle`] captures one
//! resolved invocation.

pub mod resolver;
pub mod rule;

pub use resolver::{CycleDateResolver, CycleVariables, ForecastCycle};
pub use rule::{Axis, AxisKind, DayMatch, RecurrenceRule};

use crate::error::ConfigurationError;
use chrono::NaiveDate;

/// Format used for every date handed to or received from the orchestrator.
pub const YMD_FORMAT: &str = "%Y%m%d";

/// Parse an 8-digit `YYYYMMDD` string.
pub fn parse_ymd(input: &str) -> Result<NaiveDate, ConfigurationError> {
    let trimmed = input.trim();
    if trimmed.len() != 8 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ConfigurationError::InvalidDate {
            input: input.to_string(),
        });
    }

    NaiveDate::parse_from_str(trimmed, YMD_FORMAT).map_err(|_| ConfigurationError::InvalidDate {
        input: input.to_string(),
    })
}

/// Render a date as `YYYYMMDD`.
pub fn format_ymd(date: NaiveDate) -> String {
    date.format(YMD_FORMAT).to_string()
}
