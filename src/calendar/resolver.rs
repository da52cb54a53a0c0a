//! Snapping and stepping along a recurrence sequence.

use super::rule::RecurrenceRule;
use super::{format_ymd, parse_ymd};
use crate::error::ConfigurationError;
use chrono::{Datelike, Days, NaiveDate};
use serde::Serialize;
use tracing::debug;

/// Days in one full Gregorian cycle (400 years). A multiple of 7, so every
/// satisfiable rule has at least one match in any window of this length.
pub const GREGORIAN_CYCLE_DAYS: u32 = 146_097;

/// Walks the infinite sequence of dates matching a rule.
#[derive(Debug, Clone)]
pub struct CycleDateResolver {
    rule: RecurrenceRule,
}

impl CycleDateResolver {
    /// Create a resolver for a rule.
    pub fn new(rule: RecurrenceRule) -> Self {
        Self { rule }
    }

    /// The rule being walked.
    pub fn rule(&self) -> &RecurrenceRule {
        &self.rule
    }

    /// Whether `date` belongs to the sequence.
    pub fn matches(&self, date: NaiveDate) -> bool {
        self.rule.matches(date)
    }

    /// Latest matching date `<= date`.
    pub fn previous_match(&self, date: NaiveDate) -> Result<NaiveDate, ConfigurationError> {
        self.search(date, Direction::Backward, true)
    }

    /// Earliest matching date `>= date`.
    pub fn next_match(&self, date: NaiveDate) -> Result<NaiveDate, ConfigurationError> {
        self.search(date, Direction::Forward, true)
    }

    /// Step `n` positions along the sequence.
    ///
    /// Positive steps move forward, negative backward, zero returns `date`
    /// unchanged. A `date` outside the sequence counts its nearest match in
    /// the direction of travel as the first step.
    pub fn shift(&self, date: NaiveDate, n: i64) -> Result<NaiveDate, ConfigurationError> {
        let direction = match n.signum() {
            1 => Direction::Forward,
            -1 => Direction::Backward,
            _ => return Ok(date),
        };

        let mut current = date;
        for _ in 0..n.unsigned_abs() {
            current = self.search(current, direction, false)?;
        }
        Ok(current)
    }

    /// Resolve a cycle date: shift `base` by `base_shift_days`, snap back to
    /// the latest match (inclusive), then step `seq_shift` positions.
    pub fn resolve(
        &self,
        base: NaiveDate,
        base_shift_days: i64,
        seq_shift: i64,
    ) -> Result<NaiveDate, ConfigurationError> {
        let shifted = add_days(base, base_shift_days)?;
        let snapped = self.previous_match(shifted)?;
        let resolved = self.shift(snapped, seq_shift)?;

        debug!(
            "Resolved {} (shift {}) -> snapped {} -> seq {} -> {}",
            format_ymd(base),
            base_shift_days,
            format_ymd(snapped),
            seq_shift,
            format_ymd(resolved)
        );

        Ok(resolved)
    }

    fn search(
        &self,
        from: NaiveDate,
        direction: Direction,
        inclusive: bool,
    ) -> Result<NaiveDate, ConfigurationError> {
        let mut candidate = if inclusive {
            from
        } else {
            direction.step(from)?
        };

        for _ in 0..GREGORIAN_CYCLE_DAYS {
            if self.rule.matches(candidate) {
                return Ok(candidate);
            }
            candidate = direction.step(candidate)?;
        }

        Err(ConfigurationError::Unsatisfiable {
            rule: self.rule.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

impl Direction {
    fn step(self, date: NaiveDate) -> Result<NaiveDate, ConfigurationError> {
        match self {
            Direction::Forward => add_days(date, 1),
            Direction::Backward => add_days(date, -1),
        }
    }
}

/// Calendar-correct day arithmetic with overflow reported as an error.
pub fn add_days(date: NaiveDate, days: i64) -> Result<NaiveDate, ConfigurationError> {
    let magnitude = Days::new(days.unsigned_abs());
    let shifted = if days >= 0 {
        date.checked_add_days(magnitude)
    } else {
        date.checked_sub_days(magnitude)
    };

    shifted.ok_or_else(|| ConfigurationError::DateOverflow {
        date: date.to_string(),
        days,
    })
}

/// One resolved forecast cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastCycle {
    base_date: NaiveDate,
    base_shift_days: i64,
    recurrence: RecurrenceRule,
    seq_shift: i64,
    resolved_date: NaiveDate,
}

impl ForecastCycle {
    /// Resolve a cycle from its inputs. Fails without output on any
    /// configuration problem.
    pub fn resolve(
        base_date: NaiveDate,
        base_shift_days: i64,
        recurrence: RecurrenceRule,
        seq_shift: i64,
    ) -> Result<Self, ConfigurationError> {
        let resolver = CycleDateResolver::new(recurrence);
        let resolved_date = resolver.resolve(base_date, base_shift_days, seq_shift)?;

        Ok(Self {
            base_date,
            base_shift_days,
            recurrence: resolver.rule,
            seq_shift,
            resolved_date,
        })
    }

    pub fn base_date(&self) -> NaiveDate {
        self.base_date
    }

    pub fn base_shift_days(&self) -> i64 {
        self.base_shift_days
    }

    pub fn recurrence(&self) -> &RecurrenceRule {
        &self.recurrence
    }

    pub fn seq_shift(&self) -> i64 {
        self.seq_shift
    }

    pub fn resolved_date(&self) -> NaiveDate {
        self.resolved_date
    }

    /// Resolved date as `YYYYMMDD`.
    pub fn ymd(&self) -> String {
        format_ymd(self.resolved_date)
    }

    /// Named variables published back to the orchestrator.
    pub fn variables(&self, base_hour: u8) -> Result<CycleVariables, ConfigurationError> {
        let resolver = CycleDateResolver::new(self.recurrence.clone());
        let date = self.resolved_date;

        Ok(CycleVariables {
            ymd: format_ymd(date),
            pymd: format_ymd(resolver.shift(date, -1)?),
            pymd1: format_ymd(resolver.shift(date, -2)?),
            nymd: format_ymd(resolver.shift(date, 1)?),
            dow_num: date.weekday().number_from_monday(),
            dow: date.weekday().to_string(),
            basetime: format!("{}{:02}", format_ymd(date), base_hour),
        })
    }
}

/// Variables describing a resolved cycle and its neighbours in the sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleVariables {
    /// Resolved cycle date.
    pub ymd: String,
    /// Previous date in the sequence.
    pub pymd: String,
    /// Date two steps back.
    pub pymd1: String,
    /// Next date in the sequence.
    pub nymd: String,
    /// ISO weekday number (Monday = 1).
    pub dow_num: u32,
    /// Abbreviated weekday name.
    pub dow: String,
    /// Date plus two-digit base hour.
    pub basetime: String,
}

impl CycleVariables {
    /// `NAME=value` lines for shell consumption.
    pub fn to_env_lines(&self) -> Vec<String> {
        vec![
            format!("YMD={}", self.ymd),
            format!("PYMD={}", self.pymd),
            format!("PYMD1={}", self.pymd1),
            format!("NYMD={}", self.nymd),
            format!("DOW_NUM={}", self.dow_num),
            format!("DOW={}", self.dow),
            format!("BASETIME={}", self.basetime),
        ]
    }

    /// Parsed resolved date.
    pub fn date(&self) -> Result<NaiveDate, ConfigurationError> {
        parse_ymd(&self.ymd)
    }
}
