//! Cron-like recurrence rules over calendar dates.

use crate::error::ConfigurationError;
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// The three independent axes of a recurrence rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisKind {
    /// ISO weekday numbers, Monday = 1 .. Sunday = 7.
    Weekdays,
    /// Days of the month, 1..=31, or -1..=-31 counted from the end of the month.
    Monthdays,
    /// Months, 1..=12.
    Months,
}

impl AxisKind {
    /// Axis name as used in configuration and error messages.
    pub fn name(self) -> &'static str {
        match self {
            AxisKind::Weekdays => "weekdays",
            AxisKind::Monthdays => "monthdays",
            AxisKind::Months => "months",
        }
    }

    fn allowed(self) -> &'static str {
        match self {
            AxisKind::Weekdays => "1-7",
            AxisKind::Monthdays => "1-31 or -31..-1",
            AxisKind::Months => "1-12",
        }
    }

    fn accepts(self, value: i32) -> bool {
        match self {
            AxisKind::Weekdays => (1..=7).contains(&value),
            AxisKind::Monthdays => (1..=31).contains(&value) || (-31..=-1).contains(&value),
            AxisKind::Months => (1..=12).contains(&value),
        }
    }
}

/// One axis of a recurrence rule.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Axis {
    /// Any value matches.
    #[default]
    Unconstrained,
    /// Only the listed values match. An empty set never matches.
    Constrained(BTreeSet<i32>),
}

impl Axis {
    /// Build a constrained axis from values.
    pub fn of(values: impl IntoIterator<Item = i32>) -> Self {
        Axis::Constrained(values.into_iter().collect())
    }

    /// Build an axis from an optional list, `None` meaning unconstrained.
    pub fn from_option(values: Option<&[i32]>) -> Self {
        match values {
            Some(values) => Axis::of(values.iter().copied()),
            None => Axis::Unconstrained,
        }
    }

    /// Whether the axis restricts anything.
    pub fn is_constrained(&self) -> bool {
        matches!(self, Axis::Constrained(_))
    }

    fn permits(&self, value: i32) -> bool {
        match self {
            Axis::Unconstrained => true,
            Axis::Constrained(values) => values.contains(&value),
        }
    }

    /// Parse a CLI list such as `1,3,5`, `1/3/5` or `none`.
    ///
    /// Weekdays additionally accept names (`mon`, `Wednesday`).
    pub fn parse(kind: AxisKind, input: &str) -> Result<Self, ConfigurationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
            return Ok(Axis::Unconstrained);
        }

        let mut values = BTreeSet::new();
        for token in trimmed.split([',', '/']).map(str::trim) {
            if token.is_empty() {
                continue;
            }
            let value = match token.parse::<i32>() {
                Ok(v) => v,
                Err(_) if kind == AxisKind::Weekdays => Weekday::from_str(token)
                    .map(|day| day.number_from_monday() as i32)
                    .map_err(|_| ConfigurationError::InvalidAxisList {
                        axis: kind.name(),
                        input: input.to_string(),
                        reason: format!("'{}' is not a weekday", token),
                    })?,
                Err(_) => {
                    return Err(ConfigurationError::InvalidAxisList {
                        axis: kind.name(),
                        input: input.to_string(),
                        reason: format!("'{}' is not an integer", token),
                    })
                }
            };
            values.insert(value);
        }

        Ok(Axis::Constrained(values))
    }

    fn validate(&self, kind: AxisKind) -> Result<(), ConfigurationError> {
        if let Axis::Constrained(values) = self {
            if let Some(&value) = values.iter().find(|v| !kind.accepts(**v)) {
                return Err(ConfigurationError::AxisOutOfRange {
                    axis: kind.name(),
                    value,
                    allowed: kind.allowed(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Unconstrained => write!(f, "*"),
            Axis::Constrained(values) => {
                let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "{{{}}}", parts.join(","))
            }
        }
    }
}

/// How the weekday and monthday axes combine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DayMatch {
    /// Every constrained axis must match.
    #[default]
    All,
    /// Month must match; the day matches on weekday OR monthday.
    Any,
}

/// A cron-like rule restricting which dates are valid cycle dates.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecurrenceRule {
    weekdays: Axis,
    monthdays: Axis,
    months: Axis,
    day_match: DayMatch,
}

impl RecurrenceRule {
    /// A rule that matches every date.
    pub fn unconstrained() -> Self {
        Self::default()
    }

    /// Build a rule, rejecting out-of-range axis values.
    pub fn new(weekdays: Axis, monthdays: Axis, months: Axis) -> Result<Self, ConfigurationError> {
        weekdays.validate(AxisKind::Weekdays)?;
        monthdays.validate(AxisKind::Monthdays)?;
        months.validate(AxisKind::Months)?;

        Ok(Self {
            weekdays,
            monthdays,
            months,
            day_match: DayMatch::All,
        })
    }

    /// Shorthand for a weekday-only rule.
    pub fn weekdays(days: impl IntoIterator<Item = i32>) -> Result<Self, ConfigurationError> {
        Self::new(Axis::of(days), Axis::Unconstrained, Axis::Unconstrained)
    }

    /// Select how weekday and monthday axes combine.
    pub fn with_day_match(mut self, day_match: DayMatch) -> Self {
        self.day_match = day_match;
        self
    }

    /// Whether the rule matches every date.
    pub fn is_unconstrained(&self) -> bool {
        !self.weekdays.is_constrained()
            && !self.monthdays.is_constrained()
            && !self.months.is_constrained()
    }

    /// Whether `date` belongs to the sequence.
    pub fn matches(&self, date: NaiveDate) -> bool {
        if !self.months.permits(date.month() as i32) {
            return false;
        }

        let weekday_ok = self
            .weekdays
            .permits(date.weekday().number_from_monday() as i32);
        let monthday_ok = self.monthday_matches(date);

        match self.day_match {
            DayMatch::All => weekday_ok && monthday_ok,
            DayMatch::Any if self.weekdays.is_constrained() && self.monthdays.is_constrained() => {
                weekday_ok || monthday_ok
            }
            DayMatch::Any => weekday_ok && monthday_ok,
        }
    }

    fn monthday_matches(&self, date: NaiveDate) -> bool {
        match &self.monthdays {
            Axis::Unconstrained => true,
            Axis::Constrained(days) => {
                let last = days_in_month(date.year(), date.month()) as i32;
                let day = date.day() as i32;
                days.iter()
                    .any(|&d| if d < 0 { last + d + 1 == day } else { d == day })
            }
        }
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "weekdays={} monthdays={} months={}",
            self.weekdays, self.monthdays, self.months
        )?;
        if self.day_match == DayMatch::Any {
            write!(f, " (day axes OR-combined)")?;
        }
        Ok(())
    }
}

/// Number of days in a month of the proleptic Gregorian calendar.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(31)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_unconstrained_matches_everything() {
        let rule = RecurrenceRule::unconstrained();
        assert!(rule.is_unconstrained());
        assert!(rule.matches(date(2024, 2, 29)));
    }

    #[test]
    fn test_axes_are_and_combined() {
        let rule =
            RecurrenceRule::new(Axis::of([1]), Axis::of([15]), Axis::Unconstrained).unwrap();
        // 2024-01-15 is a Monday
        assert!(rule.matches(date(2024, 1, 15)));
        // 2024-01-22 is a Monday but not the 15th
        assert!(!rule.matches(date(2024, 1, 22)));
        // 2024-02-15 is the 15th but a Thursday
        assert!(!rule.matches(date(2024, 2, 15)));
    }

    #[test]
    fn test_any_mode_or_combines_day_axes() {
        let rule = RecurrenceRule::new(Axis::of([1]), Axis::of([15]), Axis::of([1, 2]))
            .unwrap()
            .with_day_match(DayMatch::Any);
        assert!(rule.matches(date(2024, 1, 22)));
        assert!(rule.matches(date(2024, 2, 15)));
        // month axis is still required
        assert!(!rule.matches(date(2024, 3, 15)));
    }

    #[test]
    fn test_negative_monthday_counts_from_end() {
        let rule =
            RecurrenceRule::new(Axis::Unconstrained, Axis::of([-1]), Axis::Unconstrained).unwrap();
        assert!(rule.matches(date(2024, 2, 29)));
        assert!(!rule.matches(date(2023, 2, 27)));
        assert!(rule.matches(date(2023, 2, 28)));
        assert!(rule.matches(date(2024, 4, 30)));
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let err = RecurrenceRule::weekdays([1, 8]).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::AxisOutOfRange {
                axis: "weekdays",
                value: 8,
                allowed: "1-7"
            }
        );

        assert!(
            RecurrenceRule::new(Axis::Unconstrained, Axis::of([0]), Axis::Unconstrained).is_err()
        );
        assert!(
            RecurrenceRule::new(Axis::Unconstrained, Axis::Unconstrained, Axis::of([13])).is_err()
        );
    }

    #[test]
    fn test_parse_axis() {
        assert_eq!(
            Axis::parse(AxisKind::Months, "none").unwrap(),
            Axis::Unconstrained
        );
        assert_eq!(
            Axis::parse(AxisKind::Weekdays, "mon,3,Fri").unwrap(),
            Axis::of([1, 3, 5])
        );
        assert_eq!(
            Axis::parse(AxisKind::Monthdays, "1/15/-1").unwrap(),
            Axis::of([-1, 1, 15])
        );
        assert!(Axis::parse(AxisKind::Months, "jan").is_err());
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2023, 2), 28);
        assert_eq!(days_in_month(2023, 12), 31);
        assert_eq!(days_in_month(2023, 11), 30);
    }

    #[test]
    fn test_display() {
        let rule = RecurrenceRule::weekdays([1, 3, 5]).unwrap();
        assert_eq!(rule.to_string(), "weekdays={1,3,5} monthdays=* months=*");
    }
}
