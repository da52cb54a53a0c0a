//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.hydrocast.toml` files. The resulting [`Config`] is threaded explicitly
//! through every command; nothing is read from process-wide state.

use crate::aggregate::dataset::DEFAULT_VARIABLE;
use crate::aggregate::AggregationOptions;
use crate::calendar::{Axis, DayMatch, RecurrenceRule};
use crate::cli::{Args, Command};
use crate::ensemble::{BarrierScope, DEFAULT_PERTURBED_MEMBERS};
use crate::error::ConfigurationError;
use crate::retention::{RetentionSweeper, DEFAULT_HORIZON_DAYS};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = ".hydrocast.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Cycle date settings.
    #[serde(default)]
    pub cycle: CycleConfig,

    /// Ensemble settings.
    #[serde(default)]
    pub ensemble: EnsembleConfig,

    /// Aggregation settings.
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Retention settings.
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// General application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Number of VPUs aggregated concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Directory holding the dated cycle directories.
    #[serde(default = "default_forecast_root")]
    pub forecast_root: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            concurrency: default_concurrency(),
            forecast_root: default_forecast_root(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

fn default_forecast_root() -> String {
    "fc".to_string()
}

/// Recurrence rule and shifts used to resolve the cycle date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Days added to today before snapping onto the sequence.
    #[serde(default)]
    pub base_shift_days: i64,

    /// ISO weekdays (1 = Monday); absent means unconstrained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekdays: Option<Vec<i32>>,

    /// Days of month (negative counts from the end); absent means unconstrained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthdays: Option<Vec<i32>>,

    /// Months (1-12); absent means unconstrained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub months: Option<Vec<i32>>,

    /// Positions to step along the sequence after snapping.
    #[serde(default)]
    pub seq_shift: i64,

    /// How the weekday and monthday axes combine.
    #[serde(default)]
    pub day_match: DayMatch,

    /// Base hour of the cycle (appended to the date in BASETIME).
    #[serde(default)]
    pub base_hour: u8,
}

impl CycleConfig {
    /// Build the typed recurrence rule.
    pub fn recurrence_rule(&self) -> Result<RecurrenceRule, ConfigurationError> {
        Ok(RecurrenceRule::new(
            Axis::from_option(self.weekdays.as_deref()),
            Axis::from_option(self.monthdays.as_deref()),
            Axis::from_option(self.months.as_deref()),
        )?
        .with_day_match(self.day_match))
    }
}

/// Ensemble layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleConfig {
    /// Perturbed members; the control member comes on top.
    #[serde(default = "default_perturbed_members")]
    pub perturbed_members: u32,

    /// Members the fan-in barrier waits for.
    #[serde(default)]
    pub barrier_scope: BarrierScope,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            perturbed_members: default_perturbed_members(),
            barrier_scope: BarrierScope::default(),
        }
    }
}

impl EnsembleConfig {
    /// Total members, control included.
    pub fn member_count(&self) -> u32 {
        self.perturbed_members.saturating_add(1)
    }
}

fn default_perturbed_members() -> u32 {
    DEFAULT_PERTURBED_MEMBERS
}

/// Aggregation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Delete member files after a successful aggregation.
    #[serde(default = "default_true")]
    pub cleanup_inputs: bool,

    /// VPUs to aggregate; empty means every VPU found in the directory.
    #[serde(default)]
    pub vpus: Vec<String>,

    /// NetCDF data variable stacked across members.
    #[serde(default = "default_variable")]
    pub variable: String,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            cleanup_inputs: true,
            vpus: Vec::new(),
            variable: default_variable(),
        }
    }
}

fn default_variable() -> String {
    DEFAULT_VARIABLE.to_string()
}

fn default_true() -> bool {
    true
}

/// Retention settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Days of past cycles kept before the resolved date.
    #[serde(default = "default_horizon_days")]
    pub horizon_days: i64,

    /// Directory name of the active cycle, always kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<String>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            horizon_days: default_horizon_days(),
            active: None,
        }
    }
}

fn default_horizon_days() -> i64 {
    i64::from(DEFAULT_HORIZON_DAYS)
}

impl RetentionConfig {
    /// Build the sweeper, rejecting negative or oversized horizons.
    pub fn sweeper(&self) -> Result<RetentionSweeper, ConfigurationError> {
        let horizon = u32::try_from(self.horizon_days).map_err(|_| {
            ConfigurationError::InvalidSetting {
                key: "retention.horizon_days",
                reason: format!("{} is not a non-negative day count", self.horizon_days),
            }
        })?;
        Ok(RetentionSweeper::new(horizon))
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were given explicitly.
    pub fn merge_with_args(&mut self, args: &Args) -> Result<(), ConfigurationError> {
        if args.verbose {
            self.general.verbose = true;
        }

        match &args.command {
            Command::ResolveDate(cmd) => {
                if let Some(shift) = cmd.shift {
                    self.cycle.base_shift_days = shift;
                }
                if let Some(seq_shift) = cmd.seq_shift {
                    self.cycle.seq_shift = seq_shift;
                }
                if let Some(day_match) = cmd.day_match {
                    self.cycle.day_match = day_match;
                }
                if let Some(base_hour) = cmd.base_hour {
                    self.cycle.base_hour = base_hour;
                }
                if let Some(ref raw) = cmd.weekdays {
                    self.cycle.weekdays = axis_values(crate::calendar::AxisKind::Weekdays, raw)?;
                }
                if let Some(ref raw) = cmd.monthdays {
                    self.cycle.monthdays =
                        axis_values(crate::calendar::AxisKind::Monthdays, raw)?;
                }
                if let Some(ref raw) = cmd.months {
                    self.cycle.months = axis_values(crate::calendar::AxisKind::Months, raw)?;
                }
            }
            Command::Partition(cmd) => {
                if let Some(members) = cmd.members {
                    self.ensemble.perturbed_members = members;
                }
            }
            Command::Check(cmd) => {
                if let Some(members) = cmd.members {
                    self.ensemble.perturbed_members = members;
                }
                if let Some(scope) = cmd.scope {
                    self.ensemble.barrier_scope = scope;
                }
            }
            Command::Aggregate(cmd) => {
                if let Some(members) = cmd.members {
                    self.ensemble.perturbed_members = members;
                }
                if let Some(scope) = cmd.scope {
                    self.ensemble.barrier_scope = scope;
                }
                if !cmd.vpu.is_empty() {
                    self.aggregation.vpus = cmd.vpu.clone();
                }
                if cmd.keep_inputs {
                    self.aggregation.cleanup_inputs = false;
                }
                if let Some(concurrency) = cmd.concurrency {
                    self.general.concurrency = concurrency;
                }
            }
            Command::Sweep(cmd) => {
                if let Some(ref root) = cmd.root {
                    self.general.forecast_root = root.display().to_string();
                }
                if let Some(horizon) = cmd.horizon {
                    self.retention.horizon_days = horizon;
                }
                if let Some(ref active) = cmd.active {
                    self.retention.active = Some(active.clone());
                }
            }
            Command::InitConfig => {}
        }

        Ok(())
    }

    /// Check every section that can be checked without touching disk.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.cycle.recurrence_rule()?;
        self.retention.sweeper()?;

        if self.aggregation.variable.trim().is_empty() {
            return Err(ConfigurationError::InvalidSetting {
                key: "aggregation.variable",
                reason: "must name a NetCDF variable".to_string(),
            });
        }
        if self.general.concurrency == 0 {
            return Err(ConfigurationError::InvalidSetting {
                key: "general.concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.cycle.base_hour > 23 {
            return Err(ConfigurationError::InvalidSetting {
                key: "cycle.base_hour",
                reason: format!("{} is not an hour of the day", self.cycle.base_hour),
            });
        }
        Ok(())
    }

    /// Aggregation options derived from the ensemble and aggregation sections.
    pub fn aggregation_options(&self) -> AggregationOptions {
        AggregationOptions {
            member_count: self.ensemble.member_count(),
            scope: self.ensemble.barrier_scope,
            cleanup_inputs: self.aggregation.cleanup_inputs,
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

/// Parse a CLI axis list into the optional-list form stored in config.
fn axis_values(
    kind: crate::calendar::AxisKind,
    raw: &str,
) -> Result<Option<Vec<i32>>, ConfigurationError> {
    Ok(match Axis::parse(kind, raw)? {
        Axis::Unconstrained => None,
        Axis::Constrained(values) => Some(values.into_iter().collect()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.ensemble.perturbed_members, 51);
        assert_eq!(config.ensemble.member_count(), 52);
        assert_eq!(config.retention.horizon_days, 4);
        assert!(config.aggregation.cleanup_inputs);
        assert!(config.cycle.recurrence_rule().unwrap().is_unconstrained());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
concurrency = 8
forecast_root = "/data/fc"

[cycle]
base_shift_days = -1
weekdays = [1, 3, 5]
seq_shift = 2
day_match = "any"

[ensemble]
perturbed_members = 50
barrier_scope = "all"

[aggregation]
variable = "streamflow"

[retention]
horizon_days = 7
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.concurrency, 8);
        assert_eq!(config.general.forecast_root, "/data/fc");
        assert_eq!(config.cycle.base_shift_days, -1);
        assert_eq!(config.cycle.weekdays, Some(vec![1, 3, 5]));
        assert_eq!(config.cycle.monthdays, None);
        assert_eq!(config.cycle.day_match, DayMatch::Any);
        assert_eq!(config.ensemble.member_count(), 51);
        assert_eq!(config.ensemble.barrier_scope, BarrierScope::All);
        assert_eq!(config.retention.horizon_days, 7);
        assert!(config.aggregation.cleanup_inputs);
        assert_eq!(config.aggregation.variable, "streamflow");
        assert!(!config.general.verbose);
    }

    #[test]
    fn test_invalid_rule_fails_validation() {
        let mut config = Config::default();
        config.cycle.weekdays = Some(vec![8]);
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::AxisOutOfRange { value: 8, .. })
        ));
    }

    #[test]
    fn test_negative_horizon_rejected() {
        let mut config = Config::default();
        config.retention.horizon_days = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_resolve_date_args() {
        let args = Args::parse_from([
            "hydrocast",
            "resolve-date",
            "--weekdays",
            "mon,wed,fri",
            "--monthdays",
            "none",
            "--seq-shift",
            "-1",
        ]);
        let mut config = Config::default();
        config.cycle.monthdays = Some(vec![1]);
        config.merge_with_args(&args).unwrap();

        assert_eq!(config.cycle.weekdays, Some(vec![1, 3, 5]));
        assert_eq!(config.cycle.monthdays, None);
        assert_eq!(config.cycle.seq_shift, -1);
        assert_eq!(config.cycle.base_shift_days, 0);
    }

    #[test]
    fn test_merge_aggregate_args() {
        let args = Args::parse_from([
            "hydrocast",
            "aggregate",
            "--dir",
            ".",
            "--vpu",
            "718,101",
            "--keep-inputs",
        ]);
        let mut config = Config::default();
        config.merge_with_args(&args).unwrap();

        assert_eq!(config.aggregation.vpus, vec!["718", "101"]);
        assert!(!config.aggregation.cleanup_inputs);
        assert_eq!(config.aggregation_options().member_count, 52);
    }

    #[test]
    fn test_verbose_from_file_or_flag() {
        let config: Config = toml::from_str("[general]\nverbose = true\n").unwrap();
        let args = Args::parse_from(["hydrocast", "init-config"]);
        assert_eq!(args.log_level(config.general.verbose), tracing::Level::DEBUG);

        let mut config = Config::default();
        let args = Args::parse_from(["hydrocast", "--verbose", "init-config"]);
        config.merge_with_args(&args).unwrap();
        assert!(config.general.verbose);

        let args = Args::parse_from(["hydrocast", "--quiet", "init-config"]);
        assert_eq!(args.log_level(true), tracing::Level::ERROR);
    }

    #[test]
    fn test_empty_variable_rejected() {
        let mut config = Config::default();
        config.aggregation.variable = " ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidSetting {
                key: "aggregation.variable",
                ..
            })
        ));
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[cycle]"));
        assert!(toml_str.contains("[ensemble]"));
        assert!(toml_str.contains("[retention]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, Config::default());
    }
}
