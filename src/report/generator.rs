//! Text and JSON rendering of command results.
//!
//! Everything here returns a `String` for stdout; logging goes through
//! `tracing` elsewhere so stdout stays machine-readable.

use crate::calendar::CycleVariables;
use crate::ensemble::{BarrierVerdict, WorkerPartition};
use crate::error::{ForecastError, Result as ForecastResult};
use crate::models::{AggregationSummary, SweepReport};
use anyhow::Result;
use serde::Serialize;

/// Resolved date only.
pub fn generate_cycle_plain(vars: &CycleVariables) -> String {
    format!("{}\n", vars.ymd)
}

/// Cycle variables as `NAME=value` lines.
pub fn generate_cycle_env(vars: &CycleVariables) -> String {
    let mut output = vars.to_env_lines().join("\n");
    output.push('\n');
    output
}

/// Generate the text view of one worker's assignment.
pub fn generate_partition_text(partition: &WorkerPartition) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "Worker {}/{}: {} member(s)\n",
        partition.worker_id,
        partition.worker_count,
        partition.len()
    ));
    if partition.is_empty() {
        return output;
    }

    let perturbed = partition.perturbed();
    if partition.control().is_some() {
        output.push_str("  control: 0\n");
    }
    if !perturbed.is_empty() {
        output.push_str(&format!("  perturbed: {}\n", join_indices(&perturbed)));
    }
    output.push_str(&format!("  request: {}\n", partition.request_list()));

    output
}

#[derive(Serialize)]
struct VerdictView<'a> {
    target: &'a str,
    ready: bool,
    missing: &'a [u32],
}

/// Generate the barrier verdict for `target` (a VPU or input variable).
pub fn generate_verdict_text(target: &str, verdict: &BarrierVerdict) -> String {
    match verdict {
        BarrierVerdict::Ready => format!("{}: ready\n", target),
        BarrierVerdict::Missing(missing) => format!(
            "{}: waiting on {} member(s): {}\n",
            target,
            missing.len(),
            join_indices(missing)
        ),
    }
}

/// Generate the barrier verdict as JSON.
pub fn generate_verdict_json(target: &str, verdict: &BarrierVerdict) -> Result<String> {
    let missing: &[u32] = match verdict {
        BarrierVerdict::Ready => &[],
        BarrierVerdict::Missing(missing) => missing,
    };
    let view = VerdictView {
        target,
        ready: verdict.is_ready(),
        missing,
    };
    serde_json::to_string_pretty(&view).map_err(Into::into)
}

#[derive(Serialize)]
struct AggregationView<'a> {
    vpu: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a AggregationSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    missing: Option<&'a [u32]>,
}

/// Generate the per-VPU aggregation outcomes.
pub fn generate_aggregation_text(results: &[(String, ForecastResult<AggregationSummary>)]) -> String {
    let mut output = String::new();
    let mut failed = 0;

    for (vpu, result) in results {
        match result {
            Ok(summary) => {
                output.push_str(&format!(
                    "{}: {} ({} members) -> {}\n",
                    vpu,
                    summary.status,
                    summary.members.len(),
                    summary.output.display()
                ));
                if summary.inputs_removed > 0 {
                    output.push_str(&format!(
                        "  removed {} member file(s)\n",
                        summary.inputs_removed
                    ));
                }
            }
            Err(e) => {
                failed += 1;
                output.push_str(&format!("{}: FAILED: {}\n", vpu, e));
            }
        }
    }

    output.push_str(&format!(
        "\n{} VPU(s), {} succeeded, {} failed\n",
        results.len(),
        results.len() - failed,
        failed
    ));
    output
}

/// Generate the per-VPU aggregation outcomes as JSON.
pub fn generate_aggregation_json(
    results: &[(String, ForecastResult<AggregationSummary>)],
) -> Result<String> {
    let views: Vec<AggregationView<'_>> = results
        .iter()
        .map(|(vpu, result)| match result {
            Ok(summary) => AggregationView {
                vpu,
                summary: Some(summary),
                error: None,
                missing: None,
            },
            Err(e) => AggregationView {
                vpu,
                summary: None,
                error: Some(e.to_string()),
                missing: match e {
                    ForecastError::IncompleteEnsemble { missing, .. } => Some(missing.as_slice()),
                    _ => None,
                },
            },
        })
        .collect();
    serde_json::to_string_pretty(&views).map_err(Into::into)
}

/// Generate the retention sweep summary.
pub fn generate_sweep_text(report: &SweepReport) -> String {
    let mut output = String::new();

    let verb = if report.dry_run { "Would delete" } else { "Deleted" };
    output.push_str(&format!("Cutoff: {}\n", report.cutoff));
    output.push_str(&format!("{} {} director(ies)\n", verb, report.deleted.len()));
    for name in &report.deleted {
        output.push_str(&format!("  - {}\n", name));
    }
    output.push_str(&format!("Kept {} director(ies)\n", report.kept.len()));

    if !report.skipped.is_empty() {
        output.push_str(&format!("Skipped {}:\n", report.skipped.len()));
        for reason in &report.skipped {
            output.push_str(&format!("  - {}\n", reason));
        }
    }
    if report.has_errors() {
        output.push_str(&format!("Errors {}:\n", report.errors.len()));
        for error in &report.errors {
            output.push_str(&format!("  - {}\n", error));
        }
    }

    output
}

/// Generate any serializable result as pretty JSON.
pub fn generate_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(Into::into)
}

fn join_indices(indices: &[u32]) -> String {
    indices
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::partition;
    use crate::models::AggregationStatus;
    use std::path::PathBuf;

    fn create_test_variables() -> CycleVariables {
        CycleVariables {
            ymd: "20240115".to_string(),
            pymd: "20240112".to_string(),
            pymd1: "20240110".to_string(),
            nymd: "20240117".to_string(),
            dow_num: 1,
            dow: "Mon".to_string(),
            basetime: "2024011500".to_string(),
        }
    }

    #[test]
    fn test_generate_cycle_output() {
        let vars = create_test_variables();
        assert_eq!(generate_cycle_plain(&vars), "20240115\n");

        let env = generate_cycle_env(&vars);
        assert!(env.starts_with("YMD=20240115\n"));
        assert!(env.contains("PYMD1=20240110\n"));
        assert!(env.ends_with("BASETIME=2024011500\n"));

        let json = generate_json(&vars).unwrap();
        assert!(json.contains("\"nymd\": \"20240117\""));
    }

    #[test]
    fn test_generate_partition_text() {
        let first = partition(52, 3, 0).unwrap();
        let text = generate_partition_text(&first);
        assert!(text.starts_with("Worker 0/3: 18 member(s)\n"));
        assert!(text.contains("control: 0\n"));
        assert!(text.contains("perturbed: 1,2,3"));
        assert!(text.contains("request: 00/01/02"));

        let empty = partition(2, 4, 3).unwrap();
        assert_eq!(generate_partition_text(&empty), "Worker 3/4: 0 member(s)\n");
    }

    #[test]
    fn test_generate_verdict() {
        let missing = BarrierVerdict::Missing(vec![7, 12]);
        assert_eq!(
            generate_verdict_text("718", &missing),
            "718: waiting on 2 member(s): 7,12\n"
        );
        assert_eq!(generate_verdict_text("718", &BarrierVerdict::Ready), "718: ready\n");

        let json = generate_verdict_json("718", &missing).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["ready"], false);
        assert_eq!(value["missing"], serde_json::json!([7, 12]));
    }

    #[test]
    fn test_generate_aggregation_report() {
        let results = vec![
            (
                "101".to_string(),
                Err(ForecastError::IncompleteEnsemble {
                    vpu: "101".to_string(),
                    missing: vec![50, 51],
                }),
            ),
            (
                "718".to_string(),
                Ok(AggregationSummary {
                    vpu: "718".to_string(),
                    status: AggregationStatus::Aggregated,
                    members: (1..=51).collect(),
                    output: PathBuf::from("Qout_718.nc"),
                    mean_output: PathBuf::from("nces_avg_718.nc"),
                    inputs_removed: 51,
                }),
            ),
        ];

        let text = generate_aggregation_text(&results);
        assert!(text.contains("101: FAILED"));
        assert!(text.contains("718: aggregated (51 members) -> Qout_718.nc"));
        assert!(text.contains("2 VPU(s), 1 succeeded, 1 failed"));

        let json = generate_aggregation_json(&results).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["missing"], serde_json::json!([50, 51]));
        assert_eq!(value[1]["summary"]["status"], "aggregated");
    }

    #[test]
    fn test_generate_sweep_text() {
        let report = SweepReport {
            cutoff: "20240106".to_string(),
            dry_run: true,
            deleted: vec!["2024010100".to_string()],
            kept: vec!["2024010600".to_string(), "2024011000".to_string()],
            skipped: vec![],
            errors: vec![],
        };
        let text = generate_sweep_text(&report);
        assert!(text.contains("Cutoff: 20240106"));
        assert!(text.contains("Would delete 1 director(ies)"));
        assert!(text.contains("  - 2024010100"));
        assert!(text.contains("Kept 2 director(ies)"));
        assert!(!text.contains("Errors"));
    }
}
