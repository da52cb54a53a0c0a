//! Ensemble aggregation (fan-in).
//!
//! Each VPU is aggregated independently and single-threaded; different
//! VPUs share no state and run concurrently on the blocking pool.

pub mod aggregator;
pub mod dataset;

pub use aggregator::{AggregationOptions, EnsembleAggregator};
pub use dataset::{Dataset, DatasetCodec, DatasetError, NetcdfCodec};
#[cfg(test)]
pub use dataset::JsonCodec;

use crate::error::{ForecastError, Result};
use crate::models::AggregationSummary;
use crate::naming::split_member_output;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error};
use walkdir::WalkDir;

/// VPU codes that have at least one per-member output file in `dir`.
pub fn discover_vpus(dir: &Path) -> Result<BTreeSet<String>> {
    let mut vpus = BTreeSet::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            ForecastError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if let Some((vpu, _)) = split_member_output(&name) {
            vpus.insert(vpu.to_string());
        }
    }

    debug!("Discovered {} VPU(s) in {}", vpus.len(), dir.display());
    Ok(vpus)
}

/// Aggregate several VPUs, at most `concurrency` at a time.
///
/// Results come back in VPU order; one VPU failing does not stop the others.
pub async fn aggregate_all<C>(
    aggregator: EnsembleAggregator<C>,
    vpus: Vec<String>,
    concurrency: usize,
    show_progress: bool,
) -> Vec<(String, Result<AggregationSummary>)>
where
    C: DatasetCodec + 'static,
{
    let aggregator = Arc::new(aggregator);
    let progress = show_progress.then(|| progress_bar(vpus.len() as u64));

    let mut results: Vec<(String, Result<AggregationSummary>)> = stream::iter(vpus)
        .map(|vpu| {
            let aggregator = Arc::clone(&aggregator);
            let progress = progress.clone();
            async move {
                let task_vpu = vpu.clone();
                let result = tokio::task::spawn_blocking(move || aggregator.aggregate(&task_vpu))
                    .await
                    .unwrap_or_else(|join_error| {
                        error!("VPU {}: aggregation task failed: {}", vpu, join_error);
                        Err(ForecastError::aggregation(&vpu, join_error.to_string()))
                    });
                if let Some(pb) = &progress {
                    pb.set_message(vpu.clone());
                    pb.inc(1);
                }
                (vpu, result)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    results.sort_by(|a, b| a.0.cmp(&b.0));
    results
}

fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} VPU {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}
