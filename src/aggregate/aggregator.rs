//! Fan-in aggregation of per-member outputs for one VPU.

use super::dataset::{Dataset, DatasetCodec, NetcdfCodec};
use crate::ensemble::{scan, BarrierScope, BarrierVerdict, MemberFileContract, MemberTaskTracker};
use crate::error::{ForecastError, Result};
use crate::models::{AggregationStatus, AggregationSummary, CONTROL_INDEX};
use crate::naming::{
    aggregate_name, is_valid_vpu, mean_name, parse_member_output, ENSEMBLE_DIM,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tempfile::Builder;
use tracing::{debug, info, warn};

/// Settings for an aggregation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationOptions {
    /// Total ensemble size, control included.
    pub member_count: u32,
    /// Members the barrier waits for.
    pub scope: BarrierScope,
    /// Delete consumed member files after a successful write.
    pub cleanup_inputs: bool,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            member_count: crate::ensemble::DEFAULT_MEMBER_COUNT,
            scope: BarrierScope::Perturbed,
            cleanup_inputs: true,
        }
    }
}

/// Merges `Qout_<vpu>_<member>.nc` files into `Qout_<vpu>.nc` (leading
/// `ensemble` axis) and `nces_avg_<vpu>.nc` (ensemble mean).
///
/// Inputs are only removed once both artifacts have been renamed into
/// place, so a failed run can always be retried from the same files.
#[derive(Debug, Clone)]
pub struct EnsembleAggregator<C = NetcdfCodec> {
    dir: PathBuf,
    options: AggregationOptions,
    codec: C,
}

impl<C: DatasetCodec> EnsembleAggregator<C> {
    /// Aggregator over `dir` reading and writing through `codec`.
    pub fn with_codec(dir: impl Into<PathBuf>, options: AggregationOptions, codec: C) -> Self {
        Self {
            dir: dir.into(),
            options,
            codec,
        }
    }

    /// Perturbed members that make up the ensemble axis.
    fn perturbed_members(&self) -> Vec<u32> {
        (0..self.options.member_count)
            .filter(|&index| index != CONTROL_INDEX)
            .collect()
    }

    /// Aggregate one VPU.
    pub fn aggregate(&self, vpu: &str) -> Result<AggregationSummary> {
        if !is_valid_vpu(vpu) {
            return Err(ForecastError::aggregation(
                vpu,
                "VPU codes may only contain ASCII letters, digits and '-'",
            ));
        }

        let listing = scan(&self.dir)?;
        let tracker = MemberTaskTracker::for_ensemble(
            self.options.member_count,
            self.options.scope,
            MemberFileContract::Output {
                vpu: vpu.to_string(),
            },
        );

        if let BarrierVerdict::Missing(missing) = tracker.check(&listing) {
            if self.options.cleanup_inputs {
                if let Some(summary) = self.resume_cleanup(vpu, &listing)? {
                    return Ok(summary);
                }
            }
            warn!("VPU {}: {} member(s) missing: {:?}", vpu, missing.len(), missing);
            return Err(ForecastError::IncompleteEnsemble {
                vpu: vpu.to_string(),
                missing,
            });
        }

        let inputs = self.member_files(vpu, &listing)?;
        let members: Vec<u32> = inputs.keys().copied().collect();
        debug!("VPU {}: aggregating members {:?}", vpu, members);

        let mut datasets = Vec::with_capacity(inputs.len());
        for (index, path) in &inputs {
            let dataset = self
                .codec
                .read(path)
                .map_err(|e| ForecastError::aggregation(vpu, e.to_string()))?;
            datasets.push((*index, dataset));
        }

        let mean = Dataset::mean(&datasets)
            .map_err(|e| ForecastError::aggregation(vpu, format!("ensemble mean: {}", e)))?;
        let stacked = Dataset::stack(&datasets, ENSEMBLE_DIM)
            .map_err(|e| ForecastError::aggregation(vpu, format!("concatenation: {}", e)))?;

        let mean_output = self.write_atomic(vpu, &mean_name(vpu), &mean)?;
        let output = self.write_atomic(vpu, &aggregate_name(vpu), &stacked)?;
        info!(
            "VPU {}: wrote {} ({} members)",
            vpu,
            output.display(),
            members.len()
        );

        let inputs_removed = if self.options.cleanup_inputs {
            remove_inputs(vpu, inputs.values())
        } else {
            0
        };

        Ok(AggregationSummary {
            vpu: vpu.to_string(),
            status: AggregationStatus::Aggregated,
            members,
            output,
            mean_output,
            inputs_removed,
        })
    }

    /// Perturbed member files for `vpu`, keyed (and so ordered) by numeric index.
    ///
    /// Two names for the same index (`Qout_718_1.nc`, `Qout_718_01.nc`) are
    /// an error rather than a silent pick.
    fn member_files(&self, vpu: &str, listing: &[String]) -> Result<BTreeMap<u32, PathBuf>> {
        let mut files: BTreeMap<u32, PathBuf> = BTreeMap::new();

        for name in listing {
            let Some(index) = parse_member_output(name, vpu) else {
                continue;
            };
            if index == CONTROL_INDEX {
                continue;
            }
            if index >= self.options.member_count {
                warn!("VPU {}: ignoring {} outside the ensemble", vpu, name);
                continue;
            }

            if let Some(previous) = files.insert(index, self.dir.join(name)) {
                return Err(ForecastError::aggregation(
                    vpu,
                    format!(
                        "member {} has two files: {} and {}",
                        index,
                        previous.display(),
                        self.dir.join(name).display()
                    ),
                ));
            }
        }

        Ok(files)
    }

    /// A previous run may have written the artifact and died while deleting
    /// inputs. Finish the cleanup only if the artifact covers every perturbed
    /// member and each leftover file is exactly its slab in the artifact;
    /// anything else is treated as a fresh, incomplete ensemble.
    fn resume_cleanup(&self, vpu: &str, listing: &[String]) -> Result<Option<AggregationSummary>> {
        let output = self.dir.join(aggregate_name(vpu));
        let mean_output = self.dir.join(mean_name(vpu));
        if !output.is_file() || !mean_output.is_file() {
            return Ok(None);
        }

        let existing = match self.codec.read(&output) {
            Ok(dataset) => dataset,
            Err(e) => {
                debug!("VPU {}: existing artifact unreadable: {}", vpu, e);
                return Ok(None);
            }
        };

        let members = self.perturbed_members();
        let labels: Vec<f64> = members.iter().map(|m| f64::from(*m)).collect();
        let complete = existing.dims.first().map(String::as_str) == Some(ENSEMBLE_DIM)
            && existing.coords.get(ENSEMBLE_DIM) == Some(&labels);
        if !complete {
            return Ok(None);
        }

        let leftovers = self.member_files(vpu, listing)?;
        for (index, path) in &leftovers {
            let consumed = match self.codec.read(path) {
                Ok(member) => existing.contains_member(ENSEMBLE_DIM, *index, &member),
                Err(e) => {
                    debug!("VPU {}: {} unreadable: {}", vpu, path.display(), e);
                    false
                }
            };
            if !consumed {
                warn!(
                    "VPU {}: {} is not part of the existing {}, leaving inputs in place",
                    vpu,
                    path.display(),
                    output.display()
                );
                return Ok(None);
            }
        }

        info!("VPU {}: artifact already complete, finishing cleanup", vpu);
        let inputs_removed = remove_inputs(vpu, leftovers.values());

        Ok(Some(AggregationSummary {
            vpu: vpu.to_string(),
            status: AggregationStatus::AlreadyAggregated,
            members,
            output,
            mean_output,
            inputs_removed,
        }))
    }

    /// Write to a hidden temp file next to the target, then rename over it.
    fn write_atomic(&self, vpu: &str, name: &str, dataset: &Dataset) -> Result<PathBuf> {
        let target = self.dir.join(name);
        let fail = |message: String| ForecastError::aggregation(vpu, message);

        let temp_path = Builder::new()
            .prefix(&format!(".{}.", name))
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(|e| fail(format!("creating temp file for {}: {}", name, e)))?
            .into_temp_path();

        self.codec
            .write(dataset, &temp_path)
            .map_err(|e| fail(format!("writing {}: {}", name, e)))?;

        temp_path
            .persist(&target)
            .map_err(|e| fail(format!("renaming into {}: {}", target.display(), e.error)))?;
        Ok(target)
    }
}

/// Delete consumed inputs. The artifact is already in place, so a failed
/// delete only leaves work for the next run.
fn remove_inputs<'a>(vpu: &str, paths: impl Iterator<Item = &'a PathBuf>) -> usize {
    let mut removed = 0;
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("VPU {}: could not remove {}: {}", vpu, path.display(), e),
        }
    }
    removed
}
