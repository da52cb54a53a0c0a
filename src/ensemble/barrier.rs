//! Fan-in barrier over per-member files.
//!
//! The check itself is a pure function of the expected member set and a
//! directory listing, so it can be re-evaluated on every attempt.

use crate::error::{ForecastError, Result};
use crate::models::CONTROL_INDEX;
use crate::naming::{parse_member_input, parse_member_output};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Which members the barrier waits for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum BarrierScope {
    /// Perturbed members only (control runs on its own path).
    #[default]
    Perturbed,
    /// Control and perturbed members.
    All,
}

/// Which per-member files count as "done".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberFileContract {
    /// Model output `Qout_<vpu>_<member>.nc`.
    Output {
        /// VPU code.
        vpu: String,
    },
    /// Retrieval input `<member>.<variable>.<ext>`.
    Input {
        /// Variable name, e.g. `runoff`.
        variable: String,
    },
}

impl MemberFileContract {
    fn member_index(&self, name: &str) -> Option<u32> {
        match self {
            MemberFileContract::Output { vpu } => parse_member_output(name, vpu),
            MemberFileContract::Input { variable } => parse_member_input(name, variable),
        }
    }
}

/// Barrier result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarrierVerdict {
    /// Every expected member has a file.
    Ready,
    /// These members (ascending) have no file yet.
    Missing(Vec<u32>),
}

impl BarrierVerdict {
    pub fn is_ready(&self) -> bool {
        matches!(self, BarrierVerdict::Ready)
    }
}

/// Expected member set plus the naming contract used to recognise files.
#[derive(Debug, Clone)]
pub struct MemberTaskTracker {
    expected: BTreeSet<u32>,
    contract: MemberFileContract,
}

impl MemberTaskTracker {
    /// Track an explicit member set.
    pub fn new(expected: impl IntoIterator<Item = u32>, contract: MemberFileContract) -> Self {
        Self {
            expected: expected.into_iter().collect(),
            contract,
        }
    }

    /// Track an ensemble of `member_count` members (control included).
    pub fn for_ensemble(
        member_count: u32,
        scope: BarrierScope,
        contract: MemberFileContract,
    ) -> Self {
        let expected = (0..member_count).filter(|&index| match scope {
            BarrierScope::All => true,
            BarrierScope::Perturbed => index != CONTROL_INDEX,
        });
        Self::new(expected, contract)
    }

    pub fn expected(&self) -> &BTreeSet<u32> {
        &self.expected
    }

    pub fn contract(&self) -> &MemberFileContract {
        &self.contract
    }

    /// Expected members that have a file in `listing`.
    pub fn present<I, S>(&self, listing: I) -> BTreeSet<u32>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        listing
            .into_iter()
            .filter_map(|name| {
                let name = name.as_ref();
                let index = self.contract.member_index(name);
                if index.is_none() {
                    debug!("Ignoring unrelated file: {}", name);
                }
                index
            })
            .filter(|index| self.expected.contains(index))
            .collect()
    }

    /// Compare `listing` against the expected set.
    pub fn check<I, S>(&self, listing: I) -> BarrierVerdict
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let present = self.present(listing);
        let missing: Vec<u32> = self.expected.difference(&present).copied().collect();

        if missing.is_empty() {
            BarrierVerdict::Ready
        } else {
            BarrierVerdict::Missing(missing)
        }
    }
}

/// File names (not paths) of the regular files directly under `dir`, sorted.
pub fn scan(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            ForecastError::io(path, e.into())
        })?;
        if entry.file_type().is_file() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }

    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::member_output_name;
    use tempfile::TempDir;

    fn output_contract() -> MemberFileContract {
        MemberFileContract::Output {
            vpu: "718".to_string(),
        }
    }

    #[test]
    fn test_ready_when_all_present() {
        let tracker = MemberTaskTracker::for_ensemble(52, BarrierScope::Perturbed, output_contract());
        assert_eq!(tracker.expected().len(), 51);

        let listing: Vec<String> = (1..52).map(|m| member_output_name("718", m)).collect();
        assert_eq!(tracker.check(&listing), BarrierVerdict::Ready);
    }

    #[test]
    fn test_reports_missing_members_sorted() {
        let tracker = MemberTaskTracker::for_ensemble(52, BarrierScope::Perturbed, output_contract());
        let listing: Vec<String> = (1..52)
            .rev()
            .filter(|m| *m != 10 && *m != 2)
            .map(|m| member_output_name("718", m))
            .collect();
        assert_eq!(tracker.check(&listing), BarrierVerdict::Missing(vec![2, 10]));
    }

    #[test]
    fn test_scope_all_requires_control() {
        let tracker = MemberTaskTracker::for_ensemble(4, BarrierScope::All, output_contract());
        let listing = vec!["Qout_718_1.nc", "Qout_718_2.nc", "Qout_718_3.nc"];
        assert_eq!(tracker.check(&listing), BarrierVerdict::Missing(vec![0]));

        let perturbed = MemberTaskTracker::for_ensemble(4, BarrierScope::Perturbed, output_contract());
        assert!(perturbed.check(&listing).is_ready());
    }

    #[test]
    fn test_ignores_other_vpus_and_artifacts() {
        let tracker = MemberTaskTracker::new([1, 2], output_contract());
        let listing = vec![
            "Qout_718_1.nc",
            "Qout_719_2.nc",
            "Qout_718.nc",
            "nces_avg_718.nc",
            "notes.txt",
        ];
        assert_eq!(tracker.check(&listing), BarrierVerdict::Missing(vec![2]));
    }

    #[test]
    fn test_input_contract() {
        let tracker = MemberTaskTracker::for_ensemble(
            3,
            BarrierScope::All,
            MemberFileContract::Input {
                variable: "runoff".to_string(),
            },
        );
        let listing = vec!["0.runoff.nc", "1.runoff.nc", "2.runoff.nc", "2.other.nc"];
        assert!(tracker.check(&listing).is_ready());
    }

    #[test]
    fn test_scan_lists_files_only() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Qout_718_2.nc"), "{}").unwrap();
        std::fs::write(dir.path().join("Qout_718_1.nc"), "{}").unwrap();
        std::fs::create_dir(dir.path().join("Qout_718_3.nc")).unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("Qout_718_4.nc"), "{}").unwrap();

        let names = scan(dir.path()).unwrap();
        assert_eq!(names, vec!["Qout_718_1.nc", "Qout_718_2.nc"]);
    }

    #[test]
    fn test_scan_missing_directory_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = scan(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, ForecastError::Io { .. }));
    }
}
