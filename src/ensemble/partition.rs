//! Balanced contiguous partitioning of ensemble members across workers.

use crate::error::PartitionError;
use crate::models::EnsembleMember;
use serde::Serialize;

/// Perturbed members in the default ensemble.
pub const DEFAULT_PERTURBED_MEMBERS: u32 = 51;

/// Total members (control + perturbed) in the default ensemble.
pub const DEFAULT_MEMBER_COUNT: u32 = DEFAULT_PERTURBED_MEMBERS + 1;

/// The members assigned to one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerPartition {
    /// 0-indexed worker id.
    pub worker_id: u32,
    /// Pool size.
    pub worker_count: u32,
    /// Assigned members, ascending by index.
    pub members: Vec<EnsembleMember>,
}

impl WorkerPartition {
    /// All assigned indices, control included.
    pub fn indices(&self) -> Vec<u32> {
        self.members.iter().map(|m| m.index).collect()
    }

    /// The control member, if this worker owns it.
    pub fn control(&self) -> Option<EnsembleMember> {
        self.members.iter().copied().find(|m| m.is_control)
    }

    /// Assigned perturbed indices (control excluded).
    pub fn perturbed(&self) -> Vec<u32> {
        self.members
            .iter()
            .filter(|m| !m.is_control)
            .map(|m| m.index)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Zero-padded indices joined by `/`, the retrieval request style.
    pub fn request_list(&self) -> String {
        self.members
            .iter()
            .map(EnsembleMember::label)
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Splits `{0..N-1}` into `W` contiguous groups whose sizes differ by at most one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnsemblePartitioner {
    member_count: u32,
    worker_count: u32,
}

impl EnsemblePartitioner {
    /// `member_count` counts every member, control included.
    pub fn new(member_count: u32, worker_count: u32) -> Result<Self, PartitionError> {
        if member_count < 1 {
            return Err(PartitionError::NoMembers { member_count });
        }
        if worker_count < 1 {
            return Err(PartitionError::NoWorkers { worker_count });
        }
        Ok(Self {
            member_count,
            worker_count,
        })
    }

    pub fn member_count(&self) -> u32 {
        self.member_count
    }

    pub fn worker_count(&self) -> u32 {
        self.worker_count
    }

    /// The group for `worker_id`.
    ///
    /// The first `N mod W` workers take one extra member.
    pub fn assign(&self, worker_id: u32) -> Result<WorkerPartition, PartitionError> {
        if worker_id >= self.worker_count {
            return Err(PartitionError::WorkerIdOutOfRange {
                worker_id,
                worker_count: self.worker_count,
            });
        }

        let base = self.member_count / self.worker_count;
        let extra = self.member_count % self.worker_count;
        let start = worker_id * base + worker_id.min(extra);
        let size = base + u32::from(worker_id < extra);

        Ok(WorkerPartition {
            worker_id,
            worker_count: self.worker_count,
            members: (start..start + size).map(EnsembleMember::new).collect(),
        })
    }

    /// Every worker's group, in worker order.
    pub fn all(&self) -> Vec<WorkerPartition> {
        (0..self.worker_count)
            .filter_map(|worker_id| self.assign(worker_id).ok())
            .collect()
    }
}

/// Assign members to one worker in a single call.
pub fn partition(
    member_count: u32,
    worker_count: u32,
    worker_id: u32,
) -> Result<WorkerPartition, PartitionError> {
    EnsemblePartitioner::new(member_count, worker_count)?.assign(worker_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_default_ensemble_three_workers() {
        let partitioner = EnsemblePartitioner::new(DEFAULT_MEMBER_COUNT, 3).unwrap();
        let sizes: Vec<usize> = partitioner.all().iter().map(|p| p.len()).collect();
        assert_eq!(sizes, vec![18, 17, 17]);
        assert_eq!(sizes.iter().sum::<usize>(), 52);

        let last = partitioner.assign(2).unwrap();
        assert_eq!(last.indices().first(), Some(&35));
        assert_eq!(last.indices().last(), Some(&51));
    }

    #[test]
    fn test_partition_covers_exactly_once() {
        for n in 1..=52 {
            for w in 1..=8 {
                let partitioner = EnsemblePartitioner::new(n, w).unwrap();
                let groups = partitioner.all();
                assert_eq!(groups.len() as u32, w);

                let mut seen = BTreeSet::new();
                let mut total = 0;
                for group in &groups {
                    for index in group.indices() {
                        assert!(seen.insert(index), "index {} assigned twice", index);
                        total += 1;
                    }
                }
                assert_eq!(total, n as usize);
                assert_eq!(seen, (0..n).collect::<BTreeSet<_>>());

                let max = groups.iter().map(|g| g.len()).max().unwrap();
                let min = groups.iter().map(|g| g.len()).min().unwrap();
                assert!(max - min <= 1, "skew too large for n={} w={}", n, w);
            }
        }
    }

    #[test]
    fn test_groups_are_contiguous() {
        let partitioner = EnsemblePartitioner::new(20, 6).unwrap();
        for group in partitioner.all() {
            let indices = group.indices();
            for pair in indices.windows(2) {
                assert_eq!(pair[1], pair[0] + 1);
            }
        }
    }

    #[test]
    fn test_control_is_flagged_not_dropped() {
        let first = partition(DEFAULT_MEMBER_COUNT, 4, 0).unwrap();
        assert_eq!(first.control(), Some(EnsembleMember::new(0)));
        assert_eq!(first.indices()[0], 0);
        assert!(!first.perturbed().contains(&0));
        assert_eq!(first.perturbed().len(), first.len() - 1);

        let second = partition(DEFAULT_MEMBER_COUNT, 4, 1).unwrap();
        assert_eq!(second.control(), None);
        assert_eq!(second.perturbed(), second.indices());
    }

    #[test]
    fn test_more_workers_than_members() {
        let partitioner = EnsemblePartitioner::new(2, 4).unwrap();
        let sizes: Vec<usize> = partitioner.all().iter().map(|p| p.len()).collect();
        assert_eq!(sizes, vec![1, 1, 0, 0]);
        assert!(partitioner.assign(3).unwrap().is_empty());
    }

    #[test]
    fn test_request_list() {
        let group = partition(12, 2, 1).unwrap();
        assert_eq!(group.request_list(), "06/07/08/09/10/11");
    }

    #[test]
    fn test_invalid_requests() {
        assert_eq!(
            partition(52, 3, 3).unwrap_err(),
            PartitionError::WorkerIdOutOfRange {
                worker_id: 3,
                worker_count: 3
            }
        );
        assert_eq!(
            partition(52, 0, 0).unwrap_err(),
            PartitionError::NoWorkers { worker_count: 0 }
        );
        assert_eq!(
            partition(0, 3, 0).unwrap_err(),
            PartitionError::NoMembers { member_count: 0 }
        );
    }
}
