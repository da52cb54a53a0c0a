//! Ensemble fan-out (member partitioning) and fan-in (barrier check).

pub mod barrier;
pub mod partition;

pub use barrier::{scan, BarrierScope, BarrierVerdict, MemberFileContract, MemberTaskTracker};
pub use partition::{
    partition, EnsemblePartitioner, WorkerPartition, DEFAULT_MEMBER_COUNT,
    DEFAULT_PERTURBED_MEMBERS,
};
