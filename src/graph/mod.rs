//! Local graph storage and partitioning.

pub mod csr;
pub mod partition;

pub use csr::CsrGraph;
pub use partition::{GlobalId, GraphPartition, LocalId, PartitionBuilder, PartitionPlan};
