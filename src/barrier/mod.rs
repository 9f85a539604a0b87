//! Reusable barriers.
//!
//! [`Barrier`] is the single interface the runtime hands out. It picks one of
//! three implementations when the runtime is built:
//!
//! * [`TreeBarrier`]: flat MCS-style tree over threads, the default on a
//!   single package.
//! * [`TopoBarrier`]: tree over packages, so only leaders touch remote
//!   cache lines.
//! * [`DistBarrier`]: either of the above, followed by a host-level round
//!   through the network.
//!
//! All three guarantee that writes before `wait` are visible to every
//! participant after it returns.

pub mod dist;
pub mod topo;
pub mod tree;


pub use dist::DistBarrier;
pub use topo::TopoBarrier;
pub use tree::TreeBarrier;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::MAX_THREADS;
use crate::net::Network;
use crate::topology::Topology;

/// Which local barrier to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarrierKind {
    /// Topology-aware when the threads span more than one package, flat tree
    /// otherwise.
    #[default]
    Auto,
    /// Always the flat tree.
    Tree,
    /// Always the package tree.
    Topo,
}

/// A barrier among the threads of one host.
#[derive(Debug)]
pub enum LocalBarrier {
    /// Flat 4-ary arrival tree.
    Tree(TreeBarrier),
    /// Package tree.
    Topo(TopoBarrier),
}

impl LocalBarrier {
    /// Builds the barrier `kind` selects for `threads` threads on `topology`.
    pub fn build(kind: BarrierKind, topology: &Topology, threads: usize) -> Self {
        let topo = match kind {
            BarrierKind::Auto => topology.packages_for(threads) > 1,
            BarrierKind::Tree => false,
            BarrierKind::Topo => true,
        };
        if topo {
            LocalBarrier::Topo(TopoBarrier::new(topology.clone(), threads))
        } else {
            LocalBarrier::Tree(TreeBarrier::new(MAX_THREADS.max(threads), threads))
        }
    }

    /// Participating threads.
    pub fn threads(&self) -> usize {
        match self {
            LocalBarrier::Tree(b) => b.threads(),
            LocalBarrier::Topo(b) => b.threads(),
        }
    }

    /// Maximum participants.
    pub fn capacity(&self) -> usize {
        match self {
            LocalBarrier::Tree(b) => b.capacity(),
            LocalBarrier::Topo(b) => b.capacity(),
        }
    }

    /// Reconfigures for `threads` participants.
    pub fn reinit(&mut self, threads: usize) {
        match self {
            LocalBarrier::Tree(b) => b.reinit(threads),
            LocalBarrier::Topo(b) => b.reinit(threads),
        }
    }

    /// Waits for the other local participants.
    #[inline]
    pub fn wait(&self, tid: usize) {
        match self {
            LocalBarrier::Tree(b) => b.wait(tid),
            LocalBarrier::Topo(b) => b.wait(tid),
        }
    }
}

/// The barrier a runtime hands to its threads.
#[derive(Debug)]
pub enum Barrier {
    /// Threads of this host only.
    Local(LocalBarrier),
    /// Threads of every host.
    Distributed(DistBarrier),
}

impl Barrier {
    /// A host-local barrier.
    pub fn local(kind: BarrierKind, topology: &Topology, threads: usize) -> Self {
        Barrier::Local(LocalBarrier::build(kind, topology, threads))
    }

    /// A barrier spanning every host on `network`.
    pub fn distributed(
        kind: BarrierKind,
        topology: &Topology,
        threads: usize,
        network: Arc<Network>,
    ) -> crate::Result<Self> {
        let local = LocalBarrier::build(kind, topology, threads);
        Ok(Barrier::Distributed(DistBarrier::new(local, network)?))
    }

    /// Participating threads on this host.
    pub fn threads(&self) -> usize {
        match self {
            Barrier::Local(b) => b.threads(),
            Barrier::Distributed(b) => b.threads(),
        }
    }

    /// Reconfigures for `threads` participants. Must not race with `wait`.
    pub fn reinit(&mut self, threads: usize) {
        match self {
            Barrier::Local(b) => b.reinit(threads),
            Barrier::Distributed(b) => b.reinit(threads),
        }
    }

    /// Blocks thread `tid` until every participant has arrived.
    #[inline]
    pub fn wait(&self, tid: usize) {
        match self {
            Barrier::Local(b) => b.wait(tid),
            Barrier::Distributed(b) => b.wait(tid),
        }
    }
}
