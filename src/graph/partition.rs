//! One host's share of a partitioned graph.
//!
//! Local ids are dense: masters occupy `0..num_masters`, mirrors follow. Both
//! groups are ordered by global id, which makes every per-peer node list
//! derived from a partition come out in the same order on both ends.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use super::CsrGraph;
use crate::error::{Error, Result};
use crate::net::HostId;

/// Global node id.
pub type GlobalId = u64;

/// Local node id.
pub type LocalId = u32;

/// A host's masters and mirrors, their data, and the local edges.
#[derive(Debug)]
pub struct GraphPartition<N, E = ()> {
    host: HostId,
    num_hosts: usize,
    gids: Vec<GlobalId>,
    lids: HashMap<GlobalId, LocalId>,
    masters: usize,
    owners: Vec<HostId>,
    mirrors_by_owner: Vec<Vec<LocalId>>,
    graph: CsrGraph<E>,
    nodes: Vec<N>,
}

impl<N, E> GraphPartition<N, E> {
    /// Host this partition belongs to.
    pub fn host(&self) -> HostId {
        self.host
    }

    /// Hosts in the run.
    pub fn num_hosts(&self) -> usize {
        self.num_hosts
    }

    /// Masters plus mirrors.
    pub fn num_nodes(&self) -> usize {
        self.gids.len()
    }

    /// Nodes this host owns.
    pub fn num_masters(&self) -> usize {
        self.masters
    }

    /// Replicas of nodes owned elsewhere.
    pub fn num_mirrors(&self) -> usize {
        self.gids.len() - self.masters
    }

    /// Local ids of the masters.
    pub fn masters(&self) -> Range<LocalId> {
        0..self.masters as LocalId
    }

    /// Local ids of the mirrors.
    pub fn mirrors(&self) -> Range<LocalId> {
        self.masters as LocalId..self.gids.len() as LocalId
    }

    /// `true` if `lid` is a master.
    #[inline]
    pub fn is_master(&self, lid: LocalId) -> bool {
        (lid as usize) < self.masters
    }

    /// Global id of `lid`.
    #[inline]
    pub fn gid(&self, lid: LocalId) -> GlobalId {
        self.gids[lid as usize]
    }

    /// Local id of `gid`, if this host has a proxy for it.
    #[inline]
    pub fn lid(&self, gid: GlobalId) -> Option<LocalId> {
        self.lids.get(&gid).copied()
    }

    /// Host owning `lid`.
    pub fn owner(&self, lid: LocalId) -> HostId {
        if self.is_master(lid) {
            self.host
        } else {
            self.owners[lid as usize - self.masters]
        }
    }

    /// This host's mirrors whose master lives on `owner`, by global id.
    pub fn mirrors_owned_by(&self, owner: HostId) -> &[LocalId] {
        &self.mirrors_by_owner[owner as usize]
    }

    /// Local edges.
    pub fn graph(&self) -> &CsrGraph<E> {
        &self.graph
    }

    /// Data of `lid`.
    #[inline]
    pub fn node(&self, lid: LocalId) -> &N {
        &self.nodes[lid as usize]
    }

    /// All node data, indexed by local id.
    pub fn nodes(&self) -> &[N] {
        &self.nodes
    }
}

/// Collects masters, mirrors and edges, then lays them out.
#[derive(Debug)]
pub struct PartitionBuilder<N, E = ()> {
    host: HostId,
    num_hosts: usize,
    masters: BTreeMap<GlobalId, N>,
    mirrors: BTreeMap<GlobalId, (HostId, N)>,
    edges: Vec<(GlobalId, GlobalId, E)>,
}

impl<N, E> PartitionBuilder<N, E> {
    /// Empty builder for `host` of `num_hosts`.
    pub fn new(host: HostId, num_hosts: usize) -> Self {
        Self {
            host,
            num_hosts,
            masters: BTreeMap::new(),
            mirrors: BTreeMap::new(),
            edges: Vec::new(),
        }
    }

    /// Adds a node this host owns.
    pub fn add_master(&mut self, gid: GlobalId, data: N) -> &mut Self {
        self.masters.insert(gid, data);
        self
    }

    /// Adds a replica of a node owned by `owner`.
    pub fn add_mirror(&mut self, gid: GlobalId, owner: HostId, data: N) -> &mut Self {
        self.mirrors.insert(gid, (owner, data));
        self
    }

    /// Adds a local edge between two proxies on this host.
    pub fn add_edge(&mut self, src: GlobalId, dst: GlobalId, data: E) -> &mut Self {
        self.edges.push((src, dst, data));
        self
    }

    /// Checks the inputs and assigns local ids.
    pub fn build(self) -> Result<GraphPartition<N, E>> {
        let invalid = |msg: String| Err(Error::InvalidPartition(msg));
        if self.host as usize >= self.num_hosts {
            return invalid(format!("host {} of {}", self.host, self.num_hosts));
        }

        let masters = self.masters.len();
        let total = masters + self.mirrors.len();
        let mut gids = Vec::with_capacity(total);
        let mut nodes = Vec::with_capacity(total);
        let mut owners = Vec::with_capacity(self.mirrors.len());
        let mut mirrors_by_owner = vec![Vec::new(); self.num_hosts];

        for (gid, data) in self.masters {
            gids.push(gid);
            nodes.push(data);
        }
        for (gid, (owner, data)) in self.mirrors {
            if owner == self.host || owner as usize >= self.num_hosts {
                return invalid(format!("mirror {gid} claims owner {owner}"));
            }
            mirrors_by_owner[owner as usize].push(gids.len() as LocalId);
            owners.push(owner);
            gids.push(gid);
            nodes.push(data);
        }

        let mut lids = HashMap::with_capacity(total);
        for (lid, &gid) in gids.iter().enumerate() {
            if lids.insert(gid, lid as LocalId).is_some() {
                return invalid(format!("node {gid} is both master and mirror"));
            }
        }

        let mut local_edges = Vec::with_capacity(self.edges.len());
        for (src, dst, data) in self.edges {
            match (lids.get(&src), lids.get(&dst)) {
                (Some(&u), Some(&v)) => local_edges.push((u, v, data)),
                _ => return invalid(format!("edge {src}->{dst} leaves the partition")),
            }
        }

        Ok(GraphPartition {
            host: self.host,
            num_hosts: self.num_hosts,
            graph: CsrGraph::from_edges(total, local_edges),
            gids,
            lids,
            masters,
            owners,
            mirrors_by_owner,
            nodes,
        })
    }
}

/// Ownership of every node of a global graph, plus its edges.
///
/// Stands in for an external partitioner: edges go to the owner of their
/// source, and destinations owned elsewhere become mirrors there.
#[derive(Debug, Clone)]
pub struct PartitionPlan<E = ()> {
    num_hosts: usize,
    owners: Vec<HostId>,
    edges: Vec<(GlobalId, GlobalId, E)>,
}

impl<E: Clone> PartitionPlan<E> {
    /// Plan with an explicit owner per global id.
    pub fn new(num_hosts: usize, owners: Vec<HostId>, edges: Vec<(GlobalId, GlobalId, E)>) -> Result<Self> {
        if num_hosts == 0 {
            return Err(Error::InvalidPartition("no hosts".into()));
        }
        if let Some(&bad) = owners.iter().find(|&&o| o as usize >= num_hosts) {
            return Err(Error::InvalidPartition(format!("owner {bad} of {num_hosts} hosts")));
        }
        let n = owners.len() as GlobalId;
        if let Some((s, d, _)) = edges.iter().find(|(s, d, _)| *s >= n || *d >= n) {
            return Err(Error::InvalidPartition(format!("edge {s}->{d} with {n} nodes")));
        }
        Ok(Self {
            num_hosts,
            owners,
            edges,
        })
    }

    /// Contiguous blocks of global ids per host.
    pub fn blocked(num_nodes: usize, num_hosts: usize, edges: Vec<(GlobalId, GlobalId, E)>) -> Result<Self> {
        let owners = (0..num_nodes)
            .map(|g| (g * num_hosts.max(1) / num_nodes.max(1)) as HostId)
            .collect();
        Self::new(num_hosts, owners, edges)
    }

    /// Hosts in the plan.
    pub fn num_hosts(&self) -> usize {
        self.num_hosts
    }

    /// Owner of `gid`.
    pub fn owner_of(&self, gid: GlobalId) -> HostId {
        self.owners[gid as usize]
    }

    /// Builds `host`'s partition; `init` produces the data of every proxy.
    pub fn partition<N>(&self, host: HostId, mut init: impl FnMut(GlobalId) -> N) -> Result<GraphPartition<N, E>> {
        let mut builder = PartitionBuilder::new(host, self.num_hosts);
        for (gid, &owner) in self.owners.iter().enumerate() {
            if owner == host {
                builder.add_master(gid as GlobalId, init(gid as GlobalId));
            }
        }
        let mut mirrored = BTreeMap::new();
        for (src, dst, data) in &self.edges {
            if self.owner_of(*src) != host {
                continue;
            }
            let dst_owner = self.owner_of(*dst);
            if dst_owner != host {
                mirrored.entry(*dst).or_insert(dst_owner);
            }
            builder.add_edge(*src, *dst, data.clone());
        }
        for (gid, owner) in mirrored {
            builder.add_mirror(gid, owner, init(gid));
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masters_come_first_in_gid_order() {
        let mut b = PartitionBuilder::<u32>::new(1, 3);
        b.add_mirror(9, 2, 0)
            .add_master(4, 40)
            .add_mirror(1, 0, 10)
            .add_master(2, 20)
            .add_edge(4, 9, ())
            .add_edge(2, 1, ());
        let p = b.build().unwrap();
        assert_eq!(p.num_masters(), 2);
        assert_eq!((0..4).map(|l| p.gid(l)).collect::<Vec<_>>(), vec![2, 4, 1, 9]);
        assert_eq!(p.lid(9), Some(3));
        assert_eq!(p.owner(2), 0);
        assert_eq!(p.owner(1), 1);
        assert_eq!(p.mirrors_owned_by(2), &[3]);
        assert_eq!(*p.node(1), 40);
        assert_eq!(p.graph().neighbors(1).map(|(v, _)| v).collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn mirror_of_own_node_is_rejected() {
        let mut b = PartitionBuilder::<()>::new(0, 2);
        b.add_mirror(3, 0, ());
        assert!(matches!(b.build(), Err(Error::InvalidPartition(_))));
    }

    #[test]
    fn edge_leaving_the_partition_is_rejected() {
        let mut b = PartitionBuilder::<()>::new(0, 2);
        b.add_master(0, ()).add_edge(0, 7, ());
        assert!(b.build().is_err());
    }

    #[test]
    fn plan_mirrors_remote_destinations() {
        let edges = vec![(0, 1, 5u32), (0, 3, 1), (2, 0, 2), (3, 2, 7)];
        let plan = PartitionPlan::blocked(4, 2, edges).unwrap();
        assert_eq!(plan.owner_of(1), 0);
        assert_eq!(plan.owner_of(2), 1);

        let p0 = plan.partition(0, |g| g).unwrap();
        assert_eq!(p0.num_masters(), 2);
        assert_eq!(p0.num_mirrors(), 1);
        assert_eq!(p0.mirrors_owned_by(1).iter().map(|&l| p0.gid(l)).collect::<Vec<_>>(), vec![3]);
        assert_eq!(p0.graph().edge_count(), 2);

        let p1 = plan.partition(1, |g| g).unwrap();
        assert_eq!(p1.mirrors_owned_by(0).iter().map(|&l| p1.gid(l)).collect::<Vec<_>>(), vec![0]);
        assert_eq!(*p1.node(p1.lid(0).unwrap()), 0);
    }
}
