//! Reduce and broadcast rounds over a [`GraphPartition`].

use std::sync::Arc;

use crate::concurrency::DirtyBitset;
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::graph::{GlobalId, GraphPartition, LocalId};
use crate::net::wire::WireValue;
use crate::net::{tags, HostId, Mailbox, Network};

use super::field::{field_id, BroadcastField, ReduceField};
use super::message::{decode, encode, CommMode, OutEntry, Slot};
use super::SyncStats;

const SETUP: u64 = 0;
const REDUCE: u64 = 1;
const BROADCAST: u64 = 2;

fn key(kind: u64, round: u32) -> u64 {
    (u64::from(round) << 2) | kind
}

#[cfg(feature = "parallel")]
fn map_each<T, R, F>(items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    use rayon::prelude::*;
    items.par_iter().map(f).collect()
}

#[cfg(not(feature = "parallel"))]
fn map_each<T, R, F>(items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    items.iter().map(f).collect()
}

struct Outbound {
    peer: HostId,
    bytes: Vec<u8>,
    entries: usize,
    mode: CommMode,
}

/// Moves dirty field values between masters and mirrors.
///
/// One engine per host, created after the partition is built. Every host must
/// issue the same sequence of sync calls; rounds are matched by position in
/// that sequence. Calls are made by a single thread per host, between
/// barriers, never concurrently with compute.
#[derive(Debug)]
pub struct SyncEngine {
    network: Arc<Network>,
    mailbox: Arc<Mailbox>,
    host: HostId,
    peers: Vec<HostId>,
    mirrors_of: Vec<Vec<LocalId>>,
    masters_for: Vec<Vec<LocalId>>,
    dense_threshold: f64,
    round: u32,
    totals: SyncStats,
}

impl SyncEngine {
    /// Exchanges mirror lists with every peer.
    ///
    /// Afterwards each host knows, per peer, which of its masters the peer
    /// mirrors. Blocks until every host has called `new`.
    pub fn new<N, E>(network: Arc<Network>, partition: &GraphPartition<N, E>, config: &RuntimeConfig) -> Result<Self> {
        let host = network.host_id();
        let num_hosts = network.num_hosts();
        if partition.host() != host || partition.num_hosts() != num_hosts {
            return Err(Error::InvalidPartition(format!(
                "partition for host {}/{} on network host {}/{}",
                partition.host(),
                partition.num_hosts(),
                host,
                num_hosts
            )));
        }

        let mailbox = network.mailbox(tags::SYNC);
        let peers: Vec<HostId> = network.peers().collect();
        let mirrors_of: Vec<Vec<LocalId>> = (0..num_hosts as HostId)
            .map(|h| {
                if h == host {
                    Vec::new()
                } else {
                    partition.mirrors_owned_by(h).to_vec()
                }
            })
            .collect();

        for &peer in &peers {
            let list = &mirrors_of[peer as usize];
            let mut body = Vec::with_capacity(4 + 8 * list.len());
            (list.len() as u32).encode(&mut body);
            for &lid in list {
                partition.gid(lid).encode(&mut body);
            }
            network.send_keyed(peer, tags::SYNC, key(SETUP, 0), &body);
        }

        let mut masters_for = vec![Vec::new(); num_hosts];
        for (src, body) in mailbox.collect(&network, key(SETUP, 0), peers.len()) {
            let mut input = body.as_slice();
            let count = u32::decode(&mut input)? as usize;
            let mut lids = Vec::with_capacity(count);
            for _ in 0..count {
                let gid = GlobalId::decode(&mut input)?;
                match partition.lid(gid) {
                    Some(lid) if partition.is_master(lid) => lids.push(lid),
                    _ => {
                        return Err(Error::InvalidPartition(format!(
                            "host {src} mirrors node {gid}, which host {host} does not own"
                        )))
                    }
                }
            }
            if !input.is_empty() {
                return Err(Error::TrailingBytes(input.len()));
            }
            masters_for[src as usize] = lids;
        }

        log_debug!(
            "host {} sync engine ready: {} masters, {} mirrors",
            host,
            partition.num_masters(),
            partition.num_mirrors()
        );
        Ok(Self {
            network,
            mailbox,
            host,
            peers,
            mirrors_of,
            masters_for,
            dense_threshold: config.dense_threshold,
            round: 0,
            totals: SyncStats::default(),
        })
    }

    /// This host's masters mirrored on `peer`, by global id.
    pub fn masters_mirrored_on(&self, peer: HostId) -> &[LocalId] {
        &self.masters_for[peer as usize]
    }

    /// Totals over every round so far.
    pub fn stats(&self) -> SyncStats {
        self.totals
    }

    /// Overrides the dense-encoding threshold.
    pub fn set_dense_threshold(&mut self, threshold: f64) {
        self.dense_threshold = threshold;
    }

    fn next_round(&mut self, kind: u64) -> (u32, u64) {
        self.round = self.round.wrapping_add(1);
        (self.round, key(kind, self.round))
    }

    fn check_bitset<N, E>(partition: &GraphPartition<N, E>, dirty: &DirtyBitset) {
        if dirty.len() < partition.num_nodes() {
            fatal!(
                "dirty bitset holds {} bits for {} local nodes",
                dirty.len(),
                partition.num_nodes()
            );
        }
    }

    fn send_all(&self, key: u64, outbound: &[Outbound], stats: &mut SyncStats) {
        for out in outbound {
            self.network.send_keyed(out.peer, tags::SYNC, key, &out.bytes);
            stats.messages_sent += 1;
            stats.bytes_sent += out.bytes.len() as u64;
            stats.entries_sent += out.entries as u64;
            if out.mode == CommMode::Dense {
                stats.dense_messages += 1;
            }
        }
    }

    /// Push round: sends every dirty mirror's contribution to its owner and
    /// merges what arrives into this host's masters.
    ///
    /// Contributing mirrors have their dirty bit cleared and their field
    /// reset. Masters that change are marked dirty for the next broadcast.
    pub fn sync_reduce<N, E, F>(&mut self, partition: &GraphPartition<N, E>, field: &F, dirty: &DirtyBitset) -> SyncStats
    where
        N: Sync,
        E: Sync,
        F: ReduceField<N>,
    {
        Self::check_bitset(partition, dirty);
        let (round, key) = self.next_round(REDUCE);
        let fid = field_id(field.name());
        let mut stats = SyncStats {
            rounds: 1,
            ..SyncStats::default()
        };

        let this = &*self;
        let outbound = map_each(&this.peers, |&peer| {
            let shared = &this.mirrors_of[peer as usize];
            let picked: Vec<(usize, LocalId)> = shared
                .iter()
                .enumerate()
                .filter(|&(_, &lid)| dirty.test_and_clear(lid as usize))
                .map(|(pos, &lid)| (pos, lid))
                .collect();
            let lids: Vec<LocalId> = picked.iter().map(|&(_, lid)| lid).collect();
            let values = match field.extract_reset_batch(&lids, partition.nodes()) {
                Some(values) if values.len() == lids.len() => values,
                Some(values) => fatal!(
                    "field {} batch extract returned {} values for {} nodes",
                    field.name(),
                    values.len(),
                    lids.len()
                ),
                None => lids
                    .iter()
                    .map(|&lid| {
                        let node = partition.node(lid);
                        let v = field.extract(lid, node);
                        field.reset(lid, node);
                        v
                    })
                    .collect(),
            };
            let entries: Vec<OutEntry<F::Value>> = picked
                .into_iter()
                .zip(values)
                .filter(|(_, v)| !v.is_noop())
                .map(|((pos, lid), v)| (pos, partition.gid(lid), v))
                .collect();
            let mode = CommMode::choose(entries.len(), shared.len(), this.dense_threshold);
            Outbound {
                peer,
                bytes: encode(fid, round, mode, shared.len(), &entries),
                entries: entries.len(),
                mode,
            }
        });
        self.send_all(key, &outbound, &mut stats);

        let inbound = self.mailbox.collect(&self.network, key, self.peers.len());
        let this = &*self;
        let received = map_each(&inbound, |(src, body)| {
            let src = *src;
            let shared = &this.masters_for[src as usize];
            let (lids, values) = this.unpack::<F::Value, _>(body, shared, fid, round, src, |gid| {
                partition.lid(gid).filter(|&lid| partition.is_master(lid))
            });
            let changed = match field.reduce_batch(&lids, partition.nodes(), &values) {
                Some(flags) if flags.len() == lids.len() => flags,
                Some(flags) => fatal!(
                    "field {} batch reduce returned {} flags for {} nodes",
                    field.name(),
                    flags.len(),
                    lids.len()
                ),
                None => lids
                    .iter()
                    .zip(values)
                    .map(|(&lid, v)| field.reduce(lid, partition.node(lid), v))
                    .collect(),
            };
            for (&lid, changed) in lids.iter().zip(changed) {
                if changed {
                    dirty.set(lid as usize);
                }
            }
            lids.len() as u64
        });
        stats.entries_received = received.into_iter().sum();

        log_trace!(
            "host {} reduce round {} field {}: sent {} received {}",
            self.host,
            round,
            field.name(),
            stats.entries_sent,
            stats.entries_received
        );
        self.totals.merge(&stats);
        stats
    }

    /// Pull round: sends every dirty master's value to the hosts that mirror
    /// it and overwrites this host's mirrors with what arrives.
    ///
    /// Master dirty bits are cleared once sent; mirror bits are untouched.
    pub fn sync_broadcast<N, E, F>(
        &mut self,
        partition: &GraphPartition<N, E>,
        field: &F,
        dirty: &DirtyBitset,
    ) -> SyncStats
    where
        N: Sync,
        E: Sync,
        F: BroadcastField<N>,
    {
        Self::check_bitset(partition, dirty);
        let (round, key) = self.next_round(BROADCAST);
        let fid = field_id(field.name());
        let mut stats = SyncStats {
            rounds: 1,
            ..SyncStats::default()
        };

        let this = &*self;
        let outbound = map_each(&this.peers, |&peer| {
            let shared = &this.masters_for[peer as usize];
            let picked: Vec<(usize, LocalId)> = shared
                .iter()
                .enumerate()
                .filter(|&(_, &lid)| dirty.test(lid as usize))
                .map(|(pos, &lid)| (pos, lid))
                .collect();
            let lids: Vec<LocalId> = picked.iter().map(|&(_, lid)| lid).collect();
            let values = match field.extract_batch(&lids, partition.nodes()) {
                Some(values) if values.len() == lids.len() => values,
                Some(values) => fatal!(
                    "field {} batch extract returned {} values for {} nodes",
                    field.name(),
                    values.len(),
                    lids.len()
                ),
                None => lids
                    .iter()
                    .map(|&lid| field.extract(lid, partition.node(lid)))
                    .collect(),
            };
            let entries: Vec<OutEntry<F::Value>> = picked
                .into_iter()
                .zip(values)
                .filter(|(_, v)| !v.is_noop())
                .map(|((pos, lid), v)| (pos, partition.gid(lid), v))
                .collect();
            let mode = CommMode::choose(entries.len(), shared.len(), this.dense_threshold);
            Outbound {
                peer,
                bytes: encode(fid, round, mode, shared.len(), &entries),
                entries: entries.len(),
                mode,
            }
        });
        self.send_all(key, &outbound, &mut stats);

        let masters = partition.num_masters();
        let sent: Vec<usize> = dirty.iter_ones().take_while(|&bit| bit < masters).collect();
        for bit in sent {
            dirty.test_and_clear(bit);
        }

        let inbound = self.mailbox.collect(&self.network, key, self.peers.len());
        let this = &*self;
        let received = map_each(&inbound, |(src, body)| {
            let src = *src;
            let shared = &this.mirrors_of[src as usize];
            let (lids, values) = this.unpack::<F::Value, _>(body, shared, fid, round, src, |gid| {
                partition
                    .lid(gid)
                    .filter(|&lid| !partition.is_master(lid) && partition.owner(lid) == src)
            });
            if !field.set_val_batch(&lids, partition.nodes(), &values) {
                for (&lid, v) in lids.iter().zip(values) {
                    field.set_val(lid, partition.node(lid), v);
                }
            }
            lids.len() as u64
        });
        stats.entries_received = received.into_iter().sum();

        log_trace!(
            "host {} broadcast round {} field {}: sent {} received {}",
            self.host,
            round,
            field.name(),
            stats.entries_sent,
            stats.entries_received
        );
        self.totals.merge(&stats);
        stats
    }

    /// Reduce round followed by a broadcast round over the same bitset.
    pub fn sync<N, E, R, B>(
        &mut self,
        partition: &GraphPartition<N, E>,
        reduce: &R,
        broadcast: &B,
        dirty: &DirtyBitset,
    ) -> SyncStats
    where
        N: Sync,
        E: Sync,
        R: ReduceField<N>,
        B: BroadcastField<N>,
    {
        let mut stats = self.sync_reduce(partition, reduce, dirty);
        stats.merge(&self.sync_broadcast(partition, broadcast, dirty));
        stats
    }

    /// Decodes one inbound message into target local ids and values.
    ///
    /// Anything that does not fit this host's view of the partition is a
    /// protocol violation.
    fn unpack<V, L>(
        &self,
        body: &[u8],
        shared: &[LocalId],
        fid: u32,
        round: u32,
        src: HostId,
        resolve: L,
    ) -> (Vec<LocalId>, Vec<V>)
    where
        V: WireValue,
        L: Fn(GlobalId) -> Option<LocalId>,
    {
        let (header, entries) = match decode::<V>(body, shared.len()) {
            Ok(decoded) => decoded,
            Err(e) => fatal!("host {}: bad sync message from host {}: {}", self.host, src, e),
        };
        if header.field.get() != fid || header.round.get() != round {
            fatal!(
                "host {}: sync message from host {} is for field {:#x} round {}, expected {:#x} round {}",
                self.host,
                src,
                header.field.get(),
                header.round.get(),
                fid,
                round
            );
        }
        let mut lids = Vec::with_capacity(entries.len());
        let mut values = Vec::with_capacity(entries.len());
        for (slot, value) in entries {
            if value.is_noop() {
                fatal!("host {}: host {} sent a sentinel value", self.host, src);
            }
            let lid = match slot {
                Slot::Global(gid) => match resolve(gid) {
                    Some(lid) => lid,
                    None => fatal!(
                        "host {}: update from host {} for node {} with no matching proxy",
                        self.host,
                        src,
                        gid
                    ),
                },
                Slot::Position(pos) => shared[pos],
            };
            lids.push(lid);
            values.push(value);
        }
        (lids, values)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::graph::PartitionBuilder;
    use crate::net::{MemoryCluster, Selection, SENTINEL};

    struct Acc;

    impl ReduceField<AtomicU64> for Acc {
        type Value = u64;

        fn name(&self) -> &str {
            "acc"
        }

        fn extract(&self, _: LocalId, node: &AtomicU64) -> u64 {
            node.load(Ordering::Relaxed)
        }

        fn reduce(&self, _: LocalId, node: &AtomicU64, v: u64) -> bool {
            node.fetch_add(v, Ordering::Relaxed);
            true
        }

        fn reset(&self, _: LocalId, node: &AtomicU64) {
            node.store(0, Ordering::Relaxed);
        }
    }

    struct Pick;

    impl ReduceField<AtomicU64> for Pick {
        type Value = Selection<u32, u32>;

        fn name(&self) -> &str {
            "pick"
        }

        fn extract(&self, _: LocalId, _: &AtomicU64) -> Selection<u32, u32> {
            Selection::none()
        }

        fn reduce(&self, _: LocalId, _: &AtomicU64, _: Selection<u32, u32>) -> bool {
            false
        }

        fn reset(&self, _: LocalId, _: &AtomicU64) {}
    }

    /// Host 0 with one master (gid 0) and a real engine; host 1 is driven by
    /// hand and has announced no mirrors.
    fn lone_engine() -> (SyncEngine, GraphPartition<AtomicU64>, Network) {
        let mut hosts = MemoryCluster::new(2).into_iter();
        let (Some(t0), Some(t1)) = (hosts.next(), hosts.next()) else {
            unreachable!()
        };
        let net0 = Arc::new(Network::new(t0, false));
        let net1 = Network::new(t1, false);

        let mut b = PartitionBuilder::new(0, 2);
        b.add_master(0, AtomicU64::new(0));
        let part = b.build().unwrap();

        let mut setup = Vec::new();
        0u32.encode(&mut setup);
        net1.send_keyed(0, tags::SYNC, key(SETUP, 0), &setup);
        let engine = SyncEngine::new(net0, &part, &RuntimeConfig::with_threads(1)).unwrap();
        (engine, part, net1)
    }

    #[test]
    fn applies_a_well_formed_sparse_update() {
        let (mut engine, part, net1) = lone_engine();
        let body = encode(field_id("acc"), 1, CommMode::Sparse, 0, &[(0, 0, 7u64)]);
        net1.send_keyed(0, tags::SYNC, key(REDUCE, 1), &body);
        let dirty = DirtyBitset::new(1);
        let stats = engine.sync_reduce(&part, &Acc, &dirty);
        assert_eq!(stats.entries_received, 1);
        assert_eq!(part.node(0).load(Ordering::Relaxed), 7);
        assert!(dirty.test(0));
    }

    #[test]
    #[should_panic(expected = "no matching proxy")]
    fn update_for_a_node_this_host_lacks_is_fatal() {
        let (mut engine, part, net1) = lone_engine();
        let body = encode(field_id("acc"), 1, CommMode::Sparse, 0, &[(0, 99, 1u64)]);
        net1.send_keyed(0, tags::SYNC, key(REDUCE, 1), &body);
        engine.sync_reduce(&part, &Acc, &DirtyBitset::new(1));
    }

    #[test]
    #[should_panic(expected = "sentinel")]
    fn received_sentinel_is_fatal() {
        let (mut engine, part, net1) = lone_engine();
        let none: Selection<u32, u32> = Selection::none();
        assert_eq!(none.index, SENTINEL);
        let body = encode(field_id("pick"), 1, CommMode::Sparse, 0, &[(0, 0, none)]);
        net1.send_keyed(0, tags::SYNC, key(REDUCE, 1), &body);
        engine.sync_reduce(&part, &Pick, &DirtyBitset::new(1));
    }

    #[test]
    #[should_panic(expected = "expected")]
    fn mismatched_field_is_fatal() {
        let (mut engine, part, net1) = lone_engine();
        let body = encode(field_id("other"), 1, CommMode::Sparse, 0, &[(0, 0, 1u64)]);
        net1.send_keyed(0, tags::SYNC, key(REDUCE, 1), &body);
        engine.sync_reduce(&part, &Acc, &DirtyBitset::new(1));
    }

    #[test]
    fn partition_for_another_host_is_rejected() {
        let mut hosts = MemoryCluster::new(2).into_iter();
        let Some(t0) = hosts.next() else { unreachable!() };
        let mut b = PartitionBuilder::<()>::new(1, 2);
        b.add_master(0, ());
        let part = b.build().unwrap();
        let err = SyncEngine::new(Arc::new(Network::new(t0, false)), &part, &RuntimeConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidPartition(_)));
    }
}
