//! Barrier across all threads of all hosts.
//!
//! Threads first meet at the host's local barrier. Thread 0 then runs the host
//! protocol: non-zero hosts send `ARRIVE(g)` to host 0 and drain the network
//! until `RELEASE(g)` comes back; host 0 drains until every other host has
//! arrived for `g` and broadcasts the release. Meanwhile the other local
//! threads spin on the host's released generation. Thread 0 is the only one
//! that drains, so handlers run on it while it waits.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::Backoff;

use super::LocalBarrier;
use crate::concurrency::CachePadded;
use crate::net::wire::WireValue;
use crate::net::{tags, HostId, Network};

#[derive(Debug, Default)]
struct HostState {
    arrivals: [AtomicUsize; 2],
    released: AtomicU64,
}

/// Local barrier extended across hosts.
#[derive(Debug)]
pub struct DistBarrier {
    local: LocalBarrier,
    network: Arc<Network>,
    state: Arc<HostState>,
    generation: CachePadded<AtomicU64>,
    expected: Box<[CachePadded<AtomicU64>]>,
}

fn decode_generation(src: HostId, payload: &[u8]) -> u64 {
    let mut input = payload;
    match u64::decode(&mut input) {
        Ok(g) if input.is_empty() => g,
        _ => fatal!("malformed barrier message from host {}", src),
    }
}

impl DistBarrier {
    /// Wraps `local` and registers the barrier handlers on `network`.
    ///
    /// Only one distributed barrier may exist per network.
    pub fn new(local: LocalBarrier, network: Arc<Network>) -> crate::Result<Self> {
        let state = Arc::new(HostState::default());

        let arrivals = Arc::clone(&state);
        network.register(tags::BARRIER_ARRIVE, move |src, payload| {
            let g = decode_generation(src, payload);
            arrivals.arrivals[(g % 2) as usize].fetch_add(1, Ordering::AcqRel);
        })?;
        let releases = Arc::clone(&state);
        network.register(tags::BARRIER_RELEASE, move |src, payload| {
            let g = decode_generation(src, payload);
            releases.released.fetch_max(g, Ordering::AcqRel);
        })?;

        let capacity = local.capacity();
        Ok(Self {
            local,
            network,
            state,
            generation: CachePadded::new(AtomicU64::new(0)),
            expected: (0..capacity).map(|_| CachePadded::new(AtomicU64::new(1))).collect(),
        })
    }

    /// Participating threads on this host.
    pub fn threads(&self) -> usize {
        self.local.threads()
    }

    /// Rebuilds the local tree for `threads`. Every host must call this with
    /// the barrier idle.
    pub fn reinit(&mut self, threads: usize) {
        self.local.reinit(threads);
        let next = *self.generation.get_mut() + 1;
        for e in self.expected.iter_mut() {
            *e.get_mut() = next;
        }
    }

    /// Blocks until every thread on every host has called `wait` for this
    /// round.
    pub fn wait(&self, tid: usize) {
        if tid >= self.threads() {
            fatal!("thread {} waited on a {}-thread barrier", tid, self.threads());
        }
        let target = self.expected[tid].load(Ordering::Relaxed);
        self.local.wait(tid);

        if tid == 0 {
            self.host_round(target);
            self.generation.store(target, Ordering::Release);
        } else {
            let backoff = Backoff::new();
            while self.generation.load(Ordering::Acquire) < target {
                backoff.snooze();
            }
        }
        self.expected[tid].store(target + 1, Ordering::Relaxed);
    }

    fn host_round(&self, generation: u64) {
        let net = &*self.network;
        let mut payload = Vec::with_capacity(8);
        generation.encode(&mut payload);
        let backoff = Backoff::new();

        if net.host_id() == 0 {
            let others = net.num_hosts() - 1;
            let slot = &self.state.arrivals[(generation % 2) as usize];
            while slot.load(Ordering::Acquire) < others {
                if net.drain() == 0 {
                    backoff.snooze();
                }
            }
            slot.fetch_sub(others, Ordering::AcqRel);
            net.broadcast(tags::BARRIER_RELEASE, &payload);
        } else {
            net.send(0, tags::BARRIER_ARRIVE, payload);
            while self.state.released.load(Ordering::Acquire) < generation {
                if net.drain() == 0 {
                    backoff.snooze();
                }
            }
        }
        log_trace!("host {} passed barrier generation {}", net.host_id(), generation);
    }
}
