//! Host-wide sum, used mostly to decide whether any host still has work.

use std::sync::atomic::{AtomicU64, Ordering};

use num_traits::Zero;

use super::wire::WireValue;
use super::{tags, Network};
use crate::concurrency::SpinLock;

/// A value every thread can add to locally and that one thread per host can
/// reduce across all hosts.
///
/// Every host must create its accumulators with the same ids and call
/// [`reduce`](Self::reduce) the same number of times.
#[derive(Debug)]
pub struct Accumulator<T> {
    id: u16,
    local: SpinLock<T>,
    round: AtomicU64,
}

impl<T> Accumulator<T>
where
    T: Zero + Copy + WireValue,
{
    /// A zeroed accumulator. `id` distinguishes accumulators reduced in the
    /// same phase.
    pub fn new(id: u16) -> Self {
        Self {
            id,
            local: SpinLock::new(T::zero()),
            round: AtomicU64::new(0),
        }
    }

    /// Adds `v` to this host's contribution.
    pub fn add(&self, v: T) {
        let mut local = self.local.lock();
        *local = *local + v;
    }

    /// This host's contribution so far.
    pub fn local(&self) -> T {
        *self.local.lock()
    }

    /// Zeroes this host's contribution.
    pub fn reset(&self) {
        *self.local.lock() = T::zero();
    }

    /// Exchanges contributions with every host and returns the global sum.
    ///
    /// The sum is formed in host order so floating-point results agree on
    /// every host. The local contribution is left untouched.
    pub fn reduce(&self, network: &Network) -> T {
        let round = self.round.fetch_add(1, Ordering::Relaxed);
        let key = (u64::from(self.id) << 48) | (round & ((1 << 48) - 1));
        let mine = self.local();

        let mut body = Vec::new();
        mine.encode(&mut body);
        for peer in network.peers() {
            network.send_keyed(peer, tags::ACCUMULATE, key, &body);
        }

        let me = network.host_id();
        let mailbox = network.mailbox(tags::ACCUMULATE);
        let mut total = T::zero();
        let mut mine = Some(mine);
        for (src, payload) in mailbox.collect(network, key, network.num_hosts() - 1) {
            if src > me {
                if let Some(v) = mine.take() {
                    total = total + v;
                }
            }
            let mut input = payload.as_slice();
            match T::decode(&mut input) {
                Ok(v) => total = total + v,
                Err(e) => fatal!("accumulator {} payload from host {}: {}", self.id, src, e),
            }
        }
        if let Some(v) = mine {
            total = total + v;
        }
        log_trace!("accumulator {} round {} reduced", self.id, round);
        total
    }
}
