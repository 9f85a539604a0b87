//! Keyed buffering for collective exchanges.
//!
//! Collectives (sync rounds, accumulator reductions, the mirror-list
//! handshake) expect exactly one message from each peer per round. A fast
//! peer may already be sending round `r + 1` while this host is still
//! collecting round `r`, so messages are parked under a `u64` key carried in
//! the first eight payload bytes until the receiver asks for that key.

use std::collections::HashMap;

use crossbeam_utils::Backoff;

use super::{HostId, MessageTag, Network};
use crate::concurrency::SpinLock;

/// Messages parked by key.
#[derive(Debug)]
pub struct Mailbox {
    tag: MessageTag,
    slots: SpinLock<HashMap<u64, Vec<(HostId, Vec<u8>)>>>,
}

impl Mailbox {
    pub(crate) fn new(tag: MessageTag) -> Self {
        Self {
            tag,
            slots: SpinLock::new(HashMap::new()),
        }
    }

    /// Tag this mailbox is bound to.
    pub fn tag(&self) -> MessageTag {
        self.tag
    }

    pub(crate) fn deliver(&self, src: HostId, payload: &[u8]) {
        if payload.len() < 8 {
            fatal!("keyed message from host {} on tag {} has no key", src, self.tag);
        }
        let (head, body) = payload.split_at(8);
        let mut key = [0u8; 8];
        key.copy_from_slice(head);
        let key = u64::from_le_bytes(key);
        self.slots
            .lock()
            .entry(key)
            .or_default()
            .push((src, body.to_vec()));
    }

    /// Number of messages parked under `key`.
    pub fn pending(&self, key: u64) -> usize {
        self.slots.lock().get(&key).map_or(0, Vec::len)
    }

    /// Removes and returns whatever is parked under `key`.
    pub fn take(&self, key: u64) -> Vec<(HostId, Vec<u8>)> {
        self.slots.lock().remove(&key).unwrap_or_default()
    }

    /// Drains `network` until `count` messages are parked under `key`, then
    /// takes them, sorted by sender.
    pub fn collect(&self, network: &Network, key: u64, count: usize) -> Vec<(HostId, Vec<u8>)> {
        let backoff = Backoff::new();
        loop {
            if network.drain() == 0 {
                if self.pending(key) >= count {
                    break;
                }
                backoff.snooze();
            } else {
                backoff.reset();
            }
        }
        let mut got = self.take(key);
        if got.len() != count {
            fatal!(
                "expected {} messages under key {:#x} on tag {}, got {}",
                count,
                key,
                self.tag,
                got.len()
            );
        }
        got.sort_by_key(|(src, _)| *src);
        got
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::MemoryCluster;

    #[test]
    fn messages_are_parked_by_key() {
        let mb = Mailbox::new(4);
        mb.deliver(1, &[7, 0, 0, 0, 0, 0, 0, 0, 42]);
        mb.deliver(2, &[8, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(mb.pending(7), 1);
        assert_eq!(mb.take(7), vec![(1, vec![42])]);
        assert_eq!(mb.pending(7), 0);
        assert_eq!(mb.take(8), vec![(2, vec![])]);
    }

    #[test]
    #[should_panic(expected = "has no key")]
    fn short_payload_is_fatal() {
        Mailbox::new(4).deliver(0, &[1, 2]);
    }

    #[test]
    fn collect_waits_for_every_peer() {
        let hosts: Vec<_> = MemoryCluster::new(3)
            .into_iter()
            .map(|t| Network::new(t, false))
            .collect();
        let mb = hosts[0].mailbox(99);
        for h in &hosts[1..] {
            h.send_keyed(0, 99, 5, &[h.host_id() as u8]);
            h.send_keyed(0, 99, 6, &[0xff]);
        }
        let got = mb.collect(&hosts[0], 5, 2);
        assert_eq!(got, vec![(1, vec![1]), (2, vec![2])]);
        assert_eq!(mb.pending(6), 2);
    }
}
