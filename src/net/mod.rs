//! Host-to-host messaging.
//!
//! The transport underneath is an external collaborator: it moves opaque byte
//! buffers reliably between a fixed set of hosts. On top of it, [`Network`]
//! implements active messages. A sender names a small integer
//! [`MessageTag`]; the receiver dispatches the payload to the handler
//! registered for that tag whenever somebody calls [`Network::drain`].
//! Nothing drains in the background. Barriers and sync rounds drain while they
//! spin.
//!
//! Hosts never wait for each other to set up. The accumulator and sync
//! mailboxes exist from [`Network::new`] on, and a message for any other
//! runtime tag below [`tags::USER_BASE`] is held until its handler is
//! registered. Only application tags without a handler are rejected.

pub mod accumulator;
pub mod mailbox;
pub mod memory;
pub mod wire;

pub use accumulator::Accumulator;
pub use mailbox::Mailbox;
pub use memory::{MemoryCluster, MemoryTransport};
pub use wire::{Selection, WireValue, SENTINEL};

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::concurrency::SpinLock;
use crate::error::{Error, Result};

/// Host index in `0..num_hosts`.
pub type HostId = u32;

/// Active-message tag.
pub type MessageTag = u16;

/// Tags used by the runtime itself. Applications should register above
/// [`tags::USER_BASE`].
pub mod tags {
    use super::MessageTag;

    /// A host's arrival at the distributed barrier.
    pub const BARRIER_ARRIVE: MessageTag = 1;
    /// Host 0 releasing a barrier generation.
    pub const BARRIER_RELEASE: MessageTag = 2;
    /// Accumulator contributions.
    pub const ACCUMULATE: MessageTag = 3;
    /// Field synchronization traffic and the mirror-list handshake.
    pub const SYNC: MessageTag = 4;
    /// First tag free for application handlers.
    pub const USER_BASE: MessageTag = 64;
}

/// A received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Sending host.
    pub src: HostId,
    /// Active-message tag.
    pub tag: MessageTag,
    /// Opaque payload.
    pub payload: Vec<u8>,
}

/// Reliable point-to-point delivery between a fixed set of hosts.
pub trait Transport: Send + Sync {
    /// This host's id.
    fn host_id(&self) -> HostId;

    /// Number of hosts in the run.
    fn num_hosts(&self) -> usize;

    /// Queues `payload` for delivery to `dest`.
    fn send(&self, dest: HostId, tag: MessageTag, payload: Vec<u8>);

    /// Returns the next delivered message, if any.
    fn try_recv(&self) -> Option<Envelope>;
}

type Parked = HashMap<MessageTag, Vec<(HostId, Vec<u8>)>>;

type Handler = Arc<dyn Fn(HostId, &[u8]) + Send + Sync>;

/// Counters for traffic seen by one [`Network`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct NetStats {
    /// Messages handed to the transport.
    pub sent: u64,
    /// Payload bytes handed to the transport.
    pub bytes_sent: u64,
    /// Messages dispatched to handlers.
    pub received: u64,
}

/// Active-message layer over a [`Transport`].
pub struct Network {
    transport: Box<dyn Transport>,
    handlers: SpinLock<HashMap<MessageTag, Handler>>,
    mailboxes: SpinLock<HashMap<MessageTag, Arc<Mailbox>>>,
    parked: SpinLock<Parked>,
    trace: bool,
    sent: AtomicU64,
    bytes_sent: AtomicU64,
    received: AtomicU64,
}

impl Network {
    /// Wraps `transport`. With `trace` set, every send, broadcast and
    /// dispatch is logged.
    ///
    /// The accumulator and sync mailboxes are bound here, before any peer
    /// can address them.
    pub fn new(transport: impl Transport + 'static, trace: bool) -> Self {
        let net = Self {
            transport: Box::new(transport),
            handlers: SpinLock::new(HashMap::new()),
            mailboxes: SpinLock::new(HashMap::new()),
            parked: SpinLock::new(HashMap::new()),
            trace,
            sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
        };
        net.mailbox(tags::ACCUMULATE);
        net.mailbox(tags::SYNC);
        net
    }

    /// This host's id.
    pub fn host_id(&self) -> HostId {
        self.transport.host_id()
    }

    /// Number of hosts.
    pub fn num_hosts(&self) -> usize {
        self.transport.num_hosts()
    }

    /// Every host id except this one.
    pub fn peers(&self) -> impl Iterator<Item = HostId> + '_ {
        let me = self.host_id();
        (0..self.num_hosts() as HostId).filter(move |&h| h != me)
    }

    /// Registers `handler` for `tag`.
    ///
    /// Messages for a runtime tag that arrived before its handler are
    /// delivered, in arrival order, before this returns.
    pub fn register<F>(&self, tag: MessageTag, handler: F) -> Result<()>
    where
        F: Fn(HostId, &[u8]) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        let early = {
            let mut handlers = self.handlers.lock();
            if handlers.contains_key(&tag) {
                return Err(Error::DuplicateHandler(tag));
            }
            handlers.insert(tag, Arc::clone(&handler));
            // dispatch parks while holding `handlers`
            self.parked.lock().remove(&tag).unwrap_or_default()
        };
        if !early.is_empty() {
            log_debug!("host {} releasing {} early messages on tag {}", self.host_id(), early.len(), tag);
        }
        for (src, payload) in early {
            handler(src, &payload);
        }
        Ok(())
    }

    /// Keyed mailbox bound to `tag`, created and registered on first use.
    pub fn mailbox(&self, tag: MessageTag) -> Arc<Mailbox> {
        let mut boxes = self.mailboxes.lock();
        if let Some(mb) = boxes.get(&tag) {
            return Arc::clone(mb);
        }
        let mb = Arc::new(Mailbox::new(tag));
        let sink = Arc::clone(&mb);
        if let Err(e) = self.register(tag, move |src, payload| sink.deliver(src, payload)) {
            fatal!("cannot bind mailbox: {}", e);
        }
        boxes.insert(tag, Arc::clone(&mb));
        mb
    }

    /// Sends `payload` to `dest` under `tag`.
    pub fn send(&self, dest: HostId, tag: MessageTag, payload: Vec<u8>) {
        if dest as usize >= self.num_hosts() {
            fatal!("send to host {} but only {} hosts exist", dest, self.num_hosts());
        }
        if self.trace {
            log_debug!("SEND {} -> {} tag {} ({} bytes)", self.host_id(), dest, tag, payload.len());
        }
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(payload.len() as u64, Ordering::Relaxed);
        self.transport.send(dest, tag, payload);
    }

    /// Sends `body` to `dest`, prefixed with a mailbox `key`.
    pub fn send_keyed(&self, dest: HostId, tag: MessageTag, key: u64, body: &[u8]) {
        let mut payload = Vec::with_capacity(8 + body.len());
        payload.extend_from_slice(&key.to_le_bytes());
        payload.extend_from_slice(body);
        self.send(dest, tag, payload);
    }

    /// Sends `payload` to every host except this one.
    pub fn broadcast(&self, tag: MessageTag, payload: &[u8]) {
        if self.trace {
            log_debug!("BCAST {} tag {} ({} bytes)", self.host_id(), tag, payload.len());
        }
        for peer in self.peers() {
            self.send(peer, tag, payload.to_vec());
        }
    }

    /// Dispatches one envelope to its handler.
    ///
    /// A runtime tag with no handler yet is parked until
    /// [`register`](Self::register) binds one; an application tag with no
    /// handler is an error.
    pub fn dispatch(&self, envelope: &Envelope) -> Result<()> {
        let handler = {
            let handlers = self.handlers.lock();
            match handlers.get(&envelope.tag) {
                Some(h) => Arc::clone(h),
                None if envelope.tag < tags::USER_BASE => {
                    self.parked
                        .lock()
                        .entry(envelope.tag)
                        .or_default()
                        .push((envelope.src, envelope.payload.clone()));
                    self.received.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                None => {
                    return Err(Error::UnhandledTag {
                        src: envelope.src,
                        tag: envelope.tag,
                    })
                }
            }
        };
        if self.trace {
            log_debug!(
                "RECV {} <- {} tag {} ({} bytes)",
                self.host_id(),
                envelope.src,
                envelope.tag,
                envelope.payload.len()
            );
        }
        self.received.fetch_add(1, Ordering::Relaxed);
        handler(envelope.src, &envelope.payload);
        Ok(())
    }

    /// Dispatches every message the transport has delivered so far.
    ///
    /// Returns the number of messages handled. A message for an
    /// unregistered application tag is a protocol violation and aborts.
    pub fn drain(&self) -> usize {
        let mut handled = 0;
        while let Some(envelope) = self.transport.try_recv() {
            if let Err(e) = self.dispatch(&envelope) {
                fatal!("protocol violation on host {}: {}", self.host_id(), e);
            }
            handled += 1;
        }
        handled
    }

    /// Traffic counters.
    pub fn stats(&self) -> NetStats {
        NetStats {
            sent: self.sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("host", &self.host_id())
            .field("hosts", &self.num_hosts())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn handlers_receive_payloads() {
        let mut hosts = MemoryCluster::new(2).into_iter();
        let a = Network::new(hosts.next().unwrap(), false);
        let b = Network::new(hosts.next().unwrap(), false);

        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        b.register(tags::USER_BASE, move |src, payload| {
            assert_eq!(src, 0);
            s.fetch_add(payload.len(), Ordering::Relaxed);
        })
        .unwrap();

        a.send(1, tags::USER_BASE, vec![1, 2, 3]);
        a.broadcast(tags::USER_BASE, &[9]);
        while seen.load(Ordering::Relaxed) < 4 {
            b.drain();
        }
        assert_eq!(b.stats().received, 2);
        assert_eq!(a.stats().sent, 2);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let net = Network::new(MemoryCluster::new(1).pop().unwrap(), false);
        net.register(tags::USER_BASE, |_, _| {}).unwrap();
        assert!(matches!(
            net.register(tags::USER_BASE, |_, _| {}),
            Err(Error::DuplicateHandler(_))
        ));
    }

    #[test]
    fn unknown_tag_is_reported() {
        let net = Network::new(MemoryCluster::new(1).pop().unwrap(), false);
        let env = Envelope {
            src: 0,
            tag: 999,
            payload: vec![],
        };
        assert!(matches!(net.dispatch(&env), Err(Error::UnhandledTag { tag: 999, .. })));
    }

    #[test]
    fn runtime_tags_wait_for_their_handler() {
        let mut hosts = MemoryCluster::new(2).into_iter();
        let a = Network::new(hosts.next().unwrap(), false);
        let b = Network::new(hosts.next().unwrap(), false);

        a.send(1, tags::BARRIER_RELEASE, vec![7]);
        a.send(1, tags::BARRIER_RELEASE, vec![8, 9]);
        a.send_keyed(1, tags::ACCUMULATE, 5, &[1]);
        while b.stats().received < 3 {
            b.drain();
        }
        assert_eq!(b.mailbox(tags::ACCUMULATE).pending(5), 1);

        let seen = Arc::new(SpinLock::new(Vec::new()));
        let s = Arc::clone(&seen);
        b.register(tags::BARRIER_RELEASE, move |src, payload| {
            s.lock().push((src, payload.to_vec()));
        })
        .unwrap();
        assert_eq!(*seen.lock(), vec![(0, vec![7]), (0, vec![8, 9])]);

        a.send(1, tags::BARRIER_RELEASE, vec![10]);
        while seen.lock().len() < 3 {
            b.drain();
        }
    }

    #[test]
    fn runtime_mailboxes_exist_from_the_start() {
        let net = Network::new(MemoryCluster::new(1).pop().unwrap(), false);
        assert!(matches!(
            net.register(tags::SYNC, |_, _| {}),
            Err(Error::DuplicateHandler(tags::SYNC))
        ));
        assert!(matches!(
            net.register(tags::ACCUMULATE, |_, _| {}),
            Err(Error::DuplicateHandler(tags::ACCUMULATE))
        ));
    }

    #[test]
    #[should_panic(expected = "protocol violation")]
    fn draining_an_unknown_tag_is_fatal() {
        let net = Network::new(MemoryCluster::new(1).pop().unwrap(), false);
        net.send(0, 777, vec![]);
        net.drain();
    }
}
