//! In-process transport: every "host" is a handle in the same process,
//! connected to the others by unbounded MPSC channels.

use crate::concurrency::channel::{channel, Receiver, Sender};
use crate::concurrency::SpinLock;

use super::{Envelope, HostId, MessageTag, Transport};

/// Factory for a fully connected set of in-process hosts.
#[derive(Debug)]
pub struct MemoryCluster;

impl MemoryCluster {
    /// Creates `hosts` connected transports; element `i` is host `i`.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(hosts: usize) -> Vec<MemoryTransport> {
        assert!(hosts != 0, "a cluster needs at least one host");
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..hosts).map(|_| channel()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(host, inbox)| MemoryTransport {
                host: host as HostId,
                peers: senders.clone(),
                inbox: SpinLock::new(inbox),
            })
            .collect()
    }
}

/// One host's end of a [`MemoryCluster`].
pub struct MemoryTransport {
    host: HostId,
    peers: Vec<Sender<Envelope>>,
    inbox: SpinLock<Receiver<Envelope>>,
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("host", &self.host)
            .field("hosts", &self.peers.len())
            .finish_non_exhaustive()
    }
}

impl Transport for MemoryTransport {
    fn host_id(&self) -> HostId {
        self.host
    }

    fn num_hosts(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, dest: HostId, tag: MessageTag, payload: Vec<u8>) {
        let envelope = Envelope {
            src: self.host,
            tag,
            payload,
        };
        if self.peers[dest as usize].send(envelope).is_err() {
            log_warn!("host {} dropped a message for departed host {}", self.host, dest);
        }
    }

    fn try_recv(&self) -> Option<Envelope> {
        self.inbox.lock().try_recv()
    }
}
