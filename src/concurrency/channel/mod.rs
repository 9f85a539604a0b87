//! Channels used by the in-memory transport.

pub mod mpsc;

pub use mpsc::{channel, Receiver, SendError, Sender};
