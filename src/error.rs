//! Crate error type.
//!
//! Only boundary failures are recoverable: configuration that cannot be used,
//! payloads that cannot be decoded, tags nobody registered. Broken invariants
//! inside the runtime abort through `fatal!` instead.

use std::fmt;
use std::io;

use crate::net::{HostId, MessageTag};

/// Errors surfaced at the edges of the runtime.
#[derive(Debug)]
pub enum Error {
    /// A configuration value is out of range.
    InvalidConfig(String),
    /// Partition inputs are inconsistent.
    InvalidPartition(String),
    /// A JSON configuration document could not be parsed.
    ConfigFormat(serde_json::Error),
    /// Reading a configuration source failed.
    Io(io::Error),
    /// A wire payload ended before the expected number of bytes.
    Truncated {
        /// Bytes the decoder needed.
        needed: usize,
        /// Bytes that were left.
        remaining: usize,
    },
    /// A wire payload carried bytes after the last decoded entry.
    TrailingBytes(usize),
    /// A header named an encoding this build does not know.
    UnknownCommMode(u32),
    /// A message arrived for a tag with no registered handler.
    UnhandledTag {
        /// Sending host.
        src: HostId,
        /// The unregistered tag.
        tag: MessageTag,
    },
    /// A handler was registered twice for the same tag.
    DuplicateHandler(MessageTag),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Error::InvalidPartition(msg) => write!(f, "invalid partition: {msg}"),
            Error::ConfigFormat(e) => write!(f, "malformed configuration: {e}"),
            Error::Io(e) => write!(f, "i/o error: {e}"),
            Error::Truncated { needed, remaining } => {
                write!(f, "payload truncated: needed {needed} bytes, {remaining} left")
            }
            Error::TrailingBytes(n) => write!(f, "payload has {n} trailing bytes"),
            Error::UnknownCommMode(m) => write!(f, "unknown communication mode {m}"),
            Error::UnhandledTag { src, tag } => {
                write!(f, "no handler for tag {tag} (message from host {src})")
            }
            Error::DuplicateHandler(tag) => write!(f, "handler for tag {tag} already registered"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ConfigFormat(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::ConfigFormat(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
