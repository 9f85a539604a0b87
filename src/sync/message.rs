//! Sync message bodies.
//!
//! Every message is a [`SyncHeader`] followed by `count` entries in one of two
//! layouts:
//!
//! * sparse: `(global id: u64, value)` per entry;
//! * dense: a bitmap over the node list both hosts share for this direction,
//!   then the values of the set positions in ascending order.
//!
//! Dense wins once enough of the shared list is dirty, since it replaces an
//! eight-byte id per entry with one bit per shared node.

use crate::error::{Error, Result};
use crate::graph::GlobalId;
use crate::net::wire::{take, SyncHeader, WireValue};

/// Body layout of a sync message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommMode {
    /// `(gid, value)` pairs.
    Sparse,
    /// Bitmap over the shared list, then values.
    Dense,
}

impl CommMode {
    pub(crate) fn code(self) -> u32 {
        match self {
            CommMode::Sparse => 1,
            CommMode::Dense => 2,
        }
    }

    pub(crate) fn from_code(code: u32) -> Result<Self> {
        match code {
            1 => Ok(CommMode::Sparse),
            2 => Ok(CommMode::Dense),
            other => Err(Error::UnknownCommMode(other)),
        }
    }

    /// Layout for `entries` dirty nodes out of a shared list of `shared`.
    pub fn choose(entries: usize, shared: usize, dense_threshold: f64) -> Self {
        if shared != 0 && entries as f64 > dense_threshold * shared as f64 {
            CommMode::Dense
        } else {
            CommMode::Sparse
        }
    }
}

/// One outbound entry: position in the shared list, global id, value.
pub(crate) type OutEntry<V> = (usize, GlobalId, V);

/// Where a decoded value goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Global(GlobalId),
    Position(usize),
}

pub(crate) fn encode<V: WireValue>(
    field: u32,
    round: u32,
    mode: CommMode,
    shared: usize,
    entries: &[OutEntry<V>],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(SyncHeader::SIZE + entries.len() * 12);
    SyncHeader::new(field, round, mode.code(), entries.len() as u32).write(&mut out);
    match mode {
        CommMode::Sparse => {
            for (_, gid, value) in entries {
                gid.encode(&mut out);
                value.encode(&mut out);
            }
        }
        CommMode::Dense => {
            let mut bitmap = vec![0u8; shared.div_ceil(8)];
            for &(pos, _, _) in entries {
                bitmap[pos / 8] |= 1 << (pos % 8);
            }
            out.extend_from_slice(&bitmap);
            for (_, _, value) in entries {
                value.encode(&mut out);
            }
        }
    }
    out
}

pub(crate) fn decode<V: WireValue>(mut input: &[u8], shared: usize) -> Result<(SyncHeader, Vec<(Slot, V)>)> {
    let header = SyncHeader::read(&mut input)?;
    let count = header.count.get() as usize;
    let mut entries = Vec::with_capacity(count);
    match CommMode::from_code(header.mode.get())? {
        CommMode::Sparse => {
            for _ in 0..count {
                let gid = GlobalId::decode(&mut input)?;
                entries.push((Slot::Global(gid), V::decode(&mut input)?));
            }
        }
        CommMode::Dense => {
            let bitmap = take(&mut input, shared.div_ceil(8))?;
            let positions = (0..shared).filter(|&p| bitmap[p / 8] & (1 << (p % 8)) != 0);
            for pos in positions {
                entries.push((Slot::Position(pos), V::decode(&mut input)?));
            }
            if entries.len() != count {
                return Err(Error::Truncated {
                    needed: count,
                    remaining: entries.len(),
                });
            }
        }
    }
    if !input.is_empty() {
        return Err(Error::TrailingBytes(input.len()));
    }
    Ok((header, entries))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_above_threshold() {
        assert_eq!(CommMode::choose(3, 10, 0.25), CommMode::Dense);
        assert_eq!(CommMode::choose(2, 10, 0.25), CommMode::Sparse);
        assert_eq!(CommMode::choose(0, 0, 0.0), CommMode::Sparse);
    }

    #[test]
    fn sparse_carries_global_ids() {
        let bytes = encode(7, 3, CommMode::Sparse, 0, &[(0, 42, 1.5f64), (1, 9, -1.0)]);
        let (h, entries) = decode::<f64>(&bytes, 0).unwrap();
        assert_eq!((h.field.get(), h.round.get()), (7, 3));
        assert_eq!(entries, vec![(Slot::Global(42), 1.5), (Slot::Global(9), -1.0)]);
    }

    #[test]
    fn dense_carries_positions() {
        let bytes = encode(1, 1, CommMode::Dense, 12, &[(0, 100, 5u32), (9, 200, 6)]);
        assert_eq!(bytes.len(), SyncHeader::SIZE + 2 + 8);
        let (_, entries) = decode::<u32>(&bytes, 12).unwrap();
        assert_eq!(entries, vec![(Slot::Position(0), 5), (Slot::Position(9), 6)]);
    }

    #[test]
    fn corrupt_bodies_are_rejected() {
        let mut bytes = encode(1, 1, CommMode::Sparse, 0, &[(0, 1, 2u32)]);
        bytes.push(0);
        assert!(matches!(decode::<u32>(&bytes, 0), Err(Error::TrailingBytes(1))));
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(decode::<u32>(&bytes, 0), Err(Error::Truncated { .. })));
        let mut bad = Vec::new();
        SyncHeader::new(1, 1, 9, 0).write(&mut bad);
        assert!(matches!(decode::<u32>(&bad, 0), Err(Error::UnknownCommMode(9))));
    }
}
