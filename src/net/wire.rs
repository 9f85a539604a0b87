//! Value encoding for messages.
//!
//! Everything is little-endian. Fixed-size message headers are plain
//! `zerocopy` structs; per-entry values go through [`WireValue`].

use zerocopy::byteorder::{LE, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::error::{Error, Result};

/// A value that can cross the wire.
pub trait WireValue: Sized + Send {
    /// Appends the encoding of `self` to `out`.
    fn encode(&self, out: &mut Vec<u8>);

    /// Decodes one value from the front of `input`, advancing it.
    fn decode(input: &mut &[u8]) -> Result<Self>;

    /// `true` for values that carry no information and should not be sent.
    fn is_noop(&self) -> bool {
        false
    }
}

pub(crate) fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if input.len() < n {
        return Err(Error::Truncated {
            needed: n,
            remaining: input.len(),
        });
    }
    let (head, rest) = input.split_at(n);
    *input = rest;
    Ok(head)
}

macro_rules! impl_wire_primitive {
    ($($t:ty),*) => {$(
        impl WireValue for $t {
            #[inline]
            fn encode(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn decode(input: &mut &[u8]) -> Result<Self> {
                const N: usize = std::mem::size_of::<$t>();
                let mut buf = [0u8; N];
                buf.copy_from_slice(take(input, N)?);
                Ok(<$t>::from_le_bytes(buf))
            }
        }
    )*};
}

impl_wire_primitive!(u8, u16, u32, u64, i32, i64, f32, f64);

impl WireValue for bool {
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }

    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(take(input, 1)?[0] != 0)
    }
}

impl<A: WireValue, B: WireValue> WireValue for (A, B) {
    fn encode(&self, out: &mut Vec<u8>) {
        self.0.encode(out);
        self.1.encode(out);
    }

    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok((A::decode(input)?, B::decode(input)?))
    }
}

impl<A: WireValue, B: WireValue, C: WireValue> WireValue for (A, B, C) {
    fn encode(&self, out: &mut Vec<u8>) {
        self.0.encode(out);
        self.1.encode(out);
        self.2.encode(out);
    }

    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok((A::decode(input)?, B::decode(input)?, C::decode(input)?))
    }
}

/// Marks a [`Selection`] that opts out of communication.
pub const SENTINEL: u32 = u32::MAX;

/// A candidate choice for one node: which option, its value, and an
/// auxiliary payload.
///
/// A selection whose `index` is [`SENTINEL`] means "nothing to say" and is
/// never transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection<V, A> {
    /// Chosen option, or [`SENTINEL`].
    pub index: u32,
    /// Value attached to the choice.
    pub value: V,
    /// Auxiliary payload.
    pub aux: A,
}

impl<V: Default, A: Default> Selection<V, A> {
    /// The opt-out selection.
    pub fn none() -> Self {
        Self {
            index: SENTINEL,
            value: V::default(),
            aux: A::default(),
        }
    }
}

impl<V, A> Selection<V, A> {
    /// `true` unless this is the opt-out selection.
    pub fn is_some(&self) -> bool {
        self.index != SENTINEL
    }
}

impl<V: WireValue, A: WireValue> WireValue for Selection<V, A> {
    fn encode(&self, out: &mut Vec<u8>) {
        self.index.encode(out);
        self.value.encode(out);
        self.aux.encode(out);
    }

    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            index: u32::decode(input)?,
            value: V::decode(input)?,
            aux: A::decode(input)?,
        })
    }

    fn is_noop(&self) -> bool {
        self.index == SENTINEL
    }
}

/// Fixed header in front of every sync message body.
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct SyncHeader {
    /// Hash of the field name, checked by the receiver.
    pub field: U32<LE>,
    /// Sync round the message belongs to.
    pub round: U32<LE>,
    /// Body encoding, see `sync::CommMode`.
    pub mode: U32<LE>,
    /// Number of entries in the body.
    pub count: U32<LE>,
}

impl SyncHeader {
    /// Encoded size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Builds a header.
    pub fn new(field: u32, round: u32, mode: u32, count: u32) -> Self {
        Self {
            field: U32::new(field),
            round: U32::new(round),
            mode: U32::new(mode),
            count: U32::new(count),
        }
    }

    /// Splits a header off the front of `input`.
    pub fn read(input: &mut &[u8]) -> Result<Self> {
        let bytes = take(input, Self::SIZE)?;
        Self::read_from(bytes).ok_or(Error::Truncated {
            needed: Self::SIZE,
            remaining: bytes.len(),
        })
    }

    /// Appends the header to `out`.
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }
}
