//! Byte-order rewriting of sample streams.
//!
//! [`ByteSwapper`] reverses bytes inside fixed-size chunks and carries bytes
//! that do not fill a whole chunk over to the next call, one carry-over
//! buffer per `(element type, swap width)` pair. [`SwapVariants`] is the
//! per-cycle cache that guarantees each distinct swap is computed once no
//! matter how many destinations ask for it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::samples::ElementType;

/// Requested byte-order rewrite for one destination port.
///
/// Configuration encodes it as an integer: `0` is [`SwapWidth::Passthrough`],
/// `1` is [`SwapWidth::Native`] and any larger value `N` is
/// [`SwapWidth::Bytes`]`(N)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(from = "u16", into = "u16")]
pub enum SwapWidth {
    /// Send the stream as-is.
    #[default]
    Passthrough,
    /// Swap in chunks of the current element's natural size.
    Native,
    /// Swap in chunks of exactly this many bytes (always > 1).
    Bytes(u16),
}

impl From<u16> for SwapWidth {
    fn from(v: u16) -> Self {
        match v {
            0 => SwapWidth::Passthrough,
            1 => SwapWidth::Native,
            n => SwapWidth::Bytes(n),
        }
    }
}

impl From<SwapWidth> for u16 {
    fn from(w: SwapWidth) -> Self {
        match w {
            SwapWidth::Passthrough => 0,
            SwapWidth::Native => 1,
            SwapWidth::Bytes(n) => n,
        }
    }
}

impl SwapWidth {
    pub fn is_swap(self) -> bool {
        self != SwapWidth::Passthrough
    }

    /// Chunk size in bytes for `element`; `0` for passthrough.
    pub fn resolve(self, element: ElementType) -> usize {
        match self {
            SwapWidth::Passthrough => 0,
            SwapWidth::Native => element.size(),
            SwapWidth::Bytes(n) => n as usize,
        }
    }
}

/// Identity of one carry-over buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapKey {
    pub element: ElementType,
    pub width: SwapWidth,
}

/// Reverse byte order within each consecutive `width`-byte chunk.
/// A trailing partial chunk is left untouched.
pub fn swap_chunks(bytes: &mut [u8], width: usize) {
    if width <= 1 {
        return;
    }
    for chunk in bytes.chunks_exact_mut(width) {
        chunk.reverse();
    }
}

/// Stateful byte swapper. Carry-over bytes persist across calls.
#[derive(Debug, Default)]
pub struct ByteSwapper {
    remainders: HashMap<SwapKey, Vec<u8>>,
    transforms: u64,
}

impl ByteSwapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap `raw` (the byte image of elements of type `element`) at `width`.
    ///
    /// Only the longest prefix of carried-over bytes followed by `raw` that
    /// is a whole number of chunks is emitted; the rest is kept for the next
    /// call with the same key. Widths that resolve to one byte or less yield
    /// an unmodified copy.
    pub fn transform(&mut self, element: ElementType, raw: &[u8], width: SwapWidth) -> Vec<u8> {
        self.transforms += 1;

        let chunk = width.resolve(element);
        if chunk <= 1 {
            return raw.to_vec();
        }
        if chunk != element.size() {
            tracing::warn!(
                "Data size of {} is not equal to byte swap size of {chunk}",
                element.size()
            );
        }

        let key = SwapKey { element, width };
        let carried = self.remainders.entry(key).or_default();
        let total = carried.len() + raw.len();
        let keep = total % chunk;

        let mut out = if carried.is_empty() && keep == 0 {
            raw.to_vec()
        } else {
            if keep != 0 {
                tracing::warn!(
                    "Byte swapping and packet sizes are not compatible. Swapping bytes over adjacent packets"
                );
            }
            let mut combined = std::mem::take(carried);
            combined.extend_from_slice(raw);
            *carried = combined.split_off(total - keep);
            combined
        };

        swap_chunks(&mut out, chunk);
        out
    }

    /// Bytes currently held back for `key`.
    pub fn remainder_len(&self, key: SwapKey) -> usize {
        self.remainders.get(&key).map_or(0, Vec::len)
    }

    /// Number of `transform` calls since creation.
    pub fn transforms_performed(&self) -> u64 {
        self.transforms
    }
}

/// The byte payloads available to destinations during one cycle.
///
/// Holds the unswapped byte image plus at most one swapped payload per
/// distinct swap width. Dropped at the end of the cycle; carry-over state
/// lives in the [`ByteSwapper`].
#[derive(Debug)]
pub struct SwapVariants<'a> {
    element: ElementType,
    raw: &'a [u8],
    swapped: HashMap<SwapWidth, Vec<u8>>,
}

impl<'a> SwapVariants<'a> {
    pub fn new(element: ElementType, raw: &'a [u8]) -> Self {
        Self {
            element,
            raw,
            swapped: HashMap::new(),
        }
    }

    /// Produce the payload for `width` unless it already exists this cycle.
    pub fn ensure(&mut self, width: SwapWidth, swapper: &mut ByteSwapper) {
        if !width.is_swap() || self.swapped.contains_key(&width) {
            return;
        }
        let bytes = swapper.transform(self.element, self.raw, width);
        self.swapped.insert(width, bytes);
    }

    /// Payload for `width`, if it was prepared.
    pub fn bytes_for(&self, width: SwapWidth) -> Option<&[u8]> {
        match width {
            SwapWidth::Passthrough => Some(self.raw),
            w => self.swapped.get(&w).map(Vec::as_slice),
        }
    }

    /// Number of swapped payloads prepared this cycle.
    pub fn prepared(&self) -> usize {
        self.swapped.len()
    }
}
