//! Receive-side frame algorithms: A-MSDU deaggregation and Ethernet helpers.
//!
//! An aggregated unit packs back-to-back subframes, each prefixed by
//! `{dst(6) src(6) len(2, big-endian)}` and an 8-byte LLC/SNAP encapsulation
//! header, padded to 4-byte alignment between subframes but not after the
//! last one. The length field counts the encapsulation header plus payload.
//!
//! Reconstruction reuses the aggregate's allocation: the 12 address bytes are
//! shifted forward over the encapsulation header, leaving a contiguous
//! Ethernet frame (`dst src ethertype payload`) inside the original buffer.
//! This is the spot most exposed to corrupted length fields, so every
//! subframe boundary is validated before a single frame is emitted; a
//! violation discards the whole aggregate.

use crate::hip::HipError;
use crate::trace::trace;

/// Ethernet header length (`dst src ethertype`).
pub const ETH_HEADER_LEN: usize = 14;

/// LLC/SNAP encapsulation header length inside each subframe.
pub const LLC_SNAP_LEN: usize = 8;

/// Valid range of the subframe length field.
pub const SUBFRAME_LEN_MIN: usize = 60;
pub const SUBFRAME_LEN_MAX: usize = 1514;

/// True for broadcast and multicast destination addresses.
#[inline]
#[must_use]
pub fn is_multicast(dst: &[u8]) -> bool {
    dst.first().is_some_and(|b| b & 0x01 != 0)
}

/// Rounds a subframe up to its padded length.
#[inline]
const fn padded(len: usize) -> usize {
    (len + 3) & !3
}

/// Splits an aggregate into Ethernet frames, emitting each through `emit`.
///
/// Returns the number of frames emitted. On any bounds violation the whole
/// aggregate is rejected and nothing is emitted, because a corrupted length
/// field invalidates every following offset.
pub fn deaggregate(
    data: &mut [u8],
    mut emit: impl FnMut(&[u8]),
) -> Result<usize, HipError> {
    // First pass: walk and validate every subframe boundary.
    let mut bounds = Vec::new();
    let mut offset = 0usize;
    loop {
        let remaining = data.len() - offset;
        if remaining == 0 {
            break;
        }
        if remaining < ETH_HEADER_LEN {
            return Err(HipError::MalformedFrame("truncated subframe header"));
        }
        let len = usize::from(u16::from_be_bytes([data[offset + 12], data[offset + 13]]));
        if !(SUBFRAME_LEN_MIN..=SUBFRAME_LEN_MAX).contains(&len) {
            return Err(HipError::MalformedFrame("subframe length out of range"));
        }
        let total = ETH_HEADER_LEN + len;
        if total > remaining {
            return Err(HipError::MalformedFrame("subframe exceeds aggregate"));
        }
        bounds.push((offset, len));
        if total == remaining {
            // Final subframe carries no alignment padding.
            break;
        }
        let advance = padded(total);
        if advance > remaining {
            return Err(HipError::MalformedFrame("truncated subframe padding"));
        }
        offset += advance;
    }

    // Second pass: rebuild in place and emit.
    for &(offset, len) in &bounds {
        data.copy_within(offset..offset + 12, offset + LLC_SNAP_LEN);
        let frame_start = offset + LLC_SNAP_LEN;
        let frame_end = offset + ETH_HEADER_LEN + len;
        emit(&data[frame_start..frame_end]);
    }
    trace!(subframes = bounds.len(), "aggregate split");
    Ok(bounds.len())
}
