//! The signal buffer: the unit of exchange across the host/firmware boundary.
//!
//! A [`SignalBuffer`] owns one contiguous byte region holding a 10-byte signal
//! header, the signal's fixed fields, and an optional bulk-data payload.
//! Ownership transfers on every hand-off; whichever component terminates a
//! buffer's life drops it.

use bytes::{BufMut, BytesMut};

use crate::fapi;

/// Owned signal buffer with header/payload framing.
pub struct SignalBuffer {
    data: BytesMut,
    /// Set when the buffer has already passed through the reorder engine,
    /// so the data drain must not hand it off a second time.
    reordered: bool,
}

impl SignalBuffer {
    /// Wraps raw bytes received from the transport.
    ///
    /// Returns `None` if the region is too short to hold a signal header.
    #[must_use]
    pub fn from_bytes(data: BytesMut) -> Option<Self> {
        if data.len() < fapi::SIGNAL_HEADER_LEN {
            return None;
        }
        Some(Self {
            data,
            reordered: false,
        })
    }

    /// Starts a new signal with the given id and zeroed header fields.
    ///
    /// Used by the transport shim and by tests to synthesize signals; fixed
    /// fields and bulk data are appended with [`put_u16`](Self::put_u16) and
    /// [`put_slice`](Self::put_slice).
    #[must_use]
    pub fn new(id: u16) -> Self {
        let mut data = BytesMut::with_capacity(64);
        data.put_u16_le(id);
        data.put_u16_le(0); // receiver_pid
        data.put_u16_le(0); // sender_pid
        data.put_u32_le(0); // fw_reference
        Self {
            data,
            reordered: false,
        }
    }

    /// Appends a little-endian field.
    pub fn put_u16(&mut self, value: u16) -> &mut Self {
        self.data.put_u16_le(value);
        self
    }

    /// Zero-pads the signal out to `len` bytes. No-op if already longer.
    pub fn pad_to(&mut self, len: usize) -> &mut Self {
        while self.data.len() < len {
            self.data.put_u8(0);
        }
        self
    }

    /// Appends raw bytes (bulk data, addresses).
    pub fn put_slice(&mut self, bytes: &[u8]) -> &mut Self {
        self.data.put_slice(bytes);
        self
    }

    /// The signal id from the header.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u16 {
        // from_bytes/new guarantee at least a full header.
        u16::from_le_bytes([self.data[0], self.data[1]])
    }

    /// Reads a little-endian u16 field at a byte offset.
    #[must_use]
    pub fn u16_at(&self, offset: usize) -> Option<u16> {
        let bytes = self.data.get(offset..offset + 2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Reads a fixed-size byte field (MAC addresses) at a byte offset.
    #[must_use]
    pub fn bytes_at<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        let bytes = self.data.get(offset..offset + N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Some(out)
    }

    /// The bulk-data region starting at `offset`, empty if the signal ends
    /// before it.
    #[must_use]
    pub fn payload(&self, offset: usize) -> &[u8] {
        self.data.get(offset..).unwrap_or(&[])
    }

    /// Mutable view of the bulk-data region, for in-place rewrites.
    #[must_use]
    pub fn payload_mut(&mut self, offset: usize) -> &mut [u8] {
        let len = self.data.len();
        &mut self.data[offset.min(len)..]
    }

    /// Total signal length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True if the fixed fields of this signal id are all present.
    #[must_use]
    pub fn has_expected_len(&self) -> bool {
        match fapi::expected_signal_len(self.id()) {
            Some(min) => self.data.len() >= min,
            None => true,
        }
    }

    /// Surrenders the underlying bytes, for handing back to the transport.
    #[must_use]
    pub fn into_bytes(self) -> BytesMut {
        self.data
    }

    /// Marks the buffer as having left the reorder engine.
    pub fn set_reordered(&mut self) {
        self.reordered = true;
    }

    #[inline]
    #[must_use]
    pub fn is_reordered(&self) -> bool {
        self.reordered
    }
}

impl std::fmt::Debug for SignalBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalBuffer")
            .field("id", &format_args!("{:#06x}", self.id()))
            .field("len", &self.data.len())
            .field("reordered", &self.reordered)
            .finish()
    }
}
