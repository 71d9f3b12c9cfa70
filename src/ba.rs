//! Block-ack reorder engine.
//!
//! One [`ReorderWindow`] exists per (peer, traffic class) while a block-ack
//! session is established. Frames may arrive out of transmission order inside
//! a sliding window of sequence numbers; the window buffers the gaps and
//! releases contiguous runs in order.
//!
//! Sequence numbers live in a 12-bit space and wrap at 4096, so ordering uses
//! the modular half-space relation [`sn_less`], never raw integer comparison.
//!
//! # Invariants
//!
//! - `pending` never holds a sequence older than `indicate_seq`; late frames
//!   are released immediately without touching the window.
//! - `indicate_seq` only advances, mod-4096 wrap-aware.
//! - `window_end == indicate_seq + window_size - 1 (mod 4096)` at all times.

use std::time::Duration;

use minstant::Instant;

use crate::signal::SignalBuffer;
use crate::trace::{debug, trace};

/// Sequence numbers are modulo 4096.
pub const SN_MASK: u16 = 0xfff;

/// Slot count of the pending buffer; bounds the usable window size.
pub const REORDER_SLOTS: usize = 64;

/// Returns true when `b` is newer than `a` in the 12-bit sequence space.
///
/// Not a total order: at the half-space boundary (`b == a + 2048`) both
/// directions compare as newer.
#[inline]
#[must_use]
pub const fn sn_less(a: u16, b: u16) -> bool {
    a.wrapping_sub(b) & 0x800 != 0
}

/// Adds an offset in the 12-bit sequence space.
#[inline]
#[must_use]
pub const fn sn_add(sn: u16, offset: u16) -> u16 {
    sn.wrapping_add(offset) & SN_MASK
}

/// What the engine did with an arriving frame. Every frame is either released
/// through the delivery closure or held in `pending`; the caller never frees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderEvent {
    /// Released immediately, window advanced.
    Delivered,
    /// Duplicate or late frame, released immediately without moving the window.
    Duplicate,
    /// Held in the pending buffer waiting for a gap to fill.
    Queued,
    /// Frame was beyond the window; everything pending was flushed and the
    /// window restarted around it.
    WindowSlip,
}

struct Pending {
    sn: u16,
    buf: SignalBuffer,
}

/// Sliding reorder window for one block-ack session.
pub struct ReorderWindow {
    /// Next sequence expected by the upper layer.
    indicate_seq: u16,
    /// Last sequence the current window can hold.
    window_end: u16,
    window_size: u16,
    slots: [Option<Pending>; REORDER_SLOTS],
    occupied: usize,
    /// Last time any frame left the window, for the stall timer.
    last_delivery: Instant,
}

impl ReorderWindow {
    /// Opens a window at the session starting sequence number.
    ///
    /// `window_size` comes from the ADDBA buffer-size field and is capped to
    /// the slot count; zero means the protocol maximum.
    #[must_use]
    pub fn new(ssn: u16, window_size: u16) -> Self {
        let size = match window_size {
            0 => REORDER_SLOTS as u16,
            n => n.min(REORDER_SLOTS as u16),
        };
        let indicate_seq = ssn & SN_MASK;
        Self {
            indicate_seq,
            window_end: sn_add(indicate_seq, size - 1),
            window_size: size,
            slots: std::array::from_fn(|_| None),
            occupied: 0,
            last_delivery: Instant::now(),
        }
    }

    #[inline]
    #[must_use]
    pub fn indicate_seq(&self) -> u16 {
        self.indicate_seq
    }

    #[inline]
    #[must_use]
    pub fn window_end(&self) -> u16 {
        self.window_end
    }

    #[inline]
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.occupied
    }

    /// Processes an arriving frame, releasing deliverable frames through
    /// `deliver` in sequence order.
    pub fn process(
        &mut self,
        sn: u16,
        buf: SignalBuffer,
        deliver: &mut dyn FnMut(SignalBuffer),
    ) -> ReorderEvent {
        let sn = sn & SN_MASK;

        if sn == self.indicate_seq {
            self.release(buf, deliver);
            self.advance(1);
            self.drain_contiguous(deliver);
            return ReorderEvent::Delivered;
        }

        // Already indicated: release out of order, never re-advance.
        if sn_less(sn, self.indicate_seq) {
            trace!(sn, indicate_seq = self.indicate_seq, "late frame released");
            self.release(buf, deliver);
            return ReorderEvent::Duplicate;
        }

        // Beyond the window: the transmitter moved on without us. Flush what
        // we have as a best-effort in-order burst and restart around the new
        // frame. Original relative order of the flushed frames cannot be
        // recovered here.
        if sn_less(self.window_end, sn) {
            debug!(
                sn,
                indicate_seq = self.indicate_seq,
                window_end = self.window_end,
                pending = self.occupied,
                "window slip, flushing"
            );
            self.flush(deliver);
            self.release(buf, deliver);
            self.indicate_seq = sn_add(sn, 1);
            self.window_end = sn_add(self.indicate_seq, self.window_size - 1);
            return ReorderEvent::WindowSlip;
        }

        // Inside (indicate_seq, window_end]: hold until the gap fills.
        let idx = sn as usize % REORDER_SLOTS;
        if let Some(pending) = &self.slots[idx] {
            if pending.sn == sn {
                self.release(buf, deliver);
                return ReorderEvent::Duplicate;
            }
            // Stale occupant from a reset; release it rather than leak it.
            let evicted = self.slots[idx].take().map(|p| p.buf);
            self.occupied -= 1;
            if let Some(old) = evicted {
                self.release(old, deliver);
            }
        }
        self.slots[idx] = Some(Pending { sn, buf });
        self.occupied += 1;
        self.drain_contiguous(deliver);
        ReorderEvent::Queued
    }

    /// Releases every pending frame in sequence order and advances
    /// `indicate_seq` past the last one flushed.
    pub fn flush(&mut self, deliver: &mut dyn FnMut(SignalBuffer)) {
        if self.occupied == 0 {
            return;
        }
        let mut held: Vec<Pending> = Vec::with_capacity(self.occupied);
        for slot in &mut self.slots {
            if let Some(pending) = slot.take() {
                held.push(pending);
            }
        }
        self.occupied = 0;
        let base = self.indicate_seq;
        held.sort_by_key(|p| p.sn.wrapping_sub(base) & SN_MASK);
        let last = held.last().map(|p| p.sn);
        for pending in held {
            self.release(pending.buf, deliver);
        }
        if let Some(last) = last {
            self.indicate_seq = sn_add(last, 1);
            self.window_end = sn_add(self.indicate_seq, self.window_size - 1);
        }
    }

    /// True when pending frames have been stalled past the hold interval.
    #[must_use]
    pub fn is_stalled(&self, hold: Duration, now: Instant) -> bool {
        self.occupied > 0 && now.duration_since(self.last_delivery) >= hold
    }

    fn advance(&mut self, by: u16) {
        self.indicate_seq = sn_add(self.indicate_seq, by);
        self.window_end = sn_add(self.window_end, by);
    }

    fn drain_contiguous(&mut self, deliver: &mut dyn FnMut(SignalBuffer)) {
        while self.occupied > 0 {
            let idx = self.indicate_seq as usize % REORDER_SLOTS;
            let ready = matches!(&self.slots[idx], Some(p) if p.sn == self.indicate_seq);
            if !ready {
                break;
            }
            let pending = self.slots[idx].take().map(|p| p.buf);
            self.occupied -= 1;
            if let Some(buf) = pending {
                self.release(buf, deliver);
            }
            self.advance(1);
        }
    }

    fn release(&mut self, mut buf: SignalBuffer, deliver: &mut dyn FnMut(SignalBuffer)) {
        buf.set_reordered();
        self.last_delivery = Instant::now();
        deliver(buf);
    }
}

impl std::fmt::Debug for ReorderWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReorderWindow")
            .field("indicate_seq", &self.indicate_seq)
            .field("window_end", &self.window_end)
            .field("window_size", &self.window_size)
            .field("pending", &self.occupied)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fapi;

    fn sig(sn: u16) -> SignalBuffer {
        let mut buf = SignalBuffer::new(fapi::MA_UNITDATA_IND);
        buf.pad_to(fapi::ma_unitdata_ind::SEQUENCE_NUMBER);
        buf.put_u16(sn);
        buf.pad_to(fapi::ma_unitdata_ind::DR);
        buf
    }

    fn sn_of(buf: &SignalBuffer) -> u16 {
        buf.u16_at(fapi::ma_unitdata_ind::SEQUENCE_NUMBER).unwrap()
    }

    #[test]
    fn newer_relation_is_wrap_aware() {
        for a in [0u16, 1, 100, 2047, 2048, 4000, 4095] {
            assert!(sn_less(a, sn_add(a, 1)), "a={a}");
            assert!(!sn_less(a, sn_add(a, 0xfff)), "a={a}"); // a-1 mod 4096
            assert!(!sn_less(a, a), "a={a}");
        }
        // Half-space boundary: not a total order.
        let a = 7u16;
        let b = sn_add(a, 2048);
        assert!(sn_less(a, b));
        assert!(sn_less(b, a));
    }

    #[test]
    fn in_order_frames_pass_straight_through() {
        let mut win = ReorderWindow::new(5, 16);
        let mut out = Vec::new();
        for sn in 5..10 {
            let ev = win.process(sn, sig(sn), &mut |b| out.push(sn_of(&b)));
            assert_eq!(ev, ReorderEvent::Delivered);
        }
        assert_eq!(out, vec![5, 6, 7, 8, 9]);
        assert_eq!(win.indicate_seq(), 10);
        assert_eq!(win.pending_len(), 0);
    }

    #[test]
    fn gap_fill_drains_in_a_single_run() {
        let mut win = ReorderWindow::new(1, 16);
        let mut out = Vec::new();
        for sn in [2u16, 3, 4] {
            let ev = win.process(sn, sig(sn), &mut |b| out.push(sn_of(&b)));
            assert_eq!(ev, ReorderEvent::Queued);
        }
        assert!(out.is_empty());
        assert_eq!(win.pending_len(), 3);

        let ev = win.process(1, sig(1), &mut |b| out.push(sn_of(&b)));
        assert_eq!(ev, ReorderEvent::Delivered);
        assert_eq!(out, vec![1, 2, 3, 4]);
        assert_eq!(win.indicate_seq(), 5);
        assert_eq!(win.pending_len(), 0);
    }

    #[test]
    fn duplicate_released_without_moving_window() {
        let mut win = ReorderWindow::new(1, 16);
        let mut out = Vec::new();

        assert_eq!(
            win.process(3, sig(3), &mut |b| out.push(sn_of(&b))),
            ReorderEvent::Queued
        );
        let before = win.indicate_seq();

        // Same sequence again: exactly one pending entry, the duplicate is
        // released immediately, indicate_seq untouched.
        assert_eq!(
            win.process(3, sig(3), &mut |b| out.push(sn_of(&b))),
            ReorderEvent::Duplicate
        );
        assert_eq!(win.pending_len(), 1);
        assert_eq!(win.indicate_seq(), before);
        assert_eq!(out, vec![3]);
    }

    #[test]
    fn late_frame_released_immediately() {
        let mut win = ReorderWindow::new(100, 16);
        let mut out = Vec::new();
        assert_eq!(
            win.process(90, sig(90), &mut |b| out.push(sn_of(&b))),
            ReorderEvent::Duplicate
        );
        assert_eq!(out, vec![90]);
        assert_eq!(win.indicate_seq(), 100);
    }

    #[test]
    fn window_slip_flushes_and_recenters() {
        let mut win = ReorderWindow::new(10, 4);
        let mut out = Vec::new();

        assert_eq!(
            win.process(12, sig(12), &mut |b| out.push(sn_of(&b))),
            ReorderEvent::Queued
        );

        // Far outside the window.
        let ev = win.process(200, sig(200), &mut |b| out.push(sn_of(&b)));
        assert_eq!(ev, ReorderEvent::WindowSlip);
        assert_eq!(out, vec![12, 200]);
        assert_eq!(win.indicate_seq(), 201);
        assert_eq!(win.window_end(), sn_add(201, 3));
        assert_eq!(win.pending_len(), 0);
    }

    #[test]
    fn wraparound_delivery_order() {
        let mut win = ReorderWindow::new(4094, 8);
        let mut out = Vec::new();
        for sn in [4095u16, 0, 1] {
            win.process(sn, sig(sn), &mut |b| out.push(sn_of(&b)));
        }
        assert!(out.is_empty());
        win.process(4094, sig(4094), &mut |b| out.push(sn_of(&b)));
        assert_eq!(out, vec![4094, 4095, 0, 1]);
        assert_eq!(win.indicate_seq(), 2);
    }

    #[test]
    fn flush_releases_in_sequence_order_and_advances() {
        let mut win = ReorderWindow::new(1, 16);
        let mut out = Vec::new();
        for sn in [6u16, 3, 9] {
            win.process(sn, sig(sn), &mut |b| out.push(sn_of(&b)));
        }
        win.flush(&mut |b| out.push(sn_of(&b)));
        assert_eq!(out, vec![3, 6, 9]);
        assert_eq!(win.indicate_seq(), 10);
        assert_eq!(win.pending_len(), 0);
    }

    #[test]
    fn stall_detection_honors_hold_interval() {
        let mut win = ReorderWindow::new(1, 16);
        let mut out = Vec::new();
        assert!(!win.is_stalled(Duration::from_millis(0), Instant::now()));

        win.process(3, sig(3), &mut |b| out.push(sn_of(&b)));
        assert!(win.is_stalled(Duration::from_millis(0), Instant::now()));
        assert!(!win.is_stalled(Duration::from_secs(3600), Instant::now()));
    }

    #[test]
    fn released_frames_are_marked_reordered() {
        let mut win = ReorderWindow::new(1, 16);
        let mut out = Vec::new();
        win.process(1, sig(1), &mut |b| out.push(b));
        assert!(out[0].is_reordered());
    }
}
