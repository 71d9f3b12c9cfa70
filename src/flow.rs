//! Transmit-completion colour tags and per-access-category credit pools.
//!
//! A colour is attached to every transmitted buffer and echoed back unmodified
//! by the transport on completion. It is a routing key only, never a pointer:
//! the raw bits are decoded into a typed [`Colour`] once, at the `tx_done`
//! trust boundary, and the rest of the system works with the struct.
//!
//! Bit layout of the 16-bit wire value:
//!
//! ```text
//! bit  0      unused
//! bits [2:1]  interface (vif) index
//! bits [7:3]  peer index (0 = interface broadcast/multicast queue)
//! bits [9:8]  access category queue
//! ```

use crate::fapi::AccessCategory;

/// Decoded transmit-completion routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Colour {
    pub vif: u16,
    pub peer_index: u16,
    pub ac: AccessCategory,
}

impl Colour {
    /// Decodes the packed wire representation.
    #[must_use]
    pub fn decode(raw: u16) -> Self {
        Self {
            vif: (raw >> 1) & 0x3,
            peer_index: (raw >> 3) & 0x1f,
            ac: AccessCategory::from_index(raw >> 8),
        }
    }

    /// Packs this key back into its wire representation.
    #[must_use]
    pub fn encode(self) -> u16 {
        ((self.vif & 0x3) << 1) | ((self.peer_index & 0x1f) << 3) | ((self.ac.index() as u16) << 8)
    }
}

/// Outcome of returning a credit to a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditReturn {
    /// Queue was flowing; credit added.
    Flowing,
    /// Queue had been paused and this return brought it back over the
    /// resume watermark.
    Resumed,
}

/// Credits are returned until the pool refills to its initial grant.
#[derive(Debug)]
struct AcQueue {
    credits: u16,
    paused: bool,
}

/// Per-peer (or per-interface group) transmit credit state, one pool per
/// access category.
#[derive(Debug)]
pub struct TxCredits {
    queues: [AcQueue; AccessCategory::COUNT],
    grant: u16,
}

/// A paused queue resumes once this many credits are back.
const RESUME_WATERMARK: u16 = 2;

impl TxCredits {
    #[must_use]
    pub fn new(grant: u16) -> Self {
        Self {
            queues: std::array::from_fn(|_| AcQueue {
                credits: grant,
                paused: false,
            }),
            grant,
        }
    }

    /// Takes one send credit. Returns `false`, pausing the queue, when the
    /// pool is exhausted; the caller must back-pressure the sender.
    pub fn claim(&mut self, ac: AccessCategory) -> bool {
        let q = &mut self.queues[ac.index()];
        if q.credits == 0 {
            q.paused = true;
            return false;
        }
        q.credits -= 1;
        true
    }

    /// Returns one credit on transmit completion.
    pub fn release(&mut self, ac: AccessCategory) -> CreditReturn {
        let q = &mut self.queues[ac.index()];
        if q.credits < self.grant {
            q.credits += 1;
        }
        if q.paused && q.credits >= RESUME_WATERMARK {
            q.paused = false;
            return CreditReturn::Resumed;
        }
        CreditReturn::Flowing
    }

    #[must_use]
    pub fn available(&self, ac: AccessCategory) -> u16 {
        self.queues[ac.index()].credits
    }

    #[must_use]
    pub fn is_paused(&self, ac: AccessCategory) -> bool {
        self.queues[ac.index()].paused
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colour_roundtrip() {
        let colour = Colour {
            vif: 2,
            peer_index: 17,
            ac: AccessCategory::Vi,
        };
        assert_eq!(Colour::decode(colour.encode()), colour);
    }

    #[test]
    fn colour_decode_masks_unused_bits() {
        // Bit 0 and bits above 9 must be ignored.
        let raw = colour_raw(1, 3, AccessCategory::Vo) | 0x1 | 0xfc00;
        let colour = Colour::decode(raw);
        assert_eq!(colour.vif, 1);
        assert_eq!(colour.peer_index, 3);
        assert_eq!(colour.ac, AccessCategory::Vo);
    }

    fn colour_raw(vif: u16, peer: u16, ac: AccessCategory) -> u16 {
        Colour {
            vif,
            peer_index: peer,
            ac,
        }
        .encode()
    }

    #[test]
    fn exhaustion_pauses_and_release_resumes() {
        let mut credits = TxCredits::new(2);
        assert!(credits.claim(AccessCategory::Be));
        assert!(credits.claim(AccessCategory::Be));
        assert!(!credits.claim(AccessCategory::Be));
        assert!(credits.is_paused(AccessCategory::Be));

        assert_eq!(credits.release(AccessCategory::Be), CreditReturn::Flowing);
        assert_eq!(credits.release(AccessCategory::Be), CreditReturn::Resumed);
        assert!(!credits.is_paused(AccessCategory::Be));
    }

    #[test]
    fn release_never_exceeds_grant() {
        let mut credits = TxCredits::new(4);
        credits.release(AccessCategory::Vo);
        credits.release(AccessCategory::Vo);
        assert_eq!(credits.available(AccessCategory::Vo), 4);
    }

    #[test]
    fn categories_are_independent() {
        let mut credits = TxCredits::new(1);
        assert!(credits.claim(AccessCategory::Bk));
        assert!(!credits.claim(AccessCategory::Bk));
        assert!(credits.claim(AccessCategory::Vo));
    }
}
