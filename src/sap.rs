//! Service access points: capability dispatch over the four service classes.
//!
//! Each inbound signal belongs to exactly one class, encoded in the upper
//! nibble of its signal id. A [`SapRegistry`] maps classes to handler
//! descriptors with O(1) lookup; an unregistered class at dispatch time is a
//! configuration error, never a silent drop.

pub mod dbg;
pub mod ma;
pub mod mlme;
pub mod tst;

use std::sync::Arc;

use crate::fapi;
use crate::flow::Colour;
use crate::hip::HipError;
use crate::netif::NetIf;
use crate::signal::SignalBuffer;

/// The four independently versioned service classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SapClass {
    /// Data plane (MA).
    Ma,
    /// Control plane (MLME).
    Mlme,
    /// Firmware diagnostics.
    Dbg,
    /// Production test.
    Test,
}

impl SapClass {
    pub const COUNT: usize = 4;
    pub const ALL: [Self; Self::COUNT] = [Self::Ma, Self::Mlme, Self::Dbg, Self::Test];

    /// Decodes the class nibble of a signal id.
    #[must_use]
    pub fn from_signal_id(id: u16) -> Option<Self> {
        match id & fapi::SAP_TYPE_MASK {
            fapi::SAP_TYPE_MA => Some(Self::Ma),
            fapi::SAP_TYPE_MLME => Some(Self::Mlme),
            fapi::SAP_TYPE_DEBUG => Some(Self::Dbg),
            fapi::SAP_TYPE_TEST => Some(Self::Test),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Ma => 0,
            Self::Mlme => 1,
            Self::Dbg => 2,
            Self::Test => 3,
        }
    }
}

/// Link lifecycle events broadcast to every registered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The transport has failed; suppress submissions and force-clear all
    /// interface-local state.
    Stop,
    /// The transport is usable again after a `Stop`.
    Recover,
}

/// Handler descriptor for one service class.
///
/// `receive` runs in the transport delivery context and must not block; work
/// is deferred to the owning interface's queue, whose worker calls `drain`.
pub trait Sap: Send + Sync {
    fn class(&self) -> SapClass;

    /// Supported protocol versions, at most two, newest first.
    fn versions(&self) -> &[u16];

    /// Classifies an inbound signal and hands it to the owning interface.
    fn receive(&self, buf: SignalBuffer) -> Result<(), HipError>;

    /// Work-queue drain entry; errors are handled locally and counted, so the
    /// worker can always proceed to the next buffer.
    fn drain(&self, netif: &Arc<NetIf>, buf: SignalBuffer) {
        let _ = (netif, buf);
    }

    /// Transmit-completion hook; only the data-plane service participates.
    fn tx_done(&self, colour: Colour) -> Result<(), HipError> {
        let _ = colour;
        Ok(())
    }

    /// Link lifecycle notification.
    fn notify(&self, event: LinkEvent) {
        let _ = event;
    }

    /// Whether the firmware-reported version is compatible; judged on the
    /// major revision byte.
    fn supports(&self, reported: u16) -> bool {
        self.versions()
            .iter()
            .any(|&v| fapi::sap_major(v) == fapi::sap_major(reported))
    }
}

/// Fixed-size class-indexed dispatch table.
///
/// Write-once per class during initialization; read-only once the subsystem
/// is attached, so dispatch takes no lock. Re-registering a class overwrites
/// the previous descriptor (used by tests, not for runtime hot-swap).
pub struct SapRegistry {
    slots: [Option<Arc<dyn Sap>>; SapClass::COUNT],
}

impl SapRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    pub fn register(&mut self, sap: Arc<dyn Sap>) {
        let idx = sap.class().index();
        self.slots[idx] = Some(sap);
    }

    pub fn unregister(&mut self, class: SapClass) -> Option<Arc<dyn Sap>> {
        self.slots[class.index()].take()
    }

    #[must_use]
    pub fn get(&self, class: SapClass) -> Option<&Arc<dyn Sap>> {
        self.slots[class.index()].as_ref()
    }

    /// True once all four classes are registered.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }
}

impl Default for SapRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSap(SapClass);

    impl Sap for NullSap {
        fn class(&self) -> SapClass {
            self.0
        }
        fn versions(&self) -> &[u16] {
            &[fapi::CONTROL_SAP_VERSION, fapi::SAP_ENG_VERSION]
        }
        fn receive(&self, _buf: SignalBuffer) -> Result<(), HipError> {
            Ok(())
        }
    }

    #[test]
    fn class_decode_from_signal_id() {
        assert_eq!(
            SapClass::from_signal_id(fapi::MA_UNITDATA_IND),
            Some(SapClass::Ma)
        );
        assert_eq!(
            SapClass::from_signal_id(fapi::MLME_CONNECT_IND),
            Some(SapClass::Mlme)
        );
        assert_eq!(SapClass::from_signal_id(0x8001), Some(SapClass::Dbg));
        assert_eq!(SapClass::from_signal_id(0x9300), Some(SapClass::Test));
        assert_eq!(SapClass::from_signal_id(0x5000), None);
    }

    #[test]
    fn register_overwrite_and_unregister() {
        let mut reg = SapRegistry::new();
        assert!(!reg.is_complete());

        reg.register(Arc::new(NullSap(SapClass::Ma)));
        let first = Arc::clone(reg.get(SapClass::Ma).unwrap());
        reg.register(Arc::new(NullSap(SapClass::Ma)));
        assert!(!Arc::ptr_eq(
            &first,
            reg.get(SapClass::Ma).unwrap()
        ));

        assert!(reg.unregister(SapClass::Ma).is_some());
        assert!(reg.get(SapClass::Ma).is_none());
    }

    #[test]
    fn version_support_is_major_based() {
        let sap = NullSap(SapClass::Mlme);
        assert!(sap.supports(0x0d05)); // same major, newer minor
        assert!(sap.supports(fapi::SAP_ENG_VERSION));
        assert!(!sap.supports(0x0e01));
    }
}
