//! Test/engineering service: signals are counted and discarded.
//!
//! Production firmware never emits these; engineering builds use the class
//! for loopback checks, which this subsystem does not implement.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::fapi;
use crate::hip::HipError;
use crate::sap::{Sap, SapClass};
use crate::signal::SignalBuffer;
use crate::trace::trace;

#[derive(Default)]
pub struct TstSap {
    received: AtomicU64,
}

impl TstSap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

impl Sap for TstSap {
    fn class(&self) -> SapClass {
        SapClass::Test
    }

    fn versions(&self) -> &[u16] {
        &[fapi::TEST_SAP_VERSION, fapi::SAP_ENG_VERSION]
    }

    fn receive(&self, buf: SignalBuffer) -> Result<(), HipError> {
        self.received.fetch_add(1, Ordering::Relaxed);
        trace!(id = buf.id(), "test signal discarded");
        Ok(())
    }
}
