//! Debug service: firmware log records, handled inline.
//!
//! Debug signals carry no interface affinity and no ordering requirement
//! against the data path, so they never touch the work queues.

use std::sync::Arc;

use crate::fapi;
use crate::hip::HipError;
use crate::netif::DbgSink;
use crate::sap::{Sap, SapClass};
use crate::signal::SignalBuffer;
use crate::trace::debug;

pub struct DbgSap {
    sink: Option<Arc<dyn DbgSink>>,
    versions: [u16; 2],
}

impl DbgSap {
    #[must_use]
    pub fn new(sink: Option<Arc<dyn DbgSink>>) -> Self {
        Self {
            sink,
            versions: [fapi::DEBUG_SAP_VERSION, fapi::SAP_ENG_VERSION],
        }
    }
}

impl Sap for DbgSap {
    fn class(&self) -> SapClass {
        SapClass::Dbg
    }

    fn versions(&self) -> &[u16] {
        &self.versions
    }

    fn receive(&self, buf: SignalBuffer) -> Result<(), HipError> {
        let payload = buf.payload(fapi::SIGNAL_HEADER_LEN);
        match &self.sink {
            Some(sink) => sink.firmware_log(payload),
            None => debug!(id = buf.id(), len = payload.len(), "firmware log record"),
        }
        Ok(())
    }
}
