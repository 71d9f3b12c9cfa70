//! Control-plane (MLME) service: indication routing and the control drain.
//!
//! Firmware indications carry their owning interface in different places
//! depending on the signal: most use the vif field, scan signals fold the
//! interface into the high byte of the scan id, and received-frame
//! indications are matched on the destination MAC because a primary and a
//! secondary interface can share a vif during certain procedures.

use std::sync::Arc;

use crate::fapi;
use crate::hip::HipError;
use crate::netif::{
    inc, promote_peer, HipStats, MacAddr, MlmeEvents, NetIf, NetIfTable,
};
use crate::sap::{Sap, SapClass};
use crate::signal::SignalBuffer;
use crate::trace::{debug, info, warn};

/// Control-plane service descriptor.
pub struct MlmeSap {
    ifaces: Arc<NetIfTable>,
    stats: Arc<HipStats>,
    events: Arc<dyn MlmeEvents>,
    versions: [u16; 2],
}

impl MlmeSap {
    #[must_use]
    pub fn new(
        ifaces: Arc<NetIfTable>,
        stats: Arc<HipStats>,
        events: Arc<dyn MlmeEvents>,
    ) -> Self {
        Self {
            ifaces,
            stats,
            events,
            versions: [fapi::CONTROL_SAP_VERSION, fapi::SAP_ENG_VERSION],
        }
    }

    /// Picks the interface a control indication belongs to.
    fn resolve(&self, buf: &SignalBuffer) -> Option<Arc<NetIf>> {
        let ifnum = match buf.id() {
            // Scan signals report the issuing interface in the scan id's
            // high byte; the vif field is not meaningful mid-scan.
            fapi::MLME_SCAN_IND => buf.u16_at(fapi::mlme_scan_ind::SCAN_ID)? >> 8,
            fapi::MLME_SCAN_DONE_IND => buf.u16_at(fapi::mlme_scan_done_ind::SCAN_ID)? >> 8,
            fapi::MLME_RECEIVED_FRAME_IND => {
                let frame = buf.payload(fapi::mlme_received_frame_ind::DR);
                if frame.len() >= 6 {
                    let mut dst = [0u8; 6];
                    dst.copy_from_slice(&frame[..6]);
                    if let Some(netif) = self.ifaces.by_addr(&dst) {
                        return Some(netif);
                    }
                }
                buf.u16_at(fapi::mlme_received_frame_ind::VIF)?
            }
            _ => buf.u16_at(fapi::mlme_scan_ind::VIF)?,
        };
        self.ifaces.get(ifnum)
    }

    fn mac_at(buf: &SignalBuffer, offset: usize) -> MacAddr {
        buf.bytes_at::<6>(offset).unwrap_or([0; 6])
    }

    /// Block-ack session control. Runs on the control worker so session
    /// setup and teardown serialize with connection-state changes.
    fn blockack_ind(&self, netif: &Arc<NetIf>, buf: &SignalBuffer) {
        let addr = Self::mac_at(buf, fapi::ma_blockack_ind::PEER_QSTA_ADDRESS);
        let ssn = buf
            .u16_at(fapi::ma_blockack_ind::SEQUENCE_NUMBER)
            .unwrap_or(0);
        let reason = buf.u16_at(fapi::ma_blockack_ind::REASON_CODE).unwrap_or(0);
        let param_set = buf
            .u16_at(fapi::ma_blockack_ind::BLOCKACK_PARAMETER_SET)
            .unwrap_or(0);
        let tid = usize::from((param_set >> 2) & 0xf);
        let window_size = (param_set >> 6) & 0x3ff;

        if tid >= crate::netif::NUM_TIDS {
            inc(&self.stats.bad_signal);
            return;
        }

        let mut flushed = Vec::new();
        {
            let mut state = netif.data.lock().expect("data state poisoned");
            let Some(peer) = state.peer_by_addr(&addr) else {
                inc(&self.stats.unknown_peer);
                debug!(ifnum = netif.ifnum, "block-ack for unknown peer");
                return;
            };
            if reason == fapi::REASONCODE_START {
                // A restart releases anything still pending in the old
                // window before it is replaced.
                if let Some(mut window) = peer.reorder[tid].take() {
                    window.flush(&mut |b| flushed.push(b));
                }
                peer.reorder[tid] =
                    Some(Box::new(crate::ba::ReorderWindow::new(ssn, window_size)));
                info!(ifnum = netif.ifnum, tid, ssn, window_size, "reorder session started");
            } else if let Some(mut window) = peer.reorder[tid].take() {
                window.flush(&mut |b| flushed.push(b));
                info!(ifnum = netif.ifnum, tid, "reorder session stopped");
            }
        }

        // Released frames rejoin the data path; the reordered mark makes the
        // data drain skip the (now gone) window.
        for buf in flushed {
            if netif.dat_q.push(buf).is_err() {
                inc(&self.stats.dat_queue_full);
            }
        }
    }

    fn connected_ind(&self, netif: &Arc<NetIf>, buf: &SignalBuffer) {
        let peer_index = buf
            .u16_at(fapi::mlme_connected_ind::PEER_INDEX)
            .unwrap_or(0);
        if !promote_peer(netif, peer_index, &self.stats) {
            inc(&self.stats.unknown_peer);
            return;
        }
        self.events.on_peer_connected(netif.ifnum, peer_index);
    }

    fn scan_ind(&self, netif: &Arc<NetIf>, buf: &SignalBuffer) {
        let scan_id = buf.u16_at(fapi::mlme_scan_ind::SCAN_ID).unwrap_or(0);
        let freq = buf
            .u16_at(fapi::mlme_scan_ind::CHANNEL_FREQUENCY)
            .unwrap_or(0);
        let rssi = buf.u16_at(fapi::mlme_scan_ind::RSSI).unwrap_or(0) as i16;
        self.events.on_scan_result(
            netif.ifnum,
            scan_id,
            freq,
            rssi,
            buf.payload(fapi::mlme_scan_ind::DR),
        );
    }
}

impl Sap for MlmeSap {
    fn class(&self) -> SapClass {
        SapClass::Mlme
    }

    fn versions(&self) -> &[u16] {
        &self.versions
    }

    fn receive(&self, buf: SignalBuffer) -> Result<(), HipError> {
        if !buf.has_expected_len() {
            inc(&self.stats.bad_signal);
            return Err(HipError::MalformedFrame("short mlme signal"));
        }
        let id = buf.id();
        let Some(netif) = self.resolve(&buf) else {
            inc(&self.stats.unknown_interface);
            debug!(id, "control signal for unknown interface");
            return Ok(());
        };
        if netif.ctl_q.push(buf).is_err() {
            inc(&self.stats.ctl_queue_full);
            warn!(ifnum = netif.ifnum, id, "control queue full, dropping signal");
        }
        Ok(())
    }

    fn drain(&self, netif: &Arc<NetIf>, buf: SignalBuffer) {
        let ifnum = netif.ifnum;
        match buf.id() {
            fapi::MLME_SCAN_IND => self.scan_ind(netif, &buf),
            fapi::MLME_SCAN_DONE_IND => {
                let scan_id = buf.u16_at(fapi::mlme_scan_done_ind::SCAN_ID).unwrap_or(0);
                self.events.on_scan_done(ifnum, scan_id);
            }
            fapi::MLME_CONNECT_IND => {
                let result = buf.u16_at(fapi::mlme_connect_ind::RESULT_CODE).unwrap_or(0);
                self.events.on_connect(ifnum, result);
            }
            fapi::MLME_CONNECTED_IND => self.connected_ind(netif, &buf),
            fapi::MLME_DISCONNECT_IND | fapi::MLME_DISCONNECTED_IND => {
                let peer = Self::mac_at(&buf, fapi::mlme_disconnected_ind::PEER_STA_ADDRESS);
                let reason = buf
                    .u16_at(fapi::mlme_disconnected_ind::REASON_CODE)
                    .unwrap_or(0);
                self.events.on_disconnect(ifnum, peer, reason);
            }
            fapi::MLME_PROCEDURE_STARTED_IND => {
                let procedure = buf
                    .u16_at(fapi::mlme_procedure_started_ind::PROCEDURE_TYPE)
                    .unwrap_or(0);
                let peer_index = buf
                    .u16_at(fapi::mlme_procedure_started_ind::PEER_INDEX)
                    .unwrap_or(0);
                self.events.on_procedure_started(ifnum, procedure, peer_index);
            }
            fapi::MLME_MIC_FAILURE_IND => {
                let peer = Self::mac_at(&buf, fapi::mlme_mic_failure_ind::PEER_STA_ADDRESS);
                let key_type = buf.u16_at(fapi::mlme_mic_failure_ind::KEY_TYPE).unwrap_or(0);
                let key_id = buf.u16_at(fapi::mlme_mic_failure_ind::KEY_ID).unwrap_or(0);
                warn!(ifnum, key_type, key_id, "mic failure reported");
                self.events.on_mic_failure(ifnum, peer, key_type, key_id);
            }
            fapi::MLME_FRAME_TRANSMISSION_IND => {
                let host_tag = buf
                    .u16_at(fapi::mlme_frame_transmission_ind::HOST_TAG)
                    .unwrap_or(0);
                let status = buf
                    .u16_at(fapi::mlme_frame_transmission_ind::TRANSMISSION_STATUS)
                    .unwrap_or(0);
                if status != fapi::TX_STATUS_SUCCESSFUL {
                    inc(&self.stats.tx_failures);
                }
                self.events.on_frame_tx_status(ifnum, host_tag, status);
            }
            fapi::MLME_RECEIVED_FRAME_IND => {
                self.events
                    .on_received_frame(ifnum, buf.payload(fapi::mlme_received_frame_ind::DR));
            }
            fapi::MA_BLOCKACK_IND => self.blockack_ind(netif, &buf),
            other => {
                inc(&self.stats.ctl_unhandled);
                debug!(ifnum, id = other, "unhandled control signal");
            }
        }
    }
}
