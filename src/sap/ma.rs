//! Data-plane (MA) service: the receive pipeline and transmit-completion
//! accounting.
//!
//! `receive` runs in the transport delivery context and only classifies and
//! enqueues; the heavy lifting happens on the owning interface's data-queue
//! worker in `drain`. Block-ack indications are the one exception: they are
//! rerouted onto the control queue so acknowledgement bookkeeping serializes
//! with connection-state transitions.

use std::sync::Arc;

use crate::ba::{ReorderEvent, SN_MASK};
use crate::fapi::{self, AccessCategory};
use crate::flow::{Colour, CreditReturn};
use crate::hip::HipError;
use crate::netif::{inc, FlowWatcher, HipStats, IfRole, NetIf, NetIfTable, NetStack};
use crate::rx;
use crate::sap::{Sap, SapClass};
use crate::signal::SignalBuffer;
use crate::trace::{debug, trace, warn};

/// Data-plane service descriptor.
pub struct MaSap {
    ifaces: Arc<NetIfTable>,
    stats: Arc<HipStats>,
    netstack: Arc<dyn NetStack>,
    flow: Arc<dyn FlowWatcher>,
    /// Frames held per peer while its association completes.
    preconnect_cap: usize,
    versions: [u16; 2],
}

impl MaSap {
    #[must_use]
    pub fn new(
        ifaces: Arc<NetIfTable>,
        stats: Arc<HipStats>,
        netstack: Arc<dyn NetStack>,
        flow: Arc<dyn FlowWatcher>,
        preconnect_cap: usize,
    ) -> Self {
        Self {
            ifaces,
            stats,
            netstack,
            flow,
            preconnect_cap,
            versions: [fapi::DATA_SAP_VERSION, fapi::SAP_ENG_VERSION],
        }
    }

    /// Data-queue drain for one unit-data indication.
    fn rx_data(&self, netif: &Arc<NetIf>, buf: SignalBuffer) {
        let Some(descriptor) = buf.u16_at(fapi::ma_unitdata_ind::DATA_UNIT_DESCRIPTOR) else {
            inc(&self.stats.bad_signal);
            return;
        };
        if descriptor != fapi::DATAUNIT_IEEE802_3_FRAME && descriptor != fapi::DATAUNIT_AMSDU {
            inc(&self.stats.bad_descriptor);
            debug!(descriptor, "unsupported unit descriptor, dropping");
            return;
        }

        let frame = buf.payload(fapi::ma_unitdata_ind::DR);
        if frame.len() < rx::ETH_HEADER_LEN {
            inc(&self.stats.bad_signal);
            return;
        }
        let mut src = [0u8; 6];
        src.copy_from_slice(&frame[6..12]);

        // An access point relays our own multicast back to us in station
        // mode; expected behavior, not a fault.
        if netif.role == IfRole::Station && rx::is_multicast(&frame[..6]) && src == netif.addr {
            inc(&self.stats.own_multicast_echo);
            return;
        }

        let mut reordered_run = Vec::new();
        {
            let mut state = netif.data.lock().expect("data state poisoned");
            let Some(peer) = state.peer_by_addr(&src) else {
                inc(&self.stats.unknown_peer);
                warn!(ifnum = netif.ifnum, "data from unknown peer, dropping");
                return;
            };

            // No data may reach the stack before the connection-complete
            // event; hold the frame on the peer until then.
            if netif.role == IfRole::Ap && !peer.connected {
                if peer.buffered.len() >= self.preconnect_cap {
                    inc(&self.stats.buffered_dropped);
                } else {
                    peer.buffered.push_back(buf);
                    inc(&self.stats.buffered_preconnect);
                }
                return;
            }

            if !buf.is_reordered() {
                let tid =
                    usize::from(buf.u16_at(fapi::ma_unitdata_ind::PRIORITY).unwrap_or(0) & 0x7);
                if let Some(window) = peer.reorder[tid].as_mut() {
                    let sn = buf
                        .u16_at(fapi::ma_unitdata_ind::SEQUENCE_NUMBER)
                        .unwrap_or(0)
                        & SN_MASK;
                    let event = window.process(sn, buf, &mut |b| reordered_run.push(b));
                    match event {
                        ReorderEvent::Duplicate => inc(&self.stats.duplicate_released),
                        ReorderEvent::WindowSlip => inc(&self.stats.ba_window_slip),
                        ReorderEvent::Delivered | ReorderEvent::Queued => {}
                    }
                    // Anything deliverable is in `reordered_run`; the rest is
                    // owned by the window now.
                } else {
                    drop(state);
                    self.deliver(netif, buf);
                    return;
                }
            } else {
                drop(state);
                self.deliver(netif, buf);
                return;
            }
        }

        for released in reordered_run {
            self.deliver(netif, released);
        }
    }

    /// Pipeline tail: split aggregates, strip the signal header, inject.
    pub(crate) fn deliver(&self, netif: &Arc<NetIf>, mut buf: SignalBuffer) {
        let descriptor = buf
            .u16_at(fapi::ma_unitdata_ind::DATA_UNIT_DESCRIPTOR)
            .unwrap_or(fapi::DATAUNIT_IEEE802_3_FRAME);

        if descriptor == fapi::DATAUNIT_AMSDU {
            let ifnum = netif.ifnum;
            let data = buf.payload_mut(fapi::ma_unitdata_ind::DR);
            let netstack = &self.netstack;
            let stats = &self.stats;
            if rx::deaggregate(data, |frame| {
                netstack.inject(ifnum, frame);
                inc(&stats.frames_injected);
                inc(&stats.amsdu_subframes);
            })
            .is_err()
            {
                inc(&self.stats.malformed_amsdu);
                warn!(ifnum, "malformed aggregate discarded");
            }
            return;
        }

        let frame = buf.payload(fapi::ma_unitdata_ind::DR);
        self.netstack.inject(netif.ifnum, frame);
        inc(&self.stats.frames_injected);
    }

    fn rx_cfm(&self, buf: &SignalBuffer) {
        let status = buf
            .u16_at(fapi::ma_unitdata_cfm::TRANSMISSION_STATUS)
            .unwrap_or(fapi::TX_STATUS_SUCCESSFUL);
        if status != fapi::TX_STATUS_SUCCESSFUL {
            inc(&self.stats.tx_failures);
            trace!(status, "unitdata transmission failed");
        }
    }
}

impl Sap for MaSap {
    fn class(&self) -> SapClass {
        SapClass::Ma
    }

    fn versions(&self) -> &[u16] {
        &self.versions
    }

    fn receive(&self, buf: SignalBuffer) -> Result<(), HipError> {
        if !buf.has_expected_len() {
            inc(&self.stats.bad_signal);
            return Err(HipError::MalformedFrame("short ma signal"));
        }
        let id = buf.id();
        let (vif, to_control) = match id {
            fapi::MA_UNITDATA_IND | fapi::MA_UNITDATA_CFM => {
                (buf.u16_at(fapi::ma_unitdata_ind::VIF).unwrap_or(0), false)
            }
            // Block-ack bookkeeping must serialize with connection-state
            // transitions, so it goes through the control queue.
            fapi::MA_BLOCKACK_IND => {
                (buf.u16_at(fapi::ma_blockack_ind::VIF).unwrap_or(0), true)
            }
            _ => {
                inc(&self.stats.bad_signal);
                return Err(HipError::MalformedFrame("unexpected ma signal"));
            }
        };

        let Some(netif) = self.ifaces.get(vif) else {
            // Races with interface teardown; counted, never escalated.
            inc(&self.stats.unknown_interface);
            debug!(vif, id, "ma signal for unknown interface");
            return Ok(());
        };

        let queue = if to_control { &netif.ctl_q } else { &netif.dat_q };
        if queue.push(buf).is_err() {
            inc(if to_control {
                &self.stats.ctl_queue_full
            } else {
                &self.stats.dat_queue_full
            });
            warn!(vif, id, "work queue full, dropping signal");
        }
        Ok(())
    }

    fn drain(&self, netif: &Arc<NetIf>, buf: SignalBuffer) {
        match buf.id() {
            fapi::MA_UNITDATA_IND => self.rx_data(netif, buf),
            fapi::MA_UNITDATA_CFM => self.rx_cfm(&buf),
            _ => inc(&self.stats.bad_signal),
        }
    }

    fn tx_done(&self, colour: Colour) -> Result<(), HipError> {
        let Some(netif) = self.ifaces.get(colour.vif) else {
            // Completions race with interface teardown by design.
            inc(&self.stats.tx_done_orphan);
            return Ok(());
        };

        let outcome = {
            let mut state = netif.data.lock().expect("data state poisoned");
            if colour.peer_index == 0 {
                Some(state.group_credits.release(colour.ac))
            } else {
                match state.peer_by_index(colour.peer_index) {
                    Some(peer) => Some(peer.credits.release(colour.ac)),
                    None => None,
                }
            }
        };

        match outcome {
            Some(CreditReturn::Resumed) => {
                self.flow.resume(netif.ifnum, colour.peer_index, colour.ac);
            }
            Some(CreditReturn::Flowing) => {}
            None => inc(&self.stats.tx_done_orphan),
        }
        Ok(())
    }
}

/// Claims a transmit credit and produces the colour tag to attach to the
/// outgoing buffer. `peer_index` 0 addresses the interface's
/// broadcast/multicast queue.
pub(crate) fn claim_colour(
    ifaces: &NetIfTable,
    flow: &dyn FlowWatcher,
    ifnum: u16,
    peer_index: u16,
    ac: AccessCategory,
) -> Result<Colour, HipError> {
    let netif = ifaces.get(ifnum).ok_or(HipError::UnknownInterface(ifnum))?;
    let granted = {
        let mut state = netif.data.lock().expect("data state poisoned");
        if peer_index == 0 {
            state.group_credits.claim(ac)
        } else {
            state
                .peer_by_index(peer_index)
                .ok_or(HipError::UnknownPeer)?
                .credits
                .claim(ac)
        }
    };
    if !granted {
        flow.pause(ifnum, peer_index, ac);
        return Err(HipError::QueueFull);
    }
    Ok(Colour {
        vif: ifnum,
        peer_index,
        ac,
    })
}
