//! Interface table, peer records and the external collaborator boundaries.
//!
//! The subsystem does not own connection-state semantics: interfaces and
//! peers are created and destroyed by an external manager, and reconstructed
//! frames leave through [`NetStack::inject`]. This module holds exactly the
//! per-interface and per-peer state the dispatch layer needs: the two work
//! queues, the pre-connection frame buffer, the reorder windows and the
//! transmit credit pools.
//!
//! Locking: each interface's work queues carry their own locks; all peer
//! reorder/credit state of one interface lives behind that interface's single
//! `data` lock. The block-ack hold timer and the data drain both take that
//! lock, which is what makes flush-and-rearm atomic.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::ba::ReorderWindow;
use crate::fapi::AccessCategory;
use crate::flow::TxCredits;
use crate::queue::{WorkQueue, Worker};
use crate::signal::SignalBuffer;
use crate::trace::info;

/// Interfaces addressable by the 2-bit vif field of a colour tag.
pub const MAX_INTERFACES: usize = 4;

/// Unicast peers per interface; peer index 0 is the group queue.
pub const MAX_PEERS: usize = 16;

/// Traffic classes with independent reorder windows.
pub const NUM_TIDS: usize = 8;

pub type MacAddr = [u8; 6];

/// Role an interface is operating in; decides pre-connection buffering and
/// multicast echo handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfRole {
    Station,
    Ap,
}

/// Opaque reference to a peer record, handed to the connection-state owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerHandle {
    pub ifnum: u16,
    pub peer_index: u16,
}

/// Per-remote-station record.
///
/// Created on association, destroyed on peer removal; reorder windows are
/// created lazily by block-ack signalling.
pub struct PeerContext {
    pub index: u16,
    pub address: MacAddr,
    /// False while association is still completing; data received in that
    /// window is buffered, not processed.
    pub connected: bool,
    pub buffered: VecDeque<SignalBuffer>,
    /// Boxed: a window carries a 64-slot pending array, and 8 TIDs across 16
    /// inline peer slots would put megabytes on the owning thread's stack.
    pub reorder: [Option<Box<ReorderWindow>>; NUM_TIDS],
    pub credits: TxCredits,
}

impl PeerContext {
    fn new(index: u16, address: MacAddr, grant: u16) -> Self {
        Self {
            index,
            address,
            connected: false,
            buffered: VecDeque::new(),
            reorder: std::array::from_fn(|_| None),
            credits: TxCredits::new(grant),
        }
    }
}

/// Peer and flow state of one interface, guarded by a single lock.
pub struct DataState {
    /// Credits for the broadcast/multicast queue (colour peer index 0).
    pub group_credits: TxCredits,
    peers: [Option<PeerContext>; MAX_PEERS],
}

impl DataState {
    fn new(grant: u16) -> Self {
        Self {
            group_credits: TxCredits::new(grant),
            peers: std::array::from_fn(|_| None),
        }
    }

    /// Peer lookup by 1-based colour/queue-set index.
    #[must_use]
    pub fn peer_by_index(&mut self, index: u16) -> Option<&mut PeerContext> {
        if index == 0 || index as usize > MAX_PEERS {
            return None;
        }
        self.peers[index as usize - 1].as_mut()
    }

    /// Peer lookup by station address (data-path source resolve).
    #[must_use]
    pub fn peer_by_addr(&mut self, addr: &MacAddr) -> Option<&mut PeerContext> {
        self.peers
            .iter_mut()
            .flatten()
            .find(|p| &p.address == addr)
    }

    /// Claims the first free peer slot.
    pub(crate) fn attach_peer(&mut self, addr: MacAddr, grant: u16) -> Option<u16> {
        let slot = self.peers.iter().position(Option::is_none)?;
        let index = slot as u16 + 1;
        self.peers[slot] = Some(PeerContext::new(index, addr, grant));
        Some(index)
    }

    pub(crate) fn detach_peer(&mut self, index: u16) -> Option<PeerContext> {
        if index == 0 || index as usize > MAX_PEERS {
            return None;
        }
        self.peers[index as usize - 1].take()
    }

    /// Drops every peer record, including buffered frames and pending
    /// reorder state.
    pub(crate) fn clear_peers(&mut self) {
        for slot in &mut self.peers {
            *slot = None;
        }
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.iter().flatten().count()
    }
}

/// One logical network interface sharing the radio.
pub struct NetIf {
    pub ifnum: u16,
    pub addr: MacAddr,
    pub role: IfRole,
    /// Control-plane signals, per-interface FIFO.
    pub ctl_q: Arc<WorkQueue>,
    /// Data-plane signals, separate so bulk traffic cannot starve
    /// management signalling.
    pub dat_q: Arc<WorkQueue>,
    pub data: Mutex<DataState>,
    workers: Mutex<Vec<Worker>>,
}

impl NetIf {
    pub(crate) fn new(
        ifnum: u16,
        addr: MacAddr,
        role: IfRole,
        queue_depth: usize,
        credit_grant: u16,
    ) -> Arc<Self> {
        Arc::new(Self {
            ifnum,
            addr,
            role,
            ctl_q: WorkQueue::new(queue_depth),
            dat_q: WorkQueue::new(queue_depth),
            data: Mutex::new(DataState::new(credit_grant)),
            workers: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn adopt_worker(&self, worker: Worker) {
        self.workers.lock().expect("worker list poisoned").push(worker);
    }

    /// Closes both queues and joins the workers.
    pub(crate) fn shutdown(&self) {
        self.ctl_q.close();
        self.dat_q.close();
        let mut workers = self.workers.lock().expect("worker list poisoned");
        for worker in workers.iter_mut() {
            worker.join();
        }
        workers.clear();
    }

    /// Force-clears all interface-local state under the relevant locks,
    /// without waiting for in-flight worker iterations.
    pub(crate) fn force_clear(&self) -> usize {
        let dropped = self.ctl_q.clear() + self.dat_q.clear();
        self.data.lock().expect("data state poisoned").clear_peers();
        dropped
    }
}

/// Marks a peer's association complete and releases any frames buffered
/// while it was pending, in arrival order, back onto the data queue.
///
/// Returns false if the peer record is gone (raced with detach).
pub(crate) fn promote_peer(netif: &Arc<NetIf>, peer_index: u16, stats: &HipStats) -> bool {
    let buffered = {
        let mut state = netif.data.lock().expect("data state poisoned");
        let Some(peer) = state.peer_by_index(peer_index) else {
            return false;
        };
        peer.connected = true;
        std::mem::take(&mut peer.buffered)
    };
    for buf in buffered {
        if netif.dat_q.push(buf).is_err() {
            inc(&stats.dat_queue_full);
        }
    }
    true
}

/// Registry of the logical interfaces exposed by one radio.
pub struct NetIfTable {
    slots: RwLock<[Option<Arc<NetIf>>; MAX_INTERFACES]>,
}

impl NetIfTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(std::array::from_fn(|_| None)),
        }
    }

    pub(crate) fn insert(&self, netif: Arc<NetIf>) -> Result<(), Arc<NetIf>> {
        let mut slots = self.slots.write().expect("interface table poisoned");
        let Some(slot) = slots.get_mut(netif.ifnum as usize) else {
            return Err(netif);
        };
        if slot.is_some() {
            return Err(netif);
        }
        info!(ifnum = netif.ifnum, "interface registered");
        *slot = Some(netif);
        Ok(())
    }

    pub(crate) fn remove(&self, ifnum: u16) -> Option<Arc<NetIf>> {
        let mut slots = self.slots.write().expect("interface table poisoned");
        slots.get_mut(ifnum as usize)?.take()
    }

    #[must_use]
    pub fn get(&self, ifnum: u16) -> Option<Arc<NetIf>> {
        let slots = self.slots.read().expect("interface table poisoned");
        slots.get(ifnum as usize)?.clone()
    }

    /// Finds the interface owning a MAC address; used to disambiguate which
    /// of a primary/secondary pair a management frame belongs to.
    #[must_use]
    pub fn by_addr(&self, addr: &MacAddr) -> Option<Arc<NetIf>> {
        let slots = self.slots.read().expect("interface table poisoned");
        slots
            .iter()
            .flatten()
            .find(|netif| &netif.addr == addr)
            .cloned()
    }

    pub fn for_each(&self, mut f: impl FnMut(&Arc<NetIf>)) {
        let slots = self.slots.read().expect("interface table poisoned");
        for netif in slots.iter().flatten() {
            f(netif);
        }
    }
}

impl Default for NetIfTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Network-stack attachment point. Reconstructed Ethernet frames leave the
/// subsystem only through `inject`; implementations must not retain the slice
/// past the call.
pub trait NetStack: Send + Sync {
    fn inject(&self, ifnum: u16, frame: &[u8]);
}

/// Connection-state owner callbacks, one per control indication kind. Each
/// receives the attributes extracted from the signal; the signal buffer
/// itself is freed by the control drain afterwards.
#[allow(unused_variables)]
pub trait MlmeEvents: Send + Sync {
    fn on_connect(&self, ifnum: u16, result_code: u16) {}
    fn on_disconnect(&self, ifnum: u16, peer: MacAddr, reason_code: u16) {}
    fn on_scan_result(&self, ifnum: u16, scan_id: u16, freq: u16, rssi: i16, ies: &[u8]) {}
    fn on_scan_done(&self, ifnum: u16, scan_id: u16) {}
    fn on_frame_tx_status(&self, ifnum: u16, host_tag: u16, status: u16) {}
    fn on_mic_failure(&self, ifnum: u16, peer: MacAddr, key_type: u16, key_id: u16) {}
    fn on_received_frame(&self, ifnum: u16, frame: &[u8]) {}
    fn on_procedure_started(&self, ifnum: u16, procedure_type: u16, peer_index: u16) {}
    fn on_peer_connected(&self, ifnum: u16, peer_index: u16) {}
}

/// Back-pressure notifications produced by the credit accounting.
#[allow(unused_variables)]
pub trait FlowWatcher: Send + Sync {
    fn pause(&self, ifnum: u16, peer_index: u16, ac: AccessCategory) {}
    fn resume(&self, ifnum: u16, peer_index: u16, ac: AccessCategory) {}
}

/// Sink for firmware log payloads arriving on the debug service.
pub trait DbgSink: Send + Sync {
    fn firmware_log(&self, payload: &[u8]);
}

/// Diagnostic counters. Dropped frames are silent towards the network stack
/// but always observable here.
#[derive(Debug, Default)]
pub struct HipStats {
    pub ctl_queue_full: AtomicU64,
    pub dat_queue_full: AtomicU64,
    pub unknown_interface: AtomicU64,
    pub unknown_peer: AtomicU64,
    pub bad_descriptor: AtomicU64,
    pub bad_signal: AtomicU64,
    pub malformed_amsdu: AtomicU64,
    pub own_multicast_echo: AtomicU64,
    pub duplicate_released: AtomicU64,
    pub ba_timeout_flush: AtomicU64,
    pub ba_window_slip: AtomicU64,
    pub buffered_preconnect: AtomicU64,
    pub buffered_dropped: AtomicU64,
    pub tx_done_orphan: AtomicU64,
    pub tx_failures: AtomicU64,
    pub frames_injected: AtomicU64,
    pub amsdu_subframes: AtomicU64,
    pub ctl_unhandled: AtomicU64,
}

/// Relaxed counter bump; counters are advisory, never synchronization.
#[inline]
pub(crate) fn inc(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[inline]
#[must_use]
pub fn counter(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_attach_assigns_one_based_indices() {
        let mut state = DataState::new(8);
        let a = state.attach_peer([1; 6], 8).unwrap();
        let b = state.attach_peer([2; 6], 8).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert!(state.peer_by_index(0).is_none());
        assert!(state.peer_by_addr(&[2; 6]).is_some());
        assert_eq!(state.peer_count(), 2);

        state.detach_peer(a);
        assert!(state.peer_by_addr(&[1; 6]).is_none());
        // Freed slot is reused.
        assert_eq!(state.attach_peer([3; 6], 8), Some(1));
    }

    #[test]
    fn data_state_fits_on_an_ordinary_stack() {
        // Reorder windows are boxed; the inline per-interface state must stay
        // far below default thread stack sizes even fully populated.
        assert!(std::mem::size_of::<DataState>() < 16 * 1024);
    }

    #[test]
    fn table_lookup_by_index_and_addr() {
        let table = NetIfTable::new();
        let netif = NetIf::new(1, [0xaa; 6], IfRole::Station, 8, 8);
        assert!(table.insert(netif).is_ok());

        assert!(table.get(1).is_some());
        assert!(table.get(2).is_none());
        assert!(table.get(9).is_none());
        assert_eq!(table.by_addr(&[0xaa; 6]).unwrap().ifnum, 1);
        assert!(table.by_addr(&[0xbb; 6]).is_none());
    }

    #[test]
    fn duplicate_ifnum_rejected() {
        let table = NetIfTable::new();
        assert!(table
            .insert(NetIf::new(0, [1; 6], IfRole::Ap, 8, 8))
            .is_ok());
        assert!(table
            .insert(NetIf::new(0, [2; 6], IfRole::Ap, 8, 8))
            .is_err());
    }

    #[test]
    fn force_clear_empties_queues_and_peers() {
        let netif = NetIf::new(0, [1; 6], IfRole::Ap, 8, 8);
        netif
            .ctl_q
            .push(SignalBuffer::new(crate::fapi::MLME_SCAN_IND))
            .unwrap();
        netif
            .dat_q
            .push(SignalBuffer::new(crate::fapi::MA_UNITDATA_IND))
            .unwrap();
        netif
            .data
            .lock()
            .unwrap()
            .attach_peer([9; 6], 8)
            .unwrap();

        assert_eq!(netif.force_clear(), 2);
        assert!(netif.ctl_q.is_empty());
        assert!(netif.dat_q.is_empty());
        assert_eq!(netif.data.lock().unwrap().peer_count(), 0);
    }
}
