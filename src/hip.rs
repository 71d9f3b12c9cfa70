//! Subsystem core: link lifecycle, version negotiation and signal dispatch.
//!
//! A [`HipCore`] owns the interface table, the service registry and the link
//! state machine. Inbound traffic enters through [`HipCore::dispatch`] and
//! transmit completions through [`HipCore::tx_done`]; both are gated on the
//! link being up so a half-initialized or failed subsystem never touches
//! handler state.

use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;

use minstant::Instant;

use crate::fapi::AccessCategory;
use crate::flow::Colour;
use crate::netif::{
    inc, promote_peer, DbgSink, FlowWatcher, HipStats, IfRole, MacAddr, MlmeEvents, NetIf,
    NetIfTable, NetStack, PeerHandle, MAX_INTERFACES, MAX_PEERS, NUM_TIDS,
};
use crate::queue::Worker;
use crate::sap::{dbg::DbgSap, ma, ma::MaSap, mlme::MlmeSap, tst::TstSap};
use crate::sap::{LinkEvent, SapClass, SapRegistry};
use crate::signal::SignalBuffer;
use crate::trace::{debug, info, warn};

/// Errors surfaced by the dispatch layer.
#[derive(Debug, Error)]
pub enum HipError {
    /// The link is not in a state that accepts traffic.
    #[error("subsystem not ready")]
    NotReady,
    /// No handler registered for a service class that was needed.
    #[error("no handler registered for service class {0:?}")]
    Unconfigured(SapClass),
    /// Firmware reports a protocol revision no handler supports.
    #[error("incompatible {class:?} version {reported:#06x} reported by firmware")]
    VersionMismatch { class: SapClass, reported: u16 },
    #[error("interface {0} already registered")]
    InterfaceExists(u16),
    #[error("unknown interface {0}")]
    UnknownInterface(u16),
    #[error("unknown peer")]
    UnknownPeer,
    #[error("peer table full")]
    PeerTableFull,
    #[error("malformed signal: {0}")]
    MalformedFrame(&'static str),
    /// Work queue or credit pool exhausted.
    #[error("queue full")]
    QueueFull,
    #[error("transport i/o")]
    Transport(#[from] io::Error),
}

/// Versions the firmware advertises during link bring-up, one word per
/// service class, indexed by [`SapClass::index`].
#[derive(Debug, Clone, Copy)]
pub struct FirmwareConfig {
    pub sap_versions: [u16; SapClass::COUNT],
}

/// Lower transport boundary. The transport delivers inbound signals by
/// calling [`HipCore::dispatch`] and completion tags by calling
/// [`HipCore::tx_done`]; this trait covers the calls going the other way.
pub trait Transport: Send + Sync {
    /// Brings the link up.
    fn acquire(&self) -> Result<(), HipError>;

    /// Releases the link. Idempotent.
    fn release(&self);

    /// Reads the firmware's advertised configuration. Requires an acquired
    /// link.
    fn firmware_config(&self) -> Result<FirmwareConfig, HipError>;
}

/// Link state machine. Traffic flows only in `Started`.
///
/// There is no transient stopping state: [`HipCore::stop`] completes
/// synchronously under the state lock, so the link goes straight to
/// `Stopped` from wherever it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Constructed, never started.
    Init,
    /// Version negotiation in progress.
    Starting,
    /// Link up, dispatch open.
    Started,
    /// Transport reported failure; waiting for recovery.
    Blocked,
    /// Orderly stopped (or recovered and awaiting restart).
    Stopped,
}

/// Tunables with conservative defaults.
#[derive(Debug, Clone)]
pub struct HipConfig {
    /// Per-interface work-queue depth; enqueues beyond it are counted drops.
    pub queue_depth: usize,
    /// How long a reorder window may sit on pending frames before the hold
    /// timer flushes it.
    pub ba_hold: Duration,
    /// Scan period of the hold timer.
    pub ba_tick: Duration,
    /// Transmit credits granted per access category per peer.
    pub ac_credits: u16,
    /// Frames buffered per peer while its association completes.
    pub preconnect_cap: usize,
}

impl Default for HipConfig {
    fn default() -> Self {
        Self {
            queue_depth: 64,
            ba_hold: Duration::from_millis(100),
            ba_tick: Duration::from_millis(25),
            ac_credits: 8,
            preconnect_cap: 128,
        }
    }
}

struct Reaper {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl Reaper {
    fn stop(&mut self) {
        {
            let (flag, wake) = &*self.stop;
            *flag.lock().expect("reaper flag poisoned") = true;
            wake.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            // The timer thread itself can end up running this through the
            // core's drop; it must not join itself.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("hold-timer thread panicked");
            }
        }
    }
}

/// The dispatch-layer core.
pub struct HipCore {
    transport: Arc<dyn Transport>,
    registry: Arc<SapRegistry>,
    ifaces: Arc<NetIfTable>,
    stats: Arc<HipStats>,
    flow: Arc<dyn FlowWatcher>,
    config: HipConfig,
    state: Mutex<LinkState>,
    reaper: Mutex<Option<Reaper>>,
}

impl HipCore {
    /// Standard wiring: builds the four service handlers around fresh
    /// interface and counter tables.
    #[must_use]
    pub fn attach(
        transport: Arc<dyn Transport>,
        netstack: Arc<dyn NetStack>,
        events: Arc<dyn MlmeEvents>,
        flow: Arc<dyn FlowWatcher>,
        dbg_sink: Option<Arc<dyn DbgSink>>,
        config: HipConfig,
    ) -> Arc<Self> {
        let ifaces = Arc::new(NetIfTable::new());
        let stats = Arc::new(HipStats::default());

        let mut registry = SapRegistry::new();
        registry.register(Arc::new(MaSap::new(
            Arc::clone(&ifaces),
            Arc::clone(&stats),
            netstack,
            Arc::clone(&flow),
            config.preconnect_cap,
        )));
        registry.register(Arc::new(MlmeSap::new(
            Arc::clone(&ifaces),
            Arc::clone(&stats),
            events,
        )));
        registry.register(Arc::new(DbgSap::new(dbg_sink)));
        registry.register(Arc::new(TstSap::new()));

        Self::with_registry(transport, Arc::new(registry), ifaces, stats, flow, config)
    }

    /// Lower-level constructor taking a prebuilt registry; the standard
    /// entry point is [`attach`](Self::attach).
    #[must_use]
    pub fn with_registry(
        transport: Arc<dyn Transport>,
        registry: Arc<SapRegistry>,
        ifaces: Arc<NetIfTable>,
        stats: Arc<HipStats>,
        flow: Arc<dyn FlowWatcher>,
        config: HipConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            registry,
            ifaces,
            stats,
            flow,
            config,
            state: Mutex::new(LinkState::Init),
            reaper: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn state(&self) -> LinkState {
        *self.state.lock().expect("link state poisoned")
    }

    #[must_use]
    pub fn stats(&self) -> &HipStats {
        &self.stats
    }

    #[must_use]
    pub fn interfaces(&self) -> &NetIfTable {
        &self.ifaces
    }

    /// Brings the link up: checks registry completeness, acquires the
    /// transport, and negotiates protocol versions for all four classes.
    ///
    /// Negotiation is all-or-nothing: a single incompatible class releases
    /// the transport and leaves the link down.
    pub fn start(self: &Arc<Self>) -> Result<(), HipError> {
        {
            let mut state = self.state.lock().expect("link state poisoned");
            match *state {
                LinkState::Init | LinkState::Stopped => *state = LinkState::Starting,
                LinkState::Starting | LinkState::Started => return Ok(()),
                LinkState::Blocked => return Err(HipError::NotReady),
            }
        }

        let outcome = self.negotiate();
        let mut state = self.state.lock().expect("link state poisoned");
        match outcome {
            Ok(()) => {
                *state = LinkState::Started;
                drop(state);
                self.spawn_reaper();
                info!("link started");
                Ok(())
            }
            Err(err) => {
                *state = LinkState::Stopped;
                Err(err)
            }
        }
    }

    fn negotiate(&self) -> Result<(), HipError> {
        for class in SapClass::ALL {
            if self.registry.get(class).is_none() {
                return Err(HipError::Unconfigured(class));
            }
        }
        self.transport.acquire()?;
        if let Err(err) = self.check_versions() {
            self.transport.release();
            return Err(err);
        }
        Ok(())
    }

    /// Re-runs the firmware configuration exchange on an already-acquired
    /// link. [`start`](Self::start) performs this as part of bring-up; a
    /// standalone call revalidates after a firmware-side reconfiguration.
    pub fn setup(&self) -> Result<(), HipError> {
        match self.state() {
            LinkState::Init | LinkState::Stopped => Err(HipError::NotReady),
            _ => self.check_versions(),
        }
    }

    /// Negotiation is all-or-nothing across the four classes; they share one
    /// wire format revision.
    fn check_versions(&self) -> Result<(), HipError> {
        let fw = self.transport.firmware_config()?;
        for class in SapClass::ALL {
            let sap = self.registry.get(class).ok_or(HipError::Unconfigured(class))?;
            let reported = fw.sap_versions[class.index()];
            if !sap.supports(reported) {
                warn!(?class, reported, "version negotiation failed");
                return Err(HipError::VersionMismatch { class, reported });
            }
            debug!(?class, reported, "version accepted");
        }
        Ok(())
    }

    /// Orderly shutdown: gates dispatch, stops the hold timer and releases
    /// the transport. Registered interfaces stay in the table so a later
    /// [`start`](Self::start) can resume. Callable from any state; on a
    /// never-started core it only marks the link stopped.
    pub fn stop(&self) {
        *self.state.lock().expect("link state poisoned") = LinkState::Stopped;
        self.stop_reaper();
        self.transport.release();
        info!("link stopped");
    }

    /// Transport lifecycle notification, fanned out to every registered
    /// service.
    ///
    /// `Stop` gates dispatch immediately and force-clears all queued work and
    /// peer state under the owning locks, without waiting on the workers.
    /// `Recover` re-arms the state machine; the caller restarts with
    /// [`start`](Self::start).
    pub fn link_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::Stop => {
                *self.state.lock().expect("link state poisoned") = LinkState::Blocked;
                self.stop_reaper();
                self.ifaces.for_each(|netif| {
                    let dropped = netif.force_clear();
                    debug!(ifnum = netif.ifnum, dropped, "interface force-cleared");
                });
                warn!("transport failure, dispatch blocked");
            }
            LinkEvent::Recover => {
                let mut state = self.state.lock().expect("link state poisoned");
                if *state == LinkState::Blocked {
                    *state = LinkState::Stopped;
                }
                drop(state);
                info!("transport recovered");
            }
        }
        for class in SapClass::ALL {
            if let Some(sap) = self.registry.get(class) {
                sap.notify(event);
            }
        }
    }

    /// Inbound signal entry point, called from the transport delivery
    /// context. Routes on the class nibble of the signal id.
    pub fn dispatch(&self, data: BytesMut) -> Result<(), HipError> {
        if self.state() != LinkState::Started {
            return Err(HipError::NotReady);
        }
        let Some(buf) = SignalBuffer::from_bytes(data) else {
            inc(&self.stats.bad_signal);
            return Err(HipError::MalformedFrame("truncated signal header"));
        };
        let Some(class) = SapClass::from_signal_id(buf.id()) else {
            inc(&self.stats.bad_signal);
            return Err(HipError::MalformedFrame("unknown service class"));
        };
        let sap = self.registry.get(class).ok_or(HipError::Unconfigured(class))?;
        sap.receive(buf)
    }

    /// Transmit-completion entry point. The raw colour echoed by the
    /// transport is decoded here, once, and the typed key routed to the
    /// data-plane handler.
    pub fn tx_done(&self, raw_colour: u16) -> Result<(), HipError> {
        if self.state() != LinkState::Started {
            return Err(HipError::NotReady);
        }
        let colour = Colour::decode(raw_colour);
        let sap = self
            .registry
            .get(SapClass::Ma)
            .ok_or(HipError::Unconfigured(SapClass::Ma))?;
        sap.tx_done(colour)
    }

    /// Claims a transmit credit for an outgoing frame and returns the colour
    /// to stamp on it. Pauses the queue (notifying the flow watcher) when
    /// the pool runs dry.
    pub fn claim_tx_credit(
        &self,
        ifnum: u16,
        peer_index: u16,
        priority: u16,
    ) -> Result<Colour, HipError> {
        if self.state() != LinkState::Started {
            return Err(HipError::NotReady);
        }
        ma::claim_colour(
            &self.ifaces,
            &*self.flow,
            ifnum,
            peer_index,
            AccessCategory::from_priority(priority),
        )
    }

    /// Creates an interface slot and spawns its control and data workers.
    pub fn register_interface(
        self: &Arc<Self>,
        ifnum: u16,
        addr: MacAddr,
        role: IfRole,
    ) -> Result<(), HipError> {
        if ifnum as usize >= MAX_INTERFACES {
            return Err(HipError::UnknownInterface(ifnum));
        }
        let netif = NetIf::new(
            ifnum,
            addr,
            role,
            self.config.queue_depth,
            self.config.ac_credits,
        );

        netif.adopt_worker(self.spawn_drain(
            &format!("hip-ctl-{ifnum}"),
            SapClass::Mlme,
            &netif,
            Arc::clone(&netif.ctl_q),
        ));
        netif.adopt_worker(self.spawn_drain(
            &format!("hip-dat-{ifnum}"),
            SapClass::Ma,
            &netif,
            Arc::clone(&netif.dat_q),
        ));

        if let Err(netif) = self.ifaces.insert(netif) {
            netif.shutdown();
            return Err(HipError::InterfaceExists(ifnum));
        }
        Ok(())
    }

    fn spawn_drain(
        &self,
        name: &str,
        class: SapClass,
        netif: &Arc<NetIf>,
        queue: Arc<crate::queue::WorkQueue>,
    ) -> Worker {
        let registry = Arc::clone(&self.registry);
        let netif = Arc::clone(netif);
        Worker::spawn(name, queue, move |buf| {
            if let Some(sap) = registry.get(class) {
                sap.drain(&netif, buf);
            }
        })
    }

    /// Tears an interface down: closes its queues, joins its workers and
    /// drops all of its peer state.
    pub fn remove_interface(&self, ifnum: u16) -> Result<(), HipError> {
        let netif = self
            .ifaces
            .remove(ifnum)
            .ok_or(HipError::UnknownInterface(ifnum))?;
        netif.shutdown();
        info!(ifnum, "interface removed");
        Ok(())
    }

    /// Creates a peer record on an interface. The peer starts disconnected;
    /// inbound data is buffered until [`peer_connected`](Self::peer_connected).
    pub fn peer_attach(&self, ifnum: u16, addr: MacAddr) -> Result<PeerHandle, HipError> {
        let netif = self
            .ifaces
            .get(ifnum)
            .ok_or(HipError::UnknownInterface(ifnum))?;
        let mut state = netif.data.lock().expect("data state poisoned");
        let peer_index = state
            .attach_peer(addr, self.config.ac_credits)
            .ok_or(HipError::PeerTableFull)?;
        Ok(PeerHandle { ifnum, peer_index })
    }

    /// Marks a peer's association complete and replays frames buffered while
    /// it was pending, in arrival order.
    pub fn peer_connected(&self, handle: PeerHandle) -> Result<(), HipError> {
        let netif = self
            .ifaces
            .get(handle.ifnum)
            .ok_or(HipError::UnknownInterface(handle.ifnum))?;
        if !promote_peer(&netif, handle.peer_index, &self.stats) {
            return Err(HipError::UnknownPeer);
        }
        Ok(())
    }

    /// Destroys a peer record, discarding buffered frames and pending
    /// reorder state.
    pub fn peer_detach(&self, handle: PeerHandle) -> Result<(), HipError> {
        let netif = self
            .ifaces
            .get(handle.ifnum)
            .ok_or(HipError::UnknownInterface(handle.ifnum))?;
        let peer = {
            let mut state = netif.data.lock().expect("data state poisoned");
            state.detach_peer(handle.peer_index)
        }
        .ok_or(HipError::UnknownPeer)?;
        let dropped = peer.buffered.len()
            + peer
                .reorder
                .iter()
                .flatten()
                .map(|w| w.pending_len())
                .sum::<usize>();
        for _ in 0..dropped {
            inc(&self.stats.buffered_dropped);
        }
        Ok(())
    }

    /// Spawns the hold-timer thread that flushes reorder windows whose gaps
    /// never filled. Flushed frames rejoin the data queue marked as already
    /// reordered.
    fn spawn_reaper(self: &Arc<Self>) {
        let mut slot = self.reaper.lock().expect("reaper slot poisoned");
        if slot.is_some() {
            return;
        }
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let stop_flag = Arc::clone(&stop);
        // Weak so the thread never keeps the core alive past its last
        // external handle.
        let core = Arc::downgrade(self);
        let tick = self.config.ba_tick;
        let handle = thread::Builder::new()
            .name("hip-ba".into())
            .spawn(move || {
                let (flag, wake) = &*stop_flag;
                loop {
                    // The flag guard is dropped before reaping: the upgraded
                    // handle below may be the last one, making this thread
                    // run the core's drop, which takes the flag lock again.
                    {
                        let stopped = flag.lock().expect("reaper flag poisoned");
                        let (stopped, _timeout) = wake
                            .wait_timeout(stopped, tick)
                            .expect("reaper flag poisoned");
                        if *stopped {
                            break;
                        }
                    }
                    let Some(core) = core.upgrade() else {
                        break;
                    };
                    core.reap_stalled_windows();
                }
            })
            .expect("failed to spawn hold-timer thread");
        *slot = Some(Reaper {
            stop,
            handle: Some(handle),
        });
    }

    fn reap_stalled_windows(&self) {
        let now = Instant::now();
        let hold = self.config.ba_hold;
        self.ifaces.for_each(|netif| {
            let mut flushed = Vec::new();
            {
                let mut state = netif.data.lock().expect("data state poisoned");
                for peer_index in 1..=MAX_PEERS as u16 {
                    let Some(peer) = state.peer_by_index(peer_index) else {
                        continue;
                    };
                    for tid in 0..NUM_TIDS {
                        if let Some(window) = peer.reorder[tid].as_mut() {
                            if window.is_stalled(hold, now) {
                                inc(&self.stats.ba_timeout_flush);
                                debug!(
                                    ifnum = netif.ifnum,
                                    peer_index,
                                    tid,
                                    "hold timer flushing stalled window"
                                );
                                window.flush(&mut |b| flushed.push(b));
                            }
                        }
                    }
                }
            }
            for buf in flushed {
                if netif.dat_q.push(buf).is_err() {
                    inc(&self.stats.dat_queue_full);
                }
            }
        });
    }

    fn stop_reaper(&self) {
        let reaper = self.reaper.lock().expect("reaper slot poisoned").take();
        if let Some(mut reaper) = reaper {
            reaper.stop();
        }
    }
}

impl Drop for HipCore {
    fn drop(&mut self) {
        self.stop_reaper();
        let mut ifnums = Vec::new();
        self.ifaces.for_each(|netif| ifnums.push(netif.ifnum));
        for ifnum in ifnums {
            if let Some(netif) = self.ifaces.remove(ifnum) {
                netif.shutdown();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fapi;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct MockTransport {
        versions: [u16; SapClass::COUNT],
        acquires: AtomicU64,
        releases: AtomicU64,
    }

    impl MockTransport {
        fn healthy() -> Arc<Self> {
            Arc::new(Self {
                versions: [
                    fapi::DATA_SAP_VERSION,
                    fapi::CONTROL_SAP_VERSION,
                    fapi::DEBUG_SAP_VERSION,
                    fapi::TEST_SAP_VERSION,
                ],
                acquires: AtomicU64::new(0),
                releases: AtomicU64::new(0),
            })
        }

        fn with_versions(versions: [u16; SapClass::COUNT]) -> Arc<Self> {
            Arc::new(Self {
                versions,
                acquires: AtomicU64::new(0),
                releases: AtomicU64::new(0),
            })
        }
    }

    impl Transport for MockTransport {
        fn acquire(&self) -> Result<(), HipError> {
            self.acquires.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn release(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }

        fn firmware_config(&self) -> Result<FirmwareConfig, HipError> {
            Ok(FirmwareConfig {
                sap_versions: self.versions,
            })
        }
    }

    struct NullStack;
    impl NetStack for NullStack {
        fn inject(&self, _ifnum: u16, _frame: &[u8]) {}
    }

    struct NullEvents;
    impl MlmeEvents for NullEvents {}

    struct NullFlow;
    impl FlowWatcher for NullFlow {}

    fn standard_core(transport: Arc<MockTransport>) -> Arc<HipCore> {
        HipCore::attach(
            transport,
            Arc::new(NullStack),
            Arc::new(NullEvents),
            Arc::new(NullFlow),
            None,
            HipConfig::default(),
        )
    }

    fn signal(id: u16) -> BytesMut {
        let mut data = BytesMut::zeroed(fapi::expected_signal_len(id).unwrap_or(10));
        data[0] = id as u8;
        data[1] = (id >> 8) as u8;
        data
    }

    #[test]
    fn dispatch_gated_until_started() {
        let core = standard_core(MockTransport::healthy());
        assert!(matches!(
            core.dispatch(signal(fapi::MA_UNITDATA_IND)),
            Err(HipError::NotReady)
        ));

        core.start().unwrap();
        assert_eq!(core.state(), LinkState::Started);
        core.register_interface(0, [2; 6], IfRole::Station).unwrap();
        core.dispatch(signal(fapi::MA_UNITDATA_IND)).unwrap();

        core.stop();
        assert!(matches!(
            core.dispatch(signal(fapi::MA_UNITDATA_IND)),
            Err(HipError::NotReady)
        ));
        assert!(matches!(core.tx_done(0), Err(HipError::NotReady)));
    }

    #[test]
    fn setup_requires_acquired_link() {
        let core = standard_core(MockTransport::healthy());
        assert!(matches!(core.setup(), Err(HipError::NotReady)));
        core.start().unwrap();
        core.setup().unwrap();
    }

    #[test]
    fn dropping_core_terminates_hold_timer() {
        let core = standard_core(MockTransport::healthy());
        core.start().unwrap();
        // Let the timer run at least one tick so a handle is live in flight.
        thread::sleep(Duration::from_millis(60));
        drop(core);
    }

    #[test]
    fn stop_before_start_leaves_link_restartable() {
        let core = standard_core(MockTransport::healthy());
        core.stop();
        assert_eq!(core.state(), LinkState::Stopped);
        core.start().unwrap();
        assert_eq!(core.state(), LinkState::Started);
    }

    #[test]
    fn start_is_idempotent() {
        let transport = MockTransport::healthy();
        let core = standard_core(Arc::clone(&transport));
        core.start().unwrap();
        core.start().unwrap();
        assert_eq!(transport.acquires.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn version_mismatch_is_all_or_nothing() {
        // Only the test class disagrees; the whole start must fail and the
        // transport must be released again.
        let transport = MockTransport::with_versions([
            fapi::DATA_SAP_VERSION,
            fapi::CONTROL_SAP_VERSION,
            fapi::DEBUG_SAP_VERSION,
            0x0c01,
        ]);
        let core = standard_core(Arc::clone(&transport));

        let err = core.start().unwrap_err();
        assert!(matches!(
            err,
            HipError::VersionMismatch {
                class: SapClass::Test,
                reported: 0x0c01
            }
        ));
        assert_eq!(core.state(), LinkState::Stopped);
        assert_eq!(transport.releases.load(Ordering::SeqCst), 1);
        assert!(matches!(
            core.dispatch(signal(fapi::MA_UNITDATA_IND)),
            Err(HipError::NotReady)
        ));
    }

    #[test]
    fn incomplete_registry_rejected_before_acquire() {
        let transport = MockTransport::healthy();
        let core = HipCore::with_registry(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::new(SapRegistry::new()),
            Arc::new(NetIfTable::new()),
            Arc::new(HipStats::default()),
            Arc::new(NullFlow),
            HipConfig::default(),
        );
        assert!(matches!(core.start(), Err(HipError::Unconfigured(_))));
        assert_eq!(transport.acquires.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_class_nibble_is_malformed() {
        let core = standard_core(MockTransport::healthy());
        core.start().unwrap();
        assert!(matches!(
            core.dispatch(signal(0x5000)),
            Err(HipError::MalformedFrame(_))
        ));
        assert_eq!(crate::netif::counter(&core.stats().bad_signal), 1);
    }

    #[test]
    fn stop_event_blocks_until_recover_and_restart() {
        let core = standard_core(MockTransport::healthy());
        core.start().unwrap();

        core.link_event(LinkEvent::Stop);
        assert_eq!(core.state(), LinkState::Blocked);
        assert!(matches!(core.start(), Err(HipError::NotReady)));

        core.link_event(LinkEvent::Recover);
        assert_eq!(core.state(), LinkState::Stopped);
        core.start().unwrap();
        assert_eq!(core.state(), LinkState::Started);
    }

    #[test]
    fn interface_lifecycle() {
        let core = standard_core(MockTransport::healthy());
        core.register_interface(1, [7; 6], IfRole::Ap).unwrap();
        assert!(matches!(
            core.register_interface(1, [8; 6], IfRole::Ap),
            Err(HipError::InterfaceExists(1))
        ));
        assert!(matches!(
            core.register_interface(9, [8; 6], IfRole::Ap),
            Err(HipError::UnknownInterface(9))
        ));

        let handle = core.peer_attach(1, [0xaa; 6]).unwrap();
        assert_eq!(handle.peer_index, 1);
        core.peer_connected(handle).unwrap();
        core.peer_detach(handle).unwrap();
        assert!(matches!(
            core.peer_detach(handle),
            Err(HipError::UnknownPeer)
        ));

        core.remove_interface(1).unwrap();
        assert!(matches!(
            core.remove_interface(1),
            Err(HipError::UnknownInterface(1))
        ));
    }

    #[test]
    fn credit_claim_round_trips_through_colour() {
        let core = standard_core(MockTransport::healthy());
        core.start().unwrap();
        core.register_interface(0, [2; 6], IfRole::Station).unwrap();
        let handle = core.peer_attach(0, [0xaa; 6]).unwrap();
        core.peer_connected(handle).unwrap();

        let colour = core.claim_tx_credit(0, handle.peer_index, 5).unwrap();
        assert_eq!(colour.vif, 0);
        assert_eq!(colour.peer_index, 1);
        assert_eq!(colour.ac, AccessCategory::Vi);

        // The echoed tag routes back to the same pool.
        core.tx_done(colour.encode()).unwrap();
    }
}
