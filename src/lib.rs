//! Host-interface dispatch layer for a split-MAC wireless adapter.
//!
//! The firmware on the adapter exchanges framed signals with the host over a
//! shared transport. This crate owns everything between the transport edge and
//! the host network stack: signal classification across the four service
//! classes, per-interface work queues with dedicated workers, the block-ack
//! reorder engine, AMSDU deaggregation, and colour-tagged transmit credit
//! accounting.
//!
//! Entry points: build a [`HipCore`] with [`HipCore::attach`], register
//! interfaces, then feed it inbound signals via [`HipCore::dispatch`] and
//! completion tags via [`HipCore::tx_done`].

pub mod ba;
pub mod fapi;
pub mod flow;
pub mod hip;
pub mod netif;
pub mod queue;
pub mod rx;
pub mod sap;
pub mod signal;

mod trace;

pub use flow::Colour;
pub use hip::{FirmwareConfig, HipConfig, HipCore, HipError, LinkState, Transport};
pub use netif::{
    DbgSink, FlowWatcher, HipStats, IfRole, MacAddr, MlmeEvents, NetStack, PeerHandle,
};
pub use sap::{LinkEvent, Sap, SapClass, SapRegistry};
pub use signal::SignalBuffer;
pub use trace::init_tracing;
