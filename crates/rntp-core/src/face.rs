//! # Substrate seams
//!
//! The strategy never touches a socket or a PHY directly. It sends through
//! a two-port [`Face`] (`App`, the local producer/consumer application;
//! `NetDev`, the wireless link to neighbours) and trusts that whatever sits
//! behind it attaches a [`crate::types::PhyTag`] to every successfully
//! received packet and signs outbound Data through a [`KeyChain`]. None of
//! the three are implemented here — PHY simulation, packet signing and
//! wire I/O are all out of scope (§1 Non-goals) — but the core is written
//! against these traits so a real substrate can be plugged in without
//! touching `rntp-core`.

use crate::types::PhyTag;
use serde::{Deserialize, Serialize};

/// Which of a node's two ports a packet arrived on or should be sent from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Port {
    /// Local producer/consumer application.
    App,
    /// The wireless link to neighbours.
    NetDev,
}

/// A unit of outbound traffic: an NDN name plus (for Data) a payload.
///
/// `Serialize`/`Deserialize` let a substrate adapter round-trip these
/// through JSON (e.g. `rntp-node`'s stdin/stdout loop) without this crate
/// knowing anything about the transport carrying the bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outbound {
    Interest { name: String },
    Data { name: String, payload: Vec<u8> },
}

/// The two-port packet I/O boundary a strategy sends through.
pub trait Face {
    fn send(&mut self, port: Port, packet: Outbound);
}

/// Signs outbound Data. Payload authenticity is delegated (§1 Non-goals);
/// a real implementation wraps `ndn-cxx`'s `KeyChain` or similar.
pub trait KeyChain {
    fn sign(&mut self, packet: &mut Outbound);
}

/// No-op signer used by the in-memory harness and unit tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullKeyChain;

impl KeyChain for NullKeyChain {
    fn sign(&mut self, _packet: &mut Outbound) {}
}

/// Supplies the `(SNR, RSSI)` pair the PHY attached to the packet currently
/// being processed, if any. Every received packet that did not cross a
/// real radio (e.g. the in-memory harness) may report `None`, in which
/// case channel-quality updates are skipped for that receive.
pub trait PhyTagProvider {
    fn current_tag(&self) -> Option<PhyTag>;
}
