//! # rntp-core
//!
//! The per-node forwarding strategy for RNTP, a resilient NDN-style
//! transport for ad-hoc stationary wireless sensor meshes: route discovery
//! by broadcast flooding, per-hop capsule retry with window-based
//! congestion control, channel-quality-driven liveness tracking, and
//! consumer-side resequencing across multiple subpaths.
//!
//! [`node::Strategy`] is the actor at the centre of it: one instance per
//! node, driven entirely through the [`face::Face`]/[`face::KeyChain`]/
//! [`face::PhyTagProvider`] substrate seam and the [`scheduler::Scheduler`]
//! timer seam. Neither PHY/MAC simulation, NDN wire encoding below the name
//! level, nor packet signing live here — those are supplied by whatever
//! binary embeds this crate (`rntp-sim`'s in-memory harness, `rntp-node`'s
//! real daemon).
//!
//! ## Crate structure
//!
//! - [`node`] — [`node::Strategy`], the per-node actor, and [`node::NodeInfo`]
//! - [`config`] — loads the `NAME=VALUE` config file into a [`node::NodeInfo`]
//! - [`route`] — the route table: metric refresh, loop avoidance, rank lookup
//! - [`transport`] — per-(consumer, prefix) transport state and arrival classification
//! - [`congestion`] — slow-start/AIMD window control
//! - [`capsule_queue`] — the per-transport outbound capsule queue
//! - [`reseq`] — the consumer-side resequencing queue
//! - [`quality`] — channel-quality (SNR) smoothing and neighbour liveness
//! - [`throughput`] — packet inter-arrival-time estimation
//! - [`discovery`] — jittered InterestBroadcast flood construction
//! - [`echo`] — the one-hop liveness beacon
//! - [`messages`] — the NDN name codec for all five message kinds
//! - [`scheduler`] — the timer seam ([`scheduler::Event`], [`scheduler::Scheduler`])
//! - [`face`] — the packet I/O seam ([`face::Face`], [`face::KeyChain`], [`face::PhyTagProvider`])
//! - [`log`] — the per-node CSV log sinks
//! - [`types`] — shared constants and small value types
//! - [`error`] — decode errors

pub mod capsule_queue;
pub mod config;
pub mod congestion;
pub mod discovery;
pub mod echo;
pub mod error;
pub mod face;
pub mod log;
pub mod messages;
pub mod node;
pub mod quality;
pub mod reseq;
pub mod route;
pub mod scheduler;
pub mod throughput;
pub mod transport;
pub mod types;
