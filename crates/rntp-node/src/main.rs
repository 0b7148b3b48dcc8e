//! RNTP node daemon
//!
//! Loads a `NAME=VALUE` config file (§6), wires up one node's
//! [`rntp_core::node::Strategy`], and runs it against a substrate adapter
//! that reads inbound events as JSON lines on stdin and writes outbound
//! sends as JSON lines on stdout. Everything below the NDN name — PHY, MAC,
//! wire encoding, packet signing — is out of this crate's scope (and
//! `rntp-core`'s); this binary's only job is to be *a* substrate, not *the*
//! substrate, so a real radio stack can replace stdin/stdout without
//! touching `rntp-core` at all.
//!
//! Exit code `0` on clean termination (stdin closed); `1` on bad arguments
//! or an unreadable/malformed config file.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::Parser;
use rntp_core::config::SimConfig;
use rntp_core::face::{Face, KeyChain, NullKeyChain, Outbound, Port};
use rntp_core::log::LogSinks;
use rntp_core::messages::{self, DataMessage};
use rntp_core::node::Strategy;
use rntp_core::scheduler::{Scheduler, SimClock};
use rntp_core::types::NODE_NONE;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// RNTP node daemon — loads a config file and runs one node's forwarding strategy.
#[derive(Parser, Debug)]
#[command(name = "rntp-node", about = "RNTP node daemon")]
struct Cli {
    /// Path to the `NAME=VALUE` simulation config file.
    #[arg(long)]
    config: PathBuf,

    /// This node's ID.
    #[arg(long = "node-id")]
    node_id: u32,

    /// A producer prefix this node owns; may be repeated.
    #[arg(long = "prefix")]
    prefixes: Vec<String>,
}

/// One line of inbound substrate traffic, each carrying the simulated time
/// it occurs at so the node's own timers can be drained up to that point
/// before the event itself is handled.
#[derive(Debug, Deserialize)]
struct InboundLine {
    t: f64,
    #[serde(flatten)]
    event: InboundEvent,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum InboundEvent {
    /// The local application issuing a consumer Interest for `prefix`.
    Interest { prefix: String },
    /// A Data packet received over the air: `name` plus its raw payload
    /// (empty for Capsule/Echo, which carry none) and an optional SNR
    /// sample from the PHY tag.
    Data {
        name: String,
        #[serde(default)]
        payload: Vec<u8>,
        #[serde(default)]
        snr: Option<f64>,
    },
    /// Advance time with no packet of its own (keeps stdin simple for a
    /// substrate that only wants to flush due timers).
    Tick,
}

/// One line of outbound substrate traffic.
#[derive(Debug, Serialize)]
struct OutboundLine {
    port: Port,
    packet: Outbound,
}

/// Writes every send as one JSON line on stdout.
struct StdoutFace {
    out: io::Stdout,
}

impl Face for StdoutFace {
    fn send(&mut self, port: Port, packet: Outbound) {
        let line = OutboundLine { port, packet };
        match serde_json::to_string(&line) {
            Ok(text) => {
                let mut handle = self.out.lock();
                let _ = writeln!(handle, "{text}");
            }
            Err(e) => tracing::error!(error = %e, "failed to serialize outbound packet"),
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run() {
        tracing::error!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let sim_config = SimConfig::load(&cli.config)?;
    let node_info = sim_config.node_info(cli.node_id, cli.prefixes.clone());

    tracing::info!(node_id = cli.node_id, prefixes = ?cli.prefixes, "rntp-node starting");

    let mut sinks = LogSinks::open(std::path::Path::new(&node_info.log_dir))?;
    let mut strategy = Strategy::new(node_info);
    let mut sched = SimClock::new();
    let mut rng = rand::rng();
    let mut face = StdoutFace { out: io::stdout() };
    let mut keychain = NullKeyChain;

    strategy.schedule_first_echo(&mut sched, &mut rng);

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let inbound: InboundLine = serde_json::from_str(line)?;

        for (_, event) in sched.drain_due(inbound.t) {
            strategy.handle_event(event, &mut face, &mut keychain, &mut sched, &mut sinks);
        }

        match inbound.event {
            InboundEvent::Tick => {}
            InboundEvent::Interest { prefix } => {
                strategy.after_receive_interest(&prefix, NODE_NONE, &mut face, &mut keychain, &mut sched, &mut rng, &mut sinks);
            }
            InboundEvent::Data { name, payload, snr } => {
                dispatch_data(&mut strategy, &name, &payload, snr, &mut face, &mut keychain, &mut sched, &mut rng, &mut sinks);
            }
        }
    }

    tracing::info!("rntp-node stopped");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn dispatch_data(
    strategy: &mut Strategy,
    name: &str,
    payload: &[u8],
    snr: Option<f64>,
    face: &mut dyn Face,
    keychain: &mut dyn KeyChain,
    sched: &mut dyn Scheduler,
    rng: &mut impl rand::Rng,
    sinks: &mut LogSinks,
) {
    let consumer_node_id = messages::capsule_consumer_node_id(name).unwrap_or(NODE_NONE);
    match messages::decode_data(name, payload, consumer_node_id) {
        Ok(DataMessage::Capsule(msg)) => {
            strategy.on_receive_capsule(&msg, snr, face, keychain, sched, sinks);
        }
        Ok(DataMessage::CapsuleAck(msg)) => {
            strategy.on_receive_capsule_ack(&msg, snr, sched, sinks);
        }
        Ok(DataMessage::InterestBroadcast(msg)) => {
            strategy.on_receive_interest_broadcast(&msg, snr, face, keychain, sched, rng, sinks);
        }
        Ok(DataMessage::Echo(msg)) => {
            strategy.on_receive_echo(&msg, snr, sched, sinks);
        }
        Err(e) => {
            tracing::warn!(error = %e, name = %name, "dropping undecodable packet");
        }
    }
}
