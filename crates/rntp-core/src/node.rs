//! # Node strategy
//!
//! [`NodeInfo`] is the per-node tunable-parameter bundle the config loader
//! builds (§3a); [`Strategy`] is the per-node actor that owns the route
//! table, channel-quality table, and every active transport, and
//! dispatches received packets to the right handler (§4.7, §4.8). It is
//! the direct analogue of the original's `RntpStrategy` class, minus the
//! process-wide static registries (§9): everything it needs is either a
//! field or a seam passed in by the caller.

use crate::capsule_queue::{CapsuleToSend, SendCode};
use crate::discovery::propagate_interests;
use crate::echo::EchoBeacon;
use crate::face::{Face, KeyChain, Outbound, Port};
use crate::log::{LogSinks, SinkKind};
use crate::messages::{self, CapsuleAckMsg, CapsuleMsg, CapsulePath, EchoMsg, InterestBroadcastMsg};
use crate::quality::QualityTable;
use crate::reseq::ResequenceQueue;
use crate::route::RouteTable;
use crate::scheduler::{Event, EventId, Scheduler};
use crate::transport::{self, SendCapState, TransportKey, TransportStates};
use crate::types::{CapsuleArrivalDirection, NODE_NONE};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-node tunable-parameter bundle loaded from the `NAME=VALUE` config
/// file (§6), plus the two fields that are genuinely per-node rather than
/// shared simulation-wide: `node_id` and `prefixes` (the producer
/// namespaces this node itself serves). See §3a for the fields the
/// original's PHY/topology/noise/energy config keys map to: they round-
/// trip through the loader so a full config file still parses, but the
/// core strategy never reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: u32,
    pub prefixes: Vec<String>,

    pub log_dir: String,

    // PHY parameters (§3a): loaded for config-format compatibility only.
    pub standard: String,
    pub data_mode: String,
    pub tx_power_start_in_dbm: f64,
    pub tx_power_end_in_dbm: f64,
    pub rx_gain_in_dbm: f64,

    // Topology (loaded, not consumed by the core).
    pub n_nodes: u32,
    pub grid_width_in_nodes: u32,
    pub grid_delta_x: f64,
    pub grid_delta_y: f64,
    pub consumer_node_id: u32,
    pub producer_node_id: u32,

    // Noise injection (loaded, not consumed by the core).
    pub noise: bool,
    pub node_ids_under_noises: Vec<u32>,
    pub noise_start_sec: f64,
    pub noise_stop_sec: f64,
    pub noise_mean: f64,
    pub noise_var: f64,

    pub sim_time_in_secs: f64,
    pub extension_time_in_secs: f64,

    pub capsule_per_hop_timeout: f64,
    pub capsule_retrying_times: u32,
    pub congestion_control_threshold: u32,
    pub congestion_control_init_win: u32,

    pub interest_send_times: u32,
    pub interest_contention_time_in_secs: f64,

    pub echo_period_in_secs: f64,
    pub msg_timeout_in_secs: f64,
    pub quality_alpha: f64,

    pub throughput_queue_size_in_secs: u32,
    pub piat_estimation_confident_ratio: f64,

    pub consumer_max_wait_time_in_secs: f64,
    pub consumer_need_to_terminate_transport: bool,
    pub consumer_terminate_transport_delay_in_secs: f64,

    pub producer_freq: u32,

    // Energy model (§3a): loaded, not consumed by the core.
    pub enegery_battery_capacity_in_mah: f64,
    pub enegery_battery_voltage_in_v: f64,
    pub trace_battery: bool,
}

/// Result of feeding one packet into [`Strategy`], for callers that need
/// to know whether a transport was just torn down, a value was delivered
/// to an application, etc. Most handlers only matter for their side
/// effects (sends, log lines); this return type surfaces the few things a
/// driving loop (an app stub, a test harness) might otherwise miss.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryEvent {
    CapsuleDeliveredToConsumer { prefix: String, data_id: u32 },
    TransportTerminated { prefix: String, consumer_id: u32 },
}

pub struct Strategy {
    pub node_info: NodeInfo,
    pub routes: RouteTable,
    pub quality: QualityTable,
    transports: HashMap<TransportKey, TransportStates>,
    /// Consumer resequencing queues, one per (prefix, consumerID) this
    /// node itself is the consumer for.
    reseq_queues: HashMap<TransportKey, ResequenceQueue<Vec<u8>>>,
    /// The single outstanding auto-dequeue timer per resequencing queue
    /// (§4.10 step 6: one timer per queue, always rescheduled to the
    /// oldest held arrival's expiry rather than one timer per arrival).
    consumer_dequeue_timers: HashMap<TransportKey, EventId>,
    /// Jittered InterestBroadcast copies (§4.8) waiting on their own
    /// per-copy delay timer, keyed by the shared nonce of the flood they
    /// belong to.
    pending_broadcasts: HashMap<u32, Vec<InterestBroadcastMsg>>,
    echo: EchoBeacon,
    echo_seqnum_log: u32,
}

impl Strategy {
    pub fn new(node_info: NodeInfo) -> Self {
        let quality = QualityTable::new(
            node_info.quality_alpha,
            node_info.throughput_queue_size_in_secs,
            node_info.piat_estimation_confident_ratio,
            node_info.msg_timeout_in_secs,
        );
        Self {
            node_info,
            routes: RouteTable::new(),
            quality,
            transports: HashMap::new(),
            reseq_queues: HashMap::new(),
            consumer_dequeue_timers: HashMap::new(),
            pending_broadcasts: HashMap::new(),
            echo: EchoBeacon::new(),
            echo_seqnum_log: 0,
        }
    }

    fn owns_prefix(&self, prefix: &str) -> bool {
        self.node_info.prefixes.iter().any(|p| p == prefix)
    }

    fn transport_mut(&mut self, prefix: &str, consumer_id: u32) -> Option<&mut TransportStates> {
        self.transports.get_mut(&transport::transport_key(prefix, consumer_id))
    }

    fn get_or_create_transport(&mut self, prefix: &str, consumer_id: u32) -> (&mut TransportStates, bool) {
        let key = transport::transport_key(prefix, consumer_id);
        let created = !self.transports.contains_key(&key);
        let ts = self.transports.entry(key).or_insert_with(|| {
            TransportStates::new(
                prefix,
                consumer_id,
                self.node_info.congestion_control_init_win,
                self.node_info.congestion_control_threshold,
            )
        });
        (ts, created)
    }

    // ─── Channel quality ────────────────────────────────────────────────

    /// `updateChannelQuality` (§4.3): smooths the sample, reschedules the
    /// neighbour's liveness timer, propagates into the route table, and
    /// (on every repeat sample, not just a genuine broken-to-alive
    /// transition — see `quality.rs`) wakes every transport whose routes
    /// include this neighbour.
    pub fn update_channel_quality(
        &mut self,
        from_node_id: u32,
        snr: f64,
        sched: &mut dyn Scheduler,
        sinks: &mut LogSinks,
    ) {
        let now = sched.now();
        let outcome = self.quality.update(from_node_id, snr, now);

        if let Some(old_timer) = self.quality.take_timer(from_node_id) {
            sched.cancel(old_timer);
        }
        let timer = sched.schedule(outcome.liveness_timeout, Event::NeighborTimeout { from_node_id });
        self.quality.set_timer(from_node_id, timer);

        self.routes.update_routes_with_quality(from_node_id, self.node_info.node_id, outcome.smoothed_quality);
        sinks.write_line(
            SinkKind::CqUpdate,
            &format!("{},{},r,{},{}", self.node_info.node_id, now, from_node_id, outcome.smoothed_quality),
        );

        if outcome.is_repeat_sample {
            for ts in self.transports.values_mut() {
                let neighbors = self.routes.neighbored_ids_in_routes();
                if neighbors.contains(&from_node_id) {
                    ts.congestion.on_channel_waken();
                }
            }
        }
    }

    /// Neighbour liveness timer fired: mark the link broken everywhere it
    /// appears in the route table.
    pub fn on_neighbor_timeout(&mut self, from_node_id: u32, sched: &dyn Scheduler, sinks: &mut LogSinks) {
        self.quality.mark_broken(from_node_id);
        self.routes.update_routes_with_quality(from_node_id, self.node_info.node_id, crate::types::QUALITY_BROKEN);
        sinks.write_line(
            SinkKind::CqUpdate,
            &format!("{},{},r,{},{}", self.node_info.node_id, sched.now(), from_node_id, crate::types::QUALITY_BROKEN),
        );
    }

    // ─── Echo beacon ────────────────────────────────────────────────────

    pub fn schedule_first_echo(&mut self, sched: &mut dyn Scheduler, rng: &mut impl Rng) {
        let delay = EchoBeacon::initial_delay(self.node_info.echo_period_in_secs, rng);
        sched.schedule(delay, Event::EchoTick);
    }

    pub fn send_echo(&mut self, face: &mut dyn Face, keychain: &mut dyn KeyChain, sched: &mut dyn Scheduler, sinks: &mut LogSinks) {
        let seq_num = self.echo.next_seq();
        self.echo_seqnum_log = seq_num;
        let msg = EchoMsg { namespace: self.node_info.prefixes.first().cloned().unwrap_or_default(), source_node_id: self.node_info.node_id, seq_num };
        let name = messages::encode_echo(&msg);
        let mut packet = Outbound::Data { name, payload: Vec::new() };
        keychain.sign(&mut packet);
        face.send(Port::NetDev, packet);
        sinks.write_line(
            SinkKind::MsgEcho,
            &format!("{},{},-1,s,{},{}", self.node_info.node_id, sched.now(), msg.source_node_id, msg.seq_num),
        );
        sched.schedule(self.node_info.echo_period_in_secs, Event::EchoTick);
    }

    // ─── Receiving Echo ─────────────────────────────────────────────────

    pub fn on_receive_echo(&mut self, msg: &EchoMsg, snr: Option<f64>, sched: &mut dyn Scheduler, sinks: &mut LogSinks) {
        sinks.write_line(
            SinkKind::MsgEcho,
            &format!("{},{},{},r,{},{}", self.node_info.node_id, sched.now(), snr.unwrap_or(-1.0), msg.source_node_id, msg.seq_num),
        );
        if let Some(snr) = snr {
            self.update_channel_quality(msg.source_node_id, snr, sched, sinks);
        }
    }

    // ─── Event dispatch ──────────────────────────────────────────────────

    /// Single entry point for everything a [`Scheduler`] hands back: the
    /// driving loop (an app stub, the in-memory harness, `rntp-node`'s own
    /// substrate adapter) doesn't need to know which handler a timer maps
    /// to, only that a fired [`Event`] goes here.
    pub fn handle_event(
        &mut self,
        event: Event,
        face: &mut dyn Face,
        keychain: &mut dyn KeyChain,
        sched: &mut dyn Scheduler,
        sinks: &mut LogSinks,
    ) -> Vec<DeliveryEvent> {
        match event {
            Event::CapsuleRetry { prefix, consumer_id, data_id } => {
                self.on_capsule_retry_timeout(&prefix, consumer_id, data_id, face, keychain, sched, sinks);
                Vec::new()
            }
            Event::NeighborTimeout { from_node_id } => {
                self.on_neighbor_timeout(from_node_id, sched, sinks);
                Vec::new()
            }
            Event::EchoTick => {
                self.send_echo(face, keychain, sched, sinks);
                Vec::new()
            }
            Event::InterestBroadcastSend { nonce } => {
                self.on_interest_broadcast_send(nonce, face, keychain, sched, sinks);
                Vec::new()
            }
            Event::ConsumerAutoDequeue { prefix, consumer_id } => self.on_consumer_auto_dequeue(&prefix, consumer_id, sched),
        }
    }

    // ─── Receiving an Interest from the local app ───────────────────────

    /// §4.7 "On Interest": forwards to the app if this node owns the
    /// prefix; otherwise, if this is a fresh bootstrap from a local
    /// consumer (`consumer_node_id == NODE_NONE`), starts discovery.
    #[allow(clippy::too_many_arguments)]
    pub fn after_receive_interest(
        &mut self,
        prefix: &str,
        consumer_node_id: u32,
        face: &mut dyn Face,
        keychain: &mut dyn KeyChain,
        sched: &mut dyn Scheduler,
        rng: &mut impl Rng,
        sinks: &mut LogSinks,
    ) {
        if self.owns_prefix(prefix) {
            let mut packet = Outbound::Interest { name: prefix.to_string() };
            keychain.sign(&mut packet);
            face.send(Port::App, packet);
            return;
        }
        if consumer_node_id != NODE_NONE {
            return;
        }
        let (_, created) = self.get_or_create_transport(prefix, self.node_info.node_id);
        if !created {
            return;
        }
        self.propagate_and_send(
            prefix,
            0,
            self.node_info.node_id,
            self.node_info.node_id,
            false,
            vec![self.node_info.node_id],
            vec![],
            face,
            keychain,
            sched,
            rng,
            sinks,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn propagate_and_send(
        &mut self,
        prefix: &str,
        hop_count: u32,
        consumer_node_id: u32,
        trans_hop_node_id: u32,
        end: bool,
        visited: Vec<u32>,
        qualities: Vec<f64>,
        face: &mut dyn Face,
        keychain: &mut dyn KeyChain,
        sched: &mut dyn Scheduler,
        rng: &mut impl Rng,
        sinks: &mut LogSinks,
    ) {
        let plan = propagate_interests(
            prefix,
            hop_count,
            consumer_node_id,
            trans_hop_node_id,
            end,
            visited,
            qualities,
            self.node_info.interest_send_times,
            self.node_info.interest_contention_time_in_secs,
            rng,
        );
        for (delay, msg) in plan.sends {
            if delay <= 0.0 {
                self.emit_interest_broadcast(&msg, face, keychain, sched, sinks);
            } else {
                let nonce = msg.nonce;
                self.pending_broadcasts.entry(nonce).or_default().push(msg);
                sched.schedule(delay, Event::InterestBroadcastSend { nonce });
            }
        }
    }

    /// A jittered copy's own timer fired: emit one still-pending copy of
    /// this nonce's flood, if any remain (a prior copy may already have
    /// been sent with `delay == 0`, or by an earlier-firing sibling timer).
    fn on_interest_broadcast_send(&mut self, nonce: u32, face: &mut dyn Face, keychain: &mut dyn KeyChain, sched: &dyn Scheduler, sinks: &mut LogSinks) {
        let msg = match self.pending_broadcasts.get_mut(&nonce) {
            Some(list) => list.pop(),
            None => None,
        };
        if self.pending_broadcasts.get(&nonce).map(|l| l.is_empty()).unwrap_or(false) {
            self.pending_broadcasts.remove(&nonce);
        }
        if let Some(msg) = msg {
            self.emit_interest_broadcast(&msg, face, keychain, sched, sinks);
        }
    }

    fn emit_interest_broadcast(&self, msg: &InterestBroadcastMsg, face: &mut dyn Face, keychain: &mut dyn KeyChain, sched: &dyn Scheduler, sinks: &mut LogSinks) {
        let (name, payload) = messages::encode_interest_broadcast(msg);
        let mut packet = Outbound::Data { name, payload };
        keychain.sign(&mut packet);
        face.send(Port::NetDev, packet);
        let dir = if !msg.end { "s" } else { "t" };
        sinks.write_line(
            SinkKind::MsgInterestBroadcast,
            &format!(
                "{},{},-1,{},{},{},{},{},{},{}",
                self.node_info.node_id,
                sched.now(),
                dir,
                msg.consumer_node_id,
                msg.trans_hop_node_id,
                msg.producer_prefix,
                msg.hop_count,
                msg.nonce,
                msg.visited_node_ids.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("|"),
            ),
        );
    }

    // ─── Receiving an InterestBroadcast ─────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub fn on_receive_interest_broadcast(
        &mut self,
        msg: &InterestBroadcastMsg,
        snr: Option<f64>,
        face: &mut dyn Face,
        keychain: &mut dyn KeyChain,
        sched: &mut dyn Scheduler,
        rng: &mut impl Rng,
        sinks: &mut LogSinks,
    ) -> Vec<DeliveryEvent> {
        let mut events = Vec::new();
        sinks.write_line(
            SinkKind::MsgInterestBroadcast,
            &format!(
                "{},{},{},r,{},{},{},{},{},{}",
                self.node_info.node_id,
                sched.now(),
                snr.unwrap_or(-1.0),
                msg.consumer_node_id,
                msg.trans_hop_node_id,
                msg.producer_prefix,
                msg.hop_count,
                msg.nonce,
                msg.visited_node_ids.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("|"),
            ),
        );
        if let Some(snr) = snr {
            self.update_channel_quality(msg.trans_hop_node_id, snr, sched, sinks);
        }

        let self_id = self.node_info.node_id;
        let key = transport::transport_key(&msg.producer_prefix, msg.consumer_node_id);

        if msg.end {
            if self.transports.remove(&key).is_some() {
                events.push(DeliveryEvent::TransportTerminated { prefix: msg.producer_prefix.clone(), consumer_id: msg.consumer_node_id });
                let mut visited = msg.visited_node_ids.clone();
                visited.push(self_id);
                self.propagate_and_send(
                    &msg.producer_prefix,
                    0,
                    msg.consumer_node_id,
                    self_id,
                    true,
                    visited,
                    vec![],
                    face,
                    keychain,
                    sched,
                    rng,
                    sinks,
                );
            }
            return events;
        }

        if msg.consumer_node_id == self_id {
            return events; // echo of our own wave
        }

        if self.owns_prefix(&msg.producer_prefix) {
            let mut visited = msg.visited_node_ids.clone();
            visited.push(self_id);
            let mut qualities = msg.channel_qualities.clone();
            if let Some(q) = self.quality.get(msg.trans_hop_node_id) {
                qualities.push(q.quality_smooth);
            }
            self.routes.add_route(&msg.producer_prefix, msg.consumer_node_id, msg.hop_count + 1, visited.clone(), qualities, sched.now());
            self.get_or_create_transport(&msg.producer_prefix, msg.consumer_node_id);

            let mut packet = Outbound::Interest { name: msg.producer_prefix.clone() };
            keychain.sign(&mut packet);
            face.send(Port::App, packet);
            return events;
        }

        if msg.visited_node_ids.contains(&self_id) {
            return events; // already visited this wave
        }

        let mut visited = msg.visited_node_ids.clone();
        visited.push(self_id);
        let mut qualities = msg.channel_qualities.clone();
        if let Some(q) = self.quality.get(msg.trans_hop_node_id) {
            qualities.push(q.quality_smooth);
        }
        self.routes.add_route(&msg.producer_prefix, msg.consumer_node_id, msg.hop_count + 1, visited.clone(), qualities.clone(), sched.now());
        self.get_or_create_transport(&msg.producer_prefix, msg.consumer_node_id);

        self.propagate_and_send(
            &msg.producer_prefix,
            msg.hop_count + 1,
            msg.consumer_node_id,
            self_id,
            false,
            visited,
            qualities,
            face,
            keychain,
            sched,
            rng,
            sinks,
        );
        events
    }

    // ─── Sending a capsule (producer / intermediate) ────────────────────

    /// `sendCapsuleViaQueue`: enqueue (or ack-and-drop a duplicate) then
    /// drain up to `window` elements.
    #[allow(clippy::too_many_arguments)]
    pub fn send_capsule_via_queue(
        &mut self,
        prefix: &str,
        consumer_id: u32,
        data_id: u32,
        node_ids: Vec<u32>,
        code: SendCode,
        face: &mut dyn Face,
        keychain: &mut dyn KeyChain,
        sched: &mut dyn Scheduler,
        sinks: &mut LogSinks,
    ) {
        let self_id = self.node_info.node_id;
        let key = transport::transport_key(prefix, consumer_id);
        let Some(ts) = self.transports.get_mut(&key) else { return };

        if ts.capsule_queue.contains(data_id) {
            self.send_capsule_ack(prefix, consumer_id, data_id, &node_ids, face, keychain, sched, sinks);
            return;
        }

        ts.capsule_queue.push(CapsuleToSend { data_id, node_ids: node_ids.clone(), payload: Vec::new(), n_times_retried: 0, code, hidden: false });
        sinks.write_line(SinkKind::Buffer, &ts.capsule_queue.log_line(self_id, sched.now()));

        let sent_any = self.drain_send_queue(prefix, consumer_id, face, keychain, sched, sinks);
        if !sent_any && !node_ids.is_empty() {
            self.send_capsule_ack(prefix, consumer_id, data_id, &node_ids, face, keychain, sched, sinks);
        }
    }

    /// `sendCapsulesInQueue`: pops up to `window` non-hidden elements and
    /// starts their retry FSM; stops early once the queue is empty.
    fn drain_send_queue(&mut self, prefix: &str, consumer_id: u32, face: &mut dyn Face, keychain: &mut dyn KeyChain, sched: &mut dyn Scheduler, sinks: &mut LogSinks) -> bool {
        let key = transport::transport_key(prefix, consumer_id);
        let window = match self.transports.get(&key) {
            Some(ts) => ts.congestion.window.max(0) as u32,
            None => return false,
        };
        let mut sent_any = false;
        for _ in 0..window {
            let Some(ts) = self.transports.get_mut(&key) else { break };
            let Some(front) = ts.capsule_queue.front() else { break };
            let data_id = front.data_id;
            ts.capsule_queue.transiently_pop_front();
            ts.send_cap_states.entry(data_id).or_insert_with(SendCapState::new);
            self.send_capsule_iterative(prefix, consumer_id, data_id, 0, face, keychain, sched, sinks);
            sent_any = true;
        }
        sent_any
    }

    /// `sendCapsuleIterative` (§4.7): one attempt at sending a queued
    /// capsule along the best currently-viable route, with a self-
    /// rescheduling retry on timeout.
    #[allow(clippy::too_many_arguments)]
    pub fn send_capsule_iterative(
        &mut self,
        prefix: &str,
        consumer_id: u32,
        data_id: u32,
        n_times_retried: u32,
        face: &mut dyn Face,
        keychain: &mut dyn KeyChain,
        sched: &mut dyn Scheduler,
        sinks: &mut LogSinks,
    ) {
        let self_id = self.node_info.node_id;
        let key = transport::transport_key(prefix, consumer_id);
        let Some(ts) = self.transports.get(&key) else { return }; // torn down meanwhile

        let Some(element) = ts.capsule_queue.front().filter(|e| e.data_id == data_id).or_else(|| {
            ts.capsule_queue.front()
        }) else { return };
        let current_node_ids = element.node_ids.clone();

        let route = self
            .routes
            .match_route(consumer_id, prefix, &current_node_ids)
            .cloned()
            .or_else(|| {
                let rank = if n_times_retried > 0 { n_times_retried } else { 0 };
                self.routes.lookup_route(consumer_id, prefix, self_id, Some(&current_node_ids), rank).cloned()
            });

        let max_retries = self.node_info.capsule_retrying_times;
        let Some(ts) = self.transports.get_mut(&key) else { return };

        if route.is_none() || n_times_retried >= max_retries {
            ts.capsule_queue.restore(data_id, n_times_retried + 1, SendCode::ForRetrying);
            ts.congestion.on_ack_timeout(route.is_some());
            sinks.write_line(SinkKind::Buffer, &ts.capsule_queue.log_line(self_id, sched.now()));
            let reason = if route.is_none() { "NoRoute" } else { "ExceedMaxRetryingTime" };
            sinks.write_line(SinkKind::CongestionControl, &ts.congestion.log_line(self_id, sched.now(), reason, ts.capsule_queue.count_elements()));
            return;
        }
        let route = route.unwrap();
        let next_hop_id = transport::next_hop(&route.node_ids, self_id);

        let Some(nh) = next_hop_id else { return };
        if ts.already_sent(data_id, nh) {
            ts.capsule_queue.remove(data_id);
            ts.send_cap_states.remove(&data_id);
            self.send_capsule_ack(prefix, consumer_id, data_id, &route.node_ids, face, keychain, sched, sinks);
            return;
        }

        let pivoted_node_ids = route.node_ids.clone();
        let downstream = transport::downstream_nodes(&pivoted_node_ids, self_id);
        if let Some(state) = ts.send_cap_states.get_mut(&data_id) {
            state.downstream_node_ids.extend(downstream);
            state.send_times += 1;
        }
        ts.mark_sent(data_id, nh);

        let path = CapsulePath { nonce: rand_nonce(), trans_hop_node_id: self_id, node_ids: pivoted_node_ids.clone(), n_hops: route.n_hops };
        let capsule = CapsuleMsg { prefix: prefix.to_string(), data_id, path: Some(path), consumer_node_id: consumer_id };
        let name = messages::encode_capsule(&capsule);
        let mut packet = Outbound::Data { name, payload: Vec::new() };
        keychain.sign(&mut packet);
        face.send(Port::NetDev, packet);

        sinks.write_line(
            SinkKind::MsgCapsule,
            &format!(
                "{},{},-1,s,{},{},{},{},{}",
                self_id,
                sched.now(),
                self_id,
                prefix,
                data_id,
                pivoted_node_ids.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("|"),
                route.n_hops
            ),
        );

        let event_id = sched.schedule(
            self.node_info.capsule_per_hop_timeout,
            Event::CapsuleRetry { prefix: prefix.to_string(), consumer_id, data_id },
        );
        if let Some(ts) = self.transports.get_mut(&key) {
            if let Some(state) = ts.send_cap_states.get_mut(&data_id) {
                state.send_event_id = Some(event_id);
            }
        }
    }

    /// Retry timer fired: re-invoke the iterative sender with the next
    /// retry count.
    #[allow(clippy::too_many_arguments)]
    pub fn on_capsule_retry_timeout(
        &mut self,
        prefix: &str,
        consumer_id: u32,
        data_id: u32,
        face: &mut dyn Face,
        keychain: &mut dyn KeyChain,
        sched: &mut dyn Scheduler,
        sinks: &mut LogSinks,
    ) {
        let key = transport::transport_key(prefix, consumer_id);
        let Some(ts) = self.transports.get(&key) else { return };
        let n_times_retried = ts.send_cap_states.get(&data_id).map(|s| s.send_times).unwrap_or(0);
        self.send_capsule_iterative(prefix, consumer_id, data_id, n_times_retried, face, keychain, sched, sinks);
    }

    // ─── Receiving a Capsule ─────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub fn on_receive_capsule(
        &mut self,
        msg: &CapsuleMsg,
        snr: Option<f64>,
        face: &mut dyn Face,
        keychain: &mut dyn KeyChain,
        sched: &mut dyn Scheduler,
        sinks: &mut LogSinks,
    ) -> Vec<DeliveryEvent> {
        let mut events = Vec::new();
        let self_id = self.node_info.node_id;
        let node_ids: Vec<u32> = msg.path.as_ref().map(|p| p.node_ids.clone()).unwrap_or_default();
        let trans_hop = msg.path.as_ref().map(|p| p.trans_hop_node_id).unwrap_or(NODE_NONE);
        let n_hops = msg.path.as_ref().map(|p| p.n_hops).unwrap_or(0);

        sinks.write_line(
            SinkKind::MsgCapsule,
            &format!(
                "{},{},{},r,{},{},{},{},{}",
                self_id,
                sched.now(),
                snr.unwrap_or(-1.0),
                trans_hop,
                msg.prefix,
                msg.data_id,
                node_ids.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("|"),
                n_hops
            ),
        );
        if let Some(snr) = snr {
            self.update_channel_quality(trans_hop, snr, sched, sinks);
        }

        let key = transport::transport_key(&msg.prefix, msg.consumer_node_id);
        if !self.transports.contains_key(&key) {
            return events; // no transport: drop
        }
        if msg.consumer_node_id == NODE_NONE {
            return events;
        }

        let has_any_route = self.routes.groups().iter().any(|g| g.consumer_node_id == msg.consumer_node_id && g.producer_prefix == msg.prefix);
        let direction = transport::check_capsule_arrival_direction(&node_ids, self_id, trans_hop, has_any_route);

        if msg.consumer_node_id == self_id {
            let is_dup = self
                .transport_mut(&msg.prefix, msg.consumer_node_id)
                .map(|ts| ts.already_sent(msg.data_id, trans_hop))
                .unwrap_or(true);
            if !is_dup {
                if let Some(ts) = self.transport_mut(&msg.prefix, msg.consumer_node_id) {
                    ts.mark_sent(msg.data_id, trans_hop);
                }
                let now = sched.now();
                let delivered = self.consumer_receive(&msg.prefix, msg.consumer_node_id, msg.data_id, now, Vec::new());
                for (data_id, _payload) in delivered {
                    events.push(DeliveryEvent::CapsuleDeliveredToConsumer { prefix: msg.prefix.clone(), data_id });
                }
                self.reschedule_consumer_auto_dequeue(&msg.prefix, msg.consumer_node_id, sched);
            }
            self.send_capsule_ack(&msg.prefix, msg.consumer_node_id, msg.data_id, &node_ids, face, keychain, sched, sinks);
            return events;
        }

        match direction {
            Some(CapsuleArrivalDirection::FromDownstream) => {
                self.deal_with_ack(&msg.prefix, msg.consumer_node_id, msg.data_id, trans_hop, sched, sinks);
            }
            Some(CapsuleArrivalDirection::FromProducer) | Some(CapsuleArrivalDirection::FromUpstream) => {
                let code = if node_ids.is_empty() { SendCode::FromProducer } else { SendCode::FromPreviousHop };
                self.send_capsule_via_queue(&msg.prefix, msg.consumer_node_id, msg.data_id, node_ids, code, face, keychain, sched, sinks);
            }
            None => {}
        }
        events
    }

    // ─── Ack bookkeeping ─────────────────────────────────────────────────

    fn send_capsule_ack(
        &mut self,
        prefix: &str,
        consumer_id: u32,
        data_id: u32,
        node_ids: &[u32],
        face: &mut dyn Face,
        keychain: &mut dyn KeyChain,
        sched: &dyn Scheduler,
        sinks: &mut LogSinks,
    ) {
        let self_id = self.node_info.node_id;
        let downstream_node_id = transport::next_hop(node_ids, self_id).unwrap_or(NODE_NONE);
        let upstream_node_ids: Vec<u32> = node_ids.iter().skip_while(|&&id| id != self_id).skip(1).copied().collect();

        let ack = CapsuleAckMsg {
            prefix: prefix.to_string(),
            downstream_node_id,
            upstream_node_ids,
            trans_hop_node_id: self_id,
            consumer_node_id: consumer_id,
            data_ids_received: vec![data_id],
        };
        let (name, payload) = messages::encode_capsule_ack(&ack);
        let mut packet = Outbound::Data { name, payload };
        keychain.sign(&mut packet);
        face.send(Port::NetDev, packet);

        sinks.write_line(
            SinkKind::MsgCapAck,
            &format!(
                "{},{},-1,s,{},{},{},{},{}",
                self_id,
                sched.now(),
                ack.consumer_node_id,
                ack.upstream_node_ids.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("-"),
                ack.downstream_node_id,
                ack.prefix,
                data_id
            ),
        );
    }

    /// `dealWithAck`: the implicit-ack path taken when a capsule is seen
    /// arriving from downstream (it already made it past us once).
    fn deal_with_ack(&mut self, prefix: &str, consumer_id: u32, data_id: u32, downstream_node_id: u32, sched: &mut dyn Scheduler, sinks: &mut LogSinks) {
        let self_id = self.node_info.node_id;
        let key = transport::transport_key(prefix, consumer_id);
        let Some(ts) = self.transports.get_mut(&key) else { return };

        let Some(state) = ts.send_cap_states.get(&data_id) else { return };
        if !state.downstream_node_ids.contains(&downstream_node_id) {
            return;
        }
        if ts.already_sent(data_id, downstream_node_id) {
            // duplicate ack: credited once, never again, but still recorded.
            ts.mark_sent(data_id, downstream_node_id);
            return;
        }
        ts.mark_sent(data_id, downstream_node_id);

        ts.congestion.on_ack_received();
        sinks.write_line(SinkKind::CongestionControl, &ts.congestion.log_line(self_id, sched.now(), "AckReceived", ts.capsule_queue.count_elements()));

        if let Some(mut state) = ts.send_cap_states.remove(&data_id) {
            if let Some(event_id) = state.send_event_id.take() {
                sched.cancel(event_id);
            }
        }
        ts.capsule_queue.remove(data_id);
        sinks.write_line(SinkKind::Buffer, &ts.capsule_queue.log_line(self_id, sched.now()));
    }

    // ─── Receiving a CapsuleAck ──────────────────────────────────────────

    pub fn on_receive_capsule_ack(&mut self, msg: &CapsuleAckMsg, snr: Option<f64>, sched: &mut dyn Scheduler, sinks: &mut LogSinks) {
        let self_id = self.node_info.node_id;
        sinks.write_line(
            SinkKind::MsgCapAck,
            &format!(
                "{},{},{},r,{},{},{},{},{}",
                self_id,
                sched.now(),
                snr.unwrap_or(-1.0),
                msg.consumer_node_id,
                msg.upstream_node_ids.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("-"),
                msg.downstream_node_id,
                msg.prefix,
                msg.data_id(),
            ),
        );
        if let Some(snr) = snr {
            self.update_channel_quality(msg.downstream_node_id, snr, sched, sinks);
        }
        if !msg.upstream_node_ids.contains(&self_id) {
            return;
        }
        let Some(&data_id) = msg.data_ids_received.first() else { return };
        self.deal_with_ack(&msg.prefix, msg.consumer_node_id, data_id, msg.downstream_node_id, sched, sinks);
    }

    pub fn transport_count_elements(&self, prefix: &str, consumer_id: u32) -> Option<usize> {
        self.transports.get(&transport::transport_key(prefix, consumer_id)).map(|ts| ts.capsule_queue.count_elements())
    }

    /// Every consumerID this node currently holds an active transport for
    /// `prefix`. A producer app stub (§6, `PRODUCER_FREQ`) watches for its
    /// own prefix to arrive on [`crate::face::Port::App`] and uses this to
    /// learn which consumers it should start pushing capsules to.
    pub fn active_consumers_for_prefix(&self, prefix: &str) -> Vec<u32> {
        self.transports.keys().filter(|(p, _)| p == prefix).map(|(_, c)| *c).collect()
    }

    // ─── Consumer resequencing ──────────────────────────────────────────

    /// Feeds one delivered capsule through this consumer's resequencing
    /// queue, returning everything now deliverable in order (§4.10).
    pub fn consumer_receive(&mut self, prefix: &str, consumer_id: u32, data_id: u32, now: f64, payload: Vec<u8>) -> Vec<(u32, Vec<u8>)> {
        let key = transport::transport_key(prefix, consumer_id);
        let size = 2000usize;
        let max_wait = self.node_info.consumer_max_wait_time_in_secs;
        let q = self.reseq_queues.entry(key).or_insert_with(|| ResequenceQueue::new(size, max_wait));
        q.receive(data_id, now, payload)
    }

    pub fn consumer_auto_dequeue(&mut self, prefix: &str, consumer_id: u32, now: f64) -> Vec<(u32, Vec<u8>)> {
        let key = transport::transport_key(prefix, consumer_id);
        match self.reseq_queues.get_mut(&key) {
            Some(q) => q.release(now),
            None => Vec::new(),
        }
    }

    /// Cancels this queue's outstanding auto-dequeue timer, if any, and
    /// reschedules it against the (possibly new) oldest held arrival.
    fn reschedule_consumer_auto_dequeue(&mut self, prefix: &str, consumer_id: u32, sched: &mut dyn Scheduler) {
        let key = transport::transport_key(prefix, consumer_id);
        if let Some(old) = self.consumer_dequeue_timers.remove(&key) {
            sched.cancel(old);
        }
        let now = sched.now();
        if let Some(delay) = self.reseq_queues.get(&key).and_then(|q| q.next_auto_dequeue_delay(now)) {
            let id = sched.schedule(delay, Event::ConsumerAutoDequeue { prefix: prefix.to_string(), consumer_id });
            self.consumer_dequeue_timers.insert(key, id);
        }
    }

    /// The queue's own auto-dequeue timer fired: force-release whatever
    /// has aged past `consumer_max_wait_time_in_secs`, then reschedule for
    /// the next-oldest holder (§4.10 step 6).
    fn on_consumer_auto_dequeue(&mut self, prefix: &str, consumer_id: u32, sched: &mut dyn Scheduler) -> Vec<DeliveryEvent> {
        let key = transport::transport_key(prefix, consumer_id);
        self.consumer_dequeue_timers.remove(&key);
        let now = sched.now();
        let delivered = self.consumer_auto_dequeue(prefix, consumer_id, now);
        let events = delivered
            .into_iter()
            .map(|(data_id, _payload)| DeliveryEvent::CapsuleDeliveredToConsumer { prefix: prefix.to_string(), data_id })
            .collect();
        self.reschedule_consumer_auto_dequeue(prefix, consumer_id, sched);
        events
    }
}

fn rand_nonce() -> u32 {
    // per-send nonces need no cryptographic strength, just uniqueness
    // across concurrently in-flight capsules; a thread-local RNG avoids
    // threading one more parameter through every send call.
    rand::random()
}

impl CapsuleAckMsg {
    fn data_id(&self) -> String {
        self.data_ids_received.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("|")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn test_node_info(node_id: u32) -> NodeInfo {
        NodeInfo {
            node_id,
            prefixes: vec![],
            log_dir: "/tmp/rntp-test".into(),
            standard: "802.11b".into(),
            data_mode: "DsssRate1Mbps".into(),
            tx_power_start_in_dbm: 16.0,
            tx_power_end_in_dbm: 16.0,
            rx_gain_in_dbm: 0.0,
            n_nodes: 3,
            grid_width_in_nodes: 3,
            grid_delta_x: 10.0,
            grid_delta_y: 10.0,
            consumer_node_id: 0,
            producer_node_id: 2,
            noise: false,
            node_ids_under_noises: vec![],
            noise_start_sec: 0.0,
            noise_stop_sec: 0.0,
            noise_mean: 0.0,
            noise_var: 0.0,
            sim_time_in_secs: 100.0,
            extension_time_in_secs: 10.0,
            capsule_per_hop_timeout: 1.0,
            capsule_retrying_times: 3,
            congestion_control_threshold: 16,
            congestion_control_init_win: 1,
            interest_send_times: 2,
            interest_contention_time_in_secs: 0.1,
            echo_period_in_secs: 5.0,
            msg_timeout_in_secs: 5.0,
            quality_alpha: 0.125,
            throughput_queue_size_in_secs: 10,
            piat_estimation_confident_ratio: 0.9999,
            consumer_max_wait_time_in_secs: 2.0,
            consumer_need_to_terminate_transport: false,
            consumer_terminate_transport_delay_in_secs: 0.0,
            producer_freq: 10,
            enegery_battery_capacity_in_mah: 0.0,
            enegery_battery_voltage_in_v: 0.0,
            trace_battery: false,
        }
    }

    #[test]
    fn owns_prefix_matches_configured_prefixes() {
        let mut info = test_node_info(2);
        info.prefixes.push("/sensors/node2".into());
        let s = Strategy::new(info);
        assert!(s.owns_prefix("/sensors/node2"));
        assert!(!s.owns_prefix("/sensors/other"));
    }

    #[test]
    fn consumer_resequencing_delivers_in_order() {
        let mut s = Strategy::new(test_node_info(0));
        let delivered = s.consumer_receive("/p", 0, 0, 0.0, vec![0]);
        assert_eq!(delivered.len(), 1);
        let delivered = s.consumer_receive("/p", 0, 1, 0.1, vec![1]);
        assert_eq!(delivered.len(), 1);
    }

    #[derive(Default)]
    struct RecordingFace {
        sent: Vec<(Port, Outbound)>,
    }

    impl Face for RecordingFace {
        fn send(&mut self, port: Port, packet: Outbound) {
            self.sent.push((port, packet));
        }
    }

    /// A capsule arriving out of order at the consumer must be held by the
    /// resequencing queue rather than delivered straight to the app (the
    /// bug this module's `on_receive_capsule` used to have).
    #[test]
    fn out_of_order_capsules_at_consumer_are_resequenced_not_delivered_immediately() {
        let mut s = Strategy::new(test_node_info(0));
        s.get_or_create_transport("/sensors/node2", 0);
        let mut face = RecordingFace::default();
        let mut keychain = crate::face::NullKeyChain;
        let mut clock = crate::scheduler::SimClock::new();
        let mut sinks = LogSinks::in_memory();

        let make = |data_id: u32| CapsuleMsg {
            prefix: "/sensors/node2".into(),
            data_id,
            path: Some(CapsulePath { nonce: 1, trans_hop_node_id: 1, node_ids: vec![2, 1, 0], n_hops: 2 }),
            consumer_node_id: 0,
        };

        let events = s.on_receive_capsule(&make(0), None, &mut face, &mut keychain, &mut clock, &mut sinks);
        assert_eq!(events, vec![DeliveryEvent::CapsuleDeliveredToConsumer { prefix: "/sensors/node2".into(), data_id: 0 }]);

        // dataID 2 arrives before dataID 1: held, not delivered, and a
        // single auto-dequeue timer is armed for it.
        let events = s.on_receive_capsule(&make(2), None, &mut face, &mut keychain, &mut clock, &mut sinks);
        assert!(events.is_empty());
        assert!(s.consumer_dequeue_timers.contains_key(&transport::transport_key("/sensors/node2", 0)));

        // dataID 1 arrives as the immediate next one: delivered on the spot.
        let events = s.on_receive_capsule(&make(1), None, &mut face, &mut keychain, &mut clock, &mut sinks);
        assert_eq!(events, vec![DeliveryEvent::CapsuleDeliveredToConsumer { prefix: "/sensors/node2".into(), data_id: 1 }]);

        // the still-held dataID 2 is only released once its own auto-dequeue
        // timer fires and forces it past the hold deadline.
        let (_, ev) = clock.pop_next().unwrap();
        let events = s.handle_event(ev, &mut face, &mut keychain, &mut clock, &mut sinks);
        assert_eq!(events, vec![DeliveryEvent::CapsuleDeliveredToConsumer { prefix: "/sensors/node2".into(), data_id: 2 }]);
    }

    #[test]
    fn jittered_broadcast_copy_is_sent_only_once_its_timer_fires() {
        let mut info = test_node_info(1);
        info.interest_send_times = 2;
        info.interest_contention_time_in_secs = 1.0;
        let mut s = Strategy::new(info);
        let mut face = RecordingFace::default();
        let mut keychain = crate::face::NullKeyChain;
        let mut clock = crate::scheduler::SimClock::new();
        let mut rng = rand::rngs::StdRng::from_seed([7u8; 32]);
        let mut sinks = LogSinks::in_memory();

        s.propagate_and_send("/sensors/node2", 0, 5, 1, false, vec![5, 1], vec![], &mut face, &mut keychain, &mut clock, &mut rng, &mut sinks);
        assert!(face.sent.is_empty(), "both copies should be jittered, none sent synchronously");

        while let Some((_, ev)) = clock.pop_next() {
            let events = s.handle_event(ev, &mut face, &mut keychain, &mut clock, &mut sinks);
            assert!(events.is_empty());
        }
        assert_eq!(face.sent.len(), 2);
    }
}
