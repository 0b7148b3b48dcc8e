//! # In-memory multi-node harness
//!
//! Drives several [`rntp_core::node::Strategy`] instances against each
//! other without any real PHY, MAC or socket: every node gets its own
//! [`SimClock`] and RNG, wireless broadcast is modelled as a symmetric
//! adjacency list with a fixed SNR per link, and a global min-heap
//! interleaves cross-node packet deliveries with each node's own due
//! timers (mirroring what `rntp-node`'s stdin/stdout loop does for a real
//! substrate). Scenario setup helpers live alongside the harness itself so
//! integration tests read as a sequence of network events, not event-loop
//! plumbing.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::collections::BinaryHeap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rntp_core::capsule_queue::SendCode;
use rntp_core::face::{Face, KeyChain, NullKeyChain, Outbound, Port};
use rntp_core::log::LogSinks;
use rntp_core::messages::{self, DataMessage};
use rntp_core::node::{DeliveryEvent, NodeInfo, Strategy};
use rntp_core::route::RouteTable;
use rntp_core::scheduler::{Scheduler, SimClock};
use rntp_core::types::NODE_NONE;

/// How fast, and how many capsules, a producer stub should push once its
/// prefix is asked for (§6, `PRODUCER_FREQ`).
#[derive(Debug, Clone, Copy)]
pub struct ProducerConfig {
    pub count: u32,
    pub freq_hz: f64,
}

#[derive(Default)]
struct CapturingFace {
    net_sends: Vec<Outbound>,
    app_sends: Vec<Outbound>,
}

impl Face for CapturingFace {
    fn send(&mut self, port: Port, packet: Outbound) {
        match port {
            Port::NetDev => self.net_sends.push(packet),
            Port::App => self.app_sends.push(packet),
        }
    }
}

struct PacketDelivery {
    to: u32,
    name: String,
    payload: Vec<u8>,
    snr: f64,
}

struct QueuedPacket {
    time: f64,
    seq: u64,
    delivery: PacketDelivery,
}

impl PartialEq for QueuedPacket {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}
impl Eq for QueuedPacket {}
impl PartialOrd for QueuedPacket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedPacket {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time.partial_cmp(&other.time).unwrap_or(Ordering::Equal).then(self.seq.cmp(&other.seq))
    }
}

type ProducerKey = (u32, String, u32);

struct ProducerJobState {
    next_data_id: u32,
    remaining: u32,
    interval: f64,
}

struct QueuedTick {
    time: f64,
    seq: u64,
    key: ProducerKey,
}

impl PartialEq for QueuedTick {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}
impl Eq for QueuedTick {}
impl PartialOrd for QueuedTick {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedTick {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time.partial_cmp(&other.time).unwrap_or(Ordering::Equal).then(self.seq.cmp(&other.seq))
    }
}

struct NodeState {
    strategy: Strategy,
    clock: SimClock,
    rng: StdRng,
    sinks: LogSinks,
    delivered: Vec<(String, u32)>,
    terminated: Vec<(String, u32)>,
    producer_configs: HashMap<String, ProducerConfig>,
    producing: HashSet<ProducerKey>,
}

enum NextEvent {
    NodeTimer(u32),
    Packet,
    Producer,
}

/// A multi-node RNTP network with no PHY/MAC underneath it: just nodes,
/// symmetric links with a fixed SNR, and a discrete-event loop.
pub struct Network {
    nodes: BTreeMap<u32, NodeState>,
    links: HashMap<u32, Vec<(u32, f64)>>,
    packet_queue: BinaryHeap<std::cmp::Reverse<QueuedPacket>>,
    producer_queue: BinaryHeap<std::cmp::Reverse<QueuedTick>>,
    producer_jobs: HashMap<ProducerKey, ProducerJobState>,
    next_seq: u64,
}

impl Network {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            links: HashMap::new(),
            packet_queue: BinaryHeap::new(),
            producer_queue: BinaryHeap::new(),
            producer_jobs: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn add_node(&mut self, node_info: NodeInfo) {
        let node_id = node_info.node_id;
        let mut strategy = Strategy::new(node_info);
        let mut clock = SimClock::new();
        let mut rng = StdRng::seed_from_u64(0x5EED_0000_u64 ^ node_id as u64);
        strategy.schedule_first_echo(&mut clock, &mut rng);
        self.nodes.insert(
            node_id,
            NodeState {
                strategy,
                clock,
                rng,
                sinks: LogSinks::in_memory(),
                delivered: Vec::new(),
                terminated: Vec::new(),
                producer_configs: HashMap::new(),
                producing: HashSet::new(),
            },
        );
    }

    /// Adds a symmetric link with a fixed SNR sample, as if both ends were
    /// always in range of each other at that channel quality.
    pub fn add_link(&mut self, a: u32, b: u32, snr: f64) {
        self.links.entry(a).or_default().push((b, snr));
        self.links.entry(b).or_default().push((a, snr));
    }

    /// Removes the link `a <-> b` (§8 scenario 4): no further packet from
    /// either side reaches the other, same as a neighbour going out of
    /// range.
    pub fn break_link(&mut self, a: u32, b: u32) {
        if let Some(v) = self.links.get_mut(&a) {
            v.retain(|&(n, _)| n != b);
        }
        if let Some(v) = self.links.get_mut(&b) {
            v.retain(|&(n, _)| n != a);
        }
    }

    pub fn register_producer(&mut self, node_id: u32, prefix: &str, config: ProducerConfig) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.producer_configs.insert(prefix.to_string(), config);
        }
    }

    /// A local consumer app at `node_id` issuing an Interest for `prefix`
    /// (§4.7 "On Interest"): kicks off discovery if nothing is already
    /// underway for this (prefix, node) pair.
    pub fn consumer_request(&mut self, node_id: u32, prefix: &str) {
        let mut face = CapturingFace::default();
        let mut keychain = NullKeyChain;
        let now;
        {
            let node = self.nodes.get_mut(&node_id).expect("unknown node");
            let NodeState { strategy, clock, rng, sinks, .. } = node;
            now = clock.now();
            strategy.after_receive_interest(prefix, NODE_NONE, &mut face, &mut keychain, clock, rng, sinks);
        }
        self.drain_face(node_id, face, now);
    }

    /// DataIDs delivered to `node_id`'s consumer app so far, in delivery
    /// order (not necessarily dataID order — out-of-order arrivals that
    /// were never resequenced show up in the order they were released).
    pub fn delivered(&self, node_id: u32) -> &[(String, u32)] {
        self.nodes.get(&node_id).map(|n| n.delivered.as_slice()).unwrap_or(&[])
    }

    pub fn terminated(&self, node_id: u32) -> &[(String, u32)] {
        self.nodes.get(&node_id).map(|n| n.terminated.as_slice()).unwrap_or(&[])
    }

    pub fn routes(&self, node_id: u32) -> Option<&RouteTable> {
        self.nodes.get(&node_id).map(|n| &n.strategy.routes)
    }

    pub fn has_node(&self, node_id: u32) -> bool {
        self.nodes.contains_key(&node_id)
    }

    /// Runs the event loop until no node has a due timer, no packet is
    /// in flight, and no producer job is pending, or `horizon` (simulated
    /// seconds) is reached — whichever comes first.
    pub fn run_until(&mut self, horizon: f64) {
        while let Some(next) = self.pick_next(horizon) {
            match next {
                NextEvent::NodeTimer(id) => self.process_node_timer(id),
                NextEvent::Packet => self.process_packet(),
                NextEvent::Producer => self.process_producer_tick(),
            }
        }
    }

    fn pick_next(&self, horizon: f64) -> Option<NextEvent> {
        let mut best: Option<(f64, NextEvent)> = None;
        for (&id, node) in &self.nodes {
            if let Some(t) = node.clock.peek_next_time() {
                if t <= horizon && best.as_ref().map(|(bt, _)| t < *bt).unwrap_or(true) {
                    best = Some((t, NextEvent::NodeTimer(id)));
                }
            }
        }
        if let Some(std::cmp::Reverse(qp)) = self.packet_queue.peek() {
            if qp.time <= horizon && best.as_ref().map(|(bt, _)| qp.time < *bt).unwrap_or(true) {
                best = Some((qp.time, NextEvent::Packet));
            }
        }
        if let Some(std::cmp::Reverse(qt)) = self.producer_queue.peek() {
            if qt.time <= horizon && best.as_ref().map(|(bt, _)| qt.time < *bt).unwrap_or(true) {
                best = Some((qt.time, NextEvent::Producer));
            }
        }
        best.map(|(_, e)| e)
    }

    fn process_node_timer(&mut self, node_id: u32) {
        let mut face = CapturingFace::default();
        let mut keychain = NullKeyChain;
        let now;
        let delivered;
        {
            let node = self.nodes.get_mut(&node_id).expect("pick_next named a live node");
            let NodeState { strategy, clock, sinks, .. } = node;
            let (_, event) = clock.pop_next().expect("pick_next guaranteed a due timer");
            now = clock.now();
            delivered = strategy.handle_event(event, &mut face, &mut keychain, clock, sinks);
        }
        self.record_delivered(node_id, delivered);
        self.drain_face(node_id, face, now);
    }

    fn process_packet(&mut self) {
        let std::cmp::Reverse(qp) = self.packet_queue.pop().expect("pick_next guaranteed a due packet");
        let QueuedPacket { time, delivery, .. } = qp;
        let PacketDelivery { to, name, payload, snr } = delivery;

        let mut face = CapturingFace::default();
        let mut keychain = NullKeyChain;
        let delivered = {
            let Some(node) = self.nodes.get_mut(&to) else { return };
            let NodeState { strategy, clock, rng, sinks, .. } = node;
            for (_, event) in clock.drain_due(time) {
                strategy.handle_event(event, &mut face, &mut keychain, clock, sinks);
            }
            let consumer_node_id = messages::capsule_consumer_node_id(&name).unwrap_or(NODE_NONE);
            match messages::decode_data(&name, &payload, consumer_node_id) {
                Ok(DataMessage::Capsule(msg)) => strategy.on_receive_capsule(&msg, Some(snr), &mut face, &mut keychain, clock, sinks),
                Ok(DataMessage::CapsuleAck(msg)) => {
                    strategy.on_receive_capsule_ack(&msg, Some(snr), clock, sinks);
                    Vec::new()
                }
                Ok(DataMessage::InterestBroadcast(msg)) => {
                    strategy.on_receive_interest_broadcast(&msg, Some(snr), &mut face, &mut keychain, clock, rng, sinks)
                }
                Ok(DataMessage::Echo(msg)) => {
                    strategy.on_receive_echo(&msg, Some(snr), clock, sinks);
                    Vec::new()
                }
                Err(e) => {
                    tracing::warn!(error = %e, name = %name, node_id = to, "dropping undecodable packet");
                    Vec::new()
                }
            }
        };
        self.record_delivered(to, delivered);
        self.drain_face(to, face, time);
    }

    fn process_producer_tick(&mut self) {
        let std::cmp::Reverse(qt) = self.producer_queue.pop().expect("pick_next guaranteed a due tick");
        let QueuedTick { time, key, .. } = qt;
        let (node_id, prefix, consumer_id) = key.clone();
        let Some(mut job) = self.producer_jobs.remove(&key) else { return };
        if job.remaining == 0 {
            return;
        }

        let mut face = CapturingFace::default();
        let mut keychain = NullKeyChain;
        {
            let Some(node) = self.nodes.get_mut(&node_id) else { return };
            let NodeState { strategy, clock, sinks, .. } = node;
            for (_, event) in clock.drain_due(time) {
                strategy.handle_event(event, &mut face, &mut keychain, clock, sinks);
            }
            strategy.send_capsule_via_queue(&prefix, consumer_id, job.next_data_id, Vec::new(), SendCode::FromProducer, &mut face, &mut keychain, clock, sinks);
        }

        job.next_data_id += 1;
        job.remaining -= 1;
        if job.remaining > 0 {
            self.next_seq += 1;
            self.producer_queue.push(std::cmp::Reverse(QueuedTick { time: time + job.interval, seq: self.next_seq, key: key.clone() }));
            self.producer_jobs.insert(key, job);
        }
        self.drain_face(node_id, face, time);
    }

    fn record_delivered(&mut self, node_id: u32, events: Vec<DeliveryEvent>) {
        let Some(node) = self.nodes.get_mut(&node_id) else { return };
        for ev in events {
            match ev {
                DeliveryEvent::CapsuleDeliveredToConsumer { prefix, data_id } => node.delivered.push((prefix, data_id)),
                DeliveryEvent::TransportTerminated { prefix, consumer_id } => node.terminated.push((prefix, consumer_id)),
            }
        }
    }

    /// Turns one node's captured sends into either cross-node packet
    /// deliveries (broadcast to every link neighbour, §1: wireless
    /// broadcast, not point-to-point) or a producer-app kickoff (a local
    /// Interest asking this node's own app to serve `prefix`).
    fn drain_face(&mut self, origin: u32, face: CapturingFace, now: f64) {
        for packet in face.net_sends {
            if let Outbound::Data { name, payload } = packet {
                let neighbors = self.links.get(&origin).cloned().unwrap_or_default();
                for (neighbor, snr) in neighbors {
                    self.next_seq += 1;
                    self.packet_queue.push(std::cmp::Reverse(QueuedPacket {
                        time: now,
                        seq: self.next_seq,
                        delivery: PacketDelivery { to: neighbor, name: name.clone(), payload: payload.clone(), snr },
                    }));
                }
            }
        }
        for packet in face.app_sends {
            if let Outbound::Interest { name: prefix } = packet {
                self.maybe_start_producer(origin, &prefix, now);
            }
        }
    }

    fn maybe_start_producer(&mut self, node_id: u32, prefix: &str, now: f64) {
        let Some((config, consumers)) = (|| {
            let node = self.nodes.get(&node_id)?;
            let config = node.producer_configs.get(prefix).copied()?;
            Some((config, node.strategy.active_consumers_for_prefix(prefix)))
        })() else {
            return;
        };

        for consumer_id in consumers {
            let key: ProducerKey = (node_id, prefix.to_string(), consumer_id);
            let already_running = match self.nodes.get_mut(&node_id) {
                Some(node) => !node.producing.insert(key.clone()),
                None => continue,
            };
            if already_running || config.count == 0 {
                continue;
            }
            let interval = if config.freq_hz > 0.0 { 1.0 / config.freq_hz } else { 0.0 };
            self.producer_jobs.insert(key.clone(), ProducerJobState { next_data_id: 0, remaining: config.count, interval });
            self.next_seq += 1;
            self.producer_queue.push(std::cmp::Reverse(QueuedTick { time: now, seq: self.next_seq, key }));
        }
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a [`NodeInfo`] with small, fast defaults suitable for tests
/// (short timeouts, few retries) rather than a full simulation run.
pub fn test_node_info(node_id: u32, prefixes: Vec<String>) -> NodeInfo {
    use rntp_core::config::SimConfig;
    let mut cfg = SimConfig::default();
    cfg.capsule_per_hop_timeout = 0.2;
    cfg.capsule_retrying_times = 4;
    cfg.congestion_control_threshold = 16;
    cfg.congestion_control_init_win = 4;
    cfg.interest_send_times = 2;
    cfg.interest_contention_time_in_secs = 0.01;
    cfg.echo_period_in_secs = 1000.0; // keep echo beacons out of the way of deterministic tests
    cfg.msg_timeout_in_secs = 5.0;
    cfg.consumer_max_wait_time_in_secs = 0.5;
    cfg.node_info(node_id, prefixes)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// §8 scenario 1: three nodes in a line, producer on 2, consumer on 0.
    fn linear_three_node_network() -> Network {
        let mut net = Network::new();
        net.add_node(test_node_info(0, vec![]));
        net.add_node(test_node_info(1, vec![]));
        net.add_node(test_node_info(2, vec!["/sensors/node2".to_string()]));
        net.add_link(0, 1, 10.0);
        net.add_link(1, 2, 10.0);
        net
    }

    #[test]
    fn two_hop_single_path_discovery_installs_full_route() {
        let mut net = linear_three_node_network();
        net.consumer_request(0, "/sensors/node2");
        net.run_until(2.0);

        let routes = net.routes(0).expect("node 0 exists");
        let group = routes.groups().iter().find(|g| g.consumer_node_id == 0 && g.producer_prefix == "/sensors/node2").expect("route group installed");
        assert!(group.routes.iter().any(|r| r.node_ids == vec![0, 1, 2]));
    }

    #[test]
    fn hundred_capsules_arrive_in_order_over_two_hops() {
        let mut net = linear_three_node_network();
        net.register_producer(2, "/sensors/node2", ProducerConfig { count: 100, freq_hz: 10.0 });
        net.consumer_request(0, "/sensors/node2");
        net.run_until(60.0);

        let delivered: Vec<u32> = net.delivered(0).iter().map(|(_, id)| *id).collect();
        assert_eq!(delivered, (0..100).collect::<Vec<u32>>());
    }

    #[test]
    fn broken_middle_link_falls_back_to_next_best_route() {
        let mut net = Network::new();
        net.add_node(test_node_info(0, vec![]));
        net.add_node(test_node_info(1, vec![]));
        net.add_node(test_node_info(2, vec![]));
        net.add_node(test_node_info(3, vec!["/sensors/node3".to_string()]));
        // two node-disjoint paths from consumer 0 to producer 3: via 1, and via 2.
        net.add_link(0, 1, 10.0);
        net.add_link(1, 3, 10.0);
        net.add_link(0, 2, 1.0);
        net.add_link(2, 3, 1.0);

        net.consumer_request(0, "/sensors/node3");
        net.run_until(2.0);

        net.break_link(0, 1);
        net.break_link(1, 3);

        let routes = net.routes(3).expect("producer node exists");
        let best = routes.groups().iter().find(|g| g.consumer_node_id == 0).and_then(|g| g.routes.first());
        assert!(best.is_some(), "surviving route via node 2 should still be present");
    }
}
