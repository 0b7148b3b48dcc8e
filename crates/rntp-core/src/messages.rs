//! # Name codec
//!
//! Encodes and decodes the five in-band message kinds into NDN names plus,
//! for two of them, a binary payload blob. Names are ASCII decimal fields
//! joined by `/`; variable-length sub-lists are `-`-joined inside a single
//! component. Binary payloads are fixed little-endian with an 8-byte count
//! prefix (see Design Notes on wire endianness) rather than the host-endian
//! layout of the system this protocol was distilled from.
//!
//! `Interest` carries no operation keyword: its name is the bare producer
//! prefix, and its (consumerNodeID, nextHopNodeID) pair travels out-of-band
//! via [`RouteTag`]. The other four kinds insert an operation segment after
//! the `/<namespace>/<host>` prefix.

use crate::error::DecodeError;
use crate::types::RouteTag;

const OP_CAPSULE: &str = "Capsule";
const OP_CAPSULE_ACK: &str = "CapsuleAck";
const OP_INTEREST_BROADCAST: &str = "InterestBroadcast";
const OP_ECHO: &str = "Echo";
const ECHO_HOST: &str = "ALL";

#[derive(Debug, Clone, PartialEq)]
pub struct InterestMsg {
    pub prefix: String,
    pub route_tag: RouteTag,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterestBroadcastMsg {
    pub producer_prefix: String,
    pub hop_count: u32,
    pub consumer_node_id: u32,
    pub trans_hop_node_id: u32,
    pub nonce: u32,
    pub end: bool,
    pub visited_node_ids: Vec<u32>,
    pub channel_qualities: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapsuleMsg {
    pub prefix: String,
    pub data_id: u32,
    /// `None` for the short, producer-originated form (no path chosen yet).
    pub path: Option<CapsulePath>,
    pub consumer_node_id: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapsulePath {
    pub nonce: u32,
    pub trans_hop_node_id: u32,
    pub node_ids: Vec<u32>,
    pub n_hops: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapsuleAckMsg {
    pub prefix: String,
    pub downstream_node_id: u32,
    pub upstream_node_ids: Vec<u32>,
    pub trans_hop_node_id: u32,
    pub consumer_node_id: u32,
    pub data_ids_received: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EchoMsg {
    pub namespace: String,
    pub source_node_id: u32,
    pub seq_num: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataMessage {
    Capsule(CapsuleMsg),
    CapsuleAck(CapsuleAckMsg),
    InterestBroadcast(InterestBroadcastMsg),
    Echo(EchoMsg),
}

fn join_dash(ids: &[u32]) -> String {
    ids.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("-")
}

fn split_dash(field: &str, component: &str) -> Result<Vec<u32>, DecodeError> {
    component
        .split('-')
        .map(|s| {
            s.parse::<u32>()
                .map_err(|_| DecodeError::BadNumericField { field: leak_field(field), component: component.to_string() })
        })
        .collect()
}

// `field` names below are all `'static` string literals at call sites, so this
// is just satisfying the borrow without allocating a leak in practice.
fn leak_field(field: &str) -> &'static str {
    match field {
        "visitedNodeIDs" => "visitedNodeIDs",
        "upstreamNodeIDs" => "upstreamNodeIDs",
        "nodeIDs" => "nodeIDs",
        _ => "field",
    }
}

fn parse_u32(field: &'static str, component: &str) -> Result<u32, DecodeError> {
    component
        .parse::<u32>()
        .map_err(|_| DecodeError::BadNumericField { field, component: component.to_string() })
}

fn components(name: &str) -> Vec<&str> {
    name.split('/').filter(|s| !s.is_empty()).collect()
}

fn prefix_of(parts: &[&str]) -> String {
    format!("/{}/{}", parts[0], parts[1])
}

// ─── Interest ────────────────────────────────────────────────────────────────

pub fn encode_interest(msg: &InterestMsg) -> String {
    msg.prefix.clone()
}

pub fn decode_interest(name: &str, route_tag: RouteTag) -> InterestMsg {
    InterestMsg { prefix: name.to_string(), route_tag }
}

// ─── Capsule ─────────────────────────────────────────────────────────────────

pub fn encode_capsule(msg: &CapsuleMsg) -> String {
    match &msg.path {
        None => format!("{}/{}/{}", msg.prefix, OP_CAPSULE, msg.data_id),
        Some(p) => format!(
            "{}/{}/{}/{}/{}/{}/{}",
            msg.prefix,
            OP_CAPSULE,
            msg.data_id,
            p.nonce,
            p.trans_hop_node_id,
            join_dash(&p.node_ids),
            p.n_hops
        ),
    }
}

pub fn decode_capsule(name: &str, consumer_node_id: u32) -> Result<CapsuleMsg, DecodeError> {
    let parts = components(name);
    if parts.len() < 4 {
        return Err(DecodeError::TooFewComponents(name.to_string()));
    }
    if parts[2] != OP_CAPSULE {
        return Err(DecodeError::UnknownMessageKind(parts[2].to_string()));
    }
    let prefix = prefix_of(&parts);
    let data_id = parse_u32("dataID", parts[3])?;
    let path = if parts.len() >= 7 {
        Some(CapsulePath {
            nonce: parse_u32("nonce", parts[4])?,
            trans_hop_node_id: parse_u32("transHopNodeID", parts[5])?,
            node_ids: split_dash("nodeIDs", parts[6])?,
            n_hops: parse_u32("nHops", parts[7])?,
        })
    } else {
        None
    };
    Ok(CapsuleMsg { prefix, data_id, path, consumer_node_id })
}

// ─── CapsuleAck ──────────────────────────────────────────────────────────────

pub fn encode_capsule_ack(msg: &CapsuleAckMsg) -> (String, Vec<u8>) {
    let name = format!(
        "{}/{}/{}/{}/{}/{}",
        msg.prefix,
        OP_CAPSULE_ACK,
        msg.downstream_node_id,
        join_dash(&msg.upstream_node_ids),
        msg.trans_hop_node_id,
        msg.consumer_node_id
    );
    let mut payload = Vec::with_capacity(8 + 4 * msg.data_ids_received.len());
    payload.extend_from_slice(&(msg.data_ids_received.len() as u64).to_le_bytes());
    for id in &msg.data_ids_received {
        payload.extend_from_slice(&id.to_le_bytes());
    }
    (name, payload)
}

pub fn decode_capsule_ack(name: &str, payload: &[u8]) -> Result<CapsuleAckMsg, DecodeError> {
    let parts = components(name);
    if parts.len() < 7 {
        return Err(DecodeError::TooFewComponents(name.to_string()));
    }
    if parts[2] != OP_CAPSULE_ACK {
        return Err(DecodeError::UnknownMessageKind(parts[2].to_string()));
    }
    let prefix = prefix_of(&parts);
    let downstream_node_id = parse_u32("downstreamNodeID", parts[3])?;
    let upstream_node_ids = split_dash("upstreamNodeIDs", parts[4])?;
    let trans_hop_node_id = parse_u32("transHopNodeID", parts[5])?;
    let consumer_node_id = parse_u32("consumerNodeID", parts[6])?;
    let data_ids_received = decode_u32_count_prefixed(payload)?;
    Ok(CapsuleAckMsg {
        prefix,
        downstream_node_id,
        upstream_node_ids,
        trans_hop_node_id,
        consumer_node_id,
        data_ids_received,
    })
}

fn decode_u32_count_prefixed(payload: &[u8]) -> Result<Vec<u32>, DecodeError> {
    if payload.len() < 8 {
        return Err(DecodeError::PayloadTooShort { need: 8, have: payload.len() });
    }
    let count = u64::from_le_bytes(payload[0..8].try_into().unwrap()) as usize;
    let need = 8 + count * 4;
    if payload.len() < need {
        return Err(DecodeError::PayloadTooShort { need, have: payload.len() });
    }
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let off = 8 + i * 4;
        out.push(u32::from_le_bytes(payload[off..off + 4].try_into().unwrap()));
    }
    Ok(out)
}

// ─── InterestBroadcast ───────────────────────────────────────────────────────

pub fn encode_interest_broadcast(msg: &InterestBroadcastMsg) -> (String, Vec<u8>) {
    let name = format!(
        "{}/{}/{}/{}/{}/{}/{}",
        msg.producer_prefix,
        OP_INTEREST_BROADCAST,
        msg.hop_count,
        msg.consumer_node_id,
        msg.trans_hop_node_id,
        msg.nonce,
        msg.end
    );
    let n = msg.visited_node_ids.len();
    let m = msg.channel_qualities.len();
    let mut payload = Vec::with_capacity(8 + 4 * n + 8 + 8 * m);
    payload.extend_from_slice(&(n as u64).to_le_bytes());
    for id in &msg.visited_node_ids {
        payload.extend_from_slice(&id.to_le_bytes());
    }
    payload.extend_from_slice(&(m as u64).to_le_bytes());
    for q in &msg.channel_qualities {
        payload.extend_from_slice(&q.to_le_bytes());
    }
    (name, payload)
}

pub fn decode_interest_broadcast(name: &str, payload: &[u8]) -> Result<InterestBroadcastMsg, DecodeError> {
    let parts = components(name);
    if parts.len() < 8 {
        return Err(DecodeError::TooFewComponents(name.to_string()));
    }
    if parts[2] != OP_INTEREST_BROADCAST {
        return Err(DecodeError::UnknownMessageKind(parts[2].to_string()));
    }
    let producer_prefix = prefix_of(&parts);
    let hop_count = parse_u32("hopCount", parts[3])?;
    let consumer_node_id = parse_u32("consumerNodeID", parts[4])?;
    let trans_hop_node_id = parse_u32("transHopNodeID", parts[5])?;
    let nonce = parse_u32("nonce", parts[6])?;
    let end = parts[7] == "true";

    if payload.len() < 8 {
        return Err(DecodeError::PayloadTooShort { need: 8, have: payload.len() });
    }
    let n = u64::from_le_bytes(payload[0..8].try_into().unwrap()) as usize;
    let mut need = 8 + 4 * n;
    if payload.len() < need {
        return Err(DecodeError::PayloadTooShort { need, have: payload.len() });
    }
    let mut visited_node_ids = Vec::with_capacity(n);
    for i in 0..n {
        let off = 8 + i * 4;
        visited_node_ids.push(u32::from_le_bytes(payload[off..off + 4].try_into().unwrap()));
    }
    let m_off = 8 + 4 * n;
    need = m_off + 8;
    if payload.len() < need {
        return Err(DecodeError::PayloadTooShort { need, have: payload.len() });
    }
    let m = u64::from_le_bytes(payload[m_off..m_off + 8].try_into().unwrap()) as usize;
    need = m_off + 8 + 8 * m;
    if payload.len() < need {
        return Err(DecodeError::PayloadTooShort { need, have: payload.len() });
    }
    let mut channel_qualities = Vec::with_capacity(m);
    for i in 0..m {
        let off = m_off + 8 + i * 8;
        channel_qualities.push(f64::from_le_bytes(payload[off..off + 8].try_into().unwrap()));
    }

    Ok(InterestBroadcastMsg {
        producer_prefix,
        hop_count,
        consumer_node_id,
        trans_hop_node_id,
        nonce,
        end,
        visited_node_ids,
        channel_qualities,
    })
}

// ─── Echo ────────────────────────────────────────────────────────────────────

pub fn encode_echo(msg: &EchoMsg) -> String {
    format!("{}/{}/{}/{}/{}", msg.namespace, ECHO_HOST, OP_ECHO, msg.source_node_id, msg.seq_num)
}

pub fn decode_echo(name: &str) -> Result<EchoMsg, DecodeError> {
    let parts = components(name);
    if parts.len() < 5 {
        return Err(DecodeError::TooFewComponents(name.to_string()));
    }
    if parts[2] != OP_ECHO {
        return Err(DecodeError::UnknownMessageKind(parts[2].to_string()));
    }
    Ok(EchoMsg {
        namespace: parts[0].to_string(),
        source_node_id: parse_u32("sourceNodeID", parts[3])?,
        seq_num: parse_u32("seqNum", parts[4])?,
    })
}

/// A Capsule's `consumerNodeID` travels out-of-band on every other message
/// kind (CapsuleAck and InterestBroadcast both encode it as a name
/// component; Echo has no consumer at all) but not on Capsule itself —
/// its full wire form carries the whole path instead, and `nodeIDs[0]` is
/// always the consumer (§4.7: `nextHop` walks the list towards index 0).
/// A substrate that needs `consumerNodeID` before it can call
/// [`decode_data`] (to route the result to the right transport) can read
/// it straight off the cleartext name with this, rather than parsing the
/// whole message twice. Returns `None` for the short producer-originated
/// form (no path chosen yet) or a name that isn't a Capsule at all.
pub fn capsule_consumer_node_id(name: &str) -> Option<u32> {
    let parts = components(name);
    if parts.len() < 7 || parts.get(2) != Some(&OP_CAPSULE) {
        return None;
    }
    parts[6].split('-').next()?.parse::<u32>().ok()
}

/// Dispatches a received Data name to the right decoder by inspecting its
/// operation segment (component index 2). Interest is not handled here since
/// it carries no operation keyword — see [`decode_interest`].
pub fn decode_data(name: &str, payload: &[u8], consumer_node_id: u32) -> Result<DataMessage, DecodeError> {
    let parts = components(name);
    if parts.len() < 3 {
        return Err(DecodeError::TooFewComponents(name.to_string()));
    }
    match parts[2] {
        OP_CAPSULE => decode_capsule(name, consumer_node_id).map(DataMessage::Capsule),
        OP_CAPSULE_ACK => decode_capsule_ack(name, payload).map(DataMessage::CapsuleAck),
        OP_INTEREST_BROADCAST => decode_interest_broadcast(name, payload).map(DataMessage::InterestBroadcast),
        OP_ECHO => decode_echo(name).map(DataMessage::Echo),
        other => Err(DecodeError::UnknownMessageKind(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── Capsule ───────────────────────────────────────────────────────────

    #[test]
    fn capsule_short_form_round_trips() {
        let msg = CapsuleMsg { prefix: "/sensors/node3".into(), data_id: 42, path: None, consumer_node_id: 7 };
        let name = encode_capsule(&msg);
        assert_eq!(name, "/sensors/node3/Capsule/42");
        let decoded = decode_capsule(&name, 7).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn capsule_full_form_round_trips() {
        let msg = CapsuleMsg {
            prefix: "/sensors/node3".into(),
            data_id: 5,
            path: Some(CapsulePath { nonce: 99, trans_hop_node_id: 2, node_ids: vec![3, 2, 1], n_hops: 2 }),
            consumer_node_id: 0,
        };
        let name = encode_capsule(&msg);
        assert_eq!(name, "/sensors/node3/Capsule/5/99/2/3-2-1/2");
        assert_eq!(decode_capsule(&name, 0).unwrap(), msg);
    }

    #[test]
    fn capsule_unknown_operation_is_rejected() {
        let err = decode_capsule("/a/b/NotCapsule/1", 0).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownMessageKind(_)));
    }

    // ─── CapsuleAck ────────────────────────────────────────────────────────

    #[test]
    fn capsule_ack_round_trips_with_payload() {
        let msg = CapsuleAckMsg {
            prefix: "/sensors/node3".into(),
            downstream_node_id: 9,
            upstream_node_ids: vec![1, 2, 3],
            trans_hop_node_id: 4,
            consumer_node_id: 0,
            data_ids_received: vec![10, 11, 12],
        };
        let (name, payload) = encode_capsule_ack(&msg);
        let decoded = decode_capsule_ack(&name, &payload).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn capsule_ack_truncated_payload_errors() {
        let msg = CapsuleAckMsg {
            prefix: "/a/b".into(),
            downstream_node_id: 1,
            upstream_node_ids: vec![1],
            trans_hop_node_id: 1,
            consumer_node_id: 0,
            data_ids_received: vec![1, 2, 3],
        };
        let (name, payload) = encode_capsule_ack(&msg);
        let truncated = &payload[..payload.len() - 2];
        assert!(matches!(decode_capsule_ack(&name, truncated), Err(DecodeError::PayloadTooShort { .. })));
    }

    // ─── InterestBroadcast ─────────────────────────────────────────────────

    #[test]
    fn interest_broadcast_round_trips() {
        let msg = InterestBroadcastMsg {
            producer_prefix: "/sensors/node9".into(),
            hop_count: 2,
            consumer_node_id: 0,
            trans_hop_node_id: 1,
            nonce: 123456,
            end: false,
            visited_node_ids: vec![9, 1, 0],
            channel_qualities: vec![12.5, -3.25],
        };
        let (name, payload) = encode_interest_broadcast(&msg);
        assert_eq!(decode_interest_broadcast(&name, &payload).unwrap(), msg);
    }

    #[test]
    fn interest_broadcast_end_flag_round_trips() {
        let msg = InterestBroadcastMsg {
            producer_prefix: "/sensors/node9".into(),
            hop_count: 0,
            consumer_node_id: 0,
            trans_hop_node_id: 0,
            nonce: 1,
            end: true,
            visited_node_ids: vec![0],
            channel_qualities: vec![],
        };
        let (name, payload) = encode_interest_broadcast(&msg);
        assert!(name.ends_with("/true"));
        assert_eq!(decode_interest_broadcast(&name, &payload).unwrap(), msg);
    }

    // ─── Echo ──────────────────────────────────────────────────────────────

    #[test]
    fn echo_round_trips_and_uses_all_host() {
        let msg = EchoMsg { namespace: "/sensors".into(), source_node_id: 5, seq_num: 7 };
        let name = encode_echo(&msg);
        assert_eq!(name, "/sensors/ALL/Echo/5/7");
        assert_eq!(decode_echo(&name).unwrap(), msg);
    }

    // ─── Interest ──────────────────────────────────────────────────────────

    #[test]
    fn interest_name_is_bare_prefix() {
        let msg = InterestMsg { prefix: "/sensors/node9".into(), route_tag: RouteTag { consumer_node_id: 0, next_hop_node_id: 1 } };
        assert_eq!(encode_interest(&msg), "/sensors/node9");
        let decoded = decode_interest("/sensors/node9", msg.route_tag);
        assert_eq!(decoded, msg);
    }

    // ─── Dispatch ──────────────────────────────────────────────────────────

    #[test]
    fn decode_data_dispatches_by_operation_segment() {
        let (name, payload) = encode_interest_broadcast(&InterestBroadcastMsg {
            producer_prefix: "/a/b".into(),
            hop_count: 0,
            consumer_node_id: 0,
            trans_hop_node_id: 0,
            nonce: 1,
            end: false,
            visited_node_ids: vec![0],
            channel_qualities: vec![],
        });
        assert!(matches!(decode_data(&name, &payload, 0).unwrap(), DataMessage::InterestBroadcast(_)));
    }

    #[test]
    fn decode_data_rejects_unknown_kind() {
        let err = decode_data("/a/b/Mystery/1", &[], 0).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownMessageKind(_)));
    }

    #[test]
    fn capsule_consumer_node_id_reads_first_path_component() {
        let msg = CapsuleMsg {
            prefix: "/sensors/node3".into(),
            data_id: 5,
            path: Some(CapsulePath { nonce: 99, trans_hop_node_id: 2, node_ids: vec![0, 1, 2], n_hops: 2 }),
            consumer_node_id: 0,
        };
        let name = encode_capsule(&msg);
        assert_eq!(capsule_consumer_node_id(&name), Some(0));
    }

    #[test]
    fn capsule_consumer_node_id_is_none_for_short_form() {
        let msg = CapsuleMsg { prefix: "/sensors/node3".into(), data_id: 42, path: None, consumer_node_id: 7 };
        let name = encode_capsule(&msg);
        assert_eq!(capsule_consumer_node_id(&name), None);
    }

    #[test]
    fn route_tag_packs_and_unpacks() {
        let tag = RouteTag { consumer_node_id: 0xAABBCCDD, next_hop_node_id: 0x11223344 };
        assert_eq!(RouteTag::from_u64(tag.to_u64()), tag);
    }
}
