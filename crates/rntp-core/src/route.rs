//! # Route table
//!
//! Routes are grouped by `(consumerNodeID, producerPrefix)`. Within a
//! group, `nodeIDs` uniquely identifies a route (no two routes in the same
//! group repeat a path); the metric is a geometric-mean-like aggregate of
//! hop qualities that favours longer-but-healthier routes over shorter
//! fragile ones (see [`RoutesPerPair::refresh_metric`]).

use crate::types::QUALITY_BROKEN;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub id: u64,
    pub n_hops: u32,
    pub node_ids: Vec<u32>,
    pub channel_qualities: Vec<f64>,
    pub update_time: f64,
    pub metric: f64,
}

#[derive(Debug, Clone)]
pub struct RoutesPerPair {
    pub consumer_node_id: u32,
    pub producer_prefix: String,
    pub routes: Vec<Route>,
    pub last_hit_time: f64,
}

impl RoutesPerPair {
    /// Recomputes `metric` for every route in the group. A route with any
    /// hop at or below [`QUALITY_BROKEN`] gets `metric = -1.0`; otherwise
    /// `metric = (product of qualities)^(1 / (2 * n_hops))`. If every route
    /// in the group is broken this is a no-op (original leaves stale
    /// metrics in place rather than writing `-1.0` everywhere).
    fn refresh_metric(&mut self) {
        let mut quality_highest = f64::NEG_INFINITY;
        for route in &self.routes {
            for &q in &route.channel_qualities {
                if q <= QUALITY_BROKEN {
                    continue;
                }
                if q > quality_highest {
                    quality_highest = q;
                }
            }
        }
        if quality_highest <= QUALITY_BROKEN {
            return;
        }

        for route in &mut self.routes {
            let mut metric = 1.0f64;
            let mut k = 0u32;
            let mut broken = false;
            for &q in &route.channel_qualities {
                if q <= QUALITY_BROKEN {
                    broken = true;
                    break;
                }
                metric *= q;
                k += 1;
            }
            route.metric = if broken || metric < 0.0 { -1.0 } else { metric.powf(1.0 / (2.0 * k as f64)) };
        }
    }
}

#[derive(Debug, Default)]
pub struct RouteTable {
    groups: Vec<RoutesPerPair>,
    next_id: u64,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn group_mut(&mut self, consumer_node_id: u32, producer_prefix: &str) -> Option<&mut RoutesPerPair> {
        self.groups
            .iter_mut()
            .find(|g| g.consumer_node_id == consumer_node_id && g.producer_prefix == producer_prefix)
    }

    fn group(&self, consumer_node_id: u32, producer_prefix: &str) -> Option<&RoutesPerPair> {
        self.groups
            .iter()
            .find(|g| g.consumer_node_id == consumer_node_id && g.producer_prefix == producer_prefix)
    }

    /// Inserts a route, rejecting an exact `node_ids` duplicate within its
    /// group. Returns `true` if a new route was actually added.
    pub fn add_route(
        &mut self,
        producer_prefix: &str,
        consumer_node_id: u32,
        n_hops: u32,
        node_ids: Vec<u32>,
        channel_qualities: Vec<f64>,
        now: f64,
    ) -> bool {
        let id = self.next_id;
        if let Some(group) = self.group_mut(consumer_node_id, producer_prefix) {
            if group.routes.iter().any(|r| r.node_ids == node_ids) {
                return false;
            }
            self.next_id += 1;
            group.routes.push(Route { id, n_hops, node_ids, channel_qualities, update_time: now, metric: 0.0 });
            return true;
        }
        self.next_id += 1;
        self.groups.push(RoutesPerPair {
            consumer_node_id,
            producer_prefix: producer_prefix.to_string(),
            last_hit_time: now,
            routes: vec![Route { id, n_hops, node_ids, channel_qualities, update_time: now, metric: 0.0 }],
        });
        true
    }

    /// The `prevNodes` set used by loop avoidance: every node strictly
    /// between `self_node_id` and the path's originator, reading
    /// `previous_hops` back-to-front and stopping at `self_node_id`.
    fn prev_nodes(self_node_id: u32, previous_hops: Option<&[u32]>) -> HashSet<u32> {
        let mut set = HashSet::new();
        if let Some(hops) = previous_hops {
            for &id in hops.iter().rev() {
                if id == self_node_id {
                    break;
                }
                set.insert(id);
            }
        }
        set
    }

    /// Returns the route whose `node_ids` has `partial_node_ids` as an
    /// exact prefix and which is fully healthy, so a capsule can stay on
    /// its current subpath instead of re-selecting.
    pub fn match_route(&self, consumer_node_id: u32, producer_prefix: &str, partial_node_ids: &[u32]) -> Option<&Route> {
        let group = self.group(consumer_node_id, producer_prefix)?;
        group.routes.iter().find(|route| {
            let k = route
                .node_ids
                .iter()
                .zip(partial_node_ids.iter())
                .take_while(|(a, b)| a == b)
                .count();
            k == route.node_ids.len() && !route.channel_qualities.iter().any(|&q| q == QUALITY_BROKEN)
        })
    }

    /// Recomputes metrics, filters out routes that loop back through
    /// `previous_hops`, ranks the rest by descending metric, and returns
    /// the route at `rank` (wrapping modulo the ranked count once
    /// `rank >= n`). `None` if the group is absent or everything loops.
    pub fn lookup_route(
        &mut self,
        consumer_node_id: u32,
        producer_prefix: &str,
        self_node_id: u32,
        previous_hops: Option<&[u32]>,
        rank: u32,
    ) -> Option<&Route> {
        self.refresh_route_metric(consumer_node_id, producer_prefix);
        let prev_nodes = Self::prev_nodes(self_node_id, previous_hops);
        let group = self.group(consumer_node_id, producer_prefix)?;

        let mut ranked: Vec<&Route> = group
            .routes
            .iter()
            .filter(|r| !r.node_ids.iter().any(|id| prev_nodes.contains(id)))
            .collect();
        ranked.sort_by(|a, b| b.metric.partial_cmp(&a.metric).unwrap_or(std::cmp::Ordering::Equal));

        let n = ranked.len();
        if n == 0 {
            return None;
        }
        let idx = if (rank as usize) < n { rank as usize } else { rank as usize % n };
        Some(ranked[idx])
    }

    pub fn refresh_route_metric(&mut self, consumer_node_id: u32, producer_prefix: &str) {
        if let Some(group) = self.group_mut(consumer_node_id, producer_prefix) {
            group.refresh_metric();
        }
    }

    /// Writes `channel_quality` into every occurrence of the hop
    /// `from_node_id -> to_node_id` across all routes in all groups.
    /// Returns the number of "radical changes": transitions across the
    /// [`QUALITY_BROKEN`] sentinel in either direction.
    pub fn update_routes_with_quality(&mut self, from_node_id: u32, to_node_id: u32, channel_quality: f64) -> u32 {
        let mut radical_changes = 0;
        for group in &mut self.groups {
            for route in &mut group.routes {
                if route.node_ids.len() <= 1 {
                    continue;
                }
                let mut radical = false;
                for i in 1..route.node_ids.len() {
                    if route.node_ids[i - 1] == from_node_id && route.node_ids[i] == to_node_id {
                        let prev = route.channel_qualities[i - 1];
                        if (prev == QUALITY_BROKEN && channel_quality > QUALITY_BROKEN)
                            || (prev > QUALITY_BROKEN && channel_quality == QUALITY_BROKEN)
                        {
                            radical = true;
                        }
                        route.channel_qualities[i - 1] = channel_quality;
                    }
                }
                if radical {
                    radical_changes += 1;
                }
            }
        }
        radical_changes
    }

    /// Every distinct node one hop away (on either side) from any node in
    /// any route, across every group. Used to seed echo-driven liveness
    /// regardless of which transport discovered the neighbour.
    pub fn neighbored_ids_in_routes(&self) -> HashSet<u32> {
        let mut out = HashSet::new();
        for group in &self.groups {
            for route in &group.routes {
                if route.node_ids.len() <= 1 {
                    continue;
                }
                out.insert(route.node_ids[route.node_ids.len() - 2]);
            }
        }
        out
    }

    /// As [`Self::neighbored_ids_in_routes`] but restricted to groups
    /// *other* than `(consumer_node_id, producer_prefix)` — used to find
    /// which other transports are affected by a quality change on one
    /// neighbour. Per §9 open question (c), group exclusion is `||`, not
    /// the source's `!=`/`!=` pairing (which behaves like an always-true
    /// `OR` done wrong and would otherwise include the group itself).
    pub fn neighbored_ids_in_other_routes(&self, consumer_node_id: u32, producer_prefix: &str) -> HashSet<u32> {
        let mut out = HashSet::new();
        for group in &self.groups {
            // process iff `consumerNodeID != consumerID || producerPrefix != prefix`,
            // i.e. skip exactly the (consumerID, prefix) group itself.
            let is_own_group = group.consumer_node_id == consumer_node_id && group.producer_prefix == producer_prefix;
            if is_own_group {
                continue;
            }
            for route in &group.routes {
                if route.node_ids.len() <= 1 {
                    continue;
                }
                out.insert(route.node_ids[route.node_ids.len() - 2]);
            }
        }
        out
    }

    pub fn groups(&self) -> &[RoutesPerPair] {
        &self.groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_route_rejects_exact_duplicate() {
        let mut t = RouteTable::new();
        assert!(t.add_route("/p", 0, 2, vec![2, 1, 0], vec![10.0, 10.0], 0.0));
        assert!(!t.add_route("/p", 0, 2, vec![2, 1, 0], vec![5.0, 5.0], 1.0));
        assert_eq!(t.groups()[0].routes.len(), 1);
    }

    #[test]
    fn metric_is_minus_one_when_any_hop_broken() {
        let mut t = RouteTable::new();
        t.add_route("/p", 0, 2, vec![2, 1, 0], vec![QUALITY_BROKEN, 10.0], 0.0);
        t.refresh_route_metric(0, "/p");
        assert_eq!(t.groups()[0].routes[0].metric, -1.0);
    }

    #[test]
    fn metric_is_geometric_mean_with_halved_exponent() {
        let mut t = RouteTable::new();
        t.add_route("/p", 0, 2, vec![2, 1, 0], vec![4.0, 4.0], 0.0);
        t.refresh_route_metric(0, "/p");
        let m = t.groups()[0].routes[0].metric;
        assert!((m - 2.0).abs() < 1e-9); // (4*4)^(1/4) = 2
    }

    #[test]
    fn lookup_route_ranks_by_metric_descending() {
        let mut t = RouteTable::new();
        t.add_route("/p", 0, 1, vec![1, 0], vec![100.0], 0.0);
        t.add_route("/p", 0, 1, vec![2, 0], vec![4.0], 0.0);
        let best = t.lookup_route(0, "/p", 0, None, 0).unwrap().clone();
        assert_eq!(best.node_ids, vec![1, 0]);
        let second = t.lookup_route(0, "/p", 0, None, 1).unwrap().clone();
        assert_eq!(second.node_ids, vec![2, 0]);
    }

    #[test]
    fn lookup_route_filters_loops_via_previous_hops() {
        let mut t = RouteTable::new();
        t.add_route("/p", 0, 2, vec![2, 1, 0], vec![10.0, 10.0], 0.0);
        t.add_route("/p", 0, 1, vec![3, 0], vec![10.0], 0.0);
        // previous hops show we came from node 1 already, so the [2,1,0] route loops
        let r = t.lookup_route(0, "/p", 0, Some(&[2, 1]), 0).unwrap();
        assert_eq!(r.node_ids, vec![3, 0]);
    }

    #[test]
    fn lookup_route_rank_wraps_modulo_count() {
        let mut t = RouteTable::new();
        t.add_route("/p", 0, 1, vec![1, 0], vec![10.0], 0.0);
        let r = t.lookup_route(0, "/p", 0, None, 5).unwrap();
        assert_eq!(r.node_ids, vec![1, 0]);
    }

    #[test]
    fn match_route_requires_healthy_prefix_match() {
        let mut t = RouteTable::new();
        t.add_route("/p", 0, 2, vec![2, 1, 0], vec![10.0, 10.0], 0.0);
        assert!(t.match_route(0, "/p", &[2, 1, 0]).is_some());
        assert!(t.match_route(0, "/p", &[9, 9]).is_none());
    }

    #[test]
    fn update_routes_with_quality_counts_radical_changes() {
        let mut t = RouteTable::new();
        t.add_route("/p", 0, 2, vec![2, 1, 0], vec![10.0, 10.0], 0.0);
        let n = t.update_routes_with_quality(1, 0, QUALITY_BROKEN);
        assert_eq!(n, 1);
        assert_eq!(t.groups()[0].routes[0].channel_qualities[0], QUALITY_BROKEN);
        let n2 = t.update_routes_with_quality(1, 0, QUALITY_BROKEN);
        assert_eq!(n2, 0); // already broken, no radical change on repeat
    }

    #[test]
    fn neighbored_ids_in_other_routes_excludes_own_group_only() {
        let mut t = RouteTable::new();
        t.add_route("/p", 0, 2, vec![2, 1, 0], vec![10.0, 10.0], 0.0);
        t.add_route("/q", 5, 1, vec![9, 5], vec![10.0], 0.0);
        let others = t.neighbored_ids_in_other_routes(0, "/p");
        assert!(others.contains(&9));
        assert!(!others.contains(&1));
    }
}
