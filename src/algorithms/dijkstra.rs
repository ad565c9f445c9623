use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::address::Address;
use crate::graph::{Edge, Graph, Node};

/// Policy used by [`shortest_path`] to price edges and prune nodes.
///
/// Disabled nodes and edges are excluded before any hook is consulted, so an
/// implementation cannot resurrect them.
pub trait CostFunction {
    fn edge_cost(&self, edge: &Edge) -> f64;

    fn consider_node(&self, _node: &Node) -> bool {
        true
    }

    /// A* estimate of the remaining cost. Must not overestimate.
    fn heuristic(&self, _from: &Address, _to: &Address) -> f64 {
        0.0
    }
}

/// Unit cost per hop.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastHops;

impl CostFunction for LeastHops {
    fn edge_cost(&self, _edge: &Edge) -> f64 {
        1.0
    }
}

/// Uses the configured edge weight.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeWeight;

impl CostFunction for EdgeWeight {
    fn edge_cost(&self, edge: &Edge) -> f64 {
        edge.weight
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathResult {
    pub path: Vec<Address>,
    pub cost: f64,
}

impl PathResult {
    pub fn hops(&self) -> usize {
        self.path.len().saturating_sub(1)
    }

    pub fn next_hop(&self) -> Option<Address> {
        self.path.get(1).copied()
    }
}

#[derive(Debug)]
struct State {
    cost: f64,
    estimate: f64,
    address: Address,
}

impl Eq for State {}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.estimate.total_cmp(&other.estimate) == Ordering::Equal && self.address == other.address
    }
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap, lowest address first on ties
        other
            .estimate
            .total_cmp(&self.estimate)
            .then_with(|| other.address.cmp(&self.address))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn usable(node: Option<&Node>) -> bool {
    node.is_some_and(|node| node.enabled)
}

pub fn shortest_path(
    graph: &Graph,
    source: &Address,
    destination: &Address,
    cost_fn: &dyn CostFunction,
) -> Option<PathResult> {
    if !usable(graph.find_node(source)) || !usable(graph.find_node(destination)) {
        return None;
    }
    if source == destination {
        return Some(PathResult {
            path: vec![*source],
            cost: 0.0,
        });
    }

    let mut distances: HashMap<Address, f64> = HashMap::new();
    let mut previous: HashMap<Address, Address> = HashMap::new();
    let mut visited: HashSet<Address> = HashSet::new();
    let mut heap = BinaryHeap::new();

    distances.insert(*source, 0.0);
    heap.push(State {
        cost: 0.0,
        estimate: cost_fn.heuristic(source, destination),
        address: *source,
    });

    while let Some(State { cost, address, .. }) = heap.pop() {
        if address == *destination {
            return Some(PathResult {
                path: reconstruct_path(&previous, source, destination),
                cost,
            });
        }
        if !visited.insert(address) {
            continue;
        }

        for edge in graph.outgoing_edges(&address) {
            let next = edge.destination;
            if !edge.enabled || visited.contains(&next) {
                continue;
            }
            let Some(node) = graph.find_node(&next) else {
                continue;
            };
            if !node.enabled || !cost_fn.consider_node(node) {
                continue;
            }

            let edge_cost = cost_fn.edge_cost(edge);
            if !edge_cost.is_finite() || edge_cost < 0.0 {
                continue;
            }

            let new_cost = cost + edge_cost;
            if new_cost < *distances.get(&next).unwrap_or(&f64::INFINITY) {
                distances.insert(next, new_cost);
                previous.insert(next, address);
                heap.push(State {
                    cost: new_cost,
                    estimate: new_cost + cost_fn.heuristic(&next, destination),
                    address: next,
                });
            }
        }
    }

    None
}

/// Depth-first search returning the first feasible path found.
///
/// Cost is the hop count of whatever path turns up first.
pub fn any_path(graph: &Graph, source: &Address, destination: &Address) -> Option<PathResult> {
    if !usable(graph.find_node(source)) || !usable(graph.find_node(destination)) {
        return None;
    }

    let mut previous: HashMap<Address, Address> = HashMap::new();
    let mut visited: HashSet<Address> = HashSet::from([*source]);
    let mut stack = vec![*source];

    while let Some(address) = stack.pop() {
        if address == *destination {
            let path = reconstruct_path(&previous, source, destination);
            let cost = path.len().saturating_sub(1) as f64;
            return Some(PathResult { path, cost });
        }
        for edge in graph.outgoing_edges(&address) {
            let next = edge.destination;
            if edge.enabled && usable(graph.find_node(&next)) && visited.insert(next) {
                previous.insert(next, address);
                stack.push(next);
            }
        }
    }

    None
}

fn reconstruct_path(
    previous: &HashMap<Address, Address>,
    source: &Address,
    destination: &Address,
) -> Vec<Address> {
    let mut path = vec![*destination];
    let mut current = *destination;

    while current != *source {
        match previous.get(&current) {
            Some(prev) => {
                path.push(*prev);
                current = *prev;
            }
            None => break,
        }
    }

    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(text: &str) -> Address {
        text.parse().unwrap()
    }

    fn diamond() -> Graph {
        // a -> b -> d and a -> c -> d, with b -> d expensive
        let mut graph = Graph::new();
        for name in ["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"] {
            graph.create_node(addr(name));
        }
        graph.insert_edge(addr("10.0.0.1"), addr("10.0.0.2"), false);
        graph.insert_edge(addr("10.0.0.2"), addr("10.0.0.4"), false);
        graph.insert_edge(addr("10.0.0.1"), addr("10.0.0.3"), false);
        graph.insert_edge(addr("10.0.0.3"), addr("10.0.0.4"), false);
        graph.set_edge_weight(&addr("10.0.0.2"), &addr("10.0.0.4"), 10.0);
        graph
    }

    #[test]
    fn weighted_search_avoids_expensive_edge() {
        let graph = diamond();
        let result = shortest_path(&graph, &addr("10.0.0.1"), &addr("10.0.0.4"), &EdgeWeight).unwrap();
        assert_eq!(result.path, vec![addr("10.0.0.1"), addr("10.0.0.3"), addr("10.0.0.4")]);
        assert_eq!(result.cost, 2.0);
    }

    #[test]
    fn least_hops_breaks_ties_by_address() {
        let graph = diamond();
        let result = shortest_path(&graph, &addr("10.0.0.1"), &addr("10.0.0.4"), &LeastHops).unwrap();
        assert_eq!(result.hops(), 2);
        assert_eq!(result.next_hop(), Some(addr("10.0.0.2")));
    }

    #[test]
    fn disabled_elements_are_never_used() {
        let mut graph = diamond();
        graph.disable_node(&addr("10.0.0.2"));
        graph.disable_edge(&addr("10.0.0.3"), &addr("10.0.0.4"));
        assert!(shortest_path(&graph, &addr("10.0.0.1"), &addr("10.0.0.4"), &LeastHops).is_none());
        assert!(any_path(&graph, &addr("10.0.0.1"), &addr("10.0.0.4")).is_none());
    }

    #[test]
    fn cycles_terminate() {
        let mut graph = Graph::new();
        for name in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            graph.create_node(addr(name));
        }
        graph.insert_edge(addr("10.0.0.1"), addr("10.0.0.2"), false);
        graph.insert_edge(addr("10.0.0.2"), addr("10.0.0.1"), false);
        graph.insert_edge(addr("10.0.0.2"), addr("10.0.0.3"), false);
        graph.insert_edge(addr("10.0.0.3"), addr("10.0.0.1"), false);
        graph.create_node(addr("10.0.0.9"));

        assert!(shortest_path(&graph, &addr("10.0.0.1"), &addr("10.0.0.9"), &LeastHops).is_none());
        let found = any_path(&graph, &addr("10.0.0.3"), &addr("10.0.0.2")).unwrap();
        assert_eq!(found.path.first(), Some(&addr("10.0.0.3")));
        assert_eq!(found.path.last(), Some(&addr("10.0.0.2")));
    }

    #[test]
    fn found_paths_only_use_enabled_edges() {
        let graph = diamond();
        let result = shortest_path(&graph, &addr("10.0.0.1"), &addr("10.0.0.4"), &EdgeWeight).unwrap();
        for pair in result.path.windows(2) {
            assert!(graph.find_edge(&pair[0], &pair[1]).is_some_and(|edge| edge.enabled));
        }
    }
}
