//! The node set — insertion-ordered, slot-indexed, owned by exactly one
//! simulation task. Snapshots preserve insertion order; clients must not
//! assume slots are dense or contiguous.

use std::collections::HashMap;

use rand::Rng;
use starling_proto::{NodeRecord, Slot, Vec3};

use crate::error::GraphError;
use crate::identity::IdentityTable;
use crate::node::{Edge, Node};

#[derive(Debug, Default)]
pub struct GraphState {
    nodes: Vec<Node>,
    index: HashMap<Slot, usize>,
    edges: Vec<Edge>,
    edge_index: HashMap<(Slot, Slot), usize>,
    identity: IdentityTable,
    /// Bumped on every reset. Slots are only stable within one generation.
    generation: u64,
}

impl GraphState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `external_id` and create its node if this is the first
    /// sighting. Returns the slot either way.
    pub fn insert_node(&mut self, external_id: &str) -> Slot {
        let slot = self.identity.intern(external_id);
        if !self.index.contains_key(&slot) {
            self.index.insert(slot, self.nodes.len());
            self.nodes.push(Node::new(slot, external_id));
        }
        slot
    }

    /// Add or reinforce the unordered edge between two slots. Self-edges
    /// are ignored. Both endpoints gain the connected flag.
    pub fn upsert_edge(&mut self, a: Slot, b: Slot, weight: f32) -> Result<(), GraphError> {
        if a == b {
            return Ok(());
        }
        if !self.index.contains_key(&a) {
            return Err(GraphError::InvalidSlot(a));
        }
        if !self.index.contains_key(&b) {
            return Err(GraphError::InvalidSlot(b));
        }

        let edge = Edge::new(a, b, weight.max(0.0));
        match self.edge_index.get(&edge.key()) {
            Some(&i) => self.edges[i].weight += edge.weight,
            None => {
                self.edge_index.insert(edge.key(), self.edges.len());
                self.edges.push(edge);
            }
        }

        for slot in [a, b] {
            if let Some(node) = self.node_mut(slot) {
                node.set_connected(true);
            }
        }
        Ok(())
    }

    pub fn node(&self, slot: Slot) -> Option<&Node> {
        self.index.get(&slot).map(|&i| &self.nodes[i])
    }

    pub fn node_mut(&mut self, slot: Slot) -> Option<&mut Node> {
        let i = *self.index.get(&slot)?;
        Some(&mut self.nodes[i])
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn identity(&self) -> &IdentityTable {
        &self.identity
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Apply a user nudge at a tick boundary. The record is assumed to be
    /// wire-sanitized already (the decoder clamps); unknown slots are the
    /// caller's signal to warn and drop.
    pub fn apply_nudge(&mut self, record: &NodeRecord) -> Result<(), GraphError> {
        let node = self
            .node_mut(record.slot)
            .ok_or(GraphError::InvalidSlot(record.slot))?;
        node.position = record.position;
        node.velocity = record.velocity;
        Ok(())
    }

    /// Point-in-time ordered view of the node set for the wire.
    pub fn snapshot(&self) -> Vec<NodeRecord> {
        self.nodes.iter().map(Node::record).collect()
    }

    /// Drop all nodes, edges, and identities and start a new generation.
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.index.clear();
        self.edges.clear();
        self.edge_index.clear();
        self.identity.reset();
        self.generation += 1;
    }

    /// Seed initial positions on a Fibonacci sphere — near-uniform angular
    /// coverage with a little radial jitter so exact overlaps cannot occur.
    pub fn seed_positions<R: Rng>(&mut self, radius: f32, rng: &mut R) {
        let count = self.nodes.len() as f32;
        let golden_ratio = (1.0 + 5.0_f32.sqrt()) / 2.0;

        for (i, node) in self.nodes.iter_mut().enumerate() {
            let i = i as f32;
            let theta = 2.0 * std::f32::consts::PI * i / golden_ratio;
            let phi = (1.0 - 2.0 * (i + 0.5) / count).acos();
            let r = radius * (0.9 + rng.gen_range(0.0..0.2));

            node.position = Vec3 {
                x: r * phi.sin() * theta.cos(),
                y: r * phi.sin() * theta.sin(),
                z: r * phi.cos(),
            };
            node.velocity = Vec3::ZERO;
        }
    }

    /// Reseed every active node uniformly inside a sphere with zero
    /// velocity. Returns the affected slots so the caller can open its
    /// acknowledgement window.
    pub fn randomize_positions<R: Rng>(&mut self, radius: f32, rng: &mut R) -> Vec<Slot> {
        let mut affected = Vec::new();
        for node in &mut self.nodes {
            if !node.is_active() {
                continue;
            }
            // Uniform direction, cube-root radial density for uniform
            // volume coverage.
            let dir = loop {
                let v = Vec3 {
                    x: rng.gen_range(-1.0..1.0),
                    y: rng.gen_range(-1.0..1.0),
                    z: rng.gen_range(-1.0..1.0),
                };
                let len = v.length();
                if len > 1e-4 && len <= 1.0 {
                    break Vec3 { x: v.x / len, y: v.y / len, z: v.z / len };
                }
            };
            let r = radius * rng.gen_range(0.0f32..1.0).cbrt();
            node.position = Vec3 { x: dir.x * r, y: dir.y * r, z: dir.z * r };
            node.velocity = Vec3::ZERO;
            affected.push(node.slot);
        }
        affected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn insert_is_idempotent_per_id() {
        let mut graph = GraphState::new();
        let a = graph.insert_node("a");
        let again = graph.insert_node("a");
        assert_eq!(a, again);
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn numeric_id_occupies_its_own_slot() {
        let mut graph = GraphState::new();
        let named = graph.insert_node("file-a");
        let numeric = graph.insert_node("7");
        assert_eq!(named, Slot(0));
        assert_eq!(numeric, Slot(7));
        assert_eq!(graph.snapshot().len(), 2);
    }

    #[test]
    fn duplicate_edges_accumulate_weight() {
        let mut graph = GraphState::new();
        let a = graph.insert_node("a");
        let b = graph.insert_node("b");
        graph.upsert_edge(a, b, 2.0).unwrap();
        graph.upsert_edge(b, a, 3.0).unwrap();

        assert_eq!(graph.edges().len(), 1);
        assert_eq!(graph.edges()[0].weight, 5.0);
        assert!(graph.node(a).unwrap().is_connected());
        assert!(graph.node(b).unwrap().is_connected());
    }

    #[test]
    fn self_edges_are_ignored() {
        let mut graph = GraphState::new();
        let a = graph.insert_node("a");
        graph.upsert_edge(a, a, 1.0).unwrap();
        assert!(graph.edges().is_empty());
        assert!(!graph.node(a).unwrap().is_connected());
    }

    #[test]
    fn edge_to_unknown_slot_fails() {
        let mut graph = GraphState::new();
        let a = graph.insert_node("a");
        assert!(matches!(
            graph.upsert_edge(a, Slot(99), 1.0),
            Err(GraphError::InvalidSlot(Slot(99)))
        ));
    }

    #[test]
    fn nudge_unknown_slot_fails_others_apply() {
        let mut graph = GraphState::new();
        let a = graph.insert_node("a");

        let nudge = NodeRecord {
            slot: a,
            position: Vec3::new(1.0, 2.0, 3.0),
            velocity: Vec3::new(0.01, 0.0, 0.0),
        };
        graph.apply_nudge(&nudge).unwrap();
        assert_eq!(graph.node(a).unwrap().position, Vec3::new(1.0, 2.0, 3.0));

        let bad = NodeRecord { slot: Slot(404), ..nudge };
        assert!(matches!(
            graph.apply_nudge(&bad),
            Err(GraphError::InvalidSlot(Slot(404)))
        ));
    }

    #[test]
    fn snapshot_preserves_insertion_order() {
        let mut graph = GraphState::new();
        graph.insert_node("z");
        graph.insert_node("5");
        graph.insert_node("a");

        let slots: Vec<Slot> = graph.snapshot().iter().map(|r| r.slot).collect();
        assert_eq!(slots, vec![Slot(0), Slot(5), Slot(1)]);
    }

    #[test]
    fn reset_starts_a_new_generation() {
        let mut graph = GraphState::new();
        let a = graph.insert_node("a");
        let b = graph.insert_node("b");
        graph.upsert_edge(a, b, 1.0).unwrap();

        let generation = graph.generation();
        graph.reset();
        assert!(graph.is_empty());
        assert!(graph.edges().is_empty());
        assert_eq!(graph.generation(), generation + 1);
        assert_eq!(graph.insert_node("fresh"), Slot(0));
    }

    #[test]
    fn seeding_spreads_nodes_without_overlap() {
        let mut graph = GraphState::new();
        for i in 0..50 {
            graph.insert_node(&format!("n{i}"));
        }
        let mut rng = StdRng::seed_from_u64(7);
        graph.seed_positions(3.0, &mut rng);

        for node in graph.nodes() {
            let r = node.position.length();
            assert!(r >= 2.6 && r <= 3.4, "radius {r} out of band");
            assert_eq!(node.velocity, Vec3::ZERO);
        }

        // No two nodes may land on the same point.
        for (i, a) in graph.nodes().iter().enumerate() {
            for b in &graph.nodes()[i + 1..] {
                assert_ne!(a.position, b.position);
            }
        }
    }

    #[test]
    fn randomize_skips_inactive_nodes() {
        let mut graph = GraphState::new();
        let a = graph.insert_node("a");
        let b = graph.insert_node("b");
        graph.node_mut(b).unwrap().set_active(false);

        let mut rng = StdRng::seed_from_u64(1);
        let affected = graph.randomize_positions(5.0, &mut rng);

        assert_eq!(affected, vec![a]);
        assert_eq!(graph.node(b).unwrap().position, Vec3::ZERO);
        assert!(graph.node(a).unwrap().position.length() <= 5.0);
    }
}
