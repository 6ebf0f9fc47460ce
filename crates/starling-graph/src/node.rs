//! Node and edge values. Nodes carry wire state plus mass and flags;
//! edges are unordered slot pairs with an accumulated weight.

use serde::{Deserialize, Serialize};
use starling_proto::{NodeRecord, Slot, Vec3};

/// Flag bit 0 — node participates in the simulation. Inactive nodes are
/// skipped by the kernel but keep their slot.
pub const FLAG_ACTIVE: u8 = 1 << 0;

/// Flag bit 1 — node has at least one edge; enables spring and centering.
pub const FLAG_CONNECTED: u8 = 1 << 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub slot: Slot,
    pub external_id: String,
    pub position: Vec3,
    pub velocity: Vec3,
    pub mass: u8,
    pub flags: u8,
}

impl Node {
    pub fn new(slot: Slot, external_id: impl Into<String>) -> Self {
        Node {
            slot,
            external_id: external_id.into(),
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            mass: 1,
            flags: FLAG_ACTIVE,
        }
    }

    pub fn is_active(&self) -> bool {
        self.flags & FLAG_ACTIVE != 0
    }

    pub fn is_connected(&self) -> bool {
        self.flags & FLAG_CONNECTED != 0
    }

    pub fn set_active(&mut self, active: bool) {
        if active {
            self.flags |= FLAG_ACTIVE;
        } else {
            self.flags &= !FLAG_ACTIVE;
        }
    }

    pub fn set_connected(&mut self, connected: bool) {
        if connected {
            self.flags |= FLAG_CONNECTED;
        } else {
            self.flags &= !FLAG_CONNECTED;
        }
    }

    /// Derive mass from the size of the content behind this node, for the
    /// ingestion collaborator. Log-scaled so a 1 MiB file does not weigh a
    /// thousand times a 1 KiB one; always at least 1.
    pub fn set_mass_from_size(&mut self, size_bytes: u64) {
        let log2 = (64 - size_bytes.leading_zeros()) as u8;
        self.mass = log2.max(1);
    }

    pub fn record(&self) -> NodeRecord {
        NodeRecord {
            slot: self.slot,
            position: self.position,
            velocity: self.velocity,
        }
    }
}

/// An unordered pair of slots with a weight. Identity is the sorted pair;
/// inserting the same pair again accumulates weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: Slot,
    pub target: Slot,
    pub weight: f32,
}

impl Edge {
    pub fn new(source: Slot, target: Slot, weight: f32) -> Self {
        Edge { source, target, weight }
    }

    /// Deduplication key — the two slots in sorted order.
    pub fn key(&self) -> (Slot, Slot) {
        if self.source <= self.target {
            (self.source, self.target)
        } else {
            (self.target, self.source)
        }
    }
}
