//! Bidirectional map between external string identifiers and wire slots.
//!
//! Ingestion names nodes with printable strings (filenames, opaque names);
//! the wire carries compact u32 slots. External IDs that are themselves
//! decimal u32 strings map to that numeric slot directly — this preserves
//! server-originated slots when a client echoes them back as strings.
//! Everything else gets a freshly minted slot from a monotonic counter.

use std::collections::HashMap;

use starling_proto::Slot;

#[derive(Debug, Default)]
pub struct IdentityTable {
    forward: HashMap<String, Slot>,
    reverse: HashMap<Slot, String>,
    next_slot: u32,
}

impl IdentityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the slot for `external_id`, assigning one if it is new.
    ///
    /// Additions are append-only for the current generation; only
    /// [`reset`](Self::reset) removes entries.
    pub fn intern(&mut self, external_id: &str) -> Slot {
        if let Some(&slot) = self.forward.get(external_id) {
            return slot;
        }

        // A decimal u32 string is a slot the client already learned —
        // promote it verbatim instead of minting.
        let slot = match external_id.parse::<u32>() {
            Ok(numeric) => Slot(numeric),
            Err(_) => self.mint(),
        };

        self.forward.insert(external_id.to_string(), slot);
        self.reverse.insert(slot, external_id.to_string());
        slot
    }

    /// The external ID occupying `slot`, if any.
    pub fn lookup(&self, slot: Slot) -> Option<&str> {
        self.reverse.get(&slot).map(String::as_str)
    }

    /// The slot already assigned to `external_id`, if any. Never assigns.
    pub fn reverse(&self, external_id: &str) -> Option<Slot> {
        self.forward.get(external_id).copied()
    }

    /// Clear both directions and the counter. Emitted after a graph
    /// generation change.
    pub fn reset(&mut self) {
        self.forward.clear();
        self.reverse.clear();
        self.next_slot = 0;
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Mint the next free slot, skipping values already occupied by
    /// promoted numeric IDs.
    fn mint(&mut self) -> Slot {
        loop {
            let candidate = Slot(self.next_slot);
            self.next_slot = self.next_slot.wrapping_add(1);
            if !self.reverse.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}
