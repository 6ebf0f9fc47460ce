//! Broadcast hub — fans snapshots out to every ready session.
//!
//! Sends are non-blocking: a saturated session drops that snapshot alone
//! and the rest of the fleet is untouched. Sessions that keep saturating
//! are evicted (their queue closes, which the writer task observes as a
//! graceful close). Session counts publish on a watch channel for the
//! metrics collector.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use starling_proto::ServerControl;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::metrics;
use crate::queue::OutboundQueue;

/// Evict a session after this many snapshots dropped in a row.
pub const MAX_CONSECUTIVE_DROPS: u32 = 30;

#[derive(Debug, Clone, Copy, Default)]
pub struct HubStats {
    pub ready: usize,
}

struct SessionSlot {
    queue: Arc<OutboundQueue>,
    consecutive_drops: u32,
}

pub struct Hub {
    sessions: Mutex<HashMap<u64, SessionSlot>>,
    stats_tx: watch::Sender<HubStats>,
    max_consecutive_drops: u32,
}

impl Hub {
    pub fn new() -> (Arc<Self>, watch::Receiver<HubStats>) {
        Self::with_drop_threshold(MAX_CONSECUTIVE_DROPS)
    }

    pub fn with_drop_threshold(threshold: u32) -> (Arc<Self>, watch::Receiver<HubStats>) {
        let (stats_tx, stats_rx) = watch::channel(HubStats::default());
        let hub = Arc::new(Hub {
            sessions: Mutex::new(HashMap::new()),
            stats_tx,
            max_consecutive_drops: threshold.max(1),
        });
        (hub, stats_rx)
    }

    /// Add a session that has completed the readiness handshake.
    pub fn register(&self, id: u64, queue: Arc<OutboundQueue>) {
        let mut sessions = self.sessions.lock().expect("hub lock poisoned");
        sessions.insert(id, SessionSlot { queue, consecutive_drops: 0 });
        let ready = sessions.len();
        drop(sessions);
        self.publish(ready);
        debug!(session = id, ready, "hub: session ready");
    }

    pub fn unregister(&self, id: u64) {
        let mut sessions = self.sessions.lock().expect("hub lock poisoned");
        if sessions.remove(&id).is_some() {
            let ready = sessions.len();
            drop(sessions);
            self.publish(ready);
            debug!(session = id, ready, "hub: session removed");
        }
    }

    /// Non-blocking fan-out of one snapshot body to every ready session.
    pub fn broadcast_snapshot(&self, body: Arc<Vec<u8>>) {
        let mut evicted = Vec::new();
        let mut sessions = self.sessions.lock().expect("hub lock poisoned");

        for (&id, slot) in sessions.iter_mut() {
            match slot.queue.push_snapshot(body.clone()) {
                Ok(()) => slot.consecutive_drops = 0,
                Err(_) => {
                    slot.consecutive_drops += 1;
                    metrics::snapshot_dropped();
                    if slot.consecutive_drops >= self.max_consecutive_drops {
                        evicted.push(id);
                    }
                }
            }
        }

        for id in &evicted {
            if let Some(slot) = sessions.remove(id) {
                slot.queue.close();
                metrics::session_evicted();
                warn!(
                    session = id,
                    drops = self.max_consecutive_drops,
                    "hub: session evicted after sustained saturation"
                );
            }
        }

        let ready = sessions.len();
        drop(sessions);
        if !evicted.is_empty() {
            self.publish(ready);
        }
    }

    /// Serialize once and queue for every ready session.
    pub fn broadcast_control(&self, msg: &ServerControl) {
        let json = match msg.to_json() {
            Ok(j) => j,
            Err(e) => {
                warn!(error = %e, "hub: failed to serialize control broadcast");
                return;
            }
        };
        let sessions = self.sessions.lock().expect("hub lock poisoned");
        for slot in sessions.values() {
            let _ = slot.queue.push_control(json.clone());
        }
    }

    /// Queue a control message for one session. False when the session is
    /// gone or its queue refused the message.
    pub fn send_control(&self, id: u64, msg: &ServerControl) -> bool {
        let json = match msg.to_json() {
            Ok(j) => j,
            Err(_) => return false,
        };
        let sessions = self.sessions.lock().expect("hub lock poisoned");
        match sessions.get(&id) {
            Some(slot) => slot.queue.push_control(json).is_ok(),
            None => false,
        }
    }

    /// Queue a one-shot snapshot for a single session.
    pub fn send_snapshot(&self, id: u64, body: Arc<Vec<u8>>) -> bool {
        let sessions = self.sessions.lock().expect("hub lock poisoned");
        match sessions.get(&id) {
            Some(slot) => slot.queue.push_snapshot(body).is_ok(),
            None => false,
        }
    }

    /// Close every session queue. Used at shutdown to drain the fleet.
    pub fn close_all(&self) {
        let mut sessions = self.sessions.lock().expect("hub lock poisoned");
        for slot in sessions.values() {
            slot.queue.close();
        }
        sessions.clear();
        drop(sessions);
        self.publish(0);
    }

    pub fn ready_count(&self) -> usize {
        self.sessions.lock().expect("hub lock poisoned").len()
    }

    fn publish(&self, ready: usize) {
        let _ = self.stats_tx.send(HubStats { ready });
    }
}
