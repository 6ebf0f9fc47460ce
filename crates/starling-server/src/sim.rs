//! The simulation task — sole owner of the graph state.
//!
//! Every mutation (ingestion loads, user nudges, parameter changes,
//! randomization) arrives on the command channel and applies at a tick
//! boundary; there are no locks around the graph mid-tick. Snapshots are
//! driven by a steady interval with skip semantics — a slow kernel skips
//! emissions rather than queueing them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use starling_graph::{kernel, GraphError, GraphState, PhysicsParams};
use starling_proto::control::unix_millis;
use starling_proto::{record, NodeRecord, ServerControl, Slot};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::hub::Hub;
use crate::metrics;

/// How long nudges for reseeded slots are ignored after a randomization.
const RANDOMIZE_ACK_WINDOW: Duration = Duration::from_secs(5);

/// Radius used when seeding a freshly loaded graph.
const SEED_RADIUS: f32 = 3.0;

/// Commands accepted by the simulation task. All graph mutations funnel
/// through here.
#[derive(Debug)]
pub enum SimCommand {
    /// Decoded, debounced node updates from one session. Applied at the
    /// next tick boundary, latest-wins per slot.
    Nudges(Vec<NodeRecord>),
    /// Pause or resume physics. Nudges still apply while paused.
    Pause(bool),
    /// Gate server-side reseeding. Enabling performs a one-shot reseed.
    EnableRandomization(bool),
    /// One extra kernel tick ahead of the next scheduled one.
    ApplyForces,
    /// One-shot snapshot for `session`; enters streaming mode.
    RequestInitialData { session: u64 },
    /// Proposed single-setting change from `session`.
    SettingsUpdate {
        session: u64,
        category: String,
        setting: String,
        value: serde_json::Value,
    },
    /// Ingestion boundary — replace the graph contents.
    Load(GraphLoad),
    /// Drain and close every session, then exit.
    Shutdown,
}

/// Graph contents handed over by the ingestion collaborator. External IDs
/// only — slots are assigned here, on this side of the boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphLoad {
    pub nodes: Vec<LoadNode>,
    #[serde(default)]
    pub edges: Vec<LoadEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadNode {
    pub id: String,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadEdge {
    pub source: String,
    pub target: String,
    #[serde(default = "default_weight")]
    pub weight: f32,
}

fn default_weight() -> f32 {
    1.0
}

/// Spawn the simulation task. The returned sender is the only way to
/// mutate the graph; dropping it shuts the task down.
pub fn spawn(settings: Settings, hub: Arc<Hub>) -> (mpsc::UnboundedSender<SimCommand>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(settings, hub, rx));
    (tx, task)
}

async fn run(settings: Settings, hub: Arc<Hub>, mut rx: mpsc::UnboundedReceiver<SimCommand>) {
    let mut graph = GraphState::new();
    let mut params = settings.physics;

    let mut ticker = tokio::time::interval(settings.snapshot_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut paused = false;
    // Reseeding is disabled on startup; clients opt in via the control
    // channel.
    let mut randomization_enabled = false;
    // No snapshots flow until the first requestInitialData.
    let mut streaming = false;
    // Active randomization acknowledgement window, if any.
    let mut hold: Option<(Instant, HashSet<Slot>)> = None;
    // Nudges waiting for the next tick boundary, latest-wins per slot.
    let mut pending: HashMap<Slot, NodeRecord> = HashMap::new();

    info!(
        update_rate = settings.simulation.update_rate,
        "sim: task started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some((deadline, _)) = &hold {
                    if Instant::now() >= *deadline {
                        hold = None;
                        info!("sim: randomization window closed, physics resumed");
                    }
                }

                apply_pending(&mut graph, &mut pending);

                if paused || hold.is_some() || !streaming || graph.is_empty() {
                    continue;
                }

                let t0 = Instant::now();
                kernel::step_parallel(graph.nodes_mut(), &params);
                metrics::tick_duration(t0.elapsed().as_secs_f64());

                hub.broadcast_snapshot(Arc::new(record::encode(&graph.snapshot())));
            }

            cmd = rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    SimCommand::Nudges(records) => {
                        buffer_nudges(&mut pending, records, &hold);
                    }

                    SimCommand::Pause(enabled) => {
                        paused = enabled;
                        info!(paused, "sim: pause toggled");
                    }

                    SimCommand::EnableRandomization(enabled) => {
                        let was_enabled = randomization_enabled;
                        randomization_enabled = enabled;
                        if enabled && !was_enabled && !graph.is_empty() {
                            let affected = graph
                                .randomize_positions(settings.simulation.randomize_radius, &mut rand::thread_rng());
                            info!(nodes = affected.len(), "sim: reseeded node positions");
                            hold = Some((Instant::now() + RANDOMIZE_ACK_WINDOW, affected.into_iter().collect()));
                            // Clients need the reseeded positions right away,
                            // even though physics is held.
                            if streaming {
                                hub.broadcast_snapshot(Arc::new(record::encode(&graph.snapshot())));
                            }
                        }
                    }

                    SimCommand::ApplyForces => {
                        if hold.is_some() {
                            debug!("sim: applyForces ignored during randomization window");
                            continue;
                        }
                        apply_pending(&mut graph, &mut pending);
                        if !graph.is_empty() {
                            let t0 = Instant::now();
                            kernel::step_parallel(graph.nodes_mut(), &params);
                            metrics::tick_duration(t0.elapsed().as_secs_f64());
                        }
                    }

                    SimCommand::RequestInitialData { session } => {
                        if !streaming {
                            streaming = true;
                            hub.broadcast_control(&ServerControl::UpdatesStarted {
                                timestamp: unix_millis(),
                            });
                            info!(session, "sim: streaming mode entered");
                        }
                        hub.send_snapshot(session, Arc::new(record::encode(&graph.snapshot())));
                    }

                    SimCommand::SettingsUpdate { session, category, setting, value } => {
                        handle_settings_update(&hub, &mut params, session, &category, &setting, value);
                    }

                    SimCommand::Load(load) => {
                        hub.broadcast_control(&ServerControl::Loading {
                            message: format!("building graph ({} nodes)", load.nodes.len()),
                        });
                        load_graph(&mut graph, load);
                        pending.clear();
                        hold = None;
                        if streaming {
                            hub.broadcast_control(&ServerControl::UpdatesStarted {
                                timestamp: unix_millis(),
                            });
                            hub.broadcast_snapshot(Arc::new(record::encode(&graph.snapshot())));
                        }
                    }

                    SimCommand::Shutdown => break,
                }
            }
        }
    }

    hub.close_all();
    info!("sim: task stopped");
}

/// Buffer inbound nudges latest-wins, discarding those aimed at slots
/// inside an open randomization window.
fn buffer_nudges(
    pending: &mut HashMap<Slot, NodeRecord>,
    records: Vec<NodeRecord>,
    hold: &Option<(Instant, HashSet<Slot>)>,
) {
    for record in records {
        if let Some((_, held_slots)) = hold {
            if held_slots.contains(&record.slot) {
                metrics::nudge_held();
                debug!(slot = %record.slot, "sim: nudge held during randomization window");
                continue;
            }
        }
        pending.insert(record.slot, record);
    }
}

/// Apply buffered nudges at the tick boundary. Unknown slots are dropped
/// with a warning; the task never fails from one bad input.
fn apply_pending(graph: &mut GraphState, pending: &mut HashMap<Slot, NodeRecord>) {
    if pending.is_empty() {
        return;
    }
    let mut applied = 0u64;
    for (_, record) in pending.drain() {
        match graph.apply_nudge(&record) {
            Ok(()) => applied += 1,
            Err(GraphError::InvalidSlot(slot)) => {
                metrics::nudge_invalid_slot();
                warn!(slot = %slot, "sim: nudge for unknown slot dropped");
            }
            Err(e) => warn!(error = %e, "sim: nudge rejected"),
        }
    }
    if applied > 0 {
        metrics::nudges_applied(applied);
    }
}

fn load_graph(graph: &mut GraphState, load: GraphLoad) {
    graph.reset();
    for node in &load.nodes {
        let slot = graph.insert_node(&node.id);
        if let Some(size) = node.size {
            if let Some(n) = graph.node_mut(slot) {
                n.set_mass_from_size(size);
            }
        }
    }
    for edge in &load.edges {
        let (source, target) = match (
            graph.identity().reverse(&edge.source),
            graph.identity().reverse(&edge.target),
        ) {
            (Some(s), Some(t)) => (s, t),
            _ => {
                warn!(source = %edge.source, target = %edge.target,
                    "sim: edge references unknown node, skipped");
                continue;
            }
        };
        if let Err(e) = graph.upsert_edge(source, target, edge.weight) {
            warn!(error = %e, "sim: edge rejected");
        }
    }
    graph.seed_positions(SEED_RADIUS, &mut rand::thread_rng());
    info!(
        nodes = graph.len(),
        edges = graph.edges().len(),
        generation = graph.generation(),
        "sim: graph loaded"
    );
}

/// Route a proposed setting change. Accepted values broadcast the
/// authoritative `settings` message to the fleet; rejected ones answer the
/// proposing session with the retained value.
fn handle_settings_update(
    hub: &Hub,
    params: &mut PhysicsParams,
    session: u64,
    category: &str,
    setting: &str,
    value: serde_json::Value,
) {
    if category != "physics" {
        debug!(category, setting, "sim: settings update for unknown category ignored");
        return;
    }

    let Some(numeric) = value.as_f64() else {
        warn!(setting, "sim: non-numeric settings value rejected");
        return;
    };

    match params.apply(setting, numeric) {
        Ok(()) => {
            hub.broadcast_control(&ServerControl::Settings {
                category: category.to_string(),
                setting: setting.to_string(),
                value,
            });
            info!(setting, value = numeric, "sim: setting applied");
        }
        Err(e) => {
            warn!(setting, value = numeric, error = %e, "sim: setting rejected");
            if let Some(previous) = current_param(params, setting) {
                hub.send_control(
                    session,
                    &ServerControl::Settings {
                        category: category.to_string(),
                        setting: setting.to_string(),
                        value: serde_json::json!(previous),
                    },
                );
            }
        }
    }
}

fn current_param(params: &PhysicsParams, setting: &str) -> Option<f64> {
    match setting {
        "attraction" => Some(params.attraction as f64),
        "repulsion" => Some(params.repulsion as f64),
        "spring" => Some(params.spring as f64),
        "damping" => Some(params.damping as f64),
        "max_velocity" => Some(params.max_velocity as f64),
        "collision_radius" => Some(params.collision_radius as f64),
        "bounds_size" => Some(params.bounds_size as f64),
        "iterations" => Some(params.iterations as f64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Outbound, OutboundQueue};
    use starling_proto::Vec3;

    fn two_node_load() -> GraphLoad {
        GraphLoad {
            nodes: vec![
                LoadNode { id: "alpha".into(), size: None },
                LoadNode { id: "beta".into(), size: Some(4096) },
            ],
            edges: vec![LoadEdge { source: "alpha".into(), target: "beta".into(), weight: 2.0 }],
        }
    }

    async fn next_snapshot(queue: &OutboundQueue) -> Vec<NodeRecord> {
        loop {
            match queue.pop().await {
                Some(Outbound::Snapshot(body)) => {
                    return record::decode(&body).unwrap().records;
                }
                Some(Outbound::Control(_)) => continue,
                None => panic!("queue closed before a snapshot arrived"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn initial_data_then_streaming() {
        let (hub, _stats) = Hub::new();
        let (tx, task) = spawn(Settings::default(), hub.clone());

        let queue = OutboundQueue::new(16);
        hub.register(1, queue.clone());

        tx.send(SimCommand::Load(two_node_load())).unwrap();
        tx.send(SimCommand::RequestInitialData { session: 1 }).unwrap();

        let records = next_snapshot(&queue).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].slot, Slot(0));
        assert_eq!(records[1].slot, Slot(1));

        // Streaming now — scheduled ticks emit further snapshots.
        tokio::time::advance(Duration::from_millis(40)).await;
        let records = next_snapshot(&queue).await;
        assert_eq!(records.len(), 2);

        tx.send(SimCommand::Shutdown).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn nudges_coalesce_latest_wins() {
        let (hub, _stats) = Hub::new();
        let (tx, task) = spawn(Settings::default(), hub.clone());

        let queue = OutboundQueue::new(16);
        hub.register(1, queue.clone());

        tx.send(SimCommand::Load(GraphLoad {
            nodes: vec![LoadNode { id: "only".into(), size: None }],
            edges: vec![],
        }))
        .unwrap();
        tx.send(SimCommand::Pause(true)).unwrap();
        tx.send(SimCommand::RequestInitialData { session: 1 }).unwrap();
        let _ = next_snapshot(&queue).await;

        // Several updates to the same slot inside one boundary — only the
        // last position may be observed.
        for x in [1.0f32, 2.0, 3.0] {
            tx.send(SimCommand::Nudges(vec![NodeRecord {
                slot: Slot(0),
                position: Vec3::new(x, 0.0, 0.0),
                velocity: Vec3::ZERO,
            }]))
            .unwrap();
        }

        // Let a tick boundary pass (paused: nudges apply, no physics),
        // then ask for a fresh snapshot.
        tokio::time::advance(Duration::from_millis(40)).await;
        tx.send(SimCommand::RequestInitialData { session: 1 }).unwrap();
        let records = next_snapshot(&queue).await;
        assert_eq!(records[0].position, Vec3::new(3.0, 0.0, 0.0));

        tx.send(SimCommand::Shutdown).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn randomization_window_holds_nudges_then_accepts() {
        let (hub, _stats) = Hub::new();
        let (tx, task) = spawn(Settings::default(), hub.clone());

        let queue = OutboundQueue::new(16);
        hub.register(1, queue.clone());

        tx.send(SimCommand::Load(GraphLoad {
            nodes: vec![LoadNode { id: "n".into(), size: None }],
            edges: vec![],
        }))
        .unwrap();
        tx.send(SimCommand::Pause(true)).unwrap();
        tx.send(SimCommand::RequestInitialData { session: 1 }).unwrap();
        let _ = next_snapshot(&queue).await;

        tx.send(SimCommand::EnableRandomization(true)).unwrap();

        // A nudge right after the reseed lands inside the window — ignored.
        let nudge = NodeRecord {
            slot: Slot(0),
            position: Vec3::new(9.0, 9.0, 9.0),
            velocity: Vec3::ZERO,
        };
        tx.send(SimCommand::Nudges(vec![nudge])).unwrap();

        tokio::time::advance(Duration::from_millis(100)).await;
        tx.send(SimCommand::RequestInitialData { session: 1 }).unwrap();
        let records = next_snapshot(&queue).await;
        assert_ne!(records[0].position, Vec3::new(9.0, 9.0, 9.0));

        // Past the window, the same nudge is accepted.
        tokio::time::advance(Duration::from_secs(6)).await;
        tx.send(SimCommand::Nudges(vec![nudge])).unwrap();
        tokio::time::advance(Duration::from_millis(40)).await;
        tx.send(SimCommand::RequestInitialData { session: 1 }).unwrap();
        let records = next_snapshot(&queue).await;
        assert_eq!(records[0].position, Vec3::new(9.0, 9.0, 9.0));

        tx.send(SimCommand::Shutdown).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_setting_answers_with_previous_value() {
        let (hub, _stats) = Hub::new();
        let (tx, task) = spawn(Settings::default(), hub.clone());

        let queue = OutboundQueue::new(16);
        hub.register(1, queue.clone());

        tx.send(SimCommand::SettingsUpdate {
            session: 1,
            category: "physics".into(),
            setting: "damping".into(),
            value: serde_json::json!(7.5),
        })
        .unwrap();

        match queue.pop().await {
            Some(Outbound::Control(json)) => {
                let msg = ServerControl::from_json(&json).unwrap();
                match msg {
                    ServerControl::Settings { setting, value, .. } => {
                        assert_eq!(setting, "damping");
                        assert_eq!(value.as_f64(), Some(0.85));
                    }
                    other => panic!("expected settings, got {other:?}"),
                }
            }
            other => panic!("expected control, got {other:?}"),
        }

        tx.send(SimCommand::Shutdown).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn paused_simulation_emits_no_snapshots() {
        let (hub, _stats) = Hub::new();
        let (tx, task) = spawn(Settings::default(), hub.clone());

        let queue = OutboundQueue::new(16);
        hub.register(1, queue.clone());

        tx.send(SimCommand::Load(two_node_load())).unwrap();
        tx.send(SimCommand::Pause(true)).unwrap();
        tx.send(SimCommand::RequestInitialData { session: 1 }).unwrap();
        let _ = next_snapshot(&queue).await;

        tokio::time::advance(Duration::from_millis(200)).await;
        // Ticks fired, but paused: no snapshots may have been emitted.
        tokio::task::yield_now().await;
        assert!(queue.is_empty());

        tx.send(SimCommand::Shutdown).unwrap();
        task.await.unwrap();
    }
}
