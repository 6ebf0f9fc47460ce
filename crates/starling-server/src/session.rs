//! Per-connection session — a reader task and a writer task joined by the
//! bounded outbound queue.
//!
//! The reader parses frames and routes control messages; inbound node
//! updates debounce for 50 ms and coalesce latest-wins per slot before they
//! reach the simulation. The writer drains the queue under the configured
//! rate limit, seals binary bodies through the compression gate, and keeps
//! the heartbeat alive. Only transport-terminal conditions end the session;
//! malformed frames and unknown control types are logged and skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use starling_proto::control::unix_millis;
use starling_proto::{frame, record, ClientControl, NodeRecord, ProtoError, ServerControl, Slot};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::hub::Hub;
use crate::metrics;
use crate::queue::{Outbound, OutboundQueue};
use crate::sim::SimCommand;

/// Inbound nudge debounce window.
const DEBOUNCE: Duration = Duration::from_millis(50);

/// Maximum node updates accepted per inbound message; excess is dropped.
const NUDGE_BATCH_LIMIT: usize = 2;

/// Shared dependencies handed to every session.
#[derive(Clone)]
pub struct SessionContext {
    pub settings: Arc<Settings>,
    pub hub: Arc<Hub>,
    pub sim_tx: mpsc::UnboundedSender<SimCommand>,
}

/// Drive one connection until the transport closes or the hub evicts it.
pub async fn run(ws: WebSocket, id: u64, ctx: SessionContext) {
    let (ws_tx, ws_rx) = ws.split();

    let queue = OutboundQueue::new(ctx.settings.transport.max_queue_size);

    // Readiness handshake: the client may not send binary until it has
    // seen connection_established.
    let established = ServerControl::ConnectionEstablished { timestamp: unix_millis() };
    match established.to_json() {
        Ok(json) => {
            let _ = queue.push_control(json);
        }
        Err(e) => {
            warn!(session = id, error = %e, "session: failed to build handshake");
            return;
        }
    }
    ctx.hub.register(id, queue.clone());
    info!(session = id, "session: established");

    let writer = tokio::spawn(write_loop(ws_tx, queue.clone(), ctx.settings.clone()));

    read_loop(ws_rx, id, &ctx).await;

    // Reader finished — transport closed or errored. Tear down: pending
    // outbound items are discarded, the writer sees the close and exits.
    ctx.hub.unregister(id);
    queue.close();
    let _ = writer.await;
    info!(session = id, "session: closed");
}

/// Writer half: queue → socket, with rate limiting, frame sealing, and
/// heartbeat pings.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    queue: Arc<OutboundQueue>,
    settings: Arc<Settings>,
) {
    let mut limiter = RateWindow::new(
        settings.transport.message_rate_limit,
        Duration::from_millis(settings.transport.message_time_window_ms),
    );
    let mut heartbeat =
        tokio::time::interval(Duration::from_millis(settings.transport.heartbeat_interval_ms));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    heartbeat.tick().await; // skip the immediate first tick

    loop {
        tokio::select! {
            item = queue.pop() => {
                let Some(item) = item else {
                    // Graceful close — the hub evicted us or the session
                    // is tearing down.
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return;
                };

                limiter.acquire().await;

                let result = match item {
                    Outbound::Snapshot(body) => {
                        let sealed = frame::seal(&body, settings.transport.compression_threshold);
                        metrics::frame_sent(sealed.len());
                        ws_tx.send(Message::Binary(sealed.into())).await
                    }
                    Outbound::Control(json) => ws_tx.send(Message::Text(json.into())).await,
                };

                if result.is_err() {
                    // Transport gone; the reader will observe it too.
                    return;
                }
            }

            _ = heartbeat.tick() => {
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Reader half: socket → simulation, with debounce and control routing.
async fn read_loop(mut ws_rx: SplitStream<WebSocket>, id: u64, ctx: &SessionContext) {
    let transport = &ctx.settings.transport;
    let heartbeat_timeout = Duration::from_millis(transport.heartbeat_timeout_ms);

    let mut pending: HashMap<Slot, NodeRecord> = HashMap::new();
    // Armed when the first nudge of a burst arrives.
    let mut flush_at: Option<Instant> = None;
    let mut last_inbound = Instant::now();

    loop {
        let deadline = flush_at;
        let debounce = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        let idle = tokio::time::sleep_until(last_inbound + heartbeat_timeout);

        tokio::select! {
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else {
                    debug!(session = id, "session: transport closed");
                    break;
                };
                last_inbound = Instant::now();

                match msg {
                    Message::Binary(data) => {
                        if data.len() > transport.max_message_size {
                            warn!(session = id, bytes = data.len(),
                                "session: oversized frame dropped");
                            continue;
                        }
                        handle_binary(&data, id, &mut pending);
                        if !pending.is_empty() && flush_at.is_none() {
                            flush_at = Some(Instant::now() + DEBOUNCE);
                        }
                    }

                    Message::Text(text) => handle_control(&text, id, ctx),

                    // axum answers pings for us; both directions just
                    // refresh the liveness clock.
                    Message::Ping(_) | Message::Pong(_) => {}

                    Message::Close(_) => {
                        debug!(session = id, "session: close frame received");
                        break;
                    }
                }
            }

            _ = debounce => {
                flush_at = None;
                if !pending.is_empty() {
                    let batch: Vec<NodeRecord> = pending.drain().map(|(_, r)| r).collect();
                    if ctx.sim_tx.send(SimCommand::Nudges(batch)).is_err() {
                        break; // simulation is gone, nothing left to do
                    }
                }
            }

            _ = idle => {
                warn!(session = id, timeout = ?heartbeat_timeout,
                    "session: no inbound traffic, closing");
                break;
            }
        }
    }
}

/// Decode one binary frame into the debounce buffer.
fn handle_binary(data: &[u8], id: u64, pending: &mut HashMap<Slot, NodeRecord>) {
    let body = frame::open(data);
    let decoded = match record::decode(&body) {
        Ok(decoded) => decoded,
        Err(ProtoError::MalformedFrame(len)) => {
            metrics::frame_malformed();
            warn!(session = id, bytes = len, "session: malformed frame dropped");
            return;
        }
    };

    metrics::frame_recv(decoded.clamped);
    if decoded.clamped {
        debug!(session = id, "session: inbound values clamped to wire range");
    }

    if decoded.records.len() > NUDGE_BATCH_LIMIT {
        warn!(
            session = id,
            got = decoded.records.len(),
            limit = NUDGE_BATCH_LIMIT,
            "session: nudge batch too large, excess dropped"
        );
    }

    for record in decoded.records.into_iter().take(NUDGE_BATCH_LIMIT) {
        // Latest-wins per slot within the debounce window.
        pending.insert(record.slot, record);
    }
}

/// Route one control message. Unknown types are ignored at debug level —
/// versioning is additive.
fn handle_control(text: &str, id: u64, ctx: &SessionContext) {
    let msg = match ClientControl::from_json(text) {
        Ok(msg) => msg,
        Err(_) => {
            debug!(session = id, "session: unknown control message ignored");
            return;
        }
    };

    let command = match msg {
        ClientControl::RequestInitialData => SimCommand::RequestInitialData { session: id },
        ClientControl::EnableRandomization { enabled } => {
            SimCommand::EnableRandomization(enabled)
        }
        ClientControl::PauseSimulation { enabled } => SimCommand::Pause(enabled),
        ClientControl::ApplyForces { force_calculation, .. } => {
            if !force_calculation {
                return;
            }
            SimCommand::ApplyForces
        }
        ClientControl::SettingsUpdate { category, setting, value } => {
            SimCommand::SettingsUpdate { session: id, category, setting, value }
        }
    };

    if ctx.sim_tx.send(command).is_err() {
        warn!(session = id, "session: simulation task unavailable");
    }
}

/// Counted window rate limiter: `limit` sends per `window`, over-budget
/// sends wait for the window to roll — queued, never dropped.
struct RateWindow {
    limit: u32,
    window: Duration,
    started: Instant,
    sent: u32,
}

impl RateWindow {
    fn new(limit: u32, window: Duration) -> Self {
        RateWindow { limit: limit.max(1), window, started: Instant::now(), sent: 0 }
    }

    async fn acquire(&mut self) {
        if self.started.elapsed() >= self.window {
            self.started = Instant::now();
            self.sent = 0;
        }
        if self.sent >= self.limit {
            tokio::time::sleep_until(self.started + self.window).await;
            self.started = Instant::now();
            self.sent = 0;
        }
        self.sent += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starling_proto::Vec3;

    #[test]
    fn binary_batches_coalesce_latest_wins() {
        let mut pending = HashMap::new();
        let first = record::encode(&[NodeRecord {
            slot: Slot(3),
            position: Vec3::new(1.0, 0.0, 0.0),
            velocity: Vec3::ZERO,
        }]);
        let second = record::encode(&[NodeRecord {
            slot: Slot(3),
            position: Vec3::new(2.0, 0.0, 0.0),
            velocity: Vec3::ZERO,
        }]);

        handle_binary(&first, 1, &mut pending);
        handle_binary(&second, 1, &mut pending);

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[&Slot(3)].position.x, 2.0);
    }

    #[test]
    fn oversized_batches_keep_only_the_limit() {
        let records: Vec<NodeRecord> = (0..5)
            .map(|i| NodeRecord {
                slot: Slot(i),
                position: Vec3::ZERO,
                velocity: Vec3::ZERO,
            })
            .collect();
        let body = record::encode(&records);

        let mut pending = HashMap::new();
        handle_binary(&body, 1, &mut pending);
        assert_eq!(pending.len(), NUDGE_BATCH_LIMIT);
        assert!(pending.contains_key(&Slot(0)));
        assert!(pending.contains_key(&Slot(1)));
    }

    #[test]
    fn malformed_frames_leave_the_buffer_untouched() {
        let mut pending = HashMap::new();
        handle_binary(&[0u8; 30], 1, &mut pending);
        assert!(pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_window_delays_over_budget_sends() {
        let mut limiter = RateWindow::new(2, Duration::from_millis(100));

        let t0 = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(t0.elapsed(), Duration::ZERO);

        // Third send must wait for the window to roll.
        limiter.acquire().await;
        assert!(t0.elapsed() >= Duration::from_millis(100));
    }
}
