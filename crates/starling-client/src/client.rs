//! The reconnecting client task.
//!
//! One task owns the socket. Applications push [`ClientCommand`]s and read
//! [`ClientEvent`]s; the task walks the connection state machine, holds
//! binary traffic until the readiness handshake, coalesces nudges through
//! the 50 ms debounce, and enforces the outbound rate limit. When the
//! transport drops it redials on the backoff schedule; once the attempt
//! budget is gone it parks in `Failed` until a `Reset` command re-arms it.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use starling_proto::{frame, record, ClientControl, NodeRecord, ServerControl, Slot};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::backoff::ReconnectPolicy;
use crate::state::ConnectionState;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Nudge debounce window.
const DEBOUNCE: Duration = Duration::from_millis(50);

/// Node updates per outbound message; the rest of a burst is dropped.
const NUDGE_BATCH_LIMIT: usize = 2;

/// Per-attempt transport dial timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for `connection_established` before giving up on a
/// freshly dialed transport.
const READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Outbound keepalive cadence.
const KEEPALIVE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL, e.g. `ws://host:8080/ws`.
    pub url: String,
    pub reconnect: ReconnectPolicy,
    /// Messages allowed per rate window.
    pub message_rate_limit: u32,
    pub message_time_window: Duration,
    /// Outbound queue bound, items.
    pub max_queue_size: usize,
    /// Frame bodies at or below this skip compression.
    pub compression_threshold: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            reconnect: ReconnectPolicy::default(),
            message_rate_limit: 60,
            message_time_window: Duration::from_millis(1000),
            max_queue_size: 100,
            compression_threshold: 1024,
        }
    }
}

impl ClientConfig {
    /// Deployment configuration: `STARLING_WS_URL` names the server.
    pub fn from_env() -> Self {
        let mut config = ClientConfig::default();
        if let Ok(url) = std::env::var("STARLING_WS_URL") {
            config.url = url;
        }
        config
    }
}

/// Application → client.
#[derive(Debug)]
pub enum ClientCommand {
    /// Move a node; debounced and coalesced latest-wins per slot.
    Nudge(NodeRecord),
    /// Send a control message.
    Control(ClientControl),
    /// Leave `Failed` and start dialing again.
    Reset,
    /// Shut the client down for good.
    Close,
}

/// Client → application.
#[derive(Debug)]
pub enum ClientEvent {
    /// A decoded snapshot, in the server's insertion order.
    Snapshot(Vec<NodeRecord>),
    Loading(String),
    UpdatesStarted { timestamp: u64 },
    SettingChanged {
        category: String,
        setting: String,
        value: serde_json::Value,
    },
}

pub struct ClientHandle {
    pub commands: mpsc::UnboundedSender<ClientCommand>,
    pub state: watch::Receiver<ConnectionState>,
    pub events: mpsc::Receiver<ClientEvent>,
}

/// Spawn the client task.
pub fn spawn(config: ClientConfig) -> (ClientHandle, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let (event_tx, event_rx) = mpsc::channel(256);

    let task = tokio::spawn(run(config, cmd_rx, state_tx, event_tx));

    (
        ClientHandle { commands: cmd_tx, state: state_rx, events: event_rx },
        task,
    )
}

async fn run(
    config: ClientConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientCommand>,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: mpsc::Sender<ClientEvent>,
) {
    let set_state = |s: ConnectionState| {
        let _ = state_tx.send(s);
    };

    // Consecutive failures since the last READY connection.
    let mut attempts: u32 = 0;

    'reconnect: loop {
        set_state(ConnectionState::Connecting);
        info!(url = %config.url, attempt = attempts, "client: dialing");

        let dial = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(config.url.as_str()));
        let ws = match dial.await {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                warn!(url = %config.url, error = %e, "client: connect failed");
                match on_failure(&config, &mut attempts, &mut cmd_rx, &set_state).await {
                    Recovery::Retry => continue 'reconnect,
                    Recovery::Stop => return,
                }
            }
            Err(_) => {
                warn!(url = %config.url, timeout = ?CONNECT_TIMEOUT, "client: connect timed out");
                match on_failure(&config, &mut attempts, &mut cmd_rx, &set_state).await {
                    Recovery::Retry => continue 'reconnect,
                    Recovery::Stop => return,
                }
            }
        };

        set_state(ConnectionState::Connected);
        let (mut ws_tx, mut ws_rx) = ws.split();

        match wait_for_ready(&mut ws_rx, &mut cmd_rx).await {
            WaitOutcome::Ready => {}
            WaitOutcome::Close => {
                let _ = ws_tx.close().await;
                set_state(ConnectionState::Closed);
                return;
            }
            WaitOutcome::Lost => {
                warn!("client: transport lost before readiness handshake");
                match on_failure(&config, &mut attempts, &mut cmd_rx, &set_state).await {
                    Recovery::Retry => continue 'reconnect,
                    Recovery::Stop => return,
                }
            }
        }

        set_state(ConnectionState::Ready);
        // Reaching READY refunds the attempt budget.
        attempts = 0;
        info!("client: ready — binary streaming permitted");

        match session_loop(&config, &mut ws_tx, &mut ws_rx, &mut cmd_rx, &event_tx).await {
            Outcome::Closed => {
                let _ = ws_tx.close().await;
                set_state(ConnectionState::Closed);
                return;
            }
            Outcome::Lost => {
                match on_failure(&config, &mut attempts, &mut cmd_rx, &set_state).await {
                    Recovery::Retry => continue 'reconnect,
                    Recovery::Stop => return,
                }
            }
        }
    }
}

enum Recovery {
    Retry,
    Stop,
}

/// Book a failure against the attempt budget: back off and retry, or park
/// in `Failed` until the application resets us.
async fn on_failure(
    config: &ClientConfig,
    attempts: &mut u32,
    cmd_rx: &mut mpsc::UnboundedReceiver<ClientCommand>,
    set_state: &impl Fn(ConnectionState),
) -> Recovery {
    *attempts += 1;

    if config.reconnect.exhausted(*attempts) {
        warn!(attempts = *attempts, "client: attempt budget spent, parking in failed");
        set_state(ConnectionState::Failed);
        if !wait_for_reset(cmd_rx).await {
            set_state(ConnectionState::Closed);
            return Recovery::Stop;
        }
        *attempts = 0;
        return Recovery::Retry;
    }

    set_state(ConnectionState::Reconnecting);
    let delay = config.reconnect.delay(*attempts - 1, &mut rand::thread_rng());
    debug!(?delay, attempt = *attempts, "client: backing off");
    if !backoff_drain(cmd_rx, delay).await {
        set_state(ConnectionState::Closed);
        return Recovery::Stop;
    }
    Recovery::Retry
}

/// Sleep out the backoff while draining commands. Nudges and controls sent
/// while disconnected are dropped — there is nowhere for them to go.
/// Returns false when the application closed the client.
async fn backoff_drain(
    cmd_rx: &mut mpsc::UnboundedReceiver<ClientCommand>,
    delay: Duration,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = cmd_rx.recv() => match cmd {
                None | Some(ClientCommand::Close) => return false,
                Some(ClientCommand::Reset) => {} // already retrying
                Some(other) => debug!(?other, "client: command dropped while disconnected"),
            }
        }
    }
}

/// Park in `Failed` until `Reset` (true) or `Close` (false).
async fn wait_for_reset(cmd_rx: &mut mpsc::UnboundedReceiver<ClientCommand>) -> bool {
    loop {
        match cmd_rx.recv().await {
            None | Some(ClientCommand::Close) => return false,
            Some(ClientCommand::Reset) => {
                info!("client: reset received, re-arming");
                return true;
            }
            Some(other) => debug!(?other, "client: command dropped while failed"),
        }
    }
}

enum WaitOutcome {
    Ready,
    Lost,
    Close,
}

/// Wait for the server's `connection_established`. Binary frames arriving
/// before readiness are discarded.
async fn wait_for_ready(
    ws_rx: &mut WsSource,
    cmd_rx: &mut mpsc::UnboundedReceiver<ClientCommand>,
) -> WaitOutcome {
    let deadline = Instant::now() + READY_TIMEOUT;

    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match ServerControl::from_json(&text) {
                        Ok(ServerControl::ConnectionEstablished { .. }) => {
                            return WaitOutcome::Ready;
                        }
                        Ok(other) => debug!(?other, "client: control before readiness"),
                        Err(_) => debug!("client: unknown control before readiness ignored"),
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    debug!("client: binary before readiness discarded");
                }
                Some(Ok(Message::Close(_))) | None => return WaitOutcome::Lost,
                Some(Ok(_)) => {} // ping/pong
                Some(Err(e)) => {
                    warn!(error = %e, "client: transport error during handshake");
                    return WaitOutcome::Lost;
                }
            },

            cmd = cmd_rx.recv() => match cmd {
                None | Some(ClientCommand::Close) => return WaitOutcome::Close,
                Some(other) => debug!(?other, "client: command dropped before readiness"),
            },

            _ = tokio::time::sleep_until(deadline) => {
                warn!("client: no connection_established within timeout");
                return WaitOutcome::Lost;
            }
        }
    }
}

enum Outcome {
    Lost,
    Closed,
}

/// One item waiting in the outbound queue.
#[derive(Debug)]
enum OutItem {
    /// Sealed binary frame — a position update.
    Frame(Vec<u8>),
    Control(String),
}

/// The streaming loop: inbound snapshots out to the application, outbound
/// nudges and controls in from it, all under the rate limit.
async fn session_loop(
    config: &ClientConfig,
    ws_tx: &mut WsSink,
    ws_rx: &mut WsSource,
    cmd_rx: &mut mpsc::UnboundedReceiver<ClientCommand>,
    event_tx: &mpsc::Sender<ClientEvent>,
) -> Outcome {
    let mut out: VecDeque<OutItem> = VecDeque::new();
    let mut limiter = RateWindow::new(config.message_rate_limit, config.message_time_window);
    let mut nudges: HashMap<Slot, NodeRecord> = HashMap::new();
    let mut flush_at: Option<Instant> = None;

    let mut keepalive = tokio::time::interval(KEEPALIVE);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    keepalive.tick().await;

    loop {
        let flush_deadline = flush_at;
        let debounce = async move {
            match flush_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        let send_at = if out.is_empty() { None } else { Some(limiter.ready_at()) };
        let send_gate = async move {
            match send_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    let body = frame::open(&data);
                    match record::decode(&body) {
                        Ok(decoded) => {
                            if decoded.clamped {
                                debug!("client: inbound snapshot was clamped");
                            }
                            emit(event_tx, ClientEvent::Snapshot(decoded.records));
                        }
                        Err(e) => warn!(error = %e, "client: malformed snapshot dropped"),
                    }
                }
                Some(Ok(Message::Text(text))) => route_control(&text, event_tx),
                Some(Ok(Message::Close(_))) | None => {
                    info!("client: server closed the connection");
                    return Outcome::Lost;
                }
                Some(Ok(_)) => {} // ping/pong, handled by the stack
                Some(Err(e)) => {
                    warn!(error = %e, "client: transport error");
                    return Outcome::Lost;
                }
            },

            cmd = cmd_rx.recv() => match cmd {
                None | Some(ClientCommand::Close) => return Outcome::Closed,
                Some(ClientCommand::Reset) => {}
                Some(ClientCommand::Nudge(rec)) => {
                    nudges.insert(rec.slot, rec);
                    if flush_at.is_none() {
                        flush_at = Some(Instant::now() + DEBOUNCE);
                    }
                }
                Some(ClientCommand::Control(control)) => match control.to_json() {
                    Ok(json) => enqueue(&mut out, OutItem::Control(json), config.max_queue_size),
                    Err(e) => warn!(error = %e, "client: unserializable control dropped"),
                },
            },

            _ = debounce => {
                flush_at = None;
                let batch = drain_nudges(&mut nudges);
                if !batch.is_empty() {
                    let sealed = frame::seal(&record::encode(&batch), config.compression_threshold);
                    enqueue(&mut out, OutItem::Frame(sealed), config.max_queue_size);
                }
            }

            _ = send_gate => {
                limiter.consume();
                if let Some(item) = out.pop_front() {
                    let msg = match item {
                        OutItem::Frame(bytes) => Message::Binary(bytes.into()),
                        OutItem::Control(json) => Message::Text(json.into()),
                    };
                    if ws_tx.send(msg).await.is_err() {
                        return Outcome::Lost;
                    }
                }
            }

            _ = keepalive.tick() => {
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return Outcome::Lost;
                }
            }
        }
    }
}

/// Collapse the debounce buffer into one batch, honoring the per-message
/// limit. The excess is dropped with a warning, not carried over.
fn drain_nudges(nudges: &mut HashMap<Slot, NodeRecord>) -> Vec<NodeRecord> {
    let mut batch: Vec<NodeRecord> = nudges.drain().map(|(_, r)| r).collect();
    if batch.len() > NUDGE_BATCH_LIMIT {
        warn!(
            got = batch.len(),
            limit = NUDGE_BATCH_LIMIT,
            "client: nudge batch too large, excess dropped"
        );
        batch.truncate(NUDGE_BATCH_LIMIT);
    }
    batch
}

/// Queue an outbound item under the drop policy: a queued position frame
/// is replaced by its successor; a full queue evicts the oldest control
/// message first.
fn enqueue(out: &mut VecDeque<OutItem>, item: OutItem, cap: usize) {
    match item {
        OutItem::Frame(bytes) => {
            if let Some(slot) = out.iter_mut().find(|i| matches!(i, OutItem::Frame(_))) {
                *slot = OutItem::Frame(bytes);
                return;
            }
            if out.len() >= cap {
                if let Some(i) = out.iter().position(|i| matches!(i, OutItem::Control(_))) {
                    out.remove(i);
                } else {
                    warn!("client: outbound queue saturated, frame dropped");
                    return;
                }
            }
            out.push_back(OutItem::Frame(bytes));
        }
        OutItem::Control(json) => {
            if out.len() >= cap {
                match out.iter().position(|i| matches!(i, OutItem::Control(_))) {
                    Some(i) => {
                        out.remove(i);
                    }
                    None => {
                        warn!("client: outbound queue saturated, control dropped");
                        return;
                    }
                }
            }
            out.push_back(OutItem::Control(json));
        }
    }
}

/// Parse and surface one server control message. Unknown types are
/// ignored at debug level.
fn route_control(text: &str, event_tx: &mpsc::Sender<ClientEvent>) {
    match ServerControl::from_json(text) {
        Ok(ServerControl::ConnectionEstablished { .. }) => {} // already ready
        Ok(ServerControl::Loading { message }) => emit(event_tx, ClientEvent::Loading(message)),
        Ok(ServerControl::UpdatesStarted { timestamp }) => {
            emit(event_tx, ClientEvent::UpdatesStarted { timestamp })
        }
        Ok(ServerControl::Settings { category, setting, value }) => emit(
            event_tx,
            ClientEvent::SettingChanged { category, setting, value },
        ),
        Err(_) => debug!("client: unknown control message ignored"),
    }
}

/// Hand an event to the application without blocking the socket. A full
/// event channel drops the event — the consumer is behind anyway.
fn emit(event_tx: &mpsc::Sender<ClientEvent>, event: ClientEvent) {
    if event_tx.try_send(event).is_err() {
        debug!("client: event dropped, application is not draining");
    }
}

/// Counted window: `limit` sends per `window`; over-budget sends wait for
/// the window to roll.
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

    fn ready_at(&self) -> Instant {
        if self.started.elapsed() >= self.window || self.sent < self.limit {
            Instant::now()
        } else {
            self.started + self.window
        }
    }

    fn consume(&mut self) {
        if self.started.elapsed() >= self.window {
            self.started = Instant::now();
            self.sent = 0;
        }
        self.sent += 1;
    }
}
