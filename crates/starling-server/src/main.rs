use std::sync::Arc;

use tracing::info;

use starling_server::config::{self, Settings};
use starling_server::hub::Hub;
use starling_server::session::SessionContext;
use starling_server::sim::{self, GraphLoad, SimCommand};
use starling_server::{gateway, metrics};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("starling — live graph, many eyes");

    let settings = Settings::load()?;

    let (hub, stats_rx) = Hub::new();
    tokio::spawn(metrics::spawn_session_collector(stats_rx));

    let (sim_tx, _sim_task) = sim::spawn(settings.clone(), hub.clone());

    // The ingestion collaborator hands graph contents over as a JSON file;
    // everything after that arrives through the command channel.
    if let Ok(path) = std::env::var("STARLING_GRAPH") {
        let raw = std::fs::read_to_string(&path)?;
        let load: GraphLoad = serde_json::from_str(&raw)?;
        info!(%path, nodes = load.nodes.len(), edges = load.edges.len(),
            "loading graph handoff");
        let _ = sim_tx.send(SimCommand::Load(load));
    }

    let ctx = SessionContext { settings: Arc::new(settings), hub, sim_tx };
    gateway::serve(&config::bind_addr(), ctx).await
}
