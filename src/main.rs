use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use forge_bus::{EventConsumer, EventProducer, InMemoryTransport};
use forge_engine::backend::HttpBackend;
use forge_engine::context::ContextAggregator;
use forge_engine::intent::IntentClassifier;
use forge_engine::state::StateTracker;
use forge_llm::{AnthropicProvider, FallbackChain, LocalProvider, OpenAiProvider};
use forge_server::{ConnectionRegistry, Orchestrator, ServerConfig};
use forge_store::{sweep, Database, SessionStore};

#[derive(Parser, Debug)]
#[command(name = "forge", about = "Conversation engine for the project-generation assistant")]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 8087)]
    port: u16,

    /// Path to the session database. Defaults to ~/.forge/sessions.db.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Base URL of the project backend (MCP server).
    #[arg(long, default_value = "http://localhost:8082")]
    backend_url: String,

    /// Session idle TTL in hours.
    #[arg(long, default_value_t = 24)]
    session_ttl_hours: u64,

    /// AI generation timeout in seconds.
    #[arg(long, default_value_t = 60)]
    ai_timeout_secs: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    forge_telemetry::init(&forge_telemetry::TelemetryConfig::default());
    tracing::info!("starting forge");

    // Storage
    let db_path = args.db_path.unwrap_or_else(|| {
        dirs_home().join(".forge").join("sessions.db")
    });
    let db = Database::open(&db_path).expect("failed to open session database");
    let store = SessionStore::with_ttl(db, Duration::from_secs(args.session_ttl_hours * 3600));

    // Engine services
    let aggregator = ContextAggregator::new(store.clone());
    let classifier = IntentClassifier::new(aggregator.clone());
    let tracker = StateTracker::new(store.clone(), aggregator.clone());

    // AI provider chain: remote providers first, local fallback last.
    let chain = FallbackChain::new(vec![
        Arc::new(OpenAiProvider::from_env()),
        Arc::new(AnthropicProvider::from_env()),
        Arc::new(LocalProvider),
    ]);
    tracing::info!(info = ?chain.provider_info(), "AI providers configured");

    // Project backend
    let backend = Arc::new(HttpBackend::new(args.backend_url, Duration::from_secs(120)));

    // Event bus: producer feeds the loop-back transport, consumer drains it.
    let (transport, bus_rx) = InMemoryTransport::new(1024);
    let producer = Arc::new(EventProducer::new(transport));
    let consumer = EventConsumer::new();

    // Live connections
    let registry = Arc::new(ConnectionRegistry::new(256));

    forge_server::bridge::register_event_handlers(
        &consumer,
        store.clone(),
        tracker.clone(),
        aggregator.clone(),
        registry.clone(),
    );
    let consumer_handle = consumer.start(bus_rx);

    // Background session expiry sweep
    let sweep_cancel = CancellationToken::new();
    let sweep_handle = sweep::start_expiry_sweep(
        store.clone(),
        Duration::from_secs(600),
        sweep_cancel.clone(),
    );

    let orchestrator = Arc::new(
        Orchestrator::new(
            store,
            aggregator,
            classifier,
            tracker,
            chain,
            backend,
            producer,
            registry.clone(),
        )
        .with_ai_timeout(Duration::from_secs(args.ai_timeout_secs)),
    );

    let config = ServerConfig {
        port: args.port,
        ..Default::default()
    };
    let server = forge_server::start(config, orchestrator, registry)
        .await
        .expect("failed to start server");

    tracing::info!(port = server.port, "forge ready");

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");

    tracing::info!("shutting down");
    sweep_cancel.cancel();
    consumer.shutdown(Duration::from_secs(5)).await;
    let _ = sweep_handle.await;
    let _ = consumer_handle.await;
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
