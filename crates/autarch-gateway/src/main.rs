//! Chimera Autarch control-plane binary (spec §6): one TCP port serving a
//! WebSocket-framed control channel, TLS when a certificate pair is
//! configured, wiring the five core components behind an explicit `Core`.

mod connection;
mod core;
mod messages;
mod ratelimit;
mod remote;

use crate::core::{AppState, Core};
use crate::ratelimit::RegistrationLimiter;
use crate::remote::WsRemoteDispatcher;
use autarch_broker::EventBroker;
use autarch_metacog::{MetacogConfig, MetacognitiveEngine};
use autarch_nodes::{NodeRegistry, NodeRegistryConfig, ReplayGuard};
use autarch_orchestrator::{Orchestrator, OrchestratorConfig};
use autarch_persistence::{spawn_backup_loop, PersistenceStore};
use autarch_tools::{AnalyzeAndPatchTool, EchoTool, FederatedTrainingTool, InitializeSymbioticLinkTool, ToolRegistry};
use autarch_types::{AutarchConfig, EventType};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, state, peer_addr))
}

fn install_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Each periodic task is its own spawned loop tied to no external
/// cancellation token; they are daemon tasks that end when the process
/// does, matching the teacher's maintenance-loop shape.
fn spawn_health_sweep(nodes: Arc<NodeRegistry>, broker: Arc<EventBroker>, interval_seconds: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds));
        loop {
            ticker.tick().await;
            let disconnected = nodes.sweep_health(Utc::now());
            for node_id in disconnected {
                broker.publish(
                    EventType::NodeDisconnected,
                    serde_json::json!({ "node_id": node_id, "reason": "heartbeat_timeout" }),
                    EventType::NodeDisconnected.default_priority(),
                );
            }
        }
    });
}

fn build_state(config: &AutarchConfig, persistence: Arc<PersistenceStore>) -> AppState {
    let registration_secret = match std::env::var("AUTARCH_NODE_SECRET") {
        Ok(s) => s.into_bytes(),
        Err(_) => {
            tracing::warn!("AUTARCH_NODE_SECRET not set; using an insecure development default");
            b"insecure-development-secret".to_vec()
        }
    };

    let broker = Arc::new(EventBroker::new(config.events.subscriber_queue_size, 1000));

    let tools = Arc::new(ToolRegistry::new(broker.clone(), persistence.clone()));
    for result in [
        tools.register(Arc::new(EchoTool)),
        tools.register(Arc::new(FederatedTrainingTool)),
        tools.register(Arc::new(AnalyzeAndPatchTool)),
        tools.register(Arc::new(InitializeSymbioticLinkTool)),
    ] {
        if let Err(e) = result {
            tracing::warn!(error = %e, "builtin tool registration skipped");
        }
    }

    let nodes = Arc::new(NodeRegistry::new(NodeRegistryConfig {
        heartbeat_timeout_seconds: config.nodes.heartbeat_timeout_seconds,
        reputation_up: config.nodes.reputation_up,
        reputation_down: config.nodes.reputation_down,
    }));

    let metacog = Arc::new(MetacognitiveEngine::new(
        MetacogConfig {
            confidence_threshold: config.metacognitive.confidence_threshold,
            learning_cooldown_seconds: config.metacognitive.learning_cooldown_seconds,
            min_samples: config.metacognitive.min_samples,
            history_window: config.metacognitive.history_window,
        },
        broker.clone(),
        persistence.clone(),
    ));

    let core = Arc::new(Core {
        broker: broker.clone(),
        persistence: persistence.clone(),
        tools: tools.clone(),
        nodes: nodes.clone(),
        metacog: metacog.clone(),
        replay_guard: Arc::new(ReplayGuard::new(config.nodes.replay_window_seconds)),
        registration_secret,
        registration_limiter: Arc::new(RegistrationLimiter::new(
            config.nodes.registration_max_failures,
            config.nodes.registration_backoff_seconds,
        )),
        node_senders: Arc::new(DashMap::new()),
        pending_results: Arc::new(DashMap::new()),
    });

    let remote_dispatcher = Arc::new(WsRemoteDispatcher { core: core.clone() });
    let orchestrator = Arc::new(Orchestrator::new(
        config.intent.default_tool.clone(),
        OrchestratorConfig {
            max_retries: config.nodes.max_retries,
        },
        broker,
        tools,
        nodes,
        metacog,
        remote_dispatcher,
    ));

    AppState { core, orchestrator }
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[autarch-gateway] .env not loaded: {e} (using system environment)");
    }

    let config = match AutarchConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[autarch-gateway] failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    install_tracing(&config.logging.level);

    let persistence = match PersistenceStore::open_path(
        &config.persistence.database_path,
        config.events.subscriber_queue_size,
    ) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("[autarch-gateway] failed to open persistence store: {e}");
            return ExitCode::FAILURE;
        }
    };

    let state = build_state(&config, persistence.clone());

    spawn_health_sweep(
        state.core.nodes.clone(),
        state.core.broker.clone(),
        config.nodes.heartbeat_interval_seconds as u64,
    );

    let backups_dir = std::path::Path::new(&config.persistence.database_path)
        .parent()
        .unwrap_or_else(|| std::path::Path::new("."))
        .join("backups");
    spawn_backup_loop(
        persistence,
        backups_dir,
        config.persistence.backup_interval_seconds as u64,
        config.persistence.backup_retention,
    );

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
        .into_make_service_with_connect_info::<SocketAddr>();

    let addr: SocketAddr = match format!("{}:{}", config.control_plane.host, config.control_plane.port).parse() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("[autarch-gateway] invalid control_plane host/port: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(%addr, tls = config.control_plane.tls_enabled(), "starting control plane");

    // Graceful shutdown, matching the teacher's `tokio::select! { _ =
    // ctrl_c() => ... }` binaries: a Ctrl-C triggers `graceful_shutdown` on
    // the server handle instead of aborting in-flight connections.
    let handle = axum_server::Handle::new();
    tokio::spawn({
        let handle = handle.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received, draining connections");
            handle.graceful_shutdown(Some(Duration::from_secs(10)));
        }
    });

    let serve_result = if config.control_plane.tls_enabled() {
        let tls_config = match axum_server::tls_rustls::RustlsConfig::from_pem_file(
            config.control_plane.tls_cert.as_ref().unwrap(),
            config.control_plane.tls_key.as_ref().unwrap(),
        )
        .await
        {
            Ok(c) => c,
            Err(e) => {
                eprintln!("[autarch-gateway] failed to load TLS certificate/key: {e}");
                return ExitCode::FAILURE;
            }
        };
        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(app)
            .await
    } else {
        axum_server::bind(addr).handle(handle).serve(app).await
    };

    if let Err(e) = serve_result {
        eprintln!("[autarch-gateway] server error: {e}");
        return ExitCode::FAILURE;
    }

    tracing::info!("control plane shut down cleanly");
    ExitCode::SUCCESS
}
