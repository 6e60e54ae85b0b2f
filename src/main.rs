use dotenvy::dotenv;
use log::info;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use deskserver::api_router::configure_api_routes;
use deskserver::audit::LogAuditSink;
use deskserver::config::AppConfig;
use deskserver::escalation::{EscalationNotifier, LogNotifier, WebhookNotifier};
use deskserver::shared::state::AppState;
use deskserver::sla::sweep::SlaSweeper;
use deskserver::sla::{SlaPolicySet, SlaTracker};
use deskserver::tasks::LogTaskSink;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env()?;

    let policies = match &config.sla.policy_path {
        Some(path) => {
            let set = SlaPolicySet::load(path)
                .map_err(|e| anyhow::anyhow!("failed to load SLA policy file {path}: {e:#}"))?;
            info!("loaded SLA policy table from {path}");
            set
        }
        None => {
            info!("no SLA_POLICY_PATH set, using the built-in policy table");
            SlaPolicySet::builtin()
        }
    };
    policies
        .validate()
        .map_err(|e| anyhow::anyhow!("SLA policy table rejected: {e}"))?;

    let notifier: Arc<dyn EscalationNotifier> = match &config.escalation_webhook {
        Some(url) => {
            info!("escalations will be posted to {url}");
            Arc::new(WebhookNotifier::new(url.clone())?)
        }
        None => Arc::new(LogNotifier),
    };

    let state = Arc::new(AppState::build(
        config.clone(),
        SlaTracker::new(policies),
        Arc::clone(&notifier),
        Arc::new(LogAuditSink),
        Arc::new(LogTaskSink),
    ));

    let shutdown = CancellationToken::new();
    let sweeper = SlaSweeper::new(
        Arc::clone(&state.store),
        Arc::clone(&state.tracker),
        notifier,
        Duration::from_secs(config.sla.sweep_interval_secs),
        config.sla.sweep_batch_size,
    );
    let sweep_handle = tokio::spawn(sweeper.run(shutdown.clone()));

    let app = configure_api_routes()
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("deskserver listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    let _ = sweep_handle.await;
    info!("deskserver stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
    shutdown.cancel();
}
