/*!
 * WAKERELAY KERNEL - Point d'entrée du serveur
 *
 * RÔLE : Charge la configuration, construit l'orchestrateur (transport shell,
 * probe ping système), démarre le publisher MQTT optionnel et l'API HTTP.
 * Ctrl-C arrête le monitoring et ferme tous les pools.
 */

mod events;
mod http;

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wakerelay_kernel::config::load_config;
use wakerelay_kernel::remote::ping::SystemPingProbe;
use wakerelay_kernel::remote::shell::ShellChannelProvider;
use wakerelay_kernel::remote::ChannelExecutor;
use wakerelay_kernel::WakeOrchestrator;

use crate::http::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wakerelay_kernel=info")),
        )
        .init();

    let cfg = load_config().await;
    cfg.validate().context("invalid kernel configuration")?;

    let provider = Arc::new(
        ShellChannelProvider::new(cfg.transport.clone()).context("invalid transport configuration")?,
    );
    let orchestrator = Arc::new(
        WakeOrchestrator::new(
            cfg.clone(),
            provider,
            Arc::new(ChannelExecutor),
            Arc::new(SystemPingProbe),
        )
        .context("failed to build orchestrator")?,
    );

    // completions → MQTT
    let stop = CancellationToken::new();
    let publisher = cfg.mqtt.clone().map(|mqtt| {
        events::spawn_completion_publisher(mqtt, orchestrator.subscribe_completions(), stop.clone())
    });

    let app = http::build_router(AppState {
        orchestrator: orchestrator.clone(),
    });

    let listener = TcpListener::bind(&cfg.http.listen)
        .await
        .with_context(|| format!("cannot bind {}", cfg.http.listen))?;
    info!("listening on http://{}", cfg.http.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await
        .context("HTTP server failed")?;

    orchestrator.shutdown().await;
    stop.cancel();
    if let Some(publisher) = publisher {
        publisher.await.ok();
    }
    Ok(())
}
