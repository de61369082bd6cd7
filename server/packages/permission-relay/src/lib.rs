use std::net::SocketAddr;
use std::sync::Arc;

use app::build_router;
use automation::WindowAutomation;
use coordinator::{Coordinator, CoordinatorConfig};

pub mod app;
pub mod automation;
pub mod cli;
pub mod coordinator;
pub mod discovery;
pub mod history;
pub mod hooks;
pub mod hub;
pub mod pending;
pub mod protocol;
pub mod registry;
pub mod testing;
pub mod transcript;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub coordinator: CoordinatorConfig,
}

pub async fn run_server(
    config: ServerConfig,
    automation: Arc<dyn WindowAutomation>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let coordinator = Arc::new(Coordinator::new(config.coordinator, automation));
    run_server_with_coordinator(config.host, config.port, coordinator).await
}

pub async fn run_server_with_coordinator(
    host: String,
    port: u16,
    coordinator: Arc<Coordinator>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = build_router(coordinator.clone());
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "permission-relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(coordinator))
        .await?;
    Ok(())
}

async fn shutdown_signal(coordinator: Arc<Coordinator>) {
    let _ = tokio::signal::ctrl_c().await;
    coordinator.shutdown().await;
}
