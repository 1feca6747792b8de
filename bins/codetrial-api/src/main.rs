mod handlers;
mod routes;

use anyhow::Context;
use axum::Router;
use codetrial_common::catalog::TestCatalog;
use codetrial_common::config::{LogFormat, SandboxKind, ServiceConfig};
use codetrial_common::languages::LanguageRegistry;
use codetrial_engine::{DockerSandbox, Evaluator, ProcessSandbox, SandboxRunner, Scheduler, SchedulerConfig};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub struct AppState {
    pub scheduler: Scheduler,
    pub catalog: RwLock<TestCatalog>,
    pub registry: Arc<LanguageRegistry>,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}

fn build_state(config: &ServiceConfig) -> anyhow::Result<AppState> {
    // Step 1: Language registry (file or built-in), narrowed to the enabled set
    let mut registry = LanguageRegistry::load_or_builtin(&config.languages_path)?;
    if let Some(enabled) = &config.enabled_languages {
        registry = registry.restrict_to(enabled)?;
    }
    let registry = Arc::new(registry);
    info!(languages = ?registry.list_languages(), "Languages enabled");

    // Step 2: Seed test catalog
    let catalog = TestCatalog::load_or_empty(&config.tests_path)?;
    info!(tests = catalog.len(), "Test catalog loaded");

    // Step 3: Sandbox backend
    let runner: Arc<dyn SandboxRunner> = match config.sandbox {
        SandboxKind::Process => Arc::new(ProcessSandbox::new(registry.clone(), &config.sandbox_root)),
        SandboxKind::Docker => Arc::new(DockerSandbox::connect(registry.clone())?),
    };
    info!(sandbox = runner.name(), "Sandbox backend selected");

    // Step 4: Scheduler
    let evaluator = Evaluator::new(runner, registry.clone(), config.output_limit_bytes);
    let scheduler = Scheduler::new(evaluator, SchedulerConfig::from_service(config));

    Ok(AppState {
        scheduler,
        catalog: RwLock::new(catalog),
        registry,
    })
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new().merge(routes::routes()).with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env()?;
    init_tracing(config.log_format);

    info!("Codetrial API booting...");

    let state = Arc::new(build_state(&config)?);

    // Start server
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!("HTTP server listening on {}", config.bind_addr);
    info!("Ready to accept submissions");

    axum::serve(listener, app(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    state.scheduler.shutdown().await;
    info!("Codetrial API stopped");
    Ok(())
}
