mod error;
mod handlers;
mod routes;

use anyhow::Context;
use autograder_common::config::Config;
use autograder_engine::sandbox::SandboxProvider;
use autograder_engine::{
    DockerProvider, FsProblemStore, JobManager, JobStore, LanguageRegistry, ManagerSettings,
    SandboxEngine, SandboxExecutor,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

pub struct AppState {
    pub manager: Arc<JobManager>,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    if std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Autograder API booting...");

    let config = Config::from_env().context("Invalid configuration")?;

    let registry = match &config.languages_file {
        Some(path) => LanguageRegistry::load(path)
            .with_context(|| format!("Failed to load languages from {}", path.display()))?,
        None => LanguageRegistry::builtin(),
    };
    info!("Languages: {:?}", registry.names());

    if !config.problems_dir.is_dir() {
        warn!(
            "Problems directory {} does not exist; every submission will be rejected",
            config.problems_dir.display()
        );
    }

    let provider: Arc<dyn SandboxProvider> =
        Arc::new(DockerProvider::connect().context("Failed to connect to Docker daemon")?);
    let engine = SandboxEngine::new(provider, config.execution_timeout)
        .with_output_limit(config.max_output_bytes);

    if config.pull_images {
        let images = registry.images();
        info!("Prefetching {} image(s)", images.len());
        engine
            .prefetch(&images)
            .await
            .context("Failed to prefetch sandbox images")?;
    }

    let executor = SandboxExecutor::new(
        engine,
        Arc::new(registry),
        Arc::new(FsProblemStore::new(&config.problems_dir)),
    );
    let manager = Arc::new(JobManager::new(
        Arc::new(JobStore::new()),
        Arc::new(executor),
        ManagerSettings::from(&config),
    ));

    let (stop_scheduler, scheduler_stopped) = tokio::sync::oneshot::channel::<()>();
    let scheduler = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .run_until(async {
                    let _ = scheduler_stopped.await;
                })
                .await
        })
    };

    let app = routes::routes(Arc::new(AppState { manager }));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("HTTP server listening on {}", addr);
    info!("Ready to accept submissions");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    let _ = stop_scheduler.send(());
    scheduler.await.context("Scheduler task failed")?;

    info!("Autograder API stopped");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => warn!("Received shutdown signal, stopping..."),
        Err(e) => {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
