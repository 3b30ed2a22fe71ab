// CLI commands for the Autograder
use anyhow::{bail, Context, Result};
use autograder_common::config::DEFAULT_MAX_SOURCE_BYTES;
use autograder_common::types::{JobSnapshot, Submission};
use autograder_engine::sandbox::SandboxProvider;
use autograder_engine::{
    DockerProvider, FsProblemStore, JobManager, JobStore, LanguageRegistry, ManagerSettings,
    SandboxEngine, SandboxExecutor,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Built-in registry, or the one in `path` when given.
pub fn load_registry(path: Option<&Path>) -> Result<LanguageRegistry> {
    match path {
        Some(path) => LanguageRegistry::load(path)
            .with_context(|| format!("Failed to load languages from {}", path.display())),
        None => Ok(LanguageRegistry::builtin()),
    }
}

pub fn format_languages(registry: &LanguageRegistry) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<10} {:<36} {:<10} {:<6} {}\n",
        "Name", "Image", "File", "Input", "Command"
    ));
    out.push_str(&"─".repeat(90));
    out.push('\n');

    let entries = registry.entries();
    for lang in &entries {
        let input = format!("{:?}", lang.input).to_lowercase();
        out.push_str(&format!(
            "{:<10} {:<36} {:<10} {:<6} {}\n",
            lang.name,
            lang.image,
            lang.filename,
            input,
            lang.command.join(" ")
        ));
    }

    out.push_str(&format!("\nTotal: {} language(s)\n", entries.len()));
    out
}

/// List all configured languages
pub fn list_languages(registry: &LanguageRegistry) {
    println!("📋 Configured Languages:\n");
    print!("{}", format_languages(registry));
}

/// Pull every image the registry references
pub async fn pull_images(registry: &LanguageRegistry) -> Result<()> {
    let provider = DockerProvider::connect().context("Failed to connect to Docker daemon")?;

    for image in registry.images() {
        println!("🐳 Ensuring {}...", image);
        provider
            .ensure_image(&image)
            .await
            .with_context(|| format!("Failed to pull {}", image))?;
    }

    println!("✅ All images available");
    Ok(())
}

/// Grade one program through the same manager the API uses
pub async fn grade(
    registry: LanguageRegistry,
    problems_dir: &Path,
    problem: &str,
    language: &str,
    file: &Path,
    timeout_ms: u64,
) -> Result<JobSnapshot> {
    let source = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let image = match registry.lookup(language) {
        Some(config) => config.image.clone(),
        None => bail!("Language {} is not supported.", language),
    };

    let provider: Arc<dyn SandboxProvider> =
        Arc::new(DockerProvider::connect().context("Failed to connect to Docker daemon")?);
    let engine = SandboxEngine::new(provider, Duration::from_millis(timeout_ms));
    engine
        .prefetch(&[image])
        .await
        .context("Failed to prepare sandbox image")?;

    let executor = SandboxExecutor::new(
        engine,
        Arc::new(registry),
        Arc::new(FsProblemStore::new(problems_dir)),
    );
    let settings = ManagerSettings {
        tick_interval: POLL_INTERVAL,
        max_concurrent_jobs: 1,
        max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
    };
    let manager = JobManager::new(Arc::new(JobStore::new()), Arc::new(executor), settings);

    let admitted = manager
        .admit(Submission::new(problem, language, source))
        .await?;

    let finished = tokio::select! {
        snapshot = manager.wait_for_terminal(admitted.id, POLL_INTERVAL) => snapshot,
        _ = manager.run_until(std::future::pending::<()>()) => None,
    };

    finished.context("Job disappeared before finishing")
}
