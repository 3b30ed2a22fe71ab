/// Execution Engine - Sandbox Lifecycle Protocol
///
/// **Core Responsibility:**
/// Drive one sandbox from creation to teardown and hand back raw output.
///
/// **Protocol (each failure short-circuits, teardown always runs):**
/// 1. Create the sandbox
/// 2. Copy the program archive into its root
/// 3. Start it
/// 4. Stream the problem input to stdin, for stdin-fed languages
/// 5. Wait for exit under a wall-clock deadline; kill on expiry
/// 6. Collect the combined log stream, up to the output limit, and demux it
/// 7. Remove the sandbox, exactly once
///
/// The engine does not grade. It knows nothing about jobs or verdicts.
use crate::error::ExecutionError;
use autograder_common::config::DEFAULT_MAX_OUTPUT_BYTES;
use crate::sandbox::{demux, CapturedOutput, SandboxError, SandboxHandle, SandboxProvider, SandboxSpec};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Where program archives are unpacked inside the sandbox.
pub const SANDBOX_ROOT: &str = "/";

/// Removal guard - guarantees the sandbox is removed exactly once
///
/// Normal paths call [`ContainerGuard::release`] and await the removal.
/// If the owning task is cancelled or panics first, `Drop` schedules the
/// removal on the runtime instead.
struct ContainerGuard {
    provider: Arc<dyn SandboxProvider>,
    handle: SandboxHandle,
    released: bool,
}

impl ContainerGuard {
    fn new(provider: Arc<dyn SandboxProvider>, handle: SandboxHandle) -> Self {
        Self {
            provider,
            handle,
            released: false,
        }
    }

    async fn release(mut self) {
        self.released = true;
        match self.provider.remove(&self.handle).await {
            Ok(()) => debug!(container = %self.handle, "Sandbox removed"),
            Err(e) => warn!(container = %self.handle, error = %e, "Failed to remove sandbox"),
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let provider = Arc::clone(&self.provider);
        let handle = self.handle.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = provider.remove(&handle).await {
                        warn!(container = %handle, error = %e, "Failed to remove abandoned sandbox");
                    }
                });
            }
            Err(_) => {
                warn!(container = %handle, "No runtime left to remove abandoned sandbox");
            }
        }
    }
}

/// Sandbox-provider-backed execution engine
pub struct SandboxEngine {
    provider: Arc<dyn SandboxProvider>,
    execution_timeout: Duration,
    output_limit: usize,
}

impl SandboxEngine {
    pub fn new(provider: Arc<dyn SandboxProvider>, execution_timeout: Duration) -> Self {
        Self {
            provider,
            execution_timeout,
            output_limit: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    /// Cap on captured bytes per stream.
    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit = bytes;
        self
    }

    pub fn provider(&self) -> &Arc<dyn SandboxProvider> {
        &self.provider
    }

    pub fn execution_timeout(&self) -> Duration {
        self.execution_timeout
    }

    pub fn output_limit(&self) -> usize {
        self.output_limit
    }

    /// Create a sandbox. Nothing needs removing if this fails.
    pub async fn create(&self, spec: &SandboxSpec) -> Result<SandboxSession, SandboxError> {
        let handle = self.provider.create(spec).await?;
        debug!(container = %handle, image = %spec.image, "Sandbox created");

        Ok(SandboxSession {
            guard: ContainerGuard::new(Arc::clone(&self.provider), handle),
            execution_timeout: self.execution_timeout,
            output_limit: self.output_limit,
        })
    }

    /// Make every image available before the first job needs it.
    pub async fn prefetch(&self, images: &[String]) -> Result<(), SandboxError> {
        for image in images {
            self.provider.ensure_image(image).await?;
        }
        Ok(())
    }
}

/// A created sandbox, owned until [`SandboxSession::teardown`].
pub struct SandboxSession {
    guard: ContainerGuard,
    execution_timeout: Duration,
    output_limit: usize,
}

impl SandboxSession {
    pub fn handle(&self) -> &SandboxHandle {
        &self.guard.handle
    }

    /// Copy, start, feed, wait and collect.
    pub async fn run(
        &self,
        archive: Vec<u8>,
        stdin: Option<&[u8]>,
    ) -> Result<CapturedOutput, ExecutionError> {
        let provider = &self.guard.provider;
        let handle = &self.guard.handle;

        provider.copy_archive(handle, SANDBOX_ROOT, archive).await?;
        provider.start(handle).await?;

        let execution = async {
            if let Some(input) = stdin {
                match provider.write_stdin(handle, input).await {
                    Ok(()) => {}
                    // A program may exit without reading its input.
                    Err(SandboxError::StdinClosed { .. }) => {
                        debug!(container = %handle, "Program closed stdin before reading all input");
                    }
                    Err(e) => return Err(e),
                }
            }
            provider.wait(handle).await
        };

        match tokio::time::timeout(self.execution_timeout, execution).await {
            Ok(Ok(exit_code)) => {
                debug!(container = %handle, exit_code, "Sandbox exited");
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                warn!(
                    container = %handle,
                    timeout_ms = self.execution_timeout.as_millis() as u64,
                    "Execution timed out - killing sandbox"
                );
                if let Err(e) = provider.kill(handle).await {
                    warn!(container = %handle, error = %e, "Failed to kill timed-out sandbox");
                }
                return Err(ExecutionError::Timeout(self.execution_timeout));
            }
        }

        match provider.collect_logs(handle, self.output_limit).await {
            Ok(frames) => Ok(demux(frames)),
            Err(SandboxError::OutputLimit { limit, .. }) => {
                warn!(container = %handle, limit, "Program output exceeded the limit");
                Err(ExecutionError::OutputLimit(limit))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the sandbox. Failures are logged, never returned.
    pub async fn teardown(self) {
        self.guard.release().await;
    }
}
