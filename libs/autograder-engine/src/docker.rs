// Docker sandbox provider using Bollard
use crate::sandbox::{LogFrame, SandboxError, SandboxHandle, SandboxProvider, SandboxSpec};
use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    KillContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    UploadToContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

type StdinWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Runs sandboxes as local Docker containers.
///
/// Containers have networking disabled and are removed with `force`, so a
/// container that is still running at teardown is killed first.
pub struct DockerProvider {
    docker: Docker,
    /// Containers created with stdin open. `None` until `start` attaches.
    stdin: Mutex<HashMap<SandboxHandle, Option<StdinWriter>>>,
}

impl DockerProvider {
    /// Connect to the local Docker daemon (`DOCKER_HOST` or the default socket).
    pub fn connect() -> Result<Self, DockerError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self::new(docker))
    }

    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            stdin: Mutex::new(HashMap::new()),
        }
    }

    async fn attach_stdin(&self, handle: &SandboxHandle) -> Result<StdinWriter, DockerError> {
        let options = Some(AttachContainerOptions::<String> {
            stdin: Some(true),
            stream: Some(true),
            ..Default::default()
        });

        let AttachContainerResults { input, .. } = self
            .docker
            .attach_container(handle.as_str(), options)
            .await?;
        Ok(input)
    }
}

/// Errors that mean the program stopped reading, not that Docker failed.
fn closed_by_program(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WriteZero
    )
}

fn stdin_error(handle: &SandboxHandle, e: io::Error) -> SandboxError {
    if closed_by_program(&e) {
        SandboxError::StdinClosed {
            handle: handle.clone(),
        }
    } else {
        SandboxError::Stdin {
            handle: handle.clone(),
            message: e.to_string(),
        }
    }
}

/// Add `len` to a stream's running total, failing once it passes `limit`.
fn count_output(
    total: &mut usize,
    len: usize,
    limit: usize,
    handle: &SandboxHandle,
) -> Result<(), SandboxError> {
    *total += len;
    if *total > limit {
        return Err(SandboxError::OutputLimit {
            handle: handle.clone(),
            limit,
        });
    }
    Ok(())
}

#[async_trait]
impl SandboxProvider for DockerProvider {
    /// Inspect first; pull only on a cache miss.
    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image, "Image cache hit");
            return Ok(());
        }

        warn!(image, "Image cache miss - pulling");

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| SandboxError::Image {
                image: image.to_string(),
                message: e.to_string(),
            })?;
        }

        info!(image, "Image pulled");
        Ok(())
    }

    async fn create(&self, spec: &SandboxSpec) -> Result<SandboxHandle, SandboxError> {
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            working_dir: Some(spec.working_dir.clone()),
            attach_stdin: Some(spec.open_stdin),
            open_stdin: Some(spec.open_stdin),
            stdin_once: Some(spec.open_stdin),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            network_disabled: Some(true),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| SandboxError::Create {
                image: spec.image.clone(),
                message: e.to_string(),
            })?;

        for warning in &container.warnings {
            warn!(container = %container.id, warning = %warning, "Docker warning on create");
        }

        let handle = SandboxHandle::new(container.id);
        if spec.open_stdin {
            self.stdin.lock().insert(handle.clone(), None);
        }
        Ok(handle)
    }

    async fn copy_archive(
        &self,
        handle: &SandboxHandle,
        root: &str,
        archive: Vec<u8>,
    ) -> Result<(), SandboxError> {
        let options = Some(UploadToContainerOptions {
            path: root,
            ..Default::default()
        });

        self.docker
            .upload_to_container(handle.as_str(), options, archive.into())
            .await
            .map_err(|e| SandboxError::CopyArchive {
                handle: handle.clone(),
                message: e.to_string(),
            })
    }

    /// Attach stdin before starting, so input is never raced by a fast exit.
    async fn start(&self, handle: &SandboxHandle) -> Result<(), SandboxError> {
        let fail = |message: String| SandboxError::Start {
            handle: handle.clone(),
            message,
        };

        let needs_stdin = self.stdin.lock().contains_key(handle);
        if needs_stdin {
            let writer = self
                .attach_stdin(handle)
                .await
                .map_err(|e| fail(format!("failed to attach stdin: {e}")))?;
            self.stdin.lock().insert(handle.clone(), Some(writer));
        }

        self.docker
            .start_container(handle.as_str(), None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| fail(e.to_string()))
    }

    async fn write_stdin(&self, handle: &SandboxHandle, input: &[u8]) -> Result<(), SandboxError> {
        let writer = self.stdin.lock().remove(handle).flatten();
        let Some(mut writer) = writer else {
            return Err(SandboxError::Stdin {
                handle: handle.clone(),
                message: "stdin was not attached before start".to_string(),
            });
        };

        writer
            .write_all(input)
            .await
            .map_err(|e| stdin_error(handle, e))?;
        // Closing our end delivers EOF to the program.
        writer.shutdown().await.map_err(|e| stdin_error(handle, e))?;
        Ok(())
    }

    async fn wait(&self, handle: &SandboxHandle) -> Result<i64, SandboxError> {
        let options = Some(WaitContainerOptions {
            condition: "not-running",
        });

        let mut stream = self.docker.wait_container(handle.as_str(), options);
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Bollard reports a non-zero exit as an error carrying the code.
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(SandboxError::Wait {
                handle: handle.clone(),
                message: e.to_string(),
            }),
            None => Err(SandboxError::Wait {
                handle: handle.clone(),
                message: "wait stream ended without a response".to_string(),
            }),
        }
    }

    async fn kill(&self, handle: &SandboxHandle) -> Result<(), SandboxError> {
        self.docker
            .kill_container(handle.as_str(), None::<KillContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::Kill {
                handle: handle.clone(),
                message: e.to_string(),
            })
    }

    async fn collect_logs(
        &self,
        handle: &SandboxHandle,
        limit: usize,
    ) -> Result<Vec<LogFrame>, SandboxError> {
        let options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        });

        let mut frames = Vec::new();
        let mut stdout_bytes = 0;
        let mut stderr_bytes = 0;
        let mut stream = self.docker.logs(handle.as_str(), options);
        while let Some(output) = stream.next().await {
            let output = output.map_err(|e| SandboxError::Logs {
                handle: handle.clone(),
                message: e.to_string(),
            })?;

            match output {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    count_output(&mut stdout_bytes, message.len(), limit, handle)?;
                    frames.push(LogFrame::stdout(message.to_vec()));
                }
                LogOutput::StdErr { message } => {
                    count_output(&mut stderr_bytes, message.len(), limit, handle)?;
                    frames.push(LogFrame::stderr(message.to_vec()));
                }
                LogOutput::StdIn { .. } => {}
            }
        }

        Ok(frames)
    }

    async fn remove(&self, handle: &SandboxHandle) -> Result<(), SandboxError> {
        self.stdin.lock().remove(handle);

        let options = Some(RemoveContainerOptions {
            force: true,
            ..Default::default()
        });

        self.docker
            .remove_container(handle.as_str(), options)
            .await
            .map_err(|e| SandboxError::Remove {
                handle: handle.clone(),
                message: e.to_string(),
            })
    }
}
