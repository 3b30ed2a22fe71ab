/// Sandbox Provider - the capability the engine drives
///
/// **Contract:**
/// - `create` returns a handle; every other call takes one
/// - stdin is attached by `start`, before the process runs; `write_stdin`
///   only writes to it, so a fast program cannot exit before the attach lands
/// - `wait` resolves when the sandboxed process exits and reports its exit code
/// - `collect_logs` returns the combined output as stream-tagged frames,
///   stopping once either stream passes the byte limit
/// - `remove` is best-effort; callers log its failures and move on
///
/// The engine owns ordering and teardown; providers only translate calls.
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Opaque identifier of a live sandbox instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SandboxHandle(String);

impl SandboxHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SandboxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub working_dir: String,
    /// Keep standard input open so the engine can stream into it after start.
    pub open_stdin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One chunk of the combined output stream, tagged with its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFrame {
    pub stream: OutputStream,
    pub bytes: Vec<u8>,
}

impl LogFrame {
    pub fn stdout(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            stream: OutputStream::Stdout,
            bytes: bytes.into(),
        }
    }

    pub fn stderr(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            stream: OutputStream::Stderr,
            bytes: bytes.into(),
        }
    }
}

/// Output of one run, split by stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Split an interleaved frame sequence into stdout and stderr.
///
/// Chunk order is preserved within each stream.
pub fn demux<I>(frames: I) -> CapturedOutput
where
    I: IntoIterator<Item = LogFrame>,
{
    let mut output = CapturedOutput::default();
    for frame in frames {
        match frame.stream {
            OutputStream::Stdout => output.stdout.extend_from_slice(&frame.bytes),
            OutputStream::Stderr => output.stderr.extend_from_slice(&frame.bytes),
        }
    }
    output
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to prepare image {image}: {message}")]
    Image { image: String, message: String },
    #[error("failed to create sandbox from image {image}: {message}")]
    Create { image: String, message: String },
    #[error("failed to copy archive into sandbox {handle}: {message}")]
    CopyArchive {
        handle: SandboxHandle,
        message: String,
    },
    #[error("failed to start sandbox {handle}: {message}")]
    Start {
        handle: SandboxHandle,
        message: String,
    },
    #[error("failed to write stdin of sandbox {handle}: {message}")]
    Stdin {
        handle: SandboxHandle,
        message: String,
    },
    /// The program closed stdin, usually by exiting, before taking all input.
    #[error("sandbox {handle} closed stdin before all input was written")]
    StdinClosed { handle: SandboxHandle },
    #[error("failed waiting for sandbox {handle}: {message}")]
    Wait {
        handle: SandboxHandle,
        message: String,
    },
    #[error("failed to kill sandbox {handle}: {message}")]
    Kill {
        handle: SandboxHandle,
        message: String,
    },
    #[error("failed to read logs of sandbox {handle}: {message}")]
    Logs {
        handle: SandboxHandle,
        message: String,
    },
    #[error("sandbox {handle} wrote more than {limit} bytes to one stream")]
    OutputLimit { handle: SandboxHandle, limit: usize },
    #[error("failed to remove sandbox {handle}: {message}")]
    Remove {
        handle: SandboxHandle,
        message: String,
    },
}

#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Make `image` available locally, pulling it if needed.
    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError>;

    async fn create(&self, spec: &SandboxSpec) -> Result<SandboxHandle, SandboxError>;

    /// Unpack a tar archive at `root` inside the sandbox filesystem.
    async fn copy_archive(
        &self,
        handle: &SandboxHandle,
        root: &str,
        archive: Vec<u8>,
    ) -> Result<(), SandboxError>;

    /// Start the process, attaching stdin first for `open_stdin` sandboxes.
    async fn start(&self, handle: &SandboxHandle) -> Result<(), SandboxError>;

    /// Write `input` to the attached standard input and close it.
    ///
    /// Returns [`SandboxError::StdinClosed`] when the program is no longer
    /// reading.
    async fn write_stdin(&self, handle: &SandboxHandle, input: &[u8]) -> Result<(), SandboxError>;

    /// Block until the process exits; returns its exit code.
    async fn wait(&self, handle: &SandboxHandle) -> Result<i64, SandboxError>;

    async fn kill(&self, handle: &SandboxHandle) -> Result<(), SandboxError>;

    /// Fails with [`SandboxError::OutputLimit`] once stdout or stderr passes
    /// `limit` bytes, without buffering the rest.
    async fn collect_logs(
        &self,
        handle: &SandboxHandle,
        limit: usize,
    ) -> Result<Vec<LogFrame>, SandboxError>;

    async fn remove(&self, handle: &SandboxHandle) -> Result<(), SandboxError>;
}
