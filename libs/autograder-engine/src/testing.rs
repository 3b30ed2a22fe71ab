// In-memory sandbox and fixtures for unit tests
//
// Programs are line scripts interpreted by the provider:
//   print <text>   writes "<text>\n" to stdout
//   warn <text>    writes "<text>\n" to stderr
//   echo           copies the input (stdin, or in.txt when shipped) to stdout
//   exit           exits before reading stdin, so writing to it fails
//   flood <n>      writes n bytes to stdout
//   block          waits until `release` is called
//   hang           never exits
//   panic          panics inside `wait`
use crate::language::INPUT_FILE;
use crate::problems::{FixtureError, ProblemStore, EXPECTED_OUTPUT_FIXTURE, INPUT_FIXTURE};
use crate::sandbox::{
    LogFrame, OutputStream, SandboxError, SandboxHandle, SandboxProvider, SandboxSpec,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io::Read;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    EnsureImage(String),
    Create(String),
    CopyArchive(SandboxHandle),
    Start(SandboxHandle),
    WriteStdin(SandboxHandle),
    Wait(SandboxHandle),
    Kill(SandboxHandle),
    CollectLogs(SandboxHandle),
    Remove(SandboxHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    EnsureImage,
    Create,
    CopyArchive,
    Start,
    Stdin,
    Wait,
    Logs,
    Remove,
}

#[derive(Debug, Default)]
struct Sandbox {
    spec: Option<SandboxSpec>,
    files: HashMap<String, Vec<u8>>,
    stdin: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    sandboxes: HashMap<SandboxHandle, Sandbox>,
    calls: Vec<Call>,
    failing: HashSet<Step>,
}

#[derive(Debug)]
pub struct ScriptedProvider {
    state: Mutex<State>,
    gate: Semaphore,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            gate: Semaphore::new(0),
        }
    }

    /// Make every later call of `step` fail.
    pub fn fail_on(&self, step: Step) {
        self.state.lock().failing.insert(step);
    }

    /// Let `count` blocked programs exit.
    pub fn release(&self, count: usize) {
        self.gate.add_permits(count);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn created(&self) -> usize {
        self.count(|c| matches!(c, Call::Create(_)))
    }

    pub fn removed(&self) -> usize {
        self.count(|c| matches!(c, Call::Remove(_)))
    }

    /// Programs currently inside `wait`.
    pub fn waiting(&self) -> usize {
        let calls = self.calls();
        let waits = calls.iter().filter(|c| matches!(c, Call::Wait(_))).count();
        let done = calls
            .iter()
            .filter(|c| matches!(c, Call::CollectLogs(_) | Call::Kill(_)))
            .count();
        waits.saturating_sub(done)
    }

    pub fn files(&self, handle: &SandboxHandle) -> HashMap<String, Vec<u8>> {
        self.state
            .lock()
            .sandboxes
            .get(handle)
            .map(|s| s.files.clone())
            .unwrap_or_default()
    }

    pub fn spec(&self, handle: &SandboxHandle) -> Option<SandboxSpec> {
        self.state
            .lock()
            .sandboxes
            .get(handle)
            .and_then(|s| s.spec.clone())
    }

    fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    fn record(&self, call: Call, step: Step) -> Result<(), String> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if state.failing.contains(&step) {
            return Err(format!("scripted {step:?} failure"));
        }
        Ok(())
    }

    fn program(&self, handle: &SandboxHandle) -> (String, Vec<u8>) {
        let state = self.state.lock();
        let Some(sandbox) = state.sandboxes.get(handle) else {
            return (String::new(), Vec::new());
        };
        let program = sandbox
            .files
            .iter()
            .find(|(name, _)| name.as_str() != INPUT_FILE)
            .map(|(_, data)| String::from_utf8_lossy(data).into_owned())
            .unwrap_or_default();
        let input = match sandbox.files.get(INPUT_FILE) {
            Some(data) => data.clone(),
            None => sandbox.stdin.clone(),
        };
        (program, input)
    }
}

#[async_trait]
impl SandboxProvider for ScriptedProvider {
    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        self.record(Call::EnsureImage(image.to_string()), Step::EnsureImage)
            .map_err(|message| SandboxError::Image {
                image: image.to_string(),
                message,
            })
    }

    async fn create(&self, spec: &SandboxSpec) -> Result<SandboxHandle, SandboxError> {
        self.record(Call::Create(spec.name.clone()), Step::Create)
            .map_err(|message| SandboxError::Create {
                image: spec.image.clone(),
                message,
            })?;

        let mut state = self.state.lock();
        state.next_id += 1;
        let handle = SandboxHandle::new(format!("sandbox-{}", state.next_id));
        state.sandboxes.insert(
            handle.clone(),
            Sandbox {
                spec: Some(spec.clone()),
                ..Sandbox::default()
            },
        );
        Ok(handle)
    }

    async fn copy_archive(
        &self,
        handle: &SandboxHandle,
        _root: &str,
        archive: Vec<u8>,
    ) -> Result<(), SandboxError> {
        let fail = |message: String| SandboxError::CopyArchive {
            handle: handle.clone(),
            message,
        };
        self.record(Call::CopyArchive(handle.clone()), Step::CopyArchive)
            .map_err(fail)?;

        let mut files = HashMap::new();
        let mut tar = tar::Archive::new(archive.as_slice());
        let entries = tar.entries().map_err(|e| fail(e.to_string()))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| fail(e.to_string()))?;
            let name = entry
                .path()
                .map_err(|e| fail(e.to_string()))?
                .to_string_lossy()
                .into_owned();
            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .map_err(|e| fail(e.to_string()))?;
            files.insert(name, data);
        }

        if let Some(sandbox) = self.state.lock().sandboxes.get_mut(handle) {
            sandbox.files.extend(files);
        }
        Ok(())
    }

    async fn start(&self, handle: &SandboxHandle) -> Result<(), SandboxError> {
        self.record(Call::Start(handle.clone()), Step::Start)
            .map_err(|message| SandboxError::Start {
                handle: handle.clone(),
                message,
            })
    }

    async fn write_stdin(&self, handle: &SandboxHandle, input: &[u8]) -> Result<(), SandboxError> {
        self.record(Call::WriteStdin(handle.clone()), Step::Stdin)
            .map_err(|message| SandboxError::Stdin {
                handle: handle.clone(),
                message,
            })?;

        let (program, _) = self.program(handle);
        if program.lines().any(|line| line.trim() == "exit") {
            return Err(SandboxError::StdinClosed {
                handle: handle.clone(),
            });
        }
        if let Some(sandbox) = self.state.lock().sandboxes.get_mut(handle) {
            sandbox.stdin.extend_from_slice(input);
        }
        Ok(())
    }

    async fn wait(&self, handle: &SandboxHandle) -> Result<i64, SandboxError> {
        self.record(Call::Wait(handle.clone()), Step::Wait)
            .map_err(|message| SandboxError::Wait {
                handle: handle.clone(),
                message,
            })?;

        let (program, _) = self.program(handle);
        for line in program.lines() {
            match line.trim() {
                "hang" => std::future::pending::<()>().await,
                "block" => {
                    if let Ok(permit) = self.gate.acquire().await {
                        permit.forget();
                    }
                }
                "panic" => panic!("scripted panic in {handle}"),
                _ => {}
            }
        }
        Ok(0)
    }

    async fn kill(&self, handle: &SandboxHandle) -> Result<(), SandboxError> {
        self.state.lock().calls.push(Call::Kill(handle.clone()));
        Ok(())
    }

    async fn collect_logs(
        &self,
        handle: &SandboxHandle,
        limit: usize,
    ) -> Result<Vec<LogFrame>, SandboxError> {
        self.record(Call::CollectLogs(handle.clone()), Step::Logs)
            .map_err(|message| SandboxError::Logs {
                handle: handle.clone(),
                message,
            })?;

        let (program, input) = self.program(handle);
        let mut frames = Vec::new();
        for line in program.lines() {
            let line = line.trim();
            if let Some(text) = line.strip_prefix("print ") {
                frames.push(LogFrame::stdout(format!("{text}\n")));
            } else if let Some(text) = line.strip_prefix("warn ") {
                frames.push(LogFrame::stderr(format!("{text}\n")));
            } else if line == "echo" {
                frames.push(LogFrame::stdout(input.clone()));
            } else if let Some(count) = line.strip_prefix("flood ") {
                let count = count.trim().parse().unwrap_or(0);
                frames.push(LogFrame::stdout(vec![b'x'; count]));
            }
        }

        let mut stdout = 0;
        let mut stderr = 0;
        for frame in &frames {
            let total = match frame.stream {
                OutputStream::Stdout => &mut stdout,
                OutputStream::Stderr => &mut stderr,
            };
            *total += frame.bytes.len();
            if *total > limit {
                return Err(SandboxError::OutputLimit {
                    handle: handle.clone(),
                    limit,
                });
            }
        }
        Ok(frames)
    }

    async fn remove(&self, handle: &SandboxHandle) -> Result<(), SandboxError> {
        self.record(Call::Remove(handle.clone()), Step::Remove)
            .map_err(|message| SandboxError::Remove {
                handle: handle.clone(),
                message,
            })?;
        self.state.lock().sandboxes.remove(handle);
        Ok(())
    }
}

/// Problems held in memory.
#[derive(Debug, Default)]
pub struct MemoryProblems {
    problems: HashMap<String, HashMap<&'static str, Vec<u8>>>,
}

impl MemoryProblems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, problem: &str, input: &str, expected: &str) -> Self {
        let fixtures = self.problems.entry(problem.to_string()).or_default();
        fixtures.insert(INPUT_FIXTURE, input.as_bytes().to_vec());
        fixtures.insert(EXPECTED_OUTPUT_FIXTURE, expected.as_bytes().to_vec());
        self
    }

    /// A problem directory with input but no expected output.
    pub fn without_expected(mut self, problem: &str, input: &str) -> Self {
        let fixtures = self.problems.entry(problem.to_string()).or_default();
        fixtures.insert(INPUT_FIXTURE, input.as_bytes().to_vec());
        self
    }

    fn fixture(&self, problem: &str, fixture: &'static str) -> Result<Vec<u8>, FixtureError> {
        self.problems
            .get(problem)
            .and_then(|fixtures| fixtures.get(fixture))
            .cloned()
            .ok_or_else(|| FixtureError::NotFound {
                problem: problem.to_string(),
                fixture,
            })
    }
}

#[async_trait]
impl ProblemStore for MemoryProblems {
    async fn exists(&self, problem: &str) -> bool {
        self.problems.contains_key(problem)
    }

    async fn read_input(&self, problem: &str) -> Result<Vec<u8>, FixtureError> {
        self.fixture(problem, INPUT_FIXTURE)
    }

    async fn read_expected_output(&self, problem: &str) -> Result<Vec<u8>, FixtureError> {
        self.fixture(problem, EXPECTED_OUTPUT_FIXTURE)
    }
}
