// Problem fixture storage
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const INPUT_FIXTURE: &str = "in.txt";
pub const EXPECTED_OUTPUT_FIXTURE: &str = "out.txt";

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("problem '{problem}' has no {fixture}")]
    NotFound {
        problem: String,
        fixture: &'static str,
    },
    #[error("failed to read {fixture} for problem '{problem}': {source}")]
    Io {
        problem: String,
        fixture: &'static str,
        source: std::io::Error,
    },
}

/// Read-only access to the input and expected-output blobs of a problem.
#[async_trait]
pub trait ProblemStore: Send + Sync {
    async fn exists(&self, problem: &str) -> bool;

    async fn read_input(&self, problem: &str) -> Result<Vec<u8>, FixtureError>;

    async fn read_expected_output(&self, problem: &str) -> Result<Vec<u8>, FixtureError>;
}

/// Problems laid out as `<root>/<problem>/in.txt` and `<root>/<problem>/out.txt`.
#[derive(Debug, Clone)]
pub struct FsProblemStore {
    root: PathBuf,
}

impl FsProblemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn problem_dir(&self, problem: &str) -> Option<PathBuf> {
        if !is_plain_name(problem) {
            return None;
        }
        Some(self.root.join(problem))
    }

    async fn read_fixture(
        &self,
        problem: &str,
        fixture: &'static str,
    ) -> Result<Option<Vec<u8>>, FixtureError> {
        let Some(dir) = self.problem_dir(problem) else {
            return Err(FixtureError::NotFound {
                problem: problem.to_string(),
                fixture,
            });
        };

        match tokio::fs::read(dir.join(fixture)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(FixtureError::Io {
                problem: problem.to_string(),
                fixture,
                source,
            }),
        }
    }
}

#[async_trait]
impl ProblemStore for FsProblemStore {
    async fn exists(&self, problem: &str) -> bool {
        match self.problem_dir(problem) {
            Some(dir) => tokio::fs::metadata(&dir)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false),
            None => false,
        }
    }

    /// A problem without `in.txt` takes empty input.
    async fn read_input(&self, problem: &str) -> Result<Vec<u8>, FixtureError> {
        if !self.exists(problem).await {
            return Err(FixtureError::NotFound {
                problem: problem.to_string(),
                fixture: INPUT_FIXTURE,
            });
        }
        Ok(self
            .read_fixture(problem, INPUT_FIXTURE)
            .await?
            .unwrap_or_default())
    }

    async fn read_expected_output(&self, problem: &str) -> Result<Vec<u8>, FixtureError> {
        self.read_fixture(problem, EXPECTED_OUTPUT_FIXTURE)
            .await?
            .ok_or_else(|| FixtureError::NotFound {
                problem: problem.to_string(),
                fixture: EXPECTED_OUTPUT_FIXTURE,
            })
    }
}

// Rejects anything that could escape the problems root.
fn is_plain_name(problem: &str) -> bool {
    !problem.is_empty()
        && problem != "."
        && problem != ".."
        && !problem.contains(&['/', '\\', '\0'][..])
}
