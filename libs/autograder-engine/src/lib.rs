// Autograder job execution engine
pub mod archive;
pub mod docker;
pub mod engine;
pub mod error;
pub mod executor;
pub mod grader;
pub mod job;
pub mod language;
pub mod manager;
pub mod problems;
pub mod sandbox;
pub mod store;

#[cfg(test)]
mod testing;

pub use docker::DockerProvider;
pub use engine::SandboxEngine;
pub use executor::SandboxExecutor;
pub use language::LanguageRegistry;
pub use manager::{AdmitError, JobManager, ManagerSettings};
pub use problems::FsProblemStore;
pub use store::JobStore;
