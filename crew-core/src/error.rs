//! Error types for crew-core

use thiserror::Error;

/// Top-level error type for crew-core
#[derive(Error, Debug)]
pub enum CrewError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Errors from the agent registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Duplicate agent definition: {0}")]
    DuplicateAgent(String),
}

/// Errors from the process runner
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Worker binary not found: {program}")]
    WorkerNotFound { program: String },

    #[error("Failed to launch worker for stage {stage}: {source}")]
    LaunchFailed {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    #[error("A worker is already active for task {task_id}, stage {stage}")]
    AlreadyActive { task_id: String, stage: String },

    #[error("Failed to capture worker stdout")]
    StdoutUnavailable,
}

/// Errors related to task sessions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid task request: {0}")]
    InvalidRequest(String),
}

/// Errors from the remote dispatch endpoint
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Failed to bind dispatch endpoint on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Dispatch endpoint failed: {0}")]
    Serve(String),
}

pub type CrewResult<T> = Result<T, CrewError>;
