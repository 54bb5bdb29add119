//! Error types for docent-agent

use thiserror::Error;

/// Result type alias using docent-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the assistant core
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the generation layer
    #[error(transparent)]
    Ai(#[from] docent_ai::Error),

    /// Input rejected before reaching any capability
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A retrieval, search or extraction backend failed
    #[error("Capability error: {0}")]
    Capability(String),

    /// The request could not be turned into an execution plan
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// No step can make progress
    #[error(
        "Task stalled: steps {pending:?} are pending but none are ready (circular or unresolvable dependencies)"
    )]
    Deadlock { pending: Vec<u32> },

    /// One or more steps exhausted their retries
    #[error("Task failed. Failed steps: {steps:?}")]
    StepsFailed { steps: Vec<u32> },

    /// The task was cancelled before finishing
    #[error("Task cancelled")]
    Cancelled,

    /// No task with the given id exists
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a capability failure
    pub fn capability(message: impl Into<String>) -> Self {
        Self::Capability(message.into())
    }
}

/// Reasons a decomposition attempt fails
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// The planning generation call failed
    #[error("Planning call failed: {0}")]
    Generation(String),

    /// Neither the raw response nor any embedded object parsed as JSON
    #[error("Could not parse plan: {0}")]
    Unparseable(String),

    /// The JSON did not match the plan schema
    #[error("Plan does not match schema:\n{0}")]
    Schema(String),

    /// The plan contained no steps
    #[error("Plan contains no steps")]
    NoSteps,

    /// The plan exceeded the configured step ceiling
    #[error("Plan has {count} steps, the maximum is {max}")]
    TooManySteps { count: usize, max: usize },

    /// Two steps share a number
    #[error("Duplicate step number {0}")]
    DuplicateStep(u32),

    /// A step names an agent type that does not exist
    #[error("Step {step} requests unknown agent type '{agent}'")]
    UnknownAgent { step: u32, agent: String },
}
