//! Error types and handling
//!
//! Domain errors are grouped by kind so that callers can react to the class
//! of failure without matching on message text. The CLI maps each kind to a
//! human-actionable message and a non-zero exit code.

use thiserror::Error;

/// Top-level error type for dcx
#[derive(Error, Debug)]
pub enum DcxError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Container engine errors
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Feature resolution and installation errors
    #[error("Feature error: {0}")]
    Feature(#[from] FeatureError),

    /// Lifecycle hook errors
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Precondition errors on observed container state
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Local filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invariant violations
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Configuration document errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found under {path}")]
    NotFound { path: String },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("{message}")]
    Validation { message: String },
}

/// Container engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("container engine binary not found (is docker or podman installed?)")]
    NotInstalled,

    #[error("container engine unreachable: {message}")]
    Unreachable { message: String },

    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("image build failed: {message}")]
    Build { message: String },

    #[error("failed to pull {image}: {message}")]
    Pull { image: String, message: String },
}

/// Feature resolution errors
#[derive(Error, Debug)]
pub enum FeatureError {
    #[error("failed to fetch feature '{id}': {message}")]
    Fetch { id: String, message: String },

    #[error("integrity mismatch for feature '{id}': expected {expected}, got {actual}")]
    IntegrityMismatch {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("invalid metadata for feature '{id}': {message}")]
    Metadata { id: String, message: String },

    #[error("dependency cycle among features: {}", chain.join(" -> "))]
    DependencyCycle { chain: Vec<String> },

    #[error("invalid install order: {message}")]
    InvalidInstallOrder { message: String },

    #[error("lockfile mismatch: {message}")]
    LockfileMismatch { message: String },
}

/// Lifecycle hook errors
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("{phase} hook `{command}` exited with code {exit_code}")]
    HookFailed {
        phase: String,
        command: String,
        exit_code: i32,
    },

    #[error("{phase} hook `{command}` could not be spawned: {message}")]
    SpawnFailed {
        phase: String,
        command: String,
        message: String,
    },
}

/// Observed-state precondition errors
#[derive(Error, Debug)]
pub enum StateError {
    #[error("no container exists for this workspace; run `dcx up` first")]
    NotCreated,

    #[error("container is not running; run `dcx up` or `dcx start` first")]
    NotRunning,

    #[error("container is stale (configuration changed); run `dcx up` to recreate it")]
    Stale,

    #[error("container state is broken: {message}; run `dcx up --recreate`")]
    Broken { message: String },

    #[error("container is {state}; {hint}")]
    Unexpected { state: String, hint: String },
}

/// Convenience type alias for Results with DcxError
pub type Result<T> = std::result::Result<T, DcxError>;

impl DcxError {
    /// Construct an internal invariant-violation error
    pub fn internal(message: impl Into<String>) -> Self {
        DcxError::Internal {
            message: message.into(),
        }
    }
}
