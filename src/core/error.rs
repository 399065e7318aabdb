use thiserror::Error;

/// Errors produced by the aggregation engine.
#[derive(Error, Debug)]
pub enum TsaggError {
    /// Native or raw window allocation failed
    #[error("Out of memory: failed to allocate {requested} bytes")]
    OutOfMemory {
        /// Bytes asked for
        requested: usize,
    },

    /// Caller passed an out-of-range or non-finite value
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Impossible value found in native memory
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Configuration rejected
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse or emit failure
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Background task failed to join
    #[error("Async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type alias for tsagg operations
pub type Result<T> = std::result::Result<T, TsaggError>;

impl TsaggError {
    /// Creates a new invalid argument error
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Creates a new invalid state error
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Creates a new corruption error
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        Self::Corruption(msg.into())
    }

    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Returns true if the calling collaborator may retry the operation.
    ///
    /// The core itself never retries.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }

    /// Returns the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::OutOfMemory { .. } => "resource",
            Self::InvalidArgument(_) => "validation",
            Self::InvalidState(_) => "state",
            Self::Corruption(_) => "corruption",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Yaml(_) | Self::Serialization(_) => "serialization",
            Self::Join(_) => "async",
        }
    }
}
