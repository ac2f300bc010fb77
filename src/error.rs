use thiserror::Error;

/// Failure reported by the container runtime collaborator.
///
/// This is the only error kind the collection cycle interprets: a failed
/// self check means "no SDK present", a failed stats fetch skips that
/// container.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeWrapperError {
    #[error("container {0} is not running")]
    NotRunning(String),

    #[error("container {0} not found")]
    NotFound(String),

    #[error("command exited with code {exit_code}: {output}")]
    CommandFailed { exit_code: i64, output: String },

    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("container runtime API error: {0}")]
    Api(String),
}

#[derive(Error, Debug)]
pub enum PulseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeWrapperError),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("A collection cycle is already in progress")]
    CycleInProgress,
}

pub type Result<T> = std::result::Result<T, PulseError>;
