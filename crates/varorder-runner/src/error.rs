use thiserror::Error;

/// Failures that must stop a run instead of being recorded as solver outcomes.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("configuration_error: {0}")]
    Configuration(String),
    #[error("instance_error: {path}: {message}")]
    Instance { path: String, message: String },
    #[error("checkpoint_error: {0}")]
    Checkpoint(String),
    #[error("io_error: {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl RunnerError {
    pub fn configuration(message: impl Into<String>) -> Self {
        RunnerError::Configuration(message.into())
    }

    pub fn instance(path: impl Into<String>, message: impl Into<String>) -> Self {
        RunnerError::Instance {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn file(path: &std::path::Path, source: std::io::Error) -> Self {
        RunnerError::File {
            path: path.display().to_string(),
            source,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, RunnerError::Configuration(_))
    }
}

pub type Result<T, E = RunnerError> = std::result::Result<T, E>;
