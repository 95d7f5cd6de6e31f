//! Error types for scribepool.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScribepoolError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Two configurations disagree about where "the same" remote lives.
    #[error("Configuration mismatch: {message}")]
    ConfigMismatch { message: String },

    // Value errors
    /// A string failed its parser's grammar (timespec, reward, copies).
    #[error("Invalid format: {message}")]
    Format { message: String },

    /// A structurally valid value that is semantically unacceptable.
    #[error("Invalid argument: {message}")]
    Argument { message: String },

    // External collaborators
    #[error("{backend} operation failed: {message}")]
    RemoteOperation {
        backend: &'static str,
        message: String,
    },

    #[error("Marketplace error: {message}")]
    Marketplace { message: String },

    // Project data
    #[error("Project data error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Not a project directory at {path}")]
    NotAProject { path: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ScribepoolError {
    pub(crate) fn format(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
        }
    }

    pub(crate) fn argument(message: impl Into<String>) -> Self {
        Self::Argument {
            message: message.into(),
        }
    }

    /// Prefix the message of a value error with extra context, keeping its kind.
    ///
    /// Other variants pass through untouched.
    pub fn context(self, prefix: &str) -> Self {
        match self {
            Self::Format { message } => Self::Format {
                message: format!("{prefix}: {message}"),
            },
            Self::Argument { message } => Self::Argument {
                message: format!("{prefix}: {message}"),
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScribepoolError>;
