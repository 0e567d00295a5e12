//! Error Types
//!
//! A single error enum covers composition, binding, emission and the
//! runner boundary. Composition and emission errors are raised before any
//! external process is spawned.

use thiserror::Error;

/// Errors produced while building, emitting or running CWL documents.
#[derive(Error, Debug)]
pub enum CwlError {
    /// Malformed type string, bad id, duplicate id or inconsistent default.
    #[error("Validation error in '{context}': {message}")]
    Validation { context: String, message: String },

    /// A step or workflow output points at a step or output that does not exist.
    #[error("Dangling reference '{reference}' in '{context}': {message}")]
    DanglingReference {
        context: String,
        reference: String,
        message: String,
    },

    /// A bound value does not fit the declared parameter type.
    #[error("Type mismatch for '{id}': expected {expected}, got {found}")]
    TypeMismatch {
        id: String,
        expected: String,
        found: String,
    },

    /// Lookup of a parameter, step or path that is not declared.
    #[error("Not found: {what} '{id}' in '{context}'")]
    NotFound {
        what: &'static str,
        id: String,
        context: String,
    },

    /// A script function refers to a name with no supplied definition.
    #[error("Cannot capture '{name}' for script '{script}': {message}")]
    UnsupportedCapture {
        script: String,
        name: String,
        message: String,
    },

    /// The object graph cannot be written as a valid document.
    #[error("Emission error in '{context}': {message}")]
    Emission { context: String, message: String },

    /// The external runner exited non-zero or produced no expected output.
    #[error("Runner failed ({command}): exit status {status:?}")]
    RunnerFailure {
        command: String,
        status: Option<i32>,
        log: String,
    },

    /// A batch job was not started because the batch was cancelled.
    #[error("Job '{0}' cancelled before start")]
    Cancelled(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CwlError>;

impl CwlError {
    pub(crate) fn validation(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            context: context.into(),
            message: message.into(),
        }
    }

    pub(crate) fn dangling(
        context: impl Into<String>,
        reference: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::DanglingReference {
            context: context.into(),
            reference: reference.into(),
            message: message.into(),
        }
    }

    pub(crate) fn not_found(
        what: &'static str,
        id: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            what,
            id: id.into(),
            context: context.into(),
        }
    }

    pub(crate) fn emission(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Emission {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Captured runner log, if this is a runner failure.
    pub fn log(&self) -> Option<&str> {
        match self {
            Self::RunnerFailure { log, .. } => Some(log),
            _ => None,
        }
    }
}
