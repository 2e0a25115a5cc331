use crate::registrar::RegistrarOperation;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Registrar {operation} failed for {target}: {message}")]
    Registrar {
        operation: RegistrarOperation,
        target: String,
        message: String,
    },

    #[error("Registrar rejected {operation} for {target}: status {status}")]
    RegistrarStatus {
        operation: RegistrarOperation,
        target: String,
        status: u16,
    },

    #[error("Sync pass failed with {} error(s): {}", .0.len(), join_messages(.0))]
    SyncFailed(Vec<CoreError>),

    #[error("Missing permissions: {}", .0.join(", "))]
    MissingPermissions(Vec<String>),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Kubernetes error: {0}")]
    KubernetesError(#[from] kube::error::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    MetricsError(#[from] prometheus::Error),
}

impl CoreError {
    /// Fold individual failures into one pass level error
    pub fn join(failures: Vec<CoreError>) -> Result<()> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CoreError::SyncFailed(failures))
        }
    }

    /// The individual failures behind this error
    pub fn failures(&self) -> &[CoreError] {
        match self {
            CoreError::SyncFailed(failures) => failures,
            other => std::slice::from_ref(other),
        }
    }
}

fn join_messages(errors: &[CoreError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
