use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("SQL error: {0}")]
    Sql(String),

    #[error("XA error: {0}")]
    Xa(String),

    #[error("Replica '{replica}' failed: {message}")]
    Replica { replica: String, message: String },

    #[error("No active replicas available")]
    NoActiveReplicas,

    #[error("Replica '{0}' not found in cluster")]
    ReplicaNotFound(String),

    #[error("Replica '{0}' already exists in cluster")]
    ReplicaExists(String),

    #[error("Interrupted while waiting for lock")]
    Interrupted,

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, ClusterError>;

impl ClusterError {
    /// Builds a replica failure from any displayable cause.
    pub fn replica(replica: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Replica {
            replica: replica.into(),
            message: message.to_string(),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for ClusterError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(err: serde_json::Error) -> Self {
        Self::ConfigError(err.to_string())
    }
}
