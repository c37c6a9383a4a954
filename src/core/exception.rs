// ============================================================================
// Exception Translation
// ============================================================================
//
// Every failure that escapes a replica call is handed to the caller in the
// error kind the calling API expects. A SQL-facing proxy only ever observes
// `ClusterError::Sql`, an XA-facing proxy only `ClusterError::Xa`.
//
// ============================================================================

use super::ClusterError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Error family expected by a caller of the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExceptionType {
    Sql,
    Xa,
}

impl ExceptionType {
    /// Returns the shared factory for this error family.
    pub fn factory(self) -> Arc<dyn ExceptionFactory> {
        match self {
            ExceptionType::Sql => Arc::new(SqlExceptionFactory),
            ExceptionType::Xa => Arc::new(XaExceptionFactory),
        }
    }
}

impl std::fmt::Display for ExceptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExceptionType::Sql => write!(f, "SQL"),
            ExceptionType::Xa => write!(f, "XA"),
        }
    }
}

/// Translates an arbitrary cluster failure into the caller-facing kind.
pub trait ExceptionFactory: Send + Sync {
    fn exception_type(&self) -> ExceptionType;

    fn create_exception(&self, error: ClusterError) -> ClusterError;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqlExceptionFactory;

impl ExceptionFactory for SqlExceptionFactory {
    fn exception_type(&self) -> ExceptionType {
        ExceptionType::Sql
    }

    fn create_exception(&self, error: ClusterError) -> ClusterError {
        match error {
            ClusterError::Sql(_) => error,
            other => ClusterError::Sql(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct XaExceptionFactory;

impl ExceptionFactory for XaExceptionFactory {
    fn exception_type(&self) -> ExceptionType {
        ExceptionType::Xa
    }

    fn create_exception(&self, error: ClusterError) -> ClusterError {
        match error {
            ClusterError::Xa(_) => error,
            other => ClusterError::Xa(other.to_string()),
        }
    }
}
