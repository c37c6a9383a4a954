pub mod error;
pub mod exception;
pub mod replica;

pub use error::{ClusterError, Result};
pub use exception::{ExceptionFactory, ExceptionType, SqlExceptionFactory, XaExceptionFactory};
pub use replica::Replica;
