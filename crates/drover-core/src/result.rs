//! Result type aliases for Drover.

use crate::DroverError;

/// A specialized `Result` type for Drover operations.
pub type DroverResult<T> = Result<T, DroverError>;
