/// Core Module for sqlutil
///
/// This module contains the error type and the database layer the façade is
/// built on.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{Result, SqlUtilError};
