//! # Shared
//! Logging and failure handling shared by the backup tools.
//!

#![warn(missing_docs)]

mod failure;
mod logger;
#[cfg(feature = "test")]
pub mod test;

pub use failure::{Failure, log_and_panic};
pub use logger::{LoggerError, init_logger};
