//! The `utils` module provides shared definitions used across the `wordcount`
//! processes: the error types every layer returns and the tracing setup.

pub mod error;
pub mod logging;

pub use error::{AppError, BrokerError};

#[cfg(test)]
mod tests;
