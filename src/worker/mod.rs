//! worker
//!
//! The worker side of the bridge: the `UnitOfWork` contract, the word count
//! job and the dispatch loop that runs it against the request stream.

pub mod dispatch;
pub mod job;

pub use dispatch::Worker;
pub use job::{JobError, UnitOfWork, WordCountJob, count_words, extract_text};

#[cfg(test)]
mod tests;
