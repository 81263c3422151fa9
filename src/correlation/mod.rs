//! correlation
//!
//! The asynchronous request/response bridge between a synchronous caller and
//! the worker pool: task identities, the envelopes carried on the streams,
//! the correlation table and the `Communicator` that ties them to a broker.

pub mod communicator;
pub mod envelope;
pub mod table;
pub mod task_id;

pub use communicator::Communicator;
pub use envelope::{
    CountReply, CountRequest, CountResult, ErrorPayload, ErrorReply, RequestEnvelope,
    ResponseEnvelope,
};
pub use table::CorrelationTable;
pub use task_id::TaskId;
