//! Application services for executing and streaming tool calls.

mod dispatcher;
mod handler;
mod streaming;

pub use dispatcher::{
    DispatchBody, DispatchError, DispatchRequest, DispatchResponse, DispatchResult,
    JSON_MEDIA_TYPE, QueuedBody, ToolCallDispatcher,
};
pub use handler::{HandlerContractViolation, ToolExecutionHandler};
pub use streaming::{ResultAggregator, SECTION_SEPARATOR, StreamEventProducer};
