//! Tool call execution dispatcher for graph-query tools.
//!
//! This crate decides how a tool call issued by an agent-style client is
//! delivered (immediate JSON, aggregated or raw streams, or a background
//! queue), runs it against a graph backend under a nested timeout
//! hierarchy, and streams results through a uniform event protocol.
//!
//! # Architecture
//!
//! The crate follows hexagonal architecture principles:
//!
//! - **Domain**: Pure classification, strategy and timeout logic
//! - **Ports**: Abstract trait interfaces for the backend, queue, circuit
//!   breaker and result cache
//! - **Adapters**: In-memory implementations of the ports
//! - **Services**: Handler lifecycle, stream production and dispatch
//!
//! # Modules
//!
//! - [`tool_dispatch`]: Tool call classification, execution and streaming

pub mod tool_dispatch;
