//! Tool call dispatch against a graph backend.
//!
//! A dispatch classifies the caller and the tool call, selects a delivery
//! strategy, enforces the nested timeout hierarchy, and runs the call on a
//! lifecycle-managed handler. Streamed responses follow one event protocol
//! that can be folded back into the buffered result. The module follows
//! hexagonal architecture:
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Orchestration services in [`services`]
//! - Runtime settings in [`config`]

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod services;
