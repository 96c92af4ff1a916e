//! Adapter implementations for tool dispatch ports.

pub mod memory;
