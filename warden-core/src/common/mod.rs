//! Common utilities shared across the resilience components

pub mod bounded;

pub use bounded::{BoundedLog, Timestamped};
