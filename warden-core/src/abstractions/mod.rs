//! Trait abstractions for the collaborators the resilience core consumes
//!
//! Components depend on these interfaces rather than on concrete clocks,
//! storage backends or UI toolkits, which keeps them testable and lets the
//! host application plug in its own implementations.

pub mod notify;
pub mod storage;
pub mod time;

pub use notify::*;
pub use storage::*;
pub use time::*;
