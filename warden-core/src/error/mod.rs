//! Error handling for Warden
//!
//! Two layers live side by side:
//!
//! - [`crate::classifier`] turns *foreign* failures (transport, wallet, chain)
//!   into typed `ErrorReport`s and never fails itself.
//! - [`WardenError`] is what the resilience layers return. Operation failures
//!   are wrapped together with their report, so callers always receive the
//!   final, fully classified error and never a bare transport value.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Warden Error Taxonomy                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Chain / Wallet         │  Transport          │  Input        │
//! │  • SmartContract        │  • Network          │  • Validation │
//! │  • Transaction          │  • Api              │  • FileUpload │
//! │  • Wallet               │  • RateLimit        │               │
//! │                         │  • Timeout          │               │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Session: Authentication        │  Fallback: Unknown          │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod constructors;
pub mod conversions;
pub mod types;


pub use types::{Result, WardenError, WardenResult};
