//! # Error Handling
//!
//! Errors raised by the approval workflow. Every engine operation returns
//! [`ApprovalError`]; the HTTP layer converts it into a JSON error body.

pub mod types;

pub use types::{ApprovalError, Result};
