//! Structured logging for loads, warm-up and flushes
//!
//! The engine only emits `tracing` events; installing a subscriber is the
//! host's call, made once through [`init`]. Every timed operation is logged
//! as a `start` event followed by one `end` or `end_error` event, keyed by
//! the `op` names in [`schema`](crate::core_types::schema), so a load of
//! one model type can be followed from fetch to row count.
//!
//! Storage adapters reuse the same macros, which is why they are exported
//! at the crate root rather than kept private.
//!
//! ```rust
//! use objrepo_core::logging_facility::{init, Profile};
//!
//! init(Profile::Development);
//! ```
//!
//! Tests install [`init_test_capture`] instead and assert on the captured
//! `op`/`event` pairs.

pub mod init;
pub mod macros;
pub mod test_capture;

pub use init::{init, Profile};
pub use test_capture::{init_test_capture, CapturedEvent, TestCapture};
