//! Core types shared across objrepo facilities
//!
//! This crate provides the canonical schema constants used by the logging
//! macros in `objrepo-core` and by storage adapters:
//!
//! - **Field keys**: component, op, event, duration and entity fields
//! - **Event names**: start / end / end_error
//! - **Operation names**: load, initialize, warm-up, save and flush

pub mod schema;
