//! Error handling for objrepo-store
//!
//! Storage adapters speak `ExError` directly; these helpers build the
//! adapter-specific shapes.

use objrepo_core::core_types::schema::OP_FLUSH;
use objrepo_core::errors::{ExError, ExErrorKind};

use crate::memory::{RecordKey, WriteOp};

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

/// Some writes of one batch were rejected and re-queued
pub fn partial_batch(op: WriteOp, rejected: &[(RecordKey, String)], batch_len: usize) -> ExError {
    let detail = rejected
        .iter()
        .map(|(key, reason)| format!("{}: {}", key, reason))
        .collect::<Vec<_>>()
        .join("; ");
    let mut err = ExError::new(ExErrorKind::PartialBatch)
        .with_op(OP_FLUSH)
        .with_message(format!(
            "{} of {} {} writes failed and were re-queued: {}",
            rejected.len(),
            batch_len,
            op.as_str(),
            detail
        ));
    if let [(key, _)] = rejected {
        err = err
            .with_model_type(key.kind.clone())
            .with_entity_id(key.id.to_string());
    }
    err
}

/// A seeded record is not usable as a backend record
pub fn invalid_seed(kind: &str, reason: &str) -> ExError {
    ExError::new(ExErrorKind::InvalidInput)
        .with_op("seed")
        .with_model_type(kind.to_string())
        .with_message(reason.to_string())
}
