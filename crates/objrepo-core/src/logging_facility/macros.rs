//! Canonical logging macros
//!
//! Every repository operation that spans time (loading a type, the warm-up
//! pass, a flush) is bracketed by one start event and exactly one end or
//! end_error event.

/// `start` event for a timed operation, with optional extra fields
///
/// # Example
///
/// ```
/// # use objrepo_core::log_op_start;
/// log_op_start!("load_type");
/// log_op_start!("load_type", model_type = "Widget");
/// ```
#[macro_export]
macro_rules! log_op_start {
    ($op:expr) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::core_types::schema::EVENT_START,
        );
    };
    ($op:expr, $($field:tt)*) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::core_types::schema::EVENT_START,
            $($field)*
        );
    };
}

/// `end` event; `duration_ms` is required
///
/// # Example
///
/// ```
/// # use objrepo_core::log_op_end;
/// log_op_end!("load_type", duration_ms = 42);
/// log_op_end!("load_type", duration_ms = 42, row_count = 10);
/// ```
#[macro_export]
macro_rules! log_op_end {
    ($op:expr, duration_ms = $duration:expr) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::core_types::schema::EVENT_END,
            duration_ms = $duration,
        );
    };
    ($op:expr, duration_ms = $duration:expr, $($field:tt)*) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::core_types::schema::EVENT_END,
            duration_ms = $duration,
            $($field)*
        );
    };
}

/// `end_error` event carrying the error's kind, stable code and message
///
/// `$err` is converted into `ExError`, so a `RepositoryError` works as is.
///
/// # Example
///
/// ```
/// # use objrepo_core::{log_op_error, errors::RepositoryError};
/// let err = RepositoryError::NothingRegistered;
/// log_op_error!("initialize", err, duration_ms = 10);
/// ```
#[macro_export]
macro_rules! log_op_error {
    ($op:expr, $err:expr, duration_ms = $duration:expr) => {{
        let ex_err: $crate::errors::ExError = $err.into();
        tracing::error!(
            component = module_path!(),
            op = $op,
            event = $crate::core_types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err_kind = ?ex_err.kind(),
            err_code = ex_err.code(),
            err_message = %ex_err,
        );
    }};
    ($op:expr, $err:expr, duration_ms = $duration:expr, $($field:tt)*) => {{
        let ex_err: $crate::errors::ExError = $err.into();
        tracing::error!(
            component = module_path!(),
            op = $op,
            event = $crate::core_types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err_kind = ?ex_err.kind(),
            err_code = ex_err.code(),
            err_message = %ex_err,
            $($field)*
        );
    }};
}
