//! Canonical schema constants for structured logging and events
//!
//! These constants keep field names identical across the repository engine,
//! the storage adapters and the test capture layer.

// Canonical field keys for structured logging
pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DURATION_MS: &str = "duration_ms";

// Entity identifiers
pub const FIELD_MODEL_TYPE: &str = "model_type";
pub const FIELD_RECORD_KIND: &str = "record_kind";
pub const FIELD_OBJECT_ID: &str = "object_id";
pub const FIELD_PROPERTY: &str = "property";

// Collection sizes
pub const FIELD_ROW_COUNT: &str = "row_count";
pub const FIELD_PENDING_COUNT: &str = "pending_count";
pub const FIELD_FAILED_COUNT: &str = "failed_count";

// Error fields
pub const FIELD_ERR_KIND: &str = "err_kind";
pub const FIELD_ERR_CODE: &str = "err_code";

// Canonical event names
pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";

// Canonical operation names
pub const OP_LOAD_TYPE: &str = "load_type";
pub const OP_INITIALIZE: &str = "initialize";
pub const OP_WARM_UP: &str = "warm_up";
pub const OP_SAVE_CHANGES: &str = "save_changes";
pub const OP_FLUSH: &str = "flush";
