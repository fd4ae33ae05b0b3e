use async_trait::async_trait;

use crate::errors::ExError;
use crate::event::{ChangeStream, EventChannel};

pub type StorageResult<T> = std::result::Result<T, ExError>;

/// Persistence backend contract
///
/// Backends exchange records as JSON keyed by record kind. The repository
/// hands its change stream to [`Storage::track`] once, when the first type
/// is registered; the backend buffers what it sees and persists it on
/// [`Storage::flush`]. Failures the backend detects outside a direct call,
/// such as a partially failed batch, go to [`Storage::errors`] and are
/// forwarded to the repository's exception channel.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// All persisted records of `kind`
    async fn fetch_all(&self, kind: &str) -> StorageResult<Vec<serde_json::Value>>;

    /// Start buffering changes from `stream`
    ///
    /// A read-only backend must still accept the subscription but never
    /// schedule automatic flushes.
    fn track(&self, stream: &ChangeStream, read_only: bool);

    /// Persist buffered changes
    ///
    /// A flush requested while one is running returns without doing work.
    async fn flush(&self) -> StorageResult<()>;

    fn errors(&self) -> &EventChannel<ExError>;
}
