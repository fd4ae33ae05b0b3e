use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

/// A persisted record shape
///
/// Records are what storage backends produce and consume. They travel
/// across the storage boundary as JSON, keyed by `KIND`, and are wrapped by
/// exactly one domain object once loaded.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable name of the record collection in the backend
    const KIND: &'static str;

    /// Primary key, unique within `KIND`
    fn id(&self) -> Uuid;
}
