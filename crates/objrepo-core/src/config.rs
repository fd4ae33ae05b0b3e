use serde::{Deserialize, Serialize};

/// What `remove` does with objects that still reference the removed one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Refuse the removal while any reference exists
    #[default]
    Reject,
    /// Remove referencing objects too, recursively
    Cascade,
    /// Clear nullable references; non-nullable ones still refuse
    Detach,
}

/// Repository behaviour switches
///
/// Deserializable so hosts can embed it in their own configuration files;
/// missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryOptions {
    /// Fail `initialize` on the first accessor error during warm-up
    pub strict_warm_up: bool,
    /// Fail a type's load on the first record that does not decode;
    /// when false such records are skipped with a warning
    pub strict_decode: bool,
    /// Passed to the backend; a read-only backend never auto-flushes
    pub read_only: bool,
    pub delete_policy: DeletePolicy,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            strict_warm_up: false,
            strict_decode: true,
            read_only: false,
            delete_policy: DeletePolicy::Reject,
        }
    }
}

impl RepositoryOptions {
    pub fn with_strict_warm_up(mut self, strict: bool) -> Self {
        self.strict_warm_up = strict;
        self
    }

    pub fn with_strict_decode(mut self, strict: bool) -> Self {
        self.strict_decode = strict;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }
}
