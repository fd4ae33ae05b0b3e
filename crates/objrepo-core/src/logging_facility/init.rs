//! Subscriber installation for hosts embedding the repository

use std::sync::Once;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

/// Output shape of the installed subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Text output, engine crates at debug
    Development,
    /// JSON lines, engine crates at info
    Production,
    /// Bare registry; pair with `init_test_capture`
    Test,
}

static INIT_ONCE: Once = Once::new();

const DEVELOPMENT_FILTER: &str = "objrepo_core=debug,objrepo_store=debug";
const PRODUCTION_FILTER: &str = "objrepo_core=info,objrepo_store=info";

/// Install the subscriber for `profile`
///
/// Only the first call in a process has any effect, and a subscriber the
/// host installed beforehand is left in place. `RUST_LOG` overrides the
/// profile's filter when set.
///
/// ```
/// use objrepo_core::logging_facility::{init, Profile};
///
/// init(Profile::Production);
/// ```
pub fn init(profile: Profile) {
    INIT_ONCE.call_once(|| match profile {
        Profile::Development => {
            tracing_subscriber::fmt()
                .with_env_filter(filter_or(DEVELOPMENT_FILTER))
                .try_init()
                .ok();
        }
        Profile::Production => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter_or(PRODUCTION_FILTER))
                .try_init()
                .ok();
        }
        Profile::Test => {
            let _ = tracing_subscriber::registry().try_init();
        }
    });
}

fn filter_or(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_idempotent() {
        init(Profile::Test);
        init(Profile::Test);
        init(Profile::Test);
    }

    #[test]
    fn test_filters_name_engine_crates() {
        assert!(DEVELOPMENT_FILTER.contains("objrepo_core=debug"));
        assert!(PRODUCTION_FILTER.contains("objrepo_store=info"));
    }

    #[test]
    fn test_profile_equality() {
        assert_eq!(Profile::Development, Profile::Development);
        assert_ne!(Profile::Development, Profile::Production);
    }
}
