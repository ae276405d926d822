//! Logging setup for hosts that don't bring their own subscriber.

use tracing_subscriber::EnvFilter;

use crate::EarshotError;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,earshot=info";

/// Installs a global `tracing` subscriber filtered by `RUST_LOG`, falling
/// back to [`DEFAULT_FILTER`].
///
/// # Errors
/// Returns `EarshotError::Logging` if a global subscriber is already set.
pub fn init_logging() -> Result<(), EarshotError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| EarshotError::Logging(e.to_string()))
}
