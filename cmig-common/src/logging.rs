//! Logging initialisation
//!
//! `VERBOSE=true` lowers the default level to DEBUG. `RUST_LOG` always wins
//! when present.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber
///
/// Safe to call more than once; later calls are ignored.
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{default_level},sqlx=warn,hyper=warn,reqwest=warn")));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
