//! Tracing bootstrap.
//!
//! Library code only emits events; installing a subscriber is the
//! embedding application's call. This helper wires up the conventional
//! stderr subscriber honoring `GROVE_LOG` (falling back to `info`).

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "GROVE_LOG";

/// Install the default stderr subscriber. Safe to call more than once;
/// later calls lose the race and are ignored.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
