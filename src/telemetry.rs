use tracing_subscriber::{fmt, EnvFilter};

use crate::config;

/// Installs the global subscriber. `RUST_LOG` selects levels (default `info`);
/// `LOG_FORMAT=pretty` switches from JSON lines to human readable output.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(true);

    let result = if config::LOG_FORMAT.as_str() == "pretty" {
        builder.pretty().try_init()
    } else {
        builder.json().try_init()
    };

    if let Err(error) = result {
        // a subscriber was already installed, e.g. by a test harness
        eprintln!("tracing subscriber not installed: {error}");
    }
}
