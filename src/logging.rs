//! Log subscriber setup.

use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: Once = Once::new();

/// Installs the global subscriber once.
///
/// Levels come from `NESTEGG_LOG` (e.g. `NESTEGG_LOG=nestegg::core=debug`) and default to
/// `nestegg=info`. Output goes to stderr so CLI reports on stdout stay machine-readable.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("NESTEGG_LOG")
            .unwrap_or_else(|_| EnvFilter::new("nestegg=info"));

        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .with(filter)
            .init();
    });
}
