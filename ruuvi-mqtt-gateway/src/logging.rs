//! Log output setup
//!
//! The libraries log through the `log` facade; the subscriber installed here
//! picks those records up and writes them to stderr.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber
///
/// `--debug` forces debug output, otherwise `RUST_LOG` decides and falls
/// back to `info`. Under systemd (`INVOCATION_ID` set) the journal adds its
/// own timestamps.
pub fn init(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if std::env::var_os("INVOCATION_ID").is_some() {
        builder.without_time().init();
    } else {
        builder.init();
    }
}
