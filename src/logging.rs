//! Log subscriber setup for the command-line tool
//!
//! Library code only emits `tracing` events. The binary installs a stderr
//! subscriber so that stdout stays free for reports.

use tracing::metadata::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Map `-v` repetitions to a default level. `RUST_LOG` overrides it.
pub fn level_from_verbosity(verbosity: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::ERROR;
    }
    match verbosity {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Install the global subscriber. Calling it twice is a no-op.
pub fn init(verbosity: u8, quiet: bool) {
    let filter = EnvFilter::builder()
        .with_default_directive(level_from_verbosity(verbosity, quiet).into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
