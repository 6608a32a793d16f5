//! Uniform error messages and logging setup.

use std::fmt::Display;

use tracing::subscriber::SetGlobalDefaultError;
use tracing::Level;

/// Prefix every fatal diagnostic the same way so a failing worker's log line
/// is easy to grep for across a whole group.
pub fn error_message(msg: impl Display) -> String {
    format!("gatherplan: {}", msg)
}

/// Install the global `tracing` subscriber.
///
/// `verbosity` counts `-v` flags: 0 => info, 1 => debug, 2+ => trace.
pub fn init_logging(verbosity: u8) -> Result<(), SetGlobalDefaultError> {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
}
