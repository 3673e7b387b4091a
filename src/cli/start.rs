use crate::cli::{actions, commands, dispatch, telemetry};
use anyhow::Result;
use tracing::Level;

/// Parse the command line, set up telemetry and run the exporter.
///
/// # Errors
///
/// Returns an error if telemetry setup, argument validation or the exporter
/// fails.
pub async fn start() -> Result<()> {
    let matches = commands::new().get_matches();

    let _telemetry = telemetry::init(verbosity(matches.get_count("verbosity")))?;

    let action = dispatch::handler(&matches)?;

    actions::run::handle(action).await
}

const fn verbosity(count: u8) -> Option<Level> {
    match count {
        0 => None,
        1 => Some(Level::WARN),
        2 => Some(Level::INFO),
        3 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    }
}
