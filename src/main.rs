use millkit::{init_logging, MillConfig, MillController};
use std::path::Path;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    init_logging()?;

    let config = match std::env::args().nth(1) {
        Some(path) => MillConfig::load_from_file(Path::new(&path))?,
        None => MillConfig::new(),
    };

    let mut mill = MillController::serial(config)?;
    mill.enter_session()?;

    let position = mill.current_position()?;
    tracing::info!(
        port = mill.port().unwrap_or_default(),
        homed = mill.is_homed(),
        %position,
        "Mill ready"
    );

    mill.disconnect()?;
    Ok(())
}
