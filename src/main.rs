use anyhow::{Result, anyhow};
use log::{error, info};

use phototrail::api::build_rocket;
use phototrail::common::SERVER_RUNTIME;
use phototrail::config::AppConfig;
use phototrail::workflow::processors::setup::{initialize, initialize_logger};

fn main() -> Result<()> {
    initialize_logger();

    let config = AppConfig::from_env()?;
    initialize(&config)?;
    info!(
        "Serving on {}:{} (derived files in {}, records in {})",
        config.address,
        config.port,
        config.derived_dir.display(),
        config.records_dir.display()
    );

    SERVER_RUNTIME
        .block_on(async { build_rocket(&config).launch().await })
        .map(|_| ())
        .map_err(|err| {
            error!("Rocket server failed: {}", err);
            anyhow!("Rocket server failed: {err}")
        })
}
