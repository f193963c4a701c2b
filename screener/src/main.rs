//! Screener - Background market scanner.
//!
//! Periodically pulls instrument data and keeps the latest snapshot plus a
//! bounded history in memory until interrupted.

use anyhow::Result;
use screener::ScreenerService;
use screener_common::config::Config;
use screener_common::logging::init_logging_with_exclusions;

#[tokio::main]
async fn main() -> Result<()> {
    // Start timing immediately for cold-start measurement
    let startup_start = std::time::Instant::now();

    // Load configuration
    let config = Config::load_with_env()?;

    // Initialize logging
    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    tracing::info!("Screener v{}", env!("CARGO_PKG_VERSION"));

    let service = ScreenerService::new(config);

    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = startup_duration.as_millis() as u64,
        "Service initialized in {:?}",
        startup_duration
    );

    service.run().await
}
