use anyhow::Result;
use clap::Parser;
use std::sync::Arc;

use timeline_bench::config::{self, DatastoreSettings, LoadTestArgs};
use timeline_bench::datastore::RestDatastore;
use timeline_bench::loadtest::LoadDriver;
use timeline_bench::logging;
use timeline_bench::timeline::TimelineResolver;

#[tokio::main]
async fn main() -> Result<()> {
    let args = LoadTestArgs::parse();

    // Invalid counts end the run before anything is requested or written
    let load_config = match args.into_config() {
        Ok(load_config) => load_config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(());
        }
    };

    dotenvy::dotenv().ok();
    logging::init(&config::log_level());

    let settings = DatastoreSettings::from_env()?;
    tracing::info!(
        project = %settings.project_id,
        base_url = %settings.base_url,
        emulator = settings.is_emulator(),
        "Datastore configured"
    );

    let store = Arc::new(RestDatastore::new(&settings)?);
    let resolver = Arc::new(TimelineResolver::new(store));
    let driver = LoadDriver::new(load_config, resolver);

    let outcomes = driver.run().await?;

    let dropped: usize = outcomes.iter().map(|o| o.dropped_users.len()).sum();
    if dropped > 0 {
        tracing::warn!(dropped, "Some user tasks did not complete");
    }
    tracing::info!(iterations = outcomes.len(), "Load test finished");

    Ok(())
}
