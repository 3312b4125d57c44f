use anyhow::Result;

use timeline_bench::cleanup::{delete_all_posts, DEFAULT_BATCH_SIZE};
use timeline_bench::config::{self, DatastoreSettings};
use timeline_bench::datastore::RestDatastore;
use timeline_bench::logging;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init(&config::log_level());

    let settings = DatastoreSettings::from_env()?;
    tracing::info!(project = %settings.project_id, "Deleting posts");

    let store = RestDatastore::new(&settings)?;
    let report = delete_all_posts(&store, DEFAULT_BATCH_SIZE).await?;

    tracing::info!(total = report.total(), "Done");
    Ok(())
}
