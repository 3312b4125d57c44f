// Bulk deletion of Post entities

use crate::datastore::{Datastore, Key, Query};
use crate::error::Result;
use crate::models::POST_KIND;

/// Keys fetched and deleted per transaction
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Per-pass deletion counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub batches: Vec<usize>,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.batches.iter().sum()
    }
}

/// Delete every `Post`: fetch up to `batch_size` keys, delete them in one
/// transaction, repeat until a fetch comes back empty.
pub async fn delete_all_posts(store: &dyn Datastore, batch_size: usize) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();

    println!("Deleting all Post entities...");

    loop {
        let query = Query::new(POST_KIND).keys_only().limit(batch_size);
        let keys: Vec<Key> = store
            .run_query(&query)
            .await?
            .into_iter()
            .filter_map(|entity| entity.key)
            .collect();

        if keys.is_empty() {
            break;
        }

        store.delete_in_transaction(&keys).await?;
        report.batches.push(keys.len());

        println!("Deleted {} posts...", keys.len());
        tracing::debug!(batch = report.batches.len(), count = keys.len(), "Deleted batch");
    }

    println!("All posts have been deleted.");
    tracing::info!(total = report.total(), passes = report.batches.len(), "Cleanup complete");

    Ok(report)
}
