use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info};

use crate::cloud::SourceStore;
use crate::error::{MigrationError, StageResult};
use crate::models::ObjectDescriptor;

/// Enumerates every object under a bucket and prefix, across pages.
pub struct SourceLister {
    store: Arc<dyn SourceStore>,
}

impl SourceLister {
    pub fn new(store: Arc<dyn SourceStore>) -> Self {
        SourceLister { store }
    }

    /// List `bucket/prefix` as one logically complete sequence.
    ///
    /// Directory markers (keys ending in `/`) are dropped, keys repeated
    /// across pages are kept once, and the result is sorted by key. An
    /// empty result is not an error.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<ObjectDescriptor>)` - Every object found
    /// * `Err` - `SourceUnavailable` or `Authorization` from the store, or
    ///   `SourceUnavailable` when the store hands back a continuation token
    ///   it already issued
    pub async fn list(&self, bucket: &str, prefix: &str) -> StageResult<Vec<ObjectDescriptor>> {
        let mut seen = HashSet::new();
        let mut tokens = HashSet::new();
        let mut objects = Vec::new();
        let mut continuation = None;
        let mut pages = 0usize;

        loop {
            let page = self.store.list_page(bucket, prefix, continuation.take()).await?;
            pages += 1;

            for object in page.objects {
                if object.key.ends_with('/') {
                    debug!("Skipping directory marker {}", object.key);
                    continue;
                }
                if !seen.insert(object.key.clone()) {
                    debug!("Skipping duplicate listing entry {}", object.key);
                    continue;
                }
                objects.push(object);
            }

            match page.next_token {
                Some(token) => {
                    if !tokens.insert(token.clone()) {
                        return Err(MigrationError::SourceUnavailable {
                            message: format!(
                                "listing of {}/{} repeated continuation token '{}' after {} pages",
                                bucket, prefix, token, pages
                            ),
                        });
                    }
                    continuation = Some(token);
                }
                None => break,
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        info!(
            "Listed {} objects under {}/{} from {} ({} pages)",
            objects.len(),
            bucket,
            prefix,
            self.store.describe(),
            pages
        );
        Ok(objects)
    }
}
