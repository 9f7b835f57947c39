//! Bucket aggregation
//!
//! For every event and active resolution the aggregator floors the event
//! timestamp to the bucket origin and issues one atomic create-or-increment
//! against the aggregated collection. Write conflicts are retried with
//! exponential backoff; a bucket update is never silently dropped.

use std::sync::Arc;

use futures::future::join_all;

use crate::core::constants::{AGGREGATION_BASE_DELAY_MS, AGGREGATION_MAX_ATTEMPTS};
use crate::data::error::StorageError;
use crate::data::traits::StorageAdapter;
use crate::data::types::{BucketKey, CollectionId, Resolution};
use crate::utils::retry::retry_with_backoff_async;

use super::error::IngestError;
use super::event::Event;

pub struct Aggregator {
    adapter: Arc<dyn StorageAdapter>,
    max_attempts: u32,
    base_delay_ms: u64,
}

impl Aggregator {
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self {
            adapter,
            max_attempts: AGGREGATION_MAX_ATTEMPTS,
            base_delay_ms: AGGREGATION_BASE_DELAY_MS,
        }
    }

    pub fn with_retry(mut self, max_attempts: u32, base_delay_ms: u64) -> Self {
        self.max_attempts = max_attempts;
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Fold the event into its bucket at `resolution`.
    ///
    /// Returns `None` when the value is not aggregatable (structured values).
    pub async fn apply(
        &self,
        collection: &CollectionId,
        event: &Event,
        resolution: Resolution,
    ) -> Result<Option<BucketKey>, IngestError> {
        let Some(delta) = event.bucket_delta() else {
            tracing::trace!(
                %collection,
                attr = %event.attr_name,
                "Value is not aggregatable, skipping"
            );
            return Ok(None);
        };
        let key = BucketKey::new(resolution, event.timestamp, &event.attr_name);

        let result = retry_with_backoff_async(
            self.max_attempts,
            self.base_delay_ms,
            |e: &StorageError| e.is_conflict(),
            || self.adapter.upsert_increment(collection, &key, &delta),
        )
        .await;

        match result {
            Ok((_, attempts)) => {
                if attempts > 1 {
                    tracing::debug!(
                        %collection,
                        %resolution,
                        origin = %key.origin,
                        attempts,
                        "Bucket update applied after conflicts"
                    );
                }
                Ok(Some(key))
            }
            Err((source, attempts)) if !source.is_conflict() => {
                tracing::warn!(
                    %collection,
                    %resolution,
                    origin = %key.origin,
                    attempts,
                    error = %source,
                    "Bucket update failed"
                );
                Err(IngestError::StorageUnavailable(source))
            }
            Err((source, attempts)) => {
                tracing::error!(
                    %collection,
                    %resolution,
                    origin = %key.origin,
                    attempts,
                    error = %source,
                    "Bucket update conflicts exhausted retries"
                );
                Err(IngestError::AggregationFailure {
                    collection: collection.to_string(),
                    resolution,
                    attempts,
                    source,
                })
            }
        }
    }

    /// Apply every resolution independently and concurrently.
    ///
    /// All resolutions are attempted even when one fails; the first failure
    /// (in `resolutions` order) is returned.
    pub async fn apply_all(
        &self,
        collection: &CollectionId,
        event: &Event,
        resolutions: &[Resolution],
    ) -> Result<Vec<BucketKey>, IngestError> {
        let results = join_all(
            resolutions
                .iter()
                .map(|resolution| self.apply(collection, event, *resolution)),
        )
        .await;

        let mut keys = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(Some(key)) => keys.push(key),
                Ok(None) => {}
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(keys),
        }
    }
}
