//! Retention (truncation) enforcement
//!
//! Policies per collection class:
//! - raw: `size` / `max` bound the collection (oldest evicted first); when
//!   either is set the TTL does not apply to raw collections
//! - aggregated: TTL on the bucket origin only
//!
//! Passes run from a background interval and from the post-write hook of
//! the ingestion coordinator. At most one pass per collection runs at a
//! time; triggers arriving meanwhile coalesce into one follow-up pass.
//! Failures are logged and left for the next pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::config::TruncationConfig;
use crate::core::constants::{MAX_EVICTION_BATCHES, RETENTION_BATCH_SIZE};
use crate::data::error::StorageError;
use crate::data::traits::StorageAdapter;
use crate::data::types::{Bounds, CollectionClass, CollectionId, CollectionStats, DeletePredicate};

/// Truncation thresholds; 0 disables a dimension
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub expire_after_seconds: u64,
    pub size: u64,
    pub max: u64,
}

impl From<&TruncationConfig> for RetentionPolicy {
    fn from(config: &TruncationConfig) -> Self {
        Self {
            expire_after_seconds: config.expire_after_seconds,
            size: config.size,
            max: config.max,
        }
    }
}

impl RetentionPolicy {
    pub fn is_disabled(&self) -> bool {
        self.expire_after_seconds == 0 && self.size == 0 && self.max == 0
    }

    /// Bounds for raw collections, `None` when neither size nor max is set
    pub fn raw_bounds(&self) -> Option<Bounds> {
        let bounds = Bounds {
            max_bytes: (self.size > 0).then_some(self.size),
            max_docs: (self.max > 0).then_some(self.max),
        };
        (!bounds.is_unbounded()).then_some(bounds)
    }

    /// Records older than the returned instant expire
    pub fn ttl_cutoff(&self, class: CollectionClass, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.expire_after_seconds == 0 {
            return None;
        }
        if class == CollectionClass::Raw && self.raw_bounds().is_some() {
            return None;
        }
        let seconds = i64::try_from(self.expire_after_seconds).unwrap_or(i64::MAX);
        let threshold = TimeDelta::try_seconds(seconds).unwrap_or(TimeDelta::MAX);
        Some(
            now.checked_sub_signed(threshold)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        )
    }

    /// Whether any rule applies to collections of `class`
    pub fn applies_to(&self, class: CollectionClass) -> bool {
        match class {
            CollectionClass::Raw => self.raw_bounds().is_some() || self.expire_after_seconds > 0,
            CollectionClass::Aggregated => self.expire_after_seconds > 0,
        }
    }
}

/// Work done by one retention pass over one collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionOutcome {
    pub deleted: u64,
    /// Delete calls issued
    pub batches: usize,
    /// The collection was made bounded during this pass
    pub bounded: bool,
}

impl RetentionOutcome {
    fn absorb(&mut self, other: RetentionOutcome) {
        self.deleted += other.deleted;
        self.batches += other.batches;
        self.bounded |= other.bounded;
    }
}

/// Result of an `enforce` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionAction {
    /// No rule applies to this collection class
    Skipped,
    /// A pass was already running; it will run once more
    Coalesced,
    Completed(RetentionOutcome),
    /// The pass failed and was logged; the next pass retries
    Failed,
}

/// Totals of one background pass over every collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPassSummary {
    pub collections: usize,
    pub deleted: u64,
    pub failed: usize,
}

pub struct RetentionEnforcer {
    adapter: Arc<dyn StorageAdapter>,
    policy: RetentionPolicy,
    check_every: u64,
    /// Collections with a running pass; `true` when another pass was requested
    in_flight: DashMap<CollectionId, bool>,
    /// Raw collections already made bounded by this process
    bounded: DashSet<CollectionId>,
    writes: DashMap<CollectionId, u64>,
}

impl RetentionEnforcer {
    pub fn new(adapter: Arc<dyn StorageAdapter>, config: &TruncationConfig) -> Self {
        Self {
            adapter,
            policy: RetentionPolicy::from(config),
            check_every: config.check_every,
            in_flight: DashMap::new(),
            bounded: DashSet::new(),
            writes: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Count a write; true when the post-write check is due for `collection`
    pub fn note_write(&self, collection: &CollectionId) -> bool {
        if self.check_every == 0 || self.policy.is_disabled() {
            return false;
        }
        let mut count = self.writes.entry(collection.clone()).or_insert(0);
        *count += 1;
        if *count >= self.check_every {
            *count = 0;
            true
        } else {
            false
        }
    }

    pub async fn enforce(&self, collection: &CollectionId, class: CollectionClass) -> RetentionAction {
        self.enforce_at(collection, class, Utc::now()).await
    }

    /// Run a single-flight pass with `now` as the reference time
    pub async fn enforce_at(
        &self,
        collection: &CollectionId,
        class: CollectionClass,
        now: DateTime<Utc>,
    ) -> RetentionAction {
        if !self.policy.applies_to(class) {
            return RetentionAction::Skipped;
        }

        match self.in_flight.entry(collection.clone()) {
            Entry::Occupied(mut pending) => {
                *pending.get_mut() = true;
                tracing::trace!(%collection, "Retention pass already running, coalesced");
                return RetentionAction::Coalesced;
            }
            Entry::Vacant(slot) => {
                slot.insert(false);
            }
        }

        let mut total = RetentionOutcome::default();
        let mut failed = false;
        loop {
            match self.run_once(collection, class, now).await {
                Ok(outcome) => total.absorb(outcome),
                Err(e) => {
                    failed = true;
                    tracing::warn!(
                        %collection,
                        %class,
                        error = %e,
                        "Retention pass failed, retrying on next pass"
                    );
                }
            }

            let rerun = match self.in_flight.entry(collection.clone()) {
                Entry::Occupied(mut pending) if *pending.get() && !failed => {
                    *pending.get_mut() = false;
                    true
                }
                Entry::Occupied(pending) => {
                    pending.remove();
                    false
                }
                Entry::Vacant(_) => false,
            };
            if !rerun {
                break;
            }
        }

        if failed {
            return RetentionAction::Failed;
        }
        if total.deleted > 0 {
            tracing::debug!(
                %collection,
                %class,
                deleted = total.deleted,
                batches = total.batches,
                "Retention pass deleted records"
            );
        }
        RetentionAction::Completed(total)
    }

    async fn run_once(
        &self,
        collection: &CollectionId,
        class: CollectionClass,
        now: DateTime<Utc>,
    ) -> Result<RetentionOutcome, StorageError> {
        let mut outcome = RetentionOutcome::default();

        if class == CollectionClass::Raw
            && let Some(bounds) = self.policy.raw_bounds()
        {
            if !self.bounded.contains(collection) {
                self.adapter.create_bounded(collection, bounds).await?;
                self.bounded.insert(collection.clone());
                outcome.bounded = true;
            }
            self.evict_to_bounds(collection, bounds, &mut outcome).await?;
        }

        if let Some(cutoff) = self.policy.ttl_cutoff(class, now) {
            let predicate = match class {
                CollectionClass::Raw => DeletePredicate::RecvTimeBefore(cutoff),
                CollectionClass::Aggregated => DeletePredicate::OriginBefore(cutoff),
            };
            outcome.deleted += self.adapter.delete_where(collection, &predicate).await?;
            outcome.batches += 1;
        }

        Ok(outcome)
    }

    /// Delete oldest raw records in batches until the collection fits
    async fn evict_to_bounds(
        &self,
        collection: &CollectionId,
        bounds: Bounds,
        outcome: &mut RetentionOutcome,
    ) -> Result<(), StorageError> {
        for _ in 0..MAX_EVICTION_BATCHES {
            let stats = self.adapter.collection_size(collection).await?;
            let excess = excess_docs(&bounds, &stats);
            if excess == 0 {
                return Ok(());
            }
            let removed = self
                .adapter
                .delete_where(
                    collection,
                    &DeletePredicate::OldestRaw(excess.min(RETENTION_BATCH_SIZE)),
                )
                .await?;
            outcome.deleted += removed;
            outcome.batches += 1;
            if removed == 0 {
                return Ok(());
            }
        }
        tracing::debug!(%collection, "Eviction batch limit reached, continuing next pass");
        Ok(())
    }

    /// Enforce every collection the adapter knows about
    pub async fn run_pass(&self) -> RetentionPassSummary {
        let mut summary = RetentionPassSummary::default();
        let collections = match self.adapter.list_collections().await {
            Ok(collections) => collections,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list collections for retention");
                summary.failed += 1;
                return summary;
            }
        };

        let now = Utc::now();
        for entry in collections {
            summary.collections += 1;
            match self.enforce_at(&entry.id, entry.class, now).await {
                RetentionAction::Completed(outcome) => summary.deleted += outcome.deleted,
                RetentionAction::Failed => summary.failed += 1,
                RetentionAction::Skipped | RetentionAction::Coalesced => {}
            }
        }
        summary
    }

    /// Start the periodic retention task; `None` when every policy is disabled
    pub fn start_retention_task(
        self: &Arc<Self>,
        interval_secs: u64,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        if self.policy.is_disabled() {
            tracing::debug!("Retention disabled (no truncation configured)");
            return None;
        }

        let enforcer = Arc::clone(self);
        tracing::debug!(
            expire_after_seconds = self.policy.expire_after_seconds,
            size = self.policy.size,
            max = self.policy.max,
            interval_secs,
            "Starting retention task"
        );

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("Retention task shutting down");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let summary = enforcer.run_pass().await;
                        if summary.deleted > 0 || summary.failed > 0 {
                            tracing::debug!(
                                collections = summary.collections,
                                deleted = summary.deleted,
                                failed = summary.failed,
                                "Retention pass completed"
                            );
                        }
                    }
                }
            }
        }))
    }
}

/// Oldest records to drop so `stats` fits `bounds`
fn excess_docs(bounds: &Bounds, stats: &CollectionStats) -> u64 {
    let mut excess = 0;
    if let Some(max_docs) = bounds.max_docs
        && stats.docs > max_docs
    {
        excess = stats.docs - max_docs;
    }
    if let Some(max_bytes) = bounds.max_bytes
        && stats.bytes > max_bytes
        && stats.docs > 0
    {
        let avg = (stats.bytes / stats.docs).max(1);
        excess = excess.max((stats.bytes - max_bytes).div_ceil(avg));
    }
    excess.min(stats.docs)
}
