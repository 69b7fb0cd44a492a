use crate::models::AssessmentProgress;
use moka::future::Cache;
use moka::ops::compute::Op;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CachedSnapshot {
    /// `None` for a marker left by a write before any read was cached.
    pub progress: Option<AssessmentProgress>,
    pub fetched_at: Instant,
    /// Cleared by writes. A dirty entry is still a valid fallback.
    pub fresh: bool,
    /// Bumped by every write for the user.
    pub epoch: u64,
}

/// Last fully assembled snapshot per user.
///
/// Entries are never expired by age, only evicted by capacity, so a stale
/// snapshot stays available when the store is slow or down. A read only
/// stores its snapshot as fresh when no write landed while it was running.
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    inner: Cache<String, Arc<CachedSnapshot>>,
}

impl SnapshotCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::new(max_capacity),
        }
    }

    /// Snapshot that may be served without touching the store.
    pub async fn fresh(&self, user_id: &str, ttl: Duration) -> Option<AssessmentProgress> {
        let entry = self.inner.get(user_id).await?;
        if entry.fresh && entry.fetched_at.elapsed() < ttl {
            return entry.progress.clone();
        }
        None
    }

    pub async fn last_known(&self, user_id: &str) -> Option<AssessmentProgress> {
        self.inner.get(user_id).await.and_then(|entry| entry.progress.clone())
    }

    /// Write epoch to hand back to `store_read` once the read finishes.
    pub async fn epoch(&self, user_id: &str) -> u64 {
        self.inner.get(user_id).await.map_or(0, |entry| entry.epoch)
    }

    /// Stores a snapshot unconditionally as fresh.
    pub async fn store(&self, user_id: &str, progress: AssessmentProgress) {
        let epoch = self.epoch(user_id).await;
        let entry = CachedSnapshot {
            progress: Some(progress),
            fetched_at: Instant::now(),
            fresh: true,
            epoch,
        };
        self.inner.insert(user_id.to_string(), Arc::new(entry)).await;
    }

    /// Stores the result of a read that started at `started_epoch`. If a write
    /// bumped the epoch since, the snapshot is kept as last-known only.
    pub async fn store_read(&self, user_id: &str, progress: AssessmentProgress, started_epoch: u64) {
        self.inner
            .entry(user_id.to_string())
            .and_compute_with(|current| {
                let epoch = current.map_or(0, |entry| entry.into_value().epoch);
                let entry = CachedSnapshot {
                    progress: Some(progress),
                    fetched_at: Instant::now(),
                    fresh: epoch == started_epoch,
                    epoch,
                };
                std::future::ready(Op::Put(Arc::new(entry)))
            })
            .await;
    }

    /// Called after every write. Leaves a dirty marker even when nothing is
    /// cached yet, so a read already in flight cannot cache as fresh.
    pub async fn mark_dirty(&self, user_id: &str) {
        self.inner
            .entry(user_id.to_string())
            .and_compute_with(|current| {
                let entry = match current {
                    Some(entry) => {
                        let mut dirty = entry.into_value().as_ref().clone();
                        dirty.fresh = false;
                        dirty.epoch = dirty.epoch.wrapping_add(1);
                        dirty
                    }
                    None => CachedSnapshot {
                        progress: None,
                        fetched_at: Instant::now(),
                        fresh: false,
                        epoch: 1,
                    },
                };
                std::future::ready(Op::Put(Arc::new(entry)))
            })
            .await;
    }

    pub async fn invalidate(&self, user_id: &str) {
        self.inner.invalidate(user_id).await;
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::SnapshotCache;
    use crate::models::AssessmentProgress;
    use std::time::Duration;

    fn progress(part1_complete: bool) -> AssessmentProgress {
        AssessmentProgress {
            part1_complete,
            ..AssessmentProgress::default()
        }
    }

    #[tokio::test]
    async fn fresh_entries_expire_but_stay_as_last_known() {
        let cache = SnapshotCache::new(16);
        cache.store("user-1", progress(true)).await;

        assert!(cache.fresh("user-1", Duration::from_secs(30)).await.is_some());
        assert!(cache.fresh("user-1", Duration::ZERO).await.is_none());
        assert_eq!(cache.last_known("user-1").await, Some(progress(true)));
    }

    #[tokio::test]
    async fn dirty_entries_are_not_served_as_fresh() {
        let cache = SnapshotCache::default();
        cache.mark_dirty("nobody").await;
        assert!(cache.last_known("nobody").await.is_none());
        assert!(cache.fresh("nobody", Duration::from_secs(30)).await.is_none());

        cache.store("user-1", progress(true)).await;
        cache.mark_dirty("user-1").await;
        assert!(cache.fresh("user-1", Duration::from_secs(30)).await.is_none());
        assert!(cache.last_known("user-1").await.is_some());

        cache.invalidate("user-1").await;
        assert!(cache.last_known("user-1").await.is_none());
    }

    #[tokio::test]
    async fn read_overtaken_by_a_write_is_kept_as_last_known_only() {
        let cache = SnapshotCache::default();
        let started = cache.epoch("user-1").await;
        cache.mark_dirty("user-1").await;
        cache.store_read("user-1", progress(false), started).await;

        assert!(cache.fresh("user-1", Duration::from_secs(30)).await.is_none());
        assert_eq!(cache.last_known("user-1").await, Some(progress(false)));

        // The next read that sees no write in between is fresh again.
        let started = cache.epoch("user-1").await;
        assert_eq!(started, 1);
        cache.store_read("user-1", progress(true), started).await;
        assert_eq!(cache.fresh("user-1", Duration::from_secs(30)).await, Some(progress(true)));
    }
}
