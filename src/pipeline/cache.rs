//! Snapshot cache with a freshness window and single-flight refresh.
//!
//! `EMPTY → FETCHING → READY → STALE → FETCHING → …`
//!
//! Entries are replaced whole, never mutated. At most one refresh runs at a
//! time; callers arriving during a refresh wait for it and share its result.

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    Empty,
    Fetching,
    Ready,
    Stale,
}

pub struct CacheEntry<S> {
    pub snapshot: Arc<S>,
    pub captured_at: Instant,
}

/// What a refresh produced.
pub enum Refresh<S> {
    /// Good enough to serve for the whole freshness window.
    Publish(S),
    /// Served to the callers of this cycle only.
    Transient(S),
}

pub struct SnapshotCache<S> {
    ttl: Duration,
    entry: RwLock<Option<Arc<CacheEntry<S>>>>,
    /// Result of the most recently completed cycle, published or not.
    last_cycle: RwLock<Option<Arc<S>>>,
    generation: AtomicU64,
    refresh: Mutex<()>,
}

impl<S> SnapshotCache<S> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: RwLock::new(None),
            last_cycle: RwLock::new(None),
            generation: AtomicU64::new(0),
            refresh: Mutex::new(()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn current(&self) -> Option<Arc<CacheEntry<S>>> {
        self.entry.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn fresh(&self) -> Option<Arc<S>> {
        self.current()
            .filter(|e| e.captured_at.elapsed() < self.ttl)
            .map(|e| Arc::clone(&e.snapshot))
    }

    pub fn state(&self) -> CacheState {
        if self.refresh.try_lock().is_err() {
            return CacheState::Fetching;
        }
        match self.current() {
            None => CacheState::Empty,
            Some(e) if e.captured_at.elapsed() < self.ttl => CacheState::Ready,
            Some(_) => CacheState::Stale,
        }
    }

    /// Drop the current entry; the next read refreshes.
    pub fn invalidate(&self) {
        *self.entry.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> Arc<S>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Refresh<S>>,
    {
        if let Some(snapshot) = self.fresh() {
            return snapshot;
        }

        let seen = self.generation.load(Ordering::Acquire);
        let _guard = self.refresh.lock().await;

        // A cycle finished while we were queued: share its result.
        if self.generation.load(Ordering::Acquire) != seen {
            if let Some(snapshot) = self.fresh().or_else(|| self.last_cycle()) {
                return snapshot;
            }
        }
        if let Some(snapshot) = self.fresh() {
            return snapshot;
        }

        let snapshot = match refresh().await {
            Refresh::Publish(s) => {
                let s = Arc::new(s);
                self.publish(Arc::clone(&s));
                s
            }
            Refresh::Transient(s) => Arc::new(s),
        };

        *self.last_cycle.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&snapshot));
        self.generation.fetch_add(1, Ordering::Release);
        snapshot
    }

    fn last_cycle(&self) -> Option<Arc<S>> {
        self.last_cycle.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn publish(&self, snapshot: Arc<S>) {
        let entry = Arc::new(CacheEntry { snapshot, captured_at: Instant::now() });
        let mut slot = self.entry.write().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_none_or(|cur| cur.captured_at <= entry.captured_at) {
            *slot = Some(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::{advance, sleep};

    fn counting(counter: &Arc<AtomicUsize>, publish: bool) -> impl Future<Output = Refresh<usize>> {
        let counter = Arc::clone(counter);
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if publish { Refresh::Publish(n) } else { Refresh::Transient(n) }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hits_within_window_share_one_refresh() {
        let cache = SnapshotCache::new(Duration::from_secs(300));
        let calls = Arc::new(AtomicUsize::new(0));

        let a = cache.get_or_refresh(|| counting(&calls, true)).await;
        advance(Duration::from_secs(299)).await;
        let b = cache.get_or_refresh(|| counting(&calls, true)).await;

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.state(), CacheState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_triggers_new_refresh() {
        let cache = SnapshotCache::new(Duration::from_secs(300));
        let calls = Arc::new(AtomicUsize::new(0));

        assert_eq!(cache.state(), CacheState::Empty);
        let a = cache.get_or_refresh(|| counting(&calls, true)).await;
        advance(Duration::from_secs(301)).await;
        assert_eq!(cache.state(), CacheState::Stale);

        let b = cache.get_or_refresh(|| counting(&calls, true)).await;
        assert_eq!((*a, *b), (1, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_await_in_flight_refresh() {
        let cache = Arc::new(SnapshotCache::new(Duration::from_secs(300)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_refresh(|| async move {
                        sleep(Duration::from_secs(2)).await;
                        Refresh::Publish(calls.fetch_add(1, Ordering::SeqCst) + 1)
                    })
                    .await
            }));
        }

        for h in handles {
            assert_eq!(*h.await.unwrap(), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_results_are_shared_but_not_cached() {
        let cache = Arc::new(SnapshotCache::new(Duration::from_secs(300)));
        let calls = Arc::new(AtomicUsize::new(0));

        let slow = |calls: Arc<AtomicUsize>| async move {
            sleep(Duration::from_secs(1)).await;
            Refresh::Transient(calls.fetch_add(1, Ordering::SeqCst) + 1)
        };

        let (a, b) = tokio::join!(
            cache.get_or_refresh(|| slow(Arc::clone(&calls))),
            cache.get_or_refresh(|| slow(Arc::clone(&calls))),
        );
        assert_eq!((*a, *b), (1, 1));
        assert_eq!(cache.state(), CacheState::Empty);

        let c = cache.get_or_refresh(|| counting(&calls, false)).await;
        assert_eq!(*c, 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let cache = SnapshotCache::new(Duration::from_secs(300));
        let calls = Arc::new(AtomicUsize::new(0));

        cache.get_or_refresh(|| counting(&calls, true)).await;
        cache.invalidate();
        let b = cache.get_or_refresh(|| counting(&calls, true)).await;
        assert_eq!(*b, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_reports_fetching_during_refresh() {
        let cache = Arc::new(SnapshotCache::new(Duration::from_secs(300)));
        let bg = Arc::clone(&cache);
        let task = tokio::spawn(async move {
            bg.get_or_refresh(|| async {
                sleep(Duration::from_secs(5)).await;
                Refresh::Publish(7usize)
            })
            .await
        });

        sleep(Duration::from_secs(1)).await;
        assert_eq!(cache.state(), CacheState::Fetching);
        tokio_test::assert_ok!(task.await);
        assert_eq!(cache.state(), CacheState::Ready);
    }
}
