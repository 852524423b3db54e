// Copyright 2026 VFat Loader Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-page load tracker.
//!
//! A `LoadTracker` counts how many yield records a page attempted to ingest
//! and how many the ingestion API accepted, and exposes a single completion
//! signal the orchestrator can await.
//!
//! Inserts are registered in a task group owned by the tracker. The group is
//! sealed by [`LoadTracker::complete_load`]: every insert submitted before the
//! seal is joined, and any submission after it is rejected. Submission bumps
//! the attempt counter and registers the task under the same lock that the
//! seal takes, so no insert can slip between "counted" and "joined".

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Errors returned by tracker operations.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerError {
    #[error("load already completed; insert rejected")]
    Sealed,

    #[error("completeLoad was already called for this page")]
    AlreadyCompleted,
}

/// Point-in-time view of a tracker's counters and flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSnapshot {
    pub attempt_count: u64,
    pub success_count: u64,
    pub main_completed: bool,
    pub load_completed: bool,
    pub pending_inserts: usize,
}

impl LoadSnapshot {
    pub fn failure_count(&self) -> u64 {
        self.attempt_count - self.success_count
    }
}

struct Pending {
    sealed: bool,
    tasks: JoinSet<()>,
}

struct Inner {
    attempt_count: AtomicU64,
    success_count: AtomicU64,
    in_flight: AtomicUsize,
    load_wait_override: Option<Duration>,
    pending: Mutex<Pending>,
    completed: watch::Sender<bool>,
}

impl Inner {
    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Decrements the in-flight counter when an insert task ends, including
/// when it panics or is aborted.
struct InFlightGuard(Weak<Inner>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.0.upgrade() {
            inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Attempt/success bookkeeping for one page navigation.
///
/// Cheap to clone; all clones share the same counters. Dropping the last
/// clone aborts any insert still in flight.
#[derive(Clone)]
pub struct LoadTracker {
    inner: Arc<Inner>,
}

impl LoadTracker {
    /// Create a tracker with zeroed counters. `load_wait_override` replaces
    /// the orchestrator's default completion timeout for this page.
    pub fn new(load_wait_override: Option<Duration>) -> Self {
        let (completed, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                attempt_count: AtomicU64::new(0),
                success_count: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
                load_wait_override,
                pending: Mutex::new(Pending {
                    sealed: false,
                    tasks: JoinSet::new(),
                }),
                completed,
            }),
        }
    }

    pub fn load_wait_override(&self) -> Option<Duration> {
        self.inner.load_wait_override
    }

    /// Register one insert.
    ///
    /// The attempt is counted before this returns; the insert itself runs in
    /// the background. `Ok(())` from the insert counts as a success, an error
    /// is logged and counted as a failure. Errors never reach the caller and
    /// are not retried here.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit_insert<F, E>(&self, insert: F) -> Result<(), TrackerError>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let mut pending = self.inner.pending();
        if pending.sealed {
            return Err(TrackerError::Sealed);
        }

        let attempt = self.inner.attempt_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let weak = Arc::downgrade(&self.inner);

        pending.tasks.spawn(async move {
            let _guard = InFlightGuard(weak.clone());
            match insert.await {
                Ok(()) => {
                    if let Some(inner) = weak.upgrade() {
                        inner.success_count.fetch_add(1, Ordering::SeqCst);
                    }
                    debug!(attempt, "yield record inserted");
                }
                Err(e) => warn!(attempt, "failed to insert yield record: {e}"),
            }
        });

        Ok(())
    }

    /// Seal the tracker and wait for every submitted insert to settle.
    ///
    /// `main_completed` flips immediately; `load_completed` flips once the
    /// last insert has finished, success or not. Inserts must all be
    /// submitted before this is called.
    pub async fn complete_load(&self) -> Result<LoadSnapshot, TrackerError> {
        let mut tasks = {
            let mut pending = self.inner.pending();
            if pending.sealed {
                return Err(TrackerError::AlreadyCompleted);
            }
            pending.sealed = true;
            std::mem::take(&mut pending.tasks)
        };

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!("insert task did not finish cleanly: {e}");
            }
        }

        self.inner.completed.send_replace(true);
        Ok(self.snapshot())
    }

    /// True until `complete_load` has been called.
    pub fn is_ready_for_inserts(&self) -> bool {
        !self.inner.pending().sealed
    }

    pub fn is_load_completed(&self) -> bool {
        *self.inner.completed.borrow()
    }

    /// Resolve once `load_completed` is set.
    pub async fn wait_for_completion(&self) -> LoadSnapshot {
        let mut rx = self.inner.completed.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = rx.wait_for(|done| *done).await;
        self.snapshot()
    }

    pub fn snapshot(&self) -> LoadSnapshot {
        let main_completed = !self.is_ready_for_inserts();
        let load_completed = self.is_load_completed();
        // Read success before attempt: attempts only grow, so the pair never
        // shows more successes than attempts.
        let success_count = self.inner.success_count.load(Ordering::SeqCst);
        let attempt_count = self.inner.attempt_count.load(Ordering::SeqCst);
        LoadSnapshot {
            attempt_count,
            success_count,
            main_completed,
            load_completed,
            pending_inserts: self.inner.in_flight.load(Ordering::SeqCst),
        }
    }
}

impl std::fmt::Debug for LoadTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadTracker")
            .field("snapshot", &self.snapshot())
            .field("load_wait_override", &self.inner.load_wait_override)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    /// Submit an insert whose outcome is decided later through the returned sender.
    fn controlled_insert(tracker: &LoadTracker) -> oneshot::Sender<bool> {
        let (tx, rx) = oneshot::channel::<bool>();
        tracker
            .submit_insert(async move {
                match rx.await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err("ingestion API returned 500".to_string()),
                    Err(_) => Err("outcome sender dropped".to_string()),
                }
            })
            .unwrap();
        tx
    }

    #[tokio::test]
    async fn test_new_tracker_is_zeroed() {
        let tracker = LoadTracker::new(None);
        let snap = tracker.snapshot();
        assert_eq!(snap.attempt_count, 0);
        assert_eq!(snap.success_count, 0);
        assert!(!snap.main_completed);
        assert!(!snap.load_completed);
        assert!(tracker.is_ready_for_inserts());
        assert_eq!(tracker.load_wait_override(), None);
    }

    #[tokio::test]
    async fn test_attempt_counted_before_insert_runs() {
        let tracker = LoadTracker::new(None);
        let _outcome = controlled_insert(&tracker);
        let snap = tracker.snapshot();
        assert_eq!(snap.attempt_count, 1);
        assert_eq!(snap.success_count, 0);
        assert_eq!(snap.pending_inserts, 1);
    }

    #[tokio::test]
    async fn test_settle_all_regardless_of_order() {
        let tracker = LoadTracker::new(None);
        let outcomes = [true, false, true, true, false, true, true];
        let senders: Vec<_> = outcomes.iter().map(|_| controlled_insert(&tracker)).collect();

        let completion = tokio::spawn({
            let tracker = tracker.clone();
            async move { tracker.complete_load().await }
        });

        // Settle in reverse submission order.
        for (tx, ok) in senders.into_iter().zip(outcomes).rev() {
            tx.send(ok).unwrap();
            tokio::task::yield_now().await;
        }

        let snap = completion.await.unwrap().unwrap();
        assert_eq!(snap.attempt_count, 7);
        assert_eq!(snap.success_count, 5);
        assert_eq!(snap.failure_count(), 2);
        assert!(snap.main_completed);
        assert!(snap.load_completed);
        assert_eq!(snap.pending_inserts, 0);
    }

    #[tokio::test]
    async fn test_completion_waits_for_pending_insert() {
        let tracker = LoadTracker::new(None);
        let fast = controlled_insert(&tracker);
        let slow = controlled_insert(&tracker);
        fast.send(true).unwrap();

        let completion = tokio::spawn({
            let tracker = tracker.clone();
            async move { tracker.complete_load().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let snap = tracker.snapshot();
        assert!(snap.main_completed);
        assert!(!snap.load_completed);
        assert!(!completion.is_finished());

        slow.send(false).unwrap();
        let snap = completion.await.unwrap().unwrap();
        assert!(snap.load_completed);
        assert_eq!(snap.success_count, 1);
        assert_eq!(snap.attempt_count, 2);
    }

    #[tokio::test]
    async fn test_insert_after_seal_is_rejected() {
        let tracker = LoadTracker::new(None);
        tracker.complete_load().await.unwrap();
        assert!(!tracker.is_ready_for_inserts());

        let rejected = tracker.submit_insert(async { Ok::<(), String>(()) });
        assert_eq!(rejected, Err(TrackerError::Sealed));
        assert_eq!(tracker.snapshot().attempt_count, 0);
    }

    #[tokio::test]
    async fn test_complete_load_twice() {
        let tracker = LoadTracker::new(None);
        tracker.complete_load().await.unwrap();
        assert_eq!(
            tracker.complete_load().await,
            Err(TrackerError::AlreadyCompleted)
        );
    }

    #[tokio::test]
    async fn test_wait_for_completion() {
        let tracker = LoadTracker::new(Some(Duration::from_secs(120)));
        let waiter = tokio::spawn({
            let tracker = tracker.clone();
            async move { tracker.wait_for_completion().await }
        });

        let outcome = controlled_insert(&tracker);
        outcome.send(true).unwrap();
        tracker.complete_load().await.unwrap();

        let snap = waiter.await.unwrap();
        assert!(snap.load_completed);
        assert_eq!(snap.success_count, 1);
        assert_eq!(tracker.load_wait_override(), Some(Duration::from_secs(120)));
    }

    #[tokio::test]
    async fn test_panicking_insert_counts_as_failure() {
        let tracker = LoadTracker::new(None);
        tracker
            .submit_insert(async {
                if true {
                    panic!("scraper bug");
                }
                Ok::<(), String>(())
            })
            .unwrap();

        let snap = tracker.complete_load().await.unwrap();
        assert_eq!(snap.attempt_count, 1);
        assert_eq!(snap.success_count, 0);
        assert_eq!(snap.pending_inserts, 0);
    }
}
