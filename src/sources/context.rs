//! Periodically refreshed per-site context (client versions, access tokens).

use std::{
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::common::SourceResult;

/// Holds the latest context snapshot. Readers always see either the old or
/// the new snapshot in full.
pub struct ContextStore<T> {
    current: RwLock<Option<Arc<T>>>,
}

impl<T> ContextStore<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            current: RwLock::new(None),
        })
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.current.read().clone()
    }

    pub fn replace(&self, value: T) {
        *self.current.write() = Some(Arc::new(value));
    }

    pub fn clear(&self) {
        *self.current.write() = None;
    }
}

/// Produces a fresh context snapshot.
#[async_trait]
pub trait ContextFetcher: Send + Sync + 'static {
    type Data: Send + Sync + 'static;

    fn name(&self) -> &str;

    async fn fetch(&self) -> SourceResult<Self::Data>;
}

#[derive(Debug, Clone, Copy)]
pub struct RefreshSchedule {
    pub interval: Duration,
    /// Shorter delay before the next tick after a failed refresh.
    pub retry_after_failure: Option<Duration>,
}

impl RefreshSchedule {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            retry_after_failure: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
    Stopped,
}

const STATE_IDLE: u8 = 0;
const STATE_REFRESHING: u8 = 1;
const STATE_STOPPED: u8 = 2;

struct Shared<F: ContextFetcher> {
    fetcher: F,
    store: Arc<ContextStore<F::Data>>,
    state: AtomicU8,
}

impl<F: ContextFetcher> Shared<F> {
    /// Fetches without holding the store lock and swaps the result in.
    async fn refresh(&self) -> bool {
        let _ = self.state.compare_exchange(
            STATE_IDLE,
            STATE_REFRESHING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        let ok = match self.fetcher.fetch().await {
            Ok(data) => {
                self.store.replace(data);
                debug!("Refreshed {} context", self.fetcher.name());
                true
            }
            Err(e) => {
                error!("Failed to refresh {} context: {}", self.fetcher.name(), e);
                false
            }
        };

        let _ = self.state.compare_exchange(
            STATE_REFRESHING,
            STATE_IDLE,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        ok
    }
}

/// Background task that refreshes a `ContextStore` on a schedule.
/// Dropping it stops the task.
pub struct ContextRefresher<F: ContextFetcher> {
    shared: Arc<Shared<F>>,
    cancel: CancellationToken,
}

impl<F: ContextFetcher> ContextRefresher<F> {
    /// Starts refreshing immediately, then on every tick of `schedule`.
    pub fn spawn(fetcher: F, schedule: RefreshSchedule) -> Self {
        Self::spawn_into(fetcher, ContextStore::new(), schedule)
    }

    /// Like `spawn` but writes into a store supplied by the caller, so several
    /// consumers can share one snapshot.
    pub fn spawn_into(fetcher: F, store: Arc<ContextStore<F::Data>>, schedule: RefreshSchedule) -> Self {
        let shared = Arc::new(Shared {
            fetcher,
            store,
            state: AtomicU8::new(STATE_IDLE),
        });
        let cancel = CancellationToken::new();

        let task_shared = shared.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let ok = tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    ok = task_shared.refresh() => ok,
                };

                let delay = match (ok, schedule.retry_after_failure) {
                    (false, Some(retry)) => retry,
                    _ => schedule.interval,
                };

                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            task_shared.state.store(STATE_STOPPED, Ordering::Release);
            debug!("{} context refresher stopped", task_shared.fetcher.name());
        });

        Self { shared, cancel }
    }

    pub fn store(&self) -> Arc<ContextStore<F::Data>> {
        self.shared.store.clone()
    }

    /// Refreshes out of schedule; returns whether the fetch succeeded.
    pub async fn refresh_now(&self) -> bool {
        self.shared.refresh().await
    }

    pub fn state(&self) -> RefreshState {
        match self.shared.state.load(Ordering::Acquire) {
            STATE_REFRESHING => RefreshState::Refreshing,
            STATE_STOPPED => RefreshState::Stopped,
            _ => RefreshState::Idle,
        }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl<F: ContextFetcher> Drop for ContextRefresher<F> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
