//! Lifecycle of the shared, expensive-to-build pipeline instance.
//!
//! [`PipelineManager`] is a three-state machine:
//!
//! ```text
//!            warm_up / get_instance          build ok
//!   EMPTY ───────────────────────────▶ LOADING ──────────▶ READY
//!     ▲                                   │                  │
//!     └──────────── build failed ─────────┘                  │
//!     └──────────────────────── invalidate ──────────────────┘
//! ```
//!
//! At most one construction runs at a time, on a spawned tokio task, so a
//! caller that stops waiting never cancels it. The state lives behind a
//! `parking_lot::Mutex` that is only held for short, non-async sections;
//! waiting callers poll at `poll_interval` until `max_wait` elapses.
//!
//! `invalidate()` while LOADING marks the in-flight construction stale: its
//! result is dropped when it finishes and a fresh construction starts in its
//! place, so no caller ever receives an instance built before the
//! invalidation.

use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::LifecycleConfig;
use crate::error::{Error, Result};

/// Builds the managed instance. Called once per construction attempt.
#[async_trait]
pub trait PipelineFactory: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    async fn build(&self) -> Result<Self::Output>;
}

/// Externally visible state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Empty,
    Loading,
    Ready,
}

enum Slot<T> {
    Empty,
    Loading { stale: bool },
    Ready(Arc<T>),
}

type Outcome<T> = Result<Arc<T>>;

struct Inner<F: PipelineFactory> {
    factory: F,
    slot: Mutex<Slot<F::Output>>,
    poll_interval: Duration,
    max_wait: Duration,
}

pub struct PipelineManager<F: PipelineFactory> {
    inner: Arc<Inner<F>>,
}

impl<F: PipelineFactory> Clone for PipelineManager<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: PipelineFactory> PipelineManager<F> {
    pub fn new(factory: F, config: &LifecycleConfig) -> Self {
        Self::with_timing(factory, config.poll_interval(), config.max_wait())
    }

    pub fn with_timing(factory: F, poll_interval: Duration, max_wait: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory,
                slot: Mutex::new(Slot::Empty),
                poll_interval: poll_interval.max(Duration::from_millis(1)),
                max_wait,
            }),
        }
    }

    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    pub fn state(&self) -> PipelineState {
        match &*self.inner.slot.lock() {
            Slot::Empty => PipelineState::Empty,
            Slot::Loading { .. } => PipelineState::Loading,
            Slot::Ready(_) => PipelineState::Ready,
        }
    }

    /// The ready instance, if any. Never starts or waits for a build.
    pub fn current(&self) -> Option<Arc<F::Output>> {
        match &*self.inner.slot.lock() {
            Slot::Ready(instance) => Some(Arc::clone(instance)),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == PipelineState::Ready
    }

    pub fn is_loading(&self) -> bool {
        self.state() == PipelineState::Loading
    }

    /// Start a background construction if nothing is loaded or loading.
    /// Returns immediately.
    pub fn warm_up(&self) {
        let mut slot = self.inner.slot.lock();
        if matches!(*slot, Slot::Empty) {
            tracing::info!("warming up pipeline in the background");
            // Nobody waits on the outcome; failures are logged by the task.
            drop(self.start(&mut slot));
        }
    }

    /// Drop the current instance and start rebuilding it.
    ///
    /// READY becomes EMPTY and a warm-up begins. While LOADING, the running
    /// construction is marked stale and will be redone once it finishes.
    pub fn invalidate(&self) {
        let mut slot = self.inner.slot.lock();
        if let Slot::Loading { stale } = &mut *slot {
            tracing::info!("pipeline invalidated during construction, will rebuild");
            *stale = true;
            return;
        }
        if matches!(*slot, Slot::Ready(_)) {
            tracing::info!("pipeline invalidated, rebuilding");
        }
        *slot = Slot::Empty;
        drop(self.start(&mut slot));
    }

    /// The ready instance, constructing or waiting for it as needed.
    ///
    /// A caller that finds the slot EMPTY starts construction and receives
    /// its outcome, including failure. A caller that finds it LOADING polls
    /// without holding the lock; if the construction it waited on failed it
    /// sees EMPTY on its next poll and starts its own attempt. Gives up with
    /// [`Error::WarmupTimeout`] after `max_wait`.
    pub async fn get_instance(&self) -> Result<Arc<F::Output>> {
        let deadline = Instant::now() + self.inner.max_wait;

        loop {
            let outcome = {
                let mut slot = self.inner.slot.lock();
                if let Slot::Ready(instance) = &*slot {
                    return Ok(Arc::clone(instance));
                }
                if matches!(*slot, Slot::Empty) {
                    Some(self.start(&mut slot))
                } else {
                    None
                }
            };

            if let Some(rx) = outcome {
                match tokio::time::timeout_at(deadline, rx).await {
                    Ok(Ok(result)) => return result,
                    // Sender dropped without a result; re-check the slot.
                    Ok(Err(_)) => continue,
                    Err(_) => return Err(Error::WarmupTimeout(self.inner.max_wait)),
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::WarmupTimeout(self.inner.max_wait));
            }
            tokio::time::sleep(self.inner.poll_interval.min(deadline - now)).await;
        }
    }

    /// EMPTY → LOADING. Must be called with the slot locked and EMPTY.
    fn start(&self, slot: &mut Slot<F::Output>) -> oneshot::Receiver<Outcome<F::Output>> {
        debug_assert!(matches!(slot, Slot::Empty));
        *slot = Slot::Loading { stale: false };

        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = construct(&inner).await;
            // The receiver may have timed out; construction still counts.
            let _ = tx.send(outcome);
        });
        rx
    }
}

async fn construct<F: PipelineFactory>(inner: &Inner<F>) -> Outcome<F::Output> {
    loop {
        let started = std::time::Instant::now();
        let result = AssertUnwindSafe(inner.factory.build())
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                Err(Error::model_unavailable("pipeline construction panicked"))
            });

        if let Some(outcome) = finish(inner, result, started.elapsed()) {
            return outcome;
        }
    }
}

/// LOADING → READY or EMPTY. Returns `None` when the attempt went stale and
/// must be repeated.
fn finish<F: PipelineFactory>(
    inner: &Inner<F>,
    result: Result<F::Output>,
    elapsed: Duration,
) -> Option<Outcome<F::Output>> {
    let mut slot = inner.slot.lock();
    if let Slot::Loading { stale } = &mut *slot {
        if *stale {
            tracing::info!("discarding pipeline built before invalidation");
            *stale = false;
            return None;
        }
    }

    match result {
        Ok(instance) => {
            let instance = Arc::new(instance);
            *slot = Slot::Ready(Arc::clone(&instance));
            tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "pipeline ready");
            Some(Ok(instance))
        }
        Err(e) => {
            *slot = Slot::Empty;
            if e.is_not_ready() {
                tracing::warn!(error = %e, "pipeline construction failed");
            } else {
                tracing::error!(error = %e, "pipeline construction failed");
            }
            Some(Err(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Counts constructions; each instance carries its build number.
    struct CountingFactory {
        builds: AtomicUsize,
        delay: Duration,
        fail: AtomicBool,
    }

    impl CountingFactory {
        fn new(delay_ms: u64) -> Self {
            Self {
                builds: AtomicUsize::new(0),
                delay: Duration::from_millis(delay_ms),
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl PipelineFactory for CountingFactory {
        type Output = usize;

        async fn build(&self) -> Result<usize> {
            let n = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::IndexNotFound("test".to_string()));
            }
            Ok(n)
        }
    }

    fn manager(factory: CountingFactory) -> PipelineManager<CountingFactory> {
        PipelineManager::with_timing(factory, Duration::from_millis(5), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_starts_empty() {
        let m = manager(CountingFactory::new(0));
        assert_eq!(m.state(), PipelineState::Empty);
        assert!(!m.is_ready());
        assert!(!m.is_loading());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_construction() {
        let m = manager(CountingFactory::new(50));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let m = m.clone();
                tokio::spawn(async move { m.get_instance().await.unwrap() })
            })
            .collect();

        let mut instances = Vec::new();
        for h in handles {
            instances.push(h.await.unwrap());
        }
        assert_eq!(m.factory().builds.load(Ordering::SeqCst), 1);
        assert!(instances.iter().all(|i| Arc::ptr_eq(i, &instances[0])));
        assert!(m.is_ready());
    }

    #[tokio::test]
    async fn test_warm_up_is_non_blocking() {
        let m = manager(CountingFactory::new(100));
        m.warm_up();
        assert!(m.is_loading());
        m.warm_up();
        let instance = m.get_instance().await.unwrap();
        assert_eq!(*instance, 1);
        assert_eq!(m.factory().builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_yields_new_instance() {
        let m = manager(CountingFactory::new(10));
        let first = m.get_instance().await.unwrap();
        m.invalidate();
        let second = m.get_instance().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*second, 2);
    }

    #[tokio::test]
    async fn test_invalidate_while_loading_discards_stale_build() {
        let m = manager(CountingFactory::new(50));
        m.warm_up();
        assert!(m.is_loading());
        m.invalidate();
        let instance = m.get_instance().await.unwrap();
        assert_eq!(*instance, 2, "the build started before invalidation must be dropped");
        assert_eq!(m.factory().builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_returns_to_empty_and_retries() {
        let factory = CountingFactory::new(0);
        factory.fail.store(true, Ordering::SeqCst);
        let m = manager(factory);

        let err = m.get_instance().await.unwrap_err();
        assert!(matches!(err, Error::IndexNotFound(_)));
        assert_eq!(m.state(), PipelineState::Empty);

        m.factory().fail.store(false, Ordering::SeqCst);
        let instance = m.get_instance().await.unwrap();
        assert_eq!(*instance, 2);
    }

    /// Fails its first build only.
    struct FlakyFactory {
        builds: AtomicUsize,
    }

    #[async_trait]
    impl PipelineFactory for FlakyFactory {
        type Output = usize;

        async fn build(&self) -> Result<usize> {
            let n = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(50)).await;
            if n == 1 {
                return Err(Error::IndexNotFound("first".to_string()));
            }
            Ok(n)
        }
    }

    #[tokio::test]
    async fn test_polling_waiter_retries_after_failed_build() {
        let m = PipelineManager::with_timing(
            FlakyFactory {
                builds: AtomicUsize::new(0),
            },
            Duration::from_millis(5),
            Duration::from_secs(5),
        );

        let trigger = {
            let m = m.clone();
            tokio::spawn(async move { m.get_instance().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(m.is_loading());

        let waiter = {
            let m = m.clone();
            tokio::spawn(async move { m.get_instance().await })
        };

        let err = trigger.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::IndexNotFound(_)));
        let instance = waiter.await.unwrap().unwrap();
        assert_eq!(*instance, 2);
        assert_eq!(m.factory().builds.load(Ordering::SeqCst), 2);
        assert!(m.is_ready());
    }

    #[tokio::test]
    async fn test_current_does_not_trigger_build() {
        let m = manager(CountingFactory::new(0));
        assert!(m.current().is_none());
        assert_eq!(m.state(), PipelineState::Empty);

        let instance = m.get_instance().await.unwrap();
        assert!(Arc::ptr_eq(&m.current().unwrap(), &instance));
    }

    #[tokio::test]
    async fn test_waiter_times_out_without_cancelling_construction() {
        let m = PipelineManager::with_timing(
            CountingFactory::new(200),
            Duration::from_millis(5),
            Duration::from_millis(20),
        );
        let err = m.get_instance().await.unwrap_err();
        assert!(matches!(err, Error::WarmupTimeout(_)));
        assert!(m.is_loading());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(m.is_ready());
    }

    struct PanickingFactory;

    #[async_trait]
    impl PipelineFactory for PanickingFactory {
        type Output = ();
        async fn build(&self) -> Result<()> {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn test_panic_in_factory_resets_to_empty() {
        let m = PipelineManager::with_timing(
            PanickingFactory,
            Duration::from_millis(5),
            Duration::from_secs(1),
        );
        let err = m.get_instance().await.unwrap_err();
        assert!(matches!(err, Error::ModelUnavailable(_)));
        assert_eq!(m.state(), PipelineState::Empty);
    }
}
