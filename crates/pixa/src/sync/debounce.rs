//! Cancellable delayed execution for sync pushes.
//!
//! Each sync target owns one [`Debouncer`]. Scheduling a new run cancels the
//! previous one if it is still waiting out its delay. Once the delay has
//! elapsed and the work has started it runs to completion; a superseding
//! schedule only prevents the *next* redundant firing.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct Debouncer {
    pending: Mutex<Option<CancellationToken>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` after `delay` unless another call to `schedule` or
    /// [`Debouncer::cancel`] happens first.
    ///
    /// Outside a tokio runtime nothing is scheduled and this returns false.
    pub fn schedule<F>(&self, delay: Duration, work: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No async runtime, skipping debounced sync");
            return false;
        };

        let token = CancellationToken::new();
        if let Some(previous) = self.swap(Some(token.clone())) {
            previous.cancel();
        }

        runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            // Started runs are no longer cancellable.
            token.cancel();
            work.await;
        });
        true
    }

    /// Cancels the waiting run, if any.
    pub fn cancel(&self) {
        if let Some(previous) = self.swap(None) {
            previous.cancel();
        }
    }

    /// True while a run is waiting out its delay.
    pub fn is_scheduled(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    fn swap(&self, next: Option<CancellationToken>) -> Option<CancellationToken> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *pending, next)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(counter: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let debouncer = Debouncer::new();
        let runs = Arc::new(AtomicUsize::new(0));

        debouncer.schedule(Duration::from_secs(2), counting(&runs));
        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_supersedes_waiting_run() {
        let debouncer = Debouncer::new();
        let runs = Arc::new(AtomicUsize::new(0));

        debouncer.schedule(Duration::from_secs(2), counting(&runs));
        tokio::time::sleep(Duration::from_secs(1)).await;
        debouncer.schedule(Duration::from_secs(2), counting(&runs));
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_run() {
        let debouncer = Debouncer::new();
        let runs = Arc::new(AtomicUsize::new(0));

        debouncer.schedule(Duration::from_secs(1), counting(&runs));
        assert!(debouncer.is_scheduled());
        debouncer.cancel();
        assert!(!debouncer.is_scheduled());
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn without_runtime_nothing_is_scheduled() {
        let debouncer = Debouncer::new();
        assert!(!debouncer.schedule(Duration::from_secs(1), async {}));
    }
}
