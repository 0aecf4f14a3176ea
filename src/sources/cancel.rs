use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Cooperative cancellation flag shared between a sync and whoever may stop
/// it (usually the Ctrl+C handler).
///
/// Polling with [`CancelSignal::is_cancelled`] is cheap; sleeps that should
/// end early await [`CancelSignal::cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolves once [`CancelSignal::cancel`] has been called, immediately if
    /// it already was.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking the flag so a concurrent cancel()
            // cannot slip between the check and the await.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
