//! One-shot cooperative cancellation, shared by the agent turn engine, the
//! MCP client, and the run controller.
//!
//! Every long-running operation takes a [`CancellationToken`] and calls
//! [`CancellationToken::raise_if_cancelled`] before and after each
//! suspension point (an LLM call, a tool dispatch, a result merge).

use crate::errors::AgentError;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::time::Duration;

type Callback = Box<dyn FnOnce() + Send>;

struct Inner {
    cancelled: std::sync::atomic::AtomicBool,
    callbacks: Mutex<Vec<(u64, Callback)>>,
    next_id: std::sync::atomic::AtomicU64,
    notify: Notify,
}

/// A cheaply-cloneable handle to a one-shot cancellation flag.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: std::sync::atomic::AtomicBool::new(false),
                callbacks: Mutex::new(Vec::new()),
                next_id: std::sync::atomic::AtomicU64::new(0),
                notify: Notify::new(),
            }),
        }
    }

    /// Idempotent. The first call runs every registered callback exactly
    /// once, in registration order, then wakes any `wait()`ers.
    pub fn cancel(&self) {
        let already = self
            .inner
            .cancelled
            .swap(true, std::sync::atomic::Ordering::SeqCst);
        if already {
            return;
        }
        let callbacks = std::mem::take(&mut *self.inner.callbacks.lock().unwrap());
        for (_, cb) in callbacks {
            cb();
        }
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Attach a callback. Runs immediately (on the caller) if already
    /// cancelled. Returns a [`Registration`] whose `dispose()` detaches the
    /// callback; disposing after cancellation is a no-op.
    pub fn register<F>(&self, callback: F) -> Registration
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_cancelled() {
            callback();
            return Registration {
                inner: None,
                id: 0,
                disposed: true,
            };
        }
        let id = self
            .inner
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut callbacks = self.inner.callbacks.lock().unwrap();
        callbacks.push((id, Box::new(callback)));
        Registration {
            inner: Some(self.inner.clone()),
            id,
            disposed: false,
        }
    }

    /// Blocks until cancellation or `timeout` elapses, whichever comes
    /// first. Returns `true` if cancellation occurred.
    pub async fn wait(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let notified = self.inner.notify.notified();
        tokio::select! {
            _ = notified => true,
            _ = tokio::time::sleep(timeout) => self.is_cancelled(),
        }
    }

    /// Fails with [`AgentError::Cancelled`] if this token has fired.
    pub fn raise_if_cancelled(&self) -> Result<(), AgentError> {
        if self.is_cancelled() {
            Err(AgentError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`CancellationToken::register`]. `dispose()` detaches
/// the callback; dropping without disposing leaves it registered.
pub struct Registration {
    inner: Option<Arc<Inner>>,
    id: u64,
    disposed: bool,
}

impl Registration {
    /// Removes this registration's callback from the token's callback
    /// list, so `cancel()` never runs it. No-op if cancellation has
    /// already fired (the callback already ran by then, nothing to
    /// detach) or if already disposed.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some(inner) = self.inner.take() {
            let mut callbacks = inner.callbacks.lock().unwrap();
            callbacks.retain(|(id, _)| *id != self.id);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn cancel_is_idempotent() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        token.register(move || {
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        token.cancel();
        token.cancel();
        token.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn register_after_cancel_runs_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        token.register(move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn raise_if_cancelled_reports_cancelled_error() {
        let token = CancellationToken::new();
        assert!(token.raise_if_cancelled().is_ok());
        token.cancel();
        match token.raise_if_cancelled() {
            Err(AgentError::Cancelled) => {}
            other => panic!("expected Cancelled, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn wait_returns_true_once_cancelled() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.wait(Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        assert!(handle.await.unwrap());
    }

    #[test]
    fn disposed_registration_callback_never_runs() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let mut registration = token.register(move || {
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        registration.dispose();
        token.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn disposing_one_registration_leaves_others_intact() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_a = calls.clone();
        let calls_b = calls.clone();
        let mut first = token.register(move || {
            calls_a.fetch_add(1, Ordering::SeqCst);
        });
        let _second = token.register(move || {
            calls_b.fetch_add(10, Ordering::SeqCst);
        });
        first.dispose();
        token.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn wait_times_out_without_cancellation() {
        let token = CancellationToken::new();
        let fired = token.wait(Duration::from_millis(20)).await;
        assert!(!fired);
    }
}
