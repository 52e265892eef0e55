//! Cancellation token for cooperative cancellation.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// A callback type for cancellation notifications.
pub type CancelCallback = Box<dyn Fn() + Send + Sync>;

/// Why a token was tripped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CancelReason {
    /// Someone asked for cancellation.
    Requested {
        /// Free-form explanation, e.g. "pyproject.toml changed".
        message: String,
    },
    /// A deadline elapsed.
    DeadlineElapsed {
        /// The deadline that elapsed, in milliseconds.
        after_ms: u64,
    },
}

impl CancelReason {
    /// Returns true if the token was tripped by a deadline.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::DeadlineElapsed { .. })
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested { message } => write!(f, "{message}"),
            Self::DeadlineElapsed { after_ms } => write!(f, "deadline of {after_ms}ms elapsed"),
        }
    }
}

/// A token for cooperative cancellation.
///
/// Once tripped a token stays tripped; a fresh token is created for every
/// pipeline run. Only the first reason is kept.
#[derive(Default)]
pub struct CancellationToken {
    /// Whether cancellation has been requested.
    cancelled: AtomicBool,
    /// The reason for cancellation (first one wins).
    reason: RwLock<Option<CancelReason>>,
    /// Callbacks to invoke on cancellation.
    callbacks: RwLock<Vec<CancelCallback>>,
    /// Wakes tasks parked in [`CancellationToken::cancelled`].
    notify: Notify,
}

impl CancellationToken {
    /// Creates a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation with a reason.
    ///
    /// This is idempotent - only the first reason is kept.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.trip(CancelReason::Requested {
            message: reason.into(),
        });
    }

    /// Trips the token with an explicit reason.
    ///
    /// Callbacks are invoked immediately. Panics in callbacks are logged and suppressed.
    pub fn trip(&self, reason: CancelReason) {
        {
            // The reason is stored before the flag is raised, so anyone who
            // sees the flag also sees why.
            let mut slot = self.reason.write();
            if slot.is_some() {
                return;
            }
            debug!(reason = %reason, "Cancellation token tripped");
            *slot = Some(reason);
            self.cancelled.store(true, Ordering::SeqCst);
        }
        self.notify.notify_waiters();

        // Callbacks may register further callbacks on other tokens, so run
        // them without holding the lock.
        let callbacks: Vec<CancelCallback> = self.callbacks.write().drain(..).collect();
        for callback in &callbacks {
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback();
            })) {
                warn!("Cancellation callback panicked: {:?}", e);
            }
        }
    }

    /// Registers a callback to be invoked on cancellation.
    ///
    /// If already cancelled, the callback is invoked immediately.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        {
            let mut callbacks = self.callbacks.write();
            if !self.is_cancelled() {
                callbacks.push(Box::new(callback));
                return;
            }
        }

        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            callback();
        })) {
            warn!("Cancellation callback panicked: {:?}", e);
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.read().clone()
    }

    /// Returns true if the token was tripped by a deadline.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.reason.read().as_ref().is_some_and(CancelReason::is_timeout)
    }

    /// Waits until the token is tripped.
    pub async fn cancelled(&self) {
        loop {
            // Registered before the flag check so a concurrent trip is not missed.
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Creates a token that trips whenever this one does, with the same reason.
    ///
    /// Tripping the child leaves the parent untouched.
    #[must_use]
    pub fn child(self: &Arc<Self>) -> Arc<Self> {
        let child = Arc::new(Self::new());
        let weak: Weak<Self> = Arc::downgrade(&child);
        let parent = Arc::downgrade(self);
        self.on_cancel(move || {
            let reason = parent
                .upgrade()
                .and_then(|p| p.reason())
                .unwrap_or_else(|| CancelReason::Requested {
                    message: "parent cancelled".to_string(),
                });
            if let Some(child) = weak.upgrade() {
                child.trip(reason);
            }
        });
        child
    }

    /// Creates a child token that additionally trips once `deadline` elapses.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn with_deadline(self: &Arc<Self>, deadline: Duration) -> Arc<Self> {
        let child = self.child();
        let timer = Arc::clone(&child);
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(deadline) => {
                    timer.trip(CancelReason::DeadlineElapsed {
                        after_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                    });
                }
                () = timer.cancelled() => {}
            }
        });
        child
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}
