use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::error::{AutoRulesError, AutoRulesResult, ExecutionError};

use super::{Notification, Registry, SubscriberId};

/// A subscription to the notification channel.
///
/// Dropping this stream unregisters it.
#[derive(Debug)]
pub struct NotificationStream {
    subscriber_id: SubscriberId,
    rx: Receiver<Notification>,
    registry: Weak<Registry>,
    unregistered: AtomicBool,
}

impl NotificationStream {
    pub(crate) fn new(
        subscriber_id: SubscriberId,
        rx: Receiver<Notification>,
        registry: Weak<Registry>,
    ) -> Self {
        Self {
            subscriber_id,
            rx,
            registry,
            unregistered: AtomicBool::new(false),
        }
    }

    /// The id backing this subscription.
    #[must_use]
    pub const fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    /// Explicit unregistration. Idempotent; buffered notifications stay readable.
    pub fn unsubscribe(&self) {
        if self.unregistered.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut guard) = registry.write() {
                guard.remove(&self.subscriber_id);
            }
        }
    }

    /// Receive the next notification (blocking).
    pub fn recv(&self) -> AutoRulesResult<Notification> {
        self.rx.recv().map_err(|_| {
            AutoRulesError::Execution(ExecutionError::Disconnected {
                path: "notification_stream".to_string(),
            })
        })
    }

    /// Receive the next notification with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> AutoRulesResult<Notification> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => AutoRulesError::Execution(ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            RecvTimeoutError::Disconnected => {
                AutoRulesError::Execution(ExecutionError::Disconnected {
                    path: "notification_stream".to_string(),
                })
            }
        })
    }

    /// Returns a buffered notification, if any.
    #[must_use]
    pub fn try_recv(&self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }

    /// Drains every buffered notification.
    pub fn drain(&self) -> Vec<Notification> {
        self.rx.try_iter().collect()
    }
}

impl Drop for NotificationStream {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
