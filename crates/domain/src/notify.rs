//! Outbound notifications.
//!
//! Services enqueue a [`Notification`] only after the change it describes
//! has been committed. Delivery happens on a separate [`NotificationWorker`];
//! a full or closed queue and a failed delivery are logged and never reach
//! the caller.

use std::sync::Arc;

use async_trait::async_trait;
use common::OrderId;
use serde::{Deserialize, Serialize};
use store::{OrderStatus, PaymentStatus};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Events the notification dispatcher is told about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    PaymentSucceeded {
        order_id: OrderId,
    },
    PaymentFailed {
        order_id: OrderId,
        reason: String,
    },
    OrderStatusChanged {
        order_id: OrderId,
        status: OrderStatus,
        payment_status: PaymentStatus,
    },
}

impl Notification {
    pub fn order_id(&self) -> OrderId {
        match self {
            Notification::PaymentSucceeded { order_id }
            | Notification::PaymentFailed { order_id, .. }
            | Notification::OrderStatusChanged { order_id, .. } => *order_id,
        }
    }

    /// Returns the event name used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::PaymentSucceeded { .. } => "payment_succeeded",
            Notification::PaymentFailed { .. } => "payment_failed",
            Notification::OrderStatusChanged { .. } => "order_status_changed",
        }
    }
}

/// Notification delivery errors.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification queue is full")]
    QueueFull,

    #[error("Notification queue is closed")]
    QueueClosed,

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Delivers notifications to the outside world.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            order_id = %notification.order_id(),
            kind = notification.kind(),
            "Notification dispatched"
        );
        Ok(())
    }
}

/// Sending half of the bounded notification queue.
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    sender: mpsc::Sender<Notification>,
}

impl NotificationQueue {
    /// Creates a queue holding at most `capacity` undelivered notifications.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Enqueues without waiting. Never fails the caller.
    pub fn enqueue(&self, notification: Notification) {
        if let Err(e) = self.try_enqueue(notification) {
            metrics::counter!("notifications_dropped_total").increment(1);
            warn!(error = %e, "Dropped notification");
        }
    }

    /// Enqueues without waiting, reporting why it could not.
    pub fn try_enqueue(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sender.try_send(notification).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NotifyError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => NotifyError::QueueClosed,
        })
    }
}

/// Drains the notification queue into a [`Notifier`].
pub struct NotificationWorker {
    receiver: mpsc::Receiver<Notification>,
    notifier: Arc<dyn Notifier>,
}

impl NotificationWorker {
    pub fn new(receiver: mpsc::Receiver<Notification>, notifier: Arc<dyn Notifier>) -> Self {
        Self { receiver, notifier }
    }

    /// Delivers notifications until every queue handle is dropped.
    ///
    /// Returns the number of notifications delivered successfully.
    #[tracing::instrument(skip(self))]
    pub async fn run(mut self) -> u64 {
        let mut delivered = 0;
        while let Some(notification) = self.receiver.recv().await {
            match self.notifier.notify(&notification).await {
                Ok(()) => {
                    delivered += 1;
                    metrics::counter!("notifications_delivered_total", "kind" => notification.kind())
                        .increment(1);
                }
                Err(e) => {
                    metrics::counter!("notifications_failed_total", "kind" => notification.kind())
                        .increment(1);
                    warn!(
                        order_id = %notification.order_id(),
                        kind = notification.kind(),
                        error = %e,
                        "Notification delivery failed"
                    );
                }
            }
        }
        info!(delivered, "Notification queue closed");
        delivered
    }

    /// Spawns the worker on the current runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<u64> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<Notification>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for Recording {
        async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Delivery("smtp down".to_string()));
            }
            self.seen.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn worker_delivers_in_order() {
        let (queue, receiver) = NotificationQueue::bounded(8);
        let notifier = Arc::new(Recording::default());
        let order_id = OrderId::new();

        queue.enqueue(Notification::PaymentSucceeded { order_id });
        queue.enqueue(Notification::PaymentFailed {
            order_id,
            reason: "declined".to_string(),
        });
        drop(queue);

        let delivered = NotificationWorker::new(receiver, notifier.clone()).run().await;

        assert_eq!(delivered, 2);
        let seen = notifier.seen.lock().unwrap();
        assert_eq!(seen[0].kind(), "payment_succeeded");
        assert_eq!(seen[1].kind(), "payment_failed");
    }

    #[tokio::test]
    async fn full_queue_drops_without_failing() {
        let (queue, _receiver) = NotificationQueue::bounded(1);
        let order_id = OrderId::new();

        queue.enqueue(Notification::PaymentSucceeded { order_id });
        assert!(matches!(
            queue.try_enqueue(Notification::PaymentSucceeded { order_id }),
            Err(NotifyError::QueueFull)
        ));
        queue.enqueue(Notification::PaymentSucceeded { order_id });
    }

    #[tokio::test]
    async fn closed_queue_is_reported() {
        let (queue, receiver) = NotificationQueue::bounded(1);
        drop(receiver);
        assert!(matches!(
            queue.try_enqueue(Notification::PaymentSucceeded {
                order_id: OrderId::new()
            }),
            Err(NotifyError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn delivery_failures_are_swallowed() {
        let (queue, receiver) = NotificationQueue::bounded(4);
        let notifier = Arc::new(Recording {
            fail: true,
            ..Default::default()
        });
        queue.enqueue(Notification::PaymentSucceeded {
            order_id: OrderId::new(),
        });
        drop(queue);

        assert_eq!(NotificationWorker::new(receiver, notifier).run().await, 0);
    }
}
