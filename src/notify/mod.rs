//! Notification Dispatcher
//!
//! Fire-and-forget delivery of transaction outcomes. Events are queued on
//! an unbounded channel and drained by a background task; enqueueing never
//! blocks the money path, and a sink failure is logged and dropped, never
//! propagated back to an already-committed transaction.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::TransactionStatus;

/// What happened, for the notification sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TransferCompleted,
    ReceiveCompleted,
}

/// Payload delivered to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub account_id: Uuid,
    pub amount: Decimal,
    pub fee: Decimal,
    pub status: TransactionStatus,
}

/// Sink errors
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Where events go. Production wires an HTTP/queue sink; the default logs.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, event: NotificationEvent) -> Result<(), NotifyError>;
}

/// Sink that records events to the log stream only.
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn deliver(&self, event: NotificationEvent) -> Result<(), NotifyError> {
        tracing::info!(
            kind = ?event.kind,
            account_id = %event.account_id,
            amount = %event.amount,
            fee = %event.fee,
            status = %event.status,
            "Notification"
        );
        Ok(())
    }
}

/// Decouples notification delivery from the request path.
#[derive(Clone)]
pub struct NotificationDispatcher {
    sender: mpsc::UnboundedSender<NotificationEvent>,
}

impl NotificationDispatcher {
    /// Spawn the drain task and return the dispatcher handle.
    pub fn start(sink: Arc<dyn NotificationSink>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<NotificationEvent>();

        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if let Err(e) = sink.deliver(event).await {
                    // Committed ledger state is final; a lost notification
                    // is an observability problem, not a rollback.
                    tracing::error!(error = %e, "Notification delivery failed");
                }
            }
            tracing::debug!("Notification channel closed, drain task exiting");
        });

        Self { sender }
    }

    /// Queue an event. Never blocks; a closed channel is logged and ignored.
    pub fn dispatch(&self, event: NotificationEvent) {
        if self.sender.send(event).is_err() {
            tracing::error!("Notification drain task is gone, event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct RecordingSink {
        events: Mutex<Vec<NotificationEvent>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn deliver(&self, event: NotificationEvent) -> Result<(), NotifyError> {
            self.events.lock().unwrap().push(event);
            if self.fail {
                return Err(NotifyError::Delivery("sink offline".to_string()));
            }
            Ok(())
        }
    }

    fn event() -> NotificationEvent {
        NotificationEvent {
            kind: NotificationKind::TransferCompleted,
            account_id: Uuid::new_v4(),
            amount: Decimal::new(-202, 0),
            fee: Decimal::new(2, 0),
            status: TransactionStatus::Completed,
        }
    }

    #[tokio::test]
    async fn test_events_reach_the_sink() {
        let sink = Arc::new(RecordingSink {
            events: Mutex::new(Vec::new()),
            fail: false,
        });
        let dispatcher = NotificationDispatcher::start(sink.clone());

        dispatcher.dispatch(event());
        dispatcher.dispatch(event());

        // Give the drain task a moment.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.events.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_propagate() {
        let sink = Arc::new(RecordingSink {
            events: Mutex::new(Vec::new()),
            fail: true,
        });
        let dispatcher = NotificationDispatcher::start(sink.clone());

        // dispatch is infallible from the caller's point of view.
        dispatcher.dispatch(event());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_string(&event()).unwrap();
        assert!(json.contains("transfer_completed"));
        assert!(json.contains("\"type\""));
    }
}
