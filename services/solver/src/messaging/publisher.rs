//! Outbound notifications.

use callcenter_events::{MessageEnvelope, SolverNotification};
use tokio::sync::mpsc;
use tracing::debug;

use super::GatewayError;

/// An outbound notification envelope.
pub type NotificationEnvelope = MessageEnvelope<SolverNotification>;

/// Sink for solver notifications.
pub trait NotificationPublisher: Send + Sync {
    /// Publishes on the notification's channel without blocking.
    fn publish(&self, notification: SolverNotification) -> Result<(), GatewayError>;
}

/// Publishes envelopes into an in-process channel.
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<NotificationEnvelope>,
}

impl ChannelPublisher {
    /// Create a publisher and the receiver its envelopes are delivered to.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NotificationEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationPublisher for ChannelPublisher {
    fn publish(&self, notification: SolverNotification) -> Result<(), GatewayError> {
        let envelope = MessageEnvelope::new(notification.problem_id(), notification);
        debug!(
            channel = envelope.payload.channel(),
            message_type = %envelope.message_type,
            problem_id = %envelope.problem_id,
            "Publishing notification"
        );
        self.tx.send(envelope).map_err(|_| GatewayError::Closed)
    }
}
