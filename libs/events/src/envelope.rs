//! Message envelope - the common wrapper for all bus messages.

use callcenter_id::ProblemId;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EventError, MessagePayload, SolverCommand, CURRENT_MESSAGE_VERSION};

/// The message envelope - common metadata for all messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope<P> {
    /// Unique message identifier (used for de-duplication by consumers).
    pub message_id: Uuid,

    /// When the message was produced.
    pub occurred_at: DateTime<Utc>,

    /// The message type (e.g., "call.add", "solution.best_changed").
    pub message_type: String,

    /// Schema version for this message type.
    pub message_version: i32,

    /// The problem this message concerns; also the bus partition key.
    pub problem_id: ProblemId,

    /// Grouping ID for related messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Message-specific payload.
    pub payload: P,
}

impl<P: MessagePayload> MessageEnvelope<P> {
    /// Wraps a payload in a fresh envelope at the current schema version.
    pub fn new(problem_id: ProblemId, payload: P) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            message_type: payload.message_type().to_string(),
            message_version: CURRENT_MESSAGE_VERSION,
            problem_id,
            correlation_id: None,
            payload,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Checks the schema version and that the declared type matches the payload.
    pub fn validate(&self) -> Result<(), EventError> {
        if self.message_version != CURRENT_MESSAGE_VERSION {
            return Err(EventError::UnsupportedVersion {
                message_type: self.message_type.clone(),
                version: self.message_version,
            });
        }
        if self.message_type != self.payload.message_type() {
            return Err(EventError::UnknownMessageType(self.message_type.clone()));
        }
        Ok(())
    }
}

impl<P: Serialize> MessageEnvelope<P> {
    pub fn to_json(&self) -> Result<String, EventError> {
        serde_json::to_string(self).map_err(Into::into)
    }
}

impl<P: DeserializeOwned + MessagePayload> MessageEnvelope<P> {
    /// Parses and validates an envelope from JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EventError> {
        let envelope: Self = serde_json::from_slice(bytes)?;
        envelope.validate()?;
        Ok(envelope)
    }
}

/// An inbound command envelope.
pub type CommandEnvelope = MessageEnvelope<SolverCommand>;
