//! Bus integration.
//!
//! Commands arrive on the `solver` channel and are dispatched by the
//! [`MessageGateway`]; notifications leave through a [`NotificationPublisher`]
//! on the `best_solution` and `error` channels. The bus itself is pluggable:
//! the binary speaks JSON lines over stdio (see [`stdio`]).

mod gateway;
mod publisher;
pub mod stdio;

use callcenter_events::EventError;
use thiserror::Error;

use crate::orchestrator::OrchestratorError;

pub use gateway::{decode_command, MessageGateway};
pub use publisher::{ChannelPublisher, NotificationEnvelope, NotificationPublisher};

/// Errors from the messaging layer.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid message: {0}")]
    Decode(#[from] EventError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("outbound channel closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
