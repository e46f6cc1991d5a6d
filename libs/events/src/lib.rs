//! # callcenter-events
//!
//! Messages exchanged between the client-facing service and the solver.
//!
//! ## Design Principles
//!
//! - Messages are immutable, versioned, schema-stable records
//! - Every message is keyed by the problem it concerns; the bus must deliver
//!   messages with the same key in order (at-least-once)
//! - Commands flow in on the `solver` channel, notifications flow out on the
//!   `best_solution` and `error` channels
//!
//! ## Message Envelope
//!
//! All messages share a common envelope with:
//! - Identity (`message_id`, `occurred_at`)
//! - Routing (`problem_id` as partition key, `message_type`)
//! - Schema version (`message_version`)
//! - Correlation (`correlation_id`)

mod envelope;
mod error;
mod types;

pub use envelope::*;
pub use error::EventError;
pub use types::*;
