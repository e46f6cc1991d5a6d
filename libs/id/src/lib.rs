//! # callcenter-id
//!
//! Typed identifiers for the call center solver.
//!
//! ## Design Principles
//!
//! - IDs are stable 64-bit integers assigned by whoever owns the record
//!   (the seeding collaborator for problems/agents/calls, the change log for changes)
//! - IDs are typed to prevent mixing a call id with an agent id
//! - The canonical string form is the plain decimal number, so IDs travel
//!   unchanged through JSON payloads and database columns

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;
