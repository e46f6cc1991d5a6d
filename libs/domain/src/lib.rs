//! # callcenter-domain
//!
//! The planning model the solver works on.
//!
//! ## Chains
//!
//! Calls are assigned to agents by linking them into per-agent chains:
//!
//! ```text
//! Agent(1) <- Call(10) <- Call(14) <- Call(11)
//! Agent(2) <- Call(12)
//!             Call(13)                (unassigned)
//! ```
//!
//! Every call points at its predecessor, which is either an agent (the chain
//! anchor) or another call. Successors are derived, never stored, so a
//! solution serializes as a flat arena of records keyed by id.
//!
//! ## Fact changes
//!
//! Incremental mutations (add/remove/prolong a call) are logged durably and
//! replayed onto the working solution; see [`change`].

pub mod change;
mod error;
mod model;
mod score;
pub mod serde_secs;
mod skill;
mod solution;

pub use change::{pin_chain_heads, ChangeOutcome, FactChange, PersistedChange, ProblemChange};
pub use error::DomainError;
pub use model::{Agent, Call, Predecessor};
pub use score::HardSoftScore;
pub use skill::Skill;
pub use solution::CallCenter;
