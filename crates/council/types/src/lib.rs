//! Council Domain Types
//!
//! This crate defines the domain types for collaboration sessions: the
//! ephemeral negotiations in which a small set of participants reason about
//! a triggering event and try to reach a collective decision.
//!
//! # Key Concepts
//!
//! - **Event**: the situation that triggers a session. Carries a category,
//!   severity/urgency, an impact vector, and the participants and locations
//!   it involves.
//! - **Collaboration Session**: one negotiation instance. Owns an ordered
//!   participant list, an append-only message log, an append-only decision
//!   log, derived metrics, and an audit history from which every state
//!   transition can be reconstructed.
//! - **Session Status**: a monotone state machine. `Completed` and `Failed`
//!   are terminal and never left.
//! - **Interaction Record**: a direct exchange between two participants,
//!   recorded outside of any session.
//!
//! # Architecture
//!
//! This is a pure types crate with no runtime dependencies. IDs use the
//! newtype pattern and implement `Display`, `generate()`, and `new()`.

#![deny(unsafe_code)]

mod errors;
mod event;
mod ids;
mod interaction;
mod session;

pub use errors::*;
pub use event::*;
pub use ids::*;
pub use interaction::*;
pub use session::*;
