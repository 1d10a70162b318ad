//! Client SDK for the Gather chat service.
//!
//! This is the synchronization core a UI builds on: a reconnecting socket
//! [`Transport`] with ping/pong liveness and capped exponential backoff, a
//! priority-ordered envelope classifier ([`classify`]), and the
//! [`ChatState`] reducer that reconciles live pushes with REST-fetched
//! history into a consistent per-room view (unread counts, typing sets,
//! last-message previews).
//!
//! ## Data flow
//!
//! ```text
//! UI intent -> Transport (serialize, queue while closed) -> server
//! server -> Transport -> classify -> ChatState::apply -> UI re-render
//! REST rooms/history -> ChatState::{replace_rooms, merge_history}
//! ```
//!
//! The reducer is the single owner of the model; everything reaches it
//! through one entry point per source, so no locking discipline is needed
//! beyond running transitions on one task.

pub mod error;
pub mod protocol;
pub mod rest;
pub mod session;
pub mod state;
pub mod transport;

pub use error::ChatError;
pub use protocol::{ClientEnvelope, ServerEvent, classify};
pub use session::{Credential, Session};
pub use state::ChatState;
pub use transport::{LinkState, SendOutcome, Transport};
