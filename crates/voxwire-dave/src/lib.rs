//! DAVE signaling layer — epoch and key-transition bookkeeping for
//! end-to-end encrypted voice.
//!
//! This crate correlates signaling messages with transition ids and drives
//! an external MLS engine; it performs no cryptography of its own. Prepare,
//! execute, welcome and commit messages may arrive in any order — the
//! transition id, not arrival order, decides what applies when.

pub mod envelope;
pub mod error;
pub mod session;

pub use envelope::{Envelope, EnvelopeKind};
pub use error::DaveError;
pub use session::{DaveSession, MlsEngine, SessionState};

/// Epoch id announcing creation of a brand-new MLS group.
pub const NEW_GROUP_EPOCH: u64 = 1;

/// Transition id for informational transitions that apply immediately,
/// without waiting for an execute message.
pub const IMMEDIATE_TRANSITION: u16 = 0;
