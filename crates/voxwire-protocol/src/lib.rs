//! Voxwire wire-level protocol definitions.
//!
//! This crate is the leaf of the workspace: it knows about byte layouts and
//! message shapes, nothing about codecs or keys.
//!
//! - [`rtp`] — the 12-byte RTP header and per-frame region map
//! - [`uleb128`] — variable-length integers used inside DAVE binary messages
//! - [`gateway`] — JSON-modeled signaling payloads for the voice control channel
//! - [`voice`] — fixed audio parameters shared by encoder and decoder

pub mod error;
pub mod gateway;
pub mod rtp;
pub mod uleb128;
pub mod voice;

pub use error::ProtocolError;
