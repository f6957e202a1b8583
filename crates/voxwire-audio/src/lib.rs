//! Voxwire codec layer: Opus encode/decode and packet buffer pooling.
//!
//! [`VoiceEncoder`] turns PCM into RTP-framed Opus packets built in pooled
//! buffers; [`VoiceDecoder`] reverses the payload half of that. The
//! [`pool`] module supplies the adaptive, core-sharded buffer pool both
//! lean on.
//!
//! Encoder and decoder instances hold no internal synchronization and are
//! not safe for concurrent use — exactly one logical stream drives each.
//! The pool, by contrast, is designed for concurrent rent/return from many
//! connections at once.

pub mod decoder;
pub mod encoder;
pub mod pool;

pub use decoder::VoiceDecoder;
pub use encoder::VoiceEncoder;
pub use pool::{PacketLease, PacketPool, PoolTier, VoicePools};
