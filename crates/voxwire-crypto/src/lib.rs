//! Voxwire cryptor layer — transport encryption for voice frames.
//!
//! Both cipher suites are "RTP-size" variants: the RTP header (and the
//! extension prefix, when present) stays in the clear and is authenticated
//! as AAD; the payload is encrypted; a 4-byte big-endian nonce counter is
//! appended after the ciphertext and tag. One cryptor exists per
//! connection, fixed to the session key, and dies with it.
//!
//! Suite selection happens once at connection setup via [`negotiate`];
//! frames are never re-dispatched per packet beyond the trait object.

pub mod aes_gcm;
pub mod error;
pub mod key;
pub mod negotiate;
pub mod xchacha;

pub use aes_gcm::Aes256GcmCryptor;
pub use error::CryptoError;
pub use key::SecretKey;
pub use negotiate::{negotiate, new_cryptor, EncryptionMode};
pub use xchacha::XChaCha20Poly1305Cryptor;

/// AEAD transform for voice frames.
///
/// `encrypt` consumes a plaintext RTP frame and writes the encrypted frame
/// (clear header, ciphertext+tag, nonce suffix) into `out`. `decrypt`
/// reverses it, returning the length in bytes of the RTP extension data
/// found inside the payload so the caller can skip to the Opus payload.
pub trait Cryptor: Send + Sync {
    fn encrypt(&self, frame: &[u8], out: &mut Vec<u8>) -> Result<(), CryptoError>;
    fn decrypt(&self, frame: &[u8], out: &mut Vec<u8>) -> Result<usize, CryptoError>;
    fn mode(&self) -> EncryptionMode;
}
