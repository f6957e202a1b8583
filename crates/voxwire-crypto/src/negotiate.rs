//! Encryption-mode negotiation.
//!
//! The server advertises its supported modes in `Ready.modes`; we pick the
//! first of our priority-ordered list that appears there. Selection happens
//! once per connection; the resulting [`Cryptor`] is fixed until teardown.

use tracing::info;

use crate::aes_gcm::Aes256GcmCryptor;
use crate::error::CryptoError;
use crate::key::SecretKey;
use crate::xchacha::XChaCha20Poly1305Cryptor;
use crate::Cryptor;

/// The cipher suites we implement, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMode {
    Aes256Gcm,
    XChaCha20Poly1305,
}

/// Local preference order: AES-256-GCM over XChaCha20-Poly1305.
pub const SUPPORTED_MODES: [EncryptionMode; 2] =
    [EncryptionMode::Aes256Gcm, EncryptionMode::XChaCha20Poly1305];

impl EncryptionMode {
    /// The mode identifier exchanged over the signaling channel.
    pub fn as_str(self) -> &'static str {
        match self {
            EncryptionMode::Aes256Gcm => "aead_aes256_gcm_rtpsize",
            EncryptionMode::XChaCha20Poly1305 => "aead_xchacha20_poly1305_rtpsize",
        }
    }
}

impl std::fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intersect our priority-ordered modes with the server's advertisement.
/// An empty intersection is fatal to connection establishment.
pub fn negotiate(server_modes: &[String]) -> Result<EncryptionMode, CryptoError> {
    for mode in SUPPORTED_MODES {
        if server_modes.iter().any(|offered| offered == mode.as_str()) {
            info!(mode = mode.as_str(), "negotiated encryption mode");
            return Ok(mode);
        }
    }
    Err(CryptoError::NoCommonMode {
        local: SUPPORTED_MODES.iter().map(|m| m.as_str()).collect(),
        server: server_modes.to_vec(),
    })
}

/// Construct the cryptor for an already-selected mode.
pub fn new_cryptor(mode: EncryptionMode, key: &SecretKey) -> Result<Box<dyn Cryptor>, CryptoError> {
    Ok(match mode {
        EncryptionMode::Aes256Gcm => Box::new(Aes256GcmCryptor::new(key)?),
        EncryptionMode::XChaCha20Poly1305 => Box::new(XChaCha20Poly1305Cryptor::new(key)?),
    })
}

/// Negotiate against the server's mode list and build the cryptor in one
/// step, as connection setup does.
pub fn negotiate_cryptor(
    server_modes: &[String],
    key: &SecretKey,
) -> Result<Box<dyn Cryptor>, CryptoError> {
    new_cryptor(negotiate(server_modes)?, key)
}
