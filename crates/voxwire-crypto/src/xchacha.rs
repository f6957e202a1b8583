//! XChaCha20-Poly1305 "RTP-size" cipher suite.
//!
//! Same frame structure as the AES suite; only the primitive and its
//! 24-byte nonce differ.

use std::sync::atomic::{AtomicU32, Ordering};

use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{KeyInit, XChaCha20Poly1305, XNonce};

use voxwire_protocol::rtp;

use crate::error::CryptoError;
use crate::key::SecretKey;
use crate::negotiate::EncryptionMode;
use crate::Cryptor;

/// XChaCha20 nonce length.
const NONCE_LEN: usize = 24;

pub struct XChaCha20Poly1305Cryptor {
    cipher: XChaCha20Poly1305,
    counter: AtomicU32,
}

impl XChaCha20Poly1305Cryptor {
    pub fn new(key: &SecretKey) -> Result<Self, CryptoError> {
        let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| {
            CryptoError::BadKeyLength {
                expected: SecretKey::LEN,
                got: key.as_bytes().len(),
            }
        })?;
        Ok(Self {
            cipher,
            counter: AtomicU32::new(0),
        })
    }

    fn next_nonce(&self) -> ([u8; NONCE_LEN], [u8; rtp::NONCE_SUFFIX_LEN]) {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let suffix = counter.to_be_bytes();
        let mut nonce = [0u8; NONCE_LEN];
        nonce[..rtp::NONCE_SUFFIX_LEN].copy_from_slice(&suffix);
        (nonce, suffix)
    }
}

impl Cryptor for XChaCha20Poly1305Cryptor {
    fn encrypt(&self, frame: &[u8], out: &mut Vec<u8>) -> Result<(), CryptoError> {
        let regions = rtp::frame_regions(frame, 0)?;
        let (nonce, suffix) = self.next_nonce();

        let ciphertext = self
            .cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: &frame[regions.payload.clone()],
                    aad: &frame[regions.unencrypted.clone()],
                },
            )
            .map_err(|_| CryptoError::EncryptFailed)?;

        out.clear();
        out.extend_from_slice(&frame[regions.unencrypted]);
        out.extend_from_slice(&ciphertext);
        out.extend_from_slice(&suffix);
        Ok(())
    }

    fn decrypt(&self, frame: &[u8], out: &mut Vec<u8>) -> Result<usize, CryptoError> {
        let regions = rtp::frame_regions(frame, rtp::NONCE_SUFFIX_LEN)?;
        let mut nonce = [0u8; NONCE_LEN];
        nonce[..rtp::NONCE_SUFFIX_LEN].copy_from_slice(&frame[regions.nonce.clone()]);

        let plaintext = self
            .cipher
            .decrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: &frame[regions.payload.clone()],
                    aad: &frame[regions.unencrypted.clone()],
                },
            )
            .map_err(|_| CryptoError::AuthenticationFailed)?;

        out.clear();
        out.extend_from_slice(&frame[regions.unencrypted]);
        out.extend_from_slice(&plaintext);
        Ok(regions.extension_len)
    }

    fn mode(&self) -> EncryptionMode {
        EncryptionMode::XChaCha20Poly1305
    }
}
