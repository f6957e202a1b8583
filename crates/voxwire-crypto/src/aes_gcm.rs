//! AES-256-GCM "RTP-size" cipher suite.

use std::sync::atomic::{AtomicU32, Ordering};

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};

use voxwire_protocol::rtp;

use crate::error::CryptoError;
use crate::key::SecretKey;
use crate::negotiate::EncryptionMode;
use crate::Cryptor;

pub struct Aes256GcmCryptor {
    key: LessSafeKey,
    /// Per-packet nonce counter. Atomic so concurrent encrypt attempts can
    /// never reuse a value, even though normal usage is single-threaded.
    counter: AtomicU32,
}

impl Aes256GcmCryptor {
    pub fn new(key: &SecretKey) -> Result<Self, CryptoError> {
        let unbound =
            UnboundKey::new(&AES_256_GCM, key.as_bytes()).map_err(|_| CryptoError::BadKeyLength {
                expected: SecretKey::LEN,
                got: key.as_bytes().len(),
            })?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
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

impl Cryptor for Aes256GcmCryptor {
    fn encrypt(&self, frame: &[u8], out: &mut Vec<u8>) -> Result<(), CryptoError> {
        let regions = rtp::frame_regions(frame, 0)?;
        let (nonce, suffix) = self.next_nonce();

        let mut in_out = frame[regions.payload.clone()].to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce),
                Aad::from(&frame[regions.unencrypted.clone()]),
                &mut in_out,
            )
            .map_err(|_| CryptoError::EncryptFailed)?;

        out.clear();
        out.extend_from_slice(&frame[regions.unencrypted]);
        out.extend_from_slice(&in_out);
        out.extend_from_slice(&suffix);
        Ok(())
    }

    fn decrypt(&self, frame: &[u8], out: &mut Vec<u8>) -> Result<usize, CryptoError> {
        let regions = rtp::frame_regions(frame, rtp::NONCE_SUFFIX_LEN)?;
        let mut nonce = [0u8; NONCE_LEN];
        nonce[..rtp::NONCE_SUFFIX_LEN].copy_from_slice(&frame[regions.nonce.clone()]);

        let mut in_out = frame[regions.payload.clone()].to_vec();
        let plaintext = self
            .key
            .open_in_place(
                Nonce::assume_unique_for_key(nonce),
                Aad::from(&frame[regions.unencrypted.clone()]),
                &mut in_out,
            )
            .map_err(|_| CryptoError::AuthenticationFailed)?;

        out.clear();
        out.extend_from_slice(&frame[regions.unencrypted]);
        out.extend_from_slice(plaintext);
        Ok(regions.extension_len)
    }

    fn mode(&self) -> EncryptionMode {
        EncryptionMode::Aes256Gcm
    }
}
