use thiserror::Error;

use voxwire_protocol::ProtocolError;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Corrupt or forged packet. Non-fatal: drop the frame, keep the stream.
    #[error("frame failed authentication")]
    AuthenticationFailed,

    /// The AEAD primitive refused to seal; indicates a broken input frame.
    #[error("frame encryption failed")]
    EncryptFailed,

    /// No intersection between our modes and the server's. Fatal to setup.
    #[error("no common encryption mode: we support {local:?}, server offers {server:?}")]
    NoCommonMode {
        local: Vec<&'static str>,
        server: Vec<String>,
    },

    #[error("secret key must be {expected} bytes, got {got}")]
    BadKeyLength { expected: usize, got: usize },

    #[error("system RNG failure")]
    Rng,

    #[error(transparent)]
    Frame(#[from] ProtocolError),
}
