use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too short: expected at least {expected} bytes, got {got}")]
    FrameTooShort { expected: usize, got: usize },

    #[error("unsupported RTP version byte: 0x{0:02x}")]
    BadRtpVersion(u8),

    #[error("unterminated varint: no terminating byte within {max} bytes")]
    UnterminatedVarint { max: usize },

    #[error("varint does not fit in a {bits}-bit integer")]
    VarintOverflow { bits: u32 },

    #[error("negative value cannot be ULEB128-encoded: {0}")]
    NegativeVarint(i64),

    #[error("unknown envelope kind: 0x{0:02x}")]
    UnknownEnvelopeKind(u8),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_too_short_display() {
        let e = ProtocolError::FrameTooShort {
            expected: 12,
            got: 3,
        };
        let msg = e.to_string();
        assert!(msg.contains("12"));
        assert!(msg.contains("3"));
    }

    #[test]
    fn unterminated_varint_display() {
        let e = ProtocolError::UnterminatedVarint { max: 5 };
        assert!(e.to_string().contains("5"));
    }

    #[test]
    fn negative_varint_display() {
        let e = ProtocolError::NegativeVarint(-7);
        assert!(e.to_string().contains("-7"));
    }
}
