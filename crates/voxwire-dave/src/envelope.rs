//! Binary framing for MLS envelopes on the signaling socket.
//!
//! Wire form: `[kind: u8][transition_id: ULEB128][payload_len: ULEB128]
//! [payload]`. The payload is opaque to this layer.

use voxwire_protocol::uleb128;
use voxwire_protocol::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EnvelopeKind {
    ExternalSender = 0x01,
    Proposals = 0x02,
    Welcome = 0x03,
    CommitTransition = 0x04,
}

impl EnvelopeKind {
    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            0x01 => Ok(Self::ExternalSender),
            0x02 => Ok(Self::Proposals),
            0x03 => Ok(Self::Welcome),
            0x04 => Ok(Self::CommitTransition),
            other => Err(ProtocolError::UnknownEnvelopeKind(other)),
        }
    }
}

/// One MLS envelope correlated with a transition id.
///
/// Kinds without an inherent transition (external sender, proposals) carry
/// transition id 0 on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub transition_id: u16,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + 3 + 5 + self.payload.len());
        buf.push(self.kind as u8);
        uleb128::encode_u32(u32::from(self.transition_id), &mut buf);
        uleb128::encode_u64(self.payload.len() as u64, &mut buf);
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        let (&kind_byte, mut rest) = data.split_first().ok_or(ProtocolError::FrameTooShort {
            expected: 1,
            got: 0,
        })?;
        let kind = EnvelopeKind::from_byte(kind_byte)?;

        let (transition_id, consumed) = uleb128::decode_u32(rest)?;
        rest = &rest[consumed..];
        if transition_id > u32::from(u16::MAX) {
            return Err(ProtocolError::VarintOverflow { bits: 16 });
        }

        let (payload_len, consumed) = uleb128::decode_u64(rest)?;
        rest = &rest[consumed..];
        let payload_len = payload_len as usize;
        if rest.len() < payload_len {
            return Err(ProtocolError::FrameTooShort {
                expected: payload_len,
                got: rest.len(),
            });
        }

        Ok(Self {
            kind,
            transition_id: transition_id as u16,
            payload: rest[..payload_len].to_vec(),
        })
    }
}
