//! RTP framing helper.
//!
//! Only the header/framing convention of RTP is used here: a fixed 12-byte
//! header in front of the Opus payload. Encrypted frames additionally carry
//! a 4-byte big-endian nonce suffix after the ciphertext and tag; the
//! region map below locates all of these without copying.

use std::ops::Range;

use crate::error::ProtocolError;

/// RTP header length in bytes.
pub const HEADER_LEN: usize = 12;

/// Version 2, no padding, no extension, no CSRCs.
pub const VERSION_FLAGS: u8 = 0x80;

/// Bit in the first header byte signalling an extension header.
pub const EXTENSION_BIT: u8 = 0x10;

/// Fixed payload type for Opus voice.
pub const PAYLOAD_TYPE: u8 = 0x78;

/// Length of the one-in-one extension prefix (profile u16 + length u16).
pub const EXTENSION_PREFIX_LEN: usize = 4;

/// Length of the big-endian nonce counter appended to encrypted frames.
pub const NONCE_SUFFIX_LEN: usize = 4;

/// The caller-supplied fields of the RTP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Serialize into the first [`HEADER_LEN`] bytes of `buf`.
    pub fn write(&self, buf: &mut [u8]) {
        assert!(buf.len() >= HEADER_LEN, "RTP header needs 12 bytes");
        buf[0] = VERSION_FLAGS;
        buf[1] = PAYLOAD_TYPE;
        buf[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
    }

    /// Parse the fixed fields out of a frame's first 12 bytes.
    pub fn parse(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.len() < HEADER_LEN {
            return Err(ProtocolError::FrameTooShort {
                expected: HEADER_LEN,
                got: frame.len(),
            });
        }
        // Top two bits must be version 2.
        if frame[0] & 0xC0 != VERSION_FLAGS {
            return Err(ProtocolError::BadRtpVersion(frame[0]));
        }
        Ok(Self {
            sequence: u16::from_be_bytes([frame[2], frame[3]]),
            timestamp: u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]),
            ssrc: u32::from_be_bytes([frame[8], frame[9], frame[10], frame[11]]),
        })
    }
}

/// Byte ranges of one frame, computed fresh per frame and never stored.
///
/// `unencrypted` covers the header and, when the extension bit is set, the
/// 4-byte extension prefix; the extension words themselves sit at the start
/// of `payload` (the "rtpsize" convention). `nonce` is empty for plaintext
/// frames (`nonce_len == 0`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRegions {
    pub unencrypted: Range<usize>,
    /// Length in bytes of the extension words inside the payload (0 if none).
    pub extension_len: usize,
    pub payload: Range<usize>,
    pub nonce: Range<usize>,
}

/// Locate header / extension / payload / nonce regions of `frame`.
///
/// `nonce_len` is the trailing nonce-suffix length: [`NONCE_SUFFIX_LEN`] for
/// encrypted frames, 0 for plaintext frames.
pub fn frame_regions(frame: &[u8], nonce_len: usize) -> Result<FrameRegions, ProtocolError> {
    if frame.len() < HEADER_LEN + nonce_len {
        return Err(ProtocolError::FrameTooShort {
            expected: HEADER_LEN + nonce_len,
            got: frame.len(),
        });
    }

    let has_extension = frame[0] & EXTENSION_BIT != 0;
    let mut unencrypted_end = HEADER_LEN;
    let mut extension_len = 0;

    if has_extension {
        if frame.len() < HEADER_LEN + EXTENSION_PREFIX_LEN + nonce_len {
            return Err(ProtocolError::FrameTooShort {
                expected: HEADER_LEN + EXTENSION_PREFIX_LEN + nonce_len,
                got: frame.len(),
            });
        }
        // Extension length field counts 32-bit words.
        let words = u16::from_be_bytes([frame[14], frame[15]]) as usize;
        extension_len = words * 4;
        unencrypted_end = HEADER_LEN + EXTENSION_PREFIX_LEN;
    }

    let payload_end = frame.len() - nonce_len;
    if payload_end < unencrypted_end {
        return Err(ProtocolError::FrameTooShort {
            expected: unencrypted_end + nonce_len,
            got: frame.len(),
        });
    }

    Ok(FrameRegions {
        unencrypted: 0..unencrypted_end,
        extension_len,
        payload: unencrypted_end..payload_end,
        nonce: payload_end..frame.len(),
    })
}
