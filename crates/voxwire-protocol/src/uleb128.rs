//! ULEB128 variable-length integers.
//!
//! Used inside DAVE binary messages: 7 payload bits per byte, high bit set
//! on every byte except the last. A 32-bit value terminates within 5 bytes,
//! a 64-bit value within 10. Decoding a span with no terminator in that
//! window fails without consuming anything.

use crate::error::ProtocolError;

/// Maximum encoded length of a u32.
pub const MAX_LEN_U32: usize = 5;

/// Maximum encoded length of a u64.
pub const MAX_LEN_U64: usize = 10;

const CONTINUATION: u8 = 0x80;

/// Append the ULEB128 encoding of `value`, returning the bytes written.
pub fn encode_u64(mut value: u64, out: &mut Vec<u8>) -> usize {
    let mut written = 0;
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        written += 1;
        if value == 0 {
            out.push(byte);
            return written;
        }
        out.push(byte | CONTINUATION);
    }
}

/// Append the ULEB128 encoding of `value`, returning the bytes written.
pub fn encode_u32(value: u32, out: &mut Vec<u8>) -> usize {
    encode_u64(u64::from(value), out)
}

/// Signed entry point: rejects negative input, encodes the magnitude.
pub fn encode_i64(value: i64, out: &mut Vec<u8>) -> Result<usize, ProtocolError> {
    if value < 0 {
        return Err(ProtocolError::NegativeVarint(value));
    }
    Ok(encode_u64(value as u64, out))
}

/// Signed entry point: rejects negative input, encodes the magnitude.
pub fn encode_i32(value: i32, out: &mut Vec<u8>) -> Result<usize, ProtocolError> {
    if value < 0 {
        return Err(ProtocolError::NegativeVarint(i64::from(value)));
    }
    Ok(encode_u32(value as u32, out))
}

/// Find the index of the first byte with the continuation bit clear,
/// looking at most `max` bytes into `input`.
///
/// Scans 4-byte blocks at a time; a block whose bytes all carry the
/// continuation bit cannot hold the terminator.
fn find_terminator(input: &[u8], max: usize) -> Option<usize> {
    let window = &input[..input.len().min(max)];
    let mut i = 0;
    while i + 4 <= window.len() {
        let block = u32::from_le_bytes([window[i], window[i + 1], window[i + 2], window[i + 3]]);
        if block & 0x8080_8080 != 0x8080_8080 {
            for (j, byte) in window[i..i + 4].iter().enumerate() {
                if byte & CONTINUATION == 0 {
                    return Some(i + j);
                }
            }
        }
        i += 4;
    }
    while i < window.len() {
        if window[i] & CONTINUATION == 0 {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn decode(input: &[u8], max: usize, bits: u32) -> Result<(u64, usize), ProtocolError> {
    let terminator = find_terminator(input, max)
        .ok_or(ProtocolError::UnterminatedVarint { max })?;

    let mut value: u64 = 0;
    for (i, byte) in input[..=terminator].iter().enumerate() {
        let payload = u64::from(byte & 0x7F);
        let shift = 7 * i as u32;
        // A payload bit landing above the target width means the encoding is
        // too wide for that width, even though a terminator exists.
        if shift >= bits || (bits - shift < 7 && payload >> (bits - shift) != 0) {
            if payload != 0 {
                return Err(ProtocolError::VarintOverflow { bits });
            }
        } else {
            value |= payload << shift;
        }
    }
    Ok((value, terminator + 1))
}

/// Decode a u64, returning the value and the bytes consumed.
pub fn decode_u64(input: &[u8]) -> Result<(u64, usize), ProtocolError> {
    decode(input, MAX_LEN_U64, 64)
}

/// Decode a u32, returning the value and the bytes consumed.
pub fn decode_u32(input: &[u8]) -> Result<(u32, usize), ProtocolError> {
    let (value, consumed) = decode(input, MAX_LEN_U32, 32)?;
    Ok((value as u32, consumed))
}
