use anyhow::Result;
use opus::Channels;

use voxwire_protocol::voice::{CHANNELS, FRAME_SAMPLES, LONG_FRAME_SAMPLES, SAMPLE_RATE};

/// Wraps the Opus decoder. One instance per remote stream; not safe for
/// concurrent use.
pub struct VoiceDecoder {
    inner: opus::Decoder,
}

impl VoiceDecoder {
    pub fn new() -> Result<Self> {
        Ok(Self {
            inner: opus::Decoder::new(SAMPLE_RATE, Channels::Stereo)?,
        })
    }

    /// Decode one Opus packet, appending interleaved 16-bit samples to
    /// `out`. Returns the number of samples appended (per-channel count
    /// times the channel count).
    pub fn decode(&mut self, packet: &[u8], out: &mut Vec<i16>) -> Result<usize> {
        let base = out.len();
        out.resize(base + LONG_FRAME_SAMPLES, 0);
        let per_channel = self.inner.decode(packet, &mut out[base..], false)?;
        let appended = per_channel * CHANNELS;
        out.truncate(base + appended);
        Ok(appended)
    }

    /// Conceal one lost 20 ms frame, appending the concealment samples.
    pub fn decode_lost(&mut self, out: &mut Vec<i16>) -> Result<usize> {
        let base = out.len();
        out.resize(base + FRAME_SAMPLES, 0);
        let per_channel = self.inner.decode(&[], &mut out[base..], false)?;
        let appended = per_channel * CHANNELS;
        out.truncate(base + appended);
        Ok(appended)
    }
}
