//! Fixed audio parameters for the voice transport.
//!
//! These are contractual with the remote end and never negotiated:
//! 48 kHz stereo, 20 ms base frames, 120 ms achieved by repacketizing
//! six compressed 20 ms sub-frames into one packet.

/// Sample rate in Hz.
pub const SAMPLE_RATE: u32 = 48_000;

/// Interleaved channel count.
pub const CHANNELS: usize = 2;

/// Samples per channel in one 20 ms frame.
pub const FRAME_SAMPLES_PER_CHANNEL: usize = 960;

/// Interleaved samples in one 20 ms frame (both channels).
pub const FRAME_SAMPLES: usize = FRAME_SAMPLES_PER_CHANNEL * CHANNELS;

/// Sub-frames combined into one 120 ms packet.
pub const LONG_FRAME_SUBFRAMES: usize = 6;

/// Interleaved samples in one 120 ms packet.
pub const LONG_FRAME_SAMPLES: usize = FRAME_SAMPLES * LONG_FRAME_SUBFRAMES;

/// Worst-case compressed size of a single 20 ms Opus frame.
pub const MAX_OPUS_FRAME: usize = 1275;

/// Worst-case compressed size of a repacketized 120 ms Opus packet.
pub const MAX_OPUS_PACKET: usize = 7662;

/// The canonical Opus silence payload.
pub const SILENCE_PAYLOAD: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// Frame duration profile selected at encoder construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameDuration {
    /// One 20 ms frame per packet.
    Ms20,
    /// Six 20 ms sub-frames repacketized into one packet.
    Ms120,
}

impl FrameDuration {
    /// Maximum interleaved samples accepted per `encode` call.
    pub fn sample_budget(self) -> usize {
        match self {
            FrameDuration::Ms20 => FRAME_SAMPLES,
            FrameDuration::Ms120 => LONG_FRAME_SAMPLES,
        }
    }

    /// Duration of one packet in milliseconds.
    pub fn millis(self) -> u32 {
        match self {
            FrameDuration::Ms20 => 20,
            FrameDuration::Ms120 => 120,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budgets_match_durations() {
        assert_eq!(FrameDuration::Ms20.sample_budget(), 1920);
        assert_eq!(FrameDuration::Ms120.sample_budget(), 11_520);
        assert_eq!(
            FrameDuration::Ms120.sample_budget(),
            FrameDuration::Ms20.sample_budget() * LONG_FRAME_SUBFRAMES
        );
    }

    #[test]
    fn frame_is_20ms_at_48khz() {
        // 960 samples per channel at 48 kHz is exactly 20 ms.
        assert_eq!(FRAME_SAMPLES_PER_CHANNEL as u32 * 50, SAMPLE_RATE);
    }
}
