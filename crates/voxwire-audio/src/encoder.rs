use std::sync::Arc;

use anyhow::Result;
use opus::{Application, Bitrate, Channels, Repacketizer};
use tracing::trace;

use voxwire_protocol::rtp::{self, RtpHeader};
use voxwire_protocol::voice::{
    FrameDuration, FRAME_SAMPLES, MAX_OPUS_FRAME, SAMPLE_RATE, SILENCE_PAYLOAD,
};

/// Target bitrate for stereo voice.
const OPUS_BITRATE: i32 = 64_000;

/// Wraps the Opus encoder and frames its output as RTP packets built in
/// pooled buffers.
///
/// One encoder drives one outbound stream; instances are not safe for
/// concurrent use.
pub struct VoiceEncoder {
    inner: opus::Encoder,
    repacketizer: Repacketizer,
    duration: FrameDuration,
    pool: Arc<crate::pool::PacketPool>,
    silence_pool: Arc<crate::pool::PacketPool>,
}

impl VoiceEncoder {
    /// Create an encoder for the given frame-duration profile, drawing
    /// packet memory from the matching pool tier.
    pub fn new(duration: FrameDuration, pools: &crate::pool::VoicePools) -> Result<Self> {
        let mut inner = opus::Encoder::new(SAMPLE_RATE, Channels::Stereo, Application::Voip)?;
        inner.set_bitrate(Bitrate::Bits(OPUS_BITRATE))?;
        inner.set_inband_fec(true)?;
        inner.set_packet_loss_perc(15)?;

        Ok(Self {
            inner,
            repacketizer: Repacketizer::new()?,
            duration,
            pool: Arc::clone(pools.for_duration(duration)),
            silence_pool: Arc::clone(&pools.silence),
        })
    }

    /// Encode one packet's worth of interleaved PCM into a pooled buffer:
    /// 12-byte RTP header first, Opus payload after.
    ///
    /// Returns the lease (dereferencing to the finished frame) and the
    /// number of input samples consumed, which is always `pcm.len()`.
    /// Inputs shorter than a full frame are zero-padded; inputs over the
    /// profile's budget are a caller bug.
    pub fn encode(
        &mut self,
        pcm: &[i16],
        header: RtpHeader,
    ) -> Result<(crate::pool::PacketLease, usize)> {
        let budget = self.duration.sample_budget();
        assert!(
            pcm.len() <= budget,
            "PCM chunk of {} samples exceeds the {} ms budget of {budget}",
            pcm.len(),
            self.duration.millis(),
        );

        let mut lease = self.pool.rent();
        let payload_len = {
            let buf = lease.buf_mut();
            header.write(buf);
            match self.duration {
                FrameDuration::Ms20 => {
                    Self::encode_subframe(&mut self.inner, pcm, &mut buf[rtp::HEADER_LEN..])?
                }
                FrameDuration::Ms120 => {
                    Self::encode_repacketized(
                        &mut self.inner,
                        &mut self.repacketizer,
                        pcm,
                        &mut buf[rtp::HEADER_LEN..],
                    )?
                }
            }
        };
        lease.set_filled(rtp::HEADER_LEN + payload_len);
        trace!(
            samples = pcm.len(),
            bytes = lease.len(),
            sequence = header.sequence,
            "encoded voice packet"
        );
        Ok((lease, pcm.len()))
    }

    /// Compress one 20 ms sub-frame, zero-padding short input.
    fn encode_subframe(encoder: &mut opus::Encoder, pcm: &[i16], out: &mut [u8]) -> Result<usize> {
        if pcm.len() == FRAME_SAMPLES {
            return Ok(encoder.encode(pcm, out)?);
        }
        let mut padded = [0i16; FRAME_SAMPLES];
        padded[..pcm.len()].copy_from_slice(pcm);
        Ok(encoder.encode(&padded, out)?)
    }

    /// Compress up to six 20 ms sub-frames independently and combine them
    /// into a single Opus packet through the repacketizer.
    fn encode_repacketized(
        encoder: &mut opus::Encoder,
        repacketizer: &mut Repacketizer,
        pcm: &[i16],
        out: &mut [u8],
    ) -> Result<usize> {
        let mut subframes: Vec<Vec<u8>> = Vec::with_capacity(6);
        if pcm.is_empty() {
            let mut compressed = vec![0u8; MAX_OPUS_FRAME];
            let len = Self::encode_subframe(encoder, &[], &mut compressed)?;
            compressed.truncate(len);
            subframes.push(compressed);
        }
        for chunk in pcm.chunks(FRAME_SAMPLES) {
            let mut compressed = vec![0u8; MAX_OPUS_FRAME];
            let len = Self::encode_subframe(encoder, chunk, &mut compressed)?;
            compressed.truncate(len);
            subframes.push(compressed);
        }
        let packets: Vec<&[u8]> = subframes.iter().map(Vec::as_slice).collect();
        Ok(repacketizer.combine(&packets, out)?)
    }

    /// Build a minimal frame carrying the canonical Opus silence payload,
    /// used to pad out the tail of a transmission.
    pub fn write_silence_frame(&self, header: RtpHeader) -> crate::pool::PacketLease {
        let mut lease = self.silence_pool.rent();
        {
            let buf = lease.buf_mut();
            header.write(buf);
            buf[rtp::HEADER_LEN..rtp::HEADER_LEN + SILENCE_PAYLOAD.len()]
                .copy_from_slice(&SILENCE_PAYLOAD);
        }
        lease.set_filled(rtp::HEADER_LEN + SILENCE_PAYLOAD.len());
        lease
    }

    /// The active frame-duration profile.
    pub fn duration(&self) -> FrameDuration {
        self.duration
    }
}
