//! Opus-in-Ogg stereo sink with sample-accurate duration.
//!
//! Interleaved f32 stereo blocks come in; fixed 20 ms Opus packets go out,
//! wrapped in Ogg pages per RFC 7845. Granule positions count 48 kHz PCM
//! frames including the pre-skip region; the final page's granule encodes
//! the exact appended frame count, which is how Ogg Opus trims the padding
//! the encoder needs at the tail.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ogg::writing::{PacketWriteEndInfo, PacketWriter};
use serde::Serialize;

/// Samples per channel in one Opus packet (20 ms at 48 kHz).
pub const OPUS_FRAME_SIZE: usize = 960;

/// libopus encoder lookahead at 48 kHz, declared as pre-skip in OpusHead.
const PRE_SKIP: u16 = 312;

/// Worst-case packet buffer; far above anything 20 ms at 128 kbps produces.
const MAX_PACKET_BYTES: usize = 4000;

const CHANNELS: usize = 2;

#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub sample_rate: u32,
    pub bitrate_bps: i32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            bitrate_bps: 128_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EncoderStats {
    /// Exact PCM frames appended by the mixer (excludes tail padding).
    pub input_frames: u64,
    pub packets_written: u64,
    /// Blocks lost to append-time encode or write failures.
    pub blocks_dropped: u64,
}

pub struct OggOpusSink {
    writer: PacketWriter<'static, BufWriter<File>>,
    encoder: opus::Encoder,
    serial: u32,
    /// Interleaved samples waiting for a full packet.
    pending: Vec<f32>,
    /// PCM frames already encoded into packets.
    frames_encoded: u64,
    stats: EncoderStats,
}

impl OggOpusSink {
    /// Open the container and write the OpusHead/OpusTags header pages.
    pub fn create(path: impl AsRef<Path>, config: &EncoderConfig) -> crate::Result<Self> {
        let mut encoder = opus::Encoder::new(
            config.sample_rate,
            opus::Channels::Stereo,
            opus::Application::Audio,
        )
        .map_err(|e| crate::EncoderError::Init(format!("opus encoder: {e}")))?;
        encoder
            .set_bitrate(opus::Bitrate::Bits(config.bitrate_bps))
            .map_err(|e| crate::EncoderError::Init(format!("opus bitrate: {e}")))?;

        let file = File::create(path.as_ref())
            .map_err(|e| crate::EncoderError::Init(format!("create {:?}: {e}", path.as_ref())))?;
        let mut writer = PacketWriter::new(BufWriter::new(file));

        // A fixed serial keeps output byte-identical for identical input.
        let serial = 0x6d75_726d;

        writer
            .write_packet(
                opus_head(config.sample_rate),
                serial,
                PacketWriteEndInfo::EndPage,
                0,
            )
            .map_err(|e| crate::EncoderError::Init(format!("OpusHead: {e}")))?;
        writer
            .write_packet(opus_tags(), serial, PacketWriteEndInfo::EndPage, 0)
            .map_err(|e| crate::EncoderError::Init(format!("OpusTags: {e}")))?;

        tracing::info!(
            path = %path.as_ref().display(),
            bitrate = config.bitrate_bps,
            "opus sink opened"
        );

        Ok(Self {
            writer,
            encoder,
            serial,
            pending: Vec::with_capacity(OPUS_FRAME_SIZE * CHANNELS * 2),
            frames_encoded: 0,
            stats: EncoderStats::default(),
        })
    }

    pub fn stats(&self) -> EncoderStats {
        self.stats
    }

    /// Append one interleaved stereo block.
    ///
    /// `output_sample_index` is the mixer's frame index for the block's
    /// first frame; a mismatch against the running count is logged, since
    /// blocks are expected to arrive gap-free and in order. Encode or write
    /// failures drop the affected packet and keep going; the encoder must
    /// never stall the mixer.
    pub fn append(&mut self, samples: &[f32], output_sample_index: u64) {
        let expected = self.stats.input_frames;
        if output_sample_index != expected {
            tracing::warn!(
                output_sample_index,
                expected,
                "encoder block discontinuity"
            );
        }

        self.pending.extend_from_slice(samples);
        self.stats.input_frames += (samples.len() / CHANNELS) as u64;

        let packet_samples = OPUS_FRAME_SIZE * CHANNELS;
        while self.pending.len() >= packet_samples {
            let chunk: Vec<f32> = self.pending.drain(..packet_samples).collect();
            if let Err(e) = self.write_audio_packet(&chunk, PacketWriteEndInfo::NormalPacket) {
                self.stats.blocks_dropped += 1;
                tracing::warn!(error = %e, "dropping audio packet");
            }
        }
    }

    /// Flush the tail and close the stream.
    ///
    /// The tail is padded with silence to a whole packet, plus enough extra
    /// to push the encoder's lookahead through; the end-of-stream granule
    /// then trims playback to the exact appended frame count.
    pub fn finish(mut self) -> crate::Result<EncoderStats> {
        let partial_frames = self.pending.len() / CHANNELS;
        let mut flush_frames =
            (OPUS_FRAME_SIZE - partial_frames % OPUS_FRAME_SIZE) % OPUS_FRAME_SIZE;
        while flush_frames < PRE_SKIP as usize {
            flush_frames += OPUS_FRAME_SIZE;
        }
        self.pending
            .extend(std::iter::repeat(0.0f32).take(flush_frames * CHANNELS));

        let packet_samples = OPUS_FRAME_SIZE * CHANNELS;
        let tail: Vec<f32> = self.pending.drain(..).collect();
        let chunks: Vec<&[f32]> = tail.chunks(packet_samples).collect();
        let last = chunks.len().saturating_sub(1);
        for (i, chunk) in chunks.iter().enumerate() {
            let info = if i == last {
                PacketWriteEndInfo::EndStream
            } else {
                PacketWriteEndInfo::NormalPacket
            };
            self.write_audio_packet(chunk, info)?;
        }

        self.writer.into_inner().flush()?;
        tracing::info!(
            frames = self.stats.input_frames,
            packets = self.stats.packets_written,
            "opus sink finished"
        );
        Ok(self.stats)
    }

    fn write_audio_packet(
        &mut self,
        chunk: &[f32],
        info: PacketWriteEndInfo,
    ) -> crate::Result<()> {
        let mut buf = vec![0u8; MAX_PACKET_BYTES];
        let len = self
            .encoder
            .encode_float(chunk, &mut buf)
            .map_err(|e| crate::EncoderError::Encode(e.to_string()))?;
        buf.truncate(len);

        self.frames_encoded += (chunk.len() / CHANNELS) as u64;
        // Granule counts decoded 48 kHz frames including pre-skip, capped at
        // the true end so the final page trims tail padding.
        let granule =
            PRE_SKIP as u64 + self.frames_encoded.min(self.stats.input_frames);

        self.writer.write_packet(buf, self.serial, info, granule)?;
        self.stats.packets_written += 1;
        Ok(())
    }
}

/// RFC 7845 identification header.
fn opus_head(input_sample_rate: u32) -> Vec<u8> {
    let mut head = Vec::with_capacity(19);
    head.extend_from_slice(b"OpusHead");
    head.push(1); // version
    head.push(CHANNELS as u8);
    head.extend_from_slice(&PRE_SKIP.to_le_bytes());
    head.extend_from_slice(&input_sample_rate.to_le_bytes());
    head.extend_from_slice(&0i16.to_le_bytes()); // output gain
    head.push(0); // channel mapping family: stereo
    head
}

/// RFC 7845 comment header.
fn opus_tags() -> Vec<u8> {
    let vendor = b"murmur";
    let mut tags = Vec::with_capacity(8 + 4 + vendor.len() + 4);
    tags.extend_from_slice(b"OpusTags");
    tags.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    tags.extend_from_slice(vendor);
    tags.extend_from_slice(&0u32.to_le_bytes()); // no user comments
    tags
}
