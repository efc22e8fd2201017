//! Format Converter (spec.md §4.3)
//!
//! The converter contract is intentionally opaque: rate change, channel
//! remap/mix, and sample-format change are all folded into one
//! `FormatConverter` trait object so `dev_stream` never needs to know which
//! of the three (if any) a given attachment requires. An identity
//! conversion is recognized at construction time and short-circuits to a
//! `memcpy`-equivalent, matching spec.md §4.3's "must bypass allocations"
//! requirement.

use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use wavehub_proto::{AudioFormat, ChannelLabel, SampleFormat};

use crate::error::{CoreError, CoreResult};

/// Opaque converter between two audio formats.
pub trait FormatConverter: Send {
    /// Frames of input needed to produce `out_frames` frames of output.
    fn out_frames_to_in(&self, out_frames: usize) -> usize;

    /// Frames of output produced by `in_frames` frames of input.
    fn in_frames_to_out(&self, in_frames: usize) -> usize;

    /// Convert up to `in_frames` frames of `in_bytes` into `out_bytes`,
    /// writing at most `out_cap_frames` frames, returning the number of
    /// output frames actually produced.
    fn convert_frames(
        &mut self,
        in_bytes: &[u8],
        in_frames: usize,
        out_bytes: &mut [u8],
        out_cap_frames: usize,
    ) -> CoreResult<usize>;

    /// `true` if this converter is a pure byte copy (same format both sides).
    fn is_identity(&self) -> bool {
        false
    }
}

/// Construct the converter appropriate for `from -> to`, recognizing the
/// identity case.
pub fn create_converter(from: &AudioFormat, to: &AudioFormat) -> CoreResult<Box<dyn FormatConverter>> {
    if from.is_identity_to(to) {
        return Ok(Box::new(IdentityConverter {
            frame_bytes: from.frame_bytes(),
        }));
    }
    Ok(Box::new(GeneralConverter::new(from.clone(), to.clone())?))
}

/// Bypasses allocation: input and output formats match exactly.
struct IdentityConverter {
    frame_bytes: usize,
}

impl FormatConverter for IdentityConverter {
    fn out_frames_to_in(&self, out_frames: usize) -> usize {
        out_frames
    }

    fn in_frames_to_out(&self, in_frames: usize) -> usize {
        in_frames
    }

    fn convert_frames(
        &mut self,
        in_bytes: &[u8],
        in_frames: usize,
        out_bytes: &mut [u8],
        out_cap_frames: usize,
    ) -> CoreResult<usize> {
        let frames = in_frames.min(out_cap_frames);
        let bytes = frames * self.frame_bytes;
        out_bytes[..bytes].copy_from_slice(&in_bytes[..bytes]);
        Ok(frames)
    }

    fn is_identity(&self) -> bool {
        true
    }
}

/// Handles any combination of rate change, channel remap/mix, and
/// sample-format change, routing through planar `f32` and rubato for
/// sample-rate conversion.
struct GeneralConverter {
    from: AudioFormat,
    to: AudioFormat,
    channel_map: Vec<Option<usize>>,
}

impl GeneralConverter {
    fn new(from: AudioFormat, to: AudioFormat) -> CoreResult<Self> {
        let channel_map = build_channel_map(&from, &to);
        Ok(Self { from, to, channel_map })
    }

    fn needs_resample(&self) -> bool {
        self.from.frame_rate != self.to.frame_rate
    }
}

impl FormatConverter for GeneralConverter {
    fn out_frames_to_in(&self, out_frames: usize) -> usize {
        round_div(out_frames as u64 * self.from.frame_rate as u64, self.to.frame_rate as u64) as usize
    }

    fn in_frames_to_out(&self, in_frames: usize) -> usize {
        round_div(in_frames as u64 * self.to.frame_rate as u64, self.from.frame_rate as u64) as usize
    }

    fn convert_frames(
        &mut self,
        in_bytes: &[u8],
        in_frames: usize,
        out_bytes: &mut [u8],
        out_cap_frames: usize,
    ) -> CoreResult<usize> {
        let in_channels = self.from.num_channels as usize;
        let out_channels = self.to.num_channels as usize;

        // Decode to planar f32, one Vec per input channel.
        let mut planar_in: Vec<Vec<f32>> = vec![Vec::with_capacity(in_frames); in_channels];
        decode_interleaved(self.from.sample_format, in_bytes, in_frames, in_channels, &mut planar_in);

        let planar_resampled = if self.needs_resample() {
            resample_planar(&planar_in, self.from.frame_rate, self.to.frame_rate, in_frames)?
        } else {
            planar_in
        };

        let produced_frames = planar_resampled
            .first()
            .map(|c| c.len())
            .unwrap_or(0)
            .min(out_cap_frames);

        // Channel remap/mix into the target channel count.
        let mut planar_out: Vec<Vec<f32>> = vec![vec![0.0f32; produced_frames]; out_channels];
        for (out_ch, source) in self.channel_map.iter().enumerate() {
            if let Some(in_ch) = source {
                if let Some(src) = planar_resampled.get(*in_ch) {
                    planar_out[out_ch][..produced_frames].copy_from_slice(&src[..produced_frames]);
                }
            }
        }

        encode_interleaved(self.to.sample_format, &planar_out, produced_frames, out_bytes);
        Ok(produced_frames)
    }
}

fn round_div(num: u64, den: u64) -> u64 {
    (num + den / 2) / den.max(1)
}

/// Maps each output channel label to the source channel index carrying
/// the same label, if any. Output channels with no matching input label
/// are left silent (conservative "mix" policy: never fabricate content).
fn build_channel_map(from: &AudioFormat, to: &AudioFormat) -> Vec<Option<usize>> {
    (0..to.num_channels as usize)
        .map(|out_idx| {
            ChannelLabel::ALL.iter().find_map(|label| {
                let out_pos = to.channel_layout.get(*label)?;
                if out_pos as usize != out_idx {
                    return None;
                }
                from.channel_layout.get(*label).map(|idx| idx as usize)
            })
        })
        .collect()
}

fn decode_interleaved(fmt: SampleFormat, bytes: &[u8], frames: usize, channels: usize, out: &mut [Vec<f32>]) {
    let bytes_per_sample = fmt.bytes_per_sample();
    for frame in 0..frames {
        for ch in 0..channels {
            let offset = (frame * channels + ch) * bytes_per_sample;
            let sample = decode_sample(fmt, &bytes[offset..offset + bytes_per_sample]);
            out[ch].push(sample);
        }
    }
}

fn encode_interleaved(fmt: SampleFormat, planar: &[Vec<f32>], frames: usize, out: &mut [u8]) {
    let bytes_per_sample = fmt.bytes_per_sample();
    let channels = planar.len();
    for frame in 0..frames {
        for (ch, channel) in planar.iter().enumerate() {
            let offset = (frame * channels + ch) * bytes_per_sample;
            encode_sample(fmt, channel[frame], &mut out[offset..offset + bytes_per_sample]);
        }
    }
}

fn decode_sample(fmt: SampleFormat, bytes: &[u8]) -> f32 {
    match fmt {
        SampleFormat::S16Le => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / i16::MAX as f32,
        SampleFormat::S24Le => {
            let raw = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]) << 8 >> 8;
            raw as f32 / 8_388_607.0
        }
        SampleFormat::S32Le => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32 / i32::MAX as f32,
        SampleFormat::F32Le => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    }
}

fn encode_sample(fmt: SampleFormat, sample: f32, out: &mut [u8]) {
    // Clamp to [-1, 1] before requantizing (spec.md §9 numeric semantics).
    let clamped = sample.clamp(-1.0, 1.0);
    match fmt {
        SampleFormat::S16Le => out.copy_from_slice(&((clamped * i16::MAX as f32) as i16).to_le_bytes()),
        SampleFormat::S24Le => {
            let v = (clamped * 8_388_607.0) as i32;
            out.copy_from_slice(&v.to_le_bytes()[..3]);
        }
        SampleFormat::S32Le => out.copy_from_slice(&((clamped * i32::MAX as f32) as i32).to_le_bytes()),
        SampleFormat::F32Le => out.copy_from_slice(&clamped.to_le_bytes()),
    }
}

fn resample_planar(
    planar_in: &[Vec<f32>],
    from_rate: u32,
    to_rate: u32,
    in_frames: usize,
) -> CoreResult<Vec<Vec<f32>>> {
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = to_rate as f64 / from_rate as f64;
    let channels = planar_in.len().max(1);

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, in_frames.max(1), channels)
        .map_err(|e| CoreError::ConverterError(e.to_string()))?;

    let input: Vec<Vec<f32>> = if planar_in.is_empty() {
        vec![vec![0.0; in_frames]; 1]
    } else {
        planar_in.to_vec()
    };

    let mut output = resampler
        .process(&input, None)
        .map_err(|e| CoreError::ConverterError(e.to_string()))?;

    let expected = round_div(in_frames as u64 * to_rate as u64, from_rate as u64) as usize;
    for channel in output.iter_mut() {
        channel.resize(expected, 0.0);
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wavehub_proto::ChannelLayout;

    fn fmt(rate: u32, channels: u8) -> AudioFormat {
        let layout = if channels == 2 { ChannelLayout::stereo() } else { ChannelLayout::mono() };
        AudioFormat::new(SampleFormat::F32Le, rate, channels, layout).unwrap()
    }

    #[test]
    fn identity_conversion_is_used_for_matching_formats() {
        let a = fmt(48000, 2);
        let converter = create_converter(&a, &a).unwrap();
        assert!(converter.is_identity());
    }

    #[test]
    fn identity_conversion_copies_bytes_exactly() {
        let a = fmt(48000, 2);
        let mut converter = create_converter(&a, &a).unwrap();
        let input = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut output = [0u8; 8];
        let produced = converter.convert_frames(&input, 1, &mut output, 1).unwrap();
        assert_eq!(produced, 1);
        assert_eq!(output, input);
    }

    #[test]
    fn same_rate_frame_conversion_is_identity_count() {
        let a = fmt(48000, 2);
        let b = fmt(48000, 1);
        let converter = create_converter(&a, &b).unwrap();
        assert_eq!(converter.in_frames_to_out(480), 480);
        assert_eq!(converter.out_frames_to_in(480), 480);
    }

    #[test]
    fn rate_conversion_round_trips_within_one_frame() {
        let a = fmt(44100, 2);
        let b = fmt(48000, 2);
        let converter = create_converter(&a, &b).unwrap();
        for k in [1usize, 100, 441, 1000, 44100] {
            let out = converter.in_frames_to_out(k);
            let back = converter.out_frames_to_in(out);
            assert!((back as i64 - k as i64).abs() <= 1, "k={k} back={back}");
        }
    }

    #[test]
    fn channel_downmix_keeps_matching_labels() {
        let stereo = fmt(48000, 2);
        let mono = fmt(48000, 1);
        let mut converter = create_converter(&stereo, &mono).unwrap();
        // Two frames of stereo: (1.0, -1.0), (0.5, 0.5)
        let mut input = [0u8; 16];
        encode_sample(SampleFormat::F32Le, 1.0, &mut input[0..4]);
        encode_sample(SampleFormat::F32Le, -1.0, &mut input[4..8]);
        encode_sample(SampleFormat::F32Le, 0.5, &mut input[8..12]);
        encode_sample(SampleFormat::F32Le, 0.5, &mut input[12..16]);

        let mut output = [0u8; 8];
        let produced = converter.convert_frames(&input, 2, &mut output, 2).unwrap();
        assert_eq!(produced, 2);
        // FL maps to mono's only channel (index 0); FR is dropped, not mixed.
        assert_eq!(decode_sample(SampleFormat::F32Le, &output[0..4]), 1.0);
    }
}
