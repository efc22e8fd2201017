//! Audio Format and Channel Layout
//!
//! Shared between the daemon's device/stream plumbing and the wire
//! protocol: formats are negotiated over the control socket and then
//! written into the per-stream shared-memory config block verbatim.

use serde::{Deserialize, Serialize};

use crate::error::{ProtoError, ProtoResult};

/// Maximum number of semantic channel slots a format can describe.
pub const CH_MAX: usize = 8;

/// Sample storage format. Matches the set a cpal-backed hardware device and
/// the opaque format converter both need to understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    S16Le,
    S24Le,
    S32Le,
    F32Le,
}

impl SampleFormat {
    /// Bytes occupied by one sample in this format.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::S16Le => 2,
            SampleFormat::S24Le => 3,
            SampleFormat::S32Le => 4,
            SampleFormat::F32Le => 4,
        }
    }
}

/// Semantic channel slot, independent of physical channel ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelLabel {
    FrontLeft,
    FrontRight,
    RearLeft,
    RearRight,
    Center,
    Lfe,
    SideLeft,
    SideRight,
}

impl ChannelLabel {
    pub const ALL: [ChannelLabel; CH_MAX] = [
        ChannelLabel::FrontLeft,
        ChannelLabel::FrontRight,
        ChannelLabel::RearLeft,
        ChannelLabel::RearRight,
        ChannelLabel::Center,
        ChannelLabel::Lfe,
        ChannelLabel::SideLeft,
        ChannelLabel::SideRight,
    ];

    fn index(self) -> usize {
        Self::ALL.iter().position(|&c| c == self).unwrap()
    }
}

/// Maps each semantic channel slot to a physical channel index, or -1 if
/// the slot is absent from this format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLayout {
    slots: [i8; CH_MAX],
}

impl ChannelLayout {
    /// Layout with every slot absent.
    pub fn empty() -> Self {
        Self { slots: [-1; CH_MAX] }
    }

    /// Conventional stereo layout: FL -> 0, FR -> 1, everything else absent.
    pub fn stereo() -> Self {
        let mut slots = [-1i8; CH_MAX];
        slots[ChannelLabel::FrontLeft.index()] = 0;
        slots[ChannelLabel::FrontRight.index()] = 1;
        Self { slots }
    }

    /// Conventional mono layout: FL -> 0.
    pub fn mono() -> Self {
        let mut slots = [-1i8; CH_MAX];
        slots[ChannelLabel::FrontLeft.index()] = 0;
        Self { slots }
    }

    pub fn set(&mut self, label: ChannelLabel, index: i8) {
        self.slots[label.index()] = index;
    }

    pub fn get(&self, label: ChannelLabel) -> Option<u8> {
        let v = self.slots[label.index()];
        if v < 0 {
            None
        } else {
            Some(v as u8)
        }
    }

    pub fn raw(&self) -> &[i8; CH_MAX] {
        &self.slots
    }

    /// Validate against a channel count: every present slot must be a
    /// distinct index less than `num_channels`.
    pub fn validate(&self, num_channels: u8) -> ProtoResult<()> {
        let mut seen = [false; 256];
        for (i, &v) in self.slots.iter().enumerate() {
            if v < 0 {
                continue;
            }
            if v as u8 >= num_channels {
                return Err(ProtoError::InvalidChannelLayout {
                    channel: i,
                    index: v,
                    num_channels,
                });
            }
            if seen[v as usize] {
                return Err(ProtoError::DuplicateChannelIndex(v));
            }
            seen[v as usize] = true;
        }
        Ok(())
    }
}

impl Default for ChannelLayout {
    fn default() -> Self {
        Self::empty()
    }
}

/// A fully negotiated audio format: sample storage, rate, channel count and
/// semantic layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_format: SampleFormat,
    pub frame_rate: u32,
    pub num_channels: u8,
    pub channel_layout: ChannelLayout,
}

impl AudioFormat {
    pub fn new(
        sample_format: SampleFormat,
        frame_rate: u32,
        num_channels: u8,
        channel_layout: ChannelLayout,
    ) -> ProtoResult<Self> {
        channel_layout.validate(num_channels)?;
        Ok(Self {
            sample_format,
            frame_rate,
            num_channels,
            channel_layout,
        })
    }

    /// Bytes per frame (one sample per channel).
    pub fn frame_bytes(&self) -> usize {
        self.sample_format.bytes_per_sample() * self.num_channels as usize
    }

    /// Whether `self` and `other` are sample-for-sample identical, i.e. a
    /// format converter between them can be bypassed (spec's "identity
    /// conversion shortcut").
    pub fn is_identity_to(&self, other: &AudioFormat) -> bool {
        self.sample_format == other.sample_format
            && self.frame_rate == other.frame_rate
            && self.num_channels == other.num_channels
            && self.channel_layout == other.channel_layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_layout_validates() {
        let layout = ChannelLayout::stereo();
        assert!(layout.validate(2).is_ok());
        assert_eq!(layout.get(ChannelLabel::FrontLeft), Some(0));
        assert_eq!(layout.get(ChannelLabel::Center), None);
    }

    #[test]
    fn layout_rejects_out_of_range_index() {
        let layout = ChannelLayout::stereo();
        assert!(matches!(
            layout.validate(1),
            Err(ProtoError::InvalidChannelLayout { .. })
        ));
    }

    #[test]
    fn layout_rejects_duplicate_index() {
        let mut layout = ChannelLayout::empty();
        layout.set(ChannelLabel::FrontLeft, 0);
        layout.set(ChannelLabel::FrontRight, 0);
        assert!(matches!(
            layout.validate(2),
            Err(ProtoError::DuplicateChannelIndex(0))
        ));
    }

    #[test]
    fn identity_detection() {
        let a = AudioFormat::new(SampleFormat::F32Le, 48000, 2, ChannelLayout::stereo()).unwrap();
        let b = a;
        assert!(a.is_identity_to(&b));

        let c = AudioFormat::new(SampleFormat::F32Le, 44100, 2, ChannelLayout::stereo()).unwrap();
        assert!(!a.is_identity_to(&c));
    }

    #[test]
    fn frame_bytes_accounts_for_channels() {
        let stereo = AudioFormat::new(SampleFormat::S16Le, 48000, 2, ChannelLayout::stereo()).unwrap();
        assert_eq!(stereo.frame_bytes(), 4);

        let mono = AudioFormat::new(SampleFormat::F32Le, 48000, 1, ChannelLayout::mono()).unwrap();
        assert_eq!(mono.frame_bytes(), 4);
    }

    #[test]
    fn serde_roundtrip() {
        let fmt = AudioFormat::new(SampleFormat::S24Le, 96000, 2, ChannelLayout::stereo()).unwrap();
        let json = serde_json::to_string(&fmt).unwrap();
        let back: AudioFormat = serde_json::from_str(&json).unwrap();
        assert_eq!(fmt, back);
    }
}
