//! LoopbackIoDev — post-mix capture loopback (spec.md §4.2, §9(b) redesign)
//!
//! The original tracked "queued" with a single wrap-around boolean, which
//! under- or over-reports by a full buffer length once the producer has
//! lapped the consumer. Replaced per spec.md §9(b) with two monotonic
//! counters: `frames_queued` is always `write_count - read_count`, valid
//! across any number of wraps, with no boolean state to get out of sync.

use std::collections::VecDeque;

use wavehub_core::{CoreResult, DevBuffer, IoDev, IoNode};
use wavehub_proto::{AudioFormat, StreamDirection};

pub struct LoopbackIoDev {
    dev_idx: u32,
    format: AudioFormat,
    buffer_size: usize,
    write_count: u64,
    read_count: u64,
    samples: VecDeque<u8>,
    scratch: Vec<u8>,
    node: IoNode,
    open: bool,
}

impl LoopbackIoDev {
    pub fn new(dev_idx: u32, format: AudioFormat, buffer_size: usize) -> Self {
        let mut node = IoNode::new(dev_idx, 0, "post-mix loopback");
        node.active = true;
        Self {
            dev_idx,
            format,
            buffer_size,
            write_count: 0,
            read_count: 0,
            samples: VecDeque::new(),
            scratch: Vec::new(),
            node,
            open: false,
        }
    }

    /// Push post-mix device audio into the loopback's own capture queue.
    /// Called by the audio thread right after mixing a playback device's
    /// buffer, never by a client. Overruns drop the oldest frames and
    /// fast-forward `read_count` to match — the producer (the mixer) must
    /// never block.
    pub fn push_frames(&mut self, bytes: &[u8], frames: usize) {
        let frame_bytes = self.format.frame_bytes();
        self.samples.extend(bytes[..frames * frame_bytes].iter().copied());
        self.write_count += frames as u64;

        let max_frames = self.buffer_size as u64;
        let queued = self.write_count - self.read_count;
        if queued > max_frames {
            let overrun_frames = (queued - max_frames) as usize;
            let drop_bytes = overrun_frames * frame_bytes;
            self.samples.drain(..drop_bytes.min(self.samples.len()));
            self.read_count += overrun_frames as u64;
            tracing::debug!(dev_idx = self.dev_idx, overrun_frames, "loopback overrun, dropping oldest frames");
        }
    }
}

impl IoDev for LoopbackIoDev {
    fn dev_idx(&self) -> u32 {
        self.dev_idx
    }

    fn direction(&self) -> StreamDirection {
        StreamDirection::Capture
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn open(&mut self) -> CoreResult<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> CoreResult<()> {
        self.open = false;
        self.samples.clear();
        self.write_count = 0;
        self.read_count = 0;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn dev_running(&self) -> bool {
        self.open
    }

    /// Overrun-safe regardless of how many times the producer has lapped
    /// the consumer; see module docs.
    fn frames_queued(&self, _now_ns: i64) -> usize {
        (self.write_count - self.read_count) as usize
    }

    fn delay_frames(&self) -> usize {
        0
    }

    fn get_buffer(&mut self, n: usize) -> CoreResult<DevBuffer<'_>> {
        let frame_bytes = self.format.frame_bytes();
        let available_frames = self.frames_queued(0).min(n);
        let bytes = available_frames * frame_bytes;

        self.scratch.clear();
        self.scratch.extend(self.samples.iter().take(bytes).copied());

        Ok(DevBuffer {
            bytes: &mut self.scratch,
            frames: available_frames,
        })
    }

    fn put_buffer(&mut self, frames: usize) -> CoreResult<()> {
        let frame_bytes = self.format.frame_bytes();
        let bytes = frames * frame_bytes;
        self.samples.drain(..bytes.min(self.samples.len()));
        self.read_count += frames as u64;
        Ok(())
    }

    fn update_supported_formats(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn update_active_node(&mut self, _node_idx: u32) -> CoreResult<()> {
        Ok(())
    }

    fn supported_rates(&self) -> &[u32] {
        &[]
    }

    fn supported_channel_counts(&self) -> &[u8] {
        &[]
    }

    fn active_node(&self) -> Option<&IoNode> {
        Some(&self.node)
    }

    fn nodes(&self) -> &[IoNode] {
        std::slice::from_ref(&self.node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wavehub_proto::{ChannelLayout, SampleFormat};

    fn fmt() -> AudioFormat {
        AudioFormat::new(SampleFormat::S16Le, 48000, 2, ChannelLayout::stereo()).unwrap()
    }

    #[test]
    fn frames_queued_tracks_producer_minus_consumer() {
        let mut dev = LoopbackIoDev::new(0, fmt(), 256);
        let frame_bytes = fmt().frame_bytes();
        dev.push_frames(&vec![0u8; 10 * frame_bytes], 10);
        assert_eq!(dev.frames_queued(0), 10);
        dev.put_buffer(4).unwrap();
        assert_eq!(dev.frames_queued(0), 6);
    }

    #[test]
    fn overrun_drops_oldest_and_advances_read_count() {
        let mut dev = LoopbackIoDev::new(0, fmt(), 8);
        let frame_bytes = fmt().frame_bytes();
        dev.push_frames(&vec![1u8; 20 * frame_bytes], 20);
        assert_eq!(dev.frames_queued(0), 8);
        assert_eq!(dev.write_count, 20);
        assert_eq!(dev.read_count, 12);
    }

    #[test]
    fn frames_queued_survives_many_wraps() {
        let mut dev = LoopbackIoDev::new(0, fmt(), 16);
        let frame_bytes = fmt().frame_bytes();
        for _ in 0..1000 {
            dev.push_frames(&vec![0u8; 10 * frame_bytes], 10);
            dev.put_buffer(10).unwrap();
        }
        assert_eq!(dev.frames_queued(0), 0);
        assert_eq!(dev.write_count, 10_000);
    }
}
