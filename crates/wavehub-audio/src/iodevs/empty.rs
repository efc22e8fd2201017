//! EmptyIoDev — always-open fallback device (spec.md §4.2)
//!
//! Every stream that loses its real device (closed on repeated error, or no
//! hardware enumerated at all) gets reattached here so it keeps receiving
//! callbacks instead of stalling. Produces silence on playback and never
//! has anything queued on capture.

use wavehub_core::{CoreResult, DevBuffer, IoDev, IoNode};
use wavehub_proto::{AudioFormat, ChannelLayout, SampleFormat, StreamDirection};

pub struct EmptyIoDev {
    dev_idx: u32,
    direction: StreamDirection,
    format: AudioFormat,
    buffer_size: usize,
    scratch: Vec<u8>,
    node: IoNode,
    open: bool,
}

impl EmptyIoDev {
    pub fn new(dev_idx: u32, direction: StreamDirection) -> Self {
        let format = AudioFormat::new(SampleFormat::S16Le, 48000, 2, ChannelLayout::stereo())
            .expect("stereo S16Le is always a valid format");
        let buffer_size = 4096;
        let mut node = IoNode::new(dev_idx, 0, "(unplugged)");
        node.active = true;
        Self {
            dev_idx,
            direction,
            format,
            buffer_size,
            scratch: vec![0u8; buffer_size * format.frame_bytes()],
            node,
            open: false,
        }
    }
}

impl IoDev for EmptyIoDev {
    fn dev_idx(&self) -> u32 {
        self.dev_idx
    }

    fn direction(&self) -> StreamDirection {
        self.direction
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
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn dev_running(&self) -> bool {
        self.open
    }

    fn frames_queued(&self, _now_ns: i64) -> usize {
        0
    }

    fn delay_frames(&self) -> usize {
        0
    }

    fn get_buffer(&mut self, n: usize) -> CoreResult<DevBuffer<'_>> {
        let n = n.min(self.buffer_size);
        let bytes = n * self.format.frame_bytes();
        if self.scratch.len() < bytes {
            self.scratch.resize(bytes, 0);
        }
        self.scratch[..bytes].fill(0);
        Ok(DevBuffer {
            bytes: &mut self.scratch[..bytes],
            frames: n,
        })
    }

    fn put_buffer(&mut self, _frames: usize) -> CoreResult<()> {
        Ok(())
    }

    fn update_supported_formats(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn update_active_node(&mut self, _node_idx: u32) -> CoreResult<()> {
        Ok(())
    }

    fn supported_rates(&self) -> &[u32] {
        &[48000]
    }

    fn supported_channel_counts(&self) -> &[u8] {
        &[2]
    }

    fn active_node(&self) -> Option<&IoNode> {
        Some(&self.node)
    }

    fn nodes(&self) -> &[IoNode] {
        std::slice::from_ref(&self.node)
    }
}
