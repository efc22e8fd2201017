//! TestIoDev — in-memory device with an explicitly driven clock.
//!
//! Not behind `#[cfg(test)]`: `wavehub-daemon`'s integration tests
//! (spec.md §8 scenarios) need a device whose `frames_queued` is driven by
//! an explicit call rather than real wall-clock/hardware timing, so this is
//! exported like any other iodev and left for test-only consumption by
//! convention.

use wavehub_core::{CoreResult, DevBuffer, IoDev, IoNode};
use wavehub_proto::{AudioFormat, StreamDirection};

pub struct TestIoDev {
    dev_idx: u32,
    direction: StreamDirection,
    format: AudioFormat,
    buffer_size: usize,
    queued: usize,
    open: bool,
    scratch: Vec<u8>,
    captured: Vec<u8>,
    node: IoNode,
}

impl TestIoDev {
    pub fn new(dev_idx: u32, direction: StreamDirection, format: AudioFormat, buffer_size: usize) -> Self {
        let mut node = IoNode::new(dev_idx, 0, "test");
        node.active = true;
        Self {
            dev_idx,
            direction,
            format,
            buffer_size,
            queued: 0,
            open: false,
            scratch: Vec::new(),
            captured: Vec::new(),
            node,
        }
    }

    /// Advance the device's simulated clock by `frames`, as if that many
    /// frames of hardware I/O had just happened.
    pub fn advance(&mut self, frames: usize) {
        self.queued += frames;
    }

    /// Every byte ever committed via `put_buffer` (capture direction), in
    /// order — lets a test assert on exactly what reached "hardware".
    pub fn captured_bytes(&self) -> &[u8] {
        &self.captured
    }
}

impl IoDev for TestIoDev {
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
        self.queued
    }

    fn delay_frames(&self) -> usize {
        0
    }

    fn get_buffer(&mut self, n: usize) -> CoreResult<DevBuffer<'_>> {
        let n = n.min(self.queued).min(self.buffer_size);
        let bytes = n * self.format.frame_bytes();
        if self.scratch.len() < bytes {
            self.scratch.resize(bytes, 0);
        }
        Ok(DevBuffer {
            bytes: &mut self.scratch[..bytes],
            frames: n,
        })
    }

    fn put_buffer(&mut self, frames: usize) -> CoreResult<()> {
        let bytes = frames * self.format.frame_bytes();
        self.captured.extend_from_slice(&self.scratch[..bytes.min(self.scratch.len())]);
        self.queued = self.queued.saturating_sub(frames);
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
