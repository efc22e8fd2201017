//! CpalIoDev — hardware-backed iodev (spec.md §4.1, §4.2)
//!
//! Bridges cpal's real-time callback to the audio thread's synchronous
//! `get_buffer`/`put_buffer` protocol through an `rtrb` single-producer
//! single-consumer ring, the same split `AudioStream` uses between its
//! capture and output callbacks. Frame accounting uses the same two
//! monotonic-counter approach as `LoopbackIoDev` rather than cpal's own
//! notion of "available slots", since `frames_queued` has to stay correct
//! across however many callback periods have elapsed since the last poll.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig as CpalStreamConfig};
use rtrb::{Consumer, Producer, RingBuffer};

use wavehub_core::{CoreError, CoreResult, DevBuffer, IoDev, IoNode};
use wavehub_proto::{AudioFormat, ChannelLayout, SampleFormat, StreamDirection};

use crate::error::{AudioError, AudioResult};

const RING_PERIODS: usize = 4;

struct Counters {
    write_count: AtomicU64,
    read_count: AtomicU64,
}

pub struct CpalIoDev {
    dev_idx: u32,
    direction: StreamDirection,
    format: AudioFormat,
    buffer_size: usize,
    stream: Option<Stream>,
    producer: Option<Producer<u8>>,
    consumer: Option<Consumer<u8>>,
    counters: Arc<Counters>,
    scratch: Vec<u8>,
    node: IoNode,
    open: bool,
    supported_rates: Vec<u32>,
    supported_channel_counts: Vec<u8>,
}

impl CpalIoDev {
    /// Build a playback device from the system default output.
    pub fn default_output(dev_idx: u32, format: AudioFormat, buffer_size: usize) -> AudioResult<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevicesFound)?;
        Self::new(dev_idx, StreamDirection::Playback, device, format, buffer_size)
    }

    /// Build a capture device from the system default input.
    pub fn default_input(dev_idx: u32, format: AudioFormat, buffer_size: usize) -> AudioResult<Self> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(AudioError::NoDevicesFound)?;
        Self::new(dev_idx, StreamDirection::Capture, device, format, buffer_size)
    }

    fn new(dev_idx: u32, direction: StreamDirection, device: Device, format: AudioFormat, buffer_size: usize) -> AudioResult<Self> {
        let name = device.name().unwrap_or_else(|_| "cpal device".to_string());
        let supported_rates = query_supported_rates(&device, direction);
        let supported_channel_counts = vec![format.num_channels];

        let mut node = IoNode::new(dev_idx, 0, name);
        node.active = true;

        Ok(Self {
            dev_idx,
            direction,
            format,
            buffer_size,
            stream: None,
            producer: None,
            consumer: None,
            counters: Arc::new(Counters {
                write_count: AtomicU64::new(0),
                read_count: AtomicU64::new(0),
            }),
            scratch: Vec::new(),
            node,
            open: false,
            supported_rates,
            supported_channel_counts,
        })
    }

    fn cpal_config(&self) -> CpalStreamConfig {
        CpalStreamConfig {
            channels: self.format.num_channels as u16,
            sample_rate: cpal::SampleRate(self.format.frame_rate),
            buffer_size: cpal::BufferSize::Fixed(self.buffer_size as u32),
        }
    }
}

impl IoDev for CpalIoDev {
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
        if self.open {
            return Ok(());
        }
        let host = cpal::default_host();
        let device = match self.direction {
            StreamDirection::Playback => host.default_output_device(),
            StreamDirection::Capture | StreamDirection::Unified => host.default_input_device(),
        }
        .ok_or(CoreError::DeviceNotFound(self.dev_idx))?;

        let frame_bytes = self.format.frame_bytes();
        let ring_capacity = self.buffer_size * frame_bytes * RING_PERIODS;
        let (producer, consumer) = RingBuffer::<u8>::new(ring_capacity);
        let cpal_config = self.cpal_config();
        let counters = Arc::clone(&self.counters);

        let stream = match self.direction {
            StreamDirection::Playback => {
                // Audio thread fills `producer`; cpal's callback drains `consumer`.
                let stream = build_output_stream(&device, &cpal_config, consumer, Arc::clone(&counters), frame_bytes)
                    .map_err(|e| CoreError::DeviceIo(e.to_string()))?;
                self.producer = Some(producer);
                stream
            }
            StreamDirection::Capture | StreamDirection::Unified => {
                // cpal's callback fills `producer`; audio thread drains `consumer`.
                let stream = build_input_stream(&device, &cpal_config, producer, Arc::clone(&counters))
                    .map_err(|e| CoreError::DeviceIo(e.to_string()))?;
                self.consumer = Some(consumer);
                stream
            }
        };
        stream.play().map_err(|e| CoreError::DeviceIo(e.to_string()))?;

        self.stream = Some(stream);
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> CoreResult<()> {
        self.stream = None;
        self.producer = None;
        self.consumer = None;
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn dev_running(&self) -> bool {
        self.open && self.stream.is_some()
    }

    fn frames_queued(&self, _now_ns: i64) -> usize {
        let write = self.counters.write_count.load(Ordering::Acquire);
        let read = self.counters.read_count.load(Ordering::Acquire);
        (write - read) as usize
    }

    fn delay_frames(&self) -> usize {
        0
    }

    fn get_buffer(&mut self, n: usize) -> CoreResult<DevBuffer<'_>> {
        let frame_bytes = self.format.frame_bytes();
        let n = n.min(self.buffer_size);
        let bytes = n * frame_bytes;
        if self.scratch.len() < bytes {
            self.scratch.resize(bytes, 0);
        }
        match (&mut self.consumer, self.direction) {
            (Some(consumer), StreamDirection::Capture | StreamDirection::Unified) => {
                let available = consumer.slots().min(bytes);
                if let Ok(chunk) = consumer.read_chunk(available) {
                    let (a, b) = chunk.as_slices();
                    self.scratch[..a.len()].copy_from_slice(a);
                    self.scratch[a.len()..a.len() + b.len()].copy_from_slice(b);
                    chunk.commit_all();
                }
                Ok(DevBuffer {
                    bytes: &mut self.scratch[..bytes],
                    frames: available / frame_bytes,
                })
            }
            _ => {
                self.scratch[..bytes].fill(0);
                Ok(DevBuffer {
                    bytes: &mut self.scratch[..bytes],
                    frames: n,
                })
            }
        }
    }

    fn put_buffer(&mut self, frames: usize) -> CoreResult<()> {
        let frame_bytes = self.format.frame_bytes();
        let bytes = frames * frame_bytes;
        if let (Some(producer), StreamDirection::Playback) = (&mut self.producer, self.direction) {
            if let Ok(mut chunk) = producer.write_chunk_uninit(bytes.min(self.scratch.len())) {
                let len = chunk.len();
                let (a, b) = chunk.as_mut_slices();
                for (dst, src) in a.iter_mut().chain(b.iter_mut()).zip(self.scratch.iter()).take(len) {
                    dst.write(*src);
                }
                unsafe { chunk.commit_all() };
            }
            self.counters.write_count.fetch_add(frames as u64, Ordering::AcqRel);
        }
        Ok(())
    }

    fn update_supported_formats(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn update_active_node(&mut self, _node_idx: u32) -> CoreResult<()> {
        Ok(())
    }

    fn supported_rates(&self) -> &[u32] {
        &self.supported_rates
    }

    fn supported_channel_counts(&self) -> &[u8] {
        &self.supported_channel_counts
    }

    fn active_node(&self) -> Option<&IoNode> {
        Some(&self.node)
    }

    fn nodes(&self) -> &[IoNode] {
        std::slice::from_ref(&self.node)
    }
}

fn query_supported_rates(device: &Device, direction: StreamDirection) -> Vec<u32> {
    const COMMON_RATES: [u32; 4] = [44100, 48000, 96000, 192000];
    let configs: Vec<_> = match direction {
        StreamDirection::Playback => device.supported_output_configs().map(|c| c.collect()).unwrap_or_default(),
        StreamDirection::Capture | StreamDirection::Unified => device.supported_input_configs().map(|c| c.collect()).unwrap_or_default(),
    };
    let mut rates = Vec::new();
    for config in &configs {
        let (min, max) = (config.min_sample_rate().0, config.max_sample_rate().0);
        for &rate in &COMMON_RATES {
            if rate >= min && rate <= max && !rates.contains(&rate) {
                rates.push(rate);
            }
        }
    }
    rates.sort_unstable();
    rates
}

fn build_output_stream(
    device: &Device,
    config: &CpalStreamConfig,
    mut consumer: Consumer<u8>,
    counters: Arc<Counters>,
    frame_bytes: usize,
) -> Result<Stream, cpal::BuildStreamError> {
    device.build_output_stream(
        config,
        move |data: &mut [u8], _: &cpal::OutputCallbackInfo| {
            let available = consumer.slots().min(data.len());
            if let Ok(chunk) = consumer.read_chunk(available) {
                let (a, b) = chunk.as_slices();
                data[..a.len()].copy_from_slice(a);
                data[a.len()..a.len() + b.len()].copy_from_slice(b);
                chunk.commit_all();
            }
            if available < data.len() {
                data[available..].fill(0);
            }
            counters.read_count.fetch_add((available / frame_bytes) as u64, Ordering::AcqRel);
        },
        move |err| {
            tracing::error!(%err, "cpal output stream error");
        },
        None,
    )
}

fn build_input_stream(device: &Device, config: &CpalStreamConfig, mut producer: Producer<u8>, counters: Arc<Counters>) -> Result<Stream, cpal::BuildStreamError> {
    device.build_input_stream(
        config,
        move |data: &[u8], _: &cpal::InputCallbackInfo| {
            let written = producer.write_chunk_uninit(data.len()).map_or(0, |mut chunk| {
                let len = chunk.len().min(data.len());
                let (a, b) = chunk.as_mut_slices();
                for (i, slot) in a.iter_mut().chain(b.iter_mut()).enumerate().take(len) {
                    slot.write(data[i]);
                }
                unsafe { chunk.commit_all() };
                len
            });
            counters.write_count.fetch_add(written as u64, Ordering::AcqRel);
        },
        move |err| {
            tracing::error!(%err, "cpal input stream error");
        },
        None,
    )
}

#[cfg(test)]
fn default_test_format() -> AudioFormat {
    AudioFormat::new(SampleFormat::S16Le, 48000, 2, ChannelLayout::stereo()).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "requires audio hardware"]
    fn default_output_opens_a_real_stream() {
        let mut dev = CpalIoDev::default_output(0, default_test_format(), 4096).unwrap();
        dev.open().unwrap();
        assert!(dev.is_open());
    }

    #[test]
    #[ignore = "requires audio hardware"]
    fn default_input_opens_a_real_stream() {
        let mut dev = CpalIoDev::default_input(0, default_test_format(), 4096).unwrap();
        dev.open().unwrap();
        assert!(dev.is_open());
    }
}
