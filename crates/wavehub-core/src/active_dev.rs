//! active_dev — per-attached-hardware-device state and buffer-share
//! accounting (spec.md §4.5, §4.6 state machine)

use std::collections::HashMap;

use crate::dev_stream::DevStream;
use crate::error::{CoreError, CoreResult};
use crate::iodev::IoDev;
use crate::stream::StreamId;

/// `CLOSED -> OPEN_PENDING -> NORMAL_RUN -> DRAINING -> CLOSED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Closed,
    OpenPending,
    NormalRun,
    Draining,
}

/// Tracks, per attached stream, how many bytes it has already contributed
/// to (playback) or consumed from (capture) the device's current fill
/// window. A frame is "done" for the device only once every attached
/// stream has reached the window size.
#[derive(Default)]
pub struct BuffState {
    contributed: HashMap<StreamId, usize>,
}

impl BuffState {
    pub fn record(&mut self, stream: StreamId, bytes: usize, window: usize) -> CoreResult<()> {
        let entry = self.contributed.entry(stream).or_insert(0);
        *entry += bytes;
        if *entry > window {
            return Err(CoreError::WindowExceeded {
                contributed: *entry,
                window,
            });
        }
        Ok(())
    }

    /// `min` over every tracked stream's contribution this window. `None`
    /// if no stream has contributed yet (nothing to commit).
    pub fn min_contribution(&self) -> Option<usize> {
        if self.contributed.is_empty() {
            return None;
        }
        self.contributed.values().copied().min()
    }

    /// Advance the device by `m` bytes: subtract from every entry, drop
    /// entries that reach zero.
    pub fn commit(&mut self, m: usize) {
        self.contributed.retain(|_, v| {
            *v = v.saturating_sub(m);
            *v > 0
        });
    }

    pub fn remove_stream(&mut self, stream: StreamId) {
        self.contributed.remove(&stream);
    }
}

/// An attached hardware device and everything the audio thread needs to
/// schedule it.
pub struct ActiveDev {
    pub iodev: Box<dyn IoDev>,
    pub streams: Vec<DevStream>,
    pub buff_state: BuffState,
    pub state: DeviceState,
    pub wake_ts: i64,
    pub min_cb_level: usize,
    pub max_cb_level: usize,
    consecutive_errors: u32,
}

impl ActiveDev {
    pub fn new(iodev: Box<dyn IoDev>, min_cb_level: usize, max_cb_level: usize) -> Self {
        Self {
            iodev,
            streams: Vec::new(),
            buff_state: BuffState::default(),
            state: DeviceState::Closed,
            wake_ts: 0,
            min_cb_level,
            max_cb_level,
            consecutive_errors: 0,
        }
    }

    pub fn attach_stream(&mut self, dev_stream: DevStream) {
        if matches!(self.state, DeviceState::Closed) {
            self.state = DeviceState::OpenPending;
        }
        self.streams.push(dev_stream);
    }

    pub fn detach_stream(&mut self, stream_id: StreamId) {
        self.streams.retain(|s| s.stream_id != stream_id);
        self.buff_state.remove_stream(stream_id);
        if self.streams.is_empty() && matches!(self.state, DeviceState::NormalRun) {
            self.state = DeviceState::Draining;
        }
    }

    pub fn mark_open(&mut self) {
        if matches!(self.state, DeviceState::OpenPending) {
            self.state = DeviceState::NormalRun;
        }
    }

    /// Record a device-level error. After two consecutive fatal errors the
    /// device is suspended (closed); the caller is responsible for
    /// reattaching streams to the fallback device.
    pub fn record_error(&mut self) -> bool {
        self.consecutive_errors += 1;
        if self.consecutive_errors >= 2 {
            self.state = DeviceState::Closed;
            self.consecutive_errors = 0;
            true
        } else {
            false
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }

    /// Commit the current window: advance the device by the min
    /// contribution across attached streams, per spec.md §4.5/§8.
    pub fn commit_window(&mut self, window: usize) -> usize {
        let m = self.buff_state.min_contribution().unwrap_or(0).min(window);
        self.buff_state.commit(m);
        m
    }
}
