//! rstream / StreamId (spec.md §3)

use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use wavehub_proto::{AudioFormat, StreamDirection, StreamFlags};
use wavehub_shm::StreamShm;

/// `(client_id, per-client stream counter)`, unique across the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId {
    pub client_id: u32,
    pub counter: u32,
}

impl StreamId {
    pub fn new(client_id: u32, counter: u32) -> Self {
        Self { client_id, counter }
    }

    pub fn as_u64(self) -> u64 {
        ((self.client_id as u64) << 32) | self.counter as u64
    }
}

/// A registered stream, owned exclusively by the [`crate::registry::StreamRegistry`].
pub struct Rstream {
    pub id: StreamId,
    pub direction: StreamDirection,
    pub format: AudioFormat,
    pub buffer_frames: usize,
    pub cb_threshold: usize,
    pub min_cb_level: usize,
    pub flags: StreamFlags,
    pub shm: StreamShm,
    /// Monotonic nanosecond deadline for this stream's next callback.
    pub next_cb_ts: i64,
    pub last_fetched_cb_ts: i64,
    /// The per-stream audio side channel (spec.md §2 core subsystem #3,
    /// §6), connected by the client once it learns its stream id. `None`
    /// until the control thread hands the accepted connection over to the
    /// audio thread via `AttachAudioSocket`; a stream with no connection
    /// yet simply falls back to device-rate wake timing.
    pub audio_socket: Option<UnixStream>,
}

impl Rstream {
    pub fn is_hotword(&self) -> bool {
        self.flags.contains(StreamFlags::HOTWORD)
    }

    /// Raw fd of the audio side channel, for registering with a poller.
    pub fn audio_socket_fd(&self) -> Option<RawFd> {
        self.audio_socket.as_ref().map(|s| s.as_raw_fd())
    }

    /// Frames currently unconsumed in this stream's shm, in stream-rate frames.
    pub fn frames_in_shm(&self) -> usize {
        let Some(view) = self.shm.read() else {
            return 0;
        };
        let frame_bytes = self.format.frame_bytes().max(1);
        view.available() / frame_bytes
    }

    /// Advance `next_cb_ts` by exactly `cb_threshold / rate` after a
    /// successful fill/drain (spec.md §4.4, §8 boundary behavior).
    pub fn advance_next_cb_ts(&mut self, rate: u32) {
        let period_ns = (self.cb_threshold as i64 * 1_000_000_000) / rate.max(1) as i64;
        self.next_cb_ts = self.next_cb_ts.max(self.last_fetched_cb_ts) + period_ns;
    }
}
