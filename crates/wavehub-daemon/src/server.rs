//! Control thread: unix-socket server and message dispatcher (spec.md §4.7)
//!
//! Owns the listening socket and every connected client's socket in one
//! `polling::Poller`-multiplexed loop (spec.md §5's "control thread
//! suspends in its own multiplexed wait"). Because the audio thread is
//! reached through `crossbeam_channel` rather than a real pipe fd, this
//! loop also polls with a bounded timeout so unsolicited
//! [`AudioResponse`]s are drained promptly even when no client socket is
//! ready, and so clients that connect but never send a first message get
//! reaped on their connect timeout.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::time::Duration;

use polling::{Event, Events, Poller};

use wavehub_core::{DaemonConfig, Rstream, StreamId};
use wavehub_proto::{audio_socket_path, ClientMessage, Framed, IodevSummary, NodeId, ServerMessage, StreamDirection, read_framed};
use wavehub_shm::{ServerStateShm, ServerStateSnapshot, ShmConfig, StreamShm};

use wavehub_audio::{AudioCommand, AudioResponse, CommandSender, ResponseReceiver};

use crate::clock::now_ns;
use crate::error::{DaemonError, DaemonResult};
use crate::fd_pass::send_fd;
use crate::rclient::RClient;

const LISTENER_KEY: usize = usize::MAX;
const POLL_TIMEOUT: Duration = Duration::from_millis(50);
/// Accept-to-first-message window: a client that connects but never sends
/// a message is dropped after this long.
const CONNECT_TIMEOUT_NS: i64 = 500_000_000;

/// Owns the server socket and dispatches client messages (spec.md §4.7).
pub struct Server {
    listener: UnixListener,
    poller: Poller,
    clients: HashMap<RawFd, RClient>,
    next_client_id: u32,
    next_stream_counter: HashMap<u32, u32>,
    next_response_id: u64,
    devices: Vec<IodevSummary>,
    node_volumes: HashMap<(u32, u32), u32>,
    state: ServerStateShm,
    cmd_tx: CommandSender,
    resp_rx: ResponseReceiver,
    socket_path: PathBuf,
    socket_dir: String,
    shutdown: bool,
}

impl Server {
    pub fn bind(config: &DaemonConfig, devices: Vec<IodevSummary>, cmd_tx: CommandSender, resp_rx: ResponseReceiver) -> DaemonResult<Self> {
        fs::create_dir_all(&config.socket_dir)?;
        let socket_path = PathBuf::from(&config.socket_dir).join("wavehub.sock");
        // Stale socket from a crashed prior instance; bind fails otherwise.
        let _ = fs::remove_file(&socket_path);

        let listener = UnixListener::bind(&socket_path).map_err(|source| DaemonError::BindFailed {
            path: socket_path.display().to_string(),
            source,
        })?;
        listener.set_nonblocking(true)?;

        let poller = Poller::new().map_err(DaemonError::Poller)?;
        unsafe {
            poller.add(listener.as_raw_fd(), Event::readable(LISTENER_KEY)).map_err(DaemonError::Poller)?;
        }

        Ok(Self {
            listener,
            poller,
            clients: HashMap::new(),
            next_client_id: 1,
            next_stream_counter: HashMap::new(),
            next_response_id: 1,
            devices,
            node_volumes: HashMap::new(),
            state: ServerStateShm::new(ServerStateSnapshot::default()),
            cmd_tx,
            resp_rx,
            socket_path,
            socket_dir: config.socket_dir.clone(),
            shutdown: false,
        })
    }

    /// Run the dispatch loop until `shutdown` is requested or a fatal
    /// poller error occurs.
    pub fn run(&mut self) -> DaemonResult<()> {
        let mut events = Events::new();
        while !self.shutdown {
            events.clear();
            self.poller.wait(&mut events, Some(POLL_TIMEOUT)).map_err(DaemonError::Poller)?;

            let keys: Vec<usize> = events.iter().map(|ev| ev.key).collect();
            for key in keys {
                if key == LISTENER_KEY {
                    self.accept_pending()?;
                } else {
                    self.service_client(key as RawFd);
                }
            }
            self.drain_audio_responses()?;
            self.reap_stale_clients();
        }
        Ok(())
    }

    /// Drop any client still waiting on its connect timeout (spec.md §5's
    /// "~500ms default" connect window, supplemented per SPEC_FULL.md §6).
    fn reap_stale_clients(&mut self) {
        let now = now_ns();
        let stale: Vec<RawFd> = self
            .clients
            .iter()
            .filter(|(_, c)| !c.greeted && now - c.connected_at > CONNECT_TIMEOUT_NS)
            .map(|(fd, _)| *fd)
            .collect();
        for fd in stale {
            tracing::info!(fd, "client connect timed out without sending a message");
            self.disconnect_client(fd);
        }
    }

    pub fn request_shutdown(&mut self) {
        self.shutdown = true;
    }

    fn accept_pending(&mut self) -> DaemonResult<()> {
        loop {
            match self.listener.accept() {
                Ok((socket, _addr)) => self.on_accept(socket)?,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        // polling is one-shot per `wait`; re-arm for the next round.
        self.poller
            .modify(self.listener.as_raw_fd(), Event::readable(LISTENER_KEY))
            .map_err(DaemonError::Poller)?;
        Ok(())
    }

    fn on_accept(&mut self, socket: UnixStream) -> DaemonResult<()> {
        // Blocking per-connection: the poller only tells us a message is
        // pending, the read itself is a small framed message.
        socket.set_nonblocking(false)?;
        let fd = socket.as_raw_fd();
        let client_id = self.next_client_id;
        self.next_client_id += 1;

        unsafe {
            self.poller.add(fd, Event::readable(fd as usize)).map_err(DaemonError::Poller)?;
        }

        let mut client = RClient::new(client_id, socket, now_ns());
        ServerMessage::ClientConnected { client_id }.write_to(&mut client.socket)?;
        self.clients.insert(fd, client);
        tracing::info!(client_id, "client connected");
        Ok(())
    }

    fn service_client(&mut self, fd: RawFd) {
        let Some(client) = self.clients.get_mut(&fd) else { return };
        let msg: ClientMessage = match read_framed(&mut client.socket) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::info!(fd, %err, "client disconnected");
                self.disconnect_client(fd);
                return;
            }
        };

        if let Some(client) = self.clients.get_mut(&fd) {
            client.greeted = true;
        }

        if let Err(err) = self.dispatch(fd, msg) {
            tracing::warn!(fd, %err, "dropping client after dispatch failure");
            self.disconnect_client(fd);
            return;
        }

        // Still connected: re-arm for the next message.
        if self.clients.contains_key(&fd) {
            if let Err(err) = self.poller.modify(fd, Event::readable(fd as usize)) {
                tracing::warn!(fd, %err, "failed to re-arm client socket");
                self.disconnect_client(fd);
            }
        }
    }

    fn disconnect_client(&mut self, fd: RawFd) {
        let _ = self.poller.delete(fd);
        if let Some(client) = self.clients.remove(&fd) {
            for stream_id in client.streams {
                let response_id = self.alloc_response_id();
                let _ = self.cmd_tx.send(AudioCommand::RemoveStream { stream_id, response_id });
            }
        }
    }

    fn dispatch(&mut self, fd: RawFd, msg: ClientMessage) -> DaemonResult<()> {
        let reply = match msg {
            ClientMessage::ConnectStream {
                direction,
                format,
                buffer_frames,
                cb_threshold,
                min_cb_level,
                flags,
            } => {
                self.handle_connect_stream(fd, direction, format, buffer_frames, cb_threshold, min_cb_level, flags)?;
                None
            }
            ClientMessage::DisconnectStream { stream_id } => {
                self.handle_disconnect_stream(fd, stream_id)?;
                None
            }
            ClientMessage::SwitchStreamTypeIodev { stream_id, iodev_idx } => self.handle_switch_device(fd, stream_id, iodev_idx)?,
            ClientMessage::SetSystemVolume { volume } => Some(self.handle_set_volume(volume)),
            ClientMessage::SetSystemMute { mute, locked: _ } => Some(self.handle_set_mute(mute)),
            ClientMessage::SetSystemCaptureGain { gain } => Some(self.handle_set_capture_gain(gain)),
            ClientMessage::SetSystemCaptureMute { mute, locked: _ } => Some(self.handle_set_capture_mute(mute)),
            ClientMessage::ReloadDsp => {
                tracing::debug!("RELOAD_DSP requested; DSP config loading is out of scope");
                None
            }
            ClientMessage::DumpDsp => {
                tracing::debug!("DUMP_DSP requested; DSP config loading is out of scope");
                None
            }
            ClientMessage::SelectNode { direction: _, node_id } => self.handle_select_node(node_id)?,
            ClientMessage::SetNodeAttr { node_id, attr } => {
                self.handle_set_node_attr(node_id, attr)?;
                None
            }
            ClientMessage::SetNodeVolume { node_id, volume } => {
                self.node_volumes.insert((node_id.dev_idx, node_id.node_idx), volume);
                None
            }
        };

        if let Some(reply) = reply {
            if let Some(client) = self.clients.get_mut(&fd) {
                reply.write_to(&mut client.socket)?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_connect_stream(
        &mut self,
        fd: RawFd,
        direction: StreamDirection,
        format: wavehub_proto::AudioFormat,
        buffer_frames: u32,
        cb_threshold: u32,
        min_cb_level: u32,
        flags: wavehub_proto::StreamFlags,
    ) -> DaemonResult<()> {
        let client_id = self.clients.get(&fd).map(|c| c.id).ok_or(DaemonError::ClientNotFound(0))?;

        let Some(dev_idx) = self.pick_device(direction) else {
            return self.reply_connect_stream(fd, 0, -(libc::ENODEV), format, buffer_frames, cb_threshold);
        };

        let counter = self.next_stream_counter.entry(client_id).or_insert(0);
        let stream_id = StreamId::new(client_id, *counter);
        *counter += 1;

        // Bind the per-stream audio side channel ahead of telling the
        // client its stream id, so the path is ready the instant the
        // client can derive it (spec.md §2 core subsystem #3, §6).
        let audio_path = audio_socket_path(&self.socket_dir, "aud", stream_id.as_u64());
        let _ = fs::remove_file(&audio_path);
        let audio_listener = UnixListener::bind(&audio_path)?;
        audio_listener.set_nonblocking(true)?;

        let frame_bytes = format.frame_bytes();
        let used_size = (buffer_frames as usize * frame_bytes).max(frame_bytes).next_power_of_two();
        let shm = StreamShm::create(ShmConfig {
            frame_bytes,
            used_size,
            num_channels: format.num_channels,
            frame_rate: format.frame_rate,
            channel_layout: format.channel_layout,
        })?;
        let shm_fd = shm.as_raw_fd();

        let now = now_ns();
        let rstream = Rstream {
            id: stream_id,
            direction,
            format,
            buffer_frames: buffer_frames as usize,
            cb_threshold: cb_threshold as usize,
            min_cb_level: min_cb_level as usize,
            flags,
            shm,
            next_cb_ts: now,
            last_fetched_cb_ts: now,
            audio_socket: None,
        };

        let response_id = self.alloc_response_id();
        self.cmd_tx
            .send(AudioCommand::AddStream {
                dev_idx,
                stream: Box::new(rstream),
                response_id,
            })
            .map_err(|_| DaemonError::AudioChannelClosed)?;
        let (got_id, error) = self.wait_for_stream_added(response_id)?;

        if error != 0 {
            let _ = fs::remove_file(&audio_path);
            return self.reply_connect_stream(fd, 0, error, format, buffer_frames, cb_threshold);
        }

        if let Some(client) = self.clients.get_mut(&fd) {
            client.streams.push(got_id);
            send_fd(&client.socket, shm_fd)?;
        }
        self.state.update(|s| s.num_streams_attached += 1);
        self.reply_connect_stream(fd, got_id.as_u64(), 0, format, buffer_frames, cb_threshold)?;

        // The client connects to `audio_path` right after parsing that
        // reply; accept it within the same connect window used for the
        // control socket's own greeting.
        match Self::accept_with_timeout(&audio_listener, CONNECT_TIMEOUT_NS) {
            Ok(socket) => {
                let _ = self
                    .cmd_tx
                    .send(AudioCommand::AttachAudioSocket { stream_id: got_id, socket });
            }
            Err(err) => {
                tracing::warn!(?got_id, %err, "client never connected its audio side channel");
            }
        }
        let _ = fs::remove_file(&audio_path);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn reply_connect_stream(
        &mut self,
        fd: RawFd,
        stream_id: u64,
        error: i32,
        negotiated_format: wavehub_proto::AudioFormat,
        buffer_frames: u32,
        cb_threshold: u32,
    ) -> DaemonResult<()> {
        if let Some(client) = self.clients.get_mut(&fd) {
            ServerMessage::ClientStreamConnected {
                stream_id,
                error,
                shm_key: stream_id,
                negotiated_format,
                buffer_frames,
                cb_threshold,
            }
            .write_to(&mut client.socket)?;
        }
        Ok(())
    }

    /// Poll-accept with a bounded deadline; the listener was already set
    /// nonblocking by the caller.
    fn accept_with_timeout(listener: &UnixListener, timeout_ns: i64) -> io::Result<UnixStream> {
        let deadline = now_ns() + timeout_ns;
        loop {
            match listener.accept() {
                Ok((socket, _addr)) => return Ok(socket),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if now_ns() > deadline {
                        return Err(io::Error::new(io::ErrorKind::TimedOut, "audio socket connect timed out"));
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn handle_disconnect_stream(&mut self, fd: RawFd, wire_stream_id: u64) -> DaemonResult<()> {
        let Some(stream_id) = self.resolve_stream(fd, wire_stream_id) else {
            tracing::warn!(wire_stream_id, "disconnect for unknown stream");
            return Ok(());
        };
        let response_id = self.alloc_response_id();
        self.cmd_tx
            .send(AudioCommand::RemoveStream { stream_id, response_id })
            .map_err(|_| DaemonError::AudioChannelClosed)?;
        self.wait_for_ack(response_id)?;

        if let Some(client) = self.clients.get_mut(&fd) {
            client.streams.retain(|s| *s != stream_id);
        }
        self.state.update(|s| s.num_streams_attached = s.num_streams_attached.saturating_sub(1));
        Ok(())
    }

    fn handle_switch_device(&mut self, fd: RawFd, wire_stream_id: u64, iodev_idx: u32) -> DaemonResult<Option<ServerMessage>> {
        let Some(stream_id) = self.resolve_stream(fd, wire_stream_id) else {
            return Ok(None);
        };
        let response_id = self.alloc_response_id();
        self.cmd_tx
            .send(AudioCommand::SwitchStreamDevice {
                stream_id,
                dev_idx: iodev_idx,
                response_id,
            })
            .map_err(|_| DaemonError::AudioChannelClosed)?;
        let error = self.wait_for_ack(response_id)?;
        if error != 0 {
            return Ok(None);
        }
        Ok(Some(ServerMessage::ClientStreamReattach {
            stream_id: stream_id.as_u64(),
            iodev_idx,
        }))
    }

    fn handle_set_volume(&mut self, volume: u32) -> ServerMessage {
        let volume = volume.min(100);
        let scaler = volume as f32 / 100.0;
        self.state.update(|s| s.volume = scaler);
        let _ = self.cmd_tx.send(AudioCommand::SetSystemVolume { volume: scaler });
        self.volume_update_message()
    }

    fn handle_set_mute(&mut self, mute: bool) -> ServerMessage {
        self.state.update(|s| s.mute = mute);
        let _ = self.cmd_tx.send(AudioCommand::SetSystemMute { mute });
        self.volume_update_message()
    }

    fn handle_set_capture_gain(&mut self, gain: i32) -> ServerMessage {
        self.state.update(|s| s.capture_gain = gain as f32);
        self.volume_update_message()
    }

    fn handle_set_capture_mute(&mut self, mute: bool) -> ServerMessage {
        self.state.update(|s| s.capture_mute = mute);
        self.volume_update_message()
    }

    fn handle_select_node(&mut self, node_id: NodeId) -> DaemonResult<Option<ServerMessage>> {
        let response_id = self.alloc_response_id();
        self.cmd_tx
            .send(AudioCommand::SelectNode {
                dev_idx: node_id.dev_idx,
                node_idx: node_id.node_idx,
                response_id,
            })
            .map_err(|_| DaemonError::AudioChannelClosed)?;
        let error = self.wait_for_ack(response_id)?;
        if error != 0 {
            return Ok(None);
        }
        Ok(Some(ServerMessage::ClientIodevList { devices: self.devices.clone() }))
    }

    fn handle_set_node_attr(&mut self, node_id: NodeId, attr: wavehub_proto::NodeAttr) -> DaemonResult<()> {
        let response_id = self.alloc_response_id();
        self.cmd_tx
            .send(AudioCommand::SetNodeAttr {
                dev_idx: node_id.dev_idx,
                node_idx: node_id.node_idx,
                attr,
                response_id,
            })
            .map_err(|_| DaemonError::AudioChannelClosed)?;
        self.wait_for_ack(response_id)?;
        Ok(())
    }

    fn volume_update_message(&self) -> ServerMessage {
        let snap = self.state.read().unwrap_or_default();
        ServerMessage::ClientVolumeUpdate {
            volume: (snap.volume * 100.0).round() as u32,
            mute: snap.mute,
            capture_gain: snap.capture_gain as i32,
            capture_mute: snap.capture_mute,
        }
    }

    fn pick_device(&self, direction: StreamDirection) -> Option<u32> {
        self.devices.iter().find(|d| d.direction == direction).map(|d| d.dev_idx)
    }

    fn resolve_stream(&self, fd: RawFd, wire_stream_id: u64) -> Option<StreamId> {
        self.clients.get(&fd)?.streams.iter().copied().find(|s| s.as_u64() == wire_stream_id)
    }

    fn alloc_response_id(&mut self) -> u64 {
        let id = self.next_response_id;
        self.next_response_id += 1;
        id
    }

    /// Block until the `StreamAdded` matching `response_id` arrives,
    /// processing any unsolicited responses that interleave (spec.md §5:
    /// synchronous commands are acknowledged before the next is sent, but
    /// the audio thread may still post unsolicited events in between).
    fn wait_for_stream_added(&mut self, response_id: u64) -> DaemonResult<(StreamId, i32)> {
        loop {
            match self.resp_rx.recv().map_err(|_| DaemonError::AudioChannelClosed)? {
                AudioResponse::StreamAdded { response_id: rid, stream_id, error } if rid == response_id => {
                    return Ok((stream_id, error));
                }
                other => self.handle_unsolicited(other),
            }
        }
    }

    fn wait_for_ack(&mut self, response_id: u64) -> DaemonResult<i32> {
        loop {
            match self.resp_rx.recv().map_err(|_| DaemonError::AudioChannelClosed)? {
                AudioResponse::Ack { response_id: rid, error } if rid == response_id => return Ok(error),
                other => self.handle_unsolicited(other),
            }
        }
    }

    /// Drain whatever the audio thread has posted without blocking, so
    /// unsolicited events (reattach, suspend, disconnect) are serviced
    /// even when no client socket woke the poller.
    fn drain_audio_responses(&mut self) -> DaemonResult<()> {
        loop {
            match self.resp_rx.try_recv() {
                Ok(resp) => self.handle_unsolicited(resp),
                Err(crossbeam_channel::TryRecvError::Empty) => return Ok(()),
                Err(crossbeam_channel::TryRecvError::Disconnected) => return Err(DaemonError::AudioChannelClosed),
            }
        }
    }

    fn handle_unsolicited(&mut self, resp: AudioResponse) {
        match resp {
            AudioResponse::StreamDisconnected { stream_id, error } => {
                tracing::info!(?stream_id, error, "stream disconnected by audio thread");
                for client in self.clients.values_mut() {
                    client.streams.retain(|s| *s != stream_id);
                }
            }
            AudioResponse::StreamReattached { stream_id, dev_idx } => {
                tracing::info!(?stream_id, dev_idx, "stream reattached to fallback device");
                if let Some(client) = self.clients.values_mut().find(|c| c.streams.contains(&stream_id)) {
                    let _ = ServerMessage::ClientStreamReattach {
                        stream_id: stream_id.as_u64(),
                        iodev_idx: dev_idx,
                    }
                    .write_to(&mut client.socket);
                }
            }
            AudioResponse::DeviceSuspended { dev_idx } => {
                tracing::warn!(dev_idx, "device suspended after repeated errors");
            }
            AudioResponse::Ack { .. } | AudioResponse::StreamAdded { .. } => {
                tracing::trace!("dropped stale synchronous response with no waiter");
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.socket_path);
    }
}
