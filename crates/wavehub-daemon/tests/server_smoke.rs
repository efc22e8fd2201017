//! End-to-end control-socket smoke test: a real `Server` bound to a unix
//! socket, a plain `UnixStream` client, and an `AudioThread` backed by
//! `TestIoDev` standing in for hardware.

use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::Duration;

use wavehub_audio::command::channel_pair;
use wavehub_audio::iodevs::TestIoDev;
use wavehub_audio::AudioThread;
use wavehub_core::{ActiveDev, DaemonConfig};
use wavehub_daemon::Server;
use wavehub_proto::{
    read_framed, AudioFormat, ChannelLayout, ClientMessage, Framed, IodevSummary, SampleFormat, ServerMessage, StreamDirection, StreamFlags,
};

fn fmt() -> AudioFormat {
    AudioFormat::new(SampleFormat::S16Le, 48000, 2, ChannelLayout::stereo()).unwrap()
}

/// Receive one fd passed over `SCM_RIGHTS`, mirroring `fd_pass::send_fd` in
/// reverse. Returns an owned fd the caller is responsible for closing.
fn recv_fd(socket: &UnixStream) -> RawFd {
    let mut placeholder = [0u8; 1];
    let mut iov = libc::iovec {
        iov_base: placeholder.as_mut_ptr() as *mut libc::c_void,
        iov_len: placeholder.len(),
    };

    let cmsg_space = unsafe { libc::CMSG_SPACE(mem::size_of::<RawFd>() as u32) } as usize;
    let mut cmsg_buf = vec![0u8; cmsg_space];

    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = cmsg_buf.len() as _;

    let ret = unsafe { libc::recvmsg(socket.as_raw_fd(), &mut msg, 0) };
    assert!(ret >= 0, "recvmsg failed: {}", std::io::Error::last_os_error());

    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        assert!(!cmsg.is_null(), "expected SCM_RIGHTS ancillary data");
        assert_eq!((*cmsg).cmsg_level, libc::SOL_SOCKET);
        assert_eq!((*cmsg).cmsg_type, libc::SCM_RIGHTS);
        std::ptr::read(libc::CMSG_DATA(cmsg) as *const RawFd)
    }
}

#[test]
fn connect_stream_and_set_volume_round_trip_over_the_real_socket() {
    let socket_dir = tempfile::tempdir().unwrap();
    let config = DaemonConfig {
        socket_dir: socket_dir.path().to_string_lossy().into_owned(),
        ..DaemonConfig::default()
    };

    let (cmd_tx, cmd_rx, resp_tx, resp_rx) = channel_pair();
    let mut audio_thread = AudioThread::new(cmd_rx, resp_tx).unwrap();
    let dev = ActiveDev::new(Box::new(TestIoDev::new(0, StreamDirection::Playback, fmt(), 4096)), 0, 4096);
    audio_thread.register_device(0, dev);
    thread::spawn(move || loop {
        if audio_thread.drain_commands().is_err() {
            return;
        }
        thread::sleep(Duration::from_millis(1));
    });

    let summaries = vec![IodevSummary {
        dev_idx: 0,
        name: "playback".to_string(),
        direction: StreamDirection::Playback,
    }];
    let mut server = Server::bind(&config, summaries, cmd_tx, resp_rx).unwrap();
    thread::spawn(move || {
        let _ = server.run();
    });

    // The listener is bound synchronously inside `Server::bind`, but give
    // the server thread a moment to reach its first `poller.wait`.
    thread::sleep(Duration::from_millis(50));

    let socket_path = socket_dir.path().join("wavehub.sock");
    let mut client = UnixStream::connect(&socket_path).unwrap();

    match read_framed::<_, ServerMessage>(&mut client).unwrap() {
        ServerMessage::ClientConnected { client_id } => assert_eq!(client_id, 1),
        other => panic!("unexpected greeting: {other:?}"),
    }

    ClientMessage::ConnectStream {
        direction: StreamDirection::Playback,
        format: fmt(),
        buffer_frames: 4096,
        cb_threshold: 480,
        min_cb_level: 240,
        flags: StreamFlags::empty(),
    }
    .write_to(&mut client)
    .unwrap();

    // The shm fd arrives ahead of the framed acknowledgement (spec.md
    // §4.7's fd hand-off happens before `handle_connect_stream` returns).
    let shm_fd = recv_fd(&client);
    assert!(shm_fd >= 0);
    unsafe {
        let _ = std::fs::File::from_raw_fd(shm_fd);
    }

    let stream_id = match read_framed::<_, ServerMessage>(&mut client).unwrap() {
        ServerMessage::ClientStreamConnected { error, stream_id, negotiated_format, .. } => {
            assert_eq!(error, 0);
            assert_eq!(negotiated_format, fmt());
            stream_id
        }
        other => panic!("unexpected connect-stream reply: {other:?}"),
    };
    assert_ne!(stream_id, 0);

    ClientMessage::SetSystemVolume { volume: 42 }.write_to(&mut client).unwrap();
    match read_framed::<_, ServerMessage>(&mut client).unwrap() {
        ServerMessage::ClientVolumeUpdate { volume, mute, .. } => {
            assert_eq!(volume, 42);
            assert!(!mute);
        }
        other => panic!("unexpected volume reply: {other:?}"),
    }

    ClientMessage::DisconnectStream { stream_id }.write_to(&mut client).unwrap();
}

#[test]
fn connect_stream_with_no_matching_device_reports_enodev() {
    let socket_dir = tempfile::tempdir().unwrap();
    let config = DaemonConfig {
        socket_dir: socket_dir.path().to_string_lossy().into_owned(),
        ..DaemonConfig::default()
    };

    let (cmd_tx, cmd_rx, resp_tx, resp_rx) = channel_pair();
    // No devices registered on the audio thread at all.
    thread::spawn(move || {
        let mut audio_thread = AudioThread::new(cmd_rx, resp_tx).unwrap();
        loop {
            if audio_thread.drain_commands().is_err() {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
    });

    let mut server = Server::bind(&config, Vec::new(), cmd_tx, resp_rx).unwrap();
    thread::spawn(move || {
        let _ = server.run();
    });
    thread::sleep(Duration::from_millis(50));

    let socket_path = socket_dir.path().join("wavehub.sock");
    let mut client = UnixStream::connect(&socket_path).unwrap();
    let _ = read_framed::<_, ServerMessage>(&mut client).unwrap();

    ClientMessage::ConnectStream {
        direction: StreamDirection::Playback,
        format: fmt(),
        buffer_frames: 4096,
        cb_threshold: 480,
        min_cb_level: 240,
        flags: StreamFlags::empty(),
    }
    .write_to(&mut client)
    .unwrap();

    match read_framed::<_, ServerMessage>(&mut client).unwrap() {
        ServerMessage::ClientStreamConnected { error, stream_id, .. } => {
            assert_eq!(error, -(libc::ENODEV));
            assert_eq!(stream_id, 0);
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}
