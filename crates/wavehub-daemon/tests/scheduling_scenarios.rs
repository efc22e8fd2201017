//! End-to-end wake-time scheduling scenarios, driven through the same
//! command/response channel the control thread uses against a real
//! `AudioThread` + `TestIoDev`, rather than calling `compute_device_wake`
//! directly. This exercises the full path: shm frame accounting, the
//! stream/device format converter, and the scheduler.

use wavehub_audio::command::channel_pair;
use wavehub_audio::iodevs::TestIoDev;
use wavehub_audio::{AudioCommand, AudioResponse, AudioThread};
use wavehub_core::{ActiveDev, Rstream, StreamId};
use wavehub_proto::{AudioFormat, ChannelLayout, SampleFormat, StreamDirection, StreamFlags};
use wavehub_shm::{ShmConfig, StreamShm};

fn fmt(rate: u32) -> AudioFormat {
    AudioFormat::new(SampleFormat::S16Le, rate, 2, ChannelLayout::stereo()).unwrap()
}

#[allow(clippy::too_many_arguments)]
fn stream(id: StreamId, rate: u32, cb_threshold: usize, frames_present: usize, next_cb_ts: i64, hotword: bool) -> Rstream {
    let format = fmt(rate);
    let shm = StreamShm::create(ShmConfig {
        frame_bytes: format.frame_bytes(),
        used_size: 16384,
        num_channels: format.num_channels,
        frame_rate: format.frame_rate,
        channel_layout: format.channel_layout,
    })
    .unwrap();
    if frames_present > 0 {
        let bytes = frames_present * format.frame_bytes();
        let mut guard = shm.begin_write();
        guard.bytes()[..bytes].fill(0);
        guard.commit(bytes, 0).unwrap();
    }
    Rstream {
        id,
        direction: StreamDirection::Playback,
        format,
        buffer_frames: (cb_threshold.max(frames_present) + 1) * 2,
        cb_threshold,
        min_cb_level: 0,
        flags: if hotword { StreamFlags::HOTWORD } else { StreamFlags::empty() },
        shm,
        next_cb_ts,
        last_fetched_cb_ts: next_cb_ts,
        audio_socket: None,
    }
}

fn thread_with_device(dev_rate: u32) -> (AudioThread, crossbeam_channel::Sender<AudioCommand>, crossbeam_channel::Receiver<AudioResponse>) {
    let (cmd_tx, cmd_rx, resp_tx, resp_rx) = channel_pair();
    let mut thread = AudioThread::new(cmd_rx, resp_tx).unwrap();
    let dev = ActiveDev::new(Box::new(TestIoDev::new(0, StreamDirection::Playback, fmt(dev_rate), 8192)), 0, 8192);
    thread.register_device(0, dev);
    (thread, cmd_tx, resp_rx)
}

fn add(
    thread: &mut AudioThread,
    cmd_tx: &crossbeam_channel::Sender<AudioCommand>,
    resp_rx: &crossbeam_channel::Receiver<AudioResponse>,
    stream: Rstream,
    response_id: u64,
) {
    let id = stream.id;
    cmd_tx
        .send(AudioCommand::AddStream { dev_idx: 0, stream: Box::new(stream), response_id })
        .unwrap();
    thread.drain_commands().unwrap();
    match resp_rx.try_recv().unwrap() {
        AudioResponse::StreamAdded { error, stream_id, .. } => {
            assert_eq!(error, 0);
            assert_eq!(stream_id, id);
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

/// Scenario 1: WaitAfterFill. A stream with nothing buffered yet, same
/// rate as its device, waits exactly one full callback period.
#[test]
fn wait_after_fill() {
    let (mut thread, cmd_tx, resp_rx) = thread_with_device(48000);
    add(&mut thread, &cmd_tx, &resp_rx, stream(StreamId::new(1, 0), 48000, 480, 0, 10_000_000, false), 1);

    assert_eq!(thread.next_wake(0), 10_000_000);
}

/// Scenario 2: WaitAfterFillSRC. Same as above but the stream runs at
/// 44.1kHz against a 48kHz device; the converted frame count still lands
/// close to one period.
#[test]
fn wait_after_fill_src() {
    let (mut thread, cmd_tx, resp_rx) = thread_with_device(48000);
    add(&mut thread, &cmd_tx, &resp_rx, stream(StreamId::new(1, 0), 44100, 441, 0, 10_000_000, false), 1);

    let wake = thread.next_wake(0);
    assert!(wake > 9_900_000 && wake < 10_100_000, "wake={wake}");
}

/// Scenario 3: WaitTwoStreamsSameFormat. One stream already full (ready),
/// one half-full (not ready); the device must wait for the laggard.
#[test]
fn wait_two_streams_same_format() {
    let (mut thread, cmd_tx, resp_rx) = thread_with_device(48000);
    add(&mut thread, &cmd_tx, &resp_rx, stream(StreamId::new(1, 0), 48000, 480, 480, 0, false), 1);
    add(&mut thread, &cmd_tx, &resp_rx, stream(StreamId::new(1, 1), 48000, 480, 240, 0, false), 2);

    let wake = thread.next_wake(0);
    assert!(wake > 4_900_000 && wake < 5_100_000, "wake={wake}");
}

/// Scenario 6: HotwordStreamUseDevTiming. A HOTWORD stream below its
/// threshold still uses device-rate timing, folding in one extra
/// callback period's worth of lookahead.
#[test]
fn hotword_stream_use_dev_timing() {
    let (mut thread, cmd_tx, resp_rx) = thread_with_device(48000);
    add(&mut thread, &cmd_tx, &resp_rx, stream(StreamId::new(1, 0), 48000, 240, 192, 3_000_000, true), 1);

    assert_eq!(thread.next_wake(0), 6_000_000);
}

/// Scenario 7: HotwordStreamBulkData. A HOTWORD stream already at or past
/// its threshold stops using device timing and floors at the idle
/// deadline, since its own socket readability drives the real wake.
#[test]
fn hotword_stream_bulk_data() {
    let (mut thread, cmd_tx, resp_rx) = thread_with_device(48000);
    add(&mut thread, &cmd_tx, &resp_rx, stream(StreamId::new(1, 0), 48000, 240, 480, 3_000_000, true), 1);

    let wake = thread.next_wake(0);
    assert!(wake > 19_000_000_000 && wake < 21_000_000_000, "wake={wake}");
}

/// A registered device with no attached streams yet reports `now` as its
/// own wake (nothing to wait for), rather than panicking on an empty
/// stream list.
#[test]
fn device_with_no_streams_reports_now() {
    let (thread, _cmd_tx, _resp_rx) = thread_with_device(48000);
    assert_eq!(thread.next_wake(1_000), 1_000);
}
