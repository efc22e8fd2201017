//! wavehubd — process entry point (spec.md §4.7, §6 exit codes)

use std::thread;

use tracing_subscriber::EnvFilter;

use wavehub_audio::iodevs::{CpalIoDev, EmptyIoDev};
use wavehub_audio::{command::channel_pair, AudioThread};
use wavehub_core::{ActiveDev, DaemonConfig};
use wavehub_proto::{AudioFormat, ChannelLayout, IodevSummary, SampleFormat, StreamDirection};

use wavehub_daemon::Server;

const EXIT_FATAL_INIT: i32 = 1;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = DaemonConfig::default();
    if let Err(err) = config.validate() {
        tracing::error!(%err, "invalid daemon configuration");
        std::process::exit(EXIT_FATAL_INIT);
    }

    let (cmd_tx, cmd_rx, resp_tx, resp_rx) = channel_pair();

    let (devices, summaries) = build_devices(&config);

    let audio_handle = thread::Builder::new().name("wavehub-audio".into()).spawn(move || {
        let mut audio_thread = match AudioThread::new(cmd_rx, resp_tx) {
            Ok(thread) => thread,
            Err(err) => {
                tracing::error!(%err, "failed to initialize audio thread");
                std::process::exit(EXIT_FATAL_INIT);
            }
        };
        for (dev_idx, active_dev) in devices {
            audio_thread.register_device(dev_idx, active_dev);
        }
        run_audio_loop(audio_thread);
    });

    let audio_handle = match audio_handle {
        Ok(handle) => handle,
        Err(err) => {
            tracing::error!(%err, "failed to spawn audio thread");
            std::process::exit(EXIT_FATAL_INIT);
        }
    };

    let mut server = match Server::bind(&config, summaries, cmd_tx, resp_rx) {
        Ok(server) => server,
        Err(err) => {
            tracing::error!(%err, "failed to bind control socket");
            std::process::exit(EXIT_FATAL_INIT);
        }
    };

    tracing::info!(socket_dir = %config.socket_dir, "wavehub daemon listening");
    if let Err(err) = server.run() {
        tracing::error!(%err, "control thread exited with error");
        std::process::exit(EXIT_FATAL_INIT);
    }

    drop(audio_handle);
}

/// Cooperative audio-thread main loop (spec.md §4.6/§5): drain commands,
/// then idle for the computed deadline. Real device callbacks (cpal, the
/// loopback push) advance frame accounting asynchronously; this loop only
/// owns scheduling and command dispatch.
fn run_audio_loop(mut audio_thread: AudioThread) {
    let start = std::time::Instant::now();
    loop {
        if let Err(err) = audio_thread.drain_commands() {
            tracing::warn!(%err, "audio command channel closed; shutting down audio thread");
            return;
        }
        let now = start.elapsed().as_nanos() as i64;
        let wake = audio_thread.next_wake(now);
        if let Err(err) = audio_thread.wait_for_audio_sockets(now, wake) {
            tracing::warn!(%err, "audio socket poll failed; falling back to sleep");
            let sleep_ns = (wake - now).max(0);
            std::thread::sleep(std::time::Duration::from_nanos(sleep_ns as u64));
        }
    }
}

fn default_playback_format(config: &DaemonConfig) -> AudioFormat {
    AudioFormat::new(
        SampleFormat::S16Le,
        config.playback.sample_rate,
        config.playback.channels,
        ChannelLayout::stereo(),
    )
    .expect("default playback format is always valid")
}

fn default_capture_format(config: &DaemonConfig) -> AudioFormat {
    AudioFormat::new(
        SampleFormat::S16Le,
        config.capture.sample_rate,
        config.capture.channels,
        ChannelLayout::stereo(),
    )
    .expect("default capture format is always valid")
}

/// Build the initial device list: a real output/input device when
/// hardware is available, an always-on `EmptyIoDev` fallback otherwise.
/// Per spec.md §7, fallback device creation failing is the one fatal
/// daemon error in this path; `EmptyIoDev` is infallible, so it never
/// actually triggers here.
fn build_devices(config: &DaemonConfig) -> (Vec<(u32, ActiveDev)>, Vec<IodevSummary>) {
    let mut devices = Vec::new();
    let mut summaries = Vec::new();

    let playback_format = default_playback_format(config);
    let playback_iodev: Box<dyn wavehub_core::IoDev> = match CpalIoDev::default_output(0, playback_format, config.playback.buffer_frames) {
        Ok(dev) => Box::new(dev),
        Err(err) => {
            tracing::warn!(%err, "no playback hardware found, using silent fallback");
            Box::new(EmptyIoDev::new(0, StreamDirection::Playback))
        }
    };
    summaries.push(IodevSummary {
        dev_idx: 0,
        name: "playback".to_string(),
        direction: StreamDirection::Playback,
    });
    devices.push((0, ActiveDev::new(playback_iodev, config.playback.min_cb_level, config.playback.buffer_frames)));

    let capture_format = default_capture_format(config);
    let capture_iodev: Box<dyn wavehub_core::IoDev> = match CpalIoDev::default_input(1, capture_format, config.capture.buffer_frames) {
        Ok(dev) => Box::new(dev),
        Err(err) => {
            tracing::warn!(%err, "no capture hardware found, using silent fallback");
            Box::new(EmptyIoDev::new(1, StreamDirection::Capture))
        }
    };
    summaries.push(IodevSummary {
        dev_idx: 1,
        name: "capture".to_string(),
        direction: StreamDirection::Capture,
    });
    devices.push((1, ActiveDev::new(capture_iodev, config.capture.min_cb_level, config.capture.buffer_frames)));

    (devices, summaries)
}
