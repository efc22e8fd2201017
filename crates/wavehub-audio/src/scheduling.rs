//! Wake-Time Scheduling (spec.md §4.6)
//!
//! Pure, unit-testable core of the audio thread's "compute next deadline"
//! step. Everything here operates on already-converted device-rate frame
//! counts; `AudioThread` is responsible for running each attached stream's
//! converter (`wavehub_core::DevStream`) to produce those counts before
//! calling in here — this module has no knowledge of shm, cpal, or sockets.
//!
//! Per-device wake combines two regimes:
//! - If any attached stream still needs more frames before it reaches its
//!   `cb_threshold` ("not ready"), the device cannot commit its shared fill
//!   window (spec.md §4.5's buffer-share accounting) until the *slowest*
//!   such stream catches up — so the not-ready set contributes its `max`.
//! - If every attached stream already has enough (the window is simply
//!   waiting on each stream's own pacing), the device only needs to wake
//!   for whichever stream's `next_cb_ts` comes first — the ready set
//!   contributes its `min`.
//!
//! HOTWORD streams below `cb_threshold` use the same not-ready regime but
//! with one extra `cb_threshold` of device-rate frames folded in, so the
//! predicted wake covers the *following* buffer period too, not just the
//! immediate shortfall — this is what keeps the prediction correct right
//! up to the moment device timing hands off to socket-driven wake. At or
//! above `cb_threshold` a HOTWORD stream stops contributing device timing
//! at all and instead floors its candidate at `HOTWORD_IDLE_DEADLINE`,
//! relying on its audio socket's readability to drive the real wake.

use wavehub_core::StreamId;

/// Default floor for a HOTWORD stream once it has suspended device-driven
/// timing (spec.md §4.6, SPEC_FULL.md §6).
pub const HOTWORD_IDLE_DEADLINE_NS: i64 = 20_000_000_000;

/// One attached stream's scheduling state, in device-rate terms.
pub struct StreamSchedInfo {
    pub stream_id: StreamId,
    pub next_cb_ts: i64,
    pub is_hotword: bool,
    /// Stream-rate frames currently sitting in shm.
    pub frames_present: usize,
    /// Stream-rate `cb_threshold`.
    pub cb_threshold: usize,
    /// `(cb_threshold - frames_present)` converted to device-rate frames
    /// by the caller's converter; zero if already at or above threshold.
    pub needed_dev_frames: usize,
    /// `cb_threshold` converted to device-rate frames by the caller's
    /// converter (used only for the HOTWORD lookahead term).
    pub cb_threshold_dev_frames: usize,
}

fn frames_to_ns(frames: i64, rate: i64) -> i64 {
    (frames * 1_000_000_000) / rate.max(1)
}

/// `t_dev`: the device's own natural wake from its queued level dropping
/// to its target residual (spec.md §4.6).
pub fn compute_t_dev(now: i64, level: usize, cb_threshold: usize, rate: u32) -> i64 {
    now + frames_to_ns(level as i64 - cb_threshold as i64, rate.max(1) as i64)
}

/// Combine `t_dev` with every attached stream's contribution into the
/// device's overall wake deadline.
pub fn compute_device_wake(now: i64, dev_rate: u32, t_dev: Option<i64>, streams: &[StreamSchedInfo]) -> i64 {
    let rate = dev_rate.max(1) as i64;

    let mut not_ready: Vec<i64> = Vec::new();
    let mut ready: Vec<i64> = Vec::new();

    for s in streams {
        let is_ready = s.frames_present >= s.cb_threshold;
        if is_ready {
            if s.is_hotword {
                ready.push(now + HOTWORD_IDLE_DEADLINE_NS);
            } else {
                ready.push(s.next_cb_ts);
            }
            continue;
        }

        let needed_dev_frames = if s.is_hotword {
            s.needed_dev_frames + s.cb_threshold_dev_frames
        } else {
            s.needed_dev_frames
        };
        let needed_ns = frames_to_ns(needed_dev_frames as i64, rate);
        not_ready.push(s.next_cb_ts.max(now + needed_ns));
    }

    let stream_wake = if !not_ready.is_empty() {
        not_ready.into_iter().max().unwrap()
    } else if !ready.is_empty() {
        ready.into_iter().min().unwrap()
    } else {
        now
    };

    match t_dev {
        Some(t) => t.min(stream_wake),
        None => stream_wake,
    }
}
