//! Wavehub Audio Thread
//!
//! The real-time side of the daemon: the wake-time scheduling engine
//! (spec.md §4.6), the command/response channel to the control thread
//! (spec.md §4.7, §9), and the concrete `iodev` backends — `CpalIoDev` for
//! real hardware, `LoopbackIoDev` for post-mix capture, `EmptyIoDev` as the
//! always-available fallback, and `TestIoDev` for deterministic scenario
//! tests (see `wavehub-daemon`'s integration tests).

pub mod command;
pub mod error;
pub mod iodevs;
pub mod scheduling;
pub mod thread;

pub use command::{channel_pair, AudioCommand, AudioResponse, CommandReceiver, CommandSender, ResponseReceiver, ResponseSender};
pub use error::{AudioError, AudioResult};
pub use scheduling::{compute_device_wake, compute_t_dev, StreamSchedInfo, HOTWORD_IDLE_DEADLINE_NS};
pub use thread::AudioThread;
