//! Wavehub Daemon
//!
//! The control thread: a unix-socket server and message dispatcher
//! (spec.md §4.7) that wires client connections to the audio thread built
//! in `wavehub-audio` over its command/response channel pair. `main.rs` is
//! the process entry point; everything else is exposed here so the
//! integration tests under `tests/` can drive a real `Server` end to end.

pub mod clock;
pub mod error;
pub mod fd_pass;
pub mod rclient;
pub mod server;

pub use error::{DaemonError, DaemonResult};
pub use rclient::RClient;
pub use server::Server;
