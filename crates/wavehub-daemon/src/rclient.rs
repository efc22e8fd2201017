//! rclient — per-connection client state (spec.md §4.7)

use std::os::unix::net::UnixStream;

use wavehub_core::StreamId;

/// One connected client: its control socket and the streams it currently
/// owns. `RClient` never touches the audio thread directly; the server
/// routes everything through the command channel.
pub struct RClient {
    pub id: u32,
    pub socket: UnixStream,
    pub streams: Vec<StreamId>,
    /// Monotonic timestamp (ns) the connection was accepted at, used to
    /// enforce the accept-to-first-message connect timeout.
    pub connected_at: i64,
    /// Set once the client has sent its first message; the connect
    /// timeout only ever applies before this.
    pub greeted: bool,
}

impl RClient {
    pub fn new(id: u32, socket: UnixStream, connected_at: i64) -> Self {
        Self {
            id,
            socket,
            streams: Vec::new(),
            connected_at,
            greeted: false,
        }
    }
}
