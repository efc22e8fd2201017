//! Audio Side-Channel Protocol
//!
//! Each stream gets a dedicated unix-domain socket carrying fixed-size
//! `AudioMessage` records (spec.md §6), used purely as a wake-up channel: it
//! carries no sample data, only readiness/backpressure signaling between
//! the daemon's audio thread and the client.

use std::io::{self, Read, Write};

/// Fixed-size record on the per-stream audio socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioMessage {
    pub id: AudioMessageId,
    pub error: i32,
    pub frames: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMessageId {
    RequestData,
    DataReady,
}

const RECORD_LEN: usize = 12;

impl AudioMessage {
    pub fn request_data(frames: u32) -> Self {
        Self {
            id: AudioMessageId::RequestData,
            error: 0,
            frames,
        }
    }

    pub fn data_ready(frames: u32) -> Self {
        Self {
            id: AudioMessageId::DataReady,
            error: 0,
            frames,
        }
    }

    pub fn error(id: AudioMessageId, error: i32) -> Self {
        Self {
            id,
            error,
            frames: 0,
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let id_word: u32 = match self.id {
            AudioMessageId::RequestData => 0,
            AudioMessageId::DataReady => 1,
        };
        let mut buf = [0u8; RECORD_LEN];
        buf[0..4].copy_from_slice(&id_word.to_le_bytes());
        buf[4..8].copy_from_slice(&self.error.to_le_bytes());
        buf[8..12].copy_from_slice(&self.frames.to_le_bytes());
        w.write_all(&buf)
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; RECORD_LEN];
        r.read_exact(&mut buf)?;
        let id_word = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let error = i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let frames = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let id = match id_word {
            0 => AudioMessageId::RequestData,
            1 => AudioMessageId::DataReady,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown audio message id {other}"),
                ))
            }
        };
        Ok(Self { id, error, frames })
    }
}

/// Builds the per-stream socket path: `{sock_dir}/{aud_file_pattern}-{stream_id:x}`.
pub fn audio_socket_path(sock_dir: &str, aud_file_pattern: &str, stream_id: u64) -> String {
    format!("{sock_dir}/{aud_file_pattern}-{stream_id:x}")
}
