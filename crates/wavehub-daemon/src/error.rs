//! Daemon Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("socket bind failed at {path}: {source}")]
    BindFailed { path: String, source: std::io::Error },

    #[error("poller error: {0}")]
    Poller(#[source] std::io::Error),

    #[error("audio thread command channel closed")]
    AudioChannelClosed,

    #[error("client {0} not found")]
    ClientNotFound(u32),

    #[error("core error: {0}")]
    Core(#[from] wavehub_core::CoreError),

    #[error("protocol error: {0}")]
    Proto(#[from] wavehub_proto::ProtoError),

    #[error("shm error: {0}")]
    Shm(#[from] wavehub_shm::ShmError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DaemonResult<T> = Result<T, DaemonError>;
