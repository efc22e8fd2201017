//! Core Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("stream {0:?} not found in registry")]
    StreamNotFound(crate::stream::StreamId),

    #[error("device {0} not found in active device list")]
    DeviceNotFound(u32),

    #[error("format converter error: {0}")]
    ConverterError(String),

    #[error("device i/o error: {0}")]
    DeviceIo(String),

    #[error("shared-memory error: {0}")]
    ShmError(#[from] wavehub_shm::ShmError),

    #[error("protocol error: {0}")]
    ProtoError(#[from] wavehub_proto::ProtoError),

    #[error("buffer-share window exceeded: stream contributed {contributed} > window {window}")]
    WindowExceeded { contributed: usize, window: usize },

    #[error("registry exhausted: no free stream slots")]
    RegistryExhausted,
}

pub type CoreResult<T> = Result<T, CoreError>;
