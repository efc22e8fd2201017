//! Audio Thread Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("core error: {0}")]
    CoreError(#[from] wavehub_core::CoreError),

    #[error("cpal device error: {0}")]
    CpalDevice(String),

    #[error("cpal stream build error: {0}")]
    CpalBuild(String),

    #[error("cpal stream play error: {0}")]
    CpalPlay(String),

    #[error("no audio devices found")]
    NoDevicesFound,

    #[error("fallback device creation failed: {0}")]
    FallbackCreationFailed(String),

    #[error("poller registration failed: {0}")]
    PollerError(#[from] std::io::Error),

    #[error("command channel closed")]
    ChannelClosed,
}

pub type AudioResult<T> = Result<T, AudioError>;
