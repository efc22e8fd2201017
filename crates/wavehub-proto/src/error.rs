//! Protocol Error Types

use thiserror::Error;

/// Errors from wire-format parsing and audio format validation
#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("message declared length {declared} does not match bytes read {read}")]
    LengthMismatch { declared: u32, read: u32 },

    #[error("unknown message id: {0}")]
    UnknownMessageId(u32),

    #[error("message too short: need at least {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    #[error("invalid direction value: {0}")]
    InvalidDirection(u32),

    #[error("invalid channel layout: channel {channel} maps to index {index}, num_channels is {num_channels}")]
    InvalidChannelLayout {
        channel: usize,
        index: i8,
        num_channels: u8,
    },

    #[error("duplicate physical channel index {0} in channel layout")]
    DuplicateChannelIndex(i8),

    #[error("value {value} out of range [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },
}

pub type ProtoResult<T> = Result<T, ProtoError>;
