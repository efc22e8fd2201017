//! Shared-Memory Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShmError {
    #[error("failed to allocate backing file for shm region: {0}")]
    AllocateFailed(#[from] std::io::Error),

    #[error("volume scaler {0} out of range [0.0, 1.0]")]
    InvalidVolume(f32),

    #[error("used_size must be a power of two, got {0}")]
    UsedSizeNotPowerOfTwo(usize),

    #[error("producer write of {requested} frames exceeds used_size {used_size}")]
    WriteExceedsCapacity { requested: usize, used_size: usize },

    #[error("area busy: writer has not committed after {retries} retries")]
    AreaBusy { retries: u32 },
}

pub type ShmResult<T> = Result<T, ShmError>;
