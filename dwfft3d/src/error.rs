use dwmpi::CommError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FFT3DError {
    #[error("FFT3D is not prepared for a coefficient partition")]
    NotPrepared,

    #[error("unknown transform direction {0}, expected +1 (backward) or -1 (forward)")]
    UnknownDirection(i32),

    #[error("paired transform of two real fields needs a reduced partition")]
    ReducedRequired,

    #[error("FFT3D holds device buffers for another partition; dismiss it first")]
    StillPrepared,

    #[error("coefficient partition does not match the prepared one or the FFT layout")]
    PartitionMismatch,

    #[error("buffer of length {found} where {expected} is required")]
    BufferSize { expected: usize, found: usize },

    #[error("device allocation of {requested} bytes failed, {available} bytes available")]
    DeviceAllocation { requested: usize, available: usize },

    #[error("cannot build the worker pool: {0}")]
    ThreadPool(String),

    #[error(transparent)]
    Comm(#[from] CommError),
}
