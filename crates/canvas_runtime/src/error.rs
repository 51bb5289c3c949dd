//! Public error type
//!
//! Every subsystem error folds into [`CanvasError`], which maps onto the small
//! negative status codes exposed by [`CanvasError::status`].

use crate::config::ConfigError;
use crate::foundation::arena::ArenaError;
use crate::platform::PlatformError;
use crate::render::{BufferError, GpuError, PresentError};
use thiserror::Error;

/// Status code: unclassified failure
pub const STATUS_GENERIC: i32 = -1;
/// Status code: invalid handle or argument
pub const STATUS_INVALID: i32 = -2;
/// Status code: pool exhausted
pub const STATUS_EXHAUSTED: i32 = -3;
/// Status code: display lookup failed
pub const STATUS_DISPLAY: i32 = -4;
/// Status code: window lookup or creation failed
pub const STATUS_WINDOW: i32 = -5;
/// Status code: GPU or device failure
pub const STATUS_GPU: i32 = -6;
/// Status code: invalid size
pub const STATUS_SIZE: i32 = -7;
/// Status code: library or symbol load failure
pub const STATUS_LIBRARY: i32 = -8;

/// Runtime errors
#[derive(Error, Debug)]
pub enum CanvasError {
    /// Anything without a more specific class
    #[error("{0}")]
    Generic(String),

    /// Handle does not name a live canvas
    #[error("invalid canvas handle {0}")]
    InvalidHandle(usize),

    /// Argument rejected
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A fixed-capacity pool is full
    #[error("{pool} pool exhausted (capacity {capacity})")]
    PoolExhausted {
        /// Which pool
        pool: &'static str,
        /// Its capacity
        capacity: usize,
    },

    /// Display index does not exist
    #[error("display {0} not found")]
    DisplayLookup(isize),

    /// Native window failure
    #[error(transparent)]
    Window(#[from] PlatformError),

    /// GPU failure
    #[error(transparent)]
    Gpu(GpuError),

    /// Width or height rejected
    #[error("invalid size {width}x{height}")]
    InvalidSize {
        /// Requested width
        width: i32,
        /// Requested height
        height: i32,
    },

    /// Native library missing
    #[error("library unavailable: {0}")]
    LibraryLoad(String),

    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for runtime operations
pub type CanvasResult<T> = Result<T, CanvasError>;

impl CanvasError {
    /// Status code for this error
    pub fn status(&self) -> i32 {
        match self {
            Self::Generic(_) | Self::Config(_) => STATUS_GENERIC,
            Self::InvalidHandle(_) | Self::InvalidArgument(_) => STATUS_INVALID,
            Self::PoolExhausted { .. } => STATUS_EXHAUSTED,
            Self::DisplayLookup(_) => STATUS_DISPLAY,
            Self::Window(PlatformError::DisplayEnumeration(_)) => STATUS_DISPLAY,
            Self::Window(PlatformError::InitializationFailed(_)) => STATUS_LIBRARY,
            Self::Window(_) => STATUS_WINDOW,
            Self::Gpu(_) => STATUS_GPU,
            Self::InvalidSize { .. } => STATUS_SIZE,
            Self::LibraryLoad(_) => STATUS_LIBRARY,
        }
    }

    pub(crate) fn from_arena(pool: &'static str, error: ArenaError) -> Self {
        match error {
            ArenaError::Exhausted { capacity } => Self::PoolExhausted { pool, capacity },
            ArenaError::InvalidIndex { index, .. } | ArenaError::NotValid { index } => {
                Self::InvalidHandle(index)
            }
        }
    }
}

impl From<GpuError> for CanvasError {
    fn from(error: GpuError) -> Self {
        match error {
            GpuError::Unavailable(reason) => Self::LibraryLoad(reason),
            other => Self::Gpu(other),
        }
    }
}

impl From<PresentError> for CanvasError {
    fn from(error: PresentError) -> Self {
        match error {
            PresentError::Gpu(gpu) => gpu.into(),
            other => Self::Gpu(GpuError::Device(other.to_string())),
        }
    }
}

impl From<BufferError> for CanvasError {
    fn from(error: BufferError) -> Self {
        match error {
            BufferError::Gpu(gpu) => gpu.into(),
            other => Self::InvalidArgument(other.to_string()),
        }
    }
}

/// Status code of a result: 0 on success
pub fn status_of<T>(result: &CanvasResult<T>) -> i32 {
    result.as_ref().map_or_else(CanvasError::status, |_| 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_distinct() {
        let errors = [
            CanvasError::Generic("x".to_string()),
            CanvasError::InvalidHandle(3),
            CanvasError::PoolExhausted { pool: "canvas", capacity: 1 },
            CanvasError::DisplayLookup(9),
            CanvasError::Window(PlatformError::CreationFailed("x".to_string())),
            CanvasError::Gpu(GpuError::DeviceLost),
            CanvasError::InvalidSize { width: 0, height: 10 },
            CanvasError::LibraryLoad("x".to_string()),
        ];
        let codes: Vec<i32> = errors.iter().map(CanvasError::status).collect();
        assert_eq!(codes, vec![-1, -2, -3, -4, -5, -6, -7, -8]);
    }

    #[test]
    fn test_conversions_pick_the_right_class() {
        assert_eq!(CanvasError::from(GpuError::Unavailable("no icd".to_string())).status(), STATUS_LIBRARY);
        assert_eq!(CanvasError::from(BufferError::ZeroSize).status(), STATUS_INVALID);
        assert_eq!(CanvasError::from(BufferError::Gpu(GpuError::OutOfMemory)).status(), STATUS_GPU);
        assert_eq!(
            CanvasError::from_arena("canvas", ArenaError::Exhausted { capacity: 4 }).status(),
            STATUS_EXHAUSTED
        );
        assert_eq!(
            CanvasError::from_arena("canvas", ArenaError::NotValid { index: 2 }).status(),
            STATUS_INVALID
        );
        assert_eq!(status_of(&Ok::<(), CanvasError>(())), 0);
    }
}
