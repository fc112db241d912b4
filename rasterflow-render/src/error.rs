//! Error type for resource operations.
//!
//! Errors only occur at the context boundary. Once a draw is dispatched the
//! hot path has no recoverable failures; broken invariants there are bugs and
//! are caught by debug assertions.

use thiserror::Error;

/// Errors surfaced by context and resource operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderError {
    /// A zero-sized buffer, out-of-range dimension, or a shape mismatch
    /// between a vertex array and its buffer.
    #[error("bad argument")]
    BadArg,

    /// The referenced resource id is unknown or was released.
    #[error("bad resource id")]
    BadId,

    /// Buffer or texture storage could not be allocated.
    #[error("allocation failed")]
    AllocFail,

    /// Framebuffer attachments disagree in size, or the depth attachment is
    /// missing.
    #[error("framebuffer incomplete")]
    FboIncomplete,

    /// The requested format or format combination is not implemented.
    #[error("unsupported format")]
    Unsupported,
}

impl RenderError {
    /// The C-compatible status code: `-1` through `-5` in declaration order.
    /// Success is `0` and has no `RenderError` value.
    pub const fn code(self) -> i32 {
        match self {
            RenderError::BadArg => -1,
            RenderError::BadId => -2,
            RenderError::AllocFail => -3,
            RenderError::FboIncomplete => -4,
            RenderError::Unsupported => -5,
        }
    }
}

/// Result alias used throughout the crate.
pub type RenderResult<T> = Result<T, RenderError>;
