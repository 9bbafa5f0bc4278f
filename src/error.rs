use thiserror::Error;

/// Errors surfaced by the solver. None of them are recoverable within a
/// session except by a fresh resize (allocation) or a new backend.
#[derive(Debug, Error)]
pub enum FluidError {
    /// A required graphics capability is missing; initialisation aborts.
    #[error("graphics capability unavailable: {0}")]
    Unsupported(String),

    #[error("invalid grid {width}x{height}: {reason}")]
    InvalidGrid {
        width: u32,
        height: u32,
        reason: &'static str,
    },

    #[error("failed to allocate {label} for a {width}x{height} grid: {reason}")]
    Allocation {
        label: &'static str,
        width: u32,
        height: u32,
        reason: String,
    },

    /// A pointer sample that cannot be normalized against its viewport.
    #[error("unusable pointer sample ({x}, {y}) in a {width}x{height} viewport")]
    InvalidPointer {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },

    #[error("field shape mismatch: expected {expected} texels, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("fields are not allocated; a successful resize must precede stepping")]
    NotAllocated,

    #[error("readback of {label} failed: {reason}")]
    Readback { label: &'static str, reason: String },

    #[error("presentation failed: {0}")]
    Presentation(String),
}
