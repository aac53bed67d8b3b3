//! Error type for the re-layout kernels.

use thiserror::Error;

/// Errors reported by `im2col` / `col2im` before any output is written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// The geometry cannot describe any buffer: a zero stride, or a size
    /// product that does not fit in `usize`.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// A buffer length disagrees with its declared shape, or the sliding
    /// window would leave the image.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// The output buffer could not be reserved.
    #[error("failed to allocate {elements} f32 elements")]
    AllocationFailure { elements: usize },
}

/// Result alias for layout operations.
pub type Result<T> = std::result::Result<T, LayoutError>;

impl LayoutError {
    pub(crate) fn geometry(msg: impl Into<String>) -> Self {
        LayoutError::InvalidGeometry(msg.into())
    }

    pub(crate) fn mismatch(msg: impl Into<String>) -> Self {
        LayoutError::ShapeMismatch(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = LayoutError::geometry("stride_h must be positive");
        assert_eq!(err.to_string(), "invalid geometry: stride_h must be positive");

        let err = LayoutError::mismatch("image buffer has 8 elements, shape [1, 3, 3, 1] needs 9");
        assert!(err.to_string().starts_with("shape mismatch:"));
        assert!(err.to_string().contains("needs 9"));

        let err = LayoutError::AllocationFailure { elements: 42 };
        assert_eq!(err.to_string(), "failed to allocate 42 f32 elements");
    }
}
