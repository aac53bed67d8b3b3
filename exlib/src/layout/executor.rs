//! One interface over both realizations.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use super::error::{LayoutError, Result};
use super::geometry::{Geometry, ImageShape, TensorView};
use super::parallel::Parallel;
use super::sequential::Sequential;

/// Column tensors below this many elements run sequentially in `Auto` mode.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 1 << 16;

/// A realization of the im2col/col2im index algebra.
///
/// Implementations receive buffers already checked by [`Executor`]: `img`
/// holds `shape.len()` values and `col` holds `geom.col_len(shape)` values,
/// with every window inside the image. `col2im_into` must overwrite `img`
/// completely (zero, then accumulate).
pub trait LayoutExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    fn im2col_into(&self, img: &[f32], shape: &ImageShape, geom: &Geometry, col: &mut [f32]);

    fn col2im_into(&self, col: &[f32], shape: &ImageShape, geom: &Geometry, img: &mut [f32]);
}

/// Which realization an [`Executor`] dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
    /// Sequential for small column tensors, parallel otherwise.
    #[default]
    Auto,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Auto => "auto",
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validating front end: checks shapes, allocates outputs, picks a realization.
#[derive(Debug, Clone)]
pub struct Executor {
    mode: ExecutionMode,
    threshold: usize,
    parallel: Parallel,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(ExecutionMode::Auto)
    }
}

impl Executor {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            threshold: DEFAULT_PARALLEL_THRESHOLD,
            parallel: Parallel::new(),
        }
    }

    pub fn sequential() -> Self {
        Self::new(ExecutionMode::Sequential)
    }

    pub fn parallel() -> Self {
        Self::new(ExecutionMode::Parallel)
    }

    /// Column size (in elements) at which `Auto` switches to parallel.
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_parallel(mut self, parallel: Parallel) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// The realization used for a column tensor of `col_len` elements.
    pub fn select(&self, col_len: usize) -> &dyn LayoutExecutor {
        match self.mode {
            ExecutionMode::Sequential => &Sequential,
            ExecutionMode::Parallel => &self.parallel,
            ExecutionMode::Auto if col_len < self.threshold => &Sequential,
            ExecutionMode::Auto => &self.parallel,
        }
    }

    /// Unroll `img` into a freshly allocated column tensor.
    pub fn im2col(&self, img: &TensorView<'_>, geom: &Geometry) -> Result<Vec<f32>> {
        let col_len = geom.validate(&img.shape())?;
        let mut col = alloc_zeroed(col_len)?;
        self.run_im2col(img, geom, &mut col);
        Ok(col)
    }

    /// Unroll `img` into `col`, which must already have the column length.
    pub fn im2col_into(&self, img: &TensorView<'_>, geom: &Geometry, col: &mut [f32]) -> Result<()> {
        let col_len = geom.validate(&img.shape())?;
        check_len("column", col.len(), col_len)?;
        self.run_im2col(img, geom, col);
        Ok(())
    }

    /// Fold `col` back into a zero-initialized image of `shape`, summing overlaps.
    pub fn col2im(&self, col: &[f32], shape: ImageShape, geom: &Geometry) -> Result<Vec<f32>> {
        let col_len = geom.validate(&shape)?;
        check_len("column", col.len(), col_len)?;
        let mut img = alloc_zeroed(shape.len())?;
        self.run_col2im(col, &shape, geom, &mut img);
        Ok(img)
    }

    /// Fold `col` into `img`, overwriting its previous contents.
    pub fn col2im_into(
        &self,
        col: &[f32],
        shape: ImageShape,
        geom: &Geometry,
        img: &mut [f32],
    ) -> Result<()> {
        let col_len = geom.validate(&shape)?;
        check_len("column", col.len(), col_len)?;
        check_len("image", img.len(), shape.len())?;
        self.run_col2im(col, &shape, geom, img);
        Ok(())
    }

    fn run_im2col(&self, img: &TensorView<'_>, geom: &Geometry, col: &mut [f32]) {
        let exec = self.select(col.len());
        log::debug!(
            "im2col {} -> {} elements ({geom}) on {}",
            img.shape(),
            col.len(),
            exec.name()
        );
        exec.im2col_into(img.data(), &img.shape(), geom, col);
    }

    fn run_col2im(&self, col: &[f32], shape: &ImageShape, geom: &Geometry, img: &mut [f32]) {
        let exec = self.select(col.len());
        log::debug!(
            "col2im {} elements -> {shape} ({geom}) on {}",
            col.len(),
            exec.name()
        );
        exec.col2im_into(col, shape, geom, img);
    }
}

fn check_len(what: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(LayoutError::mismatch(format!(
            "{what} buffer has {actual} elements, expected {expected}"
        )));
    }
    Ok(())
}

/// Zero-filled buffer, reporting allocation failure instead of aborting.
pub(crate) fn alloc_zeroed(len: usize) -> Result<Vec<f32>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| LayoutError::AllocationFailure { elements: len })?;
    buf.resize(len, 0.0);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlap_case() -> (Vec<f32>, ImageShape, Geometry) {
        (vec![1.0; 9], ImageShape::new(1, 3, 3, 1), Geometry::new(2, 2, 2, 2, 1, 1))
    }

    #[test]
    fn auto_mode_switches_on_threshold() {
        let exec = Executor::new(ExecutionMode::Auto).with_threshold(100);
        assert_eq!(exec.select(99).name(), "sequential");
        assert_eq!(exec.select(100).name(), "parallel");
        assert_eq!(Executor::sequential().select(1 << 30).name(), "sequential");
        assert_eq!(Executor::parallel().select(0).name(), "parallel");
    }

    #[test]
    fn overlap_accumulates_window_counts() {
        let (img, shape, geom) = overlap_case();
        for exec in [Executor::sequential(), Executor::parallel()] {
            let view = TensorView::new(&img, shape).unwrap();
            let col = exec.im2col(&view, &geom).unwrap();
            assert_eq!(col.len(), 16);
            let back = exec.col2im(&col, shape, &geom).unwrap();
            assert_eq!(back, vec![1.0, 2.0, 1.0, 2.0, 4.0, 2.0, 1.0, 2.0, 1.0]);
        }
    }

    #[test]
    fn into_variants_check_output_length() {
        let (img, shape, geom) = overlap_case();
        let view = TensorView::new(&img, shape).unwrap();
        let exec = Executor::default();

        let mut short = vec![0.0; 15];
        let err = exec.im2col_into(&view, &geom, &mut short).unwrap_err();
        assert!(matches!(err, LayoutError::ShapeMismatch(_)));

        let col = vec![1.0; 16];
        let mut img_out = vec![0.0; 8];
        let err = exec.col2im_into(&col, shape, &geom, &mut img_out).unwrap_err();
        assert!(matches!(err, LayoutError::ShapeMismatch(_)));

        let mut img_out = vec![9.0; 9];
        exec.col2im_into(&col, shape, &geom, &mut img_out).unwrap();
        assert_eq!(img_out[4], 4.0);
    }

    #[test]
    fn col2im_rejects_wrong_column_length() {
        let (_, shape, geom) = overlap_case();
        let err = Executor::default()
            .col2im(&[0.0; 15], shape, &geom)
            .unwrap_err();
        assert!(matches!(err, LayoutError::ShapeMismatch(_)));
    }

    #[test]
    fn zero_sizes_are_not_errors() {
        let img = vec![1.0; 9];
        let shape = ImageShape::new(1, 3, 3, 1);
        let view = TensorView::new(&img, shape).unwrap();
        let exec = Executor::default();

        let col = exec.im2col(&view, &Geometry::new(0, 2, 2, 2, 1, 1)).unwrap();
        assert!(col.is_empty());

        let empty = ImageShape::new(0, 3, 3, 1);
        let view = TensorView::new(&[], empty).unwrap();
        assert!(exec.im2col(&view, &Geometry::new(2, 2, 2, 2, 1, 1)).unwrap().is_empty());
        assert!(exec.col2im(&[], empty, &Geometry::new(2, 2, 2, 2, 1, 1)).unwrap().is_empty());

        let img = exec.col2im(&[], shape, &Geometry::new(0, 2, 2, 2, 1, 1)).unwrap();
        assert_eq!(img, vec![0.0; 9]);
    }

    #[test]
    fn alloc_reports_failure() {
        let err = alloc_zeroed(usize::MAX).unwrap_err();
        assert_eq!(err, LayoutError::AllocationFailure { elements: usize::MAX });
    }

    #[test]
    fn mode_round_trips_through_serde() {
        let json = serde_json::to_string(&ExecutionMode::Parallel).unwrap();
        assert_eq!(json, "\"parallel\"");
        let mode: ExecutionMode = serde_json::from_str("\"auto\"").unwrap();
        assert_eq!(mode, ExecutionMode::Auto);
    }
}
