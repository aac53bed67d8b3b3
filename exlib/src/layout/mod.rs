//! im2col / col2im re-layout between image batches and patch matrices.
//!
//! `im2col` unrolls every receptive field of a `[N, H, W, C]` image into one
//! row of a `[N, OutH, OutW, FilH, FilW, C]` column tensor, so a convolution
//! becomes a single GEMM against a `[FilH * FilW * C, F]` weight matrix.
//! `col2im` is its adjoint: it folds a column tensor back into image layout,
//! summing where windows overlap.
//!
//! Both directions run on an [`Executor`], which validates shapes up front and
//! then dispatches to the [`Sequential`] or [`Parallel`] realization.

mod error;
mod executor;
mod geometry;
mod kernels;
mod padding;
mod parallel;
mod sequential;

pub use error::{LayoutError, Result};
pub use executor::{ExecutionMode, Executor, LayoutExecutor, DEFAULT_PARALLEL_THRESHOLD};
pub use geometry::{Geometry, ImageShape, TensorView};
pub use padding::{conv_transpose_out_size, same_padding, zero_padding, zero_padding_bwd};
pub use parallel::{Col2ImStrategy, Parallel};
pub use sequential::Sequential;

/// Unroll `img` with the default (auto) executor.
pub fn im2col(img: &TensorView<'_>, geom: &Geometry) -> Result<Vec<f32>> {
    Executor::default().im2col(img, geom)
}

/// Fold `col` into a fresh image of `shape` with the default (auto) executor.
pub fn col2im(col: &[f32], shape: ImageShape, geom: &Geometry) -> Result<Vec<f32>> {
    Executor::default().col2im(col, shape, geom)
}

/// [`im2col`] over bare dimensions, for callers that do not carry shape types.
///
/// Returns `batch * out_h * out_w * fil_h * fil_w * channels` values.
#[allow(clippy::too_many_arguments)]
pub fn im2col_flat(
    image: &[f32],
    batch: usize,
    img_h: usize,
    img_w: usize,
    channels: usize,
    out_h: usize,
    out_w: usize,
    fil_h: usize,
    fil_w: usize,
    stride_h: usize,
    stride_w: usize,
) -> Result<Vec<f32>> {
    let shape = ImageShape::new(batch, img_h, img_w, channels);
    let geom = Geometry::new(out_h, out_w, fil_h, fil_w, stride_h, stride_w);
    im2col(&TensorView::new(image, shape)?, &geom)
}

/// [`col2im`] over bare dimensions.
///
/// Returns `batch * img_h * img_w * channels` values.
#[allow(clippy::too_many_arguments)]
pub fn col2im_flat(
    column: &[f32],
    batch: usize,
    img_h: usize,
    img_w: usize,
    channels: usize,
    out_h: usize,
    out_w: usize,
    fil_h: usize,
    fil_w: usize,
    stride_h: usize,
    stride_w: usize,
) -> Result<Vec<f32>> {
    let shape = ImageShape::new(batch, img_h, img_w, channels);
    let geom = Geometry::new(out_h, out_w, fil_h, fil_w, stride_h, stride_w);
    col2im(column, shape, &geom)
}
