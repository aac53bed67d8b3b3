//! Conv2d forward/backward as im2col -> `general_mat_mul` -> col2im.
//!
//! With the column tensor viewed as a `[patches, fil_h * fil_w * C]` matrix
//! and the weights as `[fil_h * fil_w * C, F]`, the forward pass is one GEMM
//! and its output is already `[N, out_h, out_w, F]`. The backward pass reuses
//! the forward column buffer for the weight gradient and runs `col2im` on
//! `dy * W^T` for the input gradient.

use anyhow::{ensure, Context, Result};
use ndarray::linalg::general_mat_mul;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::layout::{Executor, Geometry, ImageShape, TensorView};

/// Output of [`conv2d_forward`].
#[derive(Debug, Clone)]
pub struct Conv2dOutput {
    /// `[N, out_h, out_w, F]`, channel fastest.
    pub y: Vec<f32>,
    pub y_shape: ImageShape,
    /// The column tensor, kept for the backward pass.
    pub col: Vec<f32>,
}

/// Gradients returned by [`conv2d_backward`].
#[derive(Debug, Clone)]
pub struct Conv2dGrads {
    pub dx: Vec<f32>,
    pub dweight: Vec<f32>,
    pub dbias: Vec<f32>,
}

/// Forward convolution of `x` with `weight` (`[fil_h * fil_w * C, filters]`).
pub fn conv2d_forward(
    executor: &Executor,
    x: &TensorView<'_>,
    geom: &Geometry,
    weight: &[f32],
    filters: usize,
    bias: Option<&[f32]>,
) -> Result<Conv2dOutput> {
    let shape = x.shape();
    let (patches, patch_len) = gemm_dims(geom, &shape)?;
    let w = weight_view(weight, patch_len, filters)?;

    let col = executor.im2col(x, geom).context("im2col failed")?;
    let col_view = ArrayView2::from_shape((patches, patch_len), &col)
        .context("column tensor does not match geometry")?;

    let mut y = Array2::<f32>::zeros((patches, filters));
    general_mat_mul(1.0, &col_view, &w, 0.0, &mut y);

    if let Some(bias) = bias {
        ensure!(
            bias.len() == filters,
            "bias has {} entries, expected {filters}",
            bias.len()
        );
        y += &ArrayView1::from(bias);
    }

    Ok(Conv2dOutput {
        y: y.into_raw_vec_and_offset().0,
        y_shape: ImageShape::new(shape.batch, geom.out_h, geom.out_w, filters),
        col,
    })
}

/// Backward pass for [`conv2d_forward`].
///
/// `dy` is `[N, out_h, out_w, F]` and `col` is the column tensor the forward
/// pass returned for an input of `x_shape`.
pub fn conv2d_backward(
    executor: &Executor,
    dy: &[f32],
    col: &[f32],
    x_shape: ImageShape,
    geom: &Geometry,
    weight: &[f32],
    filters: usize,
) -> Result<Conv2dGrads> {
    let (patches, patch_len) = gemm_dims(geom, &x_shape)?;
    let w = weight_view(weight, patch_len, filters)?;

    let dy_view = ArrayView2::from_shape((patches, filters), dy).with_context(|| {
        format!(
            "dy has {} elements, expected {patches} x {filters}",
            dy.len()
        )
    })?;
    let col_view = ArrayView2::from_shape((patches, patch_len), col).with_context(|| {
        format!(
            "column tensor has {} elements, expected {patches} x {patch_len}",
            col.len()
        )
    })?;

    let mut dweight = Array2::<f32>::zeros((patch_len, filters));
    general_mat_mul(1.0, &col_view.t(), &dy_view, 0.0, &mut dweight);

    let dbias = dy_view.sum_axis(Axis(0));

    let mut dcol = Array2::<f32>::zeros((patches, patch_len));
    general_mat_mul(1.0, &dy_view, &w.t(), 0.0, &mut dcol);
    let dcol = dcol.into_raw_vec_and_offset().0;
    let dx = executor
        .col2im(&dcol, x_shape, geom)
        .context("col2im failed")?;

    Ok(Conv2dGrads {
        dx,
        dweight: dweight.into_raw_vec_and_offset().0,
        dbias: dbias.into_raw_vec_and_offset().0,
    })
}

/// `(patches, patch_len)` of the column matrix, once the geometry is known to
/// fit `shape`. An empty column can still carry an overflowing patch size.
fn gemm_dims(geom: &Geometry, shape: &ImageShape) -> Result<(usize, usize)> {
    geom.validate(shape)?;
    let patches = shape
        .batch
        .checked_mul(geom.out_h)
        .and_then(|v| v.checked_mul(geom.out_w))
        .with_context(|| format!("{geom} over {shape}: patch count overflows usize"))?;
    let patch_len = geom
        .fil_h
        .checked_mul(geom.fil_w)
        .and_then(|v| v.checked_mul(shape.channels))
        .with_context(|| format!("{geom} over {shape}: patch length overflows usize"))?;
    Ok((patches, patch_len))
}

fn weight_view(weight: &[f32], patch_len: usize, filters: usize) -> Result<ArrayView2<'_, f32>> {
    ArrayView2::from_shape((patch_len, filters), weight).with_context(|| {
        format!(
            "weight has {} elements, expected {patch_len} x {filters}",
            weight.len()
        )
    })
}
