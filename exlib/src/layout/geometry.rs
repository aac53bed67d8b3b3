//! Shapes, convolution geometry, and the index algebra shared by every executor.
//!
//! Image tensors are `[N, H, W, C]` with the channel axis fastest. Column
//! tensors are `[N, OutH, OutW, FilH, FilW, C]`; the GEMM that consumes them
//! treats each `(n, oh, ow)` as one row of `FilH * FilW * C` values, so the
//! axis nesting here is a hard contract.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{LayoutError, Result};

/// Logical shape of a batch-major, channel-fastest image tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageShape {
    pub batch: usize,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl ImageShape {
    pub const fn new(batch: usize, height: usize, width: usize, channels: usize) -> Self {
        Self {
            batch,
            height,
            width,
            channels,
        }
    }

    /// Total element count, failing if it overflows `usize`.
    pub fn checked_len(&self) -> Result<usize> {
        checked_product(
            &[self.batch, self.height, self.width, self.channels],
            "image size",
        )
    }

    /// Total element count. Panics on overflow; use [`checked_len`](Self::checked_len)
    /// for untrusted shapes.
    pub fn len(&self) -> usize {
        self.batch * self.height * self.width * self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements in a single image of the batch.
    pub fn image_len(&self) -> usize {
        self.height * self.width * self.channels
    }

    /// Elements in a single pixel row.
    pub fn row_len(&self) -> usize {
        self.width * self.channels
    }

    pub fn dims(&self) -> [usize; 4] {
        [self.batch, self.height, self.width, self.channels]
    }

    /// Same shape with a different batch size.
    pub fn with_batch(self, batch: usize) -> Self {
        Self { batch, ..self }
    }
}

impl From<[usize; 4]> for ImageShape {
    fn from([batch, height, width, channels]: [usize; 4]) -> Self {
        Self::new(batch, height, width, channels)
    }
}

impl fmt::Display for ImageShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.batch, self.height, self.width, self.channels
        )
    }
}

/// Sliding-window parameters of one convolution.
///
/// `out_h`/`out_w` are supplied by the caller rather than derived, matching
/// how convolution layers carry their output size around. Use
/// [`Geometry::for_conv`] to derive them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Geometry {
    pub out_h: usize,
    pub out_w: usize,
    pub fil_h: usize,
    pub fil_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
}

impl Geometry {
    pub const fn new(
        out_h: usize,
        out_w: usize,
        fil_h: usize,
        fil_w: usize,
        stride_h: usize,
        stride_w: usize,
    ) -> Self {
        Self {
            out_h,
            out_w,
            fil_h,
            fil_w,
            stride_h,
            stride_w,
        }
    }

    /// Derive the output size for an image that has already been padded by
    /// `pad_h` x `pad_w` in total.
    ///
    /// `out = (prev + pad - fil) / stride + 1`
    pub fn for_conv(
        shape: &ImageShape,
        fil_h: usize,
        fil_w: usize,
        stride_h: usize,
        stride_w: usize,
        pad_h: usize,
        pad_w: usize,
    ) -> Result<Self> {
        let out_h = conv_out_size(shape.height, fil_h, stride_h, pad_h, "height")?;
        let out_w = conv_out_size(shape.width, fil_w, stride_w, pad_w, "width")?;
        Ok(Self::new(out_h, out_w, fil_h, fil_w, stride_h, stride_w))
    }

    /// Values in one receptive field: `fil_h * fil_w * channels`.
    pub fn patch_len(&self, channels: usize) -> usize {
        self.fil_h * self.fil_w * channels
    }

    /// Number of window positions over the whole batch.
    pub fn patches(&self, batch: usize) -> usize {
        batch * self.out_h * self.out_w
    }

    /// Column tensor length for `shape`, failing on overflow.
    pub fn col_len(&self, shape: &ImageShape) -> Result<usize> {
        checked_product(
            &[
                shape.batch,
                self.out_h,
                self.out_w,
                self.fil_h,
                self.fil_w,
                shape.channels,
            ],
            "column size",
        )
    }

    /// True when no two windows share a pixel, so `col2im` never sums.
    pub fn is_non_overlapping(&self) -> bool {
        self.stride_h >= self.fil_h && self.stride_w >= self.fil_w
    }

    /// Offset of `img[n, oh*stride_h + k, ow*stride_w + l, m]`.
    #[inline(always)]
    #[allow(clippy::too_many_arguments)]
    pub fn img_index(
        &self,
        shape: &ImageShape,
        n: usize,
        oh: usize,
        ow: usize,
        k: usize,
        l: usize,
        m: usize,
    ) -> usize {
        debug_assert!(n < shape.batch && oh < self.out_h && ow < self.out_w);
        debug_assert!(k < self.fil_h && l < self.fil_w && m < shape.channels.max(1));
        let i = oh * self.stride_h;
        let j = ow * self.stride_w;
        ((n * shape.height + i + k) * shape.width + j + l) * shape.channels + m
    }

    /// Offset of `col[n, oh, ow, k, l, m]`.
    #[inline(always)]
    #[allow(clippy::too_many_arguments)]
    pub fn col_index(
        &self,
        shape: &ImageShape,
        n: usize,
        oh: usize,
        ow: usize,
        k: usize,
        l: usize,
        m: usize,
    ) -> usize {
        debug_assert!(n < shape.batch && oh < self.out_h && ow < self.out_w);
        debug_assert!(k < self.fil_h && l < self.fil_w && m < shape.channels.max(1));
        ((((n * self.out_h + oh) * self.out_w + ow) * self.fil_h + k) * self.fil_w + l)
            * shape.channels
            + m
    }

    /// Check that this geometry can run over `shape` without leaving the image.
    ///
    /// Returns the column tensor length on success.
    pub fn validate(&self, shape: &ImageShape) -> Result<usize> {
        if self.stride_h == 0 || self.stride_w == 0 {
            return Err(LayoutError::geometry(format!(
                "strides must be positive, got {}x{}",
                self.stride_h, self.stride_w
            )));
        }
        shape.checked_len()?;
        let col_len = self.col_len(shape)?;
        if col_len == 0 {
            // Nothing is read or written.
            return Ok(0);
        }
        let reach_h = window_reach(self.out_h, self.stride_h, self.fil_h)?;
        let reach_w = window_reach(self.out_w, self.stride_w, self.fil_w)?;
        if reach_h > shape.height || reach_w > shape.width {
            return Err(LayoutError::mismatch(format!(
                "windows span {}x{} pixels but image {} is only {}x{}",
                reach_h, reach_w, shape, shape.height, shape.width
            )));
        }
        Ok(col_len)
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "out {}x{}, filter {}x{}, stride {}x{}",
            self.out_h, self.out_w, self.fil_h, self.fil_w, self.stride_h, self.stride_w
        )
    }
}

/// Borrowed image tensor: data, length and shape tuple, nothing more.
#[derive(Debug, Clone, Copy)]
pub struct TensorView<'a> {
    data: &'a [f32],
    shape: ImageShape,
}

impl<'a> TensorView<'a> {
    /// Wrap `data`, checking its length against `shape`.
    pub fn new(data: &'a [f32], shape: ImageShape) -> Result<Self> {
        let expected = shape.checked_len()?;
        if data.len() != expected {
            return Err(LayoutError::mismatch(format!(
                "image buffer has {} elements, shape {} needs {}",
                data.len(),
                shape,
                expected
            )));
        }
        Ok(Self { data, shape })
    }

    pub fn data(&self) -> &'a [f32] {
        self.data
    }

    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Rows (or columns) touched by `out` windows: `(out - 1) * stride + fil`.
fn window_reach(out: usize, stride: usize, fil: usize) -> Result<usize> {
    (out - 1)
        .checked_mul(stride)
        .and_then(|v| v.checked_add(fil))
        .ok_or_else(|| LayoutError::geometry("window extent overflows usize"))
}

fn conv_out_size(prev: usize, fil: usize, stride: usize, pad: usize, axis: &str) -> Result<usize> {
    if stride == 0 {
        return Err(LayoutError::geometry(format!("stride along {axis} must be positive")));
    }
    let padded = prev
        .checked_add(pad)
        .ok_or_else(|| LayoutError::geometry(format!("padded {axis} overflows usize")))?;
    if fil == 0 || fil > padded {
        return Err(LayoutError::geometry(format!(
            "filter {axis} {fil} does not fit padded {axis} {padded}"
        )));
    }
    Ok((padded - fil) / stride + 1)
}

pub(crate) fn checked_product(dims: &[usize], what: &str) -> Result<usize> {
    dims.iter().try_fold(1usize, |acc, &d| {
        acc.checked_mul(d)
            .ok_or_else(|| LayoutError::geometry(format!("{what} overflows usize: {dims:?}")))
    })
}
