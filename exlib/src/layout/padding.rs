//! Zero padding around the spatial axes and the output-size arithmetic that
//! goes with it.
//!
//! Padding is split so the image starts at `pad / 2`; the odd pixel, if any,
//! goes to the bottom/right edge.

use super::error::{LayoutError, Result};
use super::executor::alloc_zeroed;
use super::geometry::{ImageShape, TensorView};

/// Total padding `(pad_h, pad_w)` that keeps `out = prev / stride` windows.
///
/// `pad = out * stride - prev + fil - stride`, clamped at zero.
pub fn same_padding(
    prev_h: usize,
    prev_w: usize,
    fil_h: usize,
    fil_w: usize,
    stride_h: usize,
    stride_w: usize,
) -> Result<(usize, usize)> {
    Ok((
        same_pad_axis(prev_h, fil_h, stride_h)?,
        same_pad_axis(prev_w, fil_w, stride_w)?,
    ))
}

fn same_pad_axis(prev: usize, fil: usize, stride: usize) -> Result<usize> {
    if stride == 0 {
        return Err(LayoutError::geometry("stride must be positive"));
    }
    let out = prev / stride;
    Ok((out * stride + fil).saturating_sub(prev + stride))
}

/// Output size of a transposed convolution along one axis:
/// `(prev - 1) * stride + fil - pad`.
pub fn conv_transpose_out_size(prev: usize, fil: usize, stride: usize, pad: usize) -> Result<usize> {
    if prev == 0 {
        return Ok(0);
    }
    (prev - 1)
        .checked_mul(stride)
        .and_then(|v| v.checked_add(fil))
        .and_then(|v| v.checked_sub(pad))
        .ok_or_else(|| {
            LayoutError::geometry(format!(
                "transposed size out of range: prev={prev} fil={fil} stride={stride} pad={pad}"
            ))
        })
}

/// Grow `img` by `pad_h` rows and `pad_w` columns of zeros.
pub fn zero_padding(img: &TensorView<'_>, pad_h: usize, pad_w: usize) -> Result<(Vec<f32>, ImageShape)> {
    let src = img.shape();
    let height = src
        .height
        .checked_add(pad_h)
        .ok_or_else(|| LayoutError::geometry("padded height overflows usize"))?;
    let width = src
        .width
        .checked_add(pad_w)
        .ok_or_else(|| LayoutError::geometry("padded width overflows usize"))?;
    let dst = ImageShape::new(src.batch, height, width, src.channels);
    let mut out = alloc_zeroed(dst.checked_len()?)?;

    let (top, left) = (pad_h / 2, pad_w / 2);
    let run = src.row_len();
    if run > 0 {
        for (r, row) in img.data().chunks_exact(run).enumerate() {
            let (n, y) = (r / src.height, r % src.height);
            let at = ((n * height + y + top) * width + left) * src.channels;
            out[at..at + run].copy_from_slice(row);
        }
    }
    Ok((out, dst))
}

/// Crop the border added by [`zero_padding`], dropping whatever the border
/// held (gradients flowing into padding are discarded).
pub fn zero_padding_bwd(
    data: &[f32],
    shape: ImageShape,
    pad_h: usize,
    pad_w: usize,
) -> Result<(Vec<f32>, ImageShape)> {
    let view = TensorView::new(data, shape)?;
    if pad_h > shape.height || pad_w > shape.width {
        return Err(LayoutError::mismatch(format!(
            "cannot remove {pad_h}x{pad_w} padding from image {shape}"
        )));
    }
    let dst = ImageShape::new(shape.batch, shape.height - pad_h, shape.width - pad_w, shape.channels);
    let mut out = alloc_zeroed(dst.len())?;

    let (top, left) = (pad_h / 2, pad_w / 2);
    let run = dst.row_len();
    if run > 0 {
        for (r, row) in out.chunks_exact_mut(run).enumerate() {
            let (n, y) = (r / dst.height, r % dst.height);
            let at = ((n * shape.height + y + top) * shape.width + left) * shape.channels;
            row.copy_from_slice(&view.data()[at..at + run]);
        }
    }
    Ok((out, dst))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_padding_keeps_output_size() {
        assert_eq!(same_padding(28, 28, 5, 5, 1, 1).unwrap(), (4, 4));
        assert_eq!(same_padding(32, 32, 3, 3, 2, 2).unwrap(), (1, 1));
        // window smaller than stride needs no padding
        assert_eq!(same_padding(8, 8, 1, 1, 2, 2).unwrap(), (0, 0));
        assert!(same_padding(8, 8, 3, 3, 0, 1).is_err());
    }

    #[test]
    fn transpose_size() {
        assert_eq!(conv_transpose_out_size(14, 2, 2, 0).unwrap(), 28);
        assert_eq!(conv_transpose_out_size(7, 3, 2, 1).unwrap(), 14);
        assert_eq!(conv_transpose_out_size(0, 3, 2, 1).unwrap(), 0);
        assert!(conv_transpose_out_size(1, 1, 1, 2).is_err());
    }

    #[test]
    fn pads_and_crops_symmetrically() {
        let data: Vec<f32> = (1..=8).map(|v| v as f32).collect();
        let shape = ImageShape::new(2, 2, 2, 1);
        let view = TensorView::new(&data, shape).unwrap();

        let (padded, pshape) = zero_padding(&view, 3, 2).unwrap();
        assert_eq!(pshape, ImageShape::new(2, 5, 4, 1));
        // first image: one row of zeros on top, two below; one column each side
        assert_eq!(
            &padded[..20],
            &[
                0.0, 0.0, 0.0, 0.0, //
                0.0, 1.0, 2.0, 0.0, //
                0.0, 3.0, 4.0, 0.0, //
                0.0, 0.0, 0.0, 0.0, //
                0.0, 0.0, 0.0, 0.0,
            ]
        );

        let (cropped, cshape) = zero_padding_bwd(&padded, pshape, 3, 2).unwrap();
        assert_eq!(cshape, shape);
        assert_eq!(cropped, data);
    }

    #[test]
    fn crop_rejects_oversized_padding() {
        let shape = ImageShape::new(1, 2, 2, 1);
        let err = zero_padding_bwd(&[0.0; 4], shape, 3, 0).unwrap_err();
        assert!(matches!(err, LayoutError::ShapeMismatch(_)));
    }
}
