//! Inner loops shared by the sequential and parallel executors.
//!
//! For a fixed `(n, oh, ow, k)` the `(l, m)` axes are contiguous in both the
//! image and the column tensor, so every helper moves `fil_w * channels`
//! values at a time. The element order is exactly the six-loop formula of
//! [`Geometry::img_index`] / [`Geometry::col_index`].

use std::ops::Range;

use super::geometry::{Geometry, ImageShape};

/// Split a flat patch index into `(n, oh, ow)`.
#[inline]
pub(crate) fn patch_coords(geom: &Geometry, p: usize) -> (usize, usize, usize) {
    let ow = p % geom.out_w;
    let rest = p / geom.out_w;
    (rest / geom.out_h, rest % geom.out_h, ow)
}

/// Copy the receptive field of window `(n, oh, ow)` into `patch`.
#[inline]
pub(crate) fn gather_patch(
    img: &[f32],
    shape: &ImageShape,
    geom: &Geometry,
    (n, oh, ow): (usize, usize, usize),
    patch: &mut [f32],
) {
    let run = geom.fil_w * shape.channels;
    for (k, dst) in patch.chunks_exact_mut(run).enumerate() {
        let src = geom.img_index(shape, n, oh, ow, k, 0, 0);
        dst.copy_from_slice(&img[src..src + run]);
    }
}

/// Add `patch` onto the receptive field of window `(n, oh, ow)`.
#[inline]
pub(crate) fn scatter_patch(
    patch: &[f32],
    shape: &ImageShape,
    geom: &Geometry,
    (n, oh, ow): (usize, usize, usize),
    img: &mut [f32],
) {
    let run = geom.fil_w * shape.channels;
    for (k, src) in patch.chunks_exact(run).enumerate() {
        let dst = geom.img_index(shape, n, oh, ow, k, 0, 0);
        for (d, s) in img[dst..dst + run].iter_mut().zip(src) {
            *d += *s;
        }
    }
}

/// Window positions along one axis whose receptive field covers `pos`.
///
/// Position `o` covers `pos` iff `o * stride <= pos < o * stride + fil`.
#[inline]
pub(crate) fn covering(pos: usize, fil: usize, stride: usize, out: usize) -> Range<usize> {
    let lo = if pos + 1 > fil {
        (pos + 1 - fil).div_ceil(stride)
    } else {
        0
    };
    let hi = (pos / stride + 1).min(out);
    lo..hi.max(lo)
}

/// Sum every column value that lands on pixel row `(n, y)` into `row`.
///
/// Contributions to a pixel are added in ascending `(oh, ow)` order, which
/// is the order the sequential scatter visits them.
pub(crate) fn gather_row(
    col: &[f32],
    shape: &ImageShape,
    geom: &Geometry,
    (n, y): (usize, usize),
    row: &mut [f32],
) {
    row.fill(0.0);
    let ch = shape.channels;
    for oh in covering(y, geom.fil_h, geom.stride_h, geom.out_h) {
        let k = y - oh * geom.stride_h;
        for (x, pixel) in row.chunks_exact_mut(ch).enumerate() {
            for ow in covering(x, geom.fil_w, geom.stride_w, geom.out_w) {
                let l = x - ow * geom.stride_w;
                let src = geom.col_index(shape, n, oh, ow, k, l, 0);
                for (d, s) in pixel.iter_mut().zip(&col[src..src + ch]) {
                    *d += *s;
                }
            }
        }
    }
}
