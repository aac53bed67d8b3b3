//! Single-threaded reference realization.

use super::executor::LayoutExecutor;
use super::geometry::{Geometry, ImageShape};
use super::kernels;

/// Walks the column tensor front to back on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl LayoutExecutor for Sequential {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn im2col_into(&self, img: &[f32], shape: &ImageShape, geom: &Geometry, col: &mut [f32]) {
        let patch_len = geom.patch_len(shape.channels);
        if patch_len == 0 {
            return;
        }
        for (p, patch) in col.chunks_exact_mut(patch_len).enumerate() {
            let at = kernels::patch_coords(geom, p);
            kernels::gather_patch(img, shape, geom, at, patch);
        }
    }

    fn col2im_into(&self, col: &[f32], shape: &ImageShape, geom: &Geometry, img: &mut [f32]) {
        img.fill(0.0);
        let patch_len = geom.patch_len(shape.channels);
        if patch_len == 0 {
            return;
        }
        for (p, patch) in col.chunks_exact(patch_len).enumerate() {
            let at = kernels::patch_coords(geom, p);
            kernels::scatter_patch(patch, shape, geom, at, img);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn im2col_unrolls_overlapping_windows() {
        let img: Vec<f32> = (0..9).map(|v| v as f32).collect();
        let shape = ImageShape::new(1, 3, 3, 1);
        let geom = Geometry::new(2, 2, 2, 2, 1, 1);
        let mut col = vec![0.0; 16];
        Sequential.im2col_into(&img, &shape, &geom, &mut col);
        assert_eq!(
            col,
            vec![
                0.0, 1.0, 3.0, 4.0, //
                1.0, 2.0, 4.0, 5.0, //
                3.0, 4.0, 6.0, 7.0, //
                4.0, 5.0, 7.0, 8.0,
            ]
        );
    }

    #[test]
    fn col2im_counts_covering_windows() {
        let shape = ImageShape::new(1, 3, 3, 1);
        let geom = Geometry::new(2, 2, 2, 2, 1, 1);
        let ones = vec![1.0f32; 9];
        let mut col = vec![0.0; 16];
        Sequential.im2col_into(&ones, &shape, &geom, &mut col);

        let mut img = vec![f32::NAN; 9];
        Sequential.col2im_into(&col, &shape, &geom, &mut img);
        assert_eq!(img, vec![1.0, 2.0, 1.0, 2.0, 4.0, 2.0, 1.0, 2.0, 1.0]);
    }

    #[test]
    fn channels_stay_interleaved() {
        // 1x2x2x2: pixel (y, x) holds [10*(2y+x), 10*(2y+x)+1]
        let img = vec![0.0, 1.0, 10.0, 11.0, 20.0, 21.0, 30.0, 31.0];
        let shape = ImageShape::new(1, 2, 2, 2);
        let geom = Geometry::new(1, 2, 2, 1, 1, 1);
        let mut col = vec![0.0; 8];
        Sequential.im2col_into(&img, &shape, &geom, &mut col);
        assert_eq!(col, vec![0.0, 1.0, 20.0, 21.0, 10.0, 11.0, 30.0, 31.0]);
    }
}
