//! Rayon realization.
//!
//! `im2col` writes disjoint patches, so patches are simply split across
//! workers. `col2im` is where windows collide: by default each worker owns a
//! range of image rows and gathers every contribution to its pixels itself,
//! which needs neither locks nor atomics.

use std::sync::Arc;

use clap::ValueEnum;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use super::executor::LayoutExecutor;
use super::geometry::{Geometry, ImageShape};
use super::kernels;

/// Minimum patches handed to one rayon task.
const MIN_PATCHES_PER_TASK: usize = 64;

/// How the parallel `col2im` avoids write races on overlapping windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Col2ImStrategy {
    /// Partition by image row; each worker gathers the windows covering its pixels.
    #[default]
    Gather,
    /// Partition by batch image; each worker scatters its own image sequentially.
    BatchScatter,
}

/// Data-parallel executor, optionally bound to a dedicated thread pool.
#[derive(Debug, Clone, Default)]
pub struct Parallel {
    pool: Option<Arc<ThreadPool>>,
    strategy: Col2ImStrategy,
}

impl Parallel {
    /// Run on the global rayon pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run on a dedicated pool of `threads` workers.
    pub fn with_threads(threads: usize) -> Result<Self, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("exlib-layout-{i}"))
            .build()?;
        Ok(Self {
            pool: Some(Arc::new(pool)),
            strategy: Col2ImStrategy::default(),
        })
    }

    pub fn with_strategy(mut self, strategy: Col2ImStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> Col2ImStrategy {
        self.strategy
    }

    /// Worker count the executor will fan out to.
    pub fn threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}

impl LayoutExecutor for Parallel {
    fn name(&self) -> &'static str {
        match self.strategy {
            Col2ImStrategy::Gather => "parallel",
            Col2ImStrategy::BatchScatter => "parallel-batch",
        }
    }

    fn im2col_into(&self, img: &[f32], shape: &ImageShape, geom: &Geometry, col: &mut [f32]) {
        let patch_len = geom.patch_len(shape.channels);
        if patch_len == 0 {
            return;
        }
        self.install(|| {
            col.par_chunks_mut(patch_len)
                .enumerate()
                .with_min_len(MIN_PATCHES_PER_TASK)
                .for_each(|(p, patch)| {
                    let at = kernels::patch_coords(geom, p);
                    kernels::gather_patch(img, shape, geom, at, patch);
                });
        });
    }

    fn col2im_into(&self, col: &[f32], shape: &ImageShape, geom: &Geometry, img: &mut [f32]) {
        if col.is_empty() || img.is_empty() {
            img.fill(0.0);
            return;
        }
        match self.strategy {
            Col2ImStrategy::Gather => self.install(|| {
                img.par_chunks_mut(shape.row_len())
                    .enumerate()
                    .for_each(|(r, row)| {
                        let at = (r / shape.height, r % shape.height);
                        kernels::gather_row(col, shape, geom, at, row);
                    });
            }),
            Col2ImStrategy::BatchScatter => {
                let single = shape.with_batch(1);
                let col_per_image = geom.patches(1) * geom.patch_len(shape.channels);
                self.install(|| {
                    img.par_chunks_mut(shape.image_len())
                        .zip(col.par_chunks(col_per_image))
                        .for_each(|(image, cols)| {
                            super::sequential::Sequential.col2im_into(cols, &single, geom, image);
                        });
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Sequential;

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| ((i * 37) % 101) as f32 * 0.25 - 12.0).collect()
    }

    fn case() -> (ImageShape, Geometry) {
        // 3x3 windows, stride 2 over 9x7: overlapping on both axes
        (ImageShape::new(3, 9, 7, 2), Geometry::new(4, 3, 3, 3, 2, 2))
    }

    #[test]
    fn im2col_matches_sequential() {
        let (shape, geom) = case();
        let img = ramp(shape.len());
        let col_len = geom.validate(&shape).unwrap();

        let mut expected = vec![0.0; col_len];
        Sequential.im2col_into(&img, &shape, &geom, &mut expected);
        let mut got = vec![0.0; col_len];
        Parallel::new().im2col_into(&img, &shape, &geom, &mut got);
        assert_eq!(got, expected);
    }

    #[test]
    fn col2im_strategies_match_sequential() {
        let (shape, geom) = case();
        let col = ramp(geom.validate(&shape).unwrap());

        let mut expected = vec![0.0; shape.len()];
        Sequential.col2im_into(&col, &shape, &geom, &mut expected);

        for strategy in [Col2ImStrategy::Gather, Col2ImStrategy::BatchScatter] {
            let mut got = vec![f32::NAN; shape.len()];
            Parallel::new()
                .with_strategy(strategy)
                .col2im_into(&col, &shape, &geom, &mut got);
            for (i, (g, e)) in got.iter().zip(&expected).enumerate() {
                assert!((g - e).abs() <= 1e-5, "{strategy:?} element {i}: {g} vs {e}");
            }
        }
    }

    #[test]
    fn dedicated_pool_reports_threads() {
        let exec = Parallel::with_threads(2).unwrap();
        assert_eq!(exec.threads(), 2);
        assert_eq!(exec.name(), "parallel");
        assert_eq!(exec.with_strategy(Col2ImStrategy::BatchScatter).name(), "parallel-batch");
    }

    #[test]
    fn dedicated_pool_matches_sequential() {
        let (shape, geom) = case();
        let img = ramp(shape.len());
        let col_len = geom.validate(&shape).unwrap();

        let mut col = vec![0.0; col_len];
        Sequential.im2col_into(&img, &shape, &geom, &mut col);
        let mut expected = vec![0.0; shape.len()];
        Sequential.col2im_into(&col, &shape, &geom, &mut expected);

        for strategy in [Col2ImStrategy::Gather, Col2ImStrategy::BatchScatter] {
            let exec = Parallel::with_threads(3).unwrap().with_strategy(strategy);
            let mut got_col = vec![f32::NAN; col_len];
            exec.im2col_into(&img, &shape, &geom, &mut got_col);
            assert_eq!(got_col, col);

            let mut got = vec![f32::NAN; shape.len()];
            exec.col2im_into(&col, &shape, &geom, &mut got);
            assert!(got.iter().zip(&expected).all(|(g, e)| (g - e).abs() <= 1e-5), "{strategy:?}");
        }
    }

    #[test]
    fn empty_column_zeroes_image() {
        let shape = ImageShape::new(1, 2, 2, 1);
        let geom = Geometry::new(0, 0, 2, 2, 1, 1);
        let mut img = vec![5.0; 4];
        Parallel::new().col2im_into(&[], &shape, &geom, &mut img);
        assert_eq!(img, vec![0.0; 4]);
    }
}
