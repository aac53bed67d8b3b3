//! STL-10 binary files.
//!
//! `*_X.bin` holds 3x96x96 images with each channel plane stored column by
//! column; `*_y.bin` holds one label byte (1..=10) per image. The unlabeled
//! split only has `unlabeled_X.bin`, read by record range.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

use anyhow::{ensure, Context, Result};

use super::Dataset;
use crate::layout::ImageShape;

pub const SIDE: usize = 96;
pub const CHANNELS: usize = 3;
pub const IMAGE_BYTES: usize = SIDE * SIDE * CHANNELS;

pub const STL10_DIR: &str = "stl10_binary";
pub const UNLABELED_RECORDS: usize = 100_000;

pub const TRAIN_IMAGES: &str = "train_X.bin";
pub const TRAIN_LABELS: &str = "train_y.bin";
pub const TEST_IMAGES: &str = "test_X.bin";
pub const TEST_LABELS: &str = "test_y.bin";
pub const UNLABELED_IMAGES: &str = "unlabeled_X.bin";

/// Decode a run of STL-10 image records into `[N, 96, 96, 3]`.
pub fn decode_images(bin: &[u8]) -> Result<(Vec<u8>, ImageShape)> {
    ensure!(
        bin.len() % IMAGE_BYTES == 0,
        "STL-10 buffer of {} bytes is not a whole number of {IMAGE_BYTES}-byte images ({} left over)",
        bin.len(),
        bin.len() % IMAGE_BYTES
    );
    let count = bin.len() / IMAGE_BYTES;
    let mut images = vec![0u8; bin.len()];
    for (src, dst) in bin
        .chunks_exact(IMAGE_BYTES)
        .zip(images.chunks_exact_mut(IMAGE_BYTES))
    {
        planes_to_hwc(src, dst);
    }
    Ok((images, ImageShape::new(count, SIDE, SIDE, CHANNELS)))
}

// source offset of (h, w, c) is c*plane + w*SIDE + h
fn planes_to_hwc(src: &[u8], hwc: &mut [u8]) {
    let plane = SIDE * SIDE;
    for (p, pixel) in hwc.chunks_exact_mut(CHANNELS).enumerate() {
        let (h, w) = (p / SIDE, p % SIDE);
        for (c, v) in pixel.iter_mut().enumerate() {
            *v = src[c * plane + w * SIDE + h];
        }
    }
}

/// Decode an image/label buffer pair.
pub fn decode(x_bin: &[u8], y_bin: &[u8]) -> Result<Dataset> {
    let (images, shape) = decode_images(x_bin)?;
    ensure!(
        y_bin.len() == shape.batch,
        "STL-10 has {} images but {} labels",
        shape.batch,
        y_bin.len()
    );
    Dataset::new(images, shape, y_bin.to_vec(), 1)
}

fn load_pair(dir: &Path, images: &str, labels: &str) -> Result<Dataset> {
    let x_path = dir.join(images);
    let y_path = dir.join(labels);
    let x_bin = fs::read(&x_path).with_context(|| format!("cannot read {}", x_path.display()))?;
    let y_bin = fs::read(&y_path).with_context(|| format!("cannot read {}", y_path.display()))?;
    log::debug!(
        "read {} ({} bytes), {} ({} bytes)",
        x_path.display(),
        x_bin.len(),
        y_path.display(),
        y_bin.len()
    );
    decode(&x_bin, &y_bin).with_context(|| format!("cannot decode STL-10 data in {}", dir.display()))
}

/// `train_X.bin` / `train_y.bin` under `root/stl10_binary`.
pub fn load_train(root: &Path) -> Result<Dataset> {
    load_pair(&root.join(STL10_DIR), TRAIN_IMAGES, TRAIN_LABELS)
}

pub fn load_test(root: &Path) -> Result<Dataset> {
    load_pair(&root.join(STL10_DIR), TEST_IMAGES, TEST_LABELS)
}

/// Records `range` of `unlabeled_X.bin`, without labels (`label_width == 0`).
///
/// The range must lie within `0..100_000`; only the requested bytes are read.
pub fn load_unlabeled(root: &Path, range: Range<usize>) -> Result<Dataset> {
    ensure!(
        range.start <= range.end && range.end <= UNLABELED_RECORDS,
        "unlabeled range {range:?} must lie within 0..{UNLABELED_RECORDS}"
    );
    let path = root.join(STL10_DIR).join(UNLABELED_IMAGES);
    let mut file = File::open(&path).with_context(|| format!("cannot open {}", path.display()))?;

    let offset = (range.start * IMAGE_BYTES) as u64;
    file.seek(SeekFrom::Start(offset))
        .with_context(|| format!("cannot seek to byte {offset} in {}", path.display()))?;
    let mut bin = vec![0u8; range.len() * IMAGE_BYTES];
    file.read_exact(&mut bin).with_context(|| {
        format!(
            "{} does not hold records {range:?}",
            path.display()
        )
    })?;

    let (images, shape) = decode_images(&bin)?;
    Dataset::new(images, shape, Vec::new(), 0)
}
