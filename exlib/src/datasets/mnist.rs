//! IDX files as used by MNIST and Fashion-MNIST.
//!
//! ```text
//! images: [magic 0x00000803][count][rows][cols][count*rows*cols bytes]
//! labels: [magic 0x00000801][count][count bytes]
//! ```
//! Header integers are big-endian. Files may be gzip compressed.

use std::io::Cursor;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use byteorder::{BigEndian, ReadBytesExt};

use super::{find_file, read_maybe_gz, Dataset};
use crate::layout::ImageShape;

pub const IMAGES_MAGIC: u32 = 0x0000_0803;
pub const LABELS_MAGIC: u32 = 0x0000_0801;

pub const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
pub const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
pub const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
pub const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

/// Decode an IDX3 image file into `[count, rows, cols, 1]` pixels.
pub fn decode_images(bytes: &[u8]) -> Result<(Vec<u8>, ImageShape)> {
    let mut cur = Cursor::new(bytes);
    let magic = cur
        .read_u32::<BigEndian>()
        .context("failed to read image file magic")?;
    ensure!(
        magic == IMAGES_MAGIC,
        "invalid IDX image magic {magic:#010x}, expected {IMAGES_MAGIC:#010x}"
    );
    let count = cur.read_u32::<BigEndian>().context("failed to read image count")? as usize;
    let rows = cur.read_u32::<BigEndian>().context("failed to read row count")? as usize;
    let cols = cur.read_u32::<BigEndian>().context("failed to read column count")? as usize;
    log::debug!("IDX images: {count} x {rows}x{cols}");

    let shape = ImageShape::new(count, rows, cols, 1);
    let body = &bytes[cur.position() as usize..];
    let needed = shape.checked_len()?;
    ensure!(
        body.len() >= needed,
        "IDX image payload has {} bytes, header promises {needed}",
        body.len()
    );
    if body.len() > needed {
        log::warn!("ignoring {} trailing bytes in IDX image file", body.len() - needed);
    }
    Ok((body[..needed].to_vec(), shape))
}

/// Decode an IDX1 label file.
pub fn decode_labels(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut cur = Cursor::new(bytes);
    let magic = cur
        .read_u32::<BigEndian>()
        .context("failed to read label file magic")?;
    ensure!(
        magic == LABELS_MAGIC,
        "invalid IDX label magic {magic:#010x}, expected {LABELS_MAGIC:#010x}"
    );
    let count = cur.read_u32::<BigEndian>().context("failed to read label count")? as usize;

    let body = &bytes[cur.position() as usize..];
    ensure!(
        body.len() >= count,
        "IDX label payload has {} bytes, header promises {count}",
        body.len()
    );
    if body.len() > count {
        log::warn!("ignoring {} trailing bytes in IDX label file", body.len() - count);
    }
    Ok(body[..count].to_vec())
}

/// Decode a matching image/label file pair.
pub fn load(images: &Path, labels: &Path) -> Result<Dataset> {
    let (pixels, shape) = decode_images(&read_maybe_gz(images)?)
        .with_context(|| format!("cannot decode {}", images.display()))?;
    let labels_buf = decode_labels(&read_maybe_gz(labels)?)
        .with_context(|| format!("cannot decode {}", labels.display()))?;
    ensure!(
        labels_buf.len() == shape.batch,
        "{} has {} images but {} has {} labels",
        images.display(),
        shape.batch,
        labels.display(),
        labels_buf.len()
    );
    Dataset::new(pixels, shape, labels_buf, 1)
}

/// The 60 000-record training split in `dir`.
pub fn load_train(dir: &Path) -> Result<Dataset> {
    load(&find_file(dir, TRAIN_IMAGES)?, &find_file(dir, TRAIN_LABELS)?)
}

/// The 10 000-record test split in `dir`.
pub fn load_test(dir: &Path) -> Result<Dataset> {
    load(&find_file(dir, TEST_IMAGES)?, &find_file(dir, TEST_LABELS)?)
}
