//! CIFAR-10 / CIFAR-100 binary batches.
//!
//! Each record is the label byte(s) followed by a 3x32x32 channel-major
//! image. Records are decoded to channel-fastest `[32, 32, 3]`.

use std::fs;
use std::path::Path;

use anyhow::{ensure, Context, Result};

use super::Dataset;
use crate::layout::ImageShape;

pub const SIDE: usize = 32;
pub const CHANNELS: usize = 3;
pub const IMAGE_BYTES: usize = SIDE * SIDE * CHANNELS;

pub const CIFAR10_DIR: &str = "cifar-10-batches-bin";
pub const CIFAR100_DIR: &str = "cifar-100-binary";

/// Decode `count` records (all of them if `None`) with `label_width` label
/// bytes each.
pub fn decode(bin: &[u8], label_width: usize, count: Option<usize>) -> Result<Dataset> {
    let record = label_width + IMAGE_BYTES;
    ensure!(
        bin.len() % record == 0,
        "CIFAR buffer of {} bytes is not a whole number of {record}-byte records ({} left over)",
        bin.len(),
        bin.len() % record
    );
    let available = bin.len() / record;
    let count = count.unwrap_or(available);
    ensure!(
        count <= available,
        "requested {count} CIFAR records but buffer holds {available}"
    );

    let mut images = vec![0u8; count * IMAGE_BYTES];
    let mut labels = Vec::with_capacity(count * label_width);
    for (src, dst) in bin
        .chunks_exact(record)
        .take(count)
        .zip(images.chunks_exact_mut(IMAGE_BYTES))
    {
        labels.extend_from_slice(&src[..label_width]);
        chw_to_hwc(&src[label_width..], dst);
    }

    Dataset::new(
        images,
        ImageShape::new(count, SIDE, SIDE, CHANNELS),
        labels,
        label_width,
    )
}

fn chw_to_hwc(chw: &[u8], hwc: &mut [u8]) {
    let plane = SIDE * SIDE;
    for (p, pixel) in hwc.chunks_exact_mut(CHANNELS).enumerate() {
        for (c, v) in pixel.iter_mut().enumerate() {
            *v = chw[c * plane + p];
        }
    }
}

fn load_files(dir: &Path, names: &[String], label_width: usize) -> Result<Dataset> {
    let mut bin = Vec::new();
    for name in names {
        let path = dir.join(name);
        let bytes = fs::read(&path).with_context(|| format!("cannot read {}", path.display()))?;
        log::debug!("read {} ({} bytes)", path.display(), bytes.len());
        bin.extend(bytes);
    }
    decode(&bin, label_width, None).with_context(|| format!("cannot decode CIFAR data in {}", dir.display()))
}

/// `data_batch_1.bin` .. `data_batch_5.bin` under `root/cifar-10-batches-bin`.
pub fn load_cifar10_train(root: &Path) -> Result<Dataset> {
    let names: Vec<String> = (1..=5).map(|i| format!("data_batch_{i}.bin")).collect();
    load_files(&root.join(CIFAR10_DIR), &names, 1)
}

pub fn load_cifar10_test(root: &Path) -> Result<Dataset> {
    load_files(&root.join(CIFAR10_DIR), &["test_batch.bin".to_string()], 1)
}

/// `train.bin` under `root/cifar-100-binary`; labels are `(coarse, fine)`.
pub fn load_cifar100_train(root: &Path) -> Result<Dataset> {
    load_files(&root.join(CIFAR100_DIR), &["train.bin".to_string()], 2)
}

pub fn load_cifar100_test(root: &Path) -> Result<Dataset> {
    load_files(&root.join(CIFAR100_DIR), &["test.bin".to_string()], 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Record whose pixel `p` of channel `c` holds `(c * 100 + p) % 251`.
    fn record(labels: &[u8]) -> Vec<u8> {
        let mut rec = labels.to_vec();
        for c in 0..CHANNELS {
            for p in 0..SIDE * SIDE {
                rec.push(((c * 100 + p) % 251) as u8);
            }
        }
        rec
    }

    #[test]
    fn transposes_to_channel_fastest() {
        let bin = record(&[6]);
        let ds = decode(&bin, 1, None).unwrap();
        assert_eq!(ds.shape, ImageShape::new(1, 32, 32, 3));
        assert_eq!(ds.labels, vec![6]);
        // pixel 5 -> [5, 105, 205]
        assert_eq!(&ds.images[15..18], &[5, 105, 205]);
    }

    #[test]
    fn cifar100_keeps_both_labels() {
        let mut bin = record(&[3, 42]);
        bin.extend(record(&[19, 7]));
        let ds = decode(&bin, 2, None).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.label(1), Some(&[19u8, 7][..]));
    }

    #[test]
    fn rejects_partial_records_and_overlong_requests() {
        let mut bin = record(&[1]);
        bin.push(0);
        let err = decode(&bin, 1, None).unwrap_err();
        assert!(err.to_string().contains("1 left over"));

        let bin = record(&[1]);
        assert!(decode(&bin, 1, Some(2)).is_err());
        assert_eq!(decode(&bin, 1, Some(0)).unwrap().len(), 0);
    }
}
