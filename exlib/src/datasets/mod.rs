//! Decoders for the fixed-layout binary image corpora.
//!
//! Every decoder produces a [`Dataset`]: raw `u8` pixels in `[N, H, W, C]`
//! order plus one or more label bytes per record.

pub mod cifar;
pub mod mnist;
pub mod stl10;

use std::fs::File;
use std::io::Read;
use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use clap::ValueEnum;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use crate::layout::ImageShape;

/// Decoded images and labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub images: Vec<u8>,
    pub shape: ImageShape,
    pub labels: Vec<u8>,
    /// Label bytes per record (1 for MNIST/CIFAR-10/STL-10, 2 for CIFAR-100,
    /// 0 for unlabeled STL-10).
    pub label_width: usize,
}

impl Dataset {
    pub fn new(images: Vec<u8>, shape: ImageShape, labels: Vec<u8>, label_width: usize) -> Result<Self> {
        ensure!(
            images.len() == shape.checked_len()?,
            "image buffer has {} bytes, shape {shape} needs {}",
            images.len(),
            shape.len()
        );
        ensure!(
            labels.len() == shape.batch * label_width,
            "{} label bytes for {} records of width {label_width}",
            labels.len(),
            shape.batch
        );
        Ok(Self {
            images,
            shape,
            labels,
            label_width,
        })
    }

    pub fn len(&self) -> usize {
        self.shape.batch
    }

    pub fn is_empty(&self) -> bool {
        self.shape.batch == 0
    }

    /// Label bytes of record `i`, `None` past the end.
    pub fn label(&self, i: usize) -> Option<&[u8]> {
        if i >= self.len() {
            return None;
        }
        let start = i.checked_mul(self.label_width)?;
        self.labels.get(start..start.checked_add(self.label_width)?)
    }

    /// Pixels as floats multiplied by `scale` (e.g. `1.0 / 255.0`).
    pub fn to_f32(&self, scale: f32) -> Vec<f32> {
        self.images.iter().map(|&p| p as f32 * scale).collect()
    }

    /// Copy of the records in `range`.
    pub fn batch(&self, range: Range<usize>) -> Result<Dataset> {
        ensure!(
            range.start <= range.end && range.end <= self.len(),
            "batch {range:?} out of range for {} records",
            self.len()
        );
        let img = self.shape.image_len();
        let shape = self.shape.with_batch(range.len());
        Ok(Dataset {
            images: self.images[range.start * img..range.end * img].to_vec(),
            shape,
            labels: self.labels[range.start * self.label_width..range.end * self.label_width].to_vec(),
            label_width: self.label_width,
        })
    }

    /// Append another dataset of the same image size.
    pub fn extend(&mut self, other: Dataset) -> Result<()> {
        ensure!(
            self.shape.with_batch(0) == other.shape.with_batch(0)
                && self.label_width == other.label_width,
            "cannot concatenate {} with {}",
            self.shape,
            other.shape
        );
        self.images.extend(other.images);
        self.labels.extend(other.labels);
        self.shape.batch += other.shape.batch;
        Ok(())
    }

    /// Record count per value of label byte `slot`.
    pub fn label_histogram(&self, slot: usize) -> Vec<usize> {
        let mut counts = Vec::new();
        if slot >= self.label_width {
            return counts;
        }
        for record in self.labels.chunks_exact(self.label_width) {
            let v = record[slot] as usize;
            if counts.len() <= v {
                counts.resize(v + 1, 0);
            }
            counts[v] += 1;
        }
        counts
    }
}

/// Corpora known to the command-line tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    Mnist,
    FashionMnist,
    Cifar10,
    Cifar100,
    Stl10,
}

impl DatasetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mnist => "mnist",
            Self::FashionMnist => "fashion_mnist",
            Self::Cifar10 => "cifar10",
            Self::Cifar100 => "cifar100",
            Self::Stl10 => "stl10",
        }
    }

    /// Load the train or test split from under `data_dir`.
    pub fn load(&self, data_dir: &Path, split: Split) -> Result<Dataset> {
        match (self, split) {
            (Self::Mnist, Split::Train) => mnist::load_train(&data_dir.join("mnist")),
            (Self::Mnist, Split::Test) => mnist::load_test(&data_dir.join("mnist")),
            (Self::FashionMnist, Split::Train) => mnist::load_train(&data_dir.join("fashion-mnist")),
            (Self::FashionMnist, Split::Test) => mnist::load_test(&data_dir.join("fashion-mnist")),
            (Self::Cifar10, Split::Train) => cifar::load_cifar10_train(data_dir),
            (Self::Cifar10, Split::Test) => cifar::load_cifar10_test(data_dir),
            (Self::Cifar100, Split::Train) => cifar::load_cifar100_train(data_dir),
            (Self::Cifar100, Split::Test) => cifar::load_cifar100_test(data_dir),
            (Self::Stl10, Split::Train) => stl10::load_train(data_dir),
            (Self::Stl10, Split::Test) => stl10::load_test(data_dir),
        }
    }

    /// Files `load` reads for `split`.
    pub fn files(&self, data_dir: &Path, split: Split) -> Result<Vec<PathBuf>> {
        let idx = |dir: &str, images: &str, labels: &str| -> Result<Vec<PathBuf>> {
            let dir = data_dir.join(dir);
            Ok(vec![find_file(&dir, images)?, find_file(&dir, labels)?])
        };
        let files = match (self, split) {
            (Self::Mnist, Split::Train) => idx("mnist", mnist::TRAIN_IMAGES, mnist::TRAIN_LABELS)?,
            (Self::Mnist, Split::Test) => idx("mnist", mnist::TEST_IMAGES, mnist::TEST_LABELS)?,
            (Self::FashionMnist, Split::Train) => {
                idx("fashion-mnist", mnist::TRAIN_IMAGES, mnist::TRAIN_LABELS)?
            }
            (Self::FashionMnist, Split::Test) => {
                idx("fashion-mnist", mnist::TEST_IMAGES, mnist::TEST_LABELS)?
            }
            (Self::Cifar10, Split::Train) => (1..=5)
                .map(|i| data_dir.join(cifar::CIFAR10_DIR).join(format!("data_batch_{i}.bin")))
                .collect(),
            (Self::Cifar10, Split::Test) => vec![data_dir.join(cifar::CIFAR10_DIR).join("test_batch.bin")],
            (Self::Cifar100, Split::Train) => vec![data_dir.join(cifar::CIFAR100_DIR).join("train.bin")],
            (Self::Cifar100, Split::Test) => vec![data_dir.join(cifar::CIFAR100_DIR).join("test.bin")],
            (Self::Stl10, Split::Train) => {
                let dir = data_dir.join(stl10::STL10_DIR);
                vec![dir.join(stl10::TRAIN_IMAGES), dir.join(stl10::TRAIN_LABELS)]
            }
            (Self::Stl10, Split::Test) => {
                let dir = data_dir.join(stl10::STL10_DIR);
                vec![dir.join(stl10::TEST_IMAGES), dir.join(stl10::TEST_LABELS)]
            }
        };
        Ok(files)
    }
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    Test,
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Train => "train",
            Self::Test => "test",
        })
    }
}

/// Read a whole file, inflating it when the name ends in `.gz`.
pub fn read_maybe_gz(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut bytes = Vec::new();
    if path.extension().is_some_and(|e| e == "gz") {
        GzDecoder::new(file)
            .read_to_end(&mut bytes)
            .with_context(|| format!("cannot inflate {}", path.display()))?;
    } else {
        let mut file = file;
        file.read_to_end(&mut bytes)
            .with_context(|| format!("cannot read {}", path.display()))?;
    }
    Ok(bytes)
}

/// `dir/name.gz` if present, otherwise `dir/name`.
pub(crate) fn find_file(dir: &Path, name: &str) -> Result<PathBuf> {
    let plain = dir.join(name);
    let gz = dir.join(format!("{name}.gz"));
    if gz.exists() {
        Ok(gz)
    } else if plain.exists() {
        Ok(plain)
    } else {
        anyhow::bail!("neither {} nor {} exists", gz.display(), plain.display())
    }
}
