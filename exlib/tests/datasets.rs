//! Dataset loaders against synthetic corpora written to temp directories.

use std::fs;
use std::io::Write;
use std::path::Path;

use dnn_exlib::datasets::{cifar, mnist, stl10, DatasetKind, Split};
use dnn_exlib::layout::{Executor, Geometry, ImageShape, TensorView};
use flate2::write::GzEncoder;
use flate2::Compression;

fn idx_images(count: u32, rows: u32, cols: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    for v in [mnist::IMAGES_MAGIC, count, rows, cols] {
        buf.extend_from_slice(&v.to_be_bytes());
    }
    buf.extend((0..count * rows * cols).map(|i| (i % 256) as u8));
    buf
}

fn idx_labels(labels: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&mnist::LABELS_MAGIC.to_be_bytes());
    buf.extend_from_slice(&(labels.len() as u32).to_be_bytes());
    buf.extend_from_slice(labels);
    buf
}

fn write_gz(path: &Path, bytes: &[u8]) {
    let mut enc = GzEncoder::new(fs::File::create(path).unwrap(), Compression::default());
    enc.write_all(bytes).unwrap();
    enc.finish().unwrap();
}

fn cifar_records(count: usize, label_width: usize) -> Vec<u8> {
    let mut bin = Vec::new();
    for r in 0..count {
        bin.extend((0..label_width).map(|k| (r + k) as u8));
        bin.extend((0..cifar::IMAGE_BYTES).map(|i| ((i + r) % 256) as u8));
    }
    bin
}

#[test]
fn mnist_gz_split_loads() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("mnist");
    fs::create_dir_all(&dir).unwrap();
    write_gz(&dir.join("t10k-images-idx3-ubyte.gz"), &idx_images(3, 4, 5));
    write_gz(&dir.join("t10k-labels-idx1-ubyte.gz"), &idx_labels(&[4, 0, 9]));

    let ds = DatasetKind::Mnist.load(root.path(), Split::Test).unwrap();
    assert_eq!(ds.shape, ImageShape::new(3, 4, 5, 1));
    assert_eq!(ds.labels, vec![4, 0, 9]);
    assert_eq!(ds.images[21], 21);

    let files = DatasetKind::Mnist.files(root.path(), Split::Test).unwrap();
    assert_eq!(files.len(), 2);
    assert!(DatasetKind::Mnist.load(root.path(), Split::Train).is_err());
}

#[test]
fn mnist_uncompressed_files_and_count_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("train-images-idx3-ubyte"), idx_images(2, 2, 2)).unwrap();
    fs::write(dir.path().join("train-labels-idx1-ubyte"), idx_labels(&[1, 2, 3])).unwrap();

    let err = mnist::load_train(dir.path()).unwrap_err();
    assert!(err.to_string().contains("2 images but"));

    fs::write(dir.path().join("train-labels-idx1-ubyte"), idx_labels(&[1, 2])).unwrap();
    assert_eq!(mnist::load_train(dir.path()).unwrap().len(), 2);
}

#[test]
fn cifar10_train_concatenates_batches() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join(cifar::CIFAR10_DIR);
    fs::create_dir_all(&dir).unwrap();
    for i in 1..=5 {
        fs::write(dir.join(format!("data_batch_{i}.bin")), cifar_records(2, 1)).unwrap();
    }

    let ds = cifar::load_cifar10_train(root.path()).unwrap();
    assert_eq!(ds.shape, ImageShape::new(10, 32, 32, 3));
    assert_eq!(ds.label_histogram(0), vec![5, 5]);
    // record 1, pixel 0: channels read from offsets 0, 1024, 2048 (+1)
    let img = ds.shape.image_len();
    assert_eq!(&ds.images[img..img + 3], &[1, 1, 1]);
}

#[test]
fn cifar100_missing_file_names_path() {
    let root = tempfile::tempdir().unwrap();
    let err = cifar::load_cifar100_test(root.path()).unwrap_err();
    assert!(format!("{err:#}").contains("test.bin"));

    let dir = root.path().join(cifar::CIFAR100_DIR);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("test.bin"), cifar_records(3, 2)).unwrap();
    let ds = cifar::load_cifar100_test(root.path()).unwrap();
    assert_eq!(ds.label(2), Some(&[2u8, 3][..]));
}

#[test]
fn decoded_batch_feeds_the_kernel() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("fashion-mnist");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("train-images-idx3-ubyte"), idx_images(4, 6, 6)).unwrap();
    fs::write(dir.join("train-labels-idx1-ubyte"), idx_labels(&[0, 1, 2, 3])).unwrap();

    let ds = DatasetKind::FashionMnist.load(root.path(), Split::Train).unwrap();
    let batch = ds.batch(1..3).unwrap();
    let pixels = batch.to_f32(1.0 / 255.0);
    let geom = Geometry::for_conv(&batch.shape, 3, 3, 1, 1, 0, 0).unwrap();

    let col = Executor::default()
        .im2col(&TensorView::new(&pixels, batch.shape).unwrap(), &geom)
        .unwrap();
    assert_eq!(col.len(), 2 * 4 * 4 * 3 * 3);
    // first value of the first patch is pixel (0, 0) of record 1
    assert!((col[0] - 36.0 / 255.0).abs() < 1e-6);
}

/// STL-10 image whose byte at (c, column a, row b) holds `(seed + c * 50 + a * 5 + b) % 256`.
fn stl10_record(seed: usize) -> Vec<u8> {
    let side = stl10::SIDE;
    let mut rec = Vec::with_capacity(stl10::IMAGE_BYTES);
    for c in 0..stl10::CHANNELS {
        for a in 0..side {
            for b in 0..side {
                rec.push(((seed + c * 50 + a * 5 + b) % 256) as u8);
            }
        }
    }
    rec
}

#[test]
fn stl10_splits_transpose_column_major_planes() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join(stl10::STL10_DIR);
    fs::create_dir_all(&dir).unwrap();
    let mut x = stl10_record(0);
    x.extend(stl10_record(1));
    fs::write(dir.join("train_X.bin"), &x).unwrap();
    fs::write(dir.join("train_y.bin"), [3u8, 10]).unwrap();

    let ds = DatasetKind::Stl10.load(root.path(), Split::Train).unwrap();
    assert_eq!(ds.shape, ImageShape::new(2, 96, 96, 3));
    assert_eq!(ds.labels, vec![3, 10]);
    // record 0, pixel (h=0, w=1): column 1, row 0
    assert_eq!(&ds.images[3..6], &[5, 55, 105]);
    // record 0, pixel (h=1, w=0): column 0, row 1
    let p = 96 * 3;
    assert_eq!(&ds.images[p..p + 3], &[1, 51, 101]);

    let files = DatasetKind::Stl10.files(root.path(), Split::Train).unwrap();
    assert_eq!(files, vec![dir.join("train_X.bin"), dir.join("train_y.bin")]);
    assert!(DatasetKind::Stl10.load(root.path(), Split::Test).is_err());
}

#[test]
fn stl10_unlabeled_reads_only_the_requested_records() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join(stl10::STL10_DIR);
    fs::create_dir_all(&dir).unwrap();
    let mut x = Vec::new();
    for seed in 0..4 {
        x.extend(stl10_record(seed * 7));
    }
    fs::write(dir.join("unlabeled_X.bin"), &x).unwrap();

    let ds = stl10::load_unlabeled(root.path(), 1..3).unwrap();
    assert_eq!(ds.shape, ImageShape::new(2, 96, 96, 3));
    assert!(ds.labels.is_empty());
    assert_eq!(ds.label_width, 0);
    // first pixel of records 1 and 2
    assert_eq!(&ds.images[..3], &[7, 57, 107]);
    let img = ds.shape.image_len();
    assert_eq!(&ds.images[img..img + 3], &[14, 64, 114]);

    assert!(stl10::load_unlabeled(root.path(), 3..5).is_err());
    assert!(stl10::load_unlabeled(root.path(), 0..100_001).is_err());
    assert!(stl10::load_unlabeled(root.path(), 2..2).unwrap().is_empty());
}
