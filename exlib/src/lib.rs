//! Tensor re-layout kernels for convolutional networks, plus the small I/O
//! layer around them.
//!
//! - [`layout`]: `im2col` / `col2im` with sequential and rayon executors.
//! - [`conv`]: convolution forward/backward on top of the column tensor.
//! - [`datasets`]: MNIST-style IDX and CIFAR binary decoders.
//! - [`image_io`]: image file codec wrapper.
//! - [`blob`]: on-disk tensor format.

pub mod blob;
pub mod config;
pub mod conv;
pub mod datasets;
pub mod image_io;
pub mod layout;
pub mod metrics;
pub mod report;
