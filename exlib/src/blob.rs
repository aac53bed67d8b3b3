//! Binary file format for a float tensor and its shape.
//!
//! Format (header integers are big-endian, payload is little-endian):
//! ```text
//! [magic:   4 bytes]  0x58 0x4C 0x54 0x00  ("XLT\0")
//! [version: 1 byte ]  0x01
//! [rank:    4 bytes]
//! for each axis:
//!     [dim: 8 bytes]
//! [data: prod(dims) x f32 LE]
//! ```

use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};

const MAGIC: [u8; 4] = [0x58, 0x4C, 0x54, 0x00]; // "XLT\0"
const VERSION: u8 = 1;
const MAX_RANK: u32 = 8;

/// A dense f32 tensor with an arbitrary (small) rank.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorBlob {
    pub dims: Vec<usize>,
    pub data: Vec<f32>,
}

impl TensorBlob {
    pub fn new(dims: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        ensure!(dims.len() <= MAX_RANK as usize, "rank {} exceeds {MAX_RANK}", dims.len());
        let expected = element_count(&dims)?;
        ensure!(
            data.len() == expected,
            "tensor data has {} elements, dims {dims:?} need {expected}",
            data.len()
        );
        Ok(Self { dims, data })
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(9 + 8 * self.dims.len() + 4 * self.data.len());
        buf.write_all(&MAGIC)?;
        buf.write_u8(VERSION)?;
        buf.write_u32::<BigEndian>(self.dims.len() as u32)?;
        for &dim in &self.dims {
            buf.write_u64::<BigEndian>(dim as u64)?;
        }
        for &v in &self.data {
            buf.write_f32::<LittleEndian>(v)?;
        }
        Ok(buf)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(data);

        let mut magic = [0u8; 4];
        cur.read_exact(&mut magic)
            .context("failed to read tensor magic")?;
        ensure!(magic == MAGIC, "invalid tensor magic: expected XLT\\0");

        let version = cur.read_u8().context("failed to read tensor version")?;
        ensure!(
            version == VERSION,
            "unsupported tensor version {version}, expected {VERSION}"
        );

        let rank = cur
            .read_u32::<BigEndian>()
            .context("failed to read tensor rank")?;
        if rank > MAX_RANK {
            bail!("unreasonable tensor rank: {rank}");
        }

        let mut dims = Vec::with_capacity(rank as usize);
        for axis in 0..rank {
            let dim = cur
                .read_u64::<BigEndian>()
                .with_context(|| format!("failed to read dim {axis}"))?;
            let dim = usize::try_from(dim)
                .with_context(|| format!("dim {axis} = {dim} does not fit in usize"))?;
            dims.push(dim);
        }

        let count = element_count(&dims)?;
        let remaining = data.len() - cur.position() as usize;
        ensure!(
            remaining / 4 >= count,
            "truncated tensor payload: {remaining} bytes for {count} values"
        );
        if remaining > count * 4 {
            log::warn!("ignoring {} trailing bytes after tensor payload", remaining - count * 4);
        }

        let mut values = vec![0f32; count];
        cur.read_f32_into::<LittleEndian>(&mut values)
            .context("failed to read tensor payload")?;

        Ok(Self { dims, data: values })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(path, self.to_bytes()?)
            .with_context(|| format!("failed to write tensor to {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
        Self::from_bytes(&bytes).with_context(|| format!("cannot decode {}", path.display()))
    }
}

fn element_count(dims: &[usize]) -> Result<usize> {
    dims.iter().try_fold(1usize, |acc, &d| {
        acc.checked_mul(d)
            .with_context(|| format!("tensor dims {dims:?} overflow usize"))
    })
}
