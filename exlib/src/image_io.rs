//! Image file reading/writing and the small HWC pixel operations around it.

use std::fs;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{
    DynamicImage, ExtendedColorType, GrayAlphaImage, GrayImage, ImageFormat, RgbImage, RgbaImage,
};
use sha2::{Digest, Sha256};

use crate::layout::ImageShape;

/// An 8-bit image in `[height, width, channels]` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub height: usize,
    pub width: usize,
    /// 1 gray, 2 gray+alpha, 3 RGB, 4 RGBA.
    pub channels: usize,
    pub data: Vec<u8>,
}

impl Image {
    pub fn new(height: usize, width: usize, channels: usize, data: Vec<u8>) -> Result<Self> {
        let img = Self {
            height,
            width,
            channels,
            data,
        };
        img.check()?;
        Ok(img)
    }

    fn check(&self) -> Result<()> {
        ensure!(
            (1..=4).contains(&self.channels),
            "image channel count must be 1 to 4, got {}",
            self.channels
        );
        ensure!(
            self.data.len() == self.height * self.width * self.channels,
            "image data has {} bytes, {}x{}x{} needs {}",
            self.data.len(),
            self.height,
            self.width,
            self.channels,
            self.height * self.width * self.channels
        );
        Ok(())
    }

    fn to_dynamic(&self) -> Result<DynamicImage> {
        self.check()?;
        let (w, h) = (self.width as u32, self.height as u32);
        let data = self.data.clone();
        let img = match self.channels {
            1 => GrayImage::from_raw(w, h, data).map(DynamicImage::ImageLuma8),
            2 => GrayAlphaImage::from_raw(w, h, data).map(DynamicImage::ImageLumaA8),
            3 => RgbImage::from_raw(w, h, data).map(DynamicImage::ImageRgb8),
            _ => RgbaImage::from_raw(w, h, data).map(DynamicImage::ImageRgba8),
        };
        img.context("image buffer does not match its dimensions")
    }

    fn from_dynamic(img: DynamicImage, channels: usize) -> Result<Self> {
        let (height, width) = (img.height() as usize, img.width() as usize);
        let data = match channels {
            1 => img.into_luma8().into_raw(),
            2 => img.into_luma_alpha8().into_raw(),
            3 => img.into_rgb8().into_raw(),
            4 => img.into_rgba8().into_raw(),
            n => bail!("image channel count must be 1 to 4, got {n}"),
        };
        Ok(Self {
            height,
            width,
            channels,
            data,
        })
    }
}

/// Decode `path`, converting to `channels` (1..=4) channels.
pub fn read(path: &Path, channels: usize) -> Result<Image> {
    ensure!(
        (1..=4).contains(&channels),
        "image channel count must be 1 to 4, got {channels}"
    );
    ensure!(path.exists(), "{} is not found", path.display());
    let img = image::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    Image::from_dynamic(img, channels)
}

/// Encode `img` to `path`; the extension picks the format.
///
/// `quality` (1..=100) only applies to JPEG. The parent directory is created
/// if it does not exist.
pub fn write(path: &Path, img: &Image, quality: u8) -> Result<()> {
    let dynamic = img.to_dynamic()?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let format = match ext.as_str() {
        "png" => ImageFormat::Png,
        "bmp" => ImageFormat::Bmp,
        "jpg" | "jpeg" => ImageFormat::Jpeg,
        "tga" => ImageFormat::Tga,
        _ => bail!("unsupported image extension for {}", path.display()),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    if format == ImageFormat::Jpeg {
        ensure!(
            (1..=100).contains(&quality),
            "JPEG quality must be between 1 and 100, got {quality}"
        );
        let file = fs::File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut encoder = JpegEncoder::new_with_quality(BufWriter::new(file), quality);
        // JPEG has no alpha channel
        let (bytes, color) = if img.channels <= 2 {
            (dynamic.into_luma8().into_raw(), ExtendedColorType::L8)
        } else {
            (dynamic.into_rgb8().into_raw(), ExtendedColorType::Rgb8)
        };
        encoder
            .encode(&bytes, img.width as u32, img.height as u32, color)
            .with_context(|| format!("failed to encode {}", path.display()))?;
    } else {
        dynamic
            .save_with_format(path, format)
            .with_context(|| format!("failed to save image to {}", path.display()))?;
    }
    Ok(())
}

/// Resample to `out_h` x `out_w` with a triangle filter.
pub fn resize(img: &Image, out_h: usize, out_w: usize) -> Result<Image> {
    ensure!(out_h > 0 && out_w > 0, "resize target must be non-empty, got {out_h}x{out_w}");
    let resized = img
        .to_dynamic()?
        .resize_exact(out_w as u32, out_h as u32, FilterType::Triangle);
    Image::from_dynamic(resized, img.channels)
}

/// Copy the `height` x `width` region starting at `(y, x)`.
pub fn trim(img: &Image, y: usize, x: usize, height: usize, width: usize) -> Result<Image> {
    img.check()?;
    let fits = |start: usize, len: usize, dim: usize| start.checked_add(len).is_some_and(|end| end <= dim);
    ensure!(
        fits(y, height, img.height) && fits(x, width, img.width),
        "trim {height}x{width} at ({y}, {x}) exceeds {}x{} image",
        img.height,
        img.width
    );
    let row = img.width * img.channels;
    let run = width * img.channels;
    let mut data = Vec::with_capacity(height * run);
    for r in y..y + height {
        let start = r * row + x * img.channels;
        data.extend_from_slice(&img.data[start..start + run]);
    }
    Image::new(height, width, img.channels, data)
}

/// Average the RGB channels (truncating), keeping alpha if present.
/// Gray images are returned unchanged.
pub fn to_gray_scale(img: &Image) -> Result<Image> {
    img.check()?;
    if img.channels <= 2 {
        return Ok(img.clone());
    }
    let out_ch = img.channels - 2;
    let mut data = Vec::with_capacity(img.height * img.width * out_ch);
    for px in img.data.chunks_exact(img.channels) {
        let sum = px[0] as f32 + px[1] as f32 + px[2] as f32;
        data.push((sum / 3.0) as u8);
        if img.channels == 4 {
            data.push(px[3]);
        }
    }
    Image::new(img.height, img.width, out_ch, data)
}

/// Stack equally sized images into a float batch scaled to `[0, 1]`.
pub fn stack(images: &[Image]) -> Result<(Vec<f32>, ImageShape)> {
    let first = images.first().context("cannot stack an empty image list")?;
    let shape = ImageShape::new(images.len(), first.height, first.width, first.channels);
    let mut out = Vec::with_capacity(shape.checked_len()?);
    for (i, img) in images.iter().enumerate() {
        img.check()?;
        ensure!(
            (img.height, img.width, img.channels) == (first.height, first.width, first.channels),
            "image {i} is {}x{}x{}, expected {}x{}x{}",
            img.height,
            img.width,
            img.channels,
            first.height,
            first.width,
            first.channels
        );
        out.extend(img.data.iter().map(|&p| p as f32 / 255.0));
    }
    Ok((out, shape))
}

/// Compute SHA-256 hash of a file.
pub fn file_sha256(path: &Path) -> Result<String> {
    let data = fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    let hash = Sha256::digest(&data);
    Ok(format!("{hash:x}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(h: usize, w: usize, ch: usize) -> Image {
        let data = (0..h * w * ch).map(|i| ((i * 53) % 256) as u8).collect();
        Image::new(h, w, ch, data).unwrap()
    }

    #[test]
    fn png_roundtrip_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        for ch in 1..=4 {
            let img = checker(5, 7, ch);
            let path = dir.path().join(format!("sub/img{ch}.png"));
            write(&path, &img, 100).unwrap();
            assert_eq!(read(&path, ch).unwrap(), img);
        }
    }

    #[test]
    fn jpeg_writes_and_reads_back_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.jpg");
        write(&path, &checker(16, 12, 4), 90).unwrap();
        let back = read(&path, 3).unwrap();
        assert_eq!((back.height, back.width, back.channels), (16, 12, 3));
        assert!(write(&path, &checker(2, 2, 3), 0).is_err());
    }

    #[test]
    fn rejects_unknown_extension_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(write(&dir.path().join("x.gif2"), &checker(2, 2, 3), 90).is_err());
        let err = read(&dir.path().join("missing.png"), 3).unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert!(read(&dir.path().join("missing.png"), 5).is_err());
    }

    #[test]
    fn trim_copies_region() {
        let img = Image::new(3, 3, 1, (0..9).collect()).unwrap();
        let t = trim(&img, 1, 1, 2, 2).unwrap();
        assert_eq!(t.data, vec![4, 5, 7, 8]);
        assert!(trim(&img, 2, 0, 2, 1).is_err());
        assert!(trim(&img, 1, 0, usize::MAX, 1).is_err());
        assert!(trim(&img, 0, usize::MAX, 1, 2).is_err());
    }

    #[test]
    fn gray_scale_keeps_alpha() {
        let img = Image::new(1, 2, 4, vec![10, 20, 31, 255, 0, 0, 3, 7]).unwrap();
        let g = to_gray_scale(&img).unwrap();
        assert_eq!(g.channels, 2);
        assert_eq!(g.data, vec![20, 255, 1, 7]);
    }

    #[test]
    fn resize_and_stack() {
        let img = checker(8, 8, 3);
        let small = resize(&img, 4, 6).unwrap();
        assert_eq!((small.height, small.width, small.channels), (4, 6, 3));
        assert_eq!(small.data.len(), 72);

        let (batch, shape) = stack(&[small.clone(), small.clone()]).unwrap();
        assert_eq!(shape, ImageShape::new(2, 4, 6, 3));
        assert_eq!(batch.len(), shape.len());
        assert!(batch.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(stack(&[small, img]).is_err());
        assert!(stack(&[]).is_err());
    }
}
