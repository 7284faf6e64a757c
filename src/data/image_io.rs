//! Image codec helpers
//!
//! Sketches are 8-bit PNGs normalized to [-1, 1]; target and predicted maps
//! are floating-point EXR images. All tensors use CHW layout.

use image::{imageops::FilterType, DynamicImage, Rgb32FImage, RgbImage};
use std::path::Path;

use crate::error::{Error, Result};
use crate::utils::MapType;

/// Load a sketch PNG as a normalized CHW buffer in [-1, 1].
///
/// Normal-map runs read the sketch as RGB, depth runs as grayscale.
pub fn load_sketch(path: &Path, map_type: MapType, size: u32) -> Result<Vec<f32>> {
    let img = image::open(path)?.resize_exact(size, size, FilterType::Triangle);
    let (h, w) = (size as usize, size as usize);

    let data = match map_type {
        MapType::Normal => {
            let rgb = img.to_rgb8();
            let mut buf = vec![0.0f32; 3 * h * w];
            for (x, y, pixel) in rgb.enumerate_pixels() {
                let (x, y) = (x as usize, y as usize);
                for c in 0..3 {
                    buf[c * h * w + y * w + x] = pixel[c] as f32 / 127.5 - 1.0;
                }
            }
            buf
        }
        MapType::Depth => {
            let gray = img.to_luma8();
            let mut buf = vec![0.0f32; h * w];
            for (x, y, pixel) in gray.enumerate_pixels() {
                buf[y as usize * w + x as usize] = pixel[0] as f32 / 127.5 - 1.0;
            }
            buf
        }
    };
    Ok(data)
}

/// Load a target map EXR as a CHW buffer.
///
/// Normal maps keep their stored component values; depth maps are inverted
/// (`1 - d`) so that near surfaces are bright, matching the rendering
/// convention of the dataset generator.
pub fn load_target(path: &Path, map_type: MapType, size: u32) -> Result<Vec<f32>> {
    let img = image::open(path)?.resize_exact(size, size, FilterType::Triangle);
    let rgb = img.to_rgb32f();
    let (h, w) = (size as usize, size as usize);

    let data = match map_type {
        MapType::Normal => {
            let mut buf = vec![0.0f32; 3 * h * w];
            for (x, y, pixel) in rgb.enumerate_pixels() {
                let (x, y) = (x as usize, y as usize);
                for c in 0..3 {
                    buf[c * h * w + y * w + x] = pixel[c];
                }
            }
            buf
        }
        MapType::Depth => {
            let mut buf = vec![0.0f32; h * w];
            for (x, y, pixel) in rgb.enumerate_pixels() {
                buf[y as usize * w + x as usize] = 1.0 - pixel[0];
            }
            buf
        }
    };
    Ok(data)
}

/// Write a CHW float buffer as an EXR map.
///
/// One-channel depth data is replicated across RGB so every map is stored as
/// a three-channel float image.
pub fn write_map_exr(path: &Path, data: &[f32], map_type: MapType, size: u32) -> Result<()> {
    let (h, w) = (size as usize, size as usize);
    let channels = map_type.out_channels() as usize;
    let expected = channels * h * w;
    if data.len() != expected {
        return Err(Error::Data(format!(
            "map buffer has {} values, expected {}",
            data.len(),
            expected
        )));
    }

    let mut img = Rgb32FImage::new(size, size);
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let src = if channels == 1 { 0 } else { c };
            pixel[c] = data[src * h * w + y * w + x];
        }
    }
    DynamicImage::ImageRgb32F(img).save(path)?;
    Ok(())
}

/// Read an EXR map back as a CHW buffer (counterpart of [`write_map_exr`]).
pub fn read_map_exr(path: &Path, map_type: MapType, size: u32) -> Result<Vec<f32>> {
    let img = image::open(path)?.to_rgb32f();
    let (h, w) = (size as usize, size as usize);
    let channels = map_type.out_channels() as usize;

    let mut buf = vec![0.0f32; channels * h * w];
    for (x, y, pixel) in img.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..channels {
            buf[c * h * w + y * w + x] = pixel[c];
        }
    }
    Ok(buf)
}

/// Convert a CHW buffer in [-1, 1] to an 8-bit RGB image.
///
/// Returns None on a length mismatch.
pub fn chw_to_rgb8(data: &[f32], channels: usize, height: usize, width: usize) -> Option<RgbImage> {
    if data.len() != channels * height * width || !(channels == 1 || channels == 3) {
        return None;
    }

    let mut img = RgbImage::new(width as u32, height as u32);
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let src = if channels == 1 { 0 } else { c };
            let val = (data[src * height * width + y * width + x] + 1.0) * 127.5;
            pixel[c] = val.clamp(0.0, 255.0) as u8;
        }
    }
    Some(img)
}

/// Place two equally sized images next to each other.
pub fn side_by_side(left: &RgbImage, right: &RgbImage) -> RgbImage {
    let (w, h) = (left.width(), left.height());
    let mut out = RgbImage::new(w + right.width(), h.max(right.height()));
    image::imageops::replace(&mut out, left, 0, 0);
    image::imageops::replace(&mut out, right, w as i64, 0);
    out
}

/// Stack equally wide images vertically into one grid image.
pub fn stack_rows(rows: &[RgbImage]) -> Option<RgbImage> {
    let first = rows.first()?;
    let width = first.width();
    let total_height: u32 = rows.iter().map(|r| r.height()).sum();

    let mut out = RgbImage::new(width, total_height);
    let mut y = 0i64;
    for row in rows {
        image::imageops::replace(&mut out, row, 0, y);
        y += row.height() as i64;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_chw_to_rgb8_roundtrip_range() {
        // 2x2 single channel ramp
        let data = vec![-1.0f32, -0.5, 0.5, 1.0];
        let img = chw_to_rgb8(&data, 1, 2, 2).unwrap();
        assert_eq!(img.get_pixel(0, 0)[0], 0);
        assert_eq!(img.get_pixel(1, 1)[0], 255);
    }

    #[test]
    fn test_chw_to_rgb8_rejects_bad_len() {
        assert!(chw_to_rgb8(&[0.0; 5], 3, 2, 2).is_none());
    }

    #[test]
    fn test_exr_write_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("map.exr");

        let data: Vec<f32> = (0..3 * 16 * 16).map(|i| (i % 7) as f32 / 7.0).collect();
        write_map_exr(&path, &data, MapType::Normal, 16).unwrap();
        let back = read_map_exr(&path, MapType::Normal, 16).unwrap();

        for (a, b) in data.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-4, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_sketch_load_normalization() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sketch.png");

        let mut img = image::GrayImage::new(16, 16);
        for p in img.pixels_mut() {
            p[0] = 255;
        }
        img.save(&path).unwrap();

        let data = load_sketch(&path, MapType::Depth, 16).unwrap();
        assert_eq!(data.len(), 16 * 16);
        for v in data {
            assert!((v - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_side_by_side_dims() {
        let a = RgbImage::new(4, 4);
        let b = RgbImage::new(4, 4);
        let joined = side_by_side(&a, &b);
        assert_eq!((joined.width(), joined.height()), (8, 4));
    }
}
