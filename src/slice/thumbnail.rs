//! Thumbnails of computed slices.
//!
//! A thumbnail is an 8-bit grayscale preview of a 2D slice, normalised to the
//! slice's own min/max and shrunk to fit a square of `max_size` pixels. 3D
//! slices are max-projected along their first axis first.

use bytes::Bytes;
use image::{imageops, GrayImage};

use crate::source::ArrayData;

/// Default thumbnail edge length in pixels.
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 64;

/// Largest supported thumbnail edge length.
pub const MAX_THUMBNAIL_SIZE: u32 = 1024;

/// Grayscale preview image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    width: u32,
    height: u32,
    pixels: Bytes,
}

impl Thumbnail {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major 8-bit pixels.
    pub fn pixels(&self) -> &Bytes {
        &self.pixels
    }

    pub fn nbytes(&self) -> usize {
        self.pixels.len()
    }
}

/// Project a 2D or 3D slice onto a plane of `f64` values.
fn project(data: &ArrayData) -> Option<(usize, usize, Vec<f64>)> {
    match *data.shape() {
        [height, width] => {
            let plane = (0..height * width)
                .map(|i| data.value_f64(i).unwrap_or(0.0))
                .collect();
            Some((height, width, plane))
        }
        [depth, height, width] => {
            let area = height * width;
            let mut plane = vec![f64::NEG_INFINITY; area];
            for z in 0..depth {
                for (i, value) in plane.iter_mut().enumerate() {
                    let v = data.value_f64(z * area + i).unwrap_or(0.0);
                    *value = value.max(v);
                }
            }
            Some((height, width, plane))
        }
        _ => None,
    }
}

/// Render a thumbnail of `data`, or `None` if the slice is not 2D/3D or empty.
pub fn make_thumbnail(data: &ArrayData, max_size: u32) -> Option<Thumbnail> {
    let (height, width, plane) = project(data)?;
    if height == 0 || width == 0 || max_size == 0 {
        return None;
    }

    let (min, max) = plane
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    let pixels: Vec<u8> = plane
        .iter()
        .map(|&v| {
            if range > 0.0 && v.is_finite() {
                (((v - min) / range) * 255.0).round() as u8
            } else {
                0
            }
        })
        .collect();

    let img = GrayImage::from_raw(u32::try_from(width).ok()?, u32::try_from(height).ok()?, pixels)?;

    let longest = width.max(height) as f64;
    let scale = (max_size as f64 / longest).min(1.0);
    let target_w = ((width as f64 * scale).round() as u32).max(1);
    let target_h = ((height as f64 * scale).round() as u32).max(1);

    let small = if target_w == img.width() && target_h == img.height() {
        img
    } else {
        imageops::thumbnail(&img, target_w, target_h)
    };

    Some(Thumbnail {
        width: small.width(),
        height: small.height(),
        pixels: Bytes::from(small.into_raw()),
    })
}
