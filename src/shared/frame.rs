// This is free and unencumbered software released into the public domain.

use crate::shared::{CameraError, Resolution};
use bytes::Bytes;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Rgb8 => 3,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Frame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub pixel_format: PixelFormat,
    pub timestamp_ns: u64,
}

impl Frame {
    pub fn new_rgb8(data: Bytes, width: u32, height: u32, stride: u32) -> Self {
        Self {
            data,
            width,
            height,
            stride,
            pixel_format: PixelFormat::Rgb8,
            timestamp_ns: 0,
        }
    }

    pub fn with_timestamp_ns(mut self, ts: u64) -> Self {
        self.timestamp_ns = ts;
        self
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Pixel rows with any stride padding removed.
    pub fn packed(&self) -> Bytes {
        let row = self.width as usize * self.pixel_format.bytes_per_pixel();
        let stride = self.stride as usize;
        if stride == row {
            return self.data.clone();
        }
        let mut out = Vec::with_capacity(row * self.height as usize);
        for y in 0..self.height as usize {
            let start = y * stride;
            if let Some(line) = self.data.get(start..start + row) {
                out.extend_from_slice(line);
            }
        }
        Bytes::from(out)
    }

    pub fn to_image(&self) -> Result<image::RgbImage, CameraError> {
        image::RgbImage::from_raw(self.width, self.height, self.packed().to_vec()).ok_or_else(
            || {
                CameraError::capture_failed(format!(
                    "frame buffer too small for {}x{}",
                    self.width, self.height
                ))
            },
        )
    }
}
