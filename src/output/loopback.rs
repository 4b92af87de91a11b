use super::OutputSink;
use crate::capture::Frame;
use crate::overlay::Canvas;
use anyhow::{Context, Result};
use image::{imageops, DynamicImage, RgbImage};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, FourCC, Format};

/// Writes video with the overlay composited on top to a v4l2loopback device
pub struct V4L2Output {
    file: File,
    width: u32,
    height: u32,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        // Announce the frame format; loopback devices with exclusive_caps may refuse
        match Device::with_path(path) {
            Ok(device) => {
                let requested = Format::new(width, height, FourCC::new(b"YUYV"));
                match Output::set_format(&device, &requested) {
                    Ok(actual) => tracing::debug!("Loopback format set to {}", actual),
                    Err(e) => tracing::warn!("Could not set loopback format: {}", e),
                }
            }
            Err(e) => tracing::warn!("Could not query {}: {}", path.display(), e),
        }

        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        tracing::info!("v4l2loopback device opened successfully");

        Ok(Self {
            file,
            width,
            height,
        })
    }

    /// Alpha-blend the overlay over the frame, at frame resolution
    fn composite(frame: &RgbImage, overlay: &Canvas) -> RgbImage {
        let mut composed = DynamicImage::ImageRgb8(frame.clone()).into_rgba8();
        imageops::overlay(&mut composed, overlay.image(), 0, 0);
        DynamicImage::ImageRgba8(composed).into_rgb8()
    }

    /// Pack an RGB frame as YUYV. Each pixel pair shares the chroma of
    /// its mean colour; an odd last column is paired with itself.
    fn rgb_to_yuyv(frame: &RgbImage) -> Vec<u8> {
        let (width, height) = frame.dimensions();
        if width == 0 {
            return Vec::new();
        }
        let mut yuyv = Vec::with_capacity(width.div_ceil(2) as usize * 4 * height as usize);

        for row in frame.as_raw().chunks_exact(width as usize * 3) {
            for pair in row.chunks(6) {
                let left = [pair[0], pair[1], pair[2]];
                let right = pair.get(3..6).map_or(left, |p| [p[0], p[1], p[2]]);
                let mean = |c: usize| ((left[c] as u16 + right[c] as u16 + 1) / 2) as u8;
                let (u, v) = chroma([mean(0), mean(1), mean(2)]);
                yuyv.extend_from_slice(&[luma(left), u, luma(right), v]);
            }
        }

        yuyv
    }
}

// BT.601 full range in 8.8 fixed point

fn luma([r, g, b]: [u8; 3]) -> u8 {
    let y = (77 * r as i32 + 150 * g as i32 + 29 * b as i32 + 128) >> 8;
    y.clamp(0, 255) as u8
}

fn chroma([r, g, b]: [u8; 3]) -> (u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let u = ((-43 * r - 85 * g + 128 * b + 128) >> 8) + 128;
    let v = ((128 * r - 107 * g - 21 * b + 128) >> 8) + 128;
    (u.clamp(0, 255) as u8, v.clamp(0, 255) as u8)
}

impl OutputSink<Canvas> for V4L2Output {
    fn present(&mut self, frame: &Frame, overlay: &Canvas) -> Result<()> {
        let composed = Self::composite(frame.image(), overlay);

        let composed = if composed.dimensions() != (self.width, self.height) {
            imageops::resize(
                &composed,
                self.width,
                self.height,
                imageops::FilterType::Triangle,
            )
        } else {
            composed
        };

        let yuyv_data = Self::rgb_to_yuyv(&composed);

        self.file
            .write_all(&yuyv_data)
            .context("Failed to write frame to v4l2loopback device")?;

        Ok(())
    }
}
