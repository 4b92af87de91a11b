use super::Surface;
use crate::config::Color;
use crate::detection::BBox;
use ab_glyph::{FontArc, PxScale};
use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;

/// Transparent RGBA raster the overlay is painted on before compositing
pub struct Canvas {
    image: RgbaImage,
    font: Option<FontArc>,
    scale: PxScale,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
            font: None,
            scale: PxScale::from(16.0),
        }
    }

    /// Use `font` at `font_px` for labels. Without a font labels have no glyphs.
    pub fn with_font(mut self, font: FontArc, font_px: f32) -> Self {
        self.font = Some(font);
        self.scale = PxScale::from(font_px);
        self
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

/// Load a TrueType/OpenType font for label text
pub fn load_font<P: AsRef<Path>>(path: P) -> Result<FontArc> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read font {}", path.display()))?;
    FontArc::try_from_vec(bytes).with_context(|| format!("Invalid font file {}", path.display()))
}

/// Integer rectangle, or `None` when it has no area
fn pixel_rect(x: f32, y: f32, width: f32, height: f32) -> Option<Rect> {
    let width = width.round();
    let height = height.round();
    if width < 1.0 || height < 1.0 {
        return None;
    }
    Some(Rect::at(x.round() as i32, y.round() as i32).of_size(width as u32, height as u32))
}

impl Surface for Canvas {
    fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.image = RgbaImage::new(width, height);
    }

    fn clear(&mut self) {
        let transparent: Rgba<u8> = Color::TRANSPARENT.into();
        self.image.pixels_mut().for_each(|p| *p = transparent);
    }

    fn stroke_rect(&mut self, rect: BBox, color: Color, line_width: f32) {
        let color: Rgba<u8> = color.into();
        let half = line_width / 2.0;
        let layers = line_width.round().max(1.0) as u32;

        // One-pixel outlines stepping inward from the outer edge of the stroke
        for t in 0..layers {
            let inset = t as f32;
            if let Some(outline) = pixel_rect(
                rect.x - half + inset,
                rect.y - half + inset,
                rect.width + line_width - 2.0 * inset,
                rect.height + line_width - 2.0 * inset,
            ) {
                draw_hollow_rect_mut(&mut self.image, outline, color);
            }
        }
    }

    fn fill_rect(&mut self, rect: BBox, color: Color) {
        if let Some(area) = pixel_rect(rect.x, rect.y, rect.width, rect.height) {
            draw_filled_rect_mut(&mut self.image, area, color.into());
        }
    }

    fn measure_text(&self, text: &str) -> f32 {
        match &self.font {
            Some(font) => text_size(self.scale, font, text).0 as f32,
            None => 0.0,
        }
    }

    fn fill_text(&mut self, text: &str, x: f32, y: f32, color: Color) {
        if let Some(font) = &self.font {
            draw_text_mut(
                &mut self.image,
                color.into(),
                x.round() as i32,
                y.round() as i32,
                self.scale,
                font,
                text,
            );
        }
    }
}
