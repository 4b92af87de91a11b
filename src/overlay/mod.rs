mod canvas;
mod recording;

pub use canvas::{load_font, Canvas};
pub use recording::{DrawLog, DrawOp, RecordingSurface};

use crate::config::{Color, OverlayStyle};
use crate::detection::{BBox, Detections};

/// 2D drawing surface the overlay is painted on
pub trait Surface {
    fn dimensions(&self) -> (u32, u32);

    /// Resize the surface, discarding its contents
    fn resize(&mut self, width: u32, height: u32);

    /// Clear the whole surface to transparent
    fn clear(&mut self);

    /// Stroke a rectangle outline centred on its edges
    fn stroke_rect(&mut self, rect: BBox, color: Color, line_width: f32);

    fn fill_rect(&mut self, rect: BBox, color: Color);

    /// Width in pixels of `text` in the surface font
    fn measure_text(&self, text: &str) -> f32;

    /// Draw `text` with its top-left corner at (x, y)
    fn fill_text(&mut self, text: &str, x: f32, y: f32, color: Color);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawOutcome {
    /// This many predictions were drawn
    Drawn(usize),
    /// The surface no longer matches the frame the predictions came from
    Stale,
}

/// Paints predictions as boxes with labels. Every call is a full repaint.
#[derive(Debug, Clone, Default)]
pub struct OverlayRenderer {
    style: OverlayStyle,
}

impl OverlayRenderer {
    pub fn new(style: OverlayStyle) -> Self {
        Self { style }
    }

    pub fn draw<S: Surface + ?Sized>(
        &self,
        surface: &mut S,
        detections: &Detections,
    ) -> DrawOutcome {
        let _span =
            tracing::debug_span!("draw", count = detections.predictions.len()).entered();

        surface.clear();

        if surface.dimensions() != detections.frame_size {
            tracing::debug!(
                "Skipping stale predictions: frame {:?}, surface {:?}",
                detections.frame_size,
                surface.dimensions()
            );
            return DrawOutcome::Stale;
        }

        let style = &self.style;

        // Boxes, then label backgrounds, then text: nothing covers a label
        for prediction in &detections.predictions {
            surface.stroke_rect(prediction.bbox, style.box_color, style.line_width);
        }

        for prediction in &detections.predictions {
            let BBox { x, y, .. } = prediction.bbox;
            let text_width = surface.measure_text(&prediction.label);
            let background = BBox::new(
                x,
                y,
                text_width + style.label_padding,
                style.font_px + style.label_padding,
            );
            surface.fill_rect(background, style.label_background);
        }

        for prediction in &detections.predictions {
            let BBox { x, y, .. } = prediction.bbox;
            surface.fill_text(&prediction.label, x, y, style.text_color);
        }

        DrawOutcome::Drawn(detections.predictions.len())
    }
}
