use super::Surface;
use crate::config::Color;
use crate::detection::BBox;
use std::cell::RefCell;
use std::rc::Rc;

/// Advance per character used by `RecordingSurface::measure_text`
const GLYPH_ADVANCE: f32 = 8.0;

/// A surface operation as issued by the renderer
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Resize { width: u32, height: u32 },
    Clear,
    StrokeRect { rect: BBox, color: Color, line_width: f32 },
    FillRect { rect: BBox, color: Color },
    FillText { text: String, x: f32, y: f32, color: Color },
}

/// Shared view of the operations a `RecordingSurface` received
#[derive(Debug, Clone, Default)]
pub struct DrawLog(Rc<RefCell<Vec<DrawOp>>>);

impl DrawLog {
    pub fn snapshot(&self) -> Vec<DrawOp> {
        self.0.borrow().clone()
    }

    pub fn count(&self, matches: impl Fn(&DrawOp) -> bool) -> usize {
        self.0.borrow().iter().filter(|op| matches(op)).count()
    }

    fn push(&self, op: DrawOp) {
        self.0.borrow_mut().push(op);
    }
}

/// Surface that paints nothing and records every call in order.
///
/// Text is measured with a fixed per-character advance.
#[derive(Debug)]
pub struct RecordingSurface {
    width: u32,
    height: u32,
    log: DrawLog,
}

impl RecordingSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            log: DrawLog::default(),
        }
    }

    pub fn log(&self) -> DrawLog {
        self.log.clone()
    }
}

impl Surface for RecordingSurface {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.log.push(DrawOp::Resize { width, height });
    }

    fn clear(&mut self) {
        self.log.push(DrawOp::Clear);
    }

    fn stroke_rect(&mut self, rect: BBox, color: Color, line_width: f32) {
        self.log.push(DrawOp::StrokeRect {
            rect,
            color,
            line_width,
        });
    }

    fn fill_rect(&mut self, rect: BBox, color: Color) {
        self.log.push(DrawOp::FillRect { rect, color });
    }

    fn measure_text(&self, text: &str) -> f32 {
        text.chars().count() as f32 * GLYPH_ADVANCE
    }

    fn fill_text(&mut self, text: &str, x: f32, y: f32, color: Color) {
        self.log.push(DrawOp::FillText {
            text: text.to_string(),
            x,
            y,
            color,
        });
    }
}
