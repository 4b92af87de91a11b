use crate::capture::FacingMode;
use std::time::Duration;

/// Camera preference requested when no device is named explicitly
pub const DEFAULT_FACING_MODE: FacingMode = FacingMode::User;

/// Pretrained COCO SSD-MobileNet detector, exported to ONNX
pub const DEFAULT_MODEL_PATH: &str = "models/ssd_mobilenet_v1_12.onnx";

/// Display refresh cadence the loop synchronizes to
pub const DEFAULT_REFRESH_HZ: u32 = 60;

/// Overlay surface size before the stream reports its geometry
pub const DEFAULT_SURFACE_SIZE: (u32, u32) = (600, 500);

/// Font files tried in order when no `--font` is given
pub const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

/// Period between refresh opportunities for a given rate in Hz
pub fn refresh_period(hz: u32) -> Duration {
    Duration::from_secs_f64(1.0 / hz.max(1) as f64)
}

/// RGBA color used by overlay surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color(pub [u8; 4]);

impl Color {
    pub const CYAN: Color = Color([0x00, 0xFF, 0xFF, 0xFF]);
    pub const BLACK: Color = Color([0x00, 0x00, 0x00, 0xFF]);
    pub const TRANSPARENT: Color = Color([0, 0, 0, 0]);
}

impl From<Color> for image::Rgba<u8> {
    fn from(color: Color) -> Self {
        image::Rgba(color.0)
    }
}

/// Fixed visual parameters for boxes and labels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    pub box_color: Color,
    pub line_width: f32,
    pub label_background: Color,
    pub text_color: Color,
    /// Font size in pixels, also the label text height
    pub font_px: f32,
    /// Added to both label background dimensions
    pub label_padding: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            box_color: Color::CYAN,
            line_width: 4.0,
            label_background: Color::CYAN,
            text_color: Color::BLACK,
            font_px: 16.0,
            label_padding: 4.0,
        }
    }
}
