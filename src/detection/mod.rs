mod coco_ssd;
mod labels;
mod preprocess;

pub use coco_ssd::{CocoSsd, DetectOptions};
pub use labels::coco_label;
pub use preprocess::Preprocessor;

use crate::capture::Frame;
use thiserror::Error;

/// Axis-aligned box in source frame pixels, top-left origin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// One detected object for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    /// Confidence in 0..1
    pub score: f32,
    pub bbox: BBox,
}

/// Predictions together with the size of the frame that produced them
#[derive(Debug, Clone, PartialEq)]
pub struct Detections {
    pub frame_size: (u32, u32),
    pub predictions: Vec<Prediction>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("failed to load model {model}: {reason}")]
    NetworkOrAssetFailure { model: String, reason: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DetectionError {
    #[error("model runtime failure: {0}")]
    ModelRuntimeFailure(String),
}

/// Trait for object detectors
///
/// Taking `&mut self` means a detector can only ever have one detection in
/// flight. Returned predictions carry no ordering guarantee.
#[allow(async_fn_in_trait)]
pub trait Detector {
    /// Detect objects in a frame
    async fn detect(&mut self, frame: &Frame) -> Result<Vec<Prediction>, DetectionError>;
}
