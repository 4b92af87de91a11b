use super::{coco_label, BBox, DetectionError, Detector, LoadError, Prediction, Preprocessor};
use crate::capture::Frame;
use image::RgbImage;
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const INPUT_NAME: &str = "image_tensor:0";
const BOXES_OUTPUT: &str = "detection_boxes:0";
const CLASSES_OUTPUT: &str = "detection_classes:0";
const SCORES_OUTPUT: &str = "detection_scores:0";
const COUNT_OUTPUT: &str = "num_detections:0";

/// Model-side filtering, matching the coco-ssd defaults
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectOptions {
    pub max_detections: usize,
    pub min_score: f32,
    /// Resize frames before inference; boxes are still reported in frame pixels
    pub input_size: Option<(u32, u32)>,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            max_detections: 20,
            min_score: 0.5,
            input_size: None,
        }
    }
}

/// SSD-MobileNet detector trained on COCO
///
/// Expects the TensorFlow object detection API export: a `u8` NHWC image
/// input and normalized `[ymin, xmin, ymax, xmax]` boxes with post-NMS
/// classes, scores and a detection count.
pub struct CocoSsd {
    // Moved onto the blocking pool for each call and handed back afterwards
    session: Option<Session>,
    preprocessor: Preprocessor,
    options: DetectOptions,
}

impl CocoSsd {
    /// Load the model from an ONNX file. Done once per process.
    pub async fn load(
        model_path: impl Into<PathBuf>,
        options: DetectOptions,
    ) -> Result<Self, LoadError> {
        let path = model_path.into();
        let model = path.display().to_string();
        let failure = |reason: String| LoadError::NetworkOrAssetFailure {
            model: model.clone(),
            reason,
        };

        tracing::info!("Loading detection model from {}", model);

        if !path.is_file() {
            return Err(failure("model file not found".into()));
        }

        let session = tokio::task::spawn_blocking(move || build_session(&path))
            .await
            .map_err(|e| failure(format!("loader task failed: {e}")))?
            .map_err(|e| failure(e.to_string()))?;

        tracing::info!("Detection model loaded successfully");

        Ok(Self {
            session: Some(session),
            preprocessor: Preprocessor::new(options.input_size),
            options,
        })
    }
}

fn build_session(path: &Path) -> ort::Result<Session> {
    Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .commit_from_file(path)
}

impl Detector for CocoSsd {
    async fn detect(&mut self, frame: &Frame) -> Result<Vec<Prediction>, DetectionError> {
        let mut session = self.session.take().ok_or_else(|| {
            DetectionError::ModelRuntimeFailure("model session lost by an earlier failure".into())
        })?;
        let image = Arc::clone(frame.image());
        let preprocessor = self.preprocessor;
        let options = self.options;

        let (session, result) = tokio::task::spawn_blocking(move || {
            let result = run_inference(&mut session, &preprocessor, &image, &options);
            (session, result)
        })
        .await
        .map_err(|e| DetectionError::ModelRuntimeFailure(format!("inference task failed: {e}")))?;

        self.session = Some(session);
        result
    }
}

fn run_inference(
    session: &mut Session,
    preprocessor: &Preprocessor,
    image: &RgbImage,
    options: &DetectOptions,
) -> Result<Vec<Prediction>, DetectionError> {
    let _span = tracing::debug_span!("coco_ssd_detect").entered();

    let input = preprocessor
        .preprocess(image)
        .map_err(|e| DetectionError::ModelRuntimeFailure(format!("bad input tensor: {e}")))?;

    let _infer_span = tracing::debug_span!("inference").entered();
    let raw = infer(session, input)
        .map_err(|e| DetectionError::ModelRuntimeFailure(e.to_string()))?;
    drop(_infer_span);

    Ok(decode_detections(&raw, image.dimensions(), options))
}

/// Flattened model outputs for a batch of one
#[derive(Debug, Default)]
struct RawDetections {
    boxes: Vec<f32>,
    classes: Vec<f32>,
    scores: Vec<f32>,
    count: usize,
}

fn infer(session: &mut Session, input: Array4<u8>) -> ort::Result<RawDetections> {
    let tensor = Tensor::from_array(input)?;
    let outputs = session.run(ort::inputs![INPUT_NAME => tensor])?;

    let (_, boxes) = outputs[BOXES_OUTPUT].try_extract_tensor::<f32>()?;
    let (_, classes) = outputs[CLASSES_OUTPUT].try_extract_tensor::<f32>()?;
    let (_, scores) = outputs[SCORES_OUTPUT].try_extract_tensor::<f32>()?;
    let (_, count) = outputs[COUNT_OUTPUT].try_extract_tensor::<f32>()?;

    Ok(RawDetections {
        boxes: boxes.to_vec(),
        classes: classes.to_vec(),
        scores: scores.to_vec(),
        count: count.first().copied().unwrap_or(0.0).max(0.0) as usize,
    })
}

/// Turn raw outputs into predictions in frame pixel coordinates.
/// Model order is kept.
fn decode_detections(
    raw: &RawDetections,
    frame_size: (u32, u32),
    options: &DetectOptions,
) -> Vec<Prediction> {
    let (width, height) = (frame_size.0 as f32, frame_size.1 as f32);
    let count = raw
        .count
        .min(raw.scores.len())
        .min(raw.classes.len())
        .min(raw.boxes.len() / 4);

    (0..count)
        .filter(|&i| raw.scores[i] >= options.min_score)
        .take(options.max_detections)
        .map(|i| {
            let [y_min, x_min, y_max, x_max] = [
                raw.boxes[i * 4],
                raw.boxes[i * 4 + 1],
                raw.boxes[i * 4 + 2],
                raw.boxes[i * 4 + 3],
            ];
            Prediction {
                label: coco_label(raw.classes[i] as u32)
                    .unwrap_or("unknown")
                    .to_string(),
                score: raw.scores[i],
                bbox: BBox::new(
                    x_min * width,
                    y_min * height,
                    (x_max - x_min) * width,
                    (y_max - y_min) * height,
                ),
            }
        })
        .collect()
}
