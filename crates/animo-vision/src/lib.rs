mod nms;
pub mod camera;
pub mod classifier;
pub mod coordinator;
pub mod doctor;
pub mod face;
#[cfg(feature = "vision-tflite")]
pub mod tflite;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use classifier::{ClassMapping, ClassifierAdapter, EmotionModel};
pub use coordinator::{CaptureConfig, CaptureCoordinator, CaptureError, CaptureHandle, Pipeline};
pub use face::{FaceDetector, FullFrameDetector};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub conf: f32,
    // normalized 0..1
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisionConfig {
    #[serde(default)]
    pub use_coral: bool,
    #[serde(default = "default_threads")]
    pub num_threads: i32,
    pub face: FaceConfig,
    pub classifier: ClassifierConfig,
}

fn default_threads() -> i32 {
    2
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaceConfig {
    pub backend: String, // "tflite" | "full-frame"
    pub model_path: Option<String>,
    pub model_path_edgetpu: Option<String>,
    #[serde(default = "default_face_input")]
    pub img_w: u32,
    #[serde(default = "default_face_input")]
    pub img_h: u32,
    #[serde(default = "default_conf")]
    pub conf_threshold: f32,
    #[serde(default = "default_iou")]
    pub nms_iou_threshold: f32,
    #[serde(default = "default_max_faces")]
    pub max_detections: usize,
    /// Smaller boxes are discarded, in frame pixels.
    #[serde(default = "default_min_face")]
    pub min_face_px: u32,
}

fn default_face_input() -> u32 { 320 }
fn default_conf() -> f32 { 0.5 }
fn default_iou() -> f32 { 0.45 }
fn default_max_faces() -> usize { 8 }
fn default_min_face() -> u32 { 48 }

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    pub model_path: String,
    pub model_path_edgetpu: Option<String>,
    #[serde(default = "default_classifier_input")]
    pub input_size: u32,
    /// "rgb_u8" | "rgb_f32" | "gray_f32"
    #[serde(default = "default_input_format")]
    pub input_format: String,
    /// f32 inputs are fed as (px/255 - mean) / std.
    #[serde(default)]
    pub input_mean: f32,
    #[serde(default = "default_std")]
    pub input_std: f32,
    #[serde(default)]
    pub apply_softmax: bool,
    pub happy: Vec<usize>,
    pub neutral: Vec<usize>,
    pub sad: Vec<usize>,
}

fn default_classifier_input() -> u32 { 224 }
fn default_input_format() -> String { "rgb_f32".into() }
fn default_std() -> f32 { 1.0 }

impl ClassifierConfig {
    pub fn mapping(&self) -> ClassMapping {
        ClassMapping {
            happy: self.happy.clone(),
            neutral: self.neutral.clone(),
            sad: self.sad.clone(),
        }
    }
}

/// Decodes a single-class YOLO export laid out as `[cx, cy, w, h, obj, cls...]`.
pub fn postprocess_ultralytics(
    raw: &[f32],
    num_preds: usize,
    num_classes: usize,
    conf_th: f32,
) -> Vec<Detection> {
    let stride = 5 + num_classes;
    let mut out = Vec::new();

    for pred in raw.chunks_exact(stride).take(num_preds) {
        let obj = pred[4];
        let best = pred[5..].iter().copied().fold(0.0f32, f32::max);
        let conf = if num_classes == 0 { obj } else { obj * best };
        if conf >= conf_th {
            out.push(Detection { conf, cx: pred[0], cy: pred[1], w: pred[2], h: pred[3] });
        }
    }
    out
}

pub fn nms_filter(mut dets: Vec<Detection>, iou_th: f32, max_det: usize) -> Vec<Detection> {
    dets.sort_by(|a, b| b.conf.partial_cmp(&a.conf).unwrap_or(std::cmp::Ordering::Equal));
    let mut kept: Vec<Detection> = Vec::new();

    'outer: for d in dets {
        for k in &kept {
            if nms::iou(&d, k) >= iou_th {
                continue 'outer;
            }
        }
        kept.push(d);
        if kept.len() >= max_det { break; }
    }
    kept
}

/// Builds the capture pipeline named by the config.
pub fn build_pipeline(cfg: &VisionConfig) -> Result<Pipeline> {
    let detector: Box<dyn FaceDetector> = match cfg.face.backend.as_str() {
        "full-frame" => Box::new(FullFrameDetector),
        #[cfg(feature = "vision-tflite")]
        "tflite" => Box::new(face::TfliteFaceDetector::new(cfg)?),
        #[cfg(not(feature = "vision-tflite"))]
        "tflite" => anyhow::bail!("vision.face.backend=tflite but binary not built with --features vision-tflite"),
        other => anyhow::bail!("unknown vision.face.backend: {}", other),
    };

    #[cfg(feature = "vision-tflite")]
    {
        let model = classifier::TfliteEmotionModel::new(cfg)?;
        let adapter = ClassifierAdapter::new(Box::new(model), cfg.classifier.mapping(), cfg.classifier.apply_softmax)?;
        Ok(Pipeline::new(detector, adapter))
    }

    #[cfg(not(feature = "vision-tflite"))]
    {
        let _ = detector;
        anyhow::bail!("emotion classifier needs a binary built with --features vision-tflite")
    }
}
