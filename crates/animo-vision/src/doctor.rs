use anyhow::Result;
use std::path::Path;

use crate::camera::CameraConfig;
use crate::{CaptureConfig, VisionConfig};

pub fn check_camera(cfg: &CameraConfig) -> Result<()> {
    match cfg.mode.as_str() {
        "libcamera-mjpeg" => {}
        "v4l2-mjpeg" => {
            anyhow::ensure!(Path::new(&cfg.device).exists(), "camera.device {} not found", cfg.device);
        }
        "image-dir" => {
            let dir = cfg.image_dir.as_deref().unwrap_or_default();
            anyhow::ensure!(Path::new(dir).is_dir(), "camera.image_dir is not a dir: {}", dir);
        }
        other => anyhow::bail!("unknown camera.mode: {}", other),
    }
    anyhow::ensure!(cfg.width >= 160 && cfg.height >= 120, "camera resolution too small");
    anyhow::ensure!(cfg.fps >= 1 && cfg.fps <= 60, "camera.fps should be 1..60");
    Ok(())
}

pub fn check_capture(cfg: &CaptureConfig) -> Result<()> {
    anyhow::ensure!(cfg.cadence_ms >= 100, "capture.cadence_ms too low (camera and CPU bound)");
    anyhow::ensure!(cfg.cadence_ms <= 10_000, "capture.cadence_ms above 10s; results would be stale");
    anyhow::ensure!(cfg.drain_frames <= 30, "capture.drain_frames should be <= 30");
    Ok(())
}

pub fn check_vision(cfg: &VisionConfig) -> Result<()> {
    let f = &cfg.face;
    match f.backend.as_str() {
        "full-frame" => {}
        "tflite" => {
            let model = if cfg.use_coral { &f.model_path_edgetpu } else { &f.model_path };
            let model = model.as_deref().unwrap_or_default();
            anyhow::ensure!(Path::new(model).is_file(), "face model not found: {:?}", model);
            anyhow::ensure!(f.conf_threshold > 0.0 && f.conf_threshold < 1.0, "vision.face.conf_threshold out of range");
            anyhow::ensure!(f.nms_iou_threshold > 0.0 && f.nms_iou_threshold < 1.0, "vision.face.nms_iou_threshold out of range");
            anyhow::ensure!(f.max_detections >= 1, "vision.face.max_detections must be >= 1");
        }
        other => anyhow::bail!("unknown vision.face.backend: {}", other),
    }

    let c = &cfg.classifier;
    let model = if cfg.use_coral { c.model_path_edgetpu.as_deref().unwrap_or_default() } else { c.model_path.as_str() };
    anyhow::ensure!(Path::new(model).is_file(), "classifier model not found: {:?}", model);
    anyhow::ensure!(c.input_size >= 32, "vision.classifier.input_size too small");
    anyhow::ensure!(
        !c.happy.is_empty() && !c.neutral.is_empty() && !c.sad.is_empty(),
        "vision.classifier needs happy/neutral/sad class indices"
    );
    let overlap = c.happy.iter().any(|i| c.neutral.contains(i) || c.sad.contains(i))
        || c.neutral.iter().any(|i| c.sad.contains(i));
    anyhow::ensure!(!overlap, "vision.classifier class indices overlap between buckets");
    Ok(())
}
