use anyhow::Result;
use animo_mood::FaceBox;
use image::RgbImage;

use crate::Detection;

pub trait FaceDetector: Send {
    /// Face boxes in frame pixels, in detector order.
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceBox>>;
}

/// Treats the whole frame as the face, for cameras framed on the visitor.
pub struct FullFrameDetector;

impl FaceDetector for FullFrameDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceBox>> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![FaceBox { x: 0, y: 0, w: frame.width(), h: frame.height() }])
    }
}

/// Largest box by area; the first one found wins ties.
pub fn largest_face(faces: &[FaceBox]) -> Option<FaceBox> {
    let mut best: Option<FaceBox> = None;
    for f in faces {
        if best.map_or(true, |b| f.area() > b.area()) {
            best = Some(*f);
        }
    }
    best
}

/// Crops `face` out of `frame`, clamped to the frame. `None` when nothing
/// is left after clamping.
pub fn crop_face(frame: &RgbImage, face: FaceBox) -> Option<RgbImage> {
    let x = face.x.min(frame.width());
    let y = face.y.min(frame.height());
    let w = face.w.min(frame.width() - x);
    let h = face.h.min(frame.height() - y);
    if w == 0 || h == 0 {
        return None;
    }
    Some(image::imageops::crop_imm(frame, x, y, w, h).to_image())
}

/// Scales a normalized detection to frame pixels.
pub fn to_face_box(d: &Detection, frame_w: u32, frame_h: u32) -> FaceBox {
    let fw = frame_w as f32;
    let fh = frame_h as f32;
    let x0 = ((d.cx - d.w / 2.0) * fw).clamp(0.0, fw);
    let y0 = ((d.cy - d.h / 2.0) * fh).clamp(0.0, fh);
    let x1 = ((d.cx + d.w / 2.0) * fw).clamp(0.0, fw);
    let y1 = ((d.cy + d.h / 2.0) * fh).clamp(0.0, fh);
    FaceBox {
        x: x0 as u32,
        y: y0 as u32,
        w: (x1 - x0).max(0.0) as u32,
        h: (y1 - y0).max(0.0) as u32,
    }
}

#[cfg(feature = "vision-tflite")]
pub use tflite_impl::TfliteFaceDetector;

#[cfg(feature = "vision-tflite")]
mod tflite_impl {
    use anyhow::{Context, Result};
    use animo_mood::FaceBox;
    use image::{imageops::FilterType, RgbImage};
    use tracing::debug;

    use super::{to_face_box, FaceDetector};
    use crate::tflite::Interpreter;
    use crate::{nms_filter, postprocess_ultralytics, FaceConfig, VisionConfig};

    /// Single-class YOLO face model; expects u8 RGB input.
    pub struct TfliteFaceDetector {
        cfg: FaceConfig,
        interp: Interpreter,
    }

    impl TfliteFaceDetector {
        pub fn new(vision: &VisionConfig) -> Result<Self> {
            let cfg = vision.face.clone();
            let path = if vision.use_coral {
                cfg.model_path_edgetpu.as_ref().context("vision.face.model_path_edgetpu missing (use_coral=true)")?
            } else {
                cfg.model_path.as_ref().context("vision.face.model_path missing")?
            };
            let interp = Interpreter::load(path, vision.num_threads, vision.use_coral)?;
            Ok(Self { cfg, interp })
        }

        pub fn inspect(&mut self) -> Result<String> {
            self.interp.inspect()
        }
    }

    impl FaceDetector for TfliteFaceDetector {
        fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceBox>> {
            let resized = image::imageops::resize(frame, self.cfg.img_w, self.cfg.img_h, FilterType::Triangle);
            self.interp.write_input_u8(resized.as_raw())?;
            self.interp.invoke()?;

            let (dims, raw) = self.interp.output_f32(0)?;
            let (num_preds, stride) = match dims.as_slice() {
                [1, n, s] => (*n as usize, *s as usize),
                [n, s] => (*n as usize, *s as usize),
                other => anyhow::bail!(
                    "unexpected face output dims {:?}. Run `animo vision inspect` to view tensors.",
                    other
                ),
            };
            anyhow::ensure!(stride >= 5, "face output stride {} too small", stride);

            let dets = postprocess_ultralytics(&raw, num_preds, stride - 5, self.cfg.conf_threshold);
            let kept = nms_filter(dets, self.cfg.nms_iou_threshold, self.cfg.max_detections);
            let min = self.cfg.min_face_px;
            let faces: Vec<FaceBox> = kept
                .iter()
                .map(|d| to_face_box(d, frame.width(), frame.height()))
                .filter(|f| f.w >= min && f.h >= min)
                .collect();
            debug!(raw = kept.len(), faces = faces.len(), "vision: face detect");
            Ok(faces)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fb(x: u32, y: u32, w: u32, h: u32) -> FaceBox {
        FaceBox { x, y, w, h }
    }

    #[test]
    fn largest_face_wins() {
        let faces = [fb(0, 0, 10, 10), fb(5, 5, 40, 30), fb(1, 1, 20, 20)];
        assert_eq!(largest_face(&faces), Some(fb(5, 5, 40, 30)));
        assert_eq!(largest_face(&[]), None);
    }

    #[test]
    fn ties_go_to_first_found() {
        let faces = [fb(0, 0, 20, 10), fb(50, 50, 10, 20), fb(9, 9, 5, 5)];
        assert_eq!(largest_face(&faces), Some(fb(0, 0, 20, 10)));
    }

    #[test]
    fn crop_clamps_to_frame() {
        let frame = RgbImage::new(100, 80);
        let c = crop_face(&frame, fb(90, 70, 50, 50)).unwrap();
        assert_eq!((c.width(), c.height()), (10, 10));
        assert!(crop_face(&frame, fb(100, 10, 20, 20)).is_none());
        assert!(crop_face(&frame, fb(10, 10, 0, 20)).is_none());
    }

    #[test]
    fn normalized_detection_scales_to_pixels() {
        let d = Detection { conf: 0.9, cx: 0.5, cy: 0.5, w: 0.5, h: 0.25 };
        assert_eq!(to_face_box(&d, 200, 400), fb(50, 150, 100, 100));
    }

    #[test]
    fn full_frame_detector_returns_frame() {
        let mut d = FullFrameDetector;
        assert_eq!(d.detect(&RgbImage::new(64, 48)).unwrap(), vec![fb(0, 0, 64, 48)]);
        assert!(d.detect(&RgbImage::new(0, 0)).unwrap().is_empty());
    }
}
