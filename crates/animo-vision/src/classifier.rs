use anyhow::{Context, Result};
use animo_mood::EmotionDistribution;
use image::{imageops::FilterType, RgbImage};

/// Black-box emotion model: takes a face already resized to
/// `input_size()`, returns one score per model class.
pub trait EmotionModel: Send {
    fn input_size(&self) -> (u32, u32);
    fn infer(&mut self, face: &RgbImage) -> Result<Vec<f32>>;
}

/// Which model classes feed each of the three buckets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMapping {
    pub happy: Vec<usize>,
    pub neutral: Vec<usize>,
    pub sad: Vec<usize>,
}

impl ClassMapping {
    /// SigLIP2 facial-emotion head (Ahegao, Angry, Happy, Neutral, Sad, Surprise).
    pub fn siglip() -> Self {
        Self { happy: vec![2], neutral: vec![3], sad: vec![4] }
    }

    /// FER2013 order (Angry, Disgust, Fear, Happy, Sad, Surprise, Neutral);
    /// negative classes are folded into sad.
    pub fn fer2013() -> Self {
        Self { happy: vec![3], neutral: vec![6], sad: vec![0, 2, 4] }
    }

    fn max_index(&self) -> Option<usize> {
        self.happy.iter().chain(&self.neutral).chain(&self.sad).copied().max()
    }
}

pub struct ClassifierAdapter {
    model: Box<dyn EmotionModel>,
    mapping: ClassMapping,
    apply_softmax: bool,
}

impl ClassifierAdapter {
    pub fn new(model: Box<dyn EmotionModel>, mapping: ClassMapping, apply_softmax: bool) -> Result<Self> {
        anyhow::ensure!(
            !mapping.happy.is_empty() && !mapping.neutral.is_empty() && !mapping.sad.is_empty(),
            "classifier mapping needs at least one class per bucket"
        );
        Ok(Self { model, mapping, apply_softmax })
    }

    /// Face crop to happy/neutral/sad probabilities.
    pub fn classify(&mut self, face: &RgbImage) -> Result<EmotionDistribution> {
        anyhow::ensure!(face.width() > 0 && face.height() > 0, "empty face crop");

        let (w, h) = self.model.input_size();
        let scores = if face.dimensions() == (w, h) {
            self.model.infer(face)?
        } else {
            let resized = image::imageops::resize(face, w, h, FilterType::Triangle);
            self.model.infer(&resized)?
        };

        if let Some(max) = self.mapping.max_index() {
            anyhow::ensure!(max < scores.len(), "model returned {} classes, mapping needs index {}", scores.len(), max);
        }
        let probs = if self.apply_softmax { softmax(&scores) } else { scores };

        let bucket = |idx: &[usize]| idx.iter().map(|&i| f64::from(probs[i].max(0.0))).sum::<f64>();
        EmotionDistribution::from_scores(bucket(&self.mapping.happy), bucket(&self.mapping.neutral), bucket(&self.mapping.sad))
            .context("map model output")
    }
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

#[cfg(feature = "vision-tflite")]
pub use tflite_impl::TfliteEmotionModel;

#[cfg(feature = "vision-tflite")]
mod tflite_impl {
    use anyhow::{Context, Result};
    use image::RgbImage;

    use super::EmotionModel;
    use crate::tflite::Interpreter;
    use crate::{ClassifierConfig, VisionConfig};

    enum InputFormat {
        RgbU8,
        RgbF32,
        GrayF32,
    }

    pub struct TfliteEmotionModel {
        interp: Interpreter,
        size: u32,
        format: InputFormat,
        mean: f32,
        std: f32,
    }

    impl TfliteEmotionModel {
        pub fn new(vision: &VisionConfig) -> Result<Self> {
            let cfg: &ClassifierConfig = &vision.classifier;
            let format = match cfg.input_format.as_str() {
                "rgb_u8" => InputFormat::RgbU8,
                "rgb_f32" => InputFormat::RgbF32,
                "gray_f32" => InputFormat::GrayF32,
                other => anyhow::bail!("unknown vision.classifier.input_format: {}", other),
            };
            anyhow::ensure!(cfg.input_std > 0.0, "vision.classifier.input_std must be > 0");
            let path = if vision.use_coral {
                cfg.model_path_edgetpu.as_deref().context("vision.classifier.model_path_edgetpu missing (use_coral=true)")?
            } else {
                cfg.model_path.as_str()
            };
            let interp = Interpreter::load(path, vision.num_threads, vision.use_coral)?;
            Ok(Self { interp, size: cfg.input_size, format, mean: cfg.input_mean, std: cfg.input_std })
        }

        pub fn inspect(&mut self) -> Result<String> {
            self.interp.inspect()
        }

        fn norm(&self, px: u8) -> f32 {
            (f32::from(px) / 255.0 - self.mean) / self.std
        }
    }

    impl EmotionModel for TfliteEmotionModel {
        fn input_size(&self) -> (u32, u32) {
            (self.size, self.size)
        }

        fn infer(&mut self, face: &RgbImage) -> Result<Vec<f32>> {
            match self.format {
                InputFormat::RgbU8 => self.interp.write_input_u8(face.as_raw())?,
                InputFormat::RgbF32 => {
                    let data: Vec<f32> = face.as_raw().iter().map(|&p| self.norm(p)).collect();
                    self.interp.write_input_f32(&data)?
                }
                InputFormat::GrayF32 => {
                    let gray = image::imageops::grayscale(face);
                    let data: Vec<f32> = gray.as_raw().iter().map(|&p| self.norm(p)).collect();
                    self.interp.write_input_f32(&data)?
                }
            }
            self.interp.invoke()?;
            let (_, out) = self.interp.output_f32(0)?;
            Ok(out)
        }
    }
}
