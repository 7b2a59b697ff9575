pub mod intensity;
pub mod slot;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use time::OffsetDateTime;

pub use intensity::IntensityTable;
pub use slot::LatestDetection;

/// Shown on the result screen when nothing was ever detected.
pub const NOT_DETECTED: &str = "NOT DETECTED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MoodLabel {
    VeryHappy,
    Happy,
    Normal,
    Sad,
    VerySad,
}

impl MoodLabel {
    pub const ALL: [MoodLabel; 5] = [
        MoodLabel::VeryHappy,
        MoodLabel::Happy,
        MoodLabel::Normal,
        MoodLabel::Sad,
        MoodLabel::VerySad,
    ];

    /// Text rendered on the result screen.
    pub fn display(self) -> &'static str {
        match self {
            MoodLabel::VeryHappy => "MUY FELIZ",
            MoodLabel::Happy => "FELIZ",
            MoodLabel::Normal => "NORMAL",
            MoodLabel::Sad => "TRISTE",
            MoodLabel::VerySad => "MUY TRISTE",
        }
    }

    /// Position on the statistics chart, 4 = top row.
    pub fn level(self) -> u8 {
        match self {
            MoodLabel::VeryHappy => 4,
            MoodLabel::Happy => 3,
            MoodLabel::Normal => 2,
            MoodLabel::Sad => 1,
            MoodLabel::VerySad => 0,
        }
    }

    pub fn from_level(level: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.level() == level)
    }

    /// Row name on the statistics chart and in the day detail list.
    pub fn chart_name(self) -> &'static str {
        level_name(self.level())
    }
}

impl fmt::Display for MoodLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display())
    }
}

/// Chart row names, indexed by level (0 = bottom).
pub const LEVEL_NAMES: [&str; 5] = ["MUY MAL", "MAL", "NORMAL", "BIEN", "MUY BIEN"];

pub fn level_name(level: u8) -> &'static str {
    LEVEL_NAMES[usize::from(level.min(4))]
}

// Decision thresholds on happy - sad.
pub const VERY_HAPPY_DIFF: f64 = 0.40;
pub const HAPPY_DIFF: f64 = 0.15;

// Differences are compared at this resolution so decimal inputs such as
// 0.575 - 0.175 land on the boundary they denote.
const DIFF_SCALE: f64 = 1e9;

fn quantize(v: f64) -> i64 {
    (v * DIFF_SCALE).round() as i64
}

/// Maps a distribution onto a mood bucket. Only `happy - sad` matters:
/// `>= 0.40` very happy, `>= 0.15` happy, `> -0.15` normal, `> -0.40` sad.
pub fn classify_mood(happy: f64, _neutral: f64, sad: f64) -> MoodLabel {
    let diff = quantize(happy - sad);
    let very = quantize(VERY_HAPPY_DIFF);
    let mild = quantize(HAPPY_DIFF);

    if diff >= very {
        MoodLabel::VeryHappy
    } else if diff >= mild {
        MoodLabel::Happy
    } else if diff > -mild {
        MoodLabel::Normal
    } else if diff > -very {
        MoodLabel::Sad
    } else {
        MoodLabel::VerySad
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum DistributionError {
    #[error("probability {name}={value} is negative or not finite")]
    Invalid { name: &'static str, value: f64 },
    #[error("probabilities sum to zero")]
    ZeroTotal,
    #[error("probabilities sum to {0}, expected 1.0")]
    NotNormalized(f64),
}

const SUM_TOLERANCE: f64 = 1e-3;

/// Happy/neutral/sad probabilities summing to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmotionDistribution {
    happy: f64,
    neutral: f64,
    sad: f64,
}

impl EmotionDistribution {
    pub fn new(happy: f64, neutral: f64, sad: f64) -> Result<Self, DistributionError> {
        check("happy", happy)?;
        check("neutral", neutral)?;
        check("sad", sad)?;
        let total = happy + neutral + sad;
        if (total - 1.0).abs() > SUM_TOLERANCE {
            return Err(DistributionError::NotNormalized(total));
        }
        Ok(Self { happy, neutral, sad })
    }

    /// Renormalizes raw non-negative scores over the three buckets.
    pub fn from_scores(happy: f64, neutral: f64, sad: f64) -> Result<Self, DistributionError> {
        check("happy", happy)?;
        check("neutral", neutral)?;
        check("sad", sad)?;
        let total = happy + neutral + sad;
        if total <= 0.0 {
            return Err(DistributionError::ZeroTotal);
        }
        Ok(Self { happy: happy / total, neutral: neutral / total, sad: sad / total })
    }

    pub fn happy(&self) -> f64 { self.happy }
    pub fn neutral(&self) -> f64 { self.neutral }
    pub fn sad(&self) -> f64 { self.sad }

    pub fn mood(&self) -> MoodLabel {
        classify_mood(self.happy, self.neutral, self.sad)
    }
}

fn check(name: &'static str, value: f64) -> Result<(), DistributionError> {
    if !value.is_finite() || value < 0.0 {
        return Err(DistributionError::Invalid { name, value });
    }
    Ok(())
}

/// Face rectangle in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl FaceBox {
    pub fn area(&self) -> u64 {
        u64::from(self.w) * u64::from(self.h)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub distribution: EmotionDistribution,
    pub mood: MoodLabel,
    pub face: FaceBox,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

impl DetectionResult {
    pub fn new(distribution: EmotionDistribution, face: FaceBox, at: OffsetDateTime) -> Self {
        Self { mood: distribution.mood(), distribution, face, at }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_at_point_four_is_very_happy() {
        assert_eq!(classify_mood(0.575, 0.25, 0.175), MoodLabel::VeryHappy);
    }

    #[test]
    fn just_below_point_four_is_happy() {
        assert_eq!(classify_mood(0.574999, 0.250001, 0.175), MoodLabel::Happy);
        assert_eq!(classify_mood(0.574, 0.251, 0.175), MoodLabel::Happy);
    }

    #[test]
    fn buckets_follow_thresholds() {
        assert_eq!(classify_mood(0.70, 0.20, 0.10), MoodLabel::VeryHappy);
        assert_eq!(classify_mood(0.45, 0.25, 0.30), MoodLabel::Happy);
        assert_eq!(classify_mood(0.40, 0.30, 0.30), MoodLabel::Normal);
        assert_eq!(classify_mood(0.30, 0.25, 0.45), MoodLabel::Sad);
        assert_eq!(classify_mood(0.10, 0.20, 0.70), MoodLabel::VerySad);
    }

    #[test]
    fn negative_boundaries_resolve_toward_normal() {
        // -0.15 is SAD, -0.40 is VERY_SAD
        assert_eq!(classify_mood(0.30, 0.25, 0.45), MoodLabel::Sad);
        assert_eq!(classify_mood(0.175, 0.25, 0.575), MoodLabel::VerySad);
        assert_eq!(classify_mood(0.3, 0.2500001, 0.4499999), MoodLabel::Normal);
        // +0.15 opens HAPPY
        assert_eq!(classify_mood(0.45, 0.25, 0.30), MoodLabel::Happy);
    }

    #[test]
    fn neutral_does_not_change_the_label() {
        for n in [0.0, 0.1, 0.33, 0.5, 0.9] {
            assert_eq!(classify_mood(0.6, n, 0.1), MoodLabel::VeryHappy);
            assert_eq!(classify_mood(0.2, n, 0.2), MoodLabel::Normal);
            assert_eq!(classify_mood(0.05, n, 0.30), MoodLabel::Sad);
        }
    }

    #[test]
    fn display_strings() {
        let shown: Vec<_> = MoodLabel::ALL.iter().map(|m| m.display()).collect();
        assert_eq!(shown, ["MUY FELIZ", "FELIZ", "NORMAL", "TRISTE", "MUY TRISTE"]);
        assert_eq!(MoodLabel::Sad.to_string(), "TRISTE");
    }

    #[test]
    fn levels_map_to_chart_rows() {
        assert_eq!(MoodLabel::VeryHappy.chart_name(), "MUY BIEN");
        assert_eq!(MoodLabel::VerySad.chart_name(), "MUY MAL");
        for m in MoodLabel::ALL {
            assert_eq!(MoodLabel::from_level(m.level()), Some(m));
        }
        assert_eq!(MoodLabel::from_level(9), None);
    }

    #[test]
    fn serde_uses_screaming_case() {
        let s = serde_json::to_string(&MoodLabel::VeryHappy).unwrap();
        assert_eq!(s, "\"VERY_HAPPY\"");
    }

    #[test]
    fn distribution_validation() {
        assert!(EmotionDistribution::new(0.7, 0.2, 0.1).is_ok());
        assert!(matches!(
            EmotionDistribution::new(0.7, 0.7, 0.1),
            Err(DistributionError::NotNormalized(_))
        ));
        assert!(matches!(
            EmotionDistribution::new(-0.1, 0.6, 0.5),
            Err(DistributionError::Invalid { name: "happy", .. })
        ));
        assert_eq!(EmotionDistribution::from_scores(0.0, 0.0, 0.0), Err(DistributionError::ZeroTotal));
    }

    #[test]
    fn from_scores_renormalizes() {
        let d = EmotionDistribution::from_scores(3.0, 1.0, 0.0).unwrap();
        assert!((d.happy() - 0.75).abs() < 1e-12);
        assert!((d.happy() + d.neutral() + d.sad() - 1.0).abs() < 1e-12);
        assert_eq!(d.mood(), MoodLabel::VeryHappy);
    }
}
