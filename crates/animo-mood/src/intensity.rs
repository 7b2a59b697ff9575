use anyhow::Result;
use serde::Deserialize;

use crate::MoodLabel;

/// Effector level (0..=100) per mood, plus the level used when no mood
/// is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IntensityTable {
    pub very_happy: u8,
    pub happy: u8,
    pub normal: u8,
    pub sad: u8,
    pub very_sad: u8,
    pub fallback: u8,
}

impl Default for IntensityTable {
    fn default() -> Self {
        Self {
            very_happy: 100,
            happy: 75,
            normal: 50,
            sad: 30,
            very_sad: 15,
            fallback: 5,
        }
    }
}

impl IntensityTable {
    pub fn level_for(&self, mood: Option<MoodLabel>) -> u8 {
        match mood {
            Some(MoodLabel::VeryHappy) => self.very_happy,
            Some(MoodLabel::Happy) => self.happy,
            Some(MoodLabel::Normal) => self.normal,
            Some(MoodLabel::Sad) => self.sad,
            Some(MoodLabel::VerySad) => self.very_sad,
            None => self.fallback,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let levels = [self.very_happy, self.happy, self.normal, self.sad, self.very_sad, self.fallback];
        for l in levels {
            anyhow::ensure!(l <= 100, "effector.intensity level {} above 100", l);
        }
        Ok(())
    }
}
