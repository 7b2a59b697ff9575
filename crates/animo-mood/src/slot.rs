use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::{DetectionResult, MoodLabel};

/// Most recent detection, shared between the capture thread (writer) and
/// the screen flow (reader). Records are swapped whole; there is no way to
/// clear the slot once it holds a value.
#[derive(Debug, Clone, Default)]
pub struct LatestDetection {
    inner: Arc<Mutex<Option<DetectionResult>>>,
}

impl LatestDetection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, result: DetectionResult) {
        debug!(mood = %result.mood, face_area = result.face.area(), "detection: published");
        *self.lock() = Some(result);
    }

    pub fn snapshot(&self) -> Option<DetectionResult> {
        self.lock().clone()
    }

    pub fn mood(&self) -> Option<MoodLabel> {
        self.lock().as_ref().map(|r| r.mood)
    }

    // A writer panicking mid-swap cannot leave a torn record behind, so a
    // poisoned lock still holds a consistent value.
    fn lock(&self) -> MutexGuard<'_, Option<DetectionResult>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EmotionDistribution, FaceBox};
    use time::OffsetDateTime;

    fn result(h: f64, n: f64, s: f64) -> DetectionResult {
        DetectionResult::new(
            EmotionDistribution::new(h, n, s).unwrap(),
            FaceBox { x: 0, y: 0, w: 64, h: 64 },
            OffsetDateTime::UNIX_EPOCH,
        )
    }

    #[test]
    fn empty_until_first_publish() {
        let slot = LatestDetection::new();
        assert!(slot.snapshot().is_none());
        assert_eq!(slot.mood(), None);
    }

    #[test]
    fn publish_replaces_whole_record() {
        let slot = LatestDetection::new();
        slot.publish(result(0.7, 0.2, 0.1));
        slot.publish(result(0.1, 0.2, 0.7));
        let snap = slot.snapshot().unwrap();
        assert_eq!(snap.mood, MoodLabel::VerySad);
        assert_eq!(snap.distribution.sad(), 0.7);
    }

    #[test]
    fn clones_share_the_same_slot() {
        let writer = LatestDetection::new();
        let reader = writer.clone();
        writer.publish(result(0.5, 0.3, 0.2));
        assert_eq!(reader.mood(), Some(MoodLabel::Happy));
    }

    #[test]
    fn readers_never_see_mixed_records() {
        let slot = LatestDetection::new();
        let writer = slot.clone();
        let t = std::thread::spawn(move || {
            for i in 0..500 {
                if i % 2 == 0 {
                    writer.publish(result(0.7, 0.2, 0.1));
                } else {
                    writer.publish(result(0.1, 0.2, 0.7));
                }
            }
        });
        for _ in 0..500 {
            if let Some(r) = slot.snapshot() {
                assert_eq!(r.mood, r.distribution.mood());
            }
        }
        t.join().unwrap();
    }
}
