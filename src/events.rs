//! Detection and session events published to subscribers.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A single species detection.
///
/// Produced by the selector, published immediately and not retained by
/// the engine. `chunk_index` is set for batch (file) classification and
/// absent for live windows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionEvent {
    /// Output-class index of the detected species.
    pub class_index: usize,
    /// Fused confidence in [0, 1]; always at or above the session
    /// confidence threshold.
    pub confidence: f32,
    /// Chunk index for batch classification, `None` for live windows.
    pub chunk_index: Option<usize>,
    /// When the detection was made.
    pub timestamp: DateTime<Utc>,
}

impl DetectionEvent {
    pub fn new(class_index: usize, confidence: f32, chunk_index: Option<usize>) -> Self {
        Self {
            class_index,
            confidence,
            chunk_index,
            timestamp: Utc::now(),
        }
    }

    /// Returns true if this detection came from batch classification.
    pub fn is_batch(&self) -> bool {
        self.chunk_index.is_some()
    }
}

/// Events published on a session's broadcast channel.
///
/// Within one session these are emitted in non-decreasing tick/chunk
/// order; the publishing side never blocks waiting for a consumer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Detections for one window or chunk, at most top-K entries.
    Detections(Vec<DetectionEvent>),
    /// Batch read progress as a percentage in [0, 100].
    Progress(u8),
    /// The recording sink hit a write failure and the recording was
    /// aborted; classification continues.
    RecordingAborted,
    /// The session stopped and no further events will follow.
    Finished,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_event_creation() {
        let event = DetectionEvent::new(42, 0.91, None);
        assert_eq!(event.class_index, 42);
        assert!((event.confidence - 0.91).abs() < f32::EPSILON);
        assert!(!event.is_batch());

        let batch_event = DetectionEvent::new(7, 0.66, Some(2));
        assert!(batch_event.is_batch());
        assert_eq!(batch_event.chunk_index, Some(2));
    }

    #[test]
    fn test_detection_event_serializes() {
        let event = DetectionEvent::new(3, 0.75, Some(0));
        let json = serde_json::to_string(&event).expect("serializable");
        assert!(json.contains("\"class_index\":3"));
        assert!(json.contains("\"chunk_index\":0"));
    }
}
