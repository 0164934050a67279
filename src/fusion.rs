//! Score fusion and detection selection.
//!
//! Raw per-class scores from the acoustic model pass through a
//! flat-sigmoid transform, are optionally weighted by the session's
//! spatio-temporal relevance vector, and are then cut down to the top-K
//! entries above the confidence threshold.

use crate::config::SessionOptions;
use crate::events::DetectionEvent;
use std::cmp::Ordering;

/// Raw scores are clamped to this range before the sigmoid so extreme
/// logits cannot overflow `exp`.
const SIGMOID_CLIP: f32 = 20.0;

/// Per-class relevance multipliers, computed once per session from
/// (latitude, longitude, week) and immutable afterwards.
#[derive(Debug, Clone)]
pub struct RelevanceVector(Vec<f32>);

impl RelevanceVector {
    pub fn new(weights: Vec<f32>) -> Self {
        Self(weights)
    }

    /// The neutral vector: every class weighted 1.0.
    pub fn uniform(class_count: usize) -> Self {
        Self(vec![1.0; class_count])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Weight for one class; classes beyond the vector are neutral.
    pub fn weight(&self, class_index: usize) -> f32 {
        self.0.get(class_index).copied().unwrap_or(1.0)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

/// Flat sigmoid transform applied to each raw score.
///
/// With the default `sensitivity` of -1.0 and `bias` of 0.0 this is the
/// standard logistic sigmoid.
pub fn flat_sigmoid(x: f32, sensitivity: f32, bias: f32) -> f32 {
    let clipped = (x + bias).clamp(-SIGMOID_CLIP, SIGMOID_CLIP);
    1.0 / (1.0 + (sensitivity * clipped).exp())
}

/// Combines raw acoustic scores with the session relevance vector.
pub struct ScoreFuser {
    sensitivity: f32,
    bias_offset: f32,
    relevance: Option<RelevanceVector>,
}

impl ScoreFuser {
    /// A fuser for this session. `relevance` is `None` when the location
    /// is unknown, in which case the multiplication is skipped entirely
    /// and detections surface without geographic bias.
    pub fn new(options: &SessionOptions, relevance: Option<RelevanceVector>) -> Self {
        Self {
            sensitivity: options.sensitivity,
            bias_offset: options.bias_offset,
            relevance,
        }
    }

    pub fn has_relevance(&self) -> bool {
        self.relevance.is_some()
    }

    /// Fuse raw scores into confidences. An empty input (a failed
    /// inference upstream) fuses to an empty output, which downstream
    /// treats as "no detection this window".
    pub fn fuse(&self, raw: &[f32]) -> Vec<f32> {
        let mut fused: Vec<f32> = raw
            .iter()
            .map(|&v| flat_sigmoid(v, self.sensitivity, self.bias_offset))
            .collect();
        if let Some(relevance) = &self.relevance {
            for (class_index, score) in fused.iter_mut().enumerate() {
                *score *= relevance.weight(class_index);
            }
        }
        fused
    }
}

/// Ranks fused scores and emits at most top-K detections above the
/// confidence threshold.
pub struct DetectionSelector {
    top_k: usize,
    threshold: f32,
}

impl DetectionSelector {
    pub fn new(top_k: usize, threshold: f32) -> Self {
        Self { top_k, threshold }
    }

    /// Select detections from one window or chunk.
    ///
    /// Classes are ranked by fused score descending with a stable
    /// tie-break on ascending class index. The result is empty (never
    /// panics, never more than top-K) when nothing qualifies.
    pub fn select(&self, fused: &[f32], chunk_index: Option<usize>) -> Vec<DetectionEvent> {
        let mut ranked: Vec<usize> = (0..fused.len()).collect();
        ranked.sort_by(|&a, &b| {
            fused[b]
                .partial_cmp(&fused[a])
                .unwrap_or(Ordering::Equal)
                .then(a.cmp(&b))
        });

        ranked
            .into_iter()
            .take(self.top_k)
            .filter(|&class_index| fused[class_index] >= self.threshold)
            .map(|class_index| DetectionEvent::new(class_index, fused[class_index], chunk_index))
            .collect()
    }
}
