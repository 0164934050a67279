//! Combined inference engine over the acoustic and relevance models.

use crate::error::{EngineError, Result};
use crate::models::{AcousticModel, InferenceEngine, RelevanceModel};

/// `InferenceEngine` implementation composing the two TFLite models.
///
/// The relevance model is optional; without it `run_relevance` fails
/// and the caller falls back to unfiltered acoustic scores.
pub struct TfliteEngine {
    acoustic: AcousticModel,
    relevance: Option<RelevanceModel>,
}

impl TfliteEngine {
    pub fn new(
        acoustic_path: &str,
        relevance_path: Option<&str>,
        input_length: usize,
    ) -> Result<Self> {
        let acoustic = AcousticModel::new(acoustic_path, input_length)?;
        let relevance = match relevance_path {
            Some(path) => {
                let model = RelevanceModel::new(path)?;
                if model.class_count() != acoustic.class_count() {
                    return Err(EngineError::ModelLoad(format!(
                        "class count mismatch: acoustic has {}, relevance has {}",
                        acoustic.class_count(),
                        model.class_count()
                    )));
                }
                Some(model)
            }
            None => {
                log::info!("No relevance model configured, detections will be unfiltered");
                None
            }
        };

        Ok(Self { acoustic, relevance })
    }

    /// Run throwaway acoustic inferences, see `AcousticModel::warmup`.
    pub fn warmup(&self, runs: usize) -> Result<()> {
        self.acoustic.warmup(runs)
    }
}

impl InferenceEngine for TfliteEngine {
    fn class_count(&self) -> usize {
        self.acoustic.class_count()
    }

    fn input_length(&self) -> usize {
        self.acoustic.input_length()
    }

    fn run_acoustic(&self, window: &[f32]) -> Result<Vec<f32>> {
        self.acoustic.predict(window)
    }

    fn run_relevance(&self, latitude: f32, longitude: f32, week: i32) -> Result<Vec<f32>> {
        match &self.relevance {
            Some(model) => model.predict(latitude, longitude, week),
            None => Err(EngineError::ModelLoad(
                "no relevance model loaded".to_string(),
            )),
        }
    }
}
