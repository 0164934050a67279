pub mod acoustic;
pub mod engine;
pub mod relevance;

pub use acoustic::AcousticModel;
pub use engine::TfliteEngine;
pub use relevance::RelevanceModel;

use crate::error::{EngineError, Result};
use std::path::Path;

/// Opaque inference collaborator.
///
/// Tensor shapes are fixed at model load: the acoustic model consumes
/// `input_length` normalized samples and produces one raw score per
/// class; the relevance model maps (latitude, longitude, week) to one
/// multiplier per class. The class count is discovered at load time and
/// is immutable for the session.
pub trait InferenceEngine: Send + Sync {
    fn class_count(&self) -> usize;
    fn input_length(&self) -> usize;
    fn run_acoustic(&self, window: &[f32]) -> Result<Vec<f32>>;
    fn run_relevance(&self, latitude: f32, longitude: f32, week: i32) -> Result<Vec<f32>>;
}

/// Load the species label list shipped next to the models.
///
/// The asset is a JSON array of label strings, one per output class.
pub fn load_labels(path: &Path) -> Result<Vec<String>> {
    let file = std::fs::File::open(path)
        .map_err(|e| EngineError::ModelLoad(format!("cannot open labels {}: {e}", path.display())))?;
    let labels: Vec<String> = serde_json::from_reader(std::io::BufReader::new(file))
        .map_err(|e| EngineError::ModelLoad(format!("cannot parse labels: {e}")))?;
    if labels.is_empty() {
        return Err(EngineError::ModelLoad("label list is empty".to_string()));
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_labels_round_trip() {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .expect("temp labels");
        file.write_all(br#"["Turdus merula", "Parus major"]"#)
            .expect("write");
        let labels = load_labels(file.path()).expect("labels");
        assert_eq!(labels, vec!["Turdus merula", "Parus major"]);
    }

    #[test]
    fn test_load_labels_missing_file_fails() {
        assert!(load_labels(Path::new("no_such_labels.json")).is_err());
    }

    #[test]
    fn test_load_labels_empty_list_fails() {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .expect("temp labels");
        file.write_all(b"[]").expect("write");
        assert!(load_labels(file.path()).is_err());
    }
}
