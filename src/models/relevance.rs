//! Spatio-temporal relevance model backed by TensorFlow Lite.
//!
//! Maps (latitude, longitude, week-of-year) to one plausibility
//! multiplier per output class. Run once at session start; the result
//! is immutable for the session.

use crate::error::{EngineError, Result};
use std::path::Path;
use std::sync::Mutex;

use tflitec::interpreter::{Interpreter, Options};
use tflitec::model::Model;
use tflitec::tensor::Shape;

/// Number of input features: latitude, longitude, week.
const INPUT_FEATURES: usize = 3;

pub struct RelevanceModel {
    interpreter: Mutex<Interpreter<'static>>,
    class_count: usize,
}

// The interpreter is only ever driven through the mutex; the TFLite C
// API has no thread affinity.
unsafe impl Send for RelevanceModel {}
unsafe impl Sync for RelevanceModel {}

impl RelevanceModel {
    pub fn new(model_path: &str) -> Result<Self> {
        if !Path::new(model_path).exists() {
            return Err(EngineError::ModelLoad(format!(
                "Model file not found: {}",
                model_path
            )));
        }

        // Load the model and leak it for 'static lifetime
        let model = Box::leak(Box::new(Model::new(model_path).map_err(|e| {
            EngineError::ModelLoad(format!("Failed to load relevance model: {}", e))
        })?));

        let mut options = Options::default();
        options.thread_count = 1;

        let interpreter = Interpreter::new(model, Some(options)).map_err(|e| {
            EngineError::ModelLoad(format!("Failed to create relevance interpreter: {}", e))
        })?;

        let input_shape = Shape::new(vec![1, INPUT_FEATURES]);
        interpreter.resize_input(0, input_shape).map_err(|e| {
            EngineError::ModelLoad(format!("Failed to resize relevance input: {}", e))
        })?;

        interpreter.allocate_tensors().map_err(|e| {
            EngineError::ModelLoad(format!("Failed to allocate relevance tensors: {}", e))
        })?;

        let output_tensor = interpreter.output(0).map_err(|e| {
            EngineError::ModelLoad(format!("Failed to get relevance output tensor: {}", e))
        })?;
        let class_count = output_tensor.shape().dimensions().iter().product::<usize>();

        log::info!("Relevance model loaded: {} classes", class_count);

        Ok(Self {
            interpreter: Mutex::new(interpreter),
            class_count,
        })
    }

    pub fn class_count(&self) -> usize {
        self.class_count
    }

    /// Predict per-class multipliers for a location and week.
    pub fn predict(&self, latitude: f32, longitude: f32, week: i32) -> Result<Vec<f32>> {
        let input = [latitude, longitude, week as f32];

        let interpreter = self
            .interpreter
            .lock()
            .map_err(|e| EngineError::Inference(format!("Failed to lock interpreter: {}", e)))?;

        interpreter
            .copy(&input, 0)
            .map_err(|e| EngineError::Inference(format!("Failed to set relevance input: {}", e)))?;

        interpreter
            .invoke()
            .map_err(|e| EngineError::Inference(format!("Relevance inference failed: {}", e)))?;

        let output_tensor = interpreter
            .output(0)
            .map_err(|e| EngineError::Inference(format!("Failed to get relevance output: {}", e)))?;

        Ok(output_tensor.data::<f32>().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relevance_model_missing_file_fails() {
        let result = RelevanceModel::new("non_existent_model.tflite");
        assert!(result.is_err());
    }
}
