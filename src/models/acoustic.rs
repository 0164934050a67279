//! Acoustic species classifier backed by TensorFlow Lite.
//!
//! The model consumes a fixed-length window of peak-normalized samples
//! shaped `[1, input_length]` and produces one raw score per output
//! class. The class count is read from the output tensor at load time.

use crate::error::{EngineError, Result};
use std::path::Path;
use std::sync::Mutex;

use tflitec::interpreter::{Interpreter, Options};
use tflitec::model::Model;
use tflitec::tensor::Shape;

pub struct AcousticModel {
    interpreter: Mutex<Interpreter<'static>>,
    input_length: usize,
    class_count: usize,
}

// The interpreter is only ever driven through the mutex; the TFLite C
// API has no thread affinity.
unsafe impl Send for AcousticModel {}
unsafe impl Sync for AcousticModel {}

impl AcousticModel {
    /// Load the classifier and fix its input shape to `[1, input_length]`.
    pub fn new(model_path: &str, input_length: usize) -> Result<Self> {
        if !Path::new(model_path).exists() {
            return Err(EngineError::ModelLoad(format!(
                "Model file not found: {}",
                model_path
            )));
        }

        // Load the model and leak it for 'static lifetime
        let model = Box::leak(Box::new(Model::new(model_path).map_err(|e| {
            EngineError::ModelLoad(format!("Failed to load acoustic model: {}", e))
        })?));

        let mut options = Options::default();
        options.thread_count = 1;

        let interpreter = Interpreter::new(model, Some(options)).map_err(|e| {
            EngineError::ModelLoad(format!("Failed to create acoustic interpreter: {}", e))
        })?;

        let input_shape = Shape::new(vec![1, input_length]);
        interpreter.resize_input(0, input_shape).map_err(|e| {
            EngineError::ModelLoad(format!("Failed to resize acoustic input: {}", e))
        })?;

        interpreter.allocate_tensors().map_err(|e| {
            EngineError::ModelLoad(format!("Failed to allocate acoustic tensors: {}", e))
        })?;

        // The class count is whatever the output tensor says it is.
        let output_tensor = interpreter.output(0).map_err(|e| {
            EngineError::ModelLoad(format!("Failed to get acoustic output tensor: {}", e))
        })?;
        let class_count = output_tensor.shape().dimensions().iter().product::<usize>();
        if class_count == 0 {
            return Err(EngineError::ModelLoad(
                "acoustic model has an empty output tensor".to_string(),
            ));
        }

        log::info!(
            "Acoustic model loaded: input {} samples, {} classes",
            input_length,
            class_count
        );

        Ok(Self {
            interpreter: Mutex::new(interpreter),
            input_length,
            class_count,
        })
    }

    pub fn input_length(&self) -> usize {
        self.input_length
    }

    pub fn class_count(&self) -> usize {
        self.class_count
    }

    /// Run one inference over a normalized window.
    pub fn predict(&self, window: &[f32]) -> Result<Vec<f32>> {
        if window.len() != self.input_length {
            return Err(EngineError::InvalidInput(format!(
                "Expected {} samples, got {}",
                self.input_length,
                window.len()
            )));
        }

        let interpreter = self
            .interpreter
            .lock()
            .map_err(|e| EngineError::Inference(format!("Failed to lock interpreter: {}", e)))?;

        interpreter
            .copy(window, 0)
            .map_err(|e| EngineError::Inference(format!("Failed to set acoustic input: {}", e)))?;

        interpreter
            .invoke()
            .map_err(|e| EngineError::Inference(format!("Acoustic inference failed: {}", e)))?;

        let output_tensor = interpreter
            .output(0)
            .map_err(|e| EngineError::Inference(format!("Failed to get acoustic output: {}", e)))?;

        Ok(output_tensor.data::<f32>().to_vec())
    }

    /// Run throwaway inferences on silence so first-tick latency is not
    /// paid mid-session.
    pub fn warmup(&self, runs: usize) -> Result<()> {
        let silence = vec![0.0f32; self.input_length];
        for run in 0..runs {
            let started = std::time::Instant::now();
            self.predict(&silence)?;
            log::debug!(
                "warmup run {} took {:.1}ms",
                run + 1,
                started.elapsed().as_secs_f64() * 1000.0
            );
        }
        Ok(())
    }
}
