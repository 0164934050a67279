use crate::error::{EngineError, Result};
use chrono::{Datelike, Utc};
use std::env;
use std::path::PathBuf;

/// Sentinel coordinate meaning "location unknown".
///
/// When both latitude and longitude carry this value the relevance
/// filter is skipped entirely and detections surface on acoustic
/// evidence alone.
pub const LOCATION_UNKNOWN: f32 = -1.0;

/// Immutable per-session options.
///
/// Created once when a session (live or batch) is set up and read-only
/// afterwards, so it can be shared across tasks without locking.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Number of samples the acoustic model consumes per window.
    pub model_input_length: usize,
    /// Capture/input sample rate in Hz.
    pub sample_rate: u32,
    /// Minimum fused confidence for a detection to be published.
    pub confidence_threshold: f32,
    /// Maximum number of detections published per window or chunk.
    pub top_k: usize,
    /// Sigmoid steepness; the default of -1.0 reproduces the standard
    /// logistic sigmoid.
    pub sensitivity: f32,
    /// Offset added to raw scores before the sigmoid transform.
    pub bias_offset: f32,
    /// Recording latitude, or `LOCATION_UNKNOWN`.
    pub latitude: f32,
    /// Recording longitude, or `LOCATION_UNKNOWN`.
    pub longitude: f32,
    /// Week of year (1-53) fed to the relevance model.
    pub week: i32,
    /// Number of throwaway inferences run at session start.
    pub warmup_runs: usize,
    /// Chunk duration for batch (file) classification, in seconds.
    pub chunk_duration_secs: u32,
    /// Whether batch classification applies the location relevance
    /// filter the same way live classification does.
    pub relevance_in_batch: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            model_input_length: 144_000, // 3s at 48kHz
            sample_rate: 48_000,
            confidence_threshold: 0.5,
            top_k: 3,
            sensitivity: -1.0,
            bias_offset: 0.0,
            latitude: LOCATION_UNKNOWN,
            longitude: LOCATION_UNKNOWN,
            week: -1,
            warmup_runs: 3,
            chunk_duration_secs: 3,
            relevance_in_batch: true,
        }
    }
}

impl SessionOptions {
    /// Returns true when both coordinates are set to something other
    /// than the unknown sentinel.
    pub fn location_known(&self) -> bool {
        self.latitude != LOCATION_UNKNOWN && self.longitude != LOCATION_UNKNOWN
    }

    /// Validate option combinations that would make a session unusable.
    pub fn validate(&self) -> Result<()> {
        if self.model_input_length == 0 {
            return Err(EngineError::Config(
                "model_input_length must be non-zero".to_string(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(EngineError::Config("sample_rate must be non-zero".to_string()));
        }
        if self.top_k == 0 {
            return Err(EngineError::Config("top_k must be at least 1".to_string()));
        }
        if self.chunk_duration_secs == 0 {
            return Err(EngineError::Config(
                "chunk_duration_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Week of year (1-53) for the current date, as fed to the relevance model.
pub fn current_week() -> i32 {
    (Utc::now().ordinal0() / 7 + 1) as i32
}

/// Binary-level configuration loaded from the environment.
///
/// Model and asset locations live in environment variables (with `.env`
/// support for development) so deployments can relocate them without a
/// rebuild.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub acoustic_model_path: PathBuf,
    pub relevance_model_path: Option<PathBuf>,
    pub labels_path: PathBuf,
    pub recordings_dir: PathBuf,
    pub latitude: f32,
    pub longitude: f32,
    pub confidence_threshold: f32,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        let acoustic_model_path = env::var("AVISENSE_ACOUSTIC_MODEL")
            .unwrap_or_else(|_| "models/acoustic.tflite".to_string())
            .into();
        let relevance_model_path = env::var("AVISENSE_RELEVANCE_MODEL").ok().map(PathBuf::from);
        let labels_path = env::var("AVISENSE_LABELS")
            .unwrap_or_else(|_| "models/labels.json".to_string())
            .into();
        let recordings_dir = env::var("AVISENSE_RECORDINGS_DIR")
            .unwrap_or_else(|_| "recordings".to_string())
            .into();

        let latitude = Self::parse_coord("AVISENSE_LATITUDE")?;
        let longitude = Self::parse_coord("AVISENSE_LONGITUDE")?;
        let confidence_threshold = match env::var("AVISENSE_CONFIDENCE") {
            Ok(raw) => raw.parse::<f32>().map_err(|_| {
                EngineError::Config(format!("AVISENSE_CONFIDENCE is not a number: {raw}"))
            })?,
            Err(_) => SessionOptions::default().confidence_threshold,
        };

        Ok(Self {
            acoustic_model_path,
            relevance_model_path,
            labels_path,
            recordings_dir,
            latitude,
            longitude,
            confidence_threshold,
        })
    }

    fn parse_coord(var: &str) -> Result<f32> {
        match env::var(var) {
            Ok(raw) => raw
                .parse::<f32>()
                .map_err(|_| EngineError::Config(format!("{var} is not a number: {raw}"))),
            Err(_) => Ok(LOCATION_UNKNOWN),
        }
    }

    /// Session options derived from this configuration.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            latitude: self.latitude,
            longitude: self.longitude,
            week: current_week(),
            confidence_threshold: self.confidence_threshold,
            ..Default::default()
        }
    }
}

/// Load configuration with helpful error messages for development.
pub fn load_config() -> Result<EngineConfig> {
    match EngineConfig::load() {
        Ok(config) => {
            log::info!(
                "Loaded configuration (acoustic model: {})",
                config.acoustic_model_path.display()
            );
            Ok(config)
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            log::error!("Model locations are read from AVISENSE_ACOUSTIC_MODEL,");
            log::error!("AVISENSE_RELEVANCE_MODEL and AVISENSE_LABELS (a .env file works too)");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_valid() {
        let options = SessionOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.model_input_length, 144_000);
        assert_eq!(options.sample_rate, 48_000);
        assert_eq!(options.sensitivity, -1.0);
        assert!(!options.location_known());
    }

    #[test]
    fn location_known_requires_both_coordinates() {
        let mut options = SessionOptions::default();
        options.latitude = 59.3;
        assert!(!options.location_known());

        options.longitude = 18.1;
        assert!(options.location_known());
    }

    #[test]
    fn invalid_options_are_rejected() {
        let mut options = SessionOptions::default();
        options.top_k = 0;
        assert!(options.validate().is_err());

        let mut options = SessionOptions::default();
        options.model_input_length = 0;
        assert!(options.validate().is_err());
    }

    #[test]
    fn current_week_is_in_range() {
        let week = current_week();
        assert!((1..=53).contains(&week));
    }
}
