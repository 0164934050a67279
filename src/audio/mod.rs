pub mod capture;

pub use capture::{CaptureConfig, CpalAudioCapture};

use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A block of raw 16-bit mono PCM samples from the capture source.
#[derive(Debug, Clone)]
pub struct AudioBlock {
    pub samples: Vec<i16>,
}

impl AudioBlock {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration of this block at the given sample rate.
    pub fn duration_ms(&self, sample_rate: u32) -> f32 {
        (self.samples.len() as f32 / sample_rate as f32) * 1000.0
    }
}

/// Live audio capture collaborator.
///
/// `start` acquires the device and returns the receiving end of the
/// block stream; dropping the sender side (on `stop`) ends the stream,
/// which the classification loop observes as end-of-input.
#[async_trait]
pub trait AudioSource: Send {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioBlock>>;
    async fn stop(&mut self);
}
