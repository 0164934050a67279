//! Shared test doubles: scripted inference engine, scripted audio
//! sources and WAV fixtures.

#![allow(dead_code)]

use async_trait::async_trait;
use avisense::audio::{AudioBlock, AudioSource};
use avisense::error::{EngineError, Result};
use avisense::models::InferenceEngine;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Inference engine returning the same scripted scores on every call.
pub struct MockEngine {
    input_length: usize,
    scores: Vec<f32>,
    relevance: Option<Vec<f32>>,
    acoustic_calls: AtomicUsize,
}

impl MockEngine {
    pub fn new(input_length: usize, scores: Vec<f32>) -> Self {
        Self {
            input_length,
            scores,
            relevance: None,
            acoustic_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_relevance(mut self, relevance: Vec<f32>) -> Self {
        self.relevance = Some(relevance);
        self
    }

    pub fn acoustic_calls(&self) -> usize {
        self.acoustic_calls.load(Ordering::SeqCst)
    }
}

impl InferenceEngine for MockEngine {
    fn class_count(&self) -> usize {
        self.scores.len()
    }

    fn input_length(&self) -> usize {
        self.input_length
    }

    fn run_acoustic(&self, window: &[f32]) -> Result<Vec<f32>> {
        if window.len() != self.input_length {
            return Err(EngineError::InvalidInput(format!(
                "expected {} samples, got {}",
                self.input_length,
                window.len()
            )));
        }
        self.acoustic_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.scores.clone())
    }

    fn run_relevance(&self, _latitude: f32, _longitude: f32, _week: i32) -> Result<Vec<f32>> {
        self.relevance
            .clone()
            .ok_or_else(|| EngineError::ModelLoad("no relevance model loaded".to_string()))
    }
}

/// Audio source that plays a fixed script of blocks, then ends the
/// stream.
pub struct ScriptedSource {
    blocks: Vec<Vec<i16>>,
}

impl ScriptedSource {
    pub fn new(blocks: Vec<Vec<i16>>) -> Self {
        Self { blocks }
    }
}

#[async_trait]
impl AudioSource for ScriptedSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioBlock>> {
        let (tx, rx) = mpsc::channel(self.blocks.len().max(1));
        for block in self.blocks.drain(..) {
            tx.send(AudioBlock::new(block))
                .await
                .map_err(|_| EngineError::Audio("scripted receiver dropped".to_string()))?;
        }
        Ok(rx)
    }

    async fn stop(&mut self) {}
}

/// Audio source that never produces a block; the channel stays open
/// until `stop` drops the sender.
pub struct SilentSource {
    tx: Option<mpsc::Sender<AudioBlock>>,
}

impl SilentSource {
    pub fn new() -> Self {
        Self { tx: None }
    }
}

#[async_trait]
impl AudioSource for SilentSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioBlock>> {
        let (tx, rx) = mpsc::channel(1);
        self.tx = Some(tx);
        Ok(rx)
    }

    async fn stop(&mut self) {
        self.tx.take();
    }
}

/// Audio source whose device is unavailable.
pub struct UnavailableSource;

#[async_trait]
impl AudioSource for UnavailableSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioBlock>> {
        Err(EngineError::Audio("no input device".to_string()))
    }

    async fn stop(&mut self) {}
}

/// Write a mono 16-bit PCM WAV file for batch-classification fixtures.
pub fn write_wav(path: &Path, sample_rate: u32, samples: &[i16]) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("create wav fixture");
    for &sample in samples {
        writer.write_sample(sample).expect("write sample");
    }
    writer.finalize().expect("finalize wav fixture");
}
