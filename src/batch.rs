//! Batch classification of pre-recorded WAV files.
//!
//! Parses the canonical 44-byte header, partitions the PCM payload into
//! fixed-duration chunks and runs the same normalize/infer/fuse/select
//! path as live capture, tagging every detection with its chunk index
//! and reporting read progress along the way.

use crate::config::SessionOptions;
use crate::error::{EngineError, Result};
use crate::events::{DetectionEvent, SessionEvent};
use crate::fusion::{DetectionSelector, RelevanceVector, ScoreFuser};
use crate::models::InferenceEngine;
use crate::recording::WAV_HEADER_LEN;
use crate::ring::peak_normalize;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::broadcast;

/// File read granularity in bytes.
const READ_BLOCK: usize = 8192;

/// Fields recovered from a canonical PCM WAV header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavHeader {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub data_size: u32,
}

/// Parse the first 44 bytes of a WAV file.
///
/// Fails fast with `MalformedWav` when the header is short, carries the
/// wrong magic values or describes anything other than 16-bit PCM.
pub fn parse_wav_header(bytes: &[u8]) -> Result<WavHeader> {
    if bytes.len() < WAV_HEADER_LEN {
        return Err(EngineError::MalformedWav(format!(
            "header is {} bytes, need {}",
            bytes.len(),
            WAV_HEADER_LEN
        )));
    }
    if &bytes[0..4] != b"RIFF" {
        return Err(EngineError::MalformedWav("missing RIFF magic".to_string()));
    }
    if &bytes[8..12] != b"WAVE" {
        return Err(EngineError::MalformedWav("missing WAVE magic".to_string()));
    }
    if &bytes[12..16] != b"fmt " {
        return Err(EngineError::MalformedWav("missing fmt subchunk".to_string()));
    }
    if &bytes[36..40] != b"data" {
        return Err(EngineError::MalformedWav("missing data subchunk".to_string()));
    }

    let format_tag = u16::from_le_bytes([bytes[20], bytes[21]]);
    if format_tag != 1 {
        return Err(EngineError::MalformedWav(format!(
            "unsupported format tag {format_tag}, only PCM is supported"
        )));
    }
    let bits_per_sample = u16::from_le_bytes([bytes[34], bytes[35]]);
    if bits_per_sample != 16 {
        return Err(EngineError::MalformedWav(format!(
            "unsupported bit depth {bits_per_sample}, only 16-bit is supported"
        )));
    }

    Ok(WavHeader {
        sample_rate: u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]),
        channels: u16::from_le_bytes([bytes[22], bytes[23]]),
        bits_per_sample,
        data_size: u32::from_le_bytes([bytes[40], bytes[41], bytes[42], bytes[43]]),
    })
}

/// Classifies a pre-recorded WAV file chunk by chunk.
pub struct ChunkedFileClassifier {
    options: SessionOptions,
    engine: Arc<dyn InferenceEngine>,
    events: broadcast::Sender<SessionEvent>,
}

impl ChunkedFileClassifier {
    pub fn new(
        options: SessionOptions,
        engine: Arc<dyn InferenceEngine>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            engine,
            events,
        })
    }

    /// Classify a whole file, emitting detection and progress events as
    /// it reads. Returns every detection in chunk order.
    pub async fn classify(&self, path: &Path) -> Result<Vec<DetectionEvent>> {
        let mut file = tokio::fs::File::open(path).await.map_err(|e| {
            EngineError::MalformedWav(format!("cannot open {}: {e}", path.display()))
        })?;
        let total_bytes = file
            .metadata()
            .await
            .map(|m| m.len())
            .unwrap_or(0)
            .max(WAV_HEADER_LEN as u64);

        let mut header_bytes = [0u8; WAV_HEADER_LEN];
        file.read_exact(&mut header_bytes).await.map_err(|_| {
            EngineError::MalformedWav(format!(
                "{} is shorter than a {}-byte WAV header",
                path.display(),
                WAV_HEADER_LEN
            ))
        })?;
        let header = parse_wav_header(&header_bytes)?;
        if header.channels != 1 {
            log::warn!(
                "{} has {} channels, samples are processed interleaved",
                path.display(),
                header.channels
            );
        }

        let chunk_size = (header.sample_rate * self.options.chunk_duration_secs) as usize;
        log::info!(
            "Classifying {} ({}Hz, {}s chunks of {} samples)",
            path.display(),
            header.sample_rate,
            self.options.chunk_duration_secs,
            chunk_size
        );

        let fuser = ScoreFuser::new(&self.options, self.relevance_vector());
        let selector = DetectionSelector::new(
            self.options.top_k,
            self.options.confidence_threshold,
        );

        let mut detections = Vec::new();
        let mut pending: Vec<i16> = Vec::with_capacity(chunk_size);
        let mut chunk_index = 0usize;
        let mut bytes_read = WAV_HEADER_LEN as u64;
        let mut read_buf = vec![0u8; READ_BLOCK];
        let mut carry: Option<u8> = None;

        loop {
            let n = file.read(&mut read_buf).await?;
            if n == 0 {
                break;
            }
            bytes_read += n as u64;

            // Decode little-endian i16, carrying a split byte across
            // read boundaries.
            let mut bytes = &read_buf[..n];
            if let Some(low) = carry.take() {
                pending.push(i16::from_le_bytes([low, bytes[0]]));
                bytes = &bytes[1..];
            }
            for pair in bytes.chunks(2) {
                if pair.len() == 2 {
                    pending.push(i16::from_le_bytes([pair[0], pair[1]]));
                } else {
                    carry = Some(pair[0]);
                }
            }

            while pending.len() >= chunk_size {
                let chunk: Vec<i16> = pending.drain(..chunk_size).collect();
                self.process_chunk(&chunk, chunk_index, &fuser, &selector, &mut detections);
                chunk_index += 1;
            }

            self.publish_progress(bytes_read, total_bytes);
        }

        // A trailing partial chunk (or a file shorter than one chunk)
        // is zero-padded and processed exactly once.
        if !pending.is_empty() || chunk_index == 0 {
            pending.resize(chunk_size, 0);
            self.process_chunk(&pending, chunk_index, &fuser, &selector, &mut detections);
            chunk_index += 1;
        }

        self.publish_progress(bytes_read.max(total_bytes), total_bytes);
        log::info!(
            "Classified {} chunks, {} detections",
            chunk_index,
            detections.len()
        );
        Ok(detections)
    }

    fn relevance_vector(&self) -> Option<RelevanceVector> {
        if !(self.options.relevance_in_batch && self.options.location_known()) {
            return None;
        }
        match self.engine.run_relevance(
            self.options.latitude,
            self.options.longitude,
            self.options.week,
        ) {
            Ok(weights) => Some(RelevanceVector::new(weights)),
            Err(e) => {
                log::warn!("relevance model unavailable, skipping filter: {}", e);
                None
            }
        }
    }

    fn process_chunk(
        &self,
        chunk: &[i16],
        chunk_index: usize,
        fuser: &ScoreFuser,
        selector: &DetectionSelector,
        detections: &mut Vec<DetectionEvent>,
    ) {
        let mut window = peak_normalize(chunk);
        // The file's chunk duration and the model's input length only
        // differ when the file was recorded at another rate; pad or
        // truncate to the tensor contract.
        window.resize(self.engine.input_length(), 0.0);

        let raw = match self.engine.run_acoustic(&window) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("inference failed for chunk {}: {}", chunk_index, e);
                return;
            }
        };

        let fused = fuser.fuse(&raw);
        let events = selector.select(&fused, Some(chunk_index));
        if !events.is_empty() {
            let _ = self.events.send(SessionEvent::Detections(events.clone()));
            detections.extend(events);
        }
    }

    fn publish_progress(&self, bytes_read: u64, total_bytes: u64) {
        let percent = if total_bytes == 0 {
            100
        } else {
            ((bytes_read as f64 * 100.0 / total_bytes as f64).round() as u64).clamp(0, 100) as u8
        };
        let _ = self.events.send(SessionEvent::Progress(percent));
    }
}
