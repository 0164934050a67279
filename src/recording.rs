//! WAV recording sink.
//!
//! Owns the temp-file handle for the session recording: writes a
//! placeholder canonical PCM header on start, appends little-endian
//! 16-bit samples while recording, then either patches the header and
//! hands the file to durable storage (finalize) or deletes it (cancel).
//!
//! State machine: `Idle -> Recording -> Idle`. All operations are
//! serialized under one per-sink lock; `finalize` and `cancel` are
//! idempotent no-ops when idle and never panic past the caller.

use crate::error::{EngineError, Result};
use crate::storage::DurableStorage;
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use strum::Display;
use tempfile::NamedTempFile;

/// Canonical PCM WAV header length in bytes.
pub const WAV_HEADER_LEN: usize = 44;
const CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;
const BYTES_PER_SAMPLE: u32 = (BITS_PER_SAMPLE / 8) as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
enum SinkState {
    Idle,
    Recording,
}

struct Inner {
    state: SinkState,
    file: Option<NamedTempFile>,
    data_bytes: u32,
}

pub struct WavRecordingSink {
    sample_rate: u32,
    storage: Arc<dyn DurableStorage>,
    inner: Mutex<Inner>,
}

impl WavRecordingSink {
    pub fn new(sample_rate: u32, storage: Arc<dyn DurableStorage>) -> Self {
        Self {
            sample_rate,
            storage,
            inner: Mutex::new(Inner {
                state: SinkState::Idle,
                file: None,
                data_bytes: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock means a panic mid-operation; the state machine
        // is still coherent enough to close or delete the temp file.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_recording(&self) -> bool {
        self.lock().state == SinkState::Recording
    }

    /// Bytes of PCM payload appended so far.
    pub fn data_bytes(&self) -> u32 {
        self.lock().data_bytes
    }

    /// Path of the live temp file, while recording.
    pub fn temp_path(&self) -> Option<PathBuf> {
        self.lock().file.as_ref().map(|f| f.path().to_path_buf())
    }

    /// Open a temp file and write the placeholder header.
    ///
    /// Fails if a recording is already in progress; only one live
    /// handle exists per sink.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state == SinkState::Recording {
            return Err(EngineError::Recording(
                "recording already in progress".to_string(),
            ));
        }

        let mut file = tempfile::Builder::new()
            .prefix("avisense-")
            .suffix(".wav")
            .tempfile()
            .map_err(|e| EngineError::Recording(format!("cannot create temp file: {e}")))?;
        write_wav_header(&mut file, self.sample_rate, 0)
            .map_err(|e| EngineError::Recording(format!("cannot write header: {e}")))?;

        log::info!("Recording started at {}", file.path().display());
        inner.state = SinkState::Recording;
        inner.file = Some(file);
        inner.data_bytes = 0;
        Ok(())
    }

    /// Append samples as little-endian 16-bit PCM.
    ///
    /// A logged no-op when not recording. The first write failure
    /// aborts the recording: the temp file is deleted and the sink
    /// returns to idle rather than keep writing a corrupt stream.
    pub fn append(&self, samples: &[i16]) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != SinkState::Recording {
            log::error!("append called while {}, dropping {} samples", inner.state, samples.len());
            return Ok(());
        }

        let mut bytes = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE as usize);
        for &sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }

        let file = inner.file.as_mut().expect("recording sink has a live file");
        if let Err(e) = file.write_all(&bytes) {
            log::error!("recording write failed, aborting recording: {}", e);
            Self::discard(&mut inner);
            return Err(EngineError::Recording(format!("write failed: {e}")));
        }
        inner.data_bytes += bytes.len() as u32;
        Ok(())
    }

    /// Patch the header, close the stream and hand the file to durable
    /// storage. Returns the stored reference, or `None` on any failure
    /// or when not recording.
    pub fn finalize(&self) -> Option<PathBuf> {
        let mut inner = self.lock();
        if inner.state != SinkState::Recording {
            log::debug!("finalize called while {}, nothing to do", inner.state);
            return None;
        }

        inner.state = SinkState::Idle;
        let mut file = inner.file.take().expect("recording sink has a live file");
        let data_bytes = inner.data_bytes;

        if let Err(e) = patch_wav_header(&mut file, self.sample_rate, data_bytes) {
            log::error!("cannot finalize recording: {}", e);
            if let Err(e) = file.close() {
                log::warn!("cannot remove temp file: {}", e);
            }
            return None;
        }

        let path = match file.keep() {
            Ok((_, path)) => path,
            Err(e) => {
                log::error!("cannot persist temp file: {}", e);
                return None;
            }
        };

        match self.storage.store(&path) {
            Ok(stored) => {
                log::info!("Recording finalized: {} bytes of PCM", data_bytes);
                Some(stored)
            }
            Err(e) => {
                log::error!("durable storage rejected recording: {}", e);
                if let Err(e) = std::fs::remove_file(&path) {
                    log::warn!("cannot remove unsaved recording: {}", e);
                }
                None
            }
        }
    }

    /// Close the stream and delete the temp file without finalizing.
    /// Idempotent no-op when not recording.
    pub fn cancel(&self) {
        let mut inner = self.lock();
        if inner.state != SinkState::Recording {
            log::debug!("cancel called while {}, nothing to do", inner.state);
            return;
        }
        log::info!("Recording cancelled, discarding temp file");
        Self::discard(&mut inner);
    }

    fn discard(inner: &mut Inner) {
        inner.state = SinkState::Idle;
        inner.data_bytes = 0;
        if let Some(file) = inner.file.take() {
            if let Err(e) = file.close() {
                log::warn!("cannot remove temp file: {}", e);
            }
        }
    }
}

/// Write the 44-byte canonical PCM WAV header for mono 16-bit audio.
fn write_wav_header(w: &mut impl Write, sample_rate: u32, data_bytes: u32) -> std::io::Result<()> {
    let byte_rate = sample_rate * CHANNELS as u32 * BYTES_PER_SAMPLE;
    let block_align = CHANNELS * BYTES_PER_SAMPLE as u16;

    w.write_all(b"RIFF")?;
    w.write_all(&(36 + data_bytes).to_le_bytes())?;
    w.write_all(b"WAVE")?;
    w.write_all(b"fmt ")?;
    w.write_all(&16u32.to_le_bytes())?;
    w.write_all(&1u16.to_le_bytes())?; // PCM format tag
    w.write_all(&CHANNELS.to_le_bytes())?;
    w.write_all(&sample_rate.to_le_bytes())?;
    w.write_all(&byte_rate.to_le_bytes())?;
    w.write_all(&block_align.to_le_bytes())?;
    w.write_all(&BITS_PER_SAMPLE.to_le_bytes())?;
    w.write_all(b"data")?;
    w.write_all(&data_bytes.to_le_bytes())?;
    Ok(())
}

/// Seek to offset 0 and rewrite the header with the final sizes.
fn patch_wav_header(
    file: &mut NamedTempFile,
    sample_rate: u32,
    data_bytes: u32,
) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    write_wav_header(file, sample_rate, data_bytes)?;
    file.flush()?;
    file.as_file().sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalDirStorage;

    fn sink_with_storage() -> (WavRecordingSink, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = Arc::new(LocalDirStorage::new(dir.path()).expect("storage"));
        (WavRecordingSink::new(48_000, storage), dir)
    }

    #[test]
    fn test_start_twice_fails() {
        let (sink, _dir) = sink_with_storage();
        sink.start().expect("first start");
        assert!(sink.start().is_err());
        sink.cancel();
    }

    #[test]
    fn test_append_while_idle_is_logged_noop() {
        let (sink, _dir) = sink_with_storage();
        assert!(sink.append(&[1, 2, 3]).is_ok());
        assert_eq!(sink.data_bytes(), 0);
    }

    #[test]
    fn test_append_advances_byte_counter() {
        let (sink, _dir) = sink_with_storage();
        sink.start().expect("start");
        sink.append(&[0; 100]).expect("append");
        sink.append(&[0; 50]).expect("append");
        assert_eq!(sink.data_bytes(), 300);
        sink.cancel();
    }

    #[test]
    fn test_cancel_removes_temp_file_and_is_idempotent() {
        let (sink, _dir) = sink_with_storage();
        sink.start().expect("start");
        let temp = sink.temp_path().expect("live temp file");
        assert!(temp.exists());

        sink.cancel();
        assert!(!temp.exists());
        assert!(!sink.is_recording());

        // Second cancel is a no-op.
        sink.cancel();
    }

    #[test]
    fn test_cancel_before_any_append() {
        let (sink, _dir) = sink_with_storage();
        sink.start().expect("start");
        let temp = sink.temp_path().expect("live temp file");
        sink.cancel();
        assert!(!temp.exists());
    }

    #[test]
    fn test_finalize_while_idle_returns_none() {
        let (sink, _dir) = sink_with_storage();
        assert!(sink.finalize().is_none());
    }

    #[test]
    fn test_finalize_hands_file_to_storage() {
        let (sink, dir) = sink_with_storage();
        sink.start().expect("start");
        sink.append(&[1000, -1000, 500, -500]).expect("append");
        let temp = sink.temp_path().expect("live temp file");

        let stored = sink.finalize().expect("finalized path");
        assert!(stored.starts_with(dir.path()));
        assert!(stored.exists());
        assert!(!temp.exists());
        assert!(!sink.is_recording());

        // Second finalize is a no-op.
        assert!(sink.finalize().is_none());
    }
}
