//! Recognition session: live capture, classification and recording.
//!
//! A session owns exactly one audio source, one recording sink and one
//! classification loop task. Each tick of the loop forwards the newest
//! capture block to the WAV sink, writes it into the ring buffer,
//! normalizes the current window, runs the acoustic model and publishes
//! the selected detections. `start`/`stop` are idempotent and guarded
//! by a single session-level lock so they cannot race.

use crate::audio::{AudioBlock, AudioSource};
use crate::config::SessionOptions;
use crate::error::Result;
use crate::events::SessionEvent;
use crate::fusion::{DetectionSelector, RelevanceVector, ScoreFuser};
use crate::models::InferenceEngine;
use crate::recording::WavRecordingSink;
use crate::ring::{peak_normalize, RingSampleBuffer};
use crate::storage::DurableStorage;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const EVENT_CHANNEL_CAPACITY: usize = 64;

struct ActiveLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct SessionInner {
    source: Box<dyn AudioSource>,
    active: Option<ActiveLoop>,
}

pub struct RecognitionSession {
    options: SessionOptions,
    engine: Arc<dyn InferenceEngine>,
    sink: Arc<WavRecordingSink>,
    events: broadcast::Sender<SessionEvent>,
    inner: Mutex<SessionInner>,
}

impl RecognitionSession {
    pub fn new(
        options: SessionOptions,
        engine: Arc<dyn InferenceEngine>,
        source: Box<dyn AudioSource>,
        storage: Arc<dyn DurableStorage>,
    ) -> Result<Self> {
        options.validate()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let sink = Arc::new(WavRecordingSink::new(options.sample_rate, storage));
        Ok(Self {
            options,
            engine,
            sink,
            events,
            inner: Mutex::new(SessionInner {
                source,
                active: None,
            }),
        })
    }

    /// Subscribe to this session's event stream.
    ///
    /// Events are published without blocking the loop; a subscriber
    /// that falls behind loses the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.active.is_some()
    }

    /// Path of the in-progress recording temp file, if recording.
    pub fn recording_path(&self) -> Option<PathBuf> {
        self.sink.temp_path()
    }

    /// Acquire the audio device, open the recording sink and launch the
    /// classification loop. A no-op when already active; any failure
    /// leaves no partial session behind.
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.active.is_some() {
            log::info!("session already active, start is a no-op");
            return Ok(());
        }

        // Warm the acoustic model so the first real window is not slow.
        if self.options.warmup_runs > 0 {
            let silence = vec![0.0f32; self.engine.input_length()];
            for _ in 0..self.options.warmup_runs {
                self.engine.run_acoustic(&silence)?;
            }
        }

        // Computed once per session, reused for every tick.
        let relevance = self.relevance_vector();

        self.sink.start()?;
        let rx = match inner.source.start().await {
            Ok(rx) => rx,
            Err(e) => {
                self.sink.cancel();
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let classification = ClassificationLoop {
            engine: Arc::clone(&self.engine),
            sink: Arc::clone(&self.sink),
            fuser: ScoreFuser::new(&self.options, relevance),
            selector: DetectionSelector::new(
                self.options.top_k,
                self.options.confidence_threshold,
            ),
            events: self.events.clone(),
            cancel: cancel.clone(),
            recording: true,
        };
        let handle = tokio::spawn(classification.run(rx));

        inner.active = Some(ActiveLoop { cancel, handle });
        log::info!("Recognition session started");
        Ok(())
    }

    /// Stop the session, finalizing the recording when `save` is true
    /// and discarding it otherwise. Returns the stored reference on
    /// save. Idempotent: stopping an idle session is a safe no-op.
    pub async fn stop(&self, save: bool) -> Option<PathBuf> {
        let mut inner = self.inner.lock().await;
        let Some(active) = inner.active.take() else {
            log::debug!("stop called on an idle session, nothing to do");
            return None;
        };

        // Cancel at the next tick boundary, then wait the loop out so
        // no append can land after finalize/cancel begins.
        active.cancel.cancel();
        inner.source.stop().await;
        if let Err(e) = active.handle.await {
            log::error!("classification loop task failed: {}", e);
        }

        let stored = if save {
            self.sink.finalize()
        } else {
            self.sink.cancel();
            None
        };
        let _ = self.events.send(SessionEvent::Finished);
        log::info!("Recognition session stopped (save: {})", save);
        stored
    }

    fn relevance_vector(&self) -> Option<RelevanceVector> {
        if !self.options.location_known() {
            log::info!("location unknown, relevance filter disabled");
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
}

/// The per-tick streaming loop. Owns the ring buffer; everything else
/// is shared with the session that spawned it.
struct ClassificationLoop {
    engine: Arc<dyn InferenceEngine>,
    sink: Arc<WavRecordingSink>,
    fuser: ScoreFuser,
    selector: DetectionSelector,
    events: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
    recording: bool,
}

impl ClassificationLoop {
    async fn run(mut self, mut rx: mpsc::Receiver<AudioBlock>) {
        let mut ring = RingSampleBuffer::new(self.engine.input_length());
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                block = rx.recv() => match block {
                    Some(block) => self.tick(&mut ring, &block),
                    None => break,
                },
            }
        }
        log::debug!("classification loop exited");
    }

    fn tick(&mut self, ring: &mut RingSampleBuffer, block: &AudioBlock) {
        // Raw samples reach the sink unmodified; normalization only
        // happens on the classification copy.
        if self.recording {
            if let Err(e) = self.sink.append(&block.samples) {
                log::error!("recording aborted: {}", e);
                self.recording = false;
                let _ = self.events.send(SessionEvent::RecordingAborted);
            }
        }

        ring.write(&block.samples);
        let window = peak_normalize(&ring.window());

        let raw = match self.engine.run_acoustic(&window) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("inference failed, no detection this window: {}", e);
                return;
            }
        };

        let fused = self.fuser.fuse(&raw);
        let detections = self.selector.select(&fused, None);
        if !detections.is_empty() {
            let _ = self.events.send(SessionEvent::Detections(detections));
        }
    }
}
