//! CPAL-backed live audio capture.
//!
//! CPAL streams are not `Send`, so the stream lives on a dedicated
//! capture thread that forwards fixed-size sample blocks over a bounded
//! channel. Device acquisition happens on that thread too; `start`
//! waits for the outcome so device errors fail the session up front.

use crate::audio::{AudioBlock, AudioSource};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, FromSample, Sample, SampleFormat, SizedSample, Stream as CpalStream,
};
use std::time::Duration;
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 32;
const DEVICE_TIMEOUT: Duration = Duration::from_secs(5);

/// Capture configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Device name to capture from (None = default input device).
    pub device_id: Option<String>,
    /// Channel to capture (0-based index).
    pub channel: u32,
    /// Required capture sample rate in Hz.
    pub sample_rate: u32,
    /// Samples per forwarded block.
    pub block_size: usize,
    /// Platform hint: ask the device for noise suppression.
    pub noise_suppression: bool,
    /// Platform hint: ask the device for automatic gain control.
    pub auto_gain: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            channel: 0,
            sample_rate: 48_000,
            block_size: 2048,
            noise_suppression: false,
            auto_gain: false,
        }
    }
}

/// Audio device information for the device listing.
#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub channel_count: u32,
}

struct CaptureWorker {
    stop_tx: std::sync::mpsc::Sender<()>,
    handle: std::thread::JoinHandle<()>,
}

/// Live audio source implementation using CPAL.
pub struct CpalAudioCapture {
    config: CaptureConfig,
    worker: Option<CaptureWorker>,
}

impl CpalAudioCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            worker: None,
        }
    }

    pub fn list_devices() -> Result<Vec<AudioDeviceInfo>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| EngineError::Audio(e.to_string()))?;
        let default_name = host
            .default_input_device()
            .and_then(|d| d.name().ok());

        let mut result = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                let channel_count = device
                    .default_input_config()
                    .map(|c| u32::from(c.channels()))
                    .unwrap_or(0);
                result.push(AudioDeviceInfo {
                    is_default: default_name.as_deref() == Some(name.as_str()),
                    name,
                    channel_count,
                });
            }
        }
        Ok(result)
    }
}

#[async_trait]
impl AudioSource for CpalAudioCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioBlock>> {
        if self.worker.is_some() {
            return Err(EngineError::Audio("capture already running".to_string()));
        }

        let (block_tx, block_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = std::sync::mpsc::channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let config = self.config.clone();
        let handle = std::thread::spawn(move || capture_thread(config, block_tx, stop_rx, ready_tx));

        match ready_rx.recv_timeout(DEVICE_TIMEOUT) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                return Err(EngineError::Audio(
                    "timed out waiting for audio device".to_string(),
                ));
            }
        }

        self.worker = Some(CaptureWorker { stop_tx, handle });
        log::info!("Audio capture started");
        Ok(block_rx)
    }

    async fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            if worker.handle.join().is_err() {
                log::error!("capture thread panicked during shutdown");
            }
            log::info!("Audio capture stopped");
        }
    }
}

impl Drop for CpalAudioCapture {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            let _ = worker.handle.join();
        }
    }
}

/// Owns the CPAL stream for its whole lifetime; exits when told to stop.
fn capture_thread(
    config: CaptureConfig,
    block_tx: mpsc::Sender<AudioBlock>,
    stop_rx: std::sync::mpsc::Receiver<()>,
    ready_tx: std::sync::mpsc::Sender<Result<()>>,
) {
    let stream = match build_capture_stream(&config, block_tx) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(EngineError::Audio(e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    // Block until stop; the stream keeps running on its own callbacks.
    let _ = stop_rx.recv();
    drop(stream);
    log::debug!("capture thread exiting");
}

fn build_capture_stream(
    config: &CaptureConfig,
    block_tx: mpsc::Sender<AudioBlock>,
) -> Result<CpalStream> {
    let host = cpal::default_host();

    let device = if let Some(id) = &config.device_id {
        host.input_devices()
            .map_err(|e| EngineError::Audio(e.to_string()))?
            .find(|d| d.name().map(|n| n == *id).unwrap_or(false))
            .ok_or_else(|| EngineError::Audio(format!("Device not found: {}", id)))?
    } else {
        host.default_input_device()
            .ok_or_else(|| EngineError::Audio("No default input device found".to_string()))?
    };

    let supported_configs: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| EngineError::Audio(e.to_string()))?
        .collect();

    // Prefer a config with native support for the required rate.
    let mut supported_config = None;
    for candidate in &supported_configs {
        if candidate.min_sample_rate().0 <= config.sample_rate
            && candidate.max_sample_rate().0 >= config.sample_rate
        {
            supported_config =
                Some(candidate.clone().with_sample_rate(cpal::SampleRate(config.sample_rate)));
            log::info!(
                "Found config with native {}Hz support: {:?}",
                config.sample_rate,
                candidate.sample_format()
            );
            break;
        }
    }

    let supported_config = match supported_config {
        Some(c) => c,
        None => {
            let default = device
                .default_input_config()
                .map_err(|e| EngineError::Audio(e.to_string()))?;
            log::info!(
                "No native {}Hz config, using default: {:?} @ {}Hz",
                config.sample_rate,
                default.sample_format(),
                default.sample_rate().0
            );
            default
        }
    };

    if config.channel >= u32::from(supported_config.channels()) {
        return Err(EngineError::Audio(format!(
            "Selected channel {} is not available (device has {} channels)",
            config.channel,
            supported_config.channels()
        )));
    }

    let stream_config = cpal::StreamConfig {
        channels: supported_config.channels(),
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    if config.noise_suppression || config.auto_gain {
        // Effect toggles are platform hints; CPAL has no portable knob
        // for them, so they are only surfaced in the log.
        log::info!(
            "Capture effect hints: noise_suppression={}, auto_gain={}",
            config.noise_suppression,
            config.auto_gain
        );
    }

    log::info!(
        "Audio capture configured: {} channels @ {}Hz (format: {:?})",
        stream_config.channels,
        config.sample_rate,
        supported_config.sample_format()
    );

    let err_fn = move |err| {
        log::error!("Audio stream error: {}", err);
    };

    match supported_config.sample_format() {
        SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, block_tx, config, err_fn),
        SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, block_tx, config, err_fn),
        SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, block_tx, config, err_fn),
        _ => Err(EngineError::Audio("Unsupported sample format".to_string())),
    }
}

fn build_stream<T>(
    device: &Device,
    stream_config: &cpal::StreamConfig,
    block_tx: mpsc::Sender<AudioBlock>,
    config: &CaptureConfig,
    err_fn: impl FnMut(cpal::StreamError) + Send + 'static,
) -> Result<CpalStream>
where
    T: Sample + SizedSample + Send + Sync + 'static,
    i16: FromSample<T>,
{
    let block_size = config.block_size;
    let channel = config.channel as usize;
    let channels = stream_config.channels as usize;
    let mut buffer = Vec::with_capacity(block_size);

    device
        .build_input_stream(
            stream_config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // Extract the selected channel and convert to i16.
                for frame in data.chunks(channels) {
                    if let Some(sample) = frame.get(channel) {
                        buffer.push(i16::from_sample(*sample));
                        if buffer.len() >= block_size {
                            let block = AudioBlock::new(std::mem::replace(
                                &mut buffer,
                                Vec::with_capacity(block_size),
                            ));
                            if block_tx.try_send(block).is_err() {
                                log::warn!("capture consumer lagging, dropping a block");
                            }
                        }
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| EngineError::Audio(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_config_default() {
        let config = CaptureConfig::default();
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.block_size, 2048);
        assert_eq!(config.channel, 0);
        assert!(config.device_id.is_none());
        assert!(!config.noise_suppression);
        assert!(!config.auto_gain);
    }
}
