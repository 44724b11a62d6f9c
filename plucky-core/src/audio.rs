//! # Audio Capture Module
//!
//! Real-time microphone capture through CPAL. Capture is hidden behind the
//! [`InputBackend`] / [`InputStream`] pair so the capture session can be
//! exercised without hardware.
//!
//! ## Features
//! - Device enumeration with labels and default flag
//! - Exact-device or default-device requests
//! - Explicit channel selection, otherwise a mono downmix
//! - Fixed-size frames streamed over a crossbeam channel

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, SupportedStreamConfigRange};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::AudioError;

/// Samples per analysis frame (~46 ms at 44.1 kHz).
pub const BUFFER_SIZE: usize = 2048;

/// Preferred capture rate.
pub const TARGET_SAMPLE_RATE: u32 = 44100;

/// User-facing input settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioInputConfig {
    pub selected_device_id: Option<String>,
    /// Zero-based channel to read; `None` downmixes all channels.
    pub selected_channel: Option<u16>,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl AudioInputConfig {
    /// The device to ask for first.
    pub fn device_request(&self) -> DeviceRequest {
        match &self.selected_device_id {
            Some(id) if !id.is_empty() => DeviceRequest::Exact(id.clone()),
            _ => DeviceRequest::Default,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceRequest {
    Default,
    Exact(String),
}

/// An enumerable input device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDevice {
    pub id: String,
    pub label: String,
    pub is_default: bool,
}

/// A running capture. Dropping it stops the capture.
pub trait InputStream {
    fn sample_rate(&self) -> u32;
    fn device_name(&self) -> &str;
}

/// Opens capture streams that push [`BUFFER_SIZE`] frames into `sender`.
pub trait InputBackend {
    fn open(
        &mut self,
        request: &DeviceRequest,
        config: &AudioInputConfig,
        sender: Sender<Vec<f32>>,
    ) -> Result<Box<dyn InputStream>, AudioError>;
}

/// Lists input devices on the default host.
pub fn list_input_devices() -> anyhow::Result<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut devices = Vec::new();
    for device in host.input_devices()? {
        let Ok(name) = device.name() else {
            continue;
        };
        devices.push(AudioDevice {
            is_default: default_name.as_deref() == Some(name.as_str()),
            id: name.clone(),
            label: name,
        });
    }
    Ok(devices)
}

/// Splits interleaved samples into mono and chunks them into frames.
#[derive(Debug)]
struct FrameAssembler {
    channels: usize,
    selected_channel: Option<usize>,
    pending: Vec<f32>,
}

impl FrameAssembler {
    fn new(channels: usize, selected_channel: Option<usize>) -> Self {
        Self {
            channels: channels.max(1),
            selected_channel,
            pending: Vec::with_capacity(BUFFER_SIZE * 2),
        }
    }

    fn push(&mut self, data: &[f32], mut emit: impl FnMut(Vec<f32>)) {
        for frame in data.chunks(self.channels) {
            let sample = match self.selected_channel {
                Some(ch) => frame.get(ch).copied().unwrap_or(0.0),
                None => frame.iter().sum::<f32>() / frame.len() as f32,
            };
            self.pending.push(sample);
        }
        while self.pending.len() >= BUFFER_SIZE {
            emit(self.pending[..BUFFER_SIZE].to_vec());
            self.pending.drain(..BUFFER_SIZE);
        }
    }
}

/// Finds the best f32 input configuration for the target sample rate.
///
/// # Arguments
/// * `configs` - Supported configurations from the device
/// * `target_rate` - Desired sample rate in Hz
/// * `selected_channel` - Channel that must exist, if any
///
/// # Returns
/// * `Some(config)` - Closest rate; mono preferred when no channel is selected
/// * `None` - No f32 configuration carries the channel
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
    selected_channel: Option<u16>,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .filter(|c| selected_channel.is_none_or(|ch| ch < c.channels()))
        .min_by_key(|c| {
            let min_diff = (c.min_sample_rate().0 as i64 - target_rate as i64).abs();
            let max_diff = (c.max_sample_rate().0 as i64 - target_rate as i64).abs();
            let in_range = c.min_sample_rate().0 <= target_rate && target_rate <= c.max_sample_rate().0;
            let rate_cost = if in_range { 0 } else { min_diff.min(max_diff) };
            let channel_cost = i64::from(selected_channel.is_none() && c.channels() != 1);
            (rate_cost, channel_cost)
        })
}

fn looks_like_permission_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("permission") || lower.contains("denied")
}

fn classify_build_error(device: &str, err: BuildStreamError) -> AudioError {
    match err {
        BuildStreamError::DeviceNotAvailable => AudioError::DeviceUnavailable(device.to_string()),
        BuildStreamError::StreamConfigNotSupported => AudioError::OverConstrained {
            device: device.to_string(),
            message: err.to_string(),
        },
        other => {
            let message = other.to_string();
            if looks_like_permission_error(&message) {
                AudioError::PermissionDenied(message)
            } else {
                AudioError::Stream(message)
            }
        }
    }
}

/// CPAL-backed capture on the default host.
#[derive(Debug, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }

    fn find_device(request: &DeviceRequest) -> Result<cpal::Device, AudioError> {
        let host = cpal::default_host();
        match request {
            DeviceRequest::Default => host.default_input_device().ok_or(AudioError::NoInputDevice),
            DeviceRequest::Exact(id) => {
                let mut devices = host.input_devices().map_err(|e| {
                    let message = e.to_string();
                    if looks_like_permission_error(&message) {
                        AudioError::PermissionDenied(message)
                    } else {
                        AudioError::Stream(message)
                    }
                })?;
                devices
                    .find(|d| d.name().is_ok_and(|name| name == *id))
                    .ok_or_else(|| AudioError::DeviceUnavailable(id.clone()))
            }
        }
    }

    fn log_processing_requests(config: &AudioInputConfig) {
        let requested = [
            ("echo cancellation", config.echo_cancellation),
            ("noise suppression", config.noise_suppression),
            ("auto gain control", config.auto_gain_control),
        ];
        for (name, enabled) in requested {
            if enabled {
                warn!("{} requested but not provided by this audio host; capturing unprocessed input", name);
            }
        }
    }
}

/// A live CPAL capture stream.
pub struct CpalStream {
    stream: cpal::Stream,
    sample_rate: u32,
    device_name: String,
}

impl InputStream for CpalStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        if let Err(e) = self.stream.pause() {
            warn!("Error pausing input stream on '{}': {}", self.device_name, e);
        }
        info!("Closed input stream on '{}'", self.device_name);
    }
}

impl InputBackend for CpalBackend {
    fn open(
        &mut self,
        request: &DeviceRequest,
        config: &AudioInputConfig,
        sender: Sender<Vec<f32>>,
    ) -> Result<Box<dyn InputStream>, AudioError> {
        let device = Self::find_device(request)?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        info!("Using audio input device: {}", device_name);

        let configs = device
            .supported_input_configs()
            .map_err(|e| match e {
                cpal::SupportedStreamConfigsError::DeviceNotAvailable => {
                    AudioError::DeviceUnavailable(device_name.clone())
                }
                other => AudioError::Stream(other.to_string()),
            })?
            .collect::<Vec<_>>();

        let supported = find_supported_config(configs, TARGET_SAMPLE_RATE, config.selected_channel)
            .ok_or_else(|| AudioError::OverConstrained {
                device: device_name.clone(),
                message: match config.selected_channel {
                    Some(ch) => format!("no f32 input format with channel {}", ch),
                    None => "no f32 input format".to_string(),
                },
            })?;

        let rate = TARGET_SAMPLE_RATE.clamp(supported.min_sample_rate().0, supported.max_sample_rate().0);
        let supported = supported.with_sample_rate(cpal::SampleRate(rate));
        let sample_rate = supported.sample_rate().0;
        let stream_config: cpal::StreamConfig = supported.into();
        debug!(
            "Selected {} Hz, {} channel(s), channel select {:?}",
            sample_rate, stream_config.channels, config.selected_channel
        );
        Self::log_processing_requests(config);

        let mut assembler = FrameAssembler::new(
            stream_config.channels as usize,
            config.selected_channel.map(usize::from),
        );
        let err_fn = |err| error!("An error occurred on the input stream: {}", err);

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // A full channel means the consumer is behind; drop the frame.
                    assembler.push(data, |frame| {
                        let _ = sender.try_send(frame);
                    });
                },
                err_fn,
                None,
            )
            .map_err(|e| classify_build_error(&device_name, e))?;

        stream.play().map_err(|e| AudioError::Stream(e.to_string()))?;
        info!("Opened input stream on '{}' at {} Hz", device_name, sample_rate);

        Ok(Box::new(CpalStream {
            stream,
            sample_rate,
            device_name,
        }))
    }
}
