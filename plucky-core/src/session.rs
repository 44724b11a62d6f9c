//! # Audio Session
//!
//! Owns the single live capture stream and turns its frames into quantized
//! notes. `start` and `stop` are the only lifecycle operations:
//! - `start` tears down any previous stream before opening a new one, so two
//!   captures are never live at once;
//! - a request for a specific device that is gone or cannot be configured is
//!   retried once on the default device, and the caller gets a one-shot
//!   [`Notice`] instead of an error;
//! - `poll` after `stop` is a no-op.
//!
//! Nothing here returns an error to the caller. Failures land in
//! [`SessionStatus::error`].

use std::panic::{self, AssertUnwindSafe};

use crossbeam_channel::{Receiver, TryRecvError};
use tracing::{debug, error, info, warn};

use crate::audio::{AudioInputConfig, CpalBackend, DeviceRequest, InputBackend, InputStream};
use crate::error::AudioError;
use crate::pitch::{PitchEstimator, YinEstimator};
use crate::quantize::{DetectionGate, QuantizedNote};

/// Frames buffered between the capture callback and the polling loop.
const FRAME_QUEUE: usize = 8;

/// One-shot message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The requested device failed; capture runs on the default device.
    FellBackToDefault { requested: String },
    /// Microphone access was refused; starting again may succeed once the
    /// user grants access.
    PermissionDenied(String),
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub is_listening: bool,
    pub fell_back_to_default: bool,
    pub device_name: Option<String>,
    pub sample_rate: Option<u32>,
    pub error: Option<String>,
}

struct Capture {
    // Dropped before `frames` so the callback never outlives its receiver.
    stream: Box<dyn InputStream>,
    frames: Receiver<Vec<f32>>,
}

pub struct AudioSession<B = CpalBackend, E = YinEstimator> {
    backend: B,
    estimator: E,
    gate: DetectionGate,
    capture: Option<Capture>,
    status: SessionStatus,
    notice: Option<Notice>,
    last_detection: Option<QuantizedNote>,
}

impl AudioSession {
    /// A session on the CPAL default host with the YIN estimator.
    pub fn with_defaults() -> Self {
        Self::new(CpalBackend::new(), YinEstimator::default())
    }
}

impl<B: InputBackend, E: PitchEstimator> AudioSession<B, E> {
    pub fn new(backend: B, estimator: E) -> Self {
        Self {
            backend,
            estimator,
            gate: DetectionGate::default(),
            capture: None,
            status: SessionStatus::default(),
            notice: None,
            last_detection: None,
        }
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn is_listening(&self) -> bool {
        self.capture.is_some()
    }

    /// Takes the pending notice, if any. Each notice is delivered once.
    pub fn take_notice(&mut self) -> Option<Notice> {
        self.notice.take()
    }

    pub fn gate(&self) -> DetectionGate {
        self.gate
    }

    /// Applies from the next frame on; the stream keeps running.
    pub fn set_min_clarity(&mut self, min_clarity: f32) {
        self.gate.min_clarity = min_clarity.clamp(0.0, 1.0);
    }

    pub fn set_smoothing(&mut self, smoothing: f32) {
        self.estimator.set_smoothing(smoothing);
    }

    /// Starts capturing with `config`. Returns whether capture is live.
    pub fn start(&mut self, config: &AudioInputConfig) -> bool {
        self.stop();
        self.status = SessionStatus::default();

        let request = config.device_request();
        let opened = match self.open(&request, config) {
            Err(err) if err.allows_default_fallback() && request != DeviceRequest::Default => {
                warn!("Input device request failed ({}); retrying on the default device", err);
                let retried = self.open(&DeviceRequest::Default, config);
                if retried.is_ok() {
                    self.status.fell_back_to_default = true;
                    if let DeviceRequest::Exact(requested) = request {
                        self.notice = Some(Notice::FellBackToDefault { requested });
                    }
                }
                retried
            }
            other => other,
        };

        match opened {
            Ok(capture) => {
                self.status.is_listening = true;
                self.status.device_name = Some(capture.stream.device_name().to_string());
                self.status.sample_rate = Some(capture.stream.sample_rate());
                info!(
                    "Listening on '{}' ({} Hz)",
                    capture.stream.device_name(),
                    capture.stream.sample_rate()
                );
                self.capture = Some(capture);
                true
            }
            Err(err) => {
                error!("Could not start audio input: {}", err);
                self.notice = Some(match &err {
                    AudioError::PermissionDenied(message) => Notice::PermissionDenied(message.clone()),
                    other => Notice::Failed(other.to_string()),
                });
                self.status.error = Some(err.to_string());
                false
            }
        }
    }

    fn open(&mut self, request: &DeviceRequest, config: &AudioInputConfig) -> Result<Capture, AudioError> {
        let (sender, frames) = crossbeam_channel::bounded(FRAME_QUEUE);
        let stream = self.backend.open(request, config, sender)?;
        Ok(Capture { stream, frames })
    }

    /// Releases the capture stream. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(capture) = self.capture.take() {
            info!("Stopping capture on '{}'", capture.stream.device_name());
            drop(capture);
        }
        self.status.is_listening = false;
        self.last_detection = None;
    }

    /// Runs analysis on the newest captured frame and returns the note it
    /// holds, if any. Without a new frame the previous detection is
    /// repeated, like re-reading a live analyser.
    pub fn poll(&mut self) -> Option<QuantizedNote> {
        let capture = self.capture.as_ref()?;

        let mut newest = None;
        let disconnected = loop {
            match capture.frames.try_recv() {
                Ok(frame) => newest = Some(frame),
                Err(TryRecvError::Empty) => break false,
                Err(TryRecvError::Disconnected) => break true,
            }
        };
        let sample_rate = capture.stream.sample_rate();

        if let Some(frame) = newest {
            let estimator = &mut self.estimator;
            let analysed = panic::catch_unwind(AssertUnwindSafe(|| estimator.estimate(&frame, sample_rate)));
            match analysed {
                Ok(reading) => {
                    self.last_detection =
                        reading.and_then(|r| self.gate.quantize(r.frequency, r.clarity));
                    if let Some(note) = &self.last_detection {
                        debug!("Detected {} ({:+} cents)", note.pitch, note.cent_offset);
                    }
                }
                Err(_) => {
                    error!("Pitch analysis panicked; releasing the input stream");
                    self.fail("Pitch analysis failed".to_string());
                    return None;
                }
            }
        } else if disconnected {
            warn!("Input stream closed unexpectedly");
            self.fail("Input stream closed".to_string());
            return None;
        }

        self.last_detection
    }

    fn fail(&mut self, message: String) {
        self.stop();
        self.notice = Some(Notice::Failed(message.clone()));
        self.status.error = Some(message);
    }
}

impl<B, E> Drop for AudioSession<B, E> {
    fn drop(&mut self) {
        if self.capture.take().is_some() {
            debug!("Audio session dropped while listening; input released");
        }
    }
}
