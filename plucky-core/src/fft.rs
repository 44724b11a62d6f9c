//! # Spectrum Analyzer
//!
//! Magnitude spectra for pitch refinement, with exponential smoothing across
//! frames. The smoothing factor follows the usual analyser convention: `0.0`
//! keeps only the current frame, values close to `1.0` average over many.
//!
//! ## Features
//! - RustFFT planner reused across frames of any length
//! - Hann windowing and DC offset removal
//! - Per-bin exponential smoothing, reset when the frame length changes

use std::sync::Arc;

use rustfft::{Fft, FftPlanner, Length, num_complex::Complex};

pub const DEFAULT_SMOOTHING: f32 = 0.8;

/// Removes the DC offset from a signal by making its average value zero.
fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Applies a Hann window to reduce spectral leakage.
fn apply_hann_window(buffer: &mut [f32]) {
    let n = buffer.len();
    if n < 2 {
        return;
    }
    let n_minus_1 = (n - 1) as f32;
    for (i, sample) in buffer.iter_mut().enumerate() {
        let multiplier = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos());
        *sample *= multiplier;
    }
}

/// Magnitudes up to the Nyquist bin.
pub fn spectrum_to_magnitudes(spectrum: &[Complex<f32>]) -> Vec<f32> {
    spectrum
        .iter()
        .take(spectrum.len() / 2)
        .map(|c| c.norm())
        .collect()
}

/// Reusable FFT front end holding the smoothed magnitude state.
pub struct SpectrumAnalyzer {
    planner: FftPlanner<f32>,
    plan: Option<Arc<dyn Fft<f32>>>,
    smoothing: f32,
    smoothed: Vec<f32>,
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("len", &self.plan.as_ref().map(|p| p.len()))
            .field("smoothing", &self.smoothing)
            .finish()
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING)
    }
}

impl SpectrumAnalyzer {
    pub fn new(smoothing: f32) -> Self {
        Self {
            planner: FftPlanner::new(),
            plan: None,
            smoothing: smoothing.clamp(0.0, 0.99),
            smoothed: Vec::new(),
        }
    }

    pub fn smoothing(&self) -> f32 {
        self.smoothing
    }

    /// Takes effect on the next frame; accumulated state is kept.
    pub fn set_smoothing(&mut self, smoothing: f32) {
        self.smoothing = smoothing.clamp(0.0, 0.99);
    }

    /// Forward FFT of a DC-removed, Hann-windowed copy of `signal`.
    pub fn transform(&mut self, signal: &[f32]) -> Vec<Complex<f32>> {
        let len = signal.len();
        let plan = match &self.plan {
            Some(plan) if plan.len() == len => Arc::clone(plan),
            _ => {
                let plan = self.planner.plan_fft_forward(len);
                self.plan = Some(Arc::clone(&plan));
                plan
            }
        };

        let mut processed = signal.to_vec();
        remove_dc_offset(&mut processed);
        apply_hann_window(&mut processed);

        let mut buffer: Vec<Complex<f32>> = processed
            .into_iter()
            .map(|sample| Complex { re: sample, im: 0.0 })
            .collect();
        plan.process(&mut buffer);
        buffer
    }

    /// Smoothed magnitude spectrum of `signal`. Empty input yields an empty
    /// spectrum.
    pub fn magnitudes(&mut self, signal: &[f32]) -> &[f32] {
        if signal.is_empty() {
            self.smoothed.clear();
            return &self.smoothed;
        }
        let current = spectrum_to_magnitudes(&self.transform(signal));
        if self.smoothed.len() != current.len() {
            self.smoothed = current;
        } else {
            let k = self.smoothing;
            for (acc, value) in self.smoothed.iter_mut().zip(current) {
                *acc = k * *acc + (1.0 - k) * value;
            }
        }
        &self.smoothed
    }

    pub fn reset(&mut self) {
        self.smoothed.clear();
    }
}
