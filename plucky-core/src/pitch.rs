//! # Pitch Detection Module
//!
//! Autocorrelation-style pitch estimation for plucked and struck strings.
//! The estimator is a seam ([`PitchEstimator`]) so capture sessions can be
//! driven by canned readings in tests.
//!
//! ## Features
//! - YIN difference function with cumulative mean normalization
//! - Absolute threshold plus descent to the local minimum (octave-error guard)
//! - Parabolic interpolation for sub-sample accuracy
//! - Optional refinement against a smoothed magnitude spectrum

use crate::fft::{DEFAULT_SMOOTHING, SpectrumAnalyzer};

/// Minimum RMS for a frame to be analysed at all.
pub const AMPLITUDE_THRESHOLD: f32 = 0.01;

/// Dips of the normalized difference below this value are candidate periods.
const YIN_THRESHOLD: f32 = 0.15;

/// Largest relative correction accepted from spectrum refinement (~17 cents).
const MAX_REFINEMENT: f32 = 0.01;

/// A raw estimator output: frequency in Hz and a clarity in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchReading {
    pub frequency: f32,
    pub clarity: f32,
}

/// Turns one time-domain frame into a pitch reading.
pub trait PitchEstimator {
    /// `None` when the frame holds no periodic signal (silence, noise).
    fn estimate(&mut self, signal: &[f32], sample_rate: u32) -> Option<PitchReading>;

    /// Adjusts the estimator's internal smoothing while it is running.
    fn set_smoothing(&mut self, smoothing: f32);
}

/// Runs YIN on `signal`.
///
/// # Arguments
/// * `signal` - Input audio frame
/// * `sample_rate` - Sample rate in Hz
/// * `amplitude_threshold` - Minimum RMS for detection
///
/// # Returns
/// * `Some(reading)` - Best period found, with clarity `1 - d'(tau)`
/// * `None` - Silence or a frame too short to hold a period
pub fn detect_pitch_yin(
    signal: &[f32],
    sample_rate: u32,
    amplitude_threshold: f32,
) -> Option<PitchReading> {
    let frame_size = signal.len();
    let half = frame_size / 2;
    if half < 4 {
        return None;
    }

    // Noise gate
    let rms = (signal.iter().map(|&s| s * s).sum::<f32>() / frame_size as f32).sqrt();
    if rms < amplitude_threshold {
        return None;
    }

    // Difference function
    let mut yin_buffer = vec![0.0_f32; half];
    for tau in 1..half {
        let mut diff = 0.0;
        for i in 0..half {
            let delta = signal[i] - signal[i + tau];
            diff += delta * delta;
        }
        yin_buffer[tau] = diff;
    }

    // Cumulative mean normalized difference
    let mut running_sum = 0.0;
    yin_buffer[0] = 1.0;
    for tau in 1..half {
        running_sum += yin_buffer[tau];
        if running_sum != 0.0 {
            yin_buffer[tau] *= tau as f32 / running_sum;
        } else {
            yin_buffer[tau] = 1.0;
        }
    }

    // First dip under the threshold, followed down to its minimum; failing
    // that, the global minimum (its clarity will be low).
    let period = match (2..half).find(|&tau| yin_buffer[tau] < YIN_THRESHOLD) {
        Some(mut tau) => {
            while tau + 1 < half && yin_buffer[tau + 1] < yin_buffer[tau] {
                tau += 1;
            }
            tau
        }
        None => (2..half).min_by(|&a, &b| yin_buffer[a].total_cmp(&yin_buffer[b]))?,
    };

    if period + 1 >= half {
        return None;
    }

    // Parabolic interpolation
    let y1 = yin_buffer[period - 1];
    let y2 = yin_buffer[period];
    let y3 = yin_buffer[period + 1];
    let curvature = y1 - 2.0 * y2 + y3;
    let period_float = if curvature != 0.0 {
        period as f32 + (y1 - y3) / (2.0 * curvature)
    } else {
        period as f32
    };

    let frequency = sample_rate as f32 / period_float;
    let clarity = (1.0 - y2).clamp(0.0, 1.0);
    (frequency.is_finite() && frequency > 20.0).then_some(PitchReading { frequency, clarity })
}

/// Refines a frequency estimate using a magnitude spectrum.
///
/// Finds the strongest bin within two bins of `rough_freq` and interpolates
/// the log magnitudes around it.
///
/// # Returns
/// * `Some(refined_freq)` - Refined estimate
/// * `None` - No usable peak near the estimate
pub fn refine_from_spectrum(
    spectrum_magnitudes: &[f32],
    rough_freq: f32,
    sample_rate: u32,
) -> Option<f32> {
    if rough_freq <= 0.0 || spectrum_magnitudes.len() < 3 {
        return None;
    }
    let buffer_size = spectrum_magnitudes.len() * 2;
    let last_bin = spectrum_magnitudes.len() - 1;
    let target_bin = rough_freq * buffer_size as f32 / sample_rate as f32;
    let search_radius = 2.0;
    let start_bin = (target_bin - search_radius).max(0.0) as usize;
    let end_bin = ((target_bin + search_radius).min(last_bin as f32) as usize).min(last_bin);
    if start_bin >= end_bin {
        return None;
    }

    let (offset, _) = spectrum_magnitudes[start_bin..=end_bin]
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))?;
    let peak_bin = start_bin + offset;
    if peak_bin == 0 || peak_bin >= last_bin {
        return None;
    }

    let y1 = spectrum_magnitudes[peak_bin - 1].ln();
    let y2 = spectrum_magnitudes[peak_bin].ln();
    let y3 = spectrum_magnitudes[peak_bin + 1].ln();
    if !y1.is_finite() || !y2.is_finite() || !y3.is_finite() {
        return None;
    }
    // Must be a real local maximum, not the edge of the search range.
    if y2 < y1 || y2 < y3 {
        return None;
    }

    let denominator = 2.0 * y2 - y1 - y3;
    if denominator.abs() < 1e-6 {
        return None;
    }
    let interpolated_bin = peak_bin as f32 + (y3 - y1) / (2.0 * denominator);
    let refined = interpolated_bin * sample_rate as f32 / buffer_size as f32;
    (refined.is_finite() && refined > 0.0).then_some(refined)
}

/// YIN estimator with spectrum refinement.
#[derive(Debug)]
pub struct YinEstimator {
    amplitude_threshold: f32,
    spectrum: SpectrumAnalyzer,
}

impl Default for YinEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING)
    }
}

impl YinEstimator {
    pub fn new(smoothing: f32) -> Self {
        Self {
            amplitude_threshold: AMPLITUDE_THRESHOLD,
            spectrum: SpectrumAnalyzer::new(smoothing),
        }
    }
}

impl PitchEstimator for YinEstimator {
    fn estimate(&mut self, signal: &[f32], sample_rate: u32) -> Option<PitchReading> {
        let Some(mut reading) = detect_pitch_yin(signal, sample_rate, self.amplitude_threshold) else {
            // Silence should not bleed into the next note's spectrum.
            self.spectrum.reset();
            return None;
        };

        let magnitudes = self.spectrum.magnitudes(signal);
        if let Some(refined) = refine_from_spectrum(magnitudes, reading.frequency, sample_rate) {
            if ((refined - reading.frequency) / reading.frequency).abs() < MAX_REFINEMENT {
                reading.frequency = refined;
            }
        }
        Some(reading)
    }

    fn set_smoothing(&mut self, smoothing: f32) {
        self.spectrum.set_smoothing(smoothing);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_yin_on_pure_tones() {
        for freq in [82.41_f32, 110.0, 220.0, 329.63, 659.25] {
            let reading = detect_pitch_yin(&sine(freq, 44100, 2048, 0.5), 44100, AMPLITUDE_THRESHOLD).unwrap();
            assert!((reading.frequency - freq).abs() < freq * 0.01, "{freq}: {reading:?}");
            assert!(reading.clarity > 0.9, "{freq}: {reading:?}");
        }
    }

    #[test]
    fn test_silence_is_rejected() {
        assert!(detect_pitch_yin(&vec![0.0; 2048], 44100, AMPLITUDE_THRESHOLD).is_none());
        assert!(detect_pitch_yin(&sine(220.0, 44100, 2048, 0.001), 44100, AMPLITUDE_THRESHOLD).is_none());
        assert!(detect_pitch_yin(&[0.5, -0.5], 44100, AMPLITUDE_THRESHOLD).is_none());
    }

    #[test]
    fn test_noise_has_low_clarity() {
        // Deterministic pseudo-noise (xorshift).
        let mut state: u32 = 0x1234_5678;
        let noise: Vec<f32> = (0..2048)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state as f32 / u32::MAX as f32) - 0.5
            })
            .collect();
        if let Some(reading) = detect_pitch_yin(&noise, 44100, AMPLITUDE_THRESHOLD) {
            assert!(reading.clarity < 0.9, "{reading:?}");
        }
    }

    #[test]
    fn test_estimator_refines_within_tolerance() {
        let mut estimator = YinEstimator::default();
        let frame = sine(220.0, 44100, 2048, 0.5);
        let reading = estimator.estimate(&frame, 44100).unwrap();
        assert!((reading.frequency - 220.0).abs() < 3.0, "{reading:?}");
        assert!(reading.clarity > 0.9);

        estimator.set_smoothing(0.0);
        let again = estimator.estimate(&frame, 44100).unwrap();
        assert!((again.frequency - 220.0).abs() < 3.0);
    }
}
