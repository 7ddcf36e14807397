//! IQ demodulation: preamble detection, adaptive noise floor, and PPM bit
//! recovery with a confidence (uncertain-bit) gate.
//!
//! Magnitude is computed via a LUT over the raw byte pair, the noise floor
//! is tracked with an exponential moving average over windowed low-percentile
//! samples, and the preamble gate applies six ratio checks against that
//! adaptive threshold before a candidate frame is demodulated bit-by-bit.

use crate::magnitude::{compute_magnitude_vector, MagnitudeLut};

/// Fixed sample rate the whole pipeline assumes: 1 bit spans 2 samples.
pub const SAMPLE_RATE_HZ: f64 = 2_000_000.0;
const PREAMBLE_SAMPLES: usize = 16;
const SHORT_MSG_BITS: usize = 56;
const LONG_MSG_BITS: usize = 112;
const SHORT_MSG_SAMPLES: usize = SHORT_MSG_BITS * 2;
const LONG_MSG_SAMPLES: usize = LONG_MSG_BITS * 2;
/// Minimum overlap chunked callers must maintain between successive
/// magnitude buffers so a preamble straddling a chunk boundary isn't missed.
pub const DETECTION_WINDOW: usize = PREAMBLE_SAMPLES + LONG_MSG_SAMPLES;

const LONG_FORM_DF: &[u8] = &[16, 17, 18, 19, 20, 21];
const SHORT_FORM_DF: &[u8] = &[0, 4, 5, 11];

/// A candidate hex frame recovered from the magnitude stream, before any
/// CRC validation or DF classification.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RawFrame {
    pub hex: String,
    pub timestamp: f64,
    pub signal_level: Option<f64>,
    pub source: String,
}

/// The demodulator's own tunables, split out of [`crate::config::PipelineConfig`]
/// so `check_preamble`/`recover_bits`/`scan` take one small bundle instead of
/// five scalar arguments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemodConfig {
    pub preamble_ratio: f64,
    pub snr_signal_factor: f64,
    pub snr_noise_factor: f64,
    pub bit_delta_threshold: f64,
    pub max_uncertain_ratio: f64,
}

impl Default for DemodConfig {
    fn default() -> Self {
        Self {
            preamble_ratio: 2.0,
            snr_signal_factor: 2.0,
            snr_noise_factor: 3.0,
            bit_delta_threshold: 0.15,
            max_uncertain_ratio: 0.20,
        }
    }
}

impl From<&crate::config::PipelineConfig> for DemodConfig {
    fn from(cfg: &crate::config::PipelineConfig) -> Self {
        Self {
            preamble_ratio: cfg.preamble_ratio,
            snr_signal_factor: cfg.snr_signal_factor,
            snr_noise_factor: cfg.snr_noise_factor,
            bit_delta_threshold: cfg.bit_delta_threshold,
            max_uncertain_ratio: cfg.max_uncertain_ratio,
        }
    }
}

/// Exponential moving average of the 25th-percentile local noise estimate.
/// Owned per-pipeline, with an explicit `reset()` since this state must
/// never be shared across independent pipelines.
pub struct NoiseFloorTracker {
    alpha: f64,
    floor: Option<f64>,
}

impl NoiseFloorTracker {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, floor: None }
    }

    /// Update the floor from one magnitude chunk. No-op for chunks under
    /// 100 samples, per spec.
    pub fn update(&mut self, magnitude: &[u32]) {
        if magnitude.len() < 100 {
            return;
        }
        let len = magnitude.len();
        let window = 16usize;
        let windows = 64usize;
        let stride = if len > window {
            (len - window) as f64 / (windows - 1) as f64
        } else {
            0.0
        };

        let mut medians = Vec::with_capacity(windows);
        for w in 0..windows {
            let start = ((w as f64) * stride).round() as usize;
            let start = start.min(len - window);
            let mut chunk: Vec<u32> = magnitude[start..start + window].to_vec();
            chunk.sort_unstable();
            medians.push(chunk[window / 2] as f64);
        }
        medians.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let idx = ((medians.len() as f64) * 0.25) as usize;
        let estimate = medians[idx.min(medians.len() - 1)];

        self.floor = Some(match self.floor {
            Some(prev) => prev * (1.0 - self.alpha) + estimate * self.alpha,
            None => estimate,
        });
    }

    pub fn floor(&self) -> f64 {
        self.floor.unwrap_or(0.0)
    }

    pub fn adaptive_threshold(&self, absolute_minimum_level: f64) -> f64 {
        (self.floor() * 3.0).max(absolute_minimum_level)
    }

    /// Test-isolation hook, mirrors the ICAO cache's `reset()`.
    pub fn reset(&mut self) {
        self.floor = None;
    }
}

impl Default for NoiseFloorTracker {
    fn default() -> Self {
        Self::new(0.05)
    }
}

fn mean(vals: &[f64]) -> f64 {
    vals.iter().sum::<f64>() / vals.len() as f64
}

/// Check the six-part preamble gate at sample index `p`. Returns the pulse
/// average (used as signal level) on success.
fn check_preamble(m: &[u32], p: usize, threshold: f64, cfg: &DemodConfig) -> Option<f64> {
    if p + PREAMBLE_SAMPLES > m.len() {
        return None;
    }
    let pulse_idx = [0usize, 2, 7, 9];
    let gap_idx = [1usize, 3, 4, 5, 6, 8];
    let quiet_idx = [10usize, 11, 12, 13, 14, 15];

    let pulses: Vec<f64> = pulse_idx.iter().map(|&i| m[p + i] as f64).collect();
    let gaps: Vec<f64> = gap_idx.iter().map(|&i| m[p + i] as f64).collect();

    let pulse_avg = mean(&pulses);
    let gap_avg = mean(&gaps);

    // 1. Average pulse magnitude >= adaptive threshold.
    if pulse_avg < threshold {
        return None;
    }
    // 2. Pulse-average / gap-average >= preamble_ratio.
    if gap_avg > 0.0 && pulse_avg / gap_avg < cfg.preamble_ratio {
        return None;
    }
    // 3. max(pulse) <= 6 * min(pulse).
    let pulse_max = pulses.iter().cloned().fold(f64::MIN, f64::max);
    let pulse_min = pulses.iter().cloned().fold(f64::MAX, f64::min).max(1.0);
    if pulse_max > 6.0 * pulse_min {
        return None;
    }
    // 4. Strict ordering: each pulse exceeds its immediately adjacent gaps.
    if !(m[p] as f64 > m[p + 1] as f64
        && m[p + 2] as f64 > m[p + 1] as f64
        && m[p + 2] as f64 > m[p + 3] as f64
        && m[p + 7] as f64 > m[p + 6] as f64
        && m[p + 7] as f64 > m[p + 8] as f64
        && m[p + 9] as f64 > m[p + 8] as f64)
    {
        return None;
    }
    // 5. Quiet zone samples < 2/3 of pulse average.
    let quiet_limit = pulse_avg * 2.0 / 3.0;
    if quiet_idx.iter().any(|&i| m[p + i] as f64 >= quiet_limit) {
        return None;
    }
    // 6. SNR gate: snr_signal_factor * pulse_avg >= snr_noise_factor * gap_avg.
    if cfg.snr_signal_factor * pulse_avg < cfg.snr_noise_factor * gap_avg {
        return None;
    }

    Some(pulse_avg)
}

/// Recover `n` bits starting at magnitude index `start`, PPM with
/// carry-forward on low-confidence ties. Returns the bits and how many were
/// judged uncertain.
fn recover_bits(m: &[u32], start: usize, n: usize, cfg: &DemodConfig) -> (Vec<u8>, usize) {
    let mut bits = Vec::with_capacity(n);
    let mut uncertain = 0usize;
    for i in 0..n {
        let idx = start + i * 2;
        let high = m[idx] as f64;
        let low = m[idx + 1] as f64;
        let maxv = high.max(low);
        let bit = if maxv == 0.0 || (high - low).abs() / maxv < cfg.bit_delta_threshold {
            uncertain += 1;
            if i > 0 { bits[i - 1] } else { 0 }
        } else if high > low {
            1
        } else {
            0
        };
        bits.push(bit);
    }
    (bits, uncertain)
}

fn bits_to_hex(bits: &[u8]) -> String {
    let mut hex = String::with_capacity(bits.len() / 4);
    for nibble in bits.chunks(4) {
        let v = nibble.iter().fold(0u8, |acc, &b| (acc << 1) | b);
        hex.push(std::char::from_digit(v as u32, 16).unwrap().to_ascii_uppercase());
    }
    hex
}

fn df_from_bits(bits: &[u8]) -> u8 {
    bits[0..5].iter().fold(0u8, |acc, &b| (acc << 1) | b)
}

/// Walk `magnitude` one sample at a time, emitting every recovered frame
/// whose uncertain-bit ratio stays at or below `cfg.max_uncertain_ratio`.
/// `base_time` is the reception time of `magnitude[0]`.
pub fn scan(
    magnitude: &[u32],
    base_time: f64,
    threshold: f64,
    source: &str,
    cfg: &DemodConfig,
) -> Vec<RawFrame> {
    let mut frames = Vec::new();
    let mlen = magnitude.len();
    if mlen < DETECTION_WINDOW {
        return frames;
    }

    let mut j = 0;
    while j + DETECTION_WINDOW <= mlen {
        let Some(pulse_avg) = check_preamble(magnitude, j, threshold, cfg) else {
            j += 1;
            continue;
        };
        let data_start = j + PREAMBLE_SAMPLES;

        if data_start + LONG_MSG_SAMPLES <= mlen {
            let (bits, uncertain) = recover_bits(magnitude, data_start, LONG_MSG_BITS, cfg);
            let df = df_from_bits(&bits);
            if LONG_FORM_DF.contains(&df)
                && (uncertain as f64 / LONG_MSG_BITS as f64) <= cfg.max_uncertain_ratio
            {
                frames.push(RawFrame {
                    hex: bits_to_hex(&bits),
                    timestamp: base_time + j as f64 / SAMPLE_RATE_HZ,
                    signal_level: Some(pulse_avg),
                    source: source.to_string(),
                });
                j = data_start + LONG_MSG_SAMPLES;
                continue;
            }
        }

        if data_start + SHORT_MSG_SAMPLES <= mlen {
            let (bits, uncertain) = recover_bits(magnitude, data_start, SHORT_MSG_BITS, cfg);
            let df = df_from_bits(&bits);
            if SHORT_FORM_DF.contains(&df)
                && (uncertain as f64 / SHORT_MSG_BITS as f64) <= cfg.max_uncertain_ratio
            {
                frames.push(RawFrame {
                    hex: bits_to_hex(&bits),
                    timestamp: base_time + j as f64 / SAMPLE_RATE_HZ,
                    signal_level: Some(pulse_avg),
                    source: source.to_string(),
                });
                j = data_start + SHORT_MSG_SAMPLES;
                continue;
            }
        }

        j += 1;
    }

    frames
}

/// Per-pipeline demodulator state: the magnitude LUT plus the owned noise
/// floor tracker. `feed` is the streaming entry point a capture collaborator
/// drives chunk by chunk; chunks must overlap by >= [`DETECTION_WINDOW`]
/// samples so a preamble spanning a chunk boundary is never missed.
pub struct DemodulatorState {
    pub mag_lut: MagnitudeLut,
    pub noise: NoiseFloorTracker,
    pub absolute_minimum_level: f64,
    pub cfg: DemodConfig,
}

impl DemodulatorState {
    pub fn new(absolute_minimum_level: f64) -> Self {
        Self {
            mag_lut: MagnitudeLut::new(),
            noise: NoiseFloorTracker::default(),
            absolute_minimum_level,
            cfg: DemodConfig::default(),
        }
    }

    /// Build from the full pipeline configuration, wiring through every
    /// demodulator tunable (noise-floor alpha, preamble ratio, SNR factors,
    /// bit-delta threshold, max-uncertain ratio) instead of leaving them at
    /// their defaults regardless of `config`.
    pub fn from_config(config: &crate::config::PipelineConfig) -> Self {
        Self {
            mag_lut: MagnitudeLut::new(),
            noise: NoiseFloorTracker::new(config.noise_floor_alpha),
            absolute_minimum_level: config.absolute_minimum_level,
            cfg: DemodConfig::from(config),
        }
    }

    /// Demodulate one chunk of interleaved IQ bytes into candidate frames.
    pub fn feed(&mut self, iq: &[u8], base_time: f64, source: &str) -> Vec<RawFrame> {
        let magnitude = compute_magnitude_vector(iq, &self.mag_lut);
        self.noise.update(&magnitude);
        let threshold = self.noise.adaptive_threshold(self.absolute_minimum_level);
        scan(&magnitude, base_time, threshold, source, &self.cfg)
    }

    pub fn reset(&mut self) {
        self.noise.reset();
    }
}
