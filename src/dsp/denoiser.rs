//! Per-frame noise suppression chain
//!
//! Runs on the processing worker only. Each 480-sample frame goes through
//! a double RNNoise pass, band-limit filtering, an adaptive VAD gate with
//! hysteresis and hold, a spectral clamp during confident silence, and
//! comfort-noise injection when the gate is closed.
//!
//! Real-time rules: `process_frame` performs no allocation (fixed scratch
//! arrays, pure arithmetic); tunables are lock-free atomics read once per
//! frame; all other state is worker-private.

use nnnoiseless::DenoiseState;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use super::biquad::Biquad;
use super::metrics::AudioMetrics;

/// Frame size dictated by the RNNoise kernel (10 ms at 48 kHz).
pub const FRAME_SIZE: usize = 480;

/// Scaling into the i16-range floats RNNoise expects.
const PCM_SCALE: f32 = 32767.0;

/// Gate attack coefficient (closing). ~15 ms at the 10 ms frame rate.
const GATE_CLOSE_COEFF: f32 = 0.40;

/// Gate release coefficient (opening). ~60 ms; voice fades in without
/// clipped word onsets.
const GATE_OPEN_COEFF: f32 = 0.15;

/// Frames the gate stays open after speech ends (150 ms).
const HOLD_FRAMES: u32 = 15;

/// VAD band below the threshold where strong frame energy still counts
/// as speech (quiet or breathy voice).
const VAD_HYSTERESIS: f32 = 0.12;

/// Contributing frames of fast noise-floor learning (~2 s).
const CALIBRATION_FRAMES: u32 = 200;

/// EMA alpha during calibration.
const CALIBRATION_ALPHA: f32 = 0.08;

/// EMA alpha once calibrated.
const TRACKING_ALPHA: f32 = 0.005;

/// Gate threshold sits this far above the learned floor.
const FLOOR_MULTIPLIER: f32 = 1.5;

/// Absolute minimum noise-floor estimate (~-70 dBFS). A silent room must
/// not collapse the floor to zero.
const ABS_MIN_FLOOR: f32 = 0.0003;

/// Gate threshold before the floor has calibrated.
const FALLBACK_THRESHOLD: f32 = 0.002;

/// Samples below `noise_floor * this` are zeroed during confident silence.
const CLAMP_MULTIPLIER: f32 = 2.0;

/// Spectral clamp only runs when the smoothed gain is below this.
const CLAMP_GAIN_THRESHOLD: f32 = 0.3;

/// Comfort-noise level (~-60 dBFS RMS).
const COMFORT_LEVEL: f32 = 0.001;

/// Comfort noise only runs when the smoothed gain is below this.
const COMFORT_GAIN_THRESHOLD: f32 = 0.1;

/// One-pole lowpass coefficient shaping the comfort-noise spectrum.
const NOISE_SHAPE_COEFF: f32 = 0.7;

/// Fixed LFSR seed: identical call histories produce identical noise.
const LFSR_SEED: u32 = 0x1234_5678;

const HPF_CUTOFF_HZ: f64 = 80.0;
const LPF_CUTOFF_HZ: f64 = 8000.0;
const BUTTERWORTH_Q: f64 = std::f64::consts::FRAC_1_SQRT_2;
const SAMPLE_RATE: f64 = 48000.0;

/// The per-frame DSP chain.
///
/// Owns two independent RNNoise states (the frame is denoised twice in
/// series), the band-limit biquads, and the gate/floor state. Tunables
/// are shared atomics so the control thread can adjust them while the
/// worker runs.
pub struct DenoisePipeline {
    denoise_a: Box<DenoiseState<'static>>,
    denoise_b: Box<DenoiseState<'static>>,

    /// Wet/dry suppression level [0, 1], f32 bits. 0 bypasses the chain.
    suppression_level: Arc<AtomicU32>,
    /// VAD gate threshold [0, 1], f32 bits.
    vad_threshold: Arc<AtomicU32>,
    comfort_noise: Arc<AtomicBool>,

    metrics: Arc<AudioMetrics>,

    /// Smoothed gate gain. Worker-only, not synchronized.
    smooth_gain: f32,
    /// Frames of gate hold remaining after speech.
    hold_frames: u32,
    /// Learned resting-room RMS. Worker-only.
    noise_floor: f32,
    /// Contributing frames seen by the floor tracker.
    calibration_count: u32,

    hpf: Biquad,
    lpf: Biquad,

    /// Xorshift32 state for comfort noise.
    lfsr: u32,
    /// One-pole shaping memory for comfort noise.
    shape_state: f32,

    dry: [f32; FRAME_SIZE],
    scratch: [f32; FRAME_SIZE],
}

impl DenoisePipeline {
    pub fn new(
        suppression_level: Arc<AtomicU32>,
        vad_threshold: Arc<AtomicU32>,
        comfort_noise: Arc<AtomicBool>,
        metrics: Arc<AudioMetrics>,
    ) -> Self {
        Self {
            denoise_a: DenoiseState::new(),
            denoise_b: DenoiseState::new(),
            suppression_level,
            vad_threshold,
            comfort_noise,
            metrics,
            smooth_gain: 1.0,
            hold_frames: 0,
            noise_floor: 0.0,
            calibration_count: 0,
            hpf: Biquad::highpass(HPF_CUTOFF_HZ, BUTTERWORTH_Q, SAMPLE_RATE),
            lpf: Biquad::lowpass(LPF_CUTOFF_HZ, BUTTERWORTH_Q, SAMPLE_RATE),
            lfsr: LFSR_SEED,
            shape_state: 0.0,
            dry: [0.0; FRAME_SIZE],
            scratch: [0.0; FRAME_SIZE],
        }
    }

    /// Set the suppression level. Values outside [0, 1] are clamped.
    pub fn set_suppression_level(&self, level: f32) {
        self.suppression_level
            .store(level.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn suppression_level(&self) -> f32 {
        f32::from_bits(self.suppression_level.load(Ordering::Relaxed))
    }

    /// Set the VAD gate threshold. Values outside [0, 1] are clamped.
    pub fn set_vad_threshold(&self, threshold: f32) {
        self.vad_threshold
            .store(threshold.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn vad_threshold(&self) -> f32 {
        f32::from_bits(self.vad_threshold.load(Ordering::Relaxed))
    }

    pub fn set_comfort_noise(&self, enabled: bool) {
        self.comfort_noise.store(enabled, Ordering::Relaxed);
    }

    pub fn comfort_noise_enabled(&self) -> bool {
        self.comfort_noise.load(Ordering::Relaxed)
    }

    pub fn metrics(&self) -> &AudioMetrics {
        &self.metrics
    }

    /// Process one frame in place. Returns the voice-activity probability
    /// reported by the denoiser for this frame.
    pub fn process_frame(&mut self, frame: &mut [f32; FRAME_SIZE]) -> f32 {
        let level = self.suppression_level();

        // Fast path: suppression fully off, passthrough untouched.
        if level <= 0.0 {
            let rms = compute_rms(frame);
            self.metrics.set_input_rms(rms);
            self.metrics.set_output_rms(rms);
            self.metrics.set_vad_probability(0.0);
            self.metrics.set_gate_gain(1.0);
            self.metrics.set_noise_floor(self.noise_floor);
            self.metrics.increment_frames();
            return 0.0;
        }

        let vad_threshold = self.vad_threshold();

        self.metrics.set_input_rms(compute_rms(frame));

        // Keep the dry signal for wet/dry blending.
        self.dry.copy_from_slice(frame);

        for sample in frame.iter_mut() {
            *sample *= PCM_SCALE;
        }

        // Double pass: two independent states in series. The second pass
        // catches residual artifacts the first one missed.
        let vad1 = self.denoise_a.process_frame(&mut self.scratch, &frame[..]);
        let vad2 = self.denoise_b.process_frame(&mut frame[..], &self.scratch);
        let vad = vad1.max(vad2);
        self.metrics.set_vad_probability(vad);

        let inv_scale = 1.0 / PCM_SCALE;
        for sample in frame.iter_mut() {
            *sample *= inv_scale;
        }

        if level < 1.0 {
            let dry_mix = 1.0 - level;
            for (sample, &dry) in frame.iter_mut().zip(self.dry.iter()) {
                *sample = *sample * level + dry * dry_mix;
            }
        }

        // Band-limit: 80 Hz HPF then 8 kHz LPF.
        for sample in frame.iter_mut() {
            *sample = self.lpf.process(self.hpf.process(*sample));
        }

        // Post-filter energy drives the floor tracker and the gate.
        let rms = compute_rms(frame);

        self.update_noise_floor(vad, vad_threshold, rms);

        let target = self.gate_target(vad, vad_threshold, rms);
        self.smooth_toward(target);

        for sample in frame.iter_mut() {
            *sample *= self.smooth_gain;
        }

        self.apply_spectral_clamp(vad, vad_threshold, frame);
        self.apply_comfort_noise(frame);

        self.metrics.set_output_rms(compute_rms(frame));
        self.metrics.increment_frames();

        vad
    }

    /// Track the resting-room energy on non-speech frames.
    ///
    /// Only frames whose VAD is below half the configured threshold
    /// contribute, so speech cannot leak into the estimate. Fast EMA for
    /// the first [`CALIBRATION_FRAMES`] contributions, slow afterwards.
    fn update_noise_floor(&mut self, vad: f32, vad_threshold: f32, rms: f32) {
        if vad < vad_threshold * 0.5 {
            if self.noise_floor == 0.0 {
                self.noise_floor = rms;
            } else {
                let alpha = if self.calibration_count < CALIBRATION_FRAMES {
                    CALIBRATION_ALPHA
                } else {
                    TRACKING_ALPHA
                };
                self.noise_floor += alpha * (rms - self.noise_floor);
            }
            self.calibration_count = self.calibration_count.saturating_add(1);
            self.noise_floor = self.noise_floor.max(ABS_MIN_FLOOR);
        }
        self.metrics.set_noise_floor(self.noise_floor);
    }

    /// Decide the gate's target gain for this frame.
    fn gate_target(&mut self, vad: f32, vad_threshold: f32, rms: f32) -> f32 {
        let threshold = if self.noise_floor > ABS_MIN_FLOOR {
            self.noise_floor * FLOOR_MULTIPLIER
        } else {
            FALLBACK_THRESHOLD
        };

        // Speech: hard VAD hit, or a near-miss VAD backed by frame energy
        // clearly above ambient.
        let speech = vad >= vad_threshold
            || (vad >= vad_threshold - VAD_HYSTERESIS && rms > 2.0 * threshold);

        if speech {
            self.hold_frames = HOLD_FRAMES;
            1.0
        } else if self.hold_frames > 0 {
            self.hold_frames -= 1;
            1.0
        } else if rms < threshold {
            0.0
        } else {
            // Partial gain near the threshold avoids hard on/off chatter.
            ((rms - threshold) / threshold).clamp(0.0, 0.5)
        }
    }

    /// Asymmetric smoothing: closing is fast, opening is slow.
    fn smooth_toward(&mut self, target: f32) {
        let coeff = if target < self.smooth_gain {
            GATE_CLOSE_COEFF
        } else {
            GATE_OPEN_COEFF
        };
        self.smooth_gain += coeff * (target - self.smooth_gain);
        self.smooth_gain = self.smooth_gain.clamp(0.0, 1.0);
        self.metrics.set_gate_gain(self.smooth_gain);
    }

    /// Zero residual hiss while we are confidently silencing.
    ///
    /// Never active during speech or while the gate is opening, so
    /// low-level harmonics survive.
    fn apply_spectral_clamp(
        &mut self,
        vad: f32,
        vad_threshold: f32,
        frame: &mut [f32; FRAME_SIZE],
    ) {
        if vad >= vad_threshold || self.smooth_gain >= CLAMP_GAIN_THRESHOLD {
            return;
        }
        let clamp_threshold = (self.noise_floor * CLAMP_MULTIPLIER).max(3.0 * ABS_MIN_FLOOR);
        for sample in frame.iter_mut() {
            if sample.abs() < clamp_threshold {
                *sample = 0.0;
            }
        }
    }

    /// Add low-level shaped noise while the gate is closed so the channel
    /// never sounds dead.
    fn apply_comfort_noise(&mut self, frame: &mut [f32; FRAME_SIZE]) {
        if !self.comfort_noise.load(Ordering::Relaxed)
            || self.smooth_gain >= COMFORT_GAIN_THRESHOLD
        {
            return;
        }
        let scale = (COMFORT_GAIN_THRESHOLD - self.smooth_gain) / COMFORT_GAIN_THRESHOLD;
        for sample in frame.iter_mut() {
            *sample += self.comfort_noise_sample() * COMFORT_LEVEL * scale;
        }
    }

    /// One sample of spectrally shaped pseudorandom noise.
    fn comfort_noise_sample(&mut self) -> f32 {
        self.lfsr ^= self.lfsr << 13;
        self.lfsr ^= self.lfsr >> 17;
        self.lfsr ^= self.lfsr << 5;
        let white = self.lfsr as i32 as f32 / 2_147_483_648.0;
        self.shape_state =
            NOISE_SHAPE_COEFF * self.shape_state + (1.0 - NOISE_SHAPE_COEFF) * white;
        self.shape_state
    }
}

/// Root-mean-square of a frame.
fn compute_rms(frame: &[f32]) -> f32 {
    let sum: f32 = frame.iter().map(|s| s * s).sum();
    (sum / frame.len() as f32).sqrt()
}
