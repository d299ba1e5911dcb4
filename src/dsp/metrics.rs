//! Per-frame engine metrics published as lock-free atomics
//!
//! Written by the processing worker once per frame with relaxed stores;
//! read from any thread with relaxed loads. Fields are independent
//! scalars: a reader may observe a mix of old and new values across one
//! frame boundary, which is the accepted contract for metering.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Real-time metrics block. f32 values are stored as raw bits in
/// `AtomicU32` (`to_bits`/`from_bits`).
pub struct AudioMetrics {
    input_rms: AtomicU32,
    output_rms: AtomicU32,
    vad_probability: AtomicU32,
    gate_gain: AtomicU32,
    noise_floor: AtomicU32,
    frames_processed: AtomicU64,
}

/// Plain-value copy of the metrics block, for UI polling.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MetricsSnapshot {
    pub input_rms: f32,
    pub output_rms: f32,
    pub vad_probability: f32,
    pub gate_gain: f32,
    pub noise_floor: f32,
    pub frames_processed: u64,
}

impl AudioMetrics {
    pub fn new() -> Self {
        Self {
            input_rms: AtomicU32::new(0.0_f32.to_bits()),
            output_rms: AtomicU32::new(0.0_f32.to_bits()),
            vad_probability: AtomicU32::new(0.0_f32.to_bits()),
            gate_gain: AtomicU32::new(1.0_f32.to_bits()),
            noise_floor: AtomicU32::new(0.0_f32.to_bits()),
            frames_processed: AtomicU64::new(0),
        }
    }

    /// Reset all fields to their start-of-run values.
    pub fn reset(&self) {
        self.input_rms.store(0.0_f32.to_bits(), Ordering::Relaxed);
        self.output_rms.store(0.0_f32.to_bits(), Ordering::Relaxed);
        self.vad_probability
            .store(0.0_f32.to_bits(), Ordering::Relaxed);
        self.gate_gain.store(1.0_f32.to_bits(), Ordering::Relaxed);
        self.noise_floor.store(0.0_f32.to_bits(), Ordering::Relaxed);
        self.frames_processed.store(0, Ordering::Relaxed);
    }

    pub fn input_rms(&self) -> f32 {
        f32::from_bits(self.input_rms.load(Ordering::Relaxed))
    }

    pub fn output_rms(&self) -> f32 {
        f32::from_bits(self.output_rms.load(Ordering::Relaxed))
    }

    pub fn vad_probability(&self) -> f32 {
        f32::from_bits(self.vad_probability.load(Ordering::Relaxed))
    }

    pub fn gate_gain(&self) -> f32 {
        f32::from_bits(self.gate_gain.load(Ordering::Relaxed))
    }

    pub fn noise_floor(&self) -> f32 {
        f32::from_bits(self.noise_floor.load(Ordering::Relaxed))
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    /// Copy all fields into a plain value.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            input_rms: self.input_rms(),
            output_rms: self.output_rms(),
            vad_probability: self.vad_probability(),
            gate_gain: self.gate_gain(),
            noise_floor: self.noise_floor(),
            frames_processed: self.frames_processed(),
        }
    }

    pub(crate) fn set_input_rms(&self, value: f32) {
        self.input_rms.store(value.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn set_output_rms(&self, value: f32) {
        self.output_rms.store(value.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn set_vad_probability(&self, value: f32) {
        self.vad_probability
            .store(value.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn set_gate_gain(&self, value: f32) {
        self.gate_gain.store(value.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn set_noise_floor(&self, value: f32) {
        self.noise_floor.store(value.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn increment_frames(&self) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for AudioMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_snapshot() {
        let metrics = AudioMetrics::new();
        let snap = metrics.snapshot();
        assert_eq!(snap.input_rms, 0.0);
        assert_eq!(snap.output_rms, 0.0);
        assert_eq!(snap.vad_probability, 0.0);
        assert_eq!(snap.gate_gain, 1.0);
        assert_eq!(snap.noise_floor, 0.0);
        assert_eq!(snap.frames_processed, 0);
    }

    #[test]
    fn test_store_load_roundtrip() {
        let metrics = AudioMetrics::new();
        metrics.set_input_rms(0.25);
        metrics.set_output_rms(0.125);
        metrics.set_vad_probability(0.9);
        metrics.set_gate_gain(0.5);
        metrics.set_noise_floor(0.0003);
        metrics.increment_frames();
        metrics.increment_frames();

        let snap = metrics.snapshot();
        assert_eq!(snap.input_rms, 0.25);
        assert_eq!(snap.output_rms, 0.125);
        assert_eq!(snap.vad_probability, 0.9);
        assert_eq!(snap.gate_gain, 0.5);
        assert_eq!(snap.noise_floor, 0.0003);
        assert_eq!(snap.frames_processed, 2);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let metrics = AudioMetrics::new();
        metrics.set_gate_gain(0.1);
        metrics.increment_frames();
        metrics.reset();
        assert_eq!(metrics.gate_gain(), 1.0);
        assert_eq!(metrics.frames_processed(), 0);
    }
}
