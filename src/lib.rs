//! ClearVoice Core - real-time single-channel noise suppression engine
//!
//! Processing chain: Mic → capture ring → double-pass denoise → band-limit
//! filters → adaptive VAD gate → spectral clamp → comfort noise → output
//! ring → Speaker/virtual cable

pub mod audio;
pub mod dsp;

// Re-export main types
pub use audio::{AudioEngine, DeviceInfo, EngineConfig, EngineError};
pub use dsp::{AudioMetrics, Biquad, DenoisePipeline, MetricsSnapshot, FRAME_SIZE};
