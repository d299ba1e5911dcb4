//! Digital signal processing components

pub mod biquad;
pub mod denoiser;
pub mod metrics;

pub use biquad::Biquad;
pub use denoiser::{DenoisePipeline, FRAME_SIZE};
pub use metrics::{AudioMetrics, MetricsSnapshot};
