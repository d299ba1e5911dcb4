//! Audio input/output plumbing: ring buffers, devices, engine lifecycle

pub mod buffer;
pub mod device;
pub mod engine;

pub use buffer::{AudioConsumer, AudioProducer, AudioRingBuffer};
pub use device::{list_input_devices, list_output_devices, DeviceInfo};
pub use engine::{
    AudioEngine, EngineConfig, EngineError, StatusCallback, RING_CAPACITY, TARGET_SAMPLE_RATE,
};
