//! Audio engine: lifecycle, real-time callbacks, processing worker
//!
//! Data flow:
//!   Mic -> capture callback -> capture ring -> worker -> DenoisePipeline
//!       -> output ring -> output callback -> speaker / virtual cable
//!
//! Threading model:
//!   - Control thread: `start()`/`stop()` and tunable setters. May block.
//!   - cpal callback threads: touch only the ring endpoints through
//!     non-blocking `try_lock`; no blocking locks, no syscalls, no
//!     steady-state allocation.
//!   - Worker thread: `cpal::Stream` is not `Send`, so the worker owns
//!     both streams end to end: it opens them, restarts them after device
//!     faults, and drops them on exit. `start()` blocks on the worker's
//!     setup report; `stop()` joins the worker, so no callback is in
//!     flight once either returns.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{
    BufferSize, SampleFormat, SampleRate, Stream, StreamConfig, SupportedStreamConfig,
    SupportedStreamConfigRange,
};
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use thread_priority::{set_current_thread_priority, ThreadPriority};

use super::buffer::{AudioConsumer, AudioProducer, AudioRingBuffer};
use super::device::{self, DeviceInfo};
use crate::dsp::denoiser::{DenoisePipeline, FRAME_SIZE};
use crate::dsp::metrics::AudioMetrics;

/// Engine-internal sample rate. Devices must support it natively; there
/// is no resampling stage.
pub const TARGET_SAMPLE_RATE: u32 = 48000;

/// Ring capacity in samples. ~85 ms at 48 kHz: large enough to absorb
/// scheduling jitter on either thread without blocking a callback, small
/// enough to add no perceptible latency.
pub const RING_CAPACITY: usize = 4096;

const MAX_RESTART_ATTEMPTS: u32 = 5;
const RESTART_BACKOFF_BASE_MS: u64 = 100;

/// Worker idle back-off. A full frame arrives every 10 ms, so this polls
/// roughly 20 times per frame period.
const IDLE_SLEEP: Duration = Duration::from_micros(500);

const DEFAULT_SUPPRESSION_LEVEL: f32 = 1.0;
const DEFAULT_VAD_THRESHOLD: f32 = 0.65;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine already running")]
    AlreadyRunning,

    #[error("device enumeration failed: {0}")]
    Enumerate(String),

    #[error("no input device available")]
    NoInputDevice,

    #[error("no output device available")]
    NoOutputDevice,

    #[error("failed to open capture stream: {0}")]
    OpenCapture(String),

    #[error("failed to open output stream: {0}")]
    OpenOutput(String),

    #[error("failed to start capture stream: {0}")]
    StartCapture(String),

    #[error("failed to start output stream: {0}")]
    StartOutput(String),

    #[error("audio worker exited before streams were ready")]
    WorkerStartup,
}

/// Engine configuration. Defaults match the denoiser's native format.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Input device index; negative selects the host default.
    pub input_device: i32,
    /// Output device index; negative selects the host default.
    pub output_device: i32,
    pub sample_rate: u32,
    /// Frames per device callback. One denoiser frame by default.
    pub frames_per_buffer: u32,
    /// Request a fixed device buffer of `frames_per_buffer` frames for
    /// lowest latency. If the device refuses, the open is retried once
    /// with the host's default buffer size.
    pub low_latency: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            input_device: -1,
            output_device: -1,
            sample_rate: TARGET_SAMPLE_RATE,
            frames_per_buffer: FRAME_SIZE as u32,
            low_latency: true,
        }
    }
}

/// Callback for engine status changes (device fault, restart outcome).
/// Invoked from the worker thread; keep it lightweight.
pub type StatusCallback = Box<dyn Fn(&str) + Send + 'static>;

type SharedStatusCallback = Arc<Mutex<Option<StatusCallback>>>;

/// Real-time noise suppression engine.
///
/// One engine value supports one run at a time: `start` rejects while
/// running. Tunables and metrics stay valid across runs.
pub struct AudioEngine {
    running: Arc<AtomicBool>,
    restart_requested: Arc<AtomicBool>,

    suppression_level: Arc<AtomicU32>,
    vad_threshold: Arc<AtomicU32>,
    comfort_noise: Arc<AtomicBool>,
    metrics: Arc<AudioMetrics>,

    status_callback: SharedStatusCallback,
    worker: Option<JoinHandle<()>>,
}

impl AudioEngine {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            restart_requested: Arc::new(AtomicBool::new(false)),
            suppression_level: Arc::new(AtomicU32::new(DEFAULT_SUPPRESSION_LEVEL.to_bits())),
            vad_threshold: Arc::new(AtomicU32::new(DEFAULT_VAD_THRESHOLD.to_bits())),
            comfort_noise: Arc::new(AtomicBool::new(true)),
            metrics: Arc::new(AudioMetrics::new()),
            status_callback: Arc::new(Mutex::new(None)),
            worker: None,
        }
    }

    /// Enumerate input and output devices. Safe to call anytime,
    /// including while an engine is running.
    pub fn enumerate_devices() -> Result<(Vec<DeviceInfo>, Vec<DeviceInfo>), EngineError> {
        Ok((device::list_input_devices()?, device::list_output_devices()?))
    }

    /// Start capturing, processing, and playing audio.
    ///
    /// Blocks until both streams are open and started or a step failed;
    /// failure unwinds everything built so far and reports why.
    pub fn start(&mut self, config: EngineConfig) -> Result<(), EngineError> {
        if self.running.load(Ordering::Acquire) {
            return Err(EngineError::AlreadyRunning);
        }

        self.metrics.reset();
        self.restart_requested.store(false, Ordering::Relaxed);

        let pipeline = DenoisePipeline::new(
            Arc::clone(&self.suppression_level),
            Arc::clone(&self.vad_threshold),
            Arc::clone(&self.comfort_noise),
            Arc::clone(&self.metrics),
        );

        let (ready_tx, ready_rx) = mpsc::channel();
        self.running.store(true, Ordering::Release);

        let running = Arc::clone(&self.running);
        let restart_requested = Arc::clone(&self.restart_requested);
        let status_callback = Arc::clone(&self.status_callback);
        self.worker = Some(std::thread::spawn(move || {
            run_worker(
                config,
                pipeline,
                running,
                restart_requested,
                status_callback,
                ready_tx,
            );
        }));

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.unwind_failed_start();
                Err(err)
            }
            Err(_) => {
                self.unwind_failed_start();
                Err(EngineError::WorkerStartup)
            }
        }
    }

    fn unwind_failed_start(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    /// Stop the engine. Idempotent. Joins the worker, which drops both
    /// streams first, so no callback is in flight once this returns.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Set the suppression level. Values outside [0, 1] are clamped;
    /// 0 bypasses the DSP chain entirely.
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

    pub fn set_status_callback(&self, callback: StatusCallback) {
        if let Ok(mut guard) = self.status_callback.lock() {
            *guard = Some(callback);
        }
    }

    /// Per-frame metrics, updated by the worker while running.
    pub fn metrics(&self) -> &AudioMetrics {
        &self.metrics
    }
}

impl Default for AudioEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

struct StreamPair {
    capture: Stream,
    output: Stream,
}

fn run_worker(
    config: EngineConfig,
    mut pipeline: DenoisePipeline,
    running: Arc<AtomicBool>,
    restart_requested: Arc<AtomicBool>,
    status_callback: SharedStatusCallback,
    ready_tx: mpsc::Sender<Result<(), EngineError>>,
) {
    // Rings are allocated once per run, never inside a callback. The
    // callback-side endpoints live behind try_lock so restart can hand
    // them to replacement streams.
    let (capture_producer, mut capture_consumer) = AudioRingBuffer::new(RING_CAPACITY).split();
    let (mut output_producer, output_consumer) = AudioRingBuffer::new(RING_CAPACITY).split();
    let capture_dropped = capture_producer.dropped_counter();
    let capture_producer = Arc::new(Mutex::new(capture_producer));
    let output_consumer = Arc::new(Mutex::new(output_consumer));

    let mut streams = match open_streams(
        &config,
        &capture_producer,
        &output_consumer,
        &running,
        &restart_requested,
    ) {
        Ok(pair) => Some(pair),
        Err(err) => {
            let _ = ready_tx.send(Err(err));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));

    if let Err(err) = set_current_thread_priority(ThreadPriority::Max) {
        warn!("could not raise worker thread priority: {err:?}");
    }

    let mut frame = [0.0f32; FRAME_SIZE];

    // Denormals flushed to zero for the whole loop; sub-normal tails in
    // the IIR state would otherwise stall the CPU mid-frame.
    // SAFETY: only alters this thread's floating point control flags.
    unsafe {
        no_denormals::no_denormals(|| {
            while running.load(Ordering::Acquire) {
                if capture_consumer.available_read() >= FRAME_SIZE {
                    capture_consumer.read(&mut frame);
                    sanitize(&mut frame);
                    pipeline.process_frame(&mut frame);
                    output_producer.write(&frame);
                } else {
                    std::thread::sleep(IDLE_SLEEP);
                }

                if restart_requested.load(Ordering::Relaxed) {
                    restart_requested.store(false, Ordering::Relaxed);
                    attempt_restart(
                        &mut streams,
                        &config,
                        &capture_producer,
                        &output_consumer,
                        &running,
                        &restart_requested,
                        &status_callback,
                    );
                }
            }
        });
    }

    // Pause before drop so neither callback runs during teardown.
    if let Some(pair) = streams.take() {
        let _ = pair.capture.pause();
        let _ = pair.output.pause();
    }

    let dropped = capture_dropped.load(Ordering::Relaxed);
    if dropped > 0 {
        debug!("capture ring dropped {dropped} samples during the run");
    }
}

/// Clamp non-finite and out-of-range input before the DSP chain.
fn sanitize(frame: &mut [f32; FRAME_SIZE]) {
    for sample in frame.iter_mut() {
        if !sample.is_finite() {
            *sample = 0.0;
        } else {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }
}

/// Resolve devices, open both streams, and start them. Any failure drops
/// whatever was built before it.
fn open_streams(
    config: &EngineConfig,
    capture_producer: &Arc<Mutex<AudioProducer>>,
    output_consumer: &Arc<Mutex<AudioConsumer>>,
    running: &Arc<AtomicBool>,
    restart_requested: &Arc<AtomicBool>,
) -> Result<StreamPair, EngineError> {
    let host = cpal::default_host();
    let input_device = device::resolve_input_device(&host, config.input_device)?;
    let output_device = device::resolve_output_device(&host, config.output_device)?;

    let capture =
        build_capture_stream(&input_device, config, capture_producer, running, restart_requested)?;
    let output =
        build_output_stream(&output_device, config, output_consumer, running, restart_requested)?;

    capture
        .play()
        .map_err(|e| EngineError::StartCapture(e.to_string()))?;
    output
        .play()
        .map_err(|e| EngineError::StartOutput(e.to_string()))?;

    Ok(StreamPair { capture, output })
}

/// Find a supported f32 config covering the target rate, preferring the
/// fewest channels (the engine interior is mono).
fn find_rate_config(
    configs: impl Iterator<Item = SupportedStreamConfigRange>,
    sample_rate: u32,
) -> Option<SupportedStreamConfig> {
    configs
        .filter(|c| {
            c.sample_format() == SampleFormat::F32
                && c.min_sample_rate().0 <= sample_rate
                && sample_rate <= c.max_sample_rate().0
        })
        .min_by_key(|c| c.channels())
        .map(|c| c.with_sample_rate(SampleRate(sample_rate)))
}

fn requested_buffer_size(config: &EngineConfig) -> BufferSize {
    if config.low_latency {
        BufferSize::Fixed(config.frames_per_buffer)
    } else {
        BufferSize::Default
    }
}

fn build_capture_stream(
    device: &cpal::Device,
    config: &EngineConfig,
    producer: &Arc<Mutex<AudioProducer>>,
    running: &Arc<AtomicBool>,
    restart_requested: &Arc<AtomicBool>,
) -> Result<Stream, EngineError> {
    let supported = device
        .supported_input_configs()
        .map_err(|e| EngineError::OpenCapture(e.to_string()))?;
    let supported = find_rate_config(supported, config.sample_rate).ok_or_else(|| {
        EngineError::OpenCapture(format!(
            "input device does not support {} Hz float streams",
            config.sample_rate
        ))
    })?;
    let channels = supported.channels() as usize;
    let stream_config: StreamConfig = supported.into();

    let build = |buffer_size: BufferSize| {
        let mut cfg = stream_config.clone();
        cfg.buffer_size = buffer_size;

        let producer = Arc::clone(producer);
        let running = Arc::clone(running);
        let restart = Arc::clone(restart_requested);
        // Pre-sized so the steady state never allocates in the callback.
        let mut mono_scratch = vec![0.0f32; RING_CAPACITY];

        device.build_input_stream(
            &cfg,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                // Contention only happens while a restart swaps streams;
                // dropping this block is better than blocking the audio
                // thread. Overflow past the ring is dropped silently.
                if let Ok(mut prod) = producer.try_lock() {
                    if channels == 1 {
                        prod.write(data);
                    } else {
                        let frames = data.len() / channels;
                        if mono_scratch.len() < frames {
                            mono_scratch.resize(frames, 0.0);
                        }
                        for (i, chunk) in data.chunks_exact(channels).enumerate() {
                            let sum: f32 = chunk.iter().copied().sum();
                            mono_scratch[i] = sum / channels as f32;
                        }
                        prod.write(&mono_scratch[..frames]);
                    }
                }
            },
            move |err| {
                warn!("capture stream error: {err}");
                restart.store(true, Ordering::Relaxed);
            },
            None,
        )
    };

    match build(requested_buffer_size(config)) {
        Ok(stream) => Ok(stream),
        Err(err) if config.low_latency => {
            // Fixed low-latency buffers are often refused when another
            // app holds the device; retry with the shared default size.
            warn!("low-latency capture open failed ({err}); retrying with default buffer size");
            build(BufferSize::Default).map_err(|e| EngineError::OpenCapture(e.to_string()))
        }
        Err(err) => Err(EngineError::OpenCapture(err.to_string())),
    }
}

fn build_output_stream(
    device: &cpal::Device,
    config: &EngineConfig,
    consumer: &Arc<Mutex<AudioConsumer>>,
    running: &Arc<AtomicBool>,
    restart_requested: &Arc<AtomicBool>,
) -> Result<Stream, EngineError> {
    let supported = device
        .supported_output_configs()
        .map_err(|e| EngineError::OpenOutput(e.to_string()))?;
    let supported = find_rate_config(supported, config.sample_rate).ok_or_else(|| {
        EngineError::OpenOutput(format!(
            "output device does not support {} Hz float streams",
            config.sample_rate
        ))
    })?;
    let channels = supported.channels() as usize;
    let stream_config: StreamConfig = supported.into();

    let build = |buffer_size: BufferSize| {
        let mut cfg = stream_config.clone();
        cfg.buffer_size = buffer_size;

        let consumer = Arc::clone(consumer);
        let running = Arc::clone(running);
        let restart = Arc::clone(restart_requested);
        let mut mono_scratch = vec![0.0f32; RING_CAPACITY];

        device.build_output_stream(
            &cfg,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if !running.load(Ordering::Relaxed) {
                    data.fill(0.0);
                    return;
                }
                match consumer.try_lock() {
                    Ok(mut cons) => {
                        if channels == 1 {
                            // Underrun: zero-fill the tail; the read index
                            // has advanced by the short count.
                            let read = cons.read(data);
                            data[read..].fill(0.0);
                        } else {
                            let frames = data.len() / channels;
                            if mono_scratch.len() < frames {
                                mono_scratch.resize(frames, 0.0);
                            }
                            let read = cons.read(&mut mono_scratch[..frames]);
                            for (i, out) in data.chunks_exact_mut(channels).enumerate() {
                                let sample = if i < read { mono_scratch[i] } else { 0.0 };
                                out.fill(sample);
                            }
                        }
                    }
                    Err(_) => data.fill(0.0),
                }
            },
            move |err| {
                warn!("output stream error: {err}");
                restart.store(true, Ordering::Relaxed);
            },
            None,
        )
    };

    match build(requested_buffer_size(config)) {
        Ok(stream) => Ok(stream),
        Err(err) if config.low_latency => {
            warn!("low-latency output open failed ({err}); retrying with default buffer size");
            build(BufferSize::Default).map_err(|e| EngineError::OpenOutput(e.to_string()))
        }
        Err(err) => Err(EngineError::OpenOutput(err.to_string())),
    }
}

/// Tear down and reopen both streams after a device fault.
///
/// Exponential backoff between attempts; aborts as soon as the engine is
/// asked to stop. Rings and DSP state survive, so a successful restart
/// resumes with the learned noise floor intact.
fn attempt_restart(
    streams: &mut Option<StreamPair>,
    config: &EngineConfig,
    capture_producer: &Arc<Mutex<AudioProducer>>,
    output_consumer: &Arc<Mutex<AudioConsumer>>,
    running: &Arc<AtomicBool>,
    restart_requested: &Arc<AtomicBool>,
    status_callback: &SharedStatusCallback,
) {
    notify(status_callback, "device fault detected, attempting restart");

    for attempt in 0..MAX_RESTART_ATTEMPTS {
        // 100, 200, 400, 800, 1600 ms.
        std::thread::sleep(Duration::from_millis(RESTART_BACKOFF_BASE_MS << attempt));
        if !running.load(Ordering::Acquire) {
            return;
        }

        if let Some(pair) = streams.take() {
            let _ = pair.capture.pause();
            let _ = pair.output.pause();
        }

        match open_streams(
            config,
            capture_producer,
            output_consumer,
            running,
            restart_requested,
        ) {
            Ok(pair) => {
                *streams = Some(pair);
                notify(status_callback, "audio engine restarted");
                return;
            }
            Err(err) => {
                warn!("restart attempt {} failed: {err}", attempt + 1);
            }
        }
    }

    notify(
        status_callback,
        "failed to restart audio engine after repeated attempts",
    );
}

fn notify(status_callback: &SharedStatusCallback, message: &str) {
    if let Ok(guard) = status_callback.lock() {
        if let Some(callback) = guard.as_ref() {
            callback(message);
        }
    }
}
