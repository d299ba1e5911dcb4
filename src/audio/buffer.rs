//! Lock-free ring buffer for audio samples
//!
//! Single-producer/single-consumer FIFO connecting the real-time device
//! callbacks to the processing worker. The writer never blocks and drops
//! overflow at the source end; the reader never blocks and reports short
//! reads on underrun.

use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Fixed-capacity SPSC ring buffer over `f32` samples.
///
/// Capacity is chosen at construction and never changes. Split into a
/// producer and a consumer end before use; exactly one thread may hold
/// each end.
pub struct AudioRingBuffer {
    producer: HeapProducer<f32>,
    consumer: HeapConsumer<f32>,
    capacity: usize,
}

impl AudioRingBuffer {
    /// Create a new ring buffer with the given capacity in samples.
    pub fn new(capacity: usize) -> Self {
        let rb = HeapRb::<f32>::new(capacity);
        let (producer, consumer) = rb.split();

        Self {
            producer,
            consumer,
            capacity,
        }
    }

    /// Split into producer and consumer ends.
    pub fn split(self) -> (AudioProducer, AudioConsumer) {
        let dropped_count = Arc::new(AtomicU64::new(0));

        (
            AudioProducer {
                producer: self.producer,
                capacity: self.capacity,
                dropped_count: Arc::clone(&dropped_count),
            },
            AudioConsumer {
                consumer: self.consumer,
                capacity: self.capacity,
            },
        )
    }

    /// Buffer capacity in samples.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Producer end of the ring buffer (for writing).
pub struct AudioProducer {
    producer: HeapProducer<f32>,
    capacity: usize,
    dropped_count: Arc<AtomicU64>,
}

impl AudioProducer {
    /// Copy as many samples as fit from the start of `samples`.
    ///
    /// The overflowing tail is dropped at the source end; nothing already
    /// in the buffer is disturbed. Returns the number of samples accepted.
    /// Wait-free, never allocates.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let written = self.producer.push_slice(samples);
        let dropped = samples.len() - written;
        if dropped > 0 {
            self.dropped_count
                .fetch_add(dropped as u64, Ordering::Relaxed);
        }
        written
    }

    /// Instantaneous free space in samples.
    pub fn available_write(&self) -> usize {
        self.capacity - self.producer.len()
    }

    /// Buffer capacity in samples.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total samples dropped on overflow since construction.
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    /// Shared handle to the dropped-sample counter.
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped_count)
    }
}

/// Consumer end of the ring buffer (for reading).
pub struct AudioConsumer {
    consumer: HeapConsumer<f32>,
    capacity: usize,
}

impl AudioConsumer {
    /// Copy up to `dst.len()` samples into `dst`.
    ///
    /// If fewer samples are available, only that many are copied and the
    /// remainder of `dst` is left untouched. Returns the number of samples
    /// read. Wait-free, never allocates.
    pub fn read(&mut self, dst: &mut [f32]) -> usize {
        self.consumer.pop_slice(dst)
    }

    /// Instantaneous occupancy in samples.
    pub fn available_read(&self) -> usize {
        self.consumer.len()
    }

    /// Whether the buffer is currently empty.
    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    /// Buffer capacity in samples.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
