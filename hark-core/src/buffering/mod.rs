//! Frame types, silence FIFOs, and the SPSC sample ring.
//!
//! The ring uses `ringbuf::HeapRb<f32>`, whose `push_slice` is wait-free and
//! safe to call from the real-time audio callback. The capture loop is the
//! single consumer.

pub mod frame;
pub mod silence;

use ringbuf::{traits::Split, HeapRb};

pub use frame::AudioFrame;
pub use ringbuf::traits::{Consumer, Observer, Producer};
pub use silence::SilenceBuffer;

/// Producer half: held by the audio callback thread.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half: held by the capture loop.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Ring capacity: 2^20 = 1 048 576 f32 samples ≈ 21.8 s at 48 kHz.
/// Backpressure in the capture loop keeps actual occupancy to a few frames.
pub const RING_CAPACITY: usize = 1 << 20;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}
