// src/gesture.rs

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

// Scaler for storing float values in atomics.
pub const PARAM_SCALER: f32 = 1_000_000.0;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GestureLabel {
    Idle,
    Record,
    PlaybackTrigger,
    EffectTrigger,
    Neutral,
}

impl From<u8> for GestureLabel {
    fn from(val: u8) -> Self {
        match val {
            0 => GestureLabel::Idle,
            1 => GestureLabel::Record,
            2 => GestureLabel::PlaybackTrigger,
            3 => GestureLabel::EffectTrigger,
            4 => GestureLabel::Neutral,
            _ => GestureLabel::Neutral, // Default fallback
        }
    }
}

/// One published gesture snapshot, as seen by the audio thread.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GestureState {
    pub label: GestureLabel,
    /// Continuous control value in [0, 1], e.g. effect wetness from hand height.
    pub intensity: f32,
    /// Milliseconds since the gesture source started.
    pub timestamp_ms: u64,
}

/// Last-value-wins gesture cell shared between the gesture producer and the
/// audio thread. Label and intensity are packed into a single atomic word so
/// the reader can never pair a label from one publish with the intensity of
/// another.
#[derive(Clone)]
pub struct SharedGestureState {
    packed: Arc<AtomicU64>,
    timestamp_ms: Arc<AtomicU64>,
    epoch: Instant,
}

fn pack(label: GestureLabel, intensity: f32) -> u64 {
    let scaled = (intensity.clamp(0.0, 1.0) * PARAM_SCALER) as u32;
    ((label as u64) << 32) | scaled as u64
}

fn unpack(word: u64) -> (GestureLabel, f32) {
    let label = GestureLabel::from((word >> 32) as u8);
    let intensity = ((word & u32::MAX as u64) as f32 / PARAM_SCALER).clamp(0.0, 1.0);
    (label, intensity)
}

impl SharedGestureState {
    pub fn new() -> Self {
        Self {
            packed: Arc::new(AtomicU64::new(pack(GestureLabel::Neutral, 0.0))),
            timestamp_ms: Arc::new(AtomicU64::new(0)),
            epoch: Instant::now(),
        }
    }

    /// Publishes a new gesture. Intensity outside [0, 1] is clamped, never
    /// rejected: a malformed control value must not glitch the audio path.
    pub fn publish(&self, label: GestureLabel, intensity: f32) {
        self.packed.store(pack(label, intensity), Ordering::Relaxed);
        self.timestamp_ms
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    /// Non-blocking read of the most recent gesture.
    pub fn snapshot(&self) -> GestureState {
        let (label, intensity) = unpack(self.packed.load(Ordering::Relaxed));
        GestureState {
            label,
            intensity,
            timestamp_ms: self.timestamp_ms.load(Ordering::Relaxed),
        }
    }
}

impl Default for SharedGestureState {
    fn default() -> Self {
        Self::new()
    }
}
