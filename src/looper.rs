// src/looper.rs
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LooperMode {
    Idle,
    Recording,
    Playing,
}

impl From<u8> for LooperMode {
    fn from(val: u8) -> Self {
        match val {
            0 => LooperMode::Idle,
            1 => LooperMode::Recording,
            2 => LooperMode::Playing,
            _ => LooperMode::Idle, // Default fallback
        }
    }
}

/// State that is published by the audio thread for non-real-time observers
/// (console, telemetry). Readers poll at whatever cadence they need; the
/// audio thread never waits on them.
#[derive(Clone)]
pub struct SharedLooperState {
    mode: Arc<AtomicU8>,
    loop_len: Arc<AtomicUsize>,
    playhead: Arc<AtomicUsize>,
}

impl SharedLooperState {
    pub fn new() -> Self {
        Self {
            mode: Arc::new(AtomicU8::new(LooperMode::Idle as u8)),
            loop_len: Arc::new(AtomicUsize::new(0)),
            playhead: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn get_mode(&self) -> LooperMode {
        self.mode.load(Ordering::Relaxed).into()
    }

    pub fn set_mode(&self, mode: LooperMode) {
        self.mode.store(mode as u8, Ordering::Relaxed);
    }

    pub fn get_loop_len(&self) -> usize {
        self.loop_len.load(Ordering::Relaxed)
    }

    pub fn set_loop_len(&self, len: usize) {
        self.loop_len.store(len, Ordering::Relaxed);
    }

    pub fn get_playhead(&self) -> usize {
        self.playhead.load(Ordering::Relaxed)
    }

    pub fn set_playhead(&self, playhead: usize) {
        self.playhead.store(playhead, Ordering::Relaxed);
    }
}

impl Default for SharedLooperState {
    fn default() -> Self {
        Self::new()
    }
}
