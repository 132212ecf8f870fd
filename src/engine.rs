// src/engine.rs

//! The per-block looper state machine.
//!
//! Once per audio block the engine snapshots the latest gesture, decides what
//! this block should sound like (live input, recording monitor, loop
//! playback, loop playback through the reverb, or silence), advances the loop
//! read cursor, and publishes its state for non-real-time observers. All of
//! this runs inside the output stream callback, so nothing here blocks or
//! allocates.

use crate::fx_components::Reverb;
use crate::gesture::{GestureLabel, GestureState, SharedGestureState};
use crate::loop_buffer::LoopBuffer;
use crate::looper::{LooperMode, SharedLooperState};
use anyhow::Result;
use ringbuf::HeapConsumer;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

/// Consecutive short reads tolerated before the session is declared dead.
/// At 2048-sample blocks and 44.1 kHz this is a bit over two seconds of
/// missing audio.
pub const MAX_CONSECUTIVE_IO_FAILURES: u32 = 50;

/// Seconds of loop audio preallocated so a normal take never reallocates on
/// the audio thread.
const LOOP_PREALLOC_SECS: usize = 30;

/// Non-gesture control operations, sent from the console thread over a
/// ring buffer and drained at the top of each block.
#[derive(Debug)]
pub enum AudioCommand {
    SaveLoop(PathBuf),
    Reset,
}

pub struct LooperEngine {
    command_consumer: HeapConsumer<AudioCommand>,
    gesture: SharedGestureState,
    shared_state: SharedLooperState,
    loop_buffer: LoopBuffer,
    reverb: Reverb,
    read_cursor: usize,
    mode: LooperMode,
    last_gesture: GestureState,
    consecutive_io_failures: u32,
    // Underruns while the input stream is still priming are expected and not
    // counted; failure accounting arms on the first complete read.
    input_primed: bool,
    fatal: Arc<AtomicBool>,
    sample_rate: f32,
}

impl LooperEngine {
    pub fn new(
        sample_rate: f32,
        normalization_floor: f32,
        gesture: SharedGestureState,
        shared_state: SharedLooperState,
        command_consumer: HeapConsumer<AudioCommand>,
        fatal: Arc<AtomicBool>,
    ) -> Self {
        Self {
            command_consumer,
            gesture,
            shared_state,
            loop_buffer: LoopBuffer::with_capacity(sample_rate as usize * LOOP_PREALLOC_SECS),
            reverb: Reverb::new(sample_rate, normalization_floor),
            read_cursor: 0,
            mode: LooperMode::Idle,
            last_gesture: GestureState {
                label: GestureLabel::Neutral,
                intensity: 0.0,
                timestamp_ms: 0,
            },
            consecutive_io_failures: 0,
            input_primed: false,
            fatal,
            sample_rate,
        }
    }

    pub fn mode(&self) -> LooperMode {
        self.mode
    }

    pub fn last_gesture(&self) -> GestureState {
        self.last_gesture
    }

    /// Drains pending control commands. Commands are rare (human rate), so
    /// the loop clone for export is acceptable here; the actual file write
    /// happens on a background thread.
    pub fn handle_commands(&mut self) {
        while let Some(command) = self.command_consumer.pop() {
            match command {
                AudioCommand::SaveLoop(path) => {
                    if !self.loop_buffer.has_loop() || self.loop_buffer.is_empty() {
                        warn!("no loop recorded, nothing to save");
                        continue;
                    }
                    let samples = self.loop_buffer.loop_samples().to_vec();
                    let sample_rate = self.sample_rate;
                    thread::spawn(move || match write_wav_file(&path, &samples, sample_rate) {
                        Ok(()) => info!(path = %path.display(), "loop exported"),
                        Err(e) => error!(path = %path.display(), "loop export failed: {e:#}"),
                    });
                }
                AudioCommand::Reset => {
                    info!("engine reset");
                    self.reset();
                }
            }
        }
    }

    /// Full reset: loop discarded, cursor rewound, effect history cleared.
    pub fn reset(&mut self) {
        self.loop_buffer.clear();
        self.read_cursor = 0;
        self.mode = LooperMode::Idle;
        self.reverb.reset();
    }

    /// Reports the outcome of this block's device read. A short read is
    /// recovered locally (the caller substitutes silence) but counted; too
    /// many in a row escalate to a fatal flag that the supervisor observes.
    pub fn note_device_read(&mut self, complete: bool) {
        if complete {
            if self.consecutive_io_failures > 0 {
                debug!(
                    failed_blocks = self.consecutive_io_failures,
                    "input recovered"
                );
            }
            self.input_primed = true;
            self.consecutive_io_failures = 0;
            return;
        }
        if !self.input_primed {
            return;
        }
        self.consecutive_io_failures += 1;
        if self.consecutive_io_failures == 1 {
            warn!("input underrun, substituting silence");
        }
        if self.consecutive_io_failures == MAX_CONSECUTIVE_IO_FAILURES {
            error!(
                consecutive = self.consecutive_io_failures,
                "input dead for too long, stopping session"
            );
            self.fatal.store(true, Ordering::Relaxed);
        }
    }

    /// The per-block transition function. `input` is this block's live device
    /// input (already mono); `output` is filled with what the device should
    /// play. Both slices have the same length.
    pub fn process_block(&mut self, input: &[f32], output: &mut [f32]) {
        let gesture = self.gesture.snapshot();
        self.last_gesture = gesture;

        match gesture.label {
            // Hand withdrawn: drop the loop and fall back to live audio.
            GestureLabel::Idle => {
                if self.mode != LooperMode::Idle {
                    debug!("hand withdrawn, clearing loop");
                    self.loop_buffer.clear();
                    self.read_cursor = 0;
                    self.mode = LooperMode::Idle;
                }
                output.copy_from_slice(input);
            }
            GestureLabel::Record => {
                if self.mode != LooperMode::Recording {
                    debug!("recording started");
                    self.loop_buffer.begin_recording();
                    self.read_cursor = 0;
                    self.mode = LooperMode::Recording;
                }
                self.loop_buffer.append(input);
                // Live monitoring while the take is running; never through
                // the effect.
                output.copy_from_slice(input);
            }
            GestureLabel::PlaybackTrigger => {
                if self.mode == LooperMode::Recording {
                    self.loop_buffer.finalize();
                    self.read_cursor = 0;
                    self.mode = LooperMode::Playing;
                    debug!(loop_samples = self.loop_buffer.len(), "recording finished, playback started");
                }
                self.play_or_pass_through(input, output, None);
            }
            GestureLabel::EffectTrigger => {
                self.play_or_pass_through(input, output, Some(gesture.intensity));
            }
            // Neutral (and any future label) keeps the current behavior:
            // playback continues if a loop is playing, live input otherwise.
            // During recording this neither appends nor ends the take.
            GestureLabel::Neutral => {
                self.play_or_pass_through(input, output, None);
            }
        }

        self.shared_state.set_mode(self.mode);
        self.shared_state.set_loop_len(self.loop_buffer.len());
        self.shared_state.set_playhead(self.read_cursor);
    }

    /// Emits one loop block (optionally through the reverb) when playback is
    /// active, live input otherwise. A finalized-but-empty loop plays
    /// silence; a never-recorded loop falls back to the live input.
    fn play_or_pass_through(&mut self, input: &[f32], output: &mut [f32], intensity: Option<f32>) {
        if self.mode == LooperMode::Playing && self.loop_buffer.has_loop() {
            self.read_cursor = self.loop_buffer.read_block(output, self.read_cursor);
            if let Some(intensity) = intensity {
                self.reverb.process(output, intensity);
            }
        } else {
            output.copy_from_slice(input);
        }
    }
}

pub fn write_wav_file(path: &Path, audio_buffer: &[f32], sample_rate: f32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: sample_rate as u32,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in audio_buffer {
        let amplitude = i16::MAX as f32;
        let sample_i16 = (sample.clamp(-1.0, 1.0) * amplitude) as i16;
        writer.write_sample(sample_i16)?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::HeapRb;

    const BLOCK: usize = 64;
    const SAMPLE_RATE: f32 = 44100.0;

    struct Harness {
        engine: LooperEngine,
        gesture: SharedGestureState,
        shared: SharedLooperState,
        fatal: Arc<AtomicBool>,
    }

    fn harness() -> Harness {
        let gesture = SharedGestureState::new();
        let shared = SharedLooperState::new();
        let fatal = Arc::new(AtomicBool::new(false));
        let (_producer, consumer) = HeapRb::<AudioCommand>::new(8).split();
        let engine = LooperEngine::new(
            SAMPLE_RATE,
            0.85,
            gesture.clone(),
            shared.clone(),
            consumer,
            fatal.clone(),
        );
        Harness {
            engine,
            gesture,
            shared,
            fatal,
        }
    }

    fn block(value: f32) -> Vec<f32> {
        vec![value; BLOCK]
    }

    fn run(h: &mut Harness, label: GestureLabel, intensity: f32, input: &[f32]) -> Vec<f32> {
        h.gesture.publish(label, intensity);
        let mut output = vec![0.0; input.len()];
        h.engine.process_block(input, &mut output);
        output
    }

    #[test]
    fn record_then_play_yields_loop_of_recorded_length() {
        let mut h = harness();
        for i in 0..3 {
            run(&mut h, GestureLabel::Record, 0.0, &block(i as f32 * 0.1));
        }
        assert_eq!(h.engine.mode(), LooperMode::Recording);

        let out = run(&mut h, GestureLabel::PlaybackTrigger, 0.0, &block(0.9));
        assert_eq!(h.engine.mode(), LooperMode::Playing);
        assert_eq!(h.shared.get_loop_len(), 3 * BLOCK);
        // First playback block is the first recorded block.
        assert_eq!(out, block(0.0));
    }

    #[test]
    fn recording_monitors_live_input() {
        let mut h = harness();
        let input = block(0.4);
        let out = run(&mut h, GestureLabel::Record, 0.0, &input);
        assert_eq!(out, input);
    }

    #[test]
    fn playback_wraps_seamlessly() {
        let mut h = harness();
        let take: Vec<f32> = (0..BLOCK).map(|i| i as f32 / BLOCK as f32).collect();
        run(&mut h, GestureLabel::Record, 0.0, &take);
        run(&mut h, GestureLabel::PlaybackTrigger, 0.0, &block(0.0));

        // Loop is exactly one block long: every playback block equals it.
        let out = run(&mut h, GestureLabel::PlaybackTrigger, 0.0, &block(0.7));
        assert_eq!(out, take);
        assert_eq!(h.shared.get_playhead(), 0);
    }

    #[test]
    fn empty_loop_plays_silence() {
        let mut h = harness();
        run(&mut h, GestureLabel::Record, 0.0, &[]);
        let out = run(&mut h, GestureLabel::PlaybackTrigger, 0.0, &block(0.5));
        assert_eq!(h.engine.mode(), LooperMode::Playing);
        assert_eq!(out, block(0.0));
    }

    #[test]
    fn no_loop_playback_falls_back_to_live_input() {
        let mut h = harness();
        let input = block(0.3);
        let out = run(&mut h, GestureLabel::PlaybackTrigger, 0.0, &input);
        assert_eq!(h.engine.mode(), LooperMode::Idle);
        assert_eq!(out, input);
    }

    #[test]
    fn idle_gesture_clears_loop_and_passes_input() {
        let mut h = harness();
        run(&mut h, GestureLabel::Record, 0.0, &block(0.2));
        run(&mut h, GestureLabel::PlaybackTrigger, 0.0, &block(0.0));
        assert_eq!(h.engine.mode(), LooperMode::Playing);

        let input = block(0.6);
        let out = run(&mut h, GestureLabel::Idle, 0.0, &input);
        assert_eq!(h.engine.mode(), LooperMode::Idle);
        assert_eq!(out, input);
        assert_eq!(h.shared.get_loop_len(), 0);

        // The loop is gone: playback cannot resume.
        let out = run(&mut h, GestureLabel::PlaybackTrigger, 0.0, &input);
        assert_eq!(out, input);
        assert_eq!(h.engine.mode(), LooperMode::Idle);
    }

    #[test]
    fn new_recording_discards_previous_loop_immediately() {
        let mut h = harness();
        run(&mut h, GestureLabel::Record, 0.0, &block(0.2));
        run(&mut h, GestureLabel::PlaybackTrigger, 0.0, &block(0.0));

        run(&mut h, GestureLabel::Record, 0.0, &block(0.8));
        assert_eq!(h.engine.mode(), LooperMode::Recording);
        assert_eq!(h.shared.get_loop_len(), BLOCK); // only the new take
    }

    #[test]
    fn neutral_during_recording_neither_appends_nor_stops_the_take() {
        let mut h = harness();
        run(&mut h, GestureLabel::Record, 0.0, &block(0.1));
        let input = block(0.5);
        let out = run(&mut h, GestureLabel::Neutral, 0.0, &input);
        assert_eq!(h.engine.mode(), LooperMode::Recording);
        assert_eq!(out, input);

        run(&mut h, GestureLabel::Record, 0.0, &block(0.2));
        let out = run(&mut h, GestureLabel::PlaybackTrigger, 0.0, &block(0.0));
        // Two appended blocks, not three.
        assert_eq!(h.shared.get_loop_len(), 2 * BLOCK);
        assert_eq!(out, block(0.1));
    }

    #[test]
    fn neutral_during_playback_keeps_the_loop_running() {
        let mut h = harness();
        run(&mut h, GestureLabel::Record, 0.0, &block(0.25));
        run(&mut h, GestureLabel::PlaybackTrigger, 0.0, &block(0.0));

        let out = run(&mut h, GestureLabel::Neutral, 0.0, &block(0.9));
        assert_eq!(h.engine.mode(), LooperMode::Playing);
        assert_eq!(out, block(0.25));
    }

    #[test]
    fn effect_applies_to_playback_only() {
        let mut h = harness();
        // During recording the effect gesture is inert: live input only.
        run(&mut h, GestureLabel::Record, 0.0, &block(0.3));
        let input = block(0.5);
        let out = run(&mut h, GestureLabel::EffectTrigger, 0.9, &input);
        assert_eq!(h.engine.mode(), LooperMode::Recording);
        assert_eq!(out, input);

        run(&mut h, GestureLabel::Record, 0.0, &block(0.3));
        run(&mut h, GestureLabel::PlaybackTrigger, 0.0, &block(0.0));

        let plain = run(&mut h, GestureLabel::PlaybackTrigger, 0.0, &block(0.0));
        let wet = run(&mut h, GestureLabel::EffectTrigger, 0.9, &block(0.0));
        assert_ne!(plain, wet);
    }

    #[test]
    fn effect_intensity_is_clamped_not_rejected() {
        let mut h = harness();
        run(&mut h, GestureLabel::Record, 0.0, &block(0.3));
        run(&mut h, GestureLabel::PlaybackTrigger, 0.0, &block(0.0));

        let out = run(&mut h, GestureLabel::EffectTrigger, 42.0, &block(0.0));
        assert_eq!(h.engine.mode(), LooperMode::Playing);
        assert!(out.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn transient_read_failures_behave_like_silence_blocks() {
        let mut h = harness();
        run(&mut h, GestureLabel::Record, 0.0, &block(0.2));
        run(&mut h, GestureLabel::PlaybackTrigger, 0.0, &block(0.0));

        h.engine.note_device_read(true); // primed
        let silence = block(0.0);
        for _ in 0..5 {
            h.engine.note_device_read(false);
            let out = run(&mut h, GestureLabel::PlaybackTrigger, 0.0, &silence);
            assert_eq!(out, block(0.2)); // playback unaffected by input loss
        }
        h.engine.note_device_read(true);
        assert_eq!(h.engine.mode(), LooperMode::Playing);
        assert!(!h.fatal.load(Ordering::Relaxed));
    }

    #[test]
    fn excessive_read_failures_trip_the_fatal_flag() {
        let mut h = harness();
        h.engine.note_device_read(true);
        for _ in 0..MAX_CONSECUTIVE_IO_FAILURES {
            h.engine.note_device_read(false);
        }
        assert!(h.fatal.load(Ordering::Relaxed));
    }

    #[test]
    fn priming_underruns_are_not_counted() {
        let mut h = harness();
        for _ in 0..(MAX_CONSECUTIVE_IO_FAILURES * 2) {
            h.engine.note_device_read(false);
        }
        assert!(!h.fatal.load(Ordering::Relaxed));
    }

    #[test]
    fn reset_clears_loop_and_mode() {
        let mut h = harness();
        run(&mut h, GestureLabel::Record, 0.0, &block(0.2));
        run(&mut h, GestureLabel::PlaybackTrigger, 0.0, &block(0.0));
        h.engine.reset();
        assert_eq!(h.engine.mode(), LooperMode::Idle);

        let input = block(0.4);
        let out = run(&mut h, GestureLabel::PlaybackTrigger, 0.0, &input);
        assert_eq!(out, input);
    }

    #[test]
    fn engine_remembers_the_last_applied_gesture() {
        let mut h = harness();
        run(&mut h, GestureLabel::EffectTrigger, 0.4, &block(0.1));
        let last = h.engine.last_gesture();
        assert_eq!(last.label, GestureLabel::EffectTrigger);
        assert!((last.intensity - 0.4).abs() < 1e-5);
    }

    #[test]
    fn shared_state_tracks_mode_for_observers() {
        let mut h = harness();
        assert_eq!(h.shared.get_mode(), LooperMode::Idle);
        run(&mut h, GestureLabel::Record, 0.0, &block(0.1));
        assert_eq!(h.shared.get_mode(), LooperMode::Recording);
        run(&mut h, GestureLabel::PlaybackTrigger, 0.0, &block(0.0));
        assert_eq!(h.shared.get_mode(), LooperMode::Playing);
    }
}
