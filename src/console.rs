// src/console.rs

//! Line-oriented control surface on stdin.
//!
//! Stands in for the camera/landmark gesture pipeline: each command publishes
//! the same GestureState snapshot a vision thread would, so the engine cannot
//! tell the difference. Also carries the non-real-time operations (save,
//! reset) and the status/device queries that poll the shared state.

use crate::audio_device;
use crate::engine::AudioCommand;
use crate::gesture::{GestureLabel, SharedGestureState};
use crate::looper::SharedLooperState;
use chrono::Local;
use ringbuf::HeapProducer;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::warn;

const HELP: &str = "\
commands:
  record          start/continue recording the loop (open hand)
  play            finish recording / keep the loop playing (closed fist)
  fx [0..1]       play the loop through the reverb (OK sign); hand height
  neutral         no gesture; current behavior continues
  idle            hand withdrawn; drop the loop, back to live audio
  save [name]     export the current loop as a WAV file
  reset           clear the loop and the effect tail
  devices         list audio devices
  status          show looper and gesture state
  quit            stop the session";

#[allow(clippy::too_many_arguments)]
pub fn spawn(
    gesture: SharedGestureState,
    looper: SharedLooperState,
    mut command_producer: HeapProducer<AudioCommand>,
    stop: Arc<AtomicBool>,
    xrun_count: Arc<AtomicUsize>,
    export_dir: Option<PathBuf>,
    sample_rate: u32,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        let mut fx_intensity = 0.8f32;

        loop {
            line.clear();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => {
                    // stdin closed: treat like quit so the session winds down.
                    stop.store(true, Ordering::Relaxed);
                    break;
                }
                Ok(_) => {}
            }
            let mut parts = line.split_whitespace();
            let Some(command) = parts.next() else {
                continue;
            };

            match command {
                "record" | "r" => gesture.publish(GestureLabel::Record, 0.0),
                "play" | "p" => gesture.publish(GestureLabel::PlaybackTrigger, 0.0),
                "fx" | "f" => {
                    if let Some(value) = parts.next().and_then(|v| v.parse::<f32>().ok()) {
                        fx_intensity = value;
                    }
                    gesture.publish(GestureLabel::EffectTrigger, fx_intensity);
                }
                "neutral" | "n" => gesture.publish(GestureLabel::Neutral, 0.0),
                "idle" | "out" => gesture.publish(GestureLabel::Idle, 0.0),
                "save" => {
                    let Some(dir) = export_dir.clone() else {
                        warn!("no export directory available");
                        continue;
                    };
                    let file_name = parts.next().map(str::to_owned).unwrap_or_else(|| {
                        let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
                        format!("loop_{timestamp}.wav")
                    });
                    if command_producer
                        .push(AudioCommand::SaveLoop(dir.join(file_name)))
                        .is_err()
                    {
                        warn!("command queue full, save dropped");
                    }
                }
                "reset" => {
                    if command_producer.push(AudioCommand::Reset).is_err() {
                        warn!("command queue full, reset dropped");
                    }
                }
                "devices" => {
                    match audio_device::input_device_names() {
                        Ok(names) => println!("inputs:  {names:?}"),
                        Err(e) => warn!("could not list input devices: {e}"),
                    }
                    match audio_device::output_device_names() {
                        Ok(names) => println!("outputs: {names:?}"),
                        Err(e) => warn!("could not list output devices: {e}"),
                    }
                }
                "status" => {
                    let snap = gesture.snapshot();
                    let loop_len = looper.get_loop_len();
                    println!(
                        "mode: {:?} | loop: {:.2}s ({} samples) | playhead: {} | gesture: {:?} @ {:.2} (t+{}ms) | xruns: {}",
                        looper.get_mode(),
                        loop_len as f32 / sample_rate as f32,
                        loop_len,
                        looper.get_playhead(),
                        snap.label,
                        snap.intensity,
                        snap.timestamp_ms,
                        xrun_count.load(Ordering::Relaxed),
                    );
                }
                "quit" | "exit" | "q" => {
                    stop.store(true, Ordering::Relaxed);
                    break;
                }
                "help" => println!("{HELP}"),
                other => println!("unknown command '{other}'\n{HELP}"),
            }
        }
    })
}
