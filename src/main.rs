mod audio_device;
mod audio_io;
mod console;
mod engine;
mod error;
mod fx_components;
mod gesture;
mod loop_buffer;
mod looper;
mod settings;

use crate::engine::{AudioCommand, LooperEngine, MAX_CONSECUTIVE_IO_FAILURES};
use crate::error::EngineError;
use crate::gesture::SharedGestureState;
use crate::looper::SharedLooperState;
use ringbuf::HeapRb;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gestloop=debug".parse()?),
        )
        .init();

    let app_settings = settings::load_settings();
    settings::save_settings(&app_settings); // writes the defaults on first run

    let gesture = SharedGestureState::new();
    let looper_state = SharedLooperState::new();
    let stop = Arc::new(AtomicBool::new(false));
    let fatal = Arc::new(AtomicBool::new(false));
    let xrun_count = Arc::new(AtomicUsize::new(0));

    let sample_rate = app_settings.sample_rate.unwrap_or(44_100);

    let command_rb = HeapRb::<AudioCommand>::new(256);
    let (command_producer, command_consumer) = command_rb.split();
    let audio_rb = HeapRb::<f32>::new((sample_rate * 4) as usize);
    let (audio_producer, audio_consumer) = audio_rb.split();

    let engine = LooperEngine::new(
        sample_rate as f32,
        app_settings.normalization_floor,
        gesture.clone(),
        looper_state.clone(),
        command_consumer,
        fatal.clone(),
    );

    let (_input_stream, _output_stream, active_sr, active_bs) = audio_io::init_and_run_streams(
        app_settings.input_device.clone(),
        app_settings.output_device.clone(),
        app_settings.sample_rate,
        app_settings.block_size,
        app_settings.input_latency_compensation_ms,
        audio_producer,
        audio_consumer,
        engine,
        xrun_count.clone(),
    )?;

    let _console = console::spawn(
        gesture,
        looper_state,
        command_producer,
        stop.clone(),
        xrun_count,
        settings::exports_dir(),
        active_sr,
    );
    info!(
        sample_rate = active_sr,
        block_size = active_bs,
        "ready, type 'help' for commands"
    );

    while !stop.load(Ordering::Relaxed) {
        if fatal.load(Ordering::Relaxed) {
            return Err(EngineError::ExcessiveIoFailure {
                consecutive: MAX_CONSECUTIVE_IO_FAILURES,
            }
            .into());
        }
        thread::sleep(Duration::from_millis(100));
    }

    // Dropping the streams on return releases the audio device.
    info!("shutting down");
    Ok(())
}
