// src/audio_io.rs

use crate::engine::LooperEngine;
use crate::error::EngineError;
use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, FromSample, Sample, SampleFormat, Stream, StreamConfig};
use ringbuf::{HeapConsumer, HeapProducer};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Opens the duplex audio path and starts both streams.
///
/// The input callback mono-sums device frames into the ring buffer; the
/// output callback pops one block, runs the looper engine over it, and hands
/// the result back to the device. Device callbacks are the only pacing in the
/// system. Returns the running streams plus the active sample rate and block
/// size.
#[allow(clippy::too_many_arguments)]
pub fn init_and_run_streams(
    input_device_name: Option<String>,
    output_device_name: Option<String>,
    requested_sample_rate: Option<u32>,
    requested_block_size: Option<u32>,
    input_latency_ms: f32,
    audio_input_producer: HeapProducer<f32>,
    audio_input_consumer: HeapConsumer<f32>,
    engine: LooperEngine,
    xrun_count: Arc<AtomicUsize>,
) -> Result<(Stream, Stream, u32, u32)> {
    let host = cpal::default_host();
    let input_device = if let Some(name) = &input_device_name {
        host.input_devices()?
            .find(|d| d.name().ok().as_ref() == Some(name))
            .ok_or_else(|| EngineError::DeviceOpen(format!("input device not found: {name}")))?
    } else {
        host.default_input_device()
            .ok_or_else(|| EngineError::DeviceOpen("no default input device".into()))?
    };
    let output_device = if let Some(name) = &output_device_name {
        host.output_devices()?
            .find(|d| d.name().ok().as_ref() == Some(name))
            .ok_or_else(|| EngineError::DeviceOpen(format!("output device not found: {name}")))?
    } else {
        host.default_output_device()
            .ok_or_else(|| EngineError::DeviceOpen("no default output device".into()))?
    };
    let input_name = input_device.name()?;
    let output_name = output_device.name()?;
    info!(input = %input_name, output = %output_name, "using audio devices");

    let default_input_config = input_device.default_input_config()?;
    let default_output_config = output_device.default_output_config()?;

    let sample_format = default_output_config.sample_format();

    let mut final_input_config: StreamConfig = default_input_config.into();
    if let Some(sr) = requested_sample_rate {
        final_input_config.sample_rate = cpal::SampleRate(sr);
    }
    if let Some(bs) = requested_block_size {
        final_input_config.buffer_size = BufferSize::Fixed(bs);
    }

    let mut final_output_config: StreamConfig = default_output_config.into();
    if let Some(sr) = requested_sample_rate {
        final_output_config.sample_rate = cpal::SampleRate(sr);
    }
    if let Some(bs) = requested_block_size {
        final_output_config.buffer_size = BufferSize::Fixed(bs);
    }

    fn run<T>(
        input_device: &Device,
        input_config: &StreamConfig,
        output_device: &Device,
        output_config: &StreamConfig,
        audio_producer: HeapProducer<f32>,
        audio_consumer: HeapConsumer<f32>,
        engine: LooperEngine,
        input_latency_ms: f32,
        xrun_count: Arc<AtomicUsize>,
    ) -> Result<(Stream, Stream)>
    where
        T: Sample + cpal::SizedSample + FromSample<f32>,
        f32: FromSample<T>,
    {
        let input_stream =
            build_input_stream::<T>(input_device, input_config, audio_producer, xrun_count.clone())?;
        let output_stream = build_output_stream::<T>(
            output_device,
            output_config,
            audio_consumer,
            engine,
            xrun_count,
            input_latency_ms,
            output_config.sample_rate.0,
        )?;
        input_stream.play()?;
        output_stream.play()?;
        Ok((input_stream, output_stream))
    }

    let (input_stream, output_stream) = match sample_format {
        SampleFormat::F32 => run::<f32>(
            &input_device,
            &final_input_config,
            &output_device,
            &final_output_config,
            audio_input_producer,
            audio_input_consumer,
            engine,
            input_latency_ms,
            xrun_count,
        )?,
        SampleFormat::I16 => run::<i16>(
            &input_device,
            &final_input_config,
            &output_device,
            &final_output_config,
            audio_input_producer,
            audio_input_consumer,
            engine,
            input_latency_ms,
            xrun_count,
        )?,
        SampleFormat::U16 => run::<u16>(
            &input_device,
            &final_input_config,
            &output_device,
            &final_output_config,
            audio_input_producer,
            audio_input_consumer,
            engine,
            input_latency_ms,
            xrun_count,
        )?,
        format => return Err(EngineError::UnsupportedFormat(format.to_string()).into()),
    };

    let active_sr = final_output_config.sample_rate.0;
    let active_bs = match final_output_config.buffer_size {
        BufferSize::Fixed(size) => size,
        BufferSize::Default => 2048, // A reasonable assumption if default
    };

    info!(
        sample_rate = active_sr,
        block_size = active_bs,
        "audio streams started"
    );

    Ok((input_stream, output_stream, active_sr, active_bs))
}

fn build_input_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: HeapProducer<f32>,
    xrun_count: Arc<AtomicUsize>,
) -> Result<Stream>
where
    T: Sample + cpal::SizedSample,
    f32: FromSample<T>,
{
    let err_fn = {
        let xrun_count_clone = xrun_count.clone();
        move |err| {
            warn!("input stream error: {err}");
            xrun_count_clone.fetch_add(1, Ordering::Relaxed);
        }
    };
    let channels = config.channels as usize;

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            for frame in data.chunks(channels) {
                let mono_sample =
                    frame.iter().map(|s| f32::from_sample(*s)).sum::<f32>() / (channels as f32);
                if producer.push(mono_sample).is_err() {
                    // buffer full, drop sample
                }
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

#[allow(clippy::too_many_arguments)]
fn build_output_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut consumer: HeapConsumer<f32>,
    mut engine: LooperEngine,
    xrun_count: Arc<AtomicUsize>,
    input_latency_ms: f32,
    sample_rate: u32,
) -> Result<Stream>
where
    T: Sample + cpal::SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let err_fn = {
        let xrun_count_clone = xrun_count.clone();
        move |err| {
            warn!("output stream error: {err}");
            xrun_count_clone.fetch_add(1, Ordering::Relaxed);
        }
    };
    // Keep the queued input close to the configured latency so a stalled
    // output stream cannot let it grow into a long echo.
    let target_len = (input_latency_ms / 1000.0 * sample_rate as f32).round() as usize;
    let mut input_block: Vec<f32> = vec![];
    let mut output_block: Vec<f32> = vec![];

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            engine.handle_commands();
            let num_samples = data.len() / channels;
            input_block.resize(num_samples, 0.0);
            output_block.resize(num_samples, 0.0);

            if consumer.len() > target_len + num_samples {
                consumer.skip(consumer.len() - target_len - num_samples);
            }

            let samples_read = consumer.pop_slice(&mut input_block);
            if samples_read < num_samples {
                input_block[samples_read..].iter_mut().for_each(|s| *s = 0.0);
            }
            engine.note_device_read(samples_read == num_samples);

            engine.process_block(&input_block, &mut output_block);

            for (frame, &sample_value) in data.chunks_mut(channels).zip(output_block.iter()) {
                for sample in frame.iter_mut() {
                    *sample = T::from_sample(sample_value);
                }
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}
