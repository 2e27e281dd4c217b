//! Microphone capture and speaker playback through cpal.
//!
//! Device callbacks run on cpal's audio thread and exchange single mono
//! samples with the pipeline over lock-free SPSC rings. The callbacks never
//! allocate or block: capture drops frames when the ring is full, playback
//! emits silence when it runs dry. The pipeline side polls instead.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rtrb::{Consumer, Producer, RingBuffer};

use super::source::AudioSource;
use crate::encode::{clip, AudioSink};
use crate::error::{PitchError, Result};

/// Capture ring length, in chunks.
const QUEUE_CHUNKS: usize = 32;
const POLL_INTERVAL: Duration = Duration::from_millis(2);
const STALL_TIMEOUT: Duration = Duration::from_secs(2);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

fn device_error(context: &str, e: impl std::fmt::Display) -> PitchError {
    PitchError::Device(format!("{}: {}", context, e))
}

fn stream_config(channels: u16, sample_rate: u32) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    }
}

/// Pushes the mean of every interleaved frame. Returns how many frames
/// were dropped on a full ring.
fn push_downmixed(producer: &mut Producer<f32>, data: &[f32], channels: usize) -> usize {
    let mut dropped = 0;
    for frame in data.chunks(channels.max(1)) {
        let mono = frame.iter().sum::<f32>() / frame.len() as f32;
        if producer.push(mono).is_err() {
            dropped += 1;
        }
    }
    dropped
}

/// Copies the next queued sample to every channel of each frame.
fn fill_frames(consumer: &mut Consumer<f32>, data: &mut [f32], channels: usize) {
    for frame in data.chunks_mut(channels.max(1)) {
        frame.fill(consumer.pop().unwrap_or(0.0));
    }
}

/// Queues clipped samples, waiting for the consumer while the ring is full.
fn queue_samples(producer: &mut Producer<f32>, samples: &[f32]) -> Result<()> {
    let mut pending = samples;
    while !pending.is_empty() {
        if producer.is_abandoned() {
            return Err(PitchError::Device("output stream stopped".into()));
        }
        let free = producer.slots().min(pending.len());
        if free == 0 {
            std::thread::sleep(POLL_INTERVAL);
            continue;
        }
        let written = producer
            .write_chunk_uninit(free)
            .map_err(|e| device_error("queue output", e))?
            .fill_from_iter(pending[..free].iter().map(|&s| clip(s)));
        pending = &pending[written..];
    }
    Ok(())
}

pub struct MicrophoneSource {
    stream: Option<cpal::Stream>,
    consumer: Consumer<f32>,
    overruns: Arc<AtomicUsize>,
    sample_rate: u32,
    chunk_size: usize,
}

impl MicrophoneSource {
    pub fn open(sample_rate: u32, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(PitchError::config("chunk size must be positive"));
        }
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| PitchError::Device("no default input device".into()))?;
        let default = device
            .default_input_config()
            .map_err(|e| device_error("input config", e))?;
        if default.sample_format() != cpal::SampleFormat::F32 {
            return Err(PitchError::Device(format!(
                "input sample format {:?} is not supported, need f32",
                default.sample_format()
            )));
        }

        let channels = default.channels() as usize;
        let config = stream_config(default.channels(), sample_rate);
        let (mut producer, consumer) = RingBuffer::<f32>::new(chunk_size * QUEUE_CHUNKS);
        let overruns = Arc::new(AtomicUsize::new(0));
        let overruns_cb = Arc::clone(&overruns);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let dropped = push_downmixed(&mut producer, data, channels);
                    if dropped > 0 {
                        overruns_cb.fetch_add(dropped, Ordering::Relaxed);
                    }
                },
                |err| log::error!("Input stream error: {}", err),
                None,
            )
            .map_err(|e| device_error("build input stream", e))?;
        stream.play().map_err(|e| device_error("start input", e))?;

        log::info!(
            "Capturing from '{}' at {} Hz",
            device.name().unwrap_or_else(|_| "unknown".into()),
            sample_rate
        );

        Ok(Self {
            stream: Some(stream),
            consumer,
            overruns,
            sample_rate,
            chunk_size,
        })
    }
}

impl AudioSource for MicrophoneSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
        if self.stream.is_none() {
            return Ok(None);
        }
        let dropped = self.overruns.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            log::warn!("Input overrun, dropped {} frames", dropped);
        }

        let mut chunk = Vec::with_capacity(self.chunk_size);
        let mut idle_since = Instant::now();
        while chunk.len() < self.chunk_size {
            match self.consumer.pop() {
                Ok(sample) => {
                    chunk.push(sample);
                    idle_since = Instant::now();
                }
                Err(_) if self.consumer.is_abandoned() => return Ok(None),
                Err(_) if idle_since.elapsed() > STALL_TIMEOUT => {
                    return Err(PitchError::Device("input stream stalled".into()));
                }
                Err(_) => std::thread::sleep(POLL_INTERVAL),
            }
        }
        Ok(Some(chunk))
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream.pause().map_err(|e| device_error("stop input", e))?;
            log::info!("Microphone closed");
        }
        Ok(())
    }
}

pub struct PlaybackSink {
    stream: Option<cpal::Stream>,
    producer: Option<Producer<f32>>,
}

impl PlaybackSink {
    pub fn open(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PitchError::Device("no default output device".into()))?;
        let default = device
            .default_output_config()
            .map_err(|e| device_error("output config", e))?;

        let channels = default.channels() as usize;
        let config = stream_config(default.channels(), sample_rate);
        // a quarter second of queued output
        let (producer, mut consumer) = RingBuffer::<f32>::new((sample_rate as usize / 4).max(1));

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    fill_frames(&mut consumer, data, channels);
                },
                |err| log::error!("Output stream error: {}", err),
                None,
            )
            .map_err(|e| device_error("build output stream", e))?;
        stream.play().map_err(|e| device_error("start output", e))?;

        log::info!(
            "Playing through '{}' at {} Hz",
            device.name().unwrap_or_else(|_| "unknown".into()),
            sample_rate
        );

        Ok(Self {
            stream: Some(stream),
            producer: Some(producer),
        })
    }
}

impl AudioSink for PlaybackSink {
    fn write(&mut self, chunk: &[f32]) -> Result<()> {
        match self.producer.as_mut() {
            Some(producer) => queue_samples(producer, chunk),
            None => Ok(()),
        }
    }

    fn finish(&mut self) -> Result<()> {
        let Some(producer) = self.producer.take() else {
            return Ok(());
        };
        let capacity = producer.buffer().capacity();
        let started = Instant::now();
        while producer.slots() < capacity
            && !producer.is_abandoned()
            && started.elapsed() < DRAIN_TIMEOUT
        {
            std::thread::sleep(Duration::from_millis(10));
        }
        if let Some(stream) = self.stream.take() {
            stream.pause().map_err(|e| device_error("stop output", e))?;
        }
        log::info!("Playback finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(consumer: &mut Consumer<f32>) -> Vec<f32> {
        std::iter::from_fn(|| consumer.pop().ok()).collect()
    }

    #[test]
    fn capture_downmixes_and_counts_overruns() {
        let (mut producer, mut consumer) = RingBuffer::<f32>::new(3);
        let stereo = [1.0, 0.0, 0.5, 0.5, -1.0, 0.0, 0.2, 0.2];

        assert_eq!(push_downmixed(&mut producer, &stereo, 2), 1);
        assert_eq!(drain(&mut consumer), vec![0.5, 0.5, -0.5]);

        assert_eq!(push_downmixed(&mut producer, &[0.25, 0.75], 1), 0);
        assert_eq!(drain(&mut consumer), vec![0.25, 0.75]);
    }

    #[test]
    fn playback_repeats_samples_across_channels_then_silence() {
        let (mut producer, mut consumer) = RingBuffer::<f32>::new(8);
        queue_samples(&mut producer, &[0.5, 2.0]).unwrap();

        let mut out = [9.0f32; 6];
        fill_frames(&mut consumer, &mut out, 2);
        assert_eq!(out, [0.5, 0.5, 1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn queueing_waits_for_the_consumer() {
        let (mut producer, mut consumer) = RingBuffer::<f32>::new(4);
        let reader = std::thread::spawn(move || {
            let mut received = Vec::new();
            while received.len() < 10 {
                match consumer.pop() {
                    Ok(sample) => received.push(sample),
                    Err(_) => std::thread::sleep(Duration::from_millis(1)),
                }
            }
            received
        });

        let samples: Vec<f32> = (0..10).map(|i| i as f32 / 10.0).collect();
        queue_samples(&mut producer, &samples).unwrap();
        assert_eq!(reader.join().unwrap(), samples);
    }

    #[test]
    fn queueing_fails_once_playback_is_gone() {
        let (mut producer, consumer) = RingBuffer::<f32>::new(2);
        drop(consumer);
        let err = queue_samples(&mut producer, &[0.1, 0.2, 0.3]).unwrap_err();
        assert!(matches!(err, PitchError::Device(_)));
    }
}
