use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{info, warn};

use crate::nes::apu::SAMPLE_RATE;
use crate::nes::driver::{AudioBlock, AudioSink};

type SampleQueue = Arc<Mutex<VecDeque<i16>>>;

/// cpal output stream fed with the core's mono PCM blocks.
pub struct AudioOutput {
    queue: SampleQueue,
    _stream: cpal::Stream,
    sample_rate: u32,
    max_queue_samples: usize,
    dropped_samples: u64,
}

impl AudioOutput {
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("no default audio output device"))?;
        let supported = device
            .default_output_config()
            .context("failed to query default audio config")?;

        let stream_config: cpal::StreamConfig = supported.config();
        let sample_rate = stream_config.sample_rate.0;
        let channels = stream_config.channels as usize;
        // About 100 ms of core output.
        let max_queue_samples = SAMPLE_RATE as usize / 10;
        let queue: SampleQueue = Arc::new(Mutex::new(VecDeque::with_capacity(max_queue_samples)));

        let err_fn = |err| {
            warn!(%err, "audio stream error");
        };

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => {
                let mut reader = QueueReader::new(Arc::clone(&queue), sample_rate);
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _| {
                        reader.fill(data, channels, |s| s as f32 / i16::MAX as f32)
                    },
                    err_fn,
                    None,
                )?
            }
            cpal::SampleFormat::I16 => {
                let mut reader = QueueReader::new(Arc::clone(&queue), sample_rate);
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [i16], _| reader.fill(data, channels, |s| s),
                    err_fn,
                    None,
                )?
            }
            cpal::SampleFormat::U16 => {
                let mut reader = QueueReader::new(Arc::clone(&queue), sample_rate);
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [u16], _| {
                        reader.fill(data, channels, |s| (s as i32 + 0x8000) as u16)
                    },
                    err_fn,
                    None,
                )?
            }
            other => {
                return Err(anyhow!("unsupported audio sample format: {other:?}"));
            }
        };

        stream
            .play()
            .context("failed to start audio output stream")?;
        info!(sample_rate, channels, "audio output started");

        Ok(Self {
            queue,
            _stream: stream,
            sample_rate,
            max_queue_samples,
            dropped_samples: 0,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn queued_samples(&self) -> usize {
        self.queue.lock().map(|queue| queue.len()).unwrap_or(0)
    }

    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples
    }
}

impl AudioSink for AudioOutput {
    fn queue(&mut self, block: AudioBlock) {
        let Ok(mut queue) = self.queue.lock() else {
            return;
        };

        let future_len = queue.len() + block.samples.len();
        if future_len > self.max_queue_samples {
            let drop_count = (future_len - self.max_queue_samples).min(queue.len());
            queue.drain(..drop_count);
            self.dropped_samples += drop_count as u64;
            warn!(drop_count, "audio queue overrun, dropping oldest samples");
        }
        queue.extend(block.samples);
    }
}

/// Pulls core-rate samples at the device rate (nearest neighbour).
struct QueueReader {
    queue: SampleQueue,
    step: f64,
    phase: f64,
    current: i16,
}

impl QueueReader {
    fn new(queue: SampleQueue, device_rate: u32) -> Self {
        Self {
            queue,
            step: SAMPLE_RATE as f64 / device_rate.max(1) as f64,
            phase: 0.0,
            current: 0,
        }
    }

    fn fill<T: Copy>(&mut self, data: &mut [T], channels: usize, convert: impl Fn(i16) -> T) {
        let Ok(mut queue) = self.queue.lock() else {
            return;
        };
        for frame in data.chunks_mut(channels.max(1)) {
            self.phase += self.step;
            while self.phase >= 1.0 {
                self.phase -= 1.0;
                // Underrun holds the last level rather than clicking to zero.
                if let Some(sample) = queue.pop_front() {
                    self.current = sample;
                }
            }
            let out = convert(self.current);
            for slot in frame {
                *slot = out;
            }
        }
    }
}
