use std::time::{Duration, Instant};

use tracing::{info, trace};

use super::Machine;
use super::ppu::{FRAME_HEIGHT, FRAME_WIDTH};

/// A finished picture, copied out of the PPU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: usize,
    pub height: usize,
    /// Packed RGB, row-major.
    pub pixels: Vec<u8>,
}

/// Fixed-size block of signed 16-bit mono PCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBlock {
    pub samples: Vec<i16>,
}

/// Button bytes for both ports, sampled once per emulated frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputSnapshot {
    pub port1: u8,
    pub port2: u8,
}

pub trait VideoSink {
    fn present(&mut self, frame: VideoFrame);
}

pub trait AudioSink {
    fn queue(&mut self, block: AudioBlock);
}

pub trait InputSource {
    fn snapshot(&mut self) -> InputSnapshot;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Running,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverTiming {
    pub frame_interval: Duration,
    pub cpu_cycles_per_frame: u64,
    /// Upper bound on intervals run in one tick. `None` runs every elapsed
    /// interval.
    pub max_catch_up_frames: Option<u32>,
    pub audio_block_samples: usize,
}

impl Default for DriverTiming {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(16),
            cpu_cycles_per_frame: 29_781,
            max_catch_up_frames: None,
            audio_block_samples: 735,
        }
    }
}

/// Wall-clock pacing around a `Machine`. Each elapsed interval runs one
/// interval's worth of CPU cycles; when several intervals have passed they
/// all run back to back unless a catch-up cap is configured.
pub struct Driver {
    machine: Machine,
    timing: DriverTiming,
    state: DriverState,
    last_tick: Instant,
    // Cycles the previous interval overran its budget by.
    cycle_carry: u64,
    audio_pending: Vec<i16>,
    frames_presented: u64,
    intervals_dropped: u64,
}

impl Driver {
    pub fn new(machine: Machine, timing: DriverTiming, now: Instant) -> Self {
        Self {
            machine,
            timing,
            state: DriverState::Running,
            last_tick: now,
            cycle_carry: 0,
            audio_pending: Vec::with_capacity(timing.audio_block_samples * 2),
            frames_presented: 0,
            intervals_dropped: 0,
        }
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    pub fn into_machine(self) -> Machine {
        self.machine
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn timing(&self) -> DriverTiming {
        self.timing
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Intervals skipped because the catch-up cap was hit.
    pub fn intervals_dropped(&self) -> u64 {
        self.intervals_dropped
    }

    pub fn pause(&mut self) {
        if self.state == DriverState::Running {
            self.state = DriverState::Paused;
            info!("driver paused");
        }
    }

    /// Pacing restarts from `now`, so time spent paused is never caught up.
    pub fn resume(&mut self, now: Instant) {
        if self.state == DriverState::Paused {
            self.state = DriverState::Running;
            self.last_tick = now;
            info!("driver resumed");
        }
    }

    pub fn stop(&mut self) {
        if self.state != DriverState::Stopped {
            self.state = DriverState::Stopped;
            info!("driver stopped");
        }
    }

    /// Runs every interval that has elapsed since the last tick and returns
    /// how many ran.
    pub fn tick(
        &mut self,
        now: Instant,
        video: &mut dyn VideoSink,
        audio: &mut dyn AudioSink,
        input: &mut dyn InputSource,
    ) -> u32 {
        match self.state {
            DriverState::Running => {}
            DriverState::Paused => {
                self.last_tick = now;
                return 0;
            }
            DriverState::Stopped => return 0,
        }

        let elapsed = now.saturating_duration_since(self.last_tick);
        let interval = self.timing.frame_interval;
        let due = (elapsed.as_nanos() / interval.as_nanos().max(1)) as u64;
        if due == 0 {
            return 0;
        }

        let cap = self
            .timing
            .max_catch_up_frames
            .map_or(u64::MAX, u64::from);
        let to_run = if due > cap {
            self.intervals_dropped += due - cap;
            self.last_tick = now;
            trace!(due, cap, "catch-up capped");
            cap
        } else {
            self.last_tick += interval * due as u32;
            due
        };
        trace!(intervals = to_run, "driver tick");

        for _ in 0..to_run {
            self.run_interval(video, audio, input);
        }
        to_run as u32
    }

    /// One interval: sample input, run the cycle budget, hand off every
    /// finished frame and every full audio block.
    pub fn run_interval(
        &mut self,
        video: &mut dyn VideoSink,
        audio: &mut dyn AudioSink,
        input: &mut dyn InputSource,
    ) {
        let snapshot = input.snapshot();
        self.machine.controller_mut(0).set_buttons(snapshot.port1);
        self.machine.controller_mut(1).set_buttons(snapshot.port2);
        self.machine.capture_input();

        let budget = self
            .timing
            .cpu_cycles_per_frame
            .saturating_sub(self.cycle_carry);
        let mut ran = 0u64;
        while ran < budget {
            ran += self.machine.step() as u64;
            if self.machine.take_frame_complete() {
                video.present(VideoFrame {
                    width: FRAME_WIDTH,
                    height: FRAME_HEIGHT,
                    pixels: self.machine.frame_buffer().to_vec(),
                });
                self.frames_presented += 1;
            }
        }
        self.cycle_carry = ran - budget;

        self.audio_pending
            .extend(self.machine.take_audio_samples());
        let block_len = self.timing.audio_block_samples;
        while self.audio_pending.len() >= block_len {
            let rest = self.audio_pending.split_off(block_len);
            let samples = std::mem::replace(&mut self.audio_pending, rest);
            audio.queue(AudioBlock { samples });
        }
    }
}
