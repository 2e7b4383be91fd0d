mod channels;
mod devices;
mod frame_sequencer;
mod mixer;

use tracing::trace;

use self::channels::{DmcChannel, NoiseChannel, PulseChannel, TriangleChannel};
use self::devices::SweepNegate;
use self::frame_sequencer::{CLOCK_ENVELOPE, CLOCK_LENGTH, FrameSequencer};
use self::mixer::Mixer;
use super::interrupt::InterruptLine;

pub use self::frame_sequencer::FrameMode;

/// One output sample per this many CPU cycles (about 44.7 kHz).
pub const SAMPLE_INTERVAL: u32 = 40;
pub const SAMPLE_RATE: u32 = 1_789_773 / SAMPLE_INTERVAL;

/// Memory the DMC reads sample bytes from.
pub trait DmcMemory {
    fn dmc_read(&mut self, addr: u16) -> u8;
}

pub struct Apu {
    pulse1: PulseChannel,
    pulse2: PulseChannel,
    triangle: TriangleChannel,
    noise: NoiseChannel,
    dmc: DmcChannel,
    frame_sequencer: FrameSequencer,
    mixer: Mixer,

    odd_cycle: bool,
    sample_countdown: u32,
    samples: Vec<i16>,
    irq: InterruptLine,
    dmc_fetches: u64,
}

impl Default for Apu {
    fn default() -> Self {
        Self::new()
    }
}

impl Apu {
    pub fn new() -> Self {
        Self {
            pulse1: PulseChannel::new(SweepNegate::OnesComplement),
            pulse2: PulseChannel::new(SweepNegate::TwosComplement),
            triangle: TriangleChannel::default(),
            noise: NoiseChannel::default(),
            dmc: DmcChannel::default(),
            frame_sequencer: FrameSequencer::default(),
            mixer: Mixer::default(),
            odd_cycle: false,
            sample_countdown: SAMPLE_INTERVAL,
            samples: Vec::with_capacity(2048),
            irq: InterruptLine::default(),
            dmc_fetches: 0,
        }
    }

    /// Power-on: only the frame interrupt is cleared.
    pub fn init(&mut self) {
        self.frame_sequencer.clear_irq();
        self.update_irq_line();
    }

    /// Console reset: both interrupt sources clear and every length counter
    /// comes back enabled.
    pub fn reset(&mut self) {
        self.frame_sequencer.clear_irq();
        self.pulse1.reset();
        self.pulse2.reset();
        self.triangle.reset();
        self.noise.reset();
        self.dmc.reset();
        self.update_irq_line();
    }

    pub fn write_register(&mut self, addr: u16, value: u8) {
        match addr {
            0x4000 => self.pulse1.write_control(value),
            0x4001 => self.pulse1.write_sweep(value),
            0x4002 => self.pulse1.write_fine_tune(value),
            0x4003 => self.pulse1.write_coarse_tune(value),

            0x4004 => self.pulse2.write_control(value),
            0x4005 => self.pulse2.write_sweep(value),
            0x4006 => self.pulse2.write_fine_tune(value),
            0x4007 => self.pulse2.write_coarse_tune(value),

            0x4008 => self.triangle.write_control(value),
            0x400A => self.triangle.write_fine_tune(value),
            0x400B => self.triangle.write_coarse_tune(value),

            0x400C => self.noise.write_control(value),
            0x400E => self.noise.write_period(value),
            0x400F => self.noise.write_length(value),

            0x4010 => self.dmc.write_control(value),
            0x4011 => self.dmc.write_direct_load(value),
            0x4012 => self.dmc.write_address(value),
            0x4013 => self.dmc.write_length(value),

            0x4015 => self.write_status(value),
            0x4017 => {
                let mask = self.frame_sequencer.write(value);
                self.apply_frame_clocks(mask);
                trace!(mode = ?self.frame_sequencer.mode(), "frame counter write");
            }
            _ => {}
        }
        self.update_irq_line();
    }

    /// $4015 read. Clears the frame interrupt as a side effect.
    pub fn read_status(&mut self) -> u8 {
        let status = self.peek_status();
        self.frame_sequencer.clear_irq();
        self.update_irq_line();
        status
    }

    pub fn peek_status(&self) -> u8 {
        let mut status = 0u8;
        if self.pulse1.length_count() > 0 {
            status |= 0x01;
        }
        if self.pulse2.length_count() > 0 {
            status |= 0x02;
        }
        if self.triangle.length_count() > 0 {
            status |= 0x04;
        }
        if self.noise.length_count() > 0 {
            status |= 0x08;
        }
        if self.dmc.is_active() {
            status |= 0x10;
        }
        if self.frame_sequencer.irq_flag() {
            status |= 0x40;
        }
        if self.dmc.irq_flag() {
            status |= 0x80;
        }
        status
    }

    fn write_status(&mut self, value: u8) {
        self.pulse1.set_enabled((value & 0x01) != 0);
        self.pulse2.set_enabled((value & 0x02) != 0);
        self.triangle.set_enabled((value & 0x04) != 0);
        self.noise.set_enabled((value & 0x08) != 0);
        self.dmc.set_enabled((value & 0x10) != 0);
    }

    pub fn irq_line(&self) -> &InterruptLine {
        &self.irq
    }

    pub fn dmc_fetches(&self) -> u64 {
        self.dmc_fetches
    }

    pub fn execute_cycles(&mut self, cycles: u32, memory: &mut impl DmcMemory) {
        for _ in 0..cycles {
            self.tick(memory);
        }
        self.update_irq_line();
    }

    pub fn tick(&mut self, memory: &mut impl DmcMemory) {
        self.triangle.clock_timer();
        if self.odd_cycle {
            self.pulse1.clock_timer();
            self.pulse2.clock_timer();
            self.noise.clock_timer();
        }
        self.odd_cycle = !self.odd_cycle;

        if let Some(addr) = self.dmc.pending_fetch() {
            let value = memory.dmc_read(addr);
            self.dmc.load_sample(value);
            self.dmc_fetches += 1;
        }
        self.dmc.clock_timer();

        let mask = self.frame_sequencer.clock();
        self.apply_frame_clocks(mask);

        self.sample_countdown -= 1;
        if self.sample_countdown == 0 {
            self.sample_countdown = SAMPLE_INTERVAL;
            let sample = self.mixer.mix(
                self.pulse1.output(),
                self.pulse2.output(),
                self.triangle.output(),
                self.noise.output(),
                self.dmc.output(),
            );
            self.samples.push(sample);
        }
    }

    fn apply_frame_clocks(&mut self, mask: u8) {
        if (mask & CLOCK_ENVELOPE) != 0 {
            self.pulse1.clock_envelope();
            self.pulse2.clock_envelope();
            self.noise.clock_envelope();
            self.triangle.clock_linear();
        }
        if (mask & CLOCK_LENGTH) != 0 {
            self.pulse1.clock_length_and_sweep();
            self.pulse2.clock_length_and_sweep();
            self.triangle.clock_length();
            self.noise.clock_length();
        }
    }

    fn update_irq_line(&mut self) {
        self.irq
            .set(self.frame_sequencer.irq_flag() || self.dmc.irq_flag());
    }

    pub fn take_samples(&mut self) -> Vec<i16> {
        std::mem::take(&mut self.samples)
    }

    pub fn pending_samples(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlatMemory(Vec<u8>);

    impl DmcMemory for FlatMemory {
        fn dmc_read(&mut self, addr: u16) -> u8 {
            self.0[addr as usize]
        }
    }

    fn memory() -> FlatMemory {
        FlatMemory(vec![0x55; 0x10000])
    }

    #[test]
    fn length_write_shows_in_status() {
        let mut apu = Apu::new();
        apu.write_register(0x4003, 0x18);
        assert_eq!(apu.read_status() & 0x01, 0x01);
        apu.write_register(0x4015, 0x00);
        assert_eq!(apu.read_status() & 0x1F, 0x00);
    }

    #[test]
    fn frame_irq_raises_line_and_status_read_acks() {
        let mut apu = Apu::new();
        let mut mem = memory();
        apu.execute_cycles(7458 * 4, &mut mem);
        assert!(apu.irq_line().is_raised());
        assert_eq!(apu.read_status() & 0x40, 0x40);
        assert!(!apu.irq_line().is_raised());
        assert_eq!(apu.peek_status() & 0x40, 0x00);
    }

    #[test]
    fn frame_counter_inhibit_acks_irq() {
        let mut apu = Apu::new();
        let mut mem = memory();
        apu.execute_cycles(7458 * 4, &mut mem);
        apu.write_register(0x4017, 0x40);
        assert!(!apu.irq_line().is_raised());
    }

    #[test]
    fn dmc_irq_is_cleared_by_status_write() {
        let mut apu = Apu::new();
        let mut mem = memory();
        apu.write_register(0x4010, 0x8F);
        apu.write_register(0x4013, 0x00);
        apu.write_register(0x4015, 0x10);
        apu.execute_cycles(1, &mut mem);
        assert_eq!(apu.dmc_fetches(), 1);
        assert!(apu.irq_line().is_raised());
        assert_eq!(apu.peek_status() & 0x80, 0x80);

        apu.write_register(0x4015, 0x00);
        assert!(!apu.irq_line().is_raised());
    }

    #[test]
    fn produces_one_sample_every_interval() {
        let mut apu = Apu::new();
        let mut mem = memory();
        apu.execute_cycles(SAMPLE_INTERVAL * 10 + 5, &mut mem);
        assert_eq!(apu.take_samples().len(), 10);
        assert_eq!(apu.pending_samples(), 0);
    }

    #[test]
    fn reset_reenables_length_counters() {
        let mut apu = Apu::new();
        apu.write_register(0x4015, 0x00);
        apu.write_register(0x4003, 0x18);
        assert_eq!(apu.peek_status() & 0x01, 0x00);
        apu.reset();
        apu.write_register(0x4003, 0x18);
        assert_eq!(apu.peek_status() & 0x01, 0x01);
    }

    #[test]
    fn length_counter_expires_on_half_frames() {
        let mut apu = Apu::new();
        let mut mem = memory();
        apu.write_register(0x4000, 0x10);
        apu.write_register(0x4003, 0x18);
        apu.execute_cycles(7458 * 2, &mut mem);
        assert_eq!(apu.peek_status() & 0x01, 0x01);
        apu.execute_cycles(7458 * 2, &mut mem);
        assert_eq!(apu.peek_status() & 0x01, 0x00);
    }

    #[test]
    fn five_step_write_clocks_length_once_then_quarter() {
        let mut apu = Apu::new();
        let mut mem = memory();
        apu.write_register(0x4003, 0x18);
        assert_eq!(apu.pulse1.length_count(), 2);

        apu.write_register(0x4017, 0x80);
        assert_eq!(apu.pulse1.length_count(), 1);

        apu.execute_cycles(7458, &mut mem);
        assert_eq!(apu.pulse1.length_count(), 1);

        apu.execute_cycles(7458, &mut mem);
        assert_eq!(apu.pulse1.length_count(), 0);
    }
}
