use super::devices::{
    Envelope, LengthCounter, LinearCounter, Sequencer, SweepNegate, SweepUnit, Timer,
};

static DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 1, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 0, 0, 0, 0, 0],
    [0, 1, 1, 1, 1, 0, 0, 0],
    [1, 0, 0, 1, 1, 1, 1, 1],
];

static TRIANGLE_TABLE: [u8; 32] = [
    15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11,
    12, 13, 14, 15,
];

// Noise periods in APU cycles (half the CPU rate).
const NOISE_PERIODS: [u16; 16] = [
    2, 4, 8, 16, 32, 48, 64, 80, 101, 127, 190, 254, 381, 508, 1017, 2034,
];

// DMC periods in CPU cycles.
const DMC_RATES: [u16; 16] = [
    428, 380, 340, 320, 286, 254, 226, 214, 190, 160, 142, 128, 106, 84, 72, 54,
];

#[derive(Debug, Clone)]
pub struct PulseChannel {
    envelope: Envelope,
    sweep: SweepUnit,
    raw_period: u16,
    timer: Timer,
    duty: Sequencer,
    length: LengthCounter,
}

impl PulseChannel {
    pub fn new(negate: SweepNegate) -> Self {
        Self {
            envelope: Envelope::default(),
            sweep: SweepUnit::new(negate),
            raw_period: 0,
            timer: Timer::new(1),
            duty: Sequencer::new(&DUTY_TABLE[0]),
            length: LengthCounter::default(),
        }
    }

    pub fn write_control(&mut self, value: u8) {
        self.duty.set_steps(&DUTY_TABLE[(value >> 6) as usize]);
        let looping = (value & 0x20) != 0;
        self.length.set_halted(looping);
        self.envelope
            .write(looping, (value & 0x10) != 0, value & 0x0F);
    }

    pub fn write_sweep(&mut self, value: u8) {
        self.sweep.write(value);
    }

    pub fn write_fine_tune(&mut self, value: u8) {
        self.set_raw_period((self.raw_period & 0x0700) | value as u16);
    }

    pub fn write_coarse_tune(&mut self, value: u8) {
        self.length.load(value >> 3);
        self.set_raw_period((self.raw_period & 0x00FF) | (((value & 0x07) as u16) << 8));
        self.duty.reset();
        self.envelope.restart();
    }

    fn set_raw_period(&mut self, period: u16) {
        self.raw_period = period & 0x07FF;
        self.timer.set_period(self.raw_period + 1);
    }

    pub fn raw_period(&self) -> u16 {
        self.raw_period
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.length.set_enabled(enabled);
    }

    pub fn length_count(&self) -> u8 {
        self.length.count()
    }

    /// Clocked once per APU cycle.
    pub fn clock_timer(&mut self) {
        if self.timer.clock() {
            self.duty.clock();
        }
    }

    pub fn clock_envelope(&mut self) {
        self.envelope.clock();
    }

    pub fn clock_length_and_sweep(&mut self) {
        self.length.clock();
        let status = self.sweep.clock(self.raw_period);
        if status.change_period {
            self.set_raw_period(status.new_period);
        }
    }

    pub fn output(&self) -> u8 {
        if self.length.count() == 0 || self.sweep.mutes(self.raw_period) {
            return 0;
        }
        match self.duty.current() {
            Some(1) => self.envelope.volume(),
            _ => 0,
        }
    }

    pub fn reset(&mut self) {
        self.length.reset();
        self.duty.reset();
    }
}

#[derive(Debug, Clone)]
pub struct TriangleChannel {
    linear: LinearCounter,
    raw_period: u16,
    timer: Timer,
    sequencer: Sequencer,
    length: LengthCounter,
}

impl Default for TriangleChannel {
    fn default() -> Self {
        Self {
            linear: LinearCounter::default(),
            raw_period: 0,
            timer: Timer::new(1),
            sequencer: Sequencer::new(&TRIANGLE_TABLE),
            length: LengthCounter::default(),
        }
    }
}

impl TriangleChannel {
    pub fn write_control(&mut self, value: u8) {
        let control = (value & 0x80) != 0;
        self.linear.set_control(control);
        self.linear.set_reload_value(value);
        self.length.set_halted(control);
    }

    pub fn write_fine_tune(&mut self, value: u8) {
        self.set_raw_period((self.raw_period & 0x0700) | value as u16);
    }

    pub fn write_coarse_tune(&mut self, value: u8) {
        self.length.load(value >> 3);
        self.set_raw_period((self.raw_period & 0x00FF) | (((value & 0x07) as u16) << 8));
        self.linear.request_reload();
    }

    fn set_raw_period(&mut self, period: u16) {
        self.raw_period = period & 0x07FF;
        self.timer.set_period(self.raw_period + 1);
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.length.set_enabled(enabled);
    }

    pub fn length_count(&self) -> u8 {
        self.length.count()
    }

    /// Clocked once per CPU cycle.
    pub fn clock_timer(&mut self) {
        if self.timer.clock() && self.length.count() > 0 && self.linear.count() > 0 {
            self.sequencer.clock();
        }
    }

    pub fn clock_linear(&mut self) {
        self.linear.clock();
    }

    pub fn clock_length(&mut self) {
        self.length.clock();
    }

    /// Holds the last step when silenced, as the DAC does.
    pub fn output(&self) -> u8 {
        self.sequencer.current().unwrap_or(0)
    }

    pub fn reset(&mut self) {
        self.length.reset();
        self.sequencer.reset();
    }
}

#[derive(Debug, Clone)]
pub struct NoiseChannel {
    envelope: Envelope,
    timer: Timer,
    length: LengthCounter,
    short_mode: bool,
    shift: u16,
}

impl Default for NoiseChannel {
    fn default() -> Self {
        Self {
            envelope: Envelope::default(),
            timer: Timer::new(NOISE_PERIODS[0]),
            length: LengthCounter::default(),
            short_mode: false,
            shift: 1,
        }
    }
}

impl NoiseChannel {
    pub fn write_control(&mut self, value: u8) {
        let looping = (value & 0x20) != 0;
        self.length.set_halted(looping);
        self.envelope
            .write(looping, (value & 0x10) != 0, value & 0x0F);
    }

    pub fn write_period(&mut self, value: u8) {
        self.short_mode = (value & 0x80) != 0;
        self.timer.set_period(NOISE_PERIODS[(value & 0x0F) as usize]);
    }

    pub fn write_length(&mut self, value: u8) {
        self.length.load(value >> 3);
        self.envelope.restart();
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.length.set_enabled(enabled);
    }

    pub fn length_count(&self) -> u8 {
        self.length.count()
    }

    /// Clocked once per APU cycle.
    pub fn clock_timer(&mut self) {
        if self.timer.clock() {
            let tap = if self.short_mode { 6 } else { 1 };
            let feedback = (self.shift ^ (self.shift >> tap)) & 0x01;
            self.shift = (self.shift >> 1) | (feedback << 14);
        }
    }

    pub fn clock_envelope(&mut self) {
        self.envelope.clock();
    }

    pub fn clock_length(&mut self) {
        self.length.clock();
    }

    pub fn output(&self) -> u8 {
        if self.length.count() == 0 || (self.shift & 0x01) != 0 {
            0
        } else {
            self.envelope.volume()
        }
    }

    pub fn reset(&mut self) {
        self.length.reset();
    }
}

/// Delta modulation channel. Sample bytes come from CPU memory; the APU
/// services `pending_fetch` through its memory hook.
#[derive(Debug, Clone)]
pub struct DmcChannel {
    irq_enabled: bool,
    looping: bool,
    timer: Timer,
    output_level: u8,
    sample_address: u16,
    sample_length: u16,
    current_address: u16,
    bytes_remaining: u16,
    sample_buffer: Option<u8>,
    shift: u8,
    bits_remaining: u8,
    silence: bool,
    irq_flag: bool,
}

impl Default for DmcChannel {
    fn default() -> Self {
        Self {
            irq_enabled: false,
            looping: false,
            timer: Timer::new(DMC_RATES[0]),
            output_level: 0,
            sample_address: 0xC000,
            sample_length: 1,
            current_address: 0xC000,
            bytes_remaining: 0,
            sample_buffer: None,
            shift: 0,
            bits_remaining: 8,
            silence: true,
            irq_flag: false,
        }
    }
}

impl DmcChannel {
    pub fn write_control(&mut self, value: u8) {
        self.irq_enabled = (value & 0x80) != 0;
        if !self.irq_enabled {
            self.irq_flag = false;
        }
        self.looping = (value & 0x40) != 0;
        self.timer.set_period(DMC_RATES[(value & 0x0F) as usize]);
    }

    pub fn write_direct_load(&mut self, value: u8) {
        self.output_level = value & 0x7F;
    }

    pub fn write_address(&mut self, value: u8) {
        self.sample_address = 0xC000 | ((value as u16) << 6);
    }

    pub fn write_length(&mut self, value: u8) {
        self.sample_length = ((value as u16) << 4) | 1;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.irq_flag = false;
        if !enabled {
            self.bytes_remaining = 0;
        } else if self.bytes_remaining == 0 {
            self.restart();
        }
    }

    fn restart(&mut self) {
        self.current_address = self.sample_address;
        self.bytes_remaining = self.sample_length;
    }

    pub fn is_active(&self) -> bool {
        self.bytes_remaining > 0
    }

    pub fn irq_flag(&self) -> bool {
        self.irq_flag
    }

    pub fn clear_irq(&mut self) {
        self.irq_flag = false;
    }

    /// Address of the next sample byte when the buffer needs a refill.
    pub fn pending_fetch(&self) -> Option<u16> {
        (self.sample_buffer.is_none() && self.bytes_remaining > 0).then_some(self.current_address)
    }

    pub fn load_sample(&mut self, value: u8) {
        self.sample_buffer = Some(value);
        self.current_address = if self.current_address == 0xFFFF {
            0x8000
        } else {
            self.current_address + 1
        };
        self.bytes_remaining -= 1;
        if self.bytes_remaining == 0 {
            if self.looping {
                self.restart();
            } else if self.irq_enabled {
                self.irq_flag = true;
            }
        }
    }

    /// Clocked once per CPU cycle.
    pub fn clock_timer(&mut self) {
        if !self.timer.clock() {
            return;
        }

        if !self.silence {
            if (self.shift & 0x01) != 0 {
                if self.output_level < 126 {
                    self.output_level += 2;
                }
            } else if self.output_level > 1 {
                self.output_level -= 2;
            }
        }
        self.shift >>= 1;

        self.bits_remaining -= 1;
        if self.bits_remaining == 0 {
            self.bits_remaining = 8;
            match self.sample_buffer.take() {
                Some(sample) => {
                    self.silence = false;
                    self.shift = sample;
                }
                None => self.silence = true,
            }
        }
    }

    pub fn output(&self) -> u8 {
        self.output_level
    }

    pub fn reset(&mut self) {
        self.irq_flag = false;
        self.bytes_remaining = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coarse_tune_loads_length() {
        let mut pulse = PulseChannel::new(SweepNegate::OnesComplement);
        pulse.write_coarse_tune(0x18);
        assert_eq!(pulse.length_count(), 2);
    }

    #[test]
    fn disabled_pulse_ignores_length_writes() {
        let mut pulse = PulseChannel::new(SweepNegate::OnesComplement);
        pulse.set_enabled(false);
        pulse.write_coarse_tune(0x18);
        assert_eq!(pulse.length_count(), 0);
    }

    #[test]
    fn pulse_sweep_rewrites_period() {
        let mut pulse = PulseChannel::new(SweepNegate::TwosComplement);
        pulse.write_fine_tune(0x00);
        pulse.write_coarse_tune(0x09);
        pulse.write_sweep(0x81);
        pulse.clock_length_and_sweep();
        assert_eq!(pulse.raw_period(), 0x180);
    }

    #[test]
    fn pulse_emits_constant_volume_on_high_duty_steps() {
        let mut pulse = PulseChannel::new(SweepNegate::OnesComplement);
        pulse.write_control(0xBC);
        pulse.write_fine_tune(0x40);
        pulse.write_coarse_tune(0x08);

        let mut levels = Vec::new();
        for _ in 0..(0x41 * 8) {
            pulse.clock_timer();
            levels.push(pulse.output());
        }
        assert!(levels.contains(&12));
        assert!(levels.contains(&0));
    }

    #[test]
    fn triangle_needs_both_counters() {
        let mut tri = TriangleChannel::default();
        tri.write_control(0x00);
        tri.write_fine_tune(0x10);
        tri.write_coarse_tune(0x08);
        for _ in 0..100 {
            tri.clock_timer();
        }
        assert_eq!(tri.output(), 0);

        tri.write_control(0x7F);
        tri.write_coarse_tune(0x08);
        tri.clock_linear();
        for _ in 0..(0x11 * 2) {
            tri.clock_timer();
        }
        assert_eq!(tri.output(), 14);
    }

    #[test]
    fn noise_shift_register_changes_output() {
        let mut noise = NoiseChannel::default();
        noise.write_control(0x1F);
        noise.write_period(0x00);
        noise.write_length(0x08);
        let mut seen = [false; 2];
        for _ in 0..64 {
            noise.clock_timer();
            seen[(noise.output() > 0) as usize] = true;
        }
        assert!(seen[0] && seen[1]);
    }

    #[test]
    fn dmc_fetches_and_raises_irq_at_end() {
        let mut dmc = DmcChannel::default();
        dmc.write_control(0x80);
        dmc.write_address(0x00);
        dmc.write_length(0x00);
        dmc.set_enabled(true);
        assert_eq!(dmc.pending_fetch(), Some(0xC000));
        dmc.load_sample(0xFF);
        assert!(!dmc.is_active());
        assert!(dmc.irq_flag());
        assert_eq!(dmc.pending_fetch(), None);
    }

    #[test]
    fn dmc_loop_restarts_without_irq() {
        let mut dmc = DmcChannel::default();
        dmc.write_control(0xC0);
        dmc.write_address(0x01);
        dmc.set_enabled(true);
        dmc.load_sample(0x00);
        assert!(dmc.is_active());
        assert!(!dmc.irq_flag());
        assert_eq!(dmc.current_address, 0xC040);
    }

    #[test]
    fn dmc_address_wraps_to_8000() {
        let mut dmc = DmcChannel::default();
        dmc.write_address(0xFF);
        dmc.write_length(0x10);
        dmc.set_enabled(true);
        for _ in 0..0x40 {
            dmc.load_sample(0);
            dmc.sample_buffer = None;
        }
        assert_eq!(dmc.pending_fetch(), Some(0x8000));
    }

    #[test]
    fn dmc_output_stays_in_range() {
        let mut dmc = DmcChannel::default();
        dmc.write_control(0x0F);
        dmc.write_direct_load(0x7F);
        dmc.write_length(0x01);
        dmc.set_enabled(true);
        for _ in 0..200 {
            if dmc.pending_fetch().is_some() {
                dmc.load_sample(0xFF);
            }
            dmc.clock_timer();
            assert!(dmc.output() <= 127);
        }
        assert!(dmc.output() >= 126);
    }
}
