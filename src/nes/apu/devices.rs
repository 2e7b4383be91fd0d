//! Building blocks shared by the sound channels.

const LENGTH_TABLE: [u8; 32] = [
    10, 254, 20, 2, 40, 4, 80, 6, 160, 8, 60, 10, 14, 12, 26, 14, 12, 16, 24, 18, 48, 20, 96, 22,
    192, 24, 72, 26, 16, 28, 32, 30,
];

/// Emits one output clock every `period` input clocks. A period of zero never fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Divider {
    period: u16,
    counter: u16,
}

impl Divider {
    pub fn new(period: u16) -> Self {
        Self {
            period,
            counter: period,
        }
    }

    pub fn period(&self) -> u16 {
        self.period
    }

    /// Does not touch the running count.
    pub fn set_period(&mut self, period: u16) {
        self.period = period;
    }

    pub fn clock(&mut self) -> bool {
        if self.period == 0 {
            return false;
        }
        if self.counter <= 1 {
            self.counter = self.period;
            true
        } else {
            self.counter -= 1;
            false
        }
    }

    /// Reloads the count without producing an output clock.
    pub fn reset(&mut self) {
        self.counter = self.period;
    }
}

/// Channel timer. Unlike a bare divider, an idle timer picks up a new period immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    divider: Divider,
}

impl Timer {
    pub fn new(period: u16) -> Self {
        Self {
            divider: Divider::new(period),
        }
    }

    pub fn set_period(&mut self, period: u16) {
        self.divider.period = period;
        if self.divider.counter == 0 {
            self.divider.counter = period;
        }
    }

    pub fn period(&self) -> u16 {
        self.divider.period
    }

    pub fn clock(&mut self) -> bool {
        self.divider.clock()
    }
}

/// Steps through a fixed table, one entry per clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sequencer {
    steps: &'static [u8],
    position: usize,
    current: Option<u8>,
}

impl Sequencer {
    pub fn new(steps: &'static [u8]) -> Self {
        Self {
            steps,
            position: 0,
            current: None,
        }
    }

    pub fn set_steps(&mut self, steps: &'static [u8]) {
        self.steps = steps;
        if self.position >= steps.len() {
            self.position = 0;
        }
    }

    pub fn clock(&mut self) -> Option<u8> {
        let value = *self.steps.get(self.position)?;
        self.current = Some(value);
        self.position = (self.position + 1) % self.steps.len();
        self.current
    }

    pub fn current(&self) -> Option<u8> {
        self.current
    }

    pub fn reset(&mut self) {
        self.position = 0;
        self.current = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthCounter {
    count: u8,
    halted: bool,
    enabled: bool,
}

impl Default for LengthCounter {
    fn default() -> Self {
        Self {
            count: 0,
            halted: false,
            enabled: true,
        }
    }
}

impl LengthCounter {
    pub fn set_halted(&mut self, halted: bool) {
        self.halted = halted;
    }

    /// Disabling forces the count to zero and keeps it there.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.count = 0;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn load(&mut self, key: u8) {
        if self.enabled {
            self.count = LENGTH_TABLE[(key & 0x1F) as usize];
        }
    }

    pub fn clock(&mut self) {
        if !self.halted && self.count > 0 {
            self.count -= 1;
        }
    }

    pub fn count(&self) -> u8 {
        self.count
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinearCounter {
    control: bool,
    reload_value: u8,
    reload: bool,
    count: u8,
}

impl LinearCounter {
    pub fn set_control(&mut self, control: bool) {
        self.control = control;
    }

    pub fn set_reload_value(&mut self, value: u8) {
        self.reload_value = value & 0x7F;
    }

    pub fn request_reload(&mut self) {
        self.reload = true;
    }

    pub fn clock(&mut self) {
        if self.reload {
            self.count = self.reload_value;
        } else if self.count > 0 {
            self.count -= 1;
        }
        if !self.control {
            self.reload = false;
        }
    }

    pub fn count(&self) -> u8 {
        self.count
    }
}

/// Volume envelope: either a constant level or a looping/one-shot decay from 15.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    looping: bool,
    constant: bool,
    volume: u8,
    divider: Divider,
    level: u8,
    start: bool,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            looping: false,
            constant: false,
            volume: 0,
            divider: Divider::new(0),
            level: 0,
            start: false,
        }
    }
}

impl Envelope {
    pub fn write(&mut self, looping: bool, constant: bool, volume: u8) {
        self.looping = looping;
        self.constant = constant;
        self.volume = volume & 0x0F;
        self.divider.set_period(self.volume as u16 + 1);
    }

    pub fn restart(&mut self) {
        self.start = true;
    }

    pub fn clock(&mut self) {
        if self.start {
            self.start = false;
            self.level = 15;
            self.divider.reset();
            return;
        }

        if self.divider.clock() {
            if self.level > 0 {
                self.level -= 1;
            } else if self.looping {
                self.level = 15;
            }
        }
    }

    pub fn volume(&self) -> u8 {
        if self.constant {
            self.volume
        } else {
            self.level
        }
    }
}

/// How the sweep unit negates the period change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepNegate {
    /// Pulse 1: `period - change - 1`.
    OnesComplement,
    /// Pulse 2: `period - change`, one more than pulse 1.
    TwosComplement,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStatus {
    pub change_period: bool,
    pub new_period: u16,
    pub silence: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepUnit {
    negate: SweepNegate,
    enabled: bool,
    decrease: bool,
    shift: u8,
    divider: Divider,
    reload: bool,
    status: SweepStatus,
}

impl SweepUnit {
    pub fn new(negate: SweepNegate) -> Self {
        Self {
            negate,
            enabled: false,
            decrease: false,
            shift: 0,
            divider: Divider::new(1),
            reload: false,
            status: SweepStatus::default(),
        }
    }

    pub fn write(&mut self, value: u8) {
        self.configure(
            (value & 0x80) != 0,
            (value >> 4) & 0x07,
            (value & 0x08) != 0,
            value & 0x07,
        );
    }

    pub fn configure(&mut self, enabled: bool, period: u8, decrease: bool, shift: u8) {
        self.enabled = enabled;
        self.divider.set_period(period as u16 + 1);
        self.decrease = decrease;
        self.shift = shift & 0x07;
        self.reload = true;
    }

    pub fn target_period(&self, period: u16) -> u16 {
        let change = period >> self.shift;
        if !self.decrease {
            return period + change;
        }
        match self.negate {
            SweepNegate::OnesComplement => period.saturating_sub(change + 1),
            SweepNegate::TwosComplement => period.saturating_sub(change),
        }
    }

    /// Muting applies continuously, whether or not the divider fires.
    pub fn mutes(&self, period: u16) -> bool {
        period < 8 || self.target_period(period) > 0x07FF
    }

    pub fn clock(&mut self, period: u16) -> SweepStatus {
        if self.reload {
            self.divider.reset();
            self.reload = false;
        }
        let fire = self.divider.clock();

        self.status = SweepStatus::default();
        if self.mutes(period) {
            self.status.silence = true;
        } else if fire && self.enabled && self.shift > 0 {
            self.status.change_period = true;
            self.status.new_period = self.target_period(period);
        }
        self.status
    }

    pub fn status(&self) -> SweepStatus {
        self.status
    }
}
