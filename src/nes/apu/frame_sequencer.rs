use super::devices::{Divider, Sequencer};

// Per-step clock masks.
pub const CLOCK_ENVELOPE: u8 = 0x01;
pub const CLOCK_LENGTH: u8 = 0x02;
pub const CLOCK_IRQ: u8 = 0x04;

const QUARTER: u8 = CLOCK_ENVELOPE;
const HALF: u8 = CLOCK_ENVELOPE | CLOCK_LENGTH;

static FOUR_STEP: [u8; 4] = [QUARTER, HALF, QUARTER, HALF | CLOCK_IRQ];
static FIVE_STEP: [u8; 5] = [HALF, QUARTER, HALF, QUARTER, 0];

// Quarter-frame interval in CPU cycles.
const STEP_CYCLES: u16 = 7458;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    FourStep,
    FiveStep,
}

/// Drives the quarter/half-frame clocks. Returns masks instead of touching
/// channels so the APU decides how each clock fans out.
#[derive(Debug, Clone)]
pub struct FrameSequencer {
    divider: Divider,
    sequencer: Sequencer,
    mode: FrameMode,
    irq_inhibit: bool,
    irq_flag: bool,
}

impl Default for FrameSequencer {
    fn default() -> Self {
        Self {
            divider: Divider::new(STEP_CYCLES),
            sequencer: Sequencer::new(&FOUR_STEP),
            mode: FrameMode::FourStep,
            irq_inhibit: false,
            irq_flag: false,
        }
    }
}

impl FrameSequencer {
    /// $4017. A five-step write runs the first sequence step immediately,
    /// so the next divider step starts from the second entry.
    pub fn write(&mut self, value: u8) -> u8 {
        self.irq_inhibit = (value & 0x40) != 0;
        if self.irq_inhibit {
            self.irq_flag = false;
        }

        self.mode = if (value & 0x80) != 0 {
            FrameMode::FiveStep
        } else {
            FrameMode::FourStep
        };
        self.sequencer.set_steps(match self.mode {
            FrameMode::FourStep => &FOUR_STEP,
            FrameMode::FiveStep => &FIVE_STEP,
        });
        self.sequencer.reset();
        self.divider.reset();

        match self.mode {
            FrameMode::FiveStep => self.sequencer.clock().unwrap_or(0),
            FrameMode::FourStep => 0,
        }
    }

    /// Clocked once per CPU cycle.
    pub fn clock(&mut self) -> u8 {
        if !self.divider.clock() {
            return 0;
        }
        let mask = self.sequencer.clock().unwrap_or(0);
        if (mask & CLOCK_IRQ) != 0 && !self.irq_inhibit {
            self.irq_flag = true;
        }
        mask
    }

    pub fn mode(&self) -> FrameMode {
        self.mode
    }

    pub fn irq_flag(&self) -> bool {
        self.irq_flag
    }

    pub fn clear_irq(&mut self) {
        self.irq_flag = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(seq: &mut FrameSequencer, cycles: u32) -> Vec<u8> {
        (0..cycles).map(|_| seq.clock()).filter(|&m| m != 0).collect()
    }

    #[test]
    fn four_step_raises_irq_on_last_step() {
        let mut seq = FrameSequencer::default();
        let masks = run(&mut seq, STEP_CYCLES as u32 * 4);
        assert_eq!(masks, vec![QUARTER, HALF, QUARTER, HALF | CLOCK_IRQ]);
        assert!(seq.irq_flag());
        seq.clear_irq();
        assert!(!seq.irq_flag());
    }

    #[test]
    fn inhibit_blocks_and_clears_irq() {
        let mut seq = FrameSequencer::default();
        run(&mut seq, STEP_CYCLES as u32 * 4);
        assert!(seq.irq_flag());
        seq.write(0x40);
        assert!(!seq.irq_flag());
        run(&mut seq, STEP_CYCLES as u32 * 4);
        assert!(!seq.irq_flag());
    }

    #[test]
    fn five_step_clocks_immediately_and_never_interrupts() {
        let mut seq = FrameSequencer::default();
        assert_eq!(seq.write(0x80), HALF);
        assert_eq!(seq.mode(), FrameMode::FiveStep);
        let masks: Vec<u8> = (0..STEP_CYCLES as u32 * 5)
            .map(|_| seq.clock())
            .enumerate()
            .filter(|&(cycle, _)| (cycle as u32 + 1) % STEP_CYCLES as u32 == 0)
            .map(|(_, mask)| mask)
            .collect();
        assert_eq!(masks, vec![QUARTER, HALF, QUARTER, 0, HALF]);
        assert!(!seq.irq_flag());
    }

    #[test]
    fn five_step_write_never_repeats_a_half_frame() {
        let mut seq = FrameSequencer::default();
        assert_eq!(seq.write(0x80), HALF);
        assert_eq!(run(&mut seq, STEP_CYCLES as u32), vec![QUARTER]);
        assert_eq!(run(&mut seq, STEP_CYCLES as u32), vec![HALF]);
    }
}
