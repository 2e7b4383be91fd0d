pub const BUTTON_A: u8 = 0x01;
pub const BUTTON_B: u8 = 0x02;
pub const BUTTON_SELECT: u8 = 0x04;
pub const BUTTON_START: u8 = 0x08;
pub const BUTTON_UP: u8 = 0x10;
pub const BUTTON_DOWN: u8 = 0x20;
pub const BUTTON_LEFT: u8 = 0x40;
pub const BUTTON_RIGHT: u8 = 0x80;

/// Standard pad: a live button byte, a per-frame snapshot, and the 8-bit
/// shift register the CPU clocks out through $4016/$4017.
#[derive(Debug, Clone, Default)]
pub struct StandardController {
    live: u8,
    captured: u8,
    shift: u8,
    strobe: bool,
}

impl StandardController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&mut self, buttons: u8) {
        self.live |= buttons;
    }

    pub fn release(&mut self, buttons: u8) {
        self.live &= !buttons;
    }

    pub fn set_buttons(&mut self, buttons: u8) {
        self.live = buttons;
    }

    pub fn buttons(&self) -> u8 {
        self.live
    }

    /// Samples the live buttons. Called once per frame so a mid-read
    /// change never tears the serial stream.
    pub fn capture_state(&mut self) {
        self.captured = self.live;
        if self.strobe {
            self.shift = self.captured;
        }
    }

    pub fn write(&mut self, value: u8) {
        self.strobe = (value & 0x01) != 0;
        if self.strobe {
            self.shift = self.captured;
        }
    }

    pub fn read(&mut self) -> u8 {
        let bit = if self.strobe {
            self.captured & 0x01
        } else {
            let out = self.shift & 0x01;
            self.shift = (self.shift >> 1) | 0x80;
            out
        };
        0x40 | bit
    }
}
