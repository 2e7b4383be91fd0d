pub mod apu;
pub mod bus;
pub mod cartridge;
pub mod controller;
pub mod cpu;
pub mod driver;
pub mod interrupt;
pub mod mapper;
mod palette;
pub mod ppu;
pub mod trace;

use std::collections::VecDeque;
use std::path::Path;

use tracing::{debug, info, warn};

use bus::Bus;
use cartridge::{Cartridge, RomError};
use controller::StandardController;
use cpu::{Cpu, FLAG_INTERRUPT};
use interrupt::Interrupt;
use mapper::{Mapper, create_mapper, mapper_name};
use ppu::PpuDebugCounters;
use trace::TraceLine;

pub use controller::{
    BUTTON_A, BUTTON_B, BUTTON_DOWN, BUTTON_LEFT, BUTTON_RIGHT, BUTTON_SELECT, BUTTON_START,
    BUTTON_UP,
};

const MAX_DEBUG_EVENTS: usize = 512;
// A frame is about 30k instructions; this only trips on a wedged PPU.
const FRAME_STEP_GUARD: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, Default)]
pub struct MachineCounters {
    pub frames: u64,
    pub cpu_instructions: u64,
    pub cpu_cycles: u64,
    pub nmi_serviced: u64,
    pub irq_serviced: u64,
    pub resets: u64,
    pub oam_dma_transfers: u64,
    pub dmc_fetches: u64,
}

/// The whole console: CPU plus everything behind its bus. Devices never
/// hold references to each other; interrupt lines are sampled here after
/// every step and forwarded to the CPU.
pub struct Machine {
    cpu: Cpu,
    bus: Bus,
    mapper_label: String,
    has_battery: bool,
    counters: MachineCounters,
    debug_events: VecDeque<String>,
}

impl Machine {
    /// Power-on state. The first `step` runs the CPU reset sequence.
    pub fn new(mapper: Box<dyn Mapper>, decimal_mode: bool) -> Self {
        let has_battery = mapper.memory().has_battery();
        let mapper_label = mapper.name().to_string();
        let mut machine = Self {
            cpu: Cpu::new(decimal_mode),
            bus: Bus::new(mapper),
            mapper_label,
            has_battery,
            counters: MachineCounters::default(),
            debug_events: VecDeque::with_capacity(MAX_DEBUG_EVENTS),
        };
        machine.push_debug_event(format!("power on, mapper {}", machine.mapper_label));
        machine
    }

    pub fn from_cartridge(cart: Cartridge, decimal_mode: bool) -> Result<Self, RomError> {
        let number = cart.mapper_number;
        let label = format!("{} (mapper {number})", mapper_name(number));
        let mapper = create_mapper(cart)?;
        let mut machine = Self::new(mapper, decimal_mode);
        machine.mapper_label = label;
        info!(mapper = %machine.mapper_label, "cartridge loaded");
        Ok(machine)
    }

    pub fn from_rom_bytes(bytes: &[u8], decimal_mode: bool) -> Result<Self, RomError> {
        Self::from_cartridge(Cartridge::from_bytes(bytes)?, decimal_mode)
    }

    pub fn from_rom_file(path: &Path, decimal_mode: bool) -> Result<Self, RomError> {
        Self::from_cartridge(Cartridge::from_file(path)?, decimal_mode)
    }

    /// Console reset button: the CPU takes a Reset interrupt on its next
    /// step, PPU and APU soft-reset now. RAM and cartridge RAM persist.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.bus.reset();
        self.counters.resets += 1;
        self.push_debug_event("reset requested");
        info!("machine reset");
    }

    /// Executes one instruction (or interrupt entry), then clocks the APU
    /// and PPU for the same number of cycles. Returns the CPU cycles used.
    pub fn step(&mut self) -> u32 {
        let pending = self.cpu.pending_interrupt();
        let irq_masked = self.cpu.flag(FLAG_INTERRUPT);
        let was_jammed = self.cpu.is_jammed();

        self.bus.set_cpu_cycles(self.cpu.total_cycles());
        let cycles = self.cpu.execute_op(&mut self.bus);
        self.bus.clock_devices(cycles);

        self.counters.cpu_instructions += 1;
        self.counters.cpu_cycles += cycles as u64;
        match pending {
            Some(Interrupt::Nmi) if !was_jammed => {
                self.counters.nmi_serviced += 1;
                debug!(pc = format_args!("{:04X}", self.cpu.pc), "nmi serviced");
            }
            Some(Interrupt::Irq) if !irq_masked && !was_jammed => {
                self.counters.irq_serviced += 1;
                debug!(pc = format_args!("{:04X}", self.cpu.pc), "irq serviced");
            }
            Some(Interrupt::Reset) => {
                self.push_debug_event(format!("CPU reset, PC=${:04X}", self.cpu.pc));
            }
            _ => {}
        }
        if !was_jammed && self.cpu.is_jammed() {
            self.push_debug_event(format!("CPU jammed at ${:04X}", self.cpu.pc));
        }

        if self.bus.ppu_mut().take_nmi() {
            self.cpu.nmi();
            let (scanline, cycle) = self.bus.ppu().debug_scanline_cycle();
            self.push_debug_event(format!("NMI edge at scanline {scanline} cycle {cycle}"));
        }
        if self.bus.irq_asserted() {
            self.cpu.irq();
        }

        cycles
    }

    /// Steps until at least `budget` CPU cycles have run and returns how
    /// many actually did; the overshoot is at most one instruction.
    pub fn run_cycles(&mut self, budget: u64) -> u64 {
        let mut ran = 0u64;
        while ran < budget {
            ran += self.step() as u64;
        }
        ran
    }

    /// Runs until the PPU finishes a frame. Controllers are sampled once at
    /// the start.
    pub fn run_frame(&mut self) {
        self.capture_input();
        self.bus.ppu_mut().clear_frame_complete();

        let mut steps = 0u64;
        while !self.bus.ppu().frame_complete() {
            self.step();
            steps += 1;
            if steps > FRAME_STEP_GUARD {
                warn!(steps, "frame guard tripped");
                self.push_debug_event(format!("frame guard tripped after {steps} steps"));
                break;
            }
        }
        self.bus.ppu_mut().clear_frame_complete();
        self.counters.frames += 1;
    }

    /// True once per finished frame; clears the flag.
    pub fn take_frame_complete(&mut self) -> bool {
        if self.bus.ppu().frame_complete() {
            self.bus.ppu_mut().clear_frame_complete();
            self.counters.frames += 1;
            true
        } else {
            false
        }
    }

    pub fn capture_input(&mut self) {
        self.bus.controller_mut(0).capture_state();
        self.bus.controller_mut(1).capture_state();
    }

    pub fn controller_mut(&mut self, port: usize) -> &mut StandardController {
        self.bus.controller_mut(port)
    }

    pub fn frame_buffer(&self) -> &[u8] {
        self.bus.ppu().frame_buffer()
    }

    pub fn take_audio_samples(&mut self) -> Vec<i16> {
        self.bus.apu_mut().take_samples()
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    pub fn mapper_label(&self) -> &str {
        &self.mapper_label
    }

    pub fn trace_line(&self) -> TraceLine {
        TraceLine::from_cpu(&self.cpu)
    }

    /// PRG RAM contents when the cartridge keeps them across power cycles.
    pub fn battery_ram(&self) -> Option<&[u8]> {
        self.has_battery
            .then(|| self.bus.mapper().memory().prg_ram())
    }

    pub fn load_battery_ram(&mut self, data: &[u8]) {
        if self.has_battery {
            self.bus.mapper_mut().memory_mut().load_prg_ram(data);
            self.push_debug_event(format!("battery RAM restored ({} bytes)", data.len()));
        }
    }

    pub fn counters(&self) -> MachineCounters {
        let bus = self.bus.counters();
        MachineCounters {
            oam_dma_transfers: bus.oam_dma_transfers,
            dmc_fetches: self.bus.apu().dmc_fetches(),
            ..self.counters
        }
    }

    pub fn ppu_counters(&self) -> PpuDebugCounters {
        self.bus.ppu().debug_counters()
    }

    pub fn debug_mapper_state(&self) -> String {
        let state = self.bus.mapper().debug_state();
        if state.is_empty() {
            self.mapper_label.clone()
        } else {
            state
        }
    }

    /// Newest first.
    pub fn debug_recent_events(&self, limit: usize) -> Vec<String> {
        self.debug_events.iter().rev().take(limit).cloned().collect()
    }

    fn push_debug_event<S: Into<String>>(&mut self, event: S) {
        if self.debug_events.len() >= MAX_DEBUG_EVENTS {
            self.debug_events.pop_front();
        }
        self.debug_events.push_back(event.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nes::cpu::CpuBus;
    use crate::nes::mapper::NameTableMirroring;

    /// NROM-256 image with `program` at $8000 and vectors pointing into it.
    fn machine_with(program: &[u8], nmi_handler: &[u8], has_battery: bool) -> Machine {
        let mut prg_rom = vec![0xEAu8; 0x8000];
        prg_rom[..program.len()].copy_from_slice(program);
        prg_rom[0x1000..0x1000 + nmi_handler.len()].copy_from_slice(nmi_handler);
        // NMI -> $9000, RESET -> $8000, IRQ -> $9000
        prg_rom[0x7FFA..].copy_from_slice(&[0x00, 0x90, 0x00, 0x80, 0x00, 0x90]);
        let cart = Cartridge {
            mapper_number: 0,
            mirroring: NameTableMirroring::Vertical,
            has_battery,
            prg_rom,
            chr_rom: vec![0; 0x2000],
            chr_ram_size: 0,
            prg_ram_size: 0x2000,
            trainer: None,
        };
        Machine::from_cartridge(cart, false).unwrap()
    }

    #[test]
    fn first_step_runs_reset_sequence() {
        let mut machine = machine_with(&[], &[], false);
        assert_eq!(machine.step(), 7);
        assert_eq!(machine.cpu().pc, 0x8000);
        assert_eq!(machine.ppu_counters().ticks, 21);
        assert_eq!(machine.debug_recent_events(1)[0], "CPU reset, PC=$8000");
    }

    #[test]
    fn run_cycles_stops_after_budget() {
        let mut machine = machine_with(&[], &[], false);
        let ran = machine.run_cycles(100);
        assert!((100..102).contains(&ran));
        assert_eq!(machine.counters().cpu_cycles, ran);
    }

    #[test]
    fn vblank_nmi_reaches_handler() {
        // LDA #$80 ; STA $2000 ; loop: JMP loop
        let program = [0xA9, 0x80, 0x8D, 0x00, 0x20, 0x4C, 0x05, 0x80];
        // INC $10 ; RTI
        let handler = [0xE6, 0x10, 0x40];
        let mut machine = machine_with(&program, &handler, false);
        machine.run_frame();
        machine.run_frame();
        let counters = machine.counters();
        assert!(counters.nmi_serviced >= 1);
        assert_eq!(counters.frames, 2);
        assert_eq!(machine.bus().peek(0x0010) as u64, counters.nmi_serviced);
    }

    #[test]
    fn frame_is_one_ppu_frame_of_cycles() {
        let mut machine = machine_with(&[0x4C, 0x00, 0x80], &[], false);
        machine.run_frame();
        let start = machine.counters().cpu_cycles;
        machine.run_frame();
        let per_frame = machine.counters().cpu_cycles - start;
        // 89342 dots / 3, give or take one instruction.
        assert!((29775..=29790).contains(&per_frame), "{per_frame}");
    }

    #[test]
    fn reset_reenters_through_vector() {
        // LDX #$05 ; STX $0300 ; JMP $8005
        let program = [0xA2, 0x05, 0x8E, 0x00, 0x03, 0x4C, 0x05, 0x80];
        let mut machine = machine_with(&program, &[], false);
        machine.run_cycles(200);
        assert_eq!(machine.bus().peek(0x0300), 0x05);

        machine.reset();
        assert_eq!(machine.step(), 7);
        assert_eq!(machine.cpu().pc, 0x8000);
        assert_eq!(machine.cpu().x, 0);
        assert_eq!(machine.bus().peek(0x0300), 0x05);
        assert_eq!(machine.counters().resets, 1);
    }

    #[test]
    fn battery_ram_only_for_battery_boards() {
        let mut plain = machine_with(&[], &[], false);
        assert!(plain.battery_ram().is_none());
        plain.load_battery_ram(&[1, 2, 3]);

        let mut backed = machine_with(&[], &[], true);
        backed.load_battery_ram(&[1, 2, 3]);
        let ram = backed.battery_ram().unwrap();
        assert_eq!(&ram[..3], &[1, 2, 3]);
        assert_eq!(ram.len(), 0x2000);
    }

    #[test]
    fn apu_frame_irq_is_serviced_when_unmasked() {
        // CLI ; loop: JMP loop
        let program = [0x58, 0x4C, 0x01, 0x80];
        // LDA $4015 ; RTI
        let handler = [0xAD, 0x15, 0x40, 0x40];
        let mut machine = machine_with(&program, &handler, false);
        machine.run_cycles(7458 * 4 + 400);
        assert!(machine.counters().irq_serviced >= 1);
    }

    #[test]
    fn debug_ring_is_bounded() {
        let mut machine = machine_with(&[], &[], false);
        for i in 0..(MAX_DEBUG_EVENTS + 10) {
            machine.push_debug_event(format!("event {i}"));
        }
        let events = machine.debug_recent_events(usize::MAX);
        assert_eq!(events.len(), MAX_DEBUG_EVENTS);
        assert_eq!(events[0], format!("event {}", MAX_DEBUG_EVENTS + 9));
    }

    #[test]
    fn ines_image_maps_prg_into_cpu_space() {
        let mut rom = vec![b'N', b'E', b'S', 0x1A, 1, 1, 0x00, 0x00];
        rom.resize(16, 0);
        let mut prg: Vec<u8> = (0..0x4000u32).map(|i| (i * 7 + 3) as u8).collect();
        // RESET -> $8000
        prg[0x3FFC] = 0x00;
        prg[0x3FFD] = 0x80;
        rom.extend_from_slice(&prg);
        rom.extend(std::iter::repeat_n(0u8, 0x2000));

        let mut machine = Machine::from_rom_bytes(&rom, false).unwrap();
        assert_eq!(machine.mapper_label(), "NROM (mapper 0)");

        let bus = machine.bus_mut();
        assert_eq!(bus.read(0x8000), prg[0]);
        assert_eq!(bus.read(0x8123), prg[0x123]);
        // 16 KB boards mirror into $C000.
        assert_eq!(bus.read(0xC000), prg[0]);
        assert_eq!(bus.read(0xFFFC), 0x00);
        assert_eq!(bus.peek(0xC123), prg[0x123]);

        assert_eq!(machine.step(), 7);
        assert_eq!(machine.cpu().pc, 0x8000);
    }
}
