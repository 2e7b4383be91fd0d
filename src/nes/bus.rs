use tracing::debug;

use super::apu::{Apu, DmcMemory};
use super::controller::StandardController;
use super::cpu::CpuBus;
use super::mapper::Mapper;
use super::ppu::Ppu;

const RAM_SIZE: usize = 0x0800;
const OAM_DMA_CYCLES: u32 = 513;

#[derive(Debug, Clone, Copy, Default)]
pub struct BusCounters {
    pub cpu_reads: u64,
    pub cpu_writes: u64,
    pub ppu_register_reads: u64,
    pub ppu_register_writes: u64,
    pub apu_io_reads: u64,
    pub apu_io_writes: u64,
    pub cart_reads: u64,
    pub cart_writes: u64,
    pub oam_dma_transfers: u64,
    pub last_write_addr: u16,
    pub last_write_value: u8,
}

/// CPU address decoder. Owns console RAM and every device the CPU can reach.
pub struct Bus {
    ram: [u8; RAM_SIZE],
    ppu: Ppu,
    apu: Apu,
    mapper: Box<dyn Mapper>,
    controllers: [StandardController; 2],
    cpu_cycles: u64,
    counters: BusCounters,
}

/// DMC sample fetches see console RAM and the cartridge only.
struct DmcView<'a> {
    ram: &'a [u8; RAM_SIZE],
    mapper: &'a mut dyn Mapper,
}

impl DmcMemory for DmcView<'_> {
    fn dmc_read(&mut self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x1FFF => self.ram[addr as usize & (RAM_SIZE - 1)],
            0x4020..=0xFFFF => self.mapper.read_prg(addr),
            _ => 0,
        }
    }
}

impl Bus {
    pub fn new(mapper: Box<dyn Mapper>) -> Self {
        let mut apu = Apu::new();
        apu.init();
        Self {
            ram: [0; RAM_SIZE],
            ppu: Ppu::new(),
            apu,
            mapper,
            controllers: [StandardController::new(), StandardController::new()],
            cpu_cycles: 0,
            counters: BusCounters::default(),
        }
    }

    /// Console reset line. RAM and cartridge state survive.
    pub fn reset(&mut self) {
        self.ppu.reset();
        self.apu.reset();
    }

    pub fn ppu(&self) -> &Ppu {
        &self.ppu
    }

    pub fn ppu_mut(&mut self) -> &mut Ppu {
        &mut self.ppu
    }

    pub fn apu(&self) -> &Apu {
        &self.apu
    }

    pub fn apu_mut(&mut self) -> &mut Apu {
        &mut self.apu
    }

    pub fn mapper(&self) -> &dyn Mapper {
        self.mapper.as_ref()
    }

    pub fn mapper_mut(&mut self) -> &mut dyn Mapper {
        self.mapper.as_mut()
    }

    pub fn controller(&self, port: usize) -> &StandardController {
        &self.controllers[port & 1]
    }

    pub fn controller_mut(&mut self, port: usize) -> &mut StandardController {
        &mut self.controllers[port & 1]
    }

    pub fn counters(&self) -> BusCounters {
        self.counters
    }

    /// CPU cycle count at the start of the current instruction; used for
    /// OAM DMA alignment.
    pub fn set_cpu_cycles(&mut self, cycles: u64) {
        self.cpu_cycles = cycles;
    }

    /// Side-effect free read for debuggers and trace output. I/O registers
    /// read as zero.
    pub fn peek(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x1FFF => self.ram[addr as usize & (RAM_SIZE - 1)],
            0x4020..=0xFFFF => self.mapper.memory().read_prg(addr),
            _ => 0,
        }
    }

    /// Advances the APU by `cpu_cycles` and the PPU by three times as many dots.
    pub fn clock_devices(&mut self, cpu_cycles: u32) {
        let mut view = DmcView {
            ram: &self.ram,
            mapper: self.mapper.as_mut(),
        };
        self.apu.execute_cycles(cpu_cycles, &mut view);
        for _ in 0..cpu_cycles * 3 {
            self.ppu.tick(self.mapper.as_mut());
        }
    }

    pub fn irq_asserted(&self) -> bool {
        self.apu.irq_line().is_raised()
            || self
                .mapper
                .irq_line()
                .is_some_and(|line| line.is_raised())
    }

    fn oam_dma(&mut self, page: u8) -> u32 {
        let base = (page as u16) << 8;
        let mut bytes = [0u8; 256];
        for (offset, slot) in bytes.iter_mut().enumerate() {
            *slot = self.read(base.wrapping_add(offset as u16));
        }
        self.ppu.write_oam_dma(&bytes);
        self.counters.oam_dma_transfers += 1;

        let stall = OAM_DMA_CYCLES + (self.cpu_cycles & 1) as u32;
        debug!(page = format_args!("{page:02X}"), stall, "oam dma");
        stall
    }
}

impl CpuBus for Bus {
    fn read(&mut self, addr: u16) -> u8 {
        self.counters.cpu_reads += 1;
        match addr {
            0x0000..=0x1FFF => self.ram[addr as usize & (RAM_SIZE - 1)],
            0x2000..=0x3FFF => {
                self.counters.ppu_register_reads += 1;
                self.ppu.cpu_read_register(addr, self.mapper.as_mut())
            }
            0x4015 => {
                self.counters.apu_io_reads += 1;
                self.apu.read_status()
            }
            0x4016 => {
                self.counters.apu_io_reads += 1;
                self.controllers[0].read()
            }
            0x4017 => {
                self.counters.apu_io_reads += 1;
                self.controllers[1].read()
            }
            0x4000..=0x401F => 0,
            _ => {
                self.counters.cart_reads += 1;
                self.mapper.read_prg(addr)
            }
        }
    }

    fn write(&mut self, addr: u16, value: u8) -> u32 {
        self.counters.cpu_writes += 1;
        self.counters.last_write_addr = addr;
        self.counters.last_write_value = value;
        match addr {
            0x0000..=0x1FFF => self.ram[addr as usize & (RAM_SIZE - 1)] = value,
            0x2000..=0x3FFF => {
                self.counters.ppu_register_writes += 1;
                self.ppu
                    .cpu_write_register(addr, value, self.mapper.as_mut());
            }
            0x4014 => {
                self.counters.apu_io_writes += 1;
                return self.oam_dma(value);
            }
            0x4016 => {
                self.counters.apu_io_writes += 1;
                for controller in &mut self.controllers {
                    controller.write(value);
                }
            }
            0x4000..=0x4013 | 0x4015 | 0x4017 => {
                self.counters.apu_io_writes += 1;
                self.apu.write_register(addr, value);
            }
            0x4018..=0x401F => {}
            _ => {
                self.counters.cart_writes += 1;
                self.mapper.write_prg(addr, value);
            }
        }
        0
    }
}
