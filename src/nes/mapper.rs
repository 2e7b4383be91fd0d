use tracing::debug;

use super::cartridge::{Cartridge, RomError};
use super::interrupt::InterruptLine;

const PRG_SLOT_SIZE: usize = 0x0400;
const CHR_SLOT_SIZE: usize = 0x0400;
const PRG_SLOTS: usize = 32;
const CHR_SLOTS: usize = 8;
const NAMETABLE_SIZE: usize = 0x0400;

/// Mask selecting the byte within a single 1 KB nametable.
pub const NAMETABLE_OFFSET_MASK: u16 = 0x03FF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameTableMirroring {
    Horizontal,
    Vertical,
    OneScreenA,
    OneScreenB,
    FourScreen,
}

impl NameTableMirroring {
    /// Logical nametable (0..4) that a PPU address in $2000-$3EFF resolves to.
    pub fn table_index(self, addr: u16) -> usize {
        match self {
            NameTableMirroring::Horizontal => usize::from(addr & 0x0800 != 0),
            NameTableMirroring::Vertical => usize::from(addr & 0x0400 != 0),
            NameTableMirroring::OneScreenA => 0,
            NameTableMirroring::OneScreenB => 1,
            NameTableMirroring::FourScreen => ((addr >> 10) & 0x03) as usize,
        }
    }
}

/// ROM/RAM backing store plus the 1 KB bank-index tables the mappers rewrite.
pub struct CartridgeMemory {
    prg_rom: Vec<u8>,
    prg_ram: Vec<u8>,
    chr: Vec<u8>,
    chr_is_ram: bool,
    extra_nametables: Vec<u8>,
    mirroring: NameTableMirroring,
    has_battery: bool,
    prg_map: [usize; PRG_SLOTS],
    chr_map: [usize; CHR_SLOTS],
}

impl CartridgeMemory {
    pub fn new(cart: Cartridge) -> Self {
        let mut prg_ram = vec![0; cart.prg_ram_size.max(0x2000)];
        if let Some(trainer) = cart.trainer.as_ref() {
            // Trainer lives at $7000-$71FF.
            let start = 0x1000 % prg_ram.len();
            let end = (start + trainer.len()).min(prg_ram.len());
            prg_ram[start..end].copy_from_slice(&trainer[..end - start]);
        }

        let (chr, chr_is_ram) = if cart.chr_rom.is_empty() {
            (vec![0; cart.chr_ram_size.max(0x2000)], true)
        } else {
            (cart.chr_rom, false)
        };

        let extra_nametables = if cart.mirroring == NameTableMirroring::FourScreen {
            vec![0; 2 * NAMETABLE_SIZE]
        } else {
            Vec::new()
        };

        let mut memory = Self {
            prg_rom: cart.prg_rom,
            prg_ram,
            chr,
            chr_is_ram,
            extra_nametables,
            mirroring: cart.mirroring,
            has_battery: cart.has_battery,
            prg_map: [0; PRG_SLOTS],
            chr_map: [0; CHR_SLOTS],
        };
        memory.map_prg_32k(0);
        memory.map_chr_8k(0);
        memory
    }

    pub fn mirroring(&self) -> NameTableMirroring {
        self.mirroring
    }

    /// Four-screen boards hard-wire their layout; register writes cannot change it.
    pub fn set_mirroring(&mut self, mirroring: NameTableMirroring) {
        if self.mirroring != NameTableMirroring::FourScreen {
            self.mirroring = mirroring;
        }
    }

    pub fn has_battery(&self) -> bool {
        self.has_battery
    }

    pub fn prg_ram(&self) -> &[u8] {
        &self.prg_ram
    }

    pub fn load_prg_ram(&mut self, data: &[u8]) {
        let len = data.len().min(self.prg_ram.len());
        self.prg_ram[..len].copy_from_slice(&data[..len]);
    }

    pub fn prg_bank_count(&self, bank_size: usize) -> usize {
        (self.prg_rom.len() / bank_size).max(1)
    }

    pub fn chr_bank_count(&self, bank_size: usize) -> usize {
        (self.chr.len() / bank_size).max(1)
    }

    pub fn prg_map(&self) -> &[usize; PRG_SLOTS] {
        &self.prg_map
    }

    pub fn chr_map(&self) -> &[usize; CHR_SLOTS] {
        &self.chr_map
    }

    fn map_prg(&mut self, first_slot: usize, bank: usize, bank_size: usize) {
        let slots = bank_size / PRG_SLOT_SIZE;
        let bank = bank % self.prg_bank_count(bank_size);
        let total = self.prg_bank_count(PRG_SLOT_SIZE);
        for i in 0..slots {
            self.prg_map[first_slot + i] = (bank * slots + i) % total;
        }
    }

    fn map_chr(&mut self, first_slot: usize, bank: usize, bank_size: usize) {
        let slots = bank_size / CHR_SLOT_SIZE;
        let bank = bank % self.chr_bank_count(bank_size);
        let total = self.chr_bank_count(CHR_SLOT_SIZE);
        for i in 0..slots {
            self.chr_map[first_slot + i] = (bank * slots + i) % total;
        }
    }

    pub fn map_prg_32k(&mut self, bank: usize) {
        self.map_prg(0, bank, 0x8000);
    }

    /// `window` 0 is $8000-$BFFF, 1 is $C000-$FFFF.
    pub fn map_prg_16k(&mut self, window: usize, bank: usize) {
        self.map_prg(window * 16, bank, 0x4000);
    }

    /// `window` 0..4 selects $8000, $A000, $C000 or $E000.
    pub fn map_prg_8k(&mut self, window: usize, bank: usize) {
        self.map_prg(window * 8, bank, 0x2000);
    }

    pub fn map_chr_8k(&mut self, bank: usize) {
        self.map_chr(0, bank, 0x2000);
    }

    pub fn map_chr_4k(&mut self, window: usize, bank: usize) {
        self.map_chr(window * 4, bank, 0x1000);
    }

    pub fn map_chr_2k(&mut self, window: usize, bank: usize) {
        self.map_chr(window * 2, bank, 0x0800);
    }

    pub fn map_chr_1k(&mut self, slot: usize, bank: usize) {
        self.map_chr(slot, bank, 0x0400);
    }

    pub fn read_prg(&self, addr: u16) -> u8 {
        match addr {
            0x6000..=0x7FFF => self.prg_ram[(addr as usize - 0x6000) % self.prg_ram.len()],
            0x8000..=0xFFFF => {
                let offset = addr as usize - 0x8000;
                let bank = self.prg_map[offset / PRG_SLOT_SIZE];
                self.prg_rom[(bank * PRG_SLOT_SIZE + (offset & 0x03FF)) % self.prg_rom.len()]
            }
            _ => 0,
        }
    }

    pub fn write_prg_ram(&mut self, addr: u16, value: u8) {
        if (0x6000..=0x7FFF).contains(&addr) {
            let idx = (addr as usize - 0x6000) % self.prg_ram.len();
            self.prg_ram[idx] = value;
        }
    }

    fn chr_index(&self, addr: u16) -> usize {
        let addr = (addr & 0x1FFF) as usize;
        let bank = self.chr_map[addr / CHR_SLOT_SIZE];
        (bank * CHR_SLOT_SIZE + (addr & 0x03FF)) % self.chr.len()
    }

    pub fn read_chr(&self, addr: u16) -> u8 {
        self.chr[self.chr_index(addr)]
    }

    pub fn write_chr(&mut self, addr: u16, value: u8) {
        if self.chr_is_ram {
            let idx = self.chr_index(addr);
            self.chr[idx] = value;
        }
    }

    pub fn read_nametable(&self, addr: u16, ciram: &[u8; 0x800]) -> u8 {
        let table = self.mirroring.table_index(addr);
        let offset = (addr & NAMETABLE_OFFSET_MASK) as usize;
        match table {
            0 | 1 => ciram[table * NAMETABLE_SIZE + offset],
            _ => self
                .extra_nametables
                .get((table - 2) * NAMETABLE_SIZE + offset)
                .copied()
                .unwrap_or(0),
        }
    }

    pub fn write_nametable(&mut self, addr: u16, value: u8, ciram: &mut [u8; 0x800]) {
        let table = self.mirroring.table_index(addr);
        let offset = (addr & NAMETABLE_OFFSET_MASK) as usize;
        match table {
            0 | 1 => ciram[table * NAMETABLE_SIZE + offset] = value,
            _ => {
                if let Some(slot) = self
                    .extra_nametables
                    .get_mut((table - 2) * NAMETABLE_SIZE + offset)
                {
                    *slot = value;
                }
            }
        }
    }
}

/// Cartridge-side bank switching. Variants own a `CartridgeMemory` and only
/// decode their own registers; the default methods route through the bank tables.
pub trait Mapper {
    fn name(&self) -> &'static str;
    fn memory(&self) -> &CartridgeMemory;
    fn memory_mut(&mut self) -> &mut CartridgeMemory;
    fn write_register(&mut self, addr: u16, value: u8);

    fn read_prg(&mut self, addr: u16) -> u8 {
        self.memory().read_prg(addr)
    }

    fn write_prg(&mut self, addr: u16, value: u8) {
        match addr {
            0x6000..=0x7FFF => self.memory_mut().write_prg_ram(addr, value),
            0x8000..=0xFFFF => self.write_register(addr, value),
            _ => {}
        }
    }

    /// PPU dot count at the pattern-table access that follows.
    fn observe_ppu_cycle(&mut self, _cycle: u64) {}

    fn read_chr(&mut self, addr: u16) -> u8 {
        self.memory().read_chr(addr)
    }

    fn write_chr(&mut self, addr: u16, value: u8) {
        self.memory_mut().write_chr(addr, value);
    }

    fn read_nametable(&mut self, addr: u16, ciram: &[u8; 0x800]) -> u8 {
        self.memory().read_nametable(addr, ciram)
    }

    fn write_nametable(&mut self, addr: u16, value: u8, ciram: &mut [u8; 0x800]) {
        self.memory_mut().write_nametable(addr, value, ciram);
    }

    fn mirroring(&self) -> NameTableMirroring {
        self.memory().mirroring()
    }

    /// Scanline-counting boards expose their IRQ output here.
    fn irq_line(&self) -> Option<&InterruptLine> {
        None
    }

    fn debug_state(&self) -> String {
        String::new()
    }
}

pub fn mapper_name(mapper_number: u16) -> &'static str {
    match mapper_number {
        0 => "NROM",
        1 => "MMC1",
        2 => "UxROM",
        4 => "MMC3",
        66 => "GxROM",
        _ => "Unsupported",
    }
}

pub fn create_mapper(cart: Cartridge) -> Result<Box<dyn Mapper>, RomError> {
    let number = cart.mapper_number;
    let memory = CartridgeMemory::new(cart);
    let mapper: Box<dyn Mapper> = match number {
        0 => Box::new(Nrom::new(memory)),
        1 => Box::new(Mmc1::new(memory)),
        2 => Box::new(Unrom::new(memory)),
        4 => Box::new(Mmc3::new(memory)),
        66 => Box::new(Gxrom::new(memory)),
        other => return Err(RomError::UnsupportedMapper(other)),
    };
    debug!(mapper = mapper.name(), number, "mapper constructed");
    Ok(mapper)
}

struct Nrom {
    memory: CartridgeMemory,
}

impl Nrom {
    fn new(mut memory: CartridgeMemory) -> Self {
        // 16 KB boards mirror their single bank into both halves.
        memory.map_prg_16k(0, 0);
        memory.map_prg_16k(1, 1);
        Self { memory }
    }
}

impl Mapper for Nrom {
    fn name(&self) -> &'static str {
        "NROM"
    }

    fn memory(&self) -> &CartridgeMemory {
        &self.memory
    }

    fn memory_mut(&mut self) -> &mut CartridgeMemory {
        &mut self.memory
    }

    fn write_register(&mut self, _addr: u16, _value: u8) {}
}

struct Mmc1 {
    memory: CartridgeMemory,
    shift_register: u8,
    write_count: u8,
    control: u8,
    chr_bank0: u8,
    chr_bank1: u8,
    prg_bank: u8,
}

impl Mmc1 {
    fn new(memory: CartridgeMemory) -> Self {
        let mut mapper = Self {
            memory,
            shift_register: 0,
            write_count: 0,
            control: 0x0C,
            chr_bank0: 0,
            chr_bank1: 0,
            prg_bank: 0,
        };
        mapper.update_banks();
        mapper
    }

    fn commit(&mut self, addr: u16, data: u8) {
        match addr {
            0x8000..=0x9FFF => {
                self.control = data;
                let mirroring = match data & 0x03 {
                    0 => NameTableMirroring::OneScreenA,
                    1 => NameTableMirroring::OneScreenB,
                    2 => NameTableMirroring::Vertical,
                    _ => NameTableMirroring::Horizontal,
                };
                self.memory.set_mirroring(mirroring);
            }
            0xA000..=0xBFFF => self.chr_bank0 = data & 0x1F,
            0xC000..=0xDFFF => self.chr_bank1 = data & 0x1F,
            _ => self.prg_bank = data & 0x0F,
        }
        self.update_banks();
    }

    fn update_banks(&mut self) {
        let prg = self.prg_bank as usize;
        match (self.control >> 2) & 0x03 {
            0 | 1 => self.memory.map_prg_32k(prg >> 1),
            2 => {
                self.memory.map_prg_16k(0, 0);
                self.memory.map_prg_16k(1, prg);
            }
            _ => {
                let last = self.memory.prg_bank_count(0x4000) - 1;
                self.memory.map_prg_16k(0, prg);
                self.memory.map_prg_16k(1, last);
            }
        }

        if (self.control & 0x10) == 0 {
            self.memory.map_chr_8k((self.chr_bank0 >> 1) as usize);
        } else {
            self.memory.map_chr_4k(0, self.chr_bank0 as usize);
            self.memory.map_chr_4k(1, self.chr_bank1 as usize);
        }
    }
}

impl Mapper for Mmc1 {
    fn name(&self) -> &'static str {
        "MMC1"
    }

    fn memory(&self) -> &CartridgeMemory {
        &self.memory
    }

    fn memory_mut(&mut self) -> &mut CartridgeMemory {
        &mut self.memory
    }

    fn write_register(&mut self, addr: u16, value: u8) {
        if (value & 0x80) != 0 {
            self.shift_register = 0;
            self.write_count = 0;
            self.control |= 0x0C;
            self.update_banks();
            return;
        }

        self.shift_register |= (value & 0x01) << self.write_count;
        self.write_count += 1;
        if self.write_count == 5 {
            let data = self.shift_register;
            self.shift_register = 0;
            self.write_count = 0;
            self.commit(addr, data);
        }
    }

    fn debug_state(&self) -> String {
        format!(
            "MMC1 control=${:02X} chr=[{:02X},{:02X}] prg=${:02X} shift={}/{}",
            self.control,
            self.chr_bank0,
            self.chr_bank1,
            self.prg_bank,
            self.shift_register,
            self.write_count
        )
    }
}

struct Unrom {
    memory: CartridgeMemory,
    bank: u8,
}

impl Unrom {
    fn new(mut memory: CartridgeMemory) -> Self {
        let last = memory.prg_bank_count(0x4000) - 1;
        memory.map_prg_16k(0, 0);
        memory.map_prg_16k(1, last);
        Self { memory, bank: 0 }
    }
}

impl Mapper for Unrom {
    fn name(&self) -> &'static str {
        "UxROM"
    }

    fn memory(&self) -> &CartridgeMemory {
        &self.memory
    }

    fn memory_mut(&mut self) -> &mut CartridgeMemory {
        &mut self.memory
    }

    fn write_register(&mut self, _addr: u16, value: u8) {
        self.bank = value & 0x0F;
        self.memory.map_prg_16k(0, self.bank as usize);
    }

    fn debug_state(&self) -> String {
        format!("UxROM bank=${:02X}", self.bank)
    }
}

struct Mmc3 {
    memory: CartridgeMemory,
    bank_select: u8,
    bank_regs: [u8; 8],

    irq_latch: u8,
    irq_counter: u8,
    irq_reload: bool,
    irq_enabled: bool,
    irq: InterruptLine,
    last_a12: bool,
    // Dot at which A12 was last seen falling; `None` means low since power-on.
    a12_fell_at: Option<u64>,
    ppu_cycle: u64,
}

// A12 has to stay low this many PPU dots before a rise clocks the counter.
const A12_LOW_MIN_DOTS: u64 = 10;

impl Mmc3 {
    fn new(memory: CartridgeMemory) -> Self {
        let mut mapper = Self {
            memory,
            bank_select: 0,
            bank_regs: [0, 2, 4, 5, 6, 7, 0, 1],
            irq_latch: 0,
            irq_counter: 0,
            irq_reload: false,
            irq_enabled: false,
            irq: InterruptLine::default(),
            last_a12: false,
            a12_fell_at: None,
            ppu_cycle: 0,
        };
        mapper.update_banks();
        mapper
    }

    fn update_banks(&mut self) {
        let last = self.memory.prg_bank_count(0x2000) - 1;
        let second_last = last.saturating_sub(1);
        let r6 = self.bank_regs[6] as usize;
        let r7 = self.bank_regs[7] as usize;
        if (self.bank_select & 0x40) == 0 {
            self.memory.map_prg_8k(0, r6);
            self.memory.map_prg_8k(2, second_last);
        } else {
            self.memory.map_prg_8k(0, second_last);
            self.memory.map_prg_8k(2, r6);
        }
        self.memory.map_prg_8k(1, r7);
        self.memory.map_prg_8k(3, last);

        // R0/R1 select 2 KB banks; inversion swaps the halves of the pattern space.
        let base = if (self.bank_select & 0x80) == 0 { 0 } else { 4 };
        self.memory.map_chr_2k(base / 2, (self.bank_regs[0] >> 1) as usize);
        self.memory.map_chr_2k(base / 2 + 1, (self.bank_regs[1] >> 1) as usize);
        let other = 4 - base;
        for i in 0..4 {
            self.memory
                .map_chr_1k(other + i, self.bank_regs[2 + i] as usize);
        }
    }

    fn clock_irq_counter(&mut self) {
        if self.irq_counter == 0 || self.irq_reload {
            self.irq_counter = self.irq_latch;
            self.irq_reload = false;
        } else {
            self.irq_counter -= 1;
        }

        if self.irq_counter == 0 && self.irq_enabled {
            self.irq.raise();
        }
    }

    fn watch_a12(&mut self, addr: u16) {
        let a12 = (addr & 0x1000) != 0;
        if a12 && !self.last_a12 {
            let low_long_enough = self
                .a12_fell_at
                .is_none_or(|fell| self.ppu_cycle.saturating_sub(fell) >= A12_LOW_MIN_DOTS);
            if low_long_enough {
                self.clock_irq_counter();
            }
        } else if !a12 && self.last_a12 {
            self.a12_fell_at = Some(self.ppu_cycle);
        }
        self.last_a12 = a12;
    }
}

impl Mapper for Mmc3 {
    fn name(&self) -> &'static str {
        "MMC3"
    }

    fn memory(&self) -> &CartridgeMemory {
        &self.memory
    }

    fn memory_mut(&mut self) -> &mut CartridgeMemory {
        &mut self.memory
    }

    fn write_register(&mut self, addr: u16, value: u8) {
        let even = (addr & 1) == 0;
        match (addr, even) {
            (0x8000..=0x9FFF, true) => {
                self.bank_select = value;
                self.update_banks();
            }
            (0x8000..=0x9FFF, false) => {
                let target = (self.bank_select & 0x07) as usize;
                self.bank_regs[target] = match target {
                    0 | 1 => value & 0xFE,
                    6 | 7 => value & 0x3F,
                    _ => value,
                };
                self.update_banks();
            }
            (0xA000..=0xBFFF, true) => {
                let mirroring = if (value & 0x01) == 0 {
                    NameTableMirroring::Vertical
                } else {
                    NameTableMirroring::Horizontal
                };
                self.memory.set_mirroring(mirroring);
            }
            (0xA000..=0xBFFF, false) => {}
            (0xC000..=0xDFFF, true) => self.irq_latch = value,
            (0xC000..=0xDFFF, false) => {
                self.irq_counter = 0;
                self.irq_reload = true;
            }
            (_, true) => {
                self.irq_enabled = false;
                self.irq.lower();
            }
            (_, false) => self.irq_enabled = true,
        }
    }

    fn observe_ppu_cycle(&mut self, cycle: u64) {
        self.ppu_cycle = cycle;
    }

    fn read_chr(&mut self, addr: u16) -> u8 {
        self.watch_a12(addr);
        self.memory.read_chr(addr)
    }

    fn write_chr(&mut self, addr: u16, value: u8) {
        self.watch_a12(addr);
        self.memory.write_chr(addr, value);
    }

    fn irq_line(&self) -> Option<&InterruptLine> {
        Some(&self.irq)
    }

    fn debug_state(&self) -> String {
        format!(
            "MMC3 bank_select=${:02X} prg=[{:02X},{:02X}] chr=[{:02X},{:02X},{:02X},{:02X},{:02X},{:02X}] irq_latch=${:02X} irq_counter=${:02X} reload={} en={} pending={}",
            self.bank_select,
            self.bank_regs[6],
            self.bank_regs[7],
            self.bank_regs[0],
            self.bank_regs[1],
            self.bank_regs[2],
            self.bank_regs[3],
            self.bank_regs[4],
            self.bank_regs[5],
            self.irq_latch,
            self.irq_counter,
            self.irq_reload,
            self.irq_enabled,
            self.irq.is_raised()
        )
    }
}

struct Gxrom {
    memory: CartridgeMemory,
    select: u8,
}

impl Gxrom {
    fn new(memory: CartridgeMemory) -> Self {
        Self { memory, select: 0 }
    }
}

impl Mapper for Gxrom {
    fn name(&self) -> &'static str {
        "GxROM"
    }

    fn memory(&self) -> &CartridgeMemory {
        &self.memory
    }

    fn memory_mut(&mut self) -> &mut CartridgeMemory {
        &mut self.memory
    }

    fn write_register(&mut self, _addr: u16, value: u8) {
        self.select = value;
        self.memory.map_prg_32k(((value & 0x30) >> 4) as usize);
        self.memory.map_chr_8k((value & 0x03) as usize);
    }

    fn debug_state(&self) -> String {
        format!(
            "GxROM prg={} chr={}",
            (self.select & 0x30) >> 4,
            self.select & 0x03
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterned_banks(total_size: usize, bank_size: usize) -> Vec<u8> {
        let mut data = vec![0u8; total_size];
        for (bank, chunk) in data.chunks_mut(bank_size).enumerate() {
            chunk.fill((bank as u8).wrapping_add(1));
        }
        data
    }

    fn make_cart(mapper_number: u16, prg_rom: Vec<u8>, chr_rom: Vec<u8>) -> Cartridge {
        Cartridge {
            mapper_number,
            mirroring: NameTableMirroring::Horizontal,
            has_battery: false,
            prg_rom,
            chr_rom,
            chr_ram_size: 0x2000,
            prg_ram_size: 0x2000,
            trainer: None,
        }
    }

    fn write_mmc1(mapper: &mut dyn Mapper, addr: u16, value: u8) {
        for bit in 0..5 {
            mapper.write_prg(addr, (value >> bit) & 0x01);
        }
    }

    #[test]
    fn mirroring_resolves_logical_tables() {
        assert_eq!(NameTableMirroring::Horizontal.table_index(0x2400), 0);
        assert_eq!(NameTableMirroring::Horizontal.table_index(0x2800), 1);
        assert_eq!(NameTableMirroring::Vertical.table_index(0x2400), 1);
        assert_eq!(NameTableMirroring::Vertical.table_index(0x2800), 0);
        assert_eq!(NameTableMirroring::OneScreenB.table_index(0x2000), 1);
        assert_eq!(NameTableMirroring::FourScreen.table_index(0x2C00), 3);
    }

    #[test]
    fn nrom_mirrors_single_16k_bank() {
        let prg = patterned_banks(0x4000, 0x4000);
        let mut mapper = create_mapper(make_cart(0, prg, vec![0; 0x2000])).unwrap();
        assert_eq!(mapper.read_prg(0x8000), 1);
        assert_eq!(mapper.read_prg(0xC000), 1);
    }

    #[test]
    fn nrom_chr_rom_ignores_writes() {
        let prg = patterned_banks(0x8000, 0x4000);
        let chr = patterned_banks(0x2000, 0x2000);
        let mut mapper = create_mapper(make_cart(0, prg, chr)).unwrap();
        mapper.write_chr(0x0010, 0xAB);
        assert_eq!(mapper.read_chr(0x0010), 1);
    }

    #[test]
    fn chr_ram_accepts_writes() {
        let prg = patterned_banks(0x8000, 0x4000);
        let mut mapper = create_mapper(make_cart(0, prg, Vec::new())).unwrap();
        mapper.write_chr(0x1234, 0x5A);
        assert_eq!(mapper.read_chr(0x1234), 0x5A);
    }

    #[test]
    fn prg_ram_round_trips() {
        let prg = patterned_banks(0x8000, 0x4000);
        let mut mapper = create_mapper(make_cart(0, prg, Vec::new())).unwrap();
        mapper.write_prg(0x6123, 0x77);
        assert_eq!(mapper.read_prg(0x6123), 0x77);
    }

    #[test]
    fn mmc1_power_on_maps_first_and_last_bank() {
        let prg = patterned_banks(4 * 0x4000, 0x4000);
        let chr = patterned_banks(2 * 0x1000, 0x1000);
        let mapper = create_mapper(make_cart(1, prg, chr)).unwrap();
        let prg_map = mapper.memory().prg_map();
        assert_eq!(&prg_map[..16], &(0..16).collect::<Vec<_>>()[..]);
        assert_eq!(&prg_map[16..], &(48..64).collect::<Vec<_>>()[..]);
        assert_eq!(mapper.memory().chr_map(), &[0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn mmc1_serial_writes_switch_prg_and_mirroring() {
        let prg = patterned_banks(4 * 0x4000, 0x4000);
        let mut mapper = create_mapper(make_cart(1, prg, Vec::new())).unwrap();

        write_mmc1(mapper.as_mut(), 0xE000, 2);
        assert_eq!(mapper.read_prg(0x8000), 3);
        assert_eq!(mapper.read_prg(0xC000), 4);

        write_mmc1(mapper.as_mut(), 0x8000, 0x02);
        assert_eq!(mapper.mirroring(), NameTableMirroring::Vertical);
        // 32 KB mode ignores the low bit of the bank number.
        assert_eq!(mapper.read_prg(0x8000), 3);
        assert_eq!(mapper.read_prg(0xC000), 4);
    }

    #[test]
    fn mmc1_reset_bit_discards_partial_write() {
        let prg = patterned_banks(4 * 0x4000, 0x4000);
        let mut mapper = create_mapper(make_cart(1, prg, Vec::new())).unwrap();
        mapper.write_prg(0xE000, 1);
        mapper.write_prg(0xE000, 1);
        mapper.write_prg(0xE000, 0x80);
        write_mmc1(mapper.as_mut(), 0xE000, 1);
        assert_eq!(mapper.read_prg(0x8000), 2);
    }

    #[test]
    fn mmc1_4k_chr_mode() {
        let prg = patterned_banks(2 * 0x4000, 0x4000);
        let chr = patterned_banks(4 * 0x1000, 0x1000);
        let mut mapper = create_mapper(make_cart(1, prg, chr)).unwrap();
        write_mmc1(mapper.as_mut(), 0x8000, 0x1C);
        write_mmc1(mapper.as_mut(), 0xA000, 2);
        write_mmc1(mapper.as_mut(), 0xC000, 3);
        assert_eq!(mapper.read_chr(0x0000), 3);
        assert_eq!(mapper.read_chr(0x1000), 4);
    }

    #[test]
    fn unrom_keeps_last_bank_fixed() {
        let prg = patterned_banks(3 * 0x4000, 0x4000);
        let mut mapper = create_mapper(make_cart(2, prg, Vec::new())).unwrap();

        mapper.write_prg(0x8000, 1);
        assert_eq!(mapper.read_prg(0x8000), 2);
        assert_eq!(mapper.read_prg(0xC000), 3);
    }

    #[test]
    fn bank_numbers_wrap_into_rom() {
        let prg = patterned_banks(4 * 0x4000, 0x4000);
        let mut mapper = create_mapper(make_cart(2, prg, Vec::new())).unwrap();
        mapper.write_prg(0x8000, 0x0D);
        assert_eq!(mapper.read_prg(0x8000), 2);
    }

    #[test]
    fn gxrom_selects_prg_and_chr() {
        let prg = patterned_banks(4 * 0x8000, 0x8000);
        let chr = patterned_banks(4 * 0x2000, 0x2000);
        let mut mapper = create_mapper(make_cart(66, prg, chr)).unwrap();
        mapper.write_prg(0x8000, 0x21);
        assert_eq!(mapper.read_prg(0x8000), 3);
        assert_eq!(mapper.read_prg(0xFFFF), 3);
        assert_eq!(mapper.read_chr(0x0000), 2);
    }

    #[test]
    fn mmc3_prg_mode_swaps_fixed_bank() {
        let prg = patterned_banks(8 * 0x2000, 0x2000);
        let chr = patterned_banks(8 * 0x0400, 0x0400);
        let mut mapper = create_mapper(make_cart(4, prg, chr)).unwrap();

        mapper.write_prg(0x8000, 0x06);
        mapper.write_prg(0x8001, 0x02);
        assert_eq!(mapper.read_prg(0x8000), 3);
        assert_eq!(mapper.read_prg(0xC000), 7);
        assert_eq!(mapper.read_prg(0xE000), 8);

        mapper.write_prg(0x8000, 0x46);
        assert_eq!(mapper.read_prg(0x8000), 7);
        assert_eq!(mapper.read_prg(0xC000), 3);
    }

    #[test]
    fn mmc3_chr_inversion() {
        let prg = patterned_banks(4 * 0x2000, 0x2000);
        let chr = patterned_banks(16 * 0x0400, 0x0400);
        let mut mapper = create_mapper(make_cart(4, prg, chr)).unwrap();

        mapper.write_prg(0x8000, 0x00);
        mapper.write_prg(0x8001, 0x05);
        assert_eq!(mapper.read_chr(0x0000), 5);
        assert_eq!(mapper.read_chr(0x0400), 6);

        mapper.write_prg(0x8000, 0x80);
        assert_eq!(mapper.read_chr(0x1000), 5);
        assert_eq!(mapper.read_chr(0x1400), 6);
    }

    #[test]
    fn mmc3_irq_counts_a12_rising_edges() {
        let prg = patterned_banks(4 * 0x2000, 0x2000);
        let chr = patterned_banks(8 * 0x0400, 0x0400);
        let mut mapper = create_mapper(make_cart(4, prg, chr)).unwrap();

        mapper.write_prg(0xC000, 0x01);
        mapper.write_prg(0xC001, 0x00);
        mapper.write_prg(0xE001, 0x00);

        mapper.observe_ppu_cycle(0);
        mapper.read_chr(0x0000);
        mapper.read_chr(0x1000);
        mapper.read_chr(0x1010);
        assert!(!mapper.irq_line().is_some_and(InterruptLine::is_raised));

        mapper.observe_ppu_cycle(100);
        mapper.read_chr(0x0000);
        mapper.observe_ppu_cycle(341);
        mapper.read_chr(0x1000);
        assert!(mapper.irq_line().is_some_and(InterruptLine::is_raised));

        mapper.write_prg(0xE000, 0x00);
        assert!(!mapper.irq_line().is_some_and(InterruptLine::is_raised));
    }

    #[test]
    fn mmc3_ignores_a12_pulses_shorter_than_the_filter() {
        let prg = patterned_banks(4 * 0x2000, 0x2000);
        let chr = patterned_banks(8 * 0x0400, 0x0400);
        let mut mapper = create_mapper(make_cart(4, prg, chr)).unwrap();

        // Latch 1 so every counted edge after the reload raises the line.
        mapper.write_prg(0xC000, 0x01);
        mapper.write_prg(0xC001, 0x00);
        mapper.write_prg(0xE001, 0x00);

        // First rise of the line reloads the counter to 1.
        mapper.observe_ppu_cycle(257);
        mapper.read_chr(0x1000);
        // 8x16 sprites alternating tables: several rises within one burst.
        for table in [0x0000, 0x1000, 0x0000, 0x1000] {
            mapper.read_chr(table);
        }
        assert!(!mapper.irq_line().is_some_and(InterruptLine::is_raised));

        // Background fetches of the next line keep A12 low long enough.
        mapper.observe_ppu_cycle(325);
        mapper.read_chr(0x0000);
        mapper.observe_ppu_cycle(257 + 341);
        mapper.read_chr(0x1000);
        assert!(mapper.irq_line().is_some_and(InterruptLine::is_raised));
    }

    #[test]
    fn four_screen_uses_cartridge_ram() {
        let prg = patterned_banks(0x8000, 0x4000);
        let mut cart = make_cart(0, prg, Vec::new());
        cart.mirroring = NameTableMirroring::FourScreen;
        let mut mapper = create_mapper(cart).unwrap();
        let mut ciram = [0u8; 0x800];

        mapper.write_nametable(0x2C05, 0x42, &mut ciram);
        mapper.write_nametable(0x2005, 0x24, &mut ciram);
        assert_eq!(mapper.read_nametable(0x2C05, &ciram), 0x42);
        assert_eq!(ciram[5], 0x24);
        assert!(ciram.iter().all(|&b| b != 0x42));
    }

    #[test]
    fn unsupported_mapper_is_rejected() {
        let prg = patterned_banks(0x8000, 0x4000);
        let err = create_mapper(make_cart(99, prg, Vec::new())).err();
        assert!(matches!(err, Some(RomError::UnsupportedMapper(99))));
    }
}
