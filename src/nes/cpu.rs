use tracing::{debug, warn};

use super::interrupt::Interrupt;

pub const FLAG_CARRY: u8 = 0x01;
pub const FLAG_ZERO: u8 = 0x02;
pub const FLAG_INTERRUPT: u8 = 0x04;
pub const FLAG_DECIMAL: u8 = 0x08;
pub const FLAG_BREAK: u8 = 0x10;
pub const FLAG_UNUSED: u8 = 0x20;
pub const FLAG_OVERFLOW: u8 = 0x40;
pub const FLAG_NEGATIVE: u8 = 0x80;

const STACK_BASE: u16 = 0x0100;
const INTERRUPT_CYCLES: u32 = 7;

/// CPU-side view of the address space.
pub trait CpuBus {
    fn read(&mut self, addr: u16) -> u8;

    /// Returns the number of cycles the write stalled the CPU for (OAM DMA).
    fn write(&mut self, addr: u16, value: u8) -> u32;
}

/// Base cycle cost per opcode, before page-crossing and branch penalties.
#[rustfmt::skip]
pub const OP_CYCLES: [u8; 256] = [
    7,6,2,8,3,3,5,5,3,2,2,2,4,4,6,6,
    2,5,2,8,4,4,6,6,2,4,2,7,4,4,7,7,
    6,6,2,8,3,3,5,5,4,2,2,2,4,4,6,6,
    2,5,2,8,4,4,6,6,2,4,2,7,4,4,7,7,
    6,6,2,8,3,3,5,5,3,2,2,2,3,4,6,6,
    2,5,2,8,4,4,6,6,2,4,2,7,4,4,7,7,
    6,6,2,8,3,3,5,5,4,2,2,2,5,4,6,6,
    2,5,2,8,4,4,6,6,2,4,2,7,4,4,7,7,
    2,6,2,6,3,3,3,3,2,2,2,2,4,4,4,4,
    2,6,2,6,4,4,4,4,2,5,2,5,5,5,5,5,
    2,6,2,6,3,3,3,3,2,2,2,2,4,4,4,4,
    2,5,2,5,4,4,4,4,2,4,2,4,4,4,4,4,
    2,6,2,8,3,3,5,5,2,2,2,2,4,4,6,6,
    2,5,2,8,4,4,6,6,2,4,2,7,4,4,7,7,
    2,6,2,8,3,3,5,5,2,2,2,2,4,4,6,6,
    2,5,2,8,4,4,6,6,2,4,2,7,4,4,7,7,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Relative,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Indirect,
    IndirectX,
    IndirectY,
}

impl AddrMode {
    /// Operand bytes following the opcode.
    pub fn operand_len(self) -> u16 {
        match self {
            AddrMode::Implied | AddrMode::Accumulator => 0,
            AddrMode::Absolute | AddrMode::AbsoluteX | AddrMode::AbsoluteY | AddrMode::Indirect => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Adc, And, Asl, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Brk, Bvc, Bvs, Clc,
    Cld, Cli, Clv, Cmp, Cpx, Cpy, Dec, Dex, Dey, Eor, Inc, Inx, Iny, Jmp,
    Jsr, Lda, Ldx, Ldy, Lsr, Nop, Ora, Pha, Php, Pla, Plp, Rol, Ror, Rti,
    Rts, Sbc, Sec, Sed, Sei, Sta, Stx, Sty, Tax, Tay, Tsx, Txa, Txs, Tya,
    // Undocumented.
    Alr, Anc, Arr, Axs, Dcp, Isc, Kil, Las, Lax, Lxa, Rla, Rra, Sax, Sha,
    Shx, Shy, Slo, Sre, Tas, Xaa,
}

impl Op {
    pub fn mnemonic(self) -> String {
        format!("{self:?}").to_uppercase()
    }

    /// Read-type operations pay one extra cycle when indexing crosses a page.
    fn pays_page_penalty(self) -> bool {
        matches!(
            self,
            Op::Adc
                | Op::And
                | Op::Cmp
                | Op::Eor
                | Op::Lda
                | Op::Ldx
                | Op::Ldy
                | Op::Ora
                | Op::Sbc
                | Op::Lax
                | Op::Las
                | Op::Nop
        )
    }
}

mod table {
    use super::AddrMode::*;
    use super::AddrMode;
    use super::Op::{self, *};

    #[rustfmt::skip]
    pub static OPCODES: [(Op, AddrMode); 256] = [
        // 0x00
        (Brk, Implied), (Ora, IndirectX), (Kil, Implied), (Slo, IndirectX),
        (Nop, ZeroPage), (Ora, ZeroPage), (Asl, ZeroPage), (Slo, ZeroPage),
        (Php, Implied), (Ora, Immediate), (Asl, Accumulator), (Anc, Immediate),
        (Nop, Absolute), (Ora, Absolute), (Asl, Absolute), (Slo, Absolute),
        // 0x10
        (Bpl, Relative), (Ora, IndirectY), (Kil, Implied), (Slo, IndirectY),
        (Nop, ZeroPageX), (Ora, ZeroPageX), (Asl, ZeroPageX), (Slo, ZeroPageX),
        (Clc, Implied), (Ora, AbsoluteY), (Nop, Implied), (Slo, AbsoluteY),
        (Nop, AbsoluteX), (Ora, AbsoluteX), (Asl, AbsoluteX), (Slo, AbsoluteX),
        // 0x20
        (Jsr, Absolute), (And, IndirectX), (Kil, Implied), (Rla, IndirectX),
        (Bit, ZeroPage), (And, ZeroPage), (Rol, ZeroPage), (Rla, ZeroPage),
        (Plp, Implied), (And, Immediate), (Rol, Accumulator), (Anc, Immediate),
        (Bit, Absolute), (And, Absolute), (Rol, Absolute), (Rla, Absolute),
        // 0x30
        (Bmi, Relative), (And, IndirectY), (Kil, Implied), (Rla, IndirectY),
        (Nop, ZeroPageX), (And, ZeroPageX), (Rol, ZeroPageX), (Rla, ZeroPageX),
        (Sec, Implied), (And, AbsoluteY), (Nop, Implied), (Rla, AbsoluteY),
        (Nop, AbsoluteX), (And, AbsoluteX), (Rol, AbsoluteX), (Rla, AbsoluteX),
        // 0x40
        (Rti, Implied), (Eor, IndirectX), (Kil, Implied), (Sre, IndirectX),
        (Nop, ZeroPage), (Eor, ZeroPage), (Lsr, ZeroPage), (Sre, ZeroPage),
        (Pha, Implied), (Eor, Immediate), (Lsr, Accumulator), (Alr, Immediate),
        (Jmp, Absolute), (Eor, Absolute), (Lsr, Absolute), (Sre, Absolute),
        // 0x50
        (Bvc, Relative), (Eor, IndirectY), (Kil, Implied), (Sre, IndirectY),
        (Nop, ZeroPageX), (Eor, ZeroPageX), (Lsr, ZeroPageX), (Sre, ZeroPageX),
        (Cli, Implied), (Eor, AbsoluteY), (Nop, Implied), (Sre, AbsoluteY),
        (Nop, AbsoluteX), (Eor, AbsoluteX), (Lsr, AbsoluteX), (Sre, AbsoluteX),
        // 0x60
        (Rts, Implied), (Adc, IndirectX), (Kil, Implied), (Rra, IndirectX),
        (Nop, ZeroPage), (Adc, ZeroPage), (Ror, ZeroPage), (Rra, ZeroPage),
        (Pla, Implied), (Adc, Immediate), (Ror, Accumulator), (Arr, Immediate),
        (Jmp, Indirect), (Adc, Absolute), (Ror, Absolute), (Rra, Absolute),
        // 0x70
        (Bvs, Relative), (Adc, IndirectY), (Kil, Implied), (Rra, IndirectY),
        (Nop, ZeroPageX), (Adc, ZeroPageX), (Ror, ZeroPageX), (Rra, ZeroPageX),
        (Sei, Implied), (Adc, AbsoluteY), (Nop, Implied), (Rra, AbsoluteY),
        (Nop, AbsoluteX), (Adc, AbsoluteX), (Ror, AbsoluteX), (Rra, AbsoluteX),
        // 0x80
        (Nop, Immediate), (Sta, IndirectX), (Nop, Immediate), (Sax, IndirectX),
        (Sty, ZeroPage), (Sta, ZeroPage), (Stx, ZeroPage), (Sax, ZeroPage),
        (Dey, Implied), (Nop, Immediate), (Txa, Implied), (Xaa, Immediate),
        (Sty, Absolute), (Sta, Absolute), (Stx, Absolute), (Sax, Absolute),
        // 0x90
        (Bcc, Relative), (Sta, IndirectY), (Kil, Implied), (Sha, IndirectY),
        (Sty, ZeroPageX), (Sta, ZeroPageX), (Stx, ZeroPageY), (Sax, ZeroPageY),
        (Tya, Implied), (Sta, AbsoluteY), (Txs, Implied), (Tas, AbsoluteY),
        (Shy, AbsoluteX), (Sta, AbsoluteX), (Shx, AbsoluteY), (Sha, AbsoluteY),
        // 0xA0
        (Ldy, Immediate), (Lda, IndirectX), (Ldx, Immediate), (Lax, IndirectX),
        (Ldy, ZeroPage), (Lda, ZeroPage), (Ldx, ZeroPage), (Lax, ZeroPage),
        (Tay, Implied), (Lda, Immediate), (Tax, Implied), (Lxa, Immediate),
        (Ldy, Absolute), (Lda, Absolute), (Ldx, Absolute), (Lax, Absolute),
        // 0xB0
        (Bcs, Relative), (Lda, IndirectY), (Kil, Implied), (Lax, IndirectY),
        (Ldy, ZeroPageX), (Lda, ZeroPageX), (Ldx, ZeroPageY), (Lax, ZeroPageY),
        (Clv, Implied), (Lda, AbsoluteY), (Tsx, Implied), (Las, AbsoluteY),
        (Ldy, AbsoluteX), (Lda, AbsoluteX), (Ldx, AbsoluteY), (Lax, AbsoluteY),
        // 0xC0
        (Cpy, Immediate), (Cmp, IndirectX), (Nop, Immediate), (Dcp, IndirectX),
        (Cpy, ZeroPage), (Cmp, ZeroPage), (Dec, ZeroPage), (Dcp, ZeroPage),
        (Iny, Implied), (Cmp, Immediate), (Dex, Implied), (Axs, Immediate),
        (Cpy, Absolute), (Cmp, Absolute), (Dec, Absolute), (Dcp, Absolute),
        // 0xD0
        (Bne, Relative), (Cmp, IndirectY), (Kil, Implied), (Dcp, IndirectY),
        (Nop, ZeroPageX), (Cmp, ZeroPageX), (Dec, ZeroPageX), (Dcp, ZeroPageX),
        (Cld, Implied), (Cmp, AbsoluteY), (Nop, Implied), (Dcp, AbsoluteY),
        (Nop, AbsoluteX), (Cmp, AbsoluteX), (Dec, AbsoluteX), (Dcp, AbsoluteX),
        // 0xE0
        (Cpx, Immediate), (Sbc, IndirectX), (Nop, Immediate), (Isc, IndirectX),
        (Cpx, ZeroPage), (Sbc, ZeroPage), (Inc, ZeroPage), (Isc, ZeroPage),
        (Inx, Implied), (Sbc, Immediate), (Nop, Implied), (Sbc, Immediate),
        (Cpx, Absolute), (Sbc, Absolute), (Inc, Absolute), (Isc, Absolute),
        // 0xF0
        (Beq, Relative), (Sbc, IndirectY), (Kil, Implied), (Isc, IndirectY),
        (Nop, ZeroPageX), (Sbc, ZeroPageX), (Inc, ZeroPageX), (Isc, ZeroPageX),
        (Sed, Implied), (Sbc, AbsoluteY), (Nop, Implied), (Isc, AbsoluteY),
        (Nop, AbsoluteX), (Sbc, AbsoluteX), (Inc, AbsoluteX), (Isc, AbsoluteX),
    ];
}

pub use table::OPCODES;

/// Decoded (operation, addressing mode) for an opcode byte.
pub fn decode(opcode: u8) -> (Op, AddrMode) {
    OPCODES[opcode as usize]
}

#[derive(Debug, Clone, Copy, Default)]
struct Operand {
    addr: u16,
    /// Un-indexed address, used for the dummy read on the wrong page.
    base: u16,
    page_crossed: bool,
}

impl Operand {
    fn at(addr: u16) -> Self {
        Self {
            addr,
            base: addr,
            page_crossed: false,
        }
    }

    fn indexed(base: u16, addr: u16) -> Self {
        Self {
            addr,
            base,
            page_crossed: (base & 0xFF00) != (addr & 0xFF00),
        }
    }

    fn wrong_page_addr(&self) -> u16 {
        (self.base & 0xFF00) | (self.addr & 0x00FF)
    }
}

#[derive(Clone, Copy)]
enum RmwOp {
    Asl,
    Rol,
    Lsr,
    Ror,
    Dec,
    Inc,
    Slo,
    Rla,
    Sre,
    Rra,
    Dcp,
    Isc,
}

#[derive(Debug, Clone)]
pub struct Cpu {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub s: u8,
    pub p: u8,
    pub pc: u16,

    pending: Option<Interrupt>,
    decimal_mode: bool,
    jammed: bool,
    // Cycles charged to the instruction in flight beyond its table entry.
    extra_cycles: u32,
    last_cycles: u32,
    total_cycles: u64,
}

impl Cpu {
    pub fn new(decimal_mode: bool) -> Self {
        let mut cpu = Self {
            a: 0,
            x: 0,
            y: 0,
            s: 0,
            p: 0,
            pc: 0,
            pending: None,
            decimal_mode,
            jammed: false,
            extra_cycles: 0,
            last_cycles: 0,
            total_cycles: 0,
        };
        cpu.init();
        cpu
    }

    /// Power-on state with a Reset request queued. The first `execute_op`
    /// runs the reset sequence.
    pub fn init(&mut self) {
        self.a = 0;
        self.x = 0;
        self.y = 0;
        self.s = 0;
        self.p = FLAG_UNUSED;
        self.pc = 0;
        self.pending = None;
        self.jammed = false;
        self.extra_cycles = 0;
        self.last_cycles = 0;
        self.total_cycles = 0;
        self.reset();
    }

    pub fn reset(&mut self) {
        self.request(Interrupt::Reset);
    }

    pub fn nmi(&mut self) {
        self.request(Interrupt::Nmi);
    }

    pub fn irq(&mut self) {
        self.request(Interrupt::Irq);
    }

    fn request(&mut self, kind: Interrupt) {
        self.pending = Interrupt::merge(self.pending, kind);
    }

    pub fn pending_interrupt(&self) -> Option<Interrupt> {
        self.pending
    }

    pub fn is_jammed(&self) -> bool {
        self.jammed
    }

    pub fn decimal_mode(&self) -> bool {
        self.decimal_mode
    }

    pub fn last_cycles(&self) -> u32 {
        self.last_cycles
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    pub fn flag(&self, flag: u8) -> bool {
        (self.p & flag) != 0
    }

    fn set_flag(&mut self, flag: u8, enabled: bool) {
        if enabled {
            self.p |= flag;
        } else {
            self.p &= !flag;
        }
        self.p |= FLAG_UNUSED;
    }

    fn update_zn(&mut self, value: u8) {
        self.set_flag(FLAG_ZERO, value == 0);
        self.set_flag(FLAG_NEGATIVE, (value & 0x80) != 0);
    }

    /// Runs one instruction, or one interrupt sequence if one is pending,
    /// and returns the cycles it took including any bus stall.
    pub fn execute_op<B: CpuBus + ?Sized>(&mut self, bus: &mut B) -> u32 {
        self.extra_cycles = 0;

        // A jammed CPU ignores NMI and IRQ; only Reset gets it going again.
        if self.jammed && self.pending != Some(Interrupt::Reset) {
            return self.finish(2);
        }

        if let Some(kind) = self.pending.take() {
            match kind {
                Interrupt::Reset => {
                    self.service_reset(bus);
                    return self.finish(INTERRUPT_CYCLES);
                }
                Interrupt::Nmi => {
                    self.service_interrupt(bus, kind);
                    return self.finish(INTERRUPT_CYCLES);
                }
                Interrupt::Irq if !self.flag(FLAG_INTERRUPT) => {
                    self.service_interrupt(bus, kind);
                    return self.finish(INTERRUPT_CYCLES);
                }
                // Masked IRQs are dropped here; level-triggered sources re-request.
                Interrupt::Irq => {}
            }
        }

        let opcode = self.fetch_byte(bus);
        let (op, mode) = decode(opcode);
        let operand = self.resolve(bus, mode);
        self.execute(bus, opcode, op, mode, operand);
        self.finish(OP_CYCLES[opcode as usize] as u32)
    }

    fn finish(&mut self, base: u32) -> u32 {
        let cycles = base + self.extra_cycles;
        self.last_cycles = cycles;
        self.total_cycles += cycles as u64;
        cycles
    }

    fn service_reset<B: CpuBus + ?Sized>(&mut self, bus: &mut B) {
        self.a = 0;
        self.x = 0;
        self.y = 0;
        self.s = 0xFD;
        self.p = FLAG_INTERRUPT | FLAG_UNUSED;
        self.jammed = false;
        self.pc = self.read_u16(bus, Interrupt::Reset.vector());
        debug!(pc = format_args!("{:04X}", self.pc), "cpu reset");
    }

    fn service_interrupt<B: CpuBus + ?Sized>(&mut self, bus: &mut B, kind: Interrupt) {
        self.push_u16(bus, self.pc);
        self.push(bus, (self.p & !FLAG_BREAK) | FLAG_UNUSED);
        self.set_flag(FLAG_INTERRUPT, true);
        self.pc = self.read_u16(bus, kind.vector());
    }

    fn read<B: CpuBus + ?Sized>(&mut self, bus: &mut B, addr: u16) -> u8 {
        bus.read(addr)
    }

    fn write<B: CpuBus + ?Sized>(&mut self, bus: &mut B, addr: u16, value: u8) {
        self.extra_cycles += bus.write(addr, value);
    }

    fn fetch_byte<B: CpuBus + ?Sized>(&mut self, bus: &mut B) -> u8 {
        let value = self.read(bus, self.pc);
        self.pc = self.pc.wrapping_add(1);
        value
    }

    fn fetch_word<B: CpuBus + ?Sized>(&mut self, bus: &mut B) -> u16 {
        let lo = self.fetch_byte(bus) as u16;
        let hi = self.fetch_byte(bus) as u16;
        (hi << 8) | lo
    }

    fn read_u16<B: CpuBus + ?Sized>(&mut self, bus: &mut B, addr: u16) -> u16 {
        let lo = self.read(bus, addr) as u16;
        let hi = self.read(bus, addr.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    fn read_zp_u16<B: CpuBus + ?Sized>(&mut self, bus: &mut B, addr: u8) -> u16 {
        let lo = self.read(bus, addr as u16) as u16;
        let hi = self.read(bus, addr.wrapping_add(1) as u16) as u16;
        (hi << 8) | lo
    }

    fn push<B: CpuBus + ?Sized>(&mut self, bus: &mut B, value: u8) {
        self.write(bus, STACK_BASE | self.s as u16, value);
        self.s = self.s.wrapping_sub(1);
    }

    fn pop<B: CpuBus + ?Sized>(&mut self, bus: &mut B) -> u8 {
        self.s = self.s.wrapping_add(1);
        self.read(bus, STACK_BASE | self.s as u16)
    }

    fn push_u16<B: CpuBus + ?Sized>(&mut self, bus: &mut B, value: u16) {
        self.push(bus, (value >> 8) as u8);
        self.push(bus, value as u8);
    }

    fn pop_u16<B: CpuBus + ?Sized>(&mut self, bus: &mut B) -> u16 {
        let lo = self.pop(bus) as u16;
        let hi = self.pop(bus) as u16;
        (hi << 8) | lo
    }

    fn resolve<B: CpuBus + ?Sized>(&mut self, bus: &mut B, mode: AddrMode) -> Operand {
        match mode {
            AddrMode::Implied | AddrMode::Accumulator => Operand::default(),
            AddrMode::Immediate => {
                let addr = self.pc;
                self.pc = self.pc.wrapping_add(1);
                Operand::at(addr)
            }
            AddrMode::ZeroPage => Operand::at(self.fetch_byte(bus) as u16),
            AddrMode::ZeroPageX => {
                let base = self.fetch_byte(bus);
                let _ = self.read(bus, base as u16);
                Operand::at(base.wrapping_add(self.x) as u16)
            }
            AddrMode::ZeroPageY => {
                let base = self.fetch_byte(bus);
                let _ = self.read(bus, base as u16);
                Operand::at(base.wrapping_add(self.y) as u16)
            }
            AddrMode::Relative => {
                let offset = self.fetch_byte(bus) as i8;
                let target = self.pc.wrapping_add(offset as i16 as u16);
                Operand::indexed(self.pc, target)
            }
            AddrMode::Absolute => Operand::at(self.fetch_word(bus)),
            AddrMode::AbsoluteX => {
                let base = self.fetch_word(bus);
                Operand::indexed(base, base.wrapping_add(self.x as u16))
            }
            AddrMode::AbsoluteY => {
                let base = self.fetch_word(bus);
                Operand::indexed(base, base.wrapping_add(self.y as u16))
            }
            AddrMode::Indirect => {
                // The pointer's high byte never carries into the next page.
                let ptr = self.fetch_word(bus);
                let lo = self.read(bus, ptr) as u16;
                let hi = self.read(bus, (ptr & 0xFF00) | (ptr.wrapping_add(1) & 0x00FF)) as u16;
                Operand::at((hi << 8) | lo)
            }
            AddrMode::IndirectX => {
                let zp = self.fetch_byte(bus);
                let _ = self.read(bus, zp as u16);
                Operand::at(self.read_zp_u16(bus, zp.wrapping_add(self.x)))
            }
            AddrMode::IndirectY => {
                let zp = self.fetch_byte(bus);
                let base = self.read_zp_u16(bus, zp);
                Operand::indexed(base, base.wrapping_add(self.y as u16))
            }
        }
    }

    /// Operand read for read-type operations, charging the page penalty.
    fn load<B: CpuBus + ?Sized>(&mut self, bus: &mut B, op: Op, operand: Operand) -> u8 {
        if operand.page_crossed && op.pays_page_penalty() {
            let _ = self.read(bus, operand.wrong_page_addr());
            self.extra_cycles += 1;
        }
        self.read(bus, operand.addr)
    }

    fn store<B: CpuBus + ?Sized>(
        &mut self,
        bus: &mut B,
        mode: AddrMode,
        operand: Operand,
        value: u8,
    ) {
        if matches!(
            mode,
            AddrMode::AbsoluteX | AddrMode::AbsoluteY | AddrMode::IndirectY
        ) {
            let _ = self.read(bus, operand.wrong_page_addr());
        }
        self.write(bus, operand.addr, value);
    }

    fn execute<B: CpuBus + ?Sized>(
        &mut self,
        bus: &mut B,
        opcode: u8,
        op: Op,
        mode: AddrMode,
        operand: Operand,
    ) {
        match op {
            Op::Lda => {
                self.a = self.load(bus, op, operand);
                self.update_zn(self.a);
            }
            Op::Ldx => {
                self.x = self.load(bus, op, operand);
                self.update_zn(self.x);
            }
            Op::Ldy => {
                self.y = self.load(bus, op, operand);
                self.update_zn(self.y);
            }
            Op::Lax => {
                let value = self.load(bus, op, operand);
                self.a = value;
                self.x = value;
                self.update_zn(value);
            }
            Op::Las => {
                let value = self.load(bus, op, operand) & self.s;
                self.a = value;
                self.x = value;
                self.s = value;
                self.update_zn(value);
            }
            Op::Sta => self.store(bus, mode, operand, self.a),
            Op::Stx => self.store(bus, mode, operand, self.x),
            Op::Sty => self.store(bus, mode, operand, self.y),
            Op::Sax => self.store(bus, mode, operand, self.a & self.x),

            Op::Adc => {
                let value = self.load(bus, op, operand);
                self.adc(value);
            }
            Op::Sbc => {
                let value = self.load(bus, op, operand);
                self.sbc(value);
            }
            Op::And => {
                let value = self.load(bus, op, operand);
                self.and(value);
            }
            Op::Ora => {
                let value = self.load(bus, op, operand);
                self.ora(value);
            }
            Op::Eor => {
                let value = self.load(bus, op, operand);
                self.eor(value);
            }
            Op::Bit => {
                let value = self.load(bus, op, operand);
                self.bit(value);
            }
            Op::Cmp => {
                let value = self.load(bus, op, operand);
                self.compare(self.a, value);
            }
            Op::Cpx => {
                let value = self.load(bus, op, operand);
                self.compare(self.x, value);
            }
            Op::Cpy => {
                let value = self.load(bus, op, operand);
                self.compare(self.y, value);
            }

            Op::Asl => self.rmw(bus, mode, operand, RmwOp::Asl),
            Op::Lsr => self.rmw(bus, mode, operand, RmwOp::Lsr),
            Op::Rol => self.rmw(bus, mode, operand, RmwOp::Rol),
            Op::Ror => self.rmw(bus, mode, operand, RmwOp::Ror),
            Op::Inc => self.rmw(bus, mode, operand, RmwOp::Inc),
            Op::Dec => self.rmw(bus, mode, operand, RmwOp::Dec),
            Op::Slo => self.rmw(bus, mode, operand, RmwOp::Slo),
            Op::Rla => self.rmw(bus, mode, operand, RmwOp::Rla),
            Op::Sre => self.rmw(bus, mode, operand, RmwOp::Sre),
            Op::Rra => self.rmw(bus, mode, operand, RmwOp::Rra),
            Op::Dcp => self.rmw(bus, mode, operand, RmwOp::Dcp),
            Op::Isc => self.rmw(bus, mode, operand, RmwOp::Isc),

            Op::Inx => {
                self.x = self.x.wrapping_add(1);
                self.update_zn(self.x);
            }
            Op::Iny => {
                self.y = self.y.wrapping_add(1);
                self.update_zn(self.y);
            }
            Op::Dex => {
                self.x = self.x.wrapping_sub(1);
                self.update_zn(self.x);
            }
            Op::Dey => {
                self.y = self.y.wrapping_sub(1);
                self.update_zn(self.y);
            }
            Op::Tax => {
                self.x = self.a;
                self.update_zn(self.x);
            }
            Op::Tay => {
                self.y = self.a;
                self.update_zn(self.y);
            }
            Op::Txa => {
                self.a = self.x;
                self.update_zn(self.a);
            }
            Op::Tya => {
                self.a = self.y;
                self.update_zn(self.a);
            }
            Op::Tsx => {
                self.x = self.s;
                self.update_zn(self.x);
            }
            Op::Txs => self.s = self.x,

            Op::Clc => self.set_flag(FLAG_CARRY, false),
            Op::Sec => self.set_flag(FLAG_CARRY, true),
            Op::Cli => self.set_flag(FLAG_INTERRUPT, false),
            Op::Sei => self.set_flag(FLAG_INTERRUPT, true),
            Op::Cld => self.set_flag(FLAG_DECIMAL, false),
            Op::Sed => self.set_flag(FLAG_DECIMAL, true),
            Op::Clv => self.set_flag(FLAG_OVERFLOW, false),

            Op::Bpl => self.branch(bus, !self.flag(FLAG_NEGATIVE), operand),
            Op::Bmi => self.branch(bus, self.flag(FLAG_NEGATIVE), operand),
            Op::Bvc => self.branch(bus, !self.flag(FLAG_OVERFLOW), operand),
            Op::Bvs => self.branch(bus, self.flag(FLAG_OVERFLOW), operand),
            Op::Bcc => self.branch(bus, !self.flag(FLAG_CARRY), operand),
            Op::Bcs => self.branch(bus, self.flag(FLAG_CARRY), operand),
            Op::Bne => self.branch(bus, !self.flag(FLAG_ZERO), operand),
            Op::Beq => self.branch(bus, self.flag(FLAG_ZERO), operand),

            Op::Jmp => self.pc = operand.addr,
            Op::Jsr => {
                let ret = self.pc.wrapping_sub(1);
                self.push_u16(bus, ret);
                self.pc = operand.addr;
            }
            Op::Rts => {
                self.pc = self.pop_u16(bus).wrapping_add(1);
            }
            Op::Rti => {
                let p = self.pop(bus);
                self.p = (p & !FLAG_BREAK) | FLAG_UNUSED;
                self.pc = self.pop_u16(bus);
            }
            Op::Brk => {
                let ret = self.pc.wrapping_add(1);
                self.push_u16(bus, ret);
                self.push(bus, self.p | FLAG_BREAK | FLAG_UNUSED);
                self.set_flag(FLAG_INTERRUPT, true);
                self.pc = self.read_u16(bus, Interrupt::Irq.vector());
            }
            Op::Pha => self.push(bus, self.a),
            Op::Php => self.push(bus, self.p | FLAG_BREAK | FLAG_UNUSED),
            Op::Pla => {
                self.a = self.pop(bus);
                self.update_zn(self.a);
            }
            Op::Plp => {
                let p = self.pop(bus);
                self.p = (p & !FLAG_BREAK) | FLAG_UNUSED;
            }

            Op::Nop => {
                if mode != AddrMode::Implied {
                    let _ = self.load(bus, op, operand);
                }
            }

            Op::Anc => {
                let imm = self.load(bus, op, operand);
                self.and(imm);
                self.set_flag(FLAG_CARRY, (self.a & 0x80) != 0);
            }
            Op::Alr => {
                let imm = self.load(bus, op, operand);
                self.a &= imm;
                self.a = self.lsr(self.a);
            }
            Op::Arr => {
                let imm = self.load(bus, op, operand);
                self.a &= imm;
                let carry_in = if self.flag(FLAG_CARRY) { 0x80 } else { 0 };
                self.a = (self.a >> 1) | carry_in;
                self.update_zn(self.a);
                self.set_flag(FLAG_CARRY, (self.a & 0x40) != 0);
                self.set_flag(
                    FLAG_OVERFLOW,
                    (((self.a >> 6) & 0x01) ^ ((self.a >> 5) & 0x01)) != 0,
                );
            }
            Op::Xaa => {
                let imm = self.load(bus, op, operand);
                self.a = (self.a | 0xEE) & self.x & imm;
                self.update_zn(self.a);
            }
            Op::Lxa => {
                let imm = self.load(bus, op, operand);
                self.a = (self.a | 0xEE) & imm;
                self.x = self.a;
                self.update_zn(self.a);
            }
            Op::Axs => {
                let imm = self.load(bus, op, operand);
                let masked = self.a & self.x;
                self.set_flag(FLAG_CARRY, masked >= imm);
                self.x = masked.wrapping_sub(imm);
                self.update_zn(self.x);
            }

            Op::Sha => self.unstable_store(bus, operand, self.a & self.x, false),
            Op::Shx => self.unstable_store(bus, operand, self.x, true),
            Op::Shy => self.unstable_store(bus, operand, self.y, true),
            Op::Tas => {
                self.s = self.a & self.x;
                self.unstable_store(bus, operand, self.s, false);
            }

            Op::Kil => {
                if !self.jammed {
                    warn!(
                        opcode = format_args!("{opcode:02X}"),
                        pc = format_args!("{:04X}", self.pc.wrapping_sub(1)),
                        "cpu jammed"
                    );
                }
                self.jammed = true;
                self.pc = self.pc.wrapping_sub(1);
            }
        }
    }

    /// SHA/SHX/SHY/TAS store `value & (high byte of base + 1)`. On a page
    /// cross the stored value also replaces the high byte of the address.
    fn unstable_store<B: CpuBus + ?Sized>(
        &mut self,
        bus: &mut B,
        operand: Operand,
        value: u8,
        value_is_high_byte: bool,
    ) {
        let _ = self.read(bus, operand.wrong_page_addr());
        let h = ((operand.base >> 8) as u8).wrapping_add(1);
        let stored = value & h;
        let addr = if !operand.page_crossed {
            operand.addr
        } else if value_is_high_byte {
            ((stored as u16) << 8) | (operand.addr & 0x00FF)
        } else {
            (((h & self.x) as u16) << 8) | (operand.addr & 0x00FF)
        };
        self.write(bus, addr, stored);
    }

    fn rmw<B: CpuBus + ?Sized>(
        &mut self,
        bus: &mut B,
        mode: AddrMode,
        operand: Operand,
        op: RmwOp,
    ) {
        if mode == AddrMode::Accumulator {
            self.a = self.apply_rmw(op, self.a);
            return;
        }

        if matches!(
            mode,
            AddrMode::AbsoluteX | AddrMode::AbsoluteY | AddrMode::IndirectY
        ) {
            let _ = self.read(bus, operand.wrong_page_addr());
        }
        let value = self.read(bus, operand.addr);
        self.write(bus, operand.addr, value);
        let result = self.apply_rmw(op, value);
        self.write(bus, operand.addr, result);
    }

    fn apply_rmw(&mut self, op: RmwOp, value: u8) -> u8 {
        match op {
            RmwOp::Asl => self.asl(value),
            RmwOp::Rol => self.rol(value),
            RmwOp::Lsr => self.lsr(value),
            RmwOp::Ror => self.ror(value),
            RmwOp::Dec => {
                let result = value.wrapping_sub(1);
                self.update_zn(result);
                result
            }
            RmwOp::Inc => {
                let result = value.wrapping_add(1);
                self.update_zn(result);
                result
            }
            RmwOp::Slo => {
                let result = self.asl(value);
                self.ora(result);
                result
            }
            RmwOp::Rla => {
                let result = self.rol(value);
                self.and(result);
                result
            }
            RmwOp::Sre => {
                let result = self.lsr(value);
                self.eor(result);
                result
            }
            RmwOp::Rra => {
                let result = self.ror(value);
                self.adc(result);
                result
            }
            RmwOp::Dcp => {
                let result = value.wrapping_sub(1);
                self.compare(self.a, result);
                result
            }
            RmwOp::Isc => {
                let result = value.wrapping_add(1);
                self.sbc(result);
                result
            }
        }
    }

    fn branch<B: CpuBus + ?Sized>(&mut self, bus: &mut B, condition: bool, operand: Operand) {
        if !condition {
            return;
        }
        let _ = self.read(bus, self.pc);
        self.extra_cycles += 1;
        if operand.page_crossed {
            let _ = self.read(bus, operand.wrong_page_addr());
            self.extra_cycles += 1;
        }
        self.pc = operand.addr;
    }

    fn ora(&mut self, value: u8) {
        self.a |= value;
        self.update_zn(self.a);
    }

    fn and(&mut self, value: u8) {
        self.a &= value;
        self.update_zn(self.a);
    }

    fn eor(&mut self, value: u8) {
        self.a ^= value;
        self.update_zn(self.a);
    }

    fn bit(&mut self, value: u8) {
        self.set_flag(FLAG_ZERO, (self.a & value) == 0);
        self.set_flag(FLAG_NEGATIVE, (value & 0x80) != 0);
        self.set_flag(FLAG_OVERFLOW, (value & 0x40) != 0);
    }

    fn compare(&mut self, register: u8, value: u8) {
        let result = register.wrapping_sub(value);
        self.set_flag(FLAG_CARRY, register >= value);
        self.update_zn(result);
    }

    fn adc(&mut self, value: u8) {
        if self.decimal_mode && self.flag(FLAG_DECIMAL) {
            self.adc_decimal(value);
            return;
        }

        let carry_in = self.flag(FLAG_CARRY) as u16;
        let result = self.a as u16 + value as u16 + carry_in;
        let out = result as u8;

        self.set_flag(FLAG_CARRY, result > 0xFF);
        self.set_flag(FLAG_OVERFLOW, ((self.a ^ out) & (value ^ out) & 0x80) != 0);
        self.a = out;
        self.update_zn(self.a);
    }

    fn sbc(&mut self, value: u8) {
        if self.decimal_mode && self.flag(FLAG_DECIMAL) {
            self.sbc_decimal(value);
            return;
        }
        self.adc(value ^ 0xFF);
    }

    // NMOS behaviour: Z comes from the binary sum, N and V from the
    // half-adjusted high nibble, C from the fully adjusted one.
    fn adc_decimal(&mut self, value: u8) {
        let carry_in = self.flag(FLAG_CARRY) as u16;
        let a = self.a as u16;
        let v = value as u16;

        let mut lo = (a & 0x0F) + (v & 0x0F) + carry_in;
        if lo > 9 {
            lo += 6;
        }
        let mut hi = (a >> 4) + (v >> 4) + u16::from(lo > 0x0F);

        self.set_flag(FLAG_ZERO, ((a + v + carry_in) & 0xFF) == 0);
        self.set_flag(FLAG_NEGATIVE, (hi & 0x08) != 0);
        self.set_flag(
            FLAG_OVERFLOW,
            (((hi << 4) ^ a) & 0x80) != 0 && ((a ^ v) & 0x80) == 0,
        );
        if hi > 9 {
            hi += 6;
        }
        self.set_flag(FLAG_CARRY, hi > 0x0F);
        self.a = ((hi << 4) | (lo & 0x0F)) as u8;
    }

    // Flags follow the binary subtraction; only the result is adjusted.
    fn sbc_decimal(&mut self, value: u8) {
        let borrow = i16::from(!self.flag(FLAG_CARRY));
        let a = self.a as i16;
        let v = value as i16;
        let binary = a - v - borrow;

        let mut lo = (a & 0x0F) - (v & 0x0F) - borrow;
        let mut hi = (a >> 4) - (v >> 4);
        if lo < 0 {
            lo -= 6;
            hi -= 1;
        }
        if hi < 0 {
            hi -= 6;
        }

        let out = binary as u8;
        self.set_flag(FLAG_CARRY, binary >= 0);
        self.set_flag(
            FLAG_OVERFLOW,
            ((self.a ^ value) & (self.a ^ out) & 0x80) != 0,
        );
        self.update_zn(out);
        self.a = (((hi << 4) | (lo & 0x0F)) & 0xFF) as u8;
    }

    fn asl(&mut self, value: u8) -> u8 {
        self.set_flag(FLAG_CARRY, (value & 0x80) != 0);
        let result = value << 1;
        self.update_zn(result);
        result
    }

    fn lsr(&mut self, value: u8) -> u8 {
        self.set_flag(FLAG_CARRY, (value & 0x01) != 0);
        let result = value >> 1;
        self.update_zn(result);
        result
    }

    fn rol(&mut self, value: u8) -> u8 {
        let carry_in = self.flag(FLAG_CARRY) as u8;
        self.set_flag(FLAG_CARRY, (value & 0x80) != 0);
        let result = (value << 1) | carry_in;
        self.update_zn(result);
        result
    }

    fn ror(&mut self, value: u8) -> u8 {
        let carry_in = if self.flag(FLAG_CARRY) { 0x80 } else { 0 };
        self.set_flag(FLAG_CARRY, (value & 0x01) != 0);
        let result = (value >> 1) | carry_in;
        self.update_zn(result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestBus {
        mem: Vec<u8>,
        stall_on: Option<u16>,
    }

    impl TestBus {
        fn new() -> Self {
            Self {
                mem: vec![0; 0x10000],
                stall_on: None,
            }
        }

        fn load(&mut self, addr: u16, bytes: &[u8]) {
            let start = addr as usize;
            self.mem[start..start + bytes.len()].copy_from_slice(bytes);
        }

        fn set_vector(&mut self, vector: u16, target: u16) {
            self.load(vector, &[target as u8, (target >> 8) as u8]);
        }
    }

    impl CpuBus for TestBus {
        fn read(&mut self, addr: u16) -> u8 {
            self.mem[addr as usize]
        }

        fn write(&mut self, addr: u16, value: u8) -> u32 {
            self.mem[addr as usize] = value;
            if self.stall_on == Some(addr) { 513 } else { 0 }
        }
    }

    /// CPU already past its reset sequence with PC at `origin`.
    fn boot(bus: &mut TestBus, origin: u16) -> Cpu {
        bus.set_vector(0xFFFC, origin);
        let mut cpu = Cpu::new(false);
        assert_eq!(cpu.execute_op(bus), 7);
        cpu
    }

    #[test]
    fn reset_sequence_loads_vector() {
        let mut bus = TestBus::new();
        let cpu = boot(&mut bus, 0xC000);
        assert_eq!(cpu.pc, 0xC000);
        assert_eq!(cpu.s, 0xFD);
        assert_eq!(cpu.p, FLAG_INTERRUPT | FLAG_UNUSED);
        assert_eq!((cpu.a, cpu.x, cpu.y), (0, 0, 0));
        assert_eq!(cpu.total_cycles(), 7);
    }

    #[test]
    fn init_twice_is_identical() {
        let mut cpu = Cpu::new(true);
        cpu.a = 0x42;
        cpu.pc = 0x1234;
        cpu.nmi();
        cpu.init();
        let first = format!("{cpu:?}");
        cpu.init();
        assert_eq!(first, format!("{cpu:?}"));
        assert_eq!(cpu.pending_interrupt(), Some(Interrupt::Reset));
    }

    #[test]
    fn adc_immediate_sets_carry_and_overflow() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0x69, 0xC0]);
        let mut cpu = boot(&mut bus, 0x8000);
        cpu.a = 0xB8;

        let cycles = cpu.execute_op(&mut bus);
        assert_eq!(cycles, 2);
        assert_eq!(cpu.a, 0x78);
        assert!(cpu.flag(FLAG_CARRY));
        assert!(cpu.flag(FLAG_OVERFLOW));
        assert!(!cpu.flag(FLAG_NEGATIVE));
        assert!(!cpu.flag(FLAG_ZERO));
    }

    #[test]
    fn binary_adc_and_sbc_flags_match_twos_complement() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0x69, 0x00]);
        bus.load(0x9000, &[0xE9, 0x00]);
        let mut cpu = boot(&mut bus, 0x8000);

        for a in 0..=255u8 {
            for b in 0..=255u8 {
                for carry in [false, true] {
                    for (origin, subtract) in [(0x8000u16, false), (0x9000u16, true)] {
                        bus.mem[origin as usize + 1] = b;
                        cpu.pc = origin;
                        cpu.a = a;
                        cpu.p = FLAG_UNUSED | FLAG_DECIMAL | if carry { FLAG_CARRY } else { 0 };
                        cpu.execute_op(&mut bus);

                        let operand = if subtract { !b } else { b };
                        let wide = a as u16 + operand as u16 + carry as u16;
                        let signed = a as i8 as i16 + operand as i8 as i16 + carry as i16;
                        let out = wide as u8;
                        assert_eq!(cpu.a, out, "a={a:02X} b={b:02X} c={carry} sub={subtract}");
                        assert_eq!(cpu.flag(FLAG_CARRY), wide > 0xFF);
                        assert_eq!(cpu.flag(FLAG_OVERFLOW), !(-128..=127).contains(&signed));
                        assert_eq!(cpu.flag(FLAG_ZERO), out == 0);
                        assert_eq!(cpu.flag(FLAG_NEGATIVE), out & 0x80 != 0);
                    }
                }
            }
        }
    }

    #[test]
    fn decimal_mode_adjusts_when_enabled() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0xF8, 0x18, 0xA9, 0x19, 0x69, 0x28, 0x38, 0xE9, 0x09]);
        bus.set_vector(0xFFFC, 0x8000);
        let mut cpu = Cpu::new(true);
        cpu.execute_op(&mut bus);
        for _ in 0..4 {
            cpu.execute_op(&mut bus);
        }
        assert_eq!(cpu.a, 0x47);
        assert!(!cpu.flag(FLAG_CARRY));

        cpu.execute_op(&mut bus);
        cpu.execute_op(&mut bus);
        assert_eq!(cpu.a, 0x38);
        assert!(cpu.flag(FLAG_CARRY));
    }

    #[test]
    fn cycle_counts_follow_table_and_penalties() {
        for opcode in 0..=255u8 {
            let (op, mode) = decode(opcode);
            if op == Op::Kil {
                continue;
            }
            for crossing in [false, true] {
                let mut bus = TestBus::new();
                // Operand bytes F0 20: zero page $F0 or absolute $20F0, pointer at $F0 is $03F0.
                bus.load(0x8000, &[opcode, 0xF0, 0x20]);
                bus.load(0x00F0, &[0xF0, 0x03]);
                bus.set_vector(0xFFFE, 0x9000);
                let mut cpu = boot(&mut bus, 0x8000);
                cpu.s = 0xFD;
                let index = if crossing { 0x20 } else { 0x01 };
                cpu.x = index;
                cpu.y = index;
                // Branches: taken for the flag being tested, crossing depends on offset.
                cpu.p = FLAG_UNUSED;
                bus.mem[0x8001] = if crossing { 0x80 } else { 0x10 };
                if mode != AddrMode::Relative {
                    bus.mem[0x8001] = 0xF0;
                }

                let cycles = cpu.execute_op(&mut bus);
                let base = OP_CYCLES[opcode as usize] as u32;
                let expected = match mode {
                    AddrMode::Relative => {
                        let taken = matches!(op, Op::Bpl | Op::Bvc | Op::Bcc | Op::Bne);
                        base + if taken { 1 + crossing as u32 } else { 0 }
                    }
                    AddrMode::AbsoluteX | AddrMode::AbsoluteY | AddrMode::IndirectY
                        if crossing && op.pays_page_penalty() =>
                    {
                        base + 1
                    }
                    _ => base,
                };
                assert_eq!(cycles, expected, "opcode {opcode:02X} crossing={crossing}");
            }
        }
    }

    #[test]
    fn taken_branch_across_page_costs_four() {
        let mut bus = TestBus::new();
        bus.load(0x80F0, &[0xD0, 0x20]);
        let mut cpu = boot(&mut bus, 0x80F0);
        cpu.p = FLAG_UNUSED;
        assert_eq!(cpu.execute_op(&mut bus), 4);
        assert_eq!(cpu.pc, 0x8112);
    }

    #[test]
    fn jsr_and_rts_round_trip() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0x20, 0x00, 0x90, 0xEA]);
        bus.load(0x9000, &[0x60]);
        let mut cpu = boot(&mut bus, 0x8000);
        assert_eq!(cpu.execute_op(&mut bus), 6);
        assert_eq!(cpu.pc, 0x9000);
        assert_eq!(bus.mem[0x01FD], 0x80);
        assert_eq!(bus.mem[0x01FC], 0x02);
        assert_eq!(cpu.execute_op(&mut bus), 6);
        assert_eq!(cpu.pc, 0x8003);
    }

    #[test]
    fn brk_pushes_break_flag_and_skips_padding() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0x00, 0xFF]);
        bus.set_vector(0xFFFE, 0x9000);
        let mut cpu = boot(&mut bus, 0x8000);
        cpu.p = FLAG_UNUSED | FLAG_CARRY;
        assert_eq!(cpu.execute_op(&mut bus), 7);
        assert_eq!(cpu.pc, 0x9000);
        assert_eq!(bus.mem[0x01FD], 0x80);
        assert_eq!(bus.mem[0x01FC], 0x02);
        assert_eq!(bus.mem[0x01FB], FLAG_UNUSED | FLAG_CARRY | FLAG_BREAK);
        assert!(cpu.flag(FLAG_INTERRUPT));
    }

    #[test]
    fn nmi_pushes_state_without_break() {
        let mut bus = TestBus::new();
        bus.set_vector(0xFFFA, 0xA000);
        let mut cpu = boot(&mut bus, 0x8000);
        cpu.nmi();
        assert_eq!(cpu.execute_op(&mut bus), 7);
        assert_eq!(cpu.pc, 0xA000);
        assert_eq!(bus.mem[0x01FB] & FLAG_BREAK, 0);
        assert_eq!(cpu.s, 0xFA);
    }

    #[test]
    fn masked_irq_is_dropped() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0xEA, 0x58, 0xEA]);
        bus.set_vector(0xFFFE, 0xB000);
        let mut cpu = boot(&mut bus, 0x8000);
        cpu.irq();
        assert_eq!(cpu.execute_op(&mut bus), 2);
        assert_eq!(cpu.pc, 0x8001);
        assert_eq!(cpu.pending_interrupt(), None);

        // CLI, then a fresh request is serviced.
        cpu.execute_op(&mut bus);
        cpu.irq();
        assert_eq!(cpu.execute_op(&mut bus), 7);
        assert_eq!(cpu.pc, 0xB000);
    }

    #[test]
    fn higher_priority_request_wins() {
        let mut bus = TestBus::new();
        bus.set_vector(0xFFFA, 0xA000);
        let mut cpu = boot(&mut bus, 0x8000);
        cpu.irq();
        cpu.nmi();
        cpu.irq();
        assert_eq!(cpu.pending_interrupt(), Some(Interrupt::Nmi));
        cpu.execute_op(&mut bus);
        assert_eq!(cpu.pc, 0xA000);
    }

    #[test]
    fn rti_restores_flags_without_break() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0x40]);
        let mut cpu = boot(&mut bus, 0x8000);
        cpu.s = 0xFA;
        bus.load(0x01FB, &[0xFF, 0x34, 0x12]);
        assert_eq!(cpu.execute_op(&mut bus), 6);
        assert_eq!(cpu.pc, 0x1234);
        assert_eq!(cpu.p, 0xFF & !FLAG_BREAK);
    }

    #[test]
    fn jmp_indirect_wraps_within_page() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0x6C, 0xFF, 0x02]);
        bus.load(0x02FF, &[0x34]);
        bus.load(0x0200, &[0x12]);
        bus.load(0x0300, &[0x56]);
        let mut cpu = boot(&mut bus, 0x8000);
        assert_eq!(cpu.execute_op(&mut bus), 5);
        assert_eq!(cpu.pc, 0x1234);
    }

    #[test]
    fn zero_page_indexing_wraps() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0xB5, 0xF0]);
        bus.load(0x0010, &[0x99]);
        let mut cpu = boot(&mut bus, 0x8000);
        cpu.x = 0x20;
        assert_eq!(cpu.execute_op(&mut bus), 4);
        assert_eq!(cpu.a, 0x99);
    }

    #[test]
    fn illegal_rmw_opcodes_combine_operations() {
        let mut bus = TestBus::new();
        // SLO $10 ; DCP $11 ; ISC $12 ; LAX $13 ; SAX $14
        bus.load(0x8000, &[0x07, 0x10, 0xC7, 0x11, 0xE7, 0x12, 0xA7, 0x13, 0x87, 0x14]);
        bus.load(0x0010, &[0x41, 0x05, 0x0F, 0x3C]);
        let mut cpu = boot(&mut bus, 0x8000);
        cpu.a = 0x01;

        cpu.execute_op(&mut bus);
        assert_eq!(bus.mem[0x10], 0x82);
        assert_eq!(cpu.a, 0x83);

        cpu.a = 0x04;
        cpu.execute_op(&mut bus);
        assert_eq!(bus.mem[0x11], 0x04);
        assert!(cpu.flag(FLAG_ZERO) && cpu.flag(FLAG_CARRY));

        cpu.a = 0x20;
        cpu.execute_op(&mut bus);
        assert_eq!(bus.mem[0x12], 0x10);
        assert_eq!(cpu.a, 0x10);

        cpu.execute_op(&mut bus);
        assert_eq!((cpu.a, cpu.x), (0x3C, 0x3C));

        cpu.x = 0x0F;
        cpu.execute_op(&mut bus);
        assert_eq!(bus.mem[0x14], 0x0C);
    }

    #[test]
    fn write_stall_is_added_to_cycles() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0x8D, 0x14, 0x40]);
        bus.stall_on = Some(0x4014);
        let mut cpu = boot(&mut bus, 0x8000);
        assert_eq!(cpu.execute_op(&mut bus), 4 + 513);
    }

    #[test]
    fn jam_halts_until_reset() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0x02, 0xEA]);
        let mut cpu = boot(&mut bus, 0x8000);
        cpu.execute_op(&mut bus);
        assert!(cpu.is_jammed());
        assert_eq!(cpu.execute_op(&mut bus), 2);
        assert_eq!(cpu.pc, 0x8000);

        cpu.reset();
        assert_eq!(cpu.execute_op(&mut bus), 7);
        assert!(!cpu.is_jammed());
        assert_eq!(cpu.pc, 0x8000);
    }

    #[test]
    fn jammed_cpu_ignores_nmi_and_irq() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0x58, 0x12]);
        let mut cpu = boot(&mut bus, 0x8000);
        cpu.execute_op(&mut bus);
        cpu.execute_op(&mut bus);
        assert!(cpu.is_jammed());
        let stack = cpu.s;

        cpu.nmi();
        assert_eq!(cpu.execute_op(&mut bus), 2);
        cpu.irq();
        assert_eq!(cpu.execute_op(&mut bus), 2);
        assert!(cpu.is_jammed());
        assert_eq!(cpu.s, stack);
        assert_eq!(cpu.pc, 0x8001);

        cpu.reset();
        assert_eq!(cpu.execute_op(&mut bus), 7);
        assert!(!cpu.is_jammed());
        assert_eq!(cpu.pending_interrupt(), None);
    }

    #[test]
    fn php_sets_break_and_plp_clears_it() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0x08, 0x28]);
        let mut cpu = boot(&mut bus, 0x8000);
        cpu.p = FLAG_UNUSED | FLAG_NEGATIVE;
        cpu.execute_op(&mut bus);
        assert_eq!(bus.mem[0x01FD], FLAG_UNUSED | FLAG_NEGATIVE | FLAG_BREAK);
        cpu.execute_op(&mut bus);
        assert_eq!(cpu.p, FLAG_UNUSED | FLAG_NEGATIVE);
    }
}
