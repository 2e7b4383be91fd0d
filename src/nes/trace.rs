use std::fmt;

use thiserror::Error;

use super::cpu::Cpu;

/// CPU state before an instruction executes, in the register columns of a
/// nestest log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceLine {
    pub pc: u16,
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub p: u8,
    pub sp: u8,
    /// Not every reference log carries a cycle column.
    pub cycles: Option<u64>,
}

impl TraceLine {
    pub fn from_cpu(cpu: &Cpu) -> Self {
        Self {
            pc: cpu.pc,
            a: cpu.a,
            x: cpu.x,
            y: cpu.y,
            p: cpu.p,
            sp: cpu.s,
            cycles: Some(cpu.total_cycles()),
        }
    }

    /// Pulls the PC and register columns out of a log line. Disassembly and
    /// PPU columns are skipped.
    pub fn parse(line: &str) -> Option<Self> {
        let pc = u16::from_str_radix(line.get(0..4)?, 16).ok()?;
        let mut a = None;
        let mut x = None;
        let mut y = None;
        let mut p = None;
        let mut sp = None;
        let mut cycles = None;

        for token in line.split_whitespace() {
            let Some((key, value)) = token.split_once(':') else {
                continue;
            };
            match key {
                "A" => a = u8::from_str_radix(value, 16).ok(),
                "X" => x = u8::from_str_radix(value, 16).ok(),
                "Y" => y = u8::from_str_radix(value, 16).ok(),
                "P" => p = u8::from_str_radix(value, 16).ok(),
                "SP" => sp = u8::from_str_radix(value, 16).ok(),
                "CYC" => cycles = value.parse().ok(),
                _ => {}
            }
        }

        Some(Self {
            pc,
            a: a?,
            x: x?,
            y: y?,
            p: p?,
            sp: sp?,
            cycles,
        })
    }

    /// Field-wise match; cycles only count when both sides have them.
    pub fn matches(&self, other: &TraceLine) -> bool {
        let cycles_match = match (self.cycles, other.cycles) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        self.pc == other.pc
            && self.a == other.a
            && self.x == other.x
            && self.y == other.y
            && self.p == other.p
            && self.sp == other.sp
            && cycles_match
    }
}

impl fmt::Display for TraceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04X}  A:{:02X} X:{:02X} Y:{:02X} P:{:02X} SP:{:02X}",
            self.pc, self.a, self.x, self.y, self.p, self.sp
        )?;
        if let Some(cycles) = self.cycles {
            write!(f, " CYC:{cycles}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TraceMismatch {
    #[error("line {line}: expected `{expected}`, got `{actual}`")]
    Diverged {
        line: usize,
        expected: String,
        actual: String,
    },
    #[error("line {line}: reference log line is not a trace line: `{text}`")]
    Unparseable { line: usize, text: String },
    #[error("trace ended after {produced} lines, reference has {expected}")]
    TooShort { produced: usize, expected: usize },
}

/// Compares a produced trace against a reference log line by line and
/// returns the number of matching lines, or the first mismatch. Blank
/// reference lines are skipped; extra produced lines are ignored.
pub fn compare_logs(expected: &str, actual: &[TraceLine]) -> Result<usize, TraceMismatch> {
    let mut produced = actual.iter();
    let mut matched = 0usize;

    for (index, text) in expected.lines().enumerate() {
        if text.trim().is_empty() {
            continue;
        }
        let line = index + 1;
        let reference = TraceLine::parse(text).ok_or_else(|| TraceMismatch::Unparseable {
            line,
            text: text.to_string(),
        })?;
        let Some(ours) = produced.next() else {
            return Err(TraceMismatch::TooShort {
                produced: matched,
                expected: expected.lines().filter(|l| !l.trim().is_empty()).count(),
            });
        };
        if !reference.matches(ours) {
            return Err(TraceMismatch::Diverged {
                line,
                expected: reference.to_string(),
                actual: ours.to_string(),
            });
        }
        matched += 1;
    }

    Ok(matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nes::Machine;
    use crate::nes::cartridge::Cartridge;
    use crate::nes::mapper::NameTableMirroring;

    const NESTEST_LINE: &str = "C000  4C F5 C5  JMP $C5F5                       A:00 X:00 Y:00 P:24 SP:FD PPU:  0, 21 CYC:7";

    #[test]
    fn parses_nestest_columns() {
        let line = TraceLine::parse(NESTEST_LINE).unwrap();
        assert_eq!(line.pc, 0xC000);
        assert_eq!((line.a, line.x, line.y), (0, 0, 0));
        assert_eq!(line.p, 0x24);
        assert_eq!(line.sp, 0xFD);
        assert_eq!(line.cycles, Some(7));
    }

    #[test]
    fn display_round_trips_through_parse() {
        let line = TraceLine {
            pc: 0xC72E,
            a: 0x01,
            x: 0xFF,
            y: 0x10,
            p: 0xE5,
            sp: 0xF9,
            cycles: Some(1234),
        };
        let text = line.to_string();
        assert_eq!(text, "C72E  A:01 X:FF Y:10 P:E5 SP:F9 CYC:1234");
        assert_eq!(TraceLine::parse(&text), Some(line));
    }

    #[test]
    fn indexed_disassembly_is_not_mistaken_for_registers() {
        let text = "C5F5  B5 00     LDA $00,X @ 00 = 00             A:00 X:00 Y:00 P:24 SP:FD CYC:10";
        let line = TraceLine::parse(text).unwrap();
        assert_eq!(line.pc, 0xC5F5);
        assert_eq!(line.cycles, Some(10));
    }

    #[test]
    fn compare_reports_first_divergence() {
        let reference = format!("{NESTEST_LINE}\nC5F5  A:00 X:00 Y:00 P:24 SP:FD CYC:10\n");
        let mut produced = vec![TraceLine::parse(NESTEST_LINE).unwrap()];
        produced.push(TraceLine {
            pc: 0xC5F5,
            a: 0,
            x: 0,
            y: 0,
            p: 0x24,
            sp: 0xFD,
            cycles: Some(10),
        });
        assert_eq!(compare_logs(&reference, &produced), Ok(2));

        produced[1].a = 0x01;
        match compare_logs(&reference, &produced) {
            Err(TraceMismatch::Diverged { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn short_trace_is_reported() {
        let reference = format!("{NESTEST_LINE}\n{NESTEST_LINE}\n");
        let produced = vec![TraceLine::parse(NESTEST_LINE).unwrap()];
        assert_eq!(
            compare_logs(&reference, &produced),
            Err(TraceMismatch::TooShort {
                produced: 1,
                expected: 2
            })
        );
    }

    #[test]
    fn missing_cycle_column_is_tolerated() {
        let reference = "C000  A:00 X:00 Y:00 P:24 SP:FD";
        let produced = vec![TraceLine::parse(NESTEST_LINE).unwrap()];
        assert_eq!(compare_logs(reference, &produced), Ok(1));
    }

    // LDA #$01 ; ADC #$7F ; LDX #$02 ; INX ; STA $00 ; JMP $8000
    const PROGRAM: [u8; 12] = [
        0xA9, 0x01, 0x69, 0x7F, 0xA2, 0x02, 0xE8, 0x85, 0x00, 0x4C, 0x00, 0x80,
    ];

    const PROGRAM_LOG: &str = "\
8000  A9 01     LDA #$01    A:00 X:00 Y:00 P:24 SP:FD CYC:7
8002  69 7F     ADC #$7F    A:01 X:00 Y:00 P:24 SP:FD CYC:9
8004  A2 02     LDX #$02    A:80 X:00 Y:00 P:E4 SP:FD CYC:11
8006  E8        INX         A:80 X:02 Y:00 P:64 SP:FD CYC:13
8007  85 00     STA $00     A:80 X:03 Y:00 P:64 SP:FD CYC:15
8009  4C 00 80  JMP $8000   A:80 X:03 Y:00 P:64 SP:FD CYC:18
8000  A9 01     LDA #$01    A:80 X:03 Y:00 P:64 SP:FD CYC:21
";

    fn run_program(steps: usize) -> Vec<TraceLine> {
        let mut prg_rom = vec![0xEAu8; 0x8000];
        prg_rom[..PROGRAM.len()].copy_from_slice(&PROGRAM);
        prg_rom[0x7FFC] = 0x00;
        prg_rom[0x7FFD] = 0x80;
        let cart = Cartridge {
            mapper_number: 0,
            mirroring: NameTableMirroring::Horizontal,
            has_battery: false,
            prg_rom,
            chr_rom: vec![0; 0x2000],
            chr_ram_size: 0,
            prg_ram_size: 0x2000,
            trainer: None,
        };
        let mut machine = Machine::from_cartridge(cart, false).unwrap();
        machine.step();

        let mut trace = Vec::with_capacity(steps);
        for _ in 0..steps {
            trace.push(machine.trace_line());
            machine.step();
        }
        trace
    }

    #[test]
    fn executed_program_matches_reference_log() {
        let trace = run_program(7);
        assert_eq!(trace[2].to_string(), "8004  A:80 X:00 Y:00 P:E4 SP:FD CYC:11");
        assert_eq!(compare_logs(PROGRAM_LOG, &trace), Ok(7));
    }

    #[test]
    fn executed_program_flags_wrong_reference_line() {
        let trace = run_program(7);
        let altered = PROGRAM_LOG.replace("X:03 Y:00 P:64 SP:FD CYC:18", "X:04 Y:00 P:64 SP:FD CYC:18");
        match compare_logs(&altered, &trace) {
            Err(TraceMismatch::Diverged {
                line,
                expected,
                actual,
            }) => {
                assert_eq!(line, 6);
                assert_eq!(expected, "8009  A:80 X:04 Y:00 P:64 SP:FD CYC:18");
                assert_eq!(actual, "8009  A:80 X:03 Y:00 P:64 SP:FD CYC:18");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
