use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use famicore::nes::Machine;
use famicore::nes::trace::{TraceLine, compare_logs};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct TraceArgs {
    rom: PathBuf,
    entry: Option<u16>,
    steps: usize,
    compare: Option<PathBuf>,
    decimal_mode: bool,
}

fn print_help() {
    println!(
        "Instruction trace runner\n\n\
Usage:\n\
  trace_runner <rom.nes> [options]\n\n\
Options:\n\
  --entry <hex>        Force PC after the reset sequence (nestest automation: C000)\n\
  --steps <n>          Instructions to trace (default 8991, or the reference length)\n\
  --compare <log>      Compare against a reference log instead of printing\n\
  --decimal            Build the CPU with BCD arithmetic\n\
  -h, --help           Show this help\n"
    );
}

fn parse_args() -> Result<TraceArgs> {
    let mut rom = None;
    let mut entry = None;
    let mut steps = None;
    let mut compare = None;
    let mut decimal_mode = false;
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--entry" => {
                let value = args.next().context("--entry requires a hex address")?;
                let digits = value.trim_start_matches('$').trim_start_matches("0x");
                entry = Some(
                    u16::from_str_radix(digits, 16)
                        .with_context(|| format!("invalid --entry address: {value}"))?,
                );
            }
            "--steps" => {
                let value = args.next().context("--steps requires an integer")?;
                steps = Some(
                    value
                        .parse()
                        .with_context(|| format!("invalid --steps value: {value}"))?,
                );
            }
            "--compare" => {
                let value = args.next().context("--compare requires a log path")?;
                compare = Some(PathBuf::from(value));
            }
            "--decimal" => decimal_mode = true,
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other if other.starts_with("--") => {
                anyhow::bail!("unknown argument: {other}\nUse --help to view supported options.");
            }
            other => rom = Some(PathBuf::from(other)),
        }
    }

    let rom = rom.context("missing ROM path\nUse --help to view supported options.")?;
    Ok(TraceArgs {
        rom,
        entry,
        steps: steps.unwrap_or(0),
        compare,
        decimal_mode,
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("famicore=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    let mut machine = Machine::from_rom_file(&args.rom, args.decimal_mode)
        .with_context(|| format!("failed to load ROM {}", args.rom.display()))?;

    // The first step is the reset sequence itself.
    machine.step();
    if let Some(entry) = args.entry {
        let cpu = machine.cpu_mut();
        cpu.pc = entry;
        cpu.p = 0x24;
    }
    info!(
        mapper = machine.mapper_label(),
        pc = format_args!("{:04X}", machine.cpu().pc),
        "trace start"
    );

    let reference = match &args.compare {
        Some(path) => Some(
            fs::read_to_string(path)
                .with_context(|| format!("failed to read reference log {}", path.display()))?,
        ),
        None => None,
    };

    let steps = match (&reference, args.steps) {
        (_, n) if n > 0 => n,
        (Some(log), _) => log.lines().filter(|l| !l.trim().is_empty()).count(),
        (None, _) => 8991,
    };

    let mut trace = Vec::with_capacity(steps);
    for _ in 0..steps {
        let line = machine.trace_line();
        if reference.is_none() {
            println!("{line}");
        }
        trace.push(line);
        if machine.cpu().is_jammed() {
            break;
        }
        machine.step();
    }

    let Some(reference) = reference else {
        return Ok(());
    };
    match compare_logs(&reference, &trace) {
        Ok(matched) => {
            println!("OK: {matched} line(s) match");
            Ok(())
        }
        Err(mismatch) => {
            let tail: Vec<TraceLine> = trace.iter().rev().take(3).rev().copied().collect();
            eprintln!("last produced lines:");
            for line in &tail {
                eprintln!("  {line}");
            }
            // nestest reports failure codes in $02/$03.
            eprintln!(
                "ram[$02]=${:02X} ram[$03]=${:02X}",
                machine.bus().peek(0x0002),
                machine.bus().peek(0x0003)
            );
            Err(mismatch.into())
        }
    }
}
