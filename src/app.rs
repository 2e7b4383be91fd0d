use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use eframe::egui::{self, ColorImage, Key, TextureHandle, TextureOptions};
use tracing::{info, warn};

use crate::audio::AudioOutput;
use crate::config::EmulatorConfig;
use crate::nes::driver::{
    AudioBlock, AudioSink, Driver, DriverState, InputSnapshot, InputSource, VideoFrame, VideoSink,
};
use crate::nes::ppu::{FRAME_HEIGHT, FRAME_WIDTH};
use crate::nes::{
    BUTTON_A, BUTTON_B, BUTTON_DOWN, BUTTON_LEFT, BUTTON_RIGHT, BUTTON_SELECT, BUTTON_START,
    BUTTON_UP, Machine,
};

const REPAINT_INTERVAL: Duration = Duration::from_millis(4);

/// Keeps only the newest frame; the display shows whatever arrived last.
#[derive(Default)]
struct LatestFrame {
    frame: Option<VideoFrame>,
}

impl VideoSink for LatestFrame {
    fn present(&mut self, frame: VideoFrame) {
        self.frame = Some(frame);
    }
}

#[derive(Default)]
struct KeyboardPad {
    port1: u8,
}

impl InputSource for KeyboardPad {
    fn snapshot(&mut self) -> InputSnapshot {
        InputSnapshot {
            port1: self.port1,
            port2: 0,
        }
    }
}

/// Used when no output device could be opened.
struct DiscardAudio;

impl AudioSink for DiscardAudio {
    fn queue(&mut self, _block: AudioBlock) {}
}

pub struct FamicoreApp {
    config: EmulatorConfig,
    driver: Option<Driver>,
    audio: Option<AudioOutput>,
    discard_audio: DiscardAudio,
    latest: LatestFrame,
    pad: KeyboardPad,
    frame_texture: Option<TextureHandle>,
    status_line: String,
    loaded_rom: Option<PathBuf>,
}

impl FamicoreApp {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        config: EmulatorConfig,
        rom: Option<PathBuf>,
    ) -> Self {
        cc.egui_ctx.set_visuals(egui::Visuals::dark());

        let audio = if config.audio_enabled {
            match AudioOutput::new() {
                Ok(audio) => Some(audio),
                Err(err) => {
                    warn!("audio disabled: {err:#}");
                    None
                }
            }
        } else {
            None
        };

        let mut app = Self {
            config,
            driver: None,
            audio,
            discard_audio: DiscardAudio,
            latest: LatestFrame::default(),
            pad: KeyboardPad::default(),
            frame_texture: None,
            status_line: "Drop a .nes file or click Open ROM".to_string(),
            loaded_rom: None,
        };
        if let Some(path) = rom {
            app.load_rom(&path);
        }
        app
    }

    fn load_rom(&mut self, path: &Path) {
        self.persist_battery_ram();
        match self.open_machine(path) {
            Ok(machine) => {
                self.status_line = format!(
                    "Loaded {} using {}",
                    path.file_name().and_then(|f| f.to_str()).unwrap_or("ROM"),
                    machine.mapper_label()
                );
                self.driver = Some(Driver::new(
                    machine,
                    self.config.driver_timing(),
                    Instant::now(),
                ));
                self.loaded_rom = Some(path.to_path_buf());
                self.latest = LatestFrame::default();
                self.frame_texture = None;
            }
            Err(err) => {
                warn!("rom load failed: {err:#}");
                self.status_line = format!("Failed to load ROM: {err:#}");
            }
        }
    }

    fn open_machine(&self, path: &Path) -> Result<Machine> {
        let mut machine = Machine::from_rom_file(path, self.config.decimal_mode)
            .with_context(|| format!("failed to load {}", path.display()))?;
        if self.config.save_battery_ram && machine.battery_ram().is_some() {
            let save = save_path(path);
            if save.exists() {
                let data = fs::read(&save)
                    .with_context(|| format!("failed to read {}", save.display()))?;
                machine.load_battery_ram(&data);
                info!(path = %save.display(), "battery RAM restored");
            }
        }
        Ok(machine)
    }

    fn persist_battery_ram(&self) {
        if !self.config.save_battery_ram {
            return;
        }
        let (Some(driver), Some(rom)) = (&self.driver, &self.loaded_rom) else {
            return;
        };
        let Some(ram) = driver.machine().battery_ram() else {
            return;
        };
        let save = save_path(rom);
        match fs::write(&save, ram) {
            Ok(()) => info!(path = %save.display(), "battery RAM saved"),
            Err(err) => warn!(path = %save.display(), %err, "failed to save battery RAM"),
        }
    }

    fn open_rom_dialog(&mut self) {
        if let Some(path) = rfd::FileDialog::new()
            .add_filter("NES ROM", &["nes"])
            .set_title("Open NES ROM")
            .pick_file()
        {
            self.load_rom(&path);
        }
    }

    fn handle_dropped_files(&mut self, ctx: &egui::Context) {
        let dropped = ctx.input(|input| input.raw.dropped_files.clone());
        for file in dropped {
            if let Some(path) = file.path {
                let is_nes = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("nes"));

                if is_nes {
                    self.load_rom(&path);
                } else {
                    self.status_line = format!("Unsupported file: {}", path.display());
                }
            }
        }
    }

    fn reset(&mut self) {
        if let Some(driver) = self.driver.as_mut() {
            driver.machine_mut().reset();
            self.status_line = "Reset complete".to_string();
        }
    }

    fn toggle_pause(&mut self) {
        let Some(driver) = self.driver.as_mut() else {
            return;
        };
        match driver.state() {
            DriverState::Running => driver.pause(),
            DriverState::Paused => driver.resume(Instant::now()),
            DriverState::Stopped => {}
        }
    }

    fn handle_shortcuts(&mut self, ctx: &egui::Context) {
        if ctx.input(|i| i.modifiers.command && i.key_pressed(Key::O)) {
            self.open_rom_dialog();
        }
        if ctx.input(|i| i.key_pressed(Key::R)) {
            self.reset();
        }
        if ctx.input(|i| i.key_pressed(Key::P)) {
            self.toggle_pause();
        }
    }

    fn controller_state_from_input(ctx: &egui::Context) -> u8 {
        const BINDINGS: [(Key, u8); 12] = [
            (Key::W, BUTTON_UP),
            (Key::S, BUTTON_DOWN),
            (Key::A, BUTTON_LEFT),
            (Key::D, BUTTON_RIGHT),
            (Key::ArrowUp, BUTTON_UP),
            (Key::ArrowDown, BUTTON_DOWN),
            (Key::ArrowLeft, BUTTON_LEFT),
            (Key::ArrowRight, BUTTON_RIGHT),
            (Key::Space, BUTTON_A),
            (Key::Z, BUTTON_A),
            (Key::X, BUTTON_B),
            (Key::Enter, BUTTON_START),
        ];

        ctx.input(|input| {
            let mut state = BINDINGS
                .iter()
                .filter(|(key, _)| input.key_down(*key))
                .fold(0u8, |state, (_, button)| state | button);
            if input.modifiers.shift {
                state |= BUTTON_SELECT;
            }
            state
        })
    }

    fn update_texture(&mut self, ctx: &egui::Context) {
        let Some(frame) = self.latest.frame.as_ref() else {
            return;
        };
        let image = ColorImage::from_rgb([frame.width, frame.height], &frame.pixels);

        if let Some(texture) = self.frame_texture.as_mut() {
            texture.set(image, TextureOptions::NEAREST);
        } else {
            self.frame_texture = Some(ctx.load_texture("nes-frame", image, TextureOptions::NEAREST));
        }
    }

    fn debug_panel(&self, ui: &mut egui::Ui) {
        let Some(driver) = self.driver.as_ref() else {
            return;
        };
        let machine = driver.machine();
        let cpu = machine.cpu();
        let counters = machine.counters();
        let bus = machine.bus().counters();
        let ppu = machine.ppu_counters();
        let (scanline, cycle) = machine.bus().ppu().debug_scanline_cycle();

        ui.collapsing("Debug", |ui| {
            ui.monospace(format!(
                "CPU A={:02X} X={:02X} Y={:02X} P={:02X} SP={:02X} PC={:04X} pending={:?} jammed={}",
                cpu.a,
                cpu.x,
                cpu.y,
                cpu.p,
                cpu.s,
                cpu.pc,
                cpu.pending_interrupt(),
                cpu.is_jammed()
            ));
            ui.monospace(format!(
                "Core frames={} instructions={} cycles={} nmi={} irq={} resets={} oam_dma={} dmc_fetches={}",
                counters.frames,
                counters.cpu_instructions,
                counters.cpu_cycles,
                counters.nmi_serviced,
                counters.irq_serviced,
                counters.resets,
                counters.oam_dma_transfers,
                counters.dmc_fetches
            ));
            ui.monospace(format!(
                "Bus reads={} writes={} ppu={}/{} apu/io={}/{} cart={}/{} last write=${:04X}:${:02X}",
                bus.cpu_reads,
                bus.cpu_writes,
                bus.ppu_register_reads,
                bus.ppu_register_writes,
                bus.apu_io_reads,
                bus.apu_io_writes,
                bus.cart_reads,
                bus.cart_writes,
                bus.last_write_addr,
                bus.last_write_value
            ));
            ui.monospace(format!(
                "PPU sl={} cy={} frames={} vblank={} suppressed={} nmi_edges={} nmi_fired={} overflow={} sprite0={} status_reads={}",
                scanline,
                cycle,
                ppu.frames,
                ppu.vblank_entries,
                ppu.vblank_suppressed,
                ppu.nmi_edges,
                ppu.nmi_fired,
                ppu.sprite_overflow_events,
                ppu.sprite0_hit_events,
                ppu.status_reads
            ));
            ui.monospace(format!(
                "Driver presented={} dropped_intervals={}",
                driver.frames_presented(),
                driver.intervals_dropped()
            ));
            ui.monospace(format!("Mapper detail: {}", machine.debug_mapper_state()));

            let events = machine.debug_recent_events(8);
            if !events.is_empty() {
                ui.separator();
                ui.label("Recent events:");
                for event in events {
                    ui.monospace(event);
                }
            }
        });
    }
}

impl Drop for FamicoreApp {
    fn drop(&mut self) {
        self.persist_battery_ram();
    }
}

impl eframe::App for FamicoreApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_dropped_files(ctx);
        self.handle_shortcuts(ctx);
        self.pad.port1 = Self::controller_state_from_input(ctx);

        if let Some(driver) = self.driver.as_mut() {
            let audio: &mut dyn AudioSink = match self.audio.as_mut() {
                Some(audio) => audio,
                None => &mut self.discard_audio,
            };
            driver.tick(Instant::now(), &mut self.latest, audio, &mut self.pad);
        }

        self.update_texture(ctx);

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if ui.button("Open ROM").clicked() {
                    self.open_rom_dialog();
                }

                let has_rom = self.driver.is_some();
                if ui
                    .add_enabled(has_rom, egui::Button::new("Reset (R)"))
                    .clicked()
                {
                    self.reset();
                }

                let paused = self
                    .driver
                    .as_ref()
                    .is_some_and(|driver| driver.state() == DriverState::Paused);
                let label = if paused { "Resume (P)" } else { "Pause (P)" };
                if ui.add_enabled(has_rom, egui::Button::new(label)).clicked() {
                    self.toggle_pause();
                }

                if let Some(path) = &self.loaded_rom {
                    ui.separator();
                    ui.label(path.display().to_string());
                }
            });
        });

        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            ui.horizontal_wrapped(|ui| {
                ui.label(&self.status_line);
                ui.separator();
                if let Some(driver) = &self.driver {
                    ui.label(format!("Mapper: {}", driver.machine().mapper_label()));
                    ui.separator();
                }
                if let Some(audio) = &self.audio {
                    ui.label(format!(
                        "Audio: {} Hz (queued {}, dropped {})",
                        audio.sample_rate(),
                        audio.queued_samples(),
                        audio.dropped_samples()
                    ));
                } else {
                    ui.label("Audio: off");
                }
                ui.separator();
                ui.label("Controls: WASD/arrows move, Space/Z=A, X=B, Enter=Start, Shift=Select, P=Pause, R=Reset");
            });

            ui.separator();
            self.debug_panel(ui);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                let available = ui.available_size();
                let scale_x = (available.x / FRAME_WIDTH as f32).max(1.0);
                let scale_y = (available.y / FRAME_HEIGHT as f32).max(1.0);
                let scale = scale_x.min(scale_y).floor().max(1.0);
                let target = egui::vec2(FRAME_WIDTH as f32 * scale, FRAME_HEIGHT as f32 * scale);

                if let Some(texture) = &self.frame_texture {
                    ui.add(egui::Image::new(texture).fit_to_exact_size(target));
                }
            });
        });

        ctx.request_repaint_after(REPAINT_INTERVAL);
    }
}

fn save_path(rom: &Path) -> PathBuf {
    rom.with_extension("sav")
}
