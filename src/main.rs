use std::path::PathBuf;

use anyhow::Context;
use famicore::app;
use famicore::config::EmulatorConfig;
use famicore::nes::ppu::{FRAME_HEIGHT, FRAME_WIDTH};
use tracing_subscriber::EnvFilter;

const CONFIG_FILE: &str = "famicore.json";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("famicore=info")),
        )
        .init();

    let config_path = std::env::var_os("FAMICORE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
    let config = EmulatorConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let rom = std::env::args_os().nth(1).map(PathBuf::from);

    let scale = config.window_scale.max(1) as f32;
    let options = eframe::NativeOptions {
        viewport: eframe::egui::ViewportBuilder::default()
            .with_inner_size([FRAME_WIDTH as f32 * scale, FRAME_HEIGHT as f32 * scale + 120.0])
            .with_min_inner_size([FRAME_WIDTH as f32, FRAME_HEIGHT as f32])
            .with_title("famicore"),
        vsync: true,
        ..Default::default()
    };

    eframe::run_native(
        "famicore",
        options,
        Box::new(move |cc| Ok(Box::new(app::FamicoreApp::new(cc, config, rom)))),
    )
    .map_err(|err| anyhow::anyhow!("failed to run app: {err}"))
}
