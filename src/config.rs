use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::nes::driver::DriverTiming;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    pub decimal_mode: bool,
    pub frame_interval_ms: u64,
    pub cpu_cycles_per_frame: u64,
    /// 0 runs every elapsed interval.
    pub max_catch_up_frames: u32,
    pub audio_block_samples: usize,
    pub audio_enabled: bool,
    pub save_battery_ram: bool,
    pub window_scale: u32,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            decimal_mode: false,
            frame_interval_ms: 16,
            cpu_cycles_per_frame: 29_781,
            max_catch_up_frames: 0,
            audio_block_samples: 735,
            audio_enabled: true,
            save_battery_ram: true,
            window_scale: 3,
        }
    }
}

impl EmulatorConfig {
    /// Reads a JSON config. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("failed to parse emulator config")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self).context("failed to encode config")?;
        fs::write(path, text).with_context(|| format!("failed to write config {}", path.display()))
    }

    pub fn driver_timing(&self) -> DriverTiming {
        DriverTiming {
            frame_interval: Duration::from_millis(self.frame_interval_ms.max(1)),
            cpu_cycles_per_frame: self.cpu_cycles_per_frame.max(1),
            max_catch_up_frames: (self.max_catch_up_frames > 0)
                .then_some(self.max_catch_up_frames),
            audio_block_samples: self.audio_block_samples.max(1),
        }
    }
}
