use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::input::{DEFAULT_SMOOTHING, MAX_SMOOTHING, MIN_SMOOTHING};
use crate::mapper::{PRESSURE, VISCOSITY};

const SETTINGS_FILE_NAME: &str = "fluid_settings.json";

/// User-facing controls, persisted as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FluidSettings {
    pub resolution: u32,          // Cells along the longer viewport side
    pub iterations: u32,          // Jacobi sweeps per frame ("accuracy")
    pub viscosity: f32,           // Control value, mapped through VISCOSITY
    pub pressure: f32,            // Control value, mapped through PRESSURE
    pub smoothing: usize,         // Pointer smoothing window
    pub diffusion_iterations: u32, // 0 disables the diffusion stage
    pub splat_radius: f32,        // Force radius as a fraction of resolution
    pub force_scale: f32,
}

impl Default for FluidSettings {
    fn default() -> Self {
        Self {
            resolution: 450,
            iterations: 40,
            viscosity: 45.0,
            pressure: 50.0,
            smoothing: DEFAULT_SMOOTHING,
            diffusion_iterations: 0,
            splat_radius: 0.02,
            force_scale: 20.0,
        }
    }
}

impl FluidSettings {
    pub const MIN_RESOLUTION: u32 = 100;
    pub const MAX_RESOLUTION: u32 = 1500;

    pub fn default_path() -> PathBuf {
        std::env::current_dir().map_or_else(
            |_| PathBuf::from(SETTINGS_FILE_NAME),
            |dir| dir.join(SETTINGS_FILE_NAME),
        )
    }

    pub fn load_from_disk(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading fluid settings {path:?}"))?;
        serde_json::from_str(&data).with_context(|| format!("parsing fluid settings {path:?}"))
    }

    pub fn save_to_disk(&self, path: &Path) -> anyhow::Result<()> {
        match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir)
                .with_context(|| format!("creating settings directory {dir:?}"))?,
            _ => {}
        }
        let json = serde_json::to_string_pretty(self).context("encoding fluid settings")?;
        fs::write(path, json).with_context(|| format!("writing fluid settings {path:?}"))
    }

    pub fn sanitize(&mut self) {
        self.resolution = self
            .resolution
            .clamp(Self::MIN_RESOLUTION, Self::MAX_RESOLUTION);
        self.iterations = self.iterations.clamp(1, 100);
        self.viscosity = VISCOSITY.clamp(self.viscosity as f64) as f32;
        self.pressure = PRESSURE.clamp(self.pressure as f64) as f32;
        self.smoothing = self.smoothing.clamp(MIN_SMOOTHING, MAX_SMOOTHING);
        self.diffusion_iterations = self.diffusion_iterations.min(50);
        self.splat_radius = self.splat_radius.clamp(0.001, 0.2);
        self.force_scale = self.force_scale.clamp(0.0, 200.0);
    }
}
