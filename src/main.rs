mod screen;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use fluidfield::backend::gpu::{GpuBackend, GpuContext};
use fluidfield::mapper::{PRESSURE, VISCOSITY};
use fluidfield::{FluidError, FluidSettings, FrameDriver, Simulation};
use winit::{
    event::*,
    event_loop::EventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::Window,
};

use crate::screen::ScreenPresenter;

const ITERATION_STEP: u32 = 5;
const CONTROL_STEP: f32 = 5.0;
const RESOLUTION_STEP: u32 = 50;
/// Frames between readback checks for NaN/inf in the fields.
const HEALTH_CHECK_INTERVAL: u64 = 240;
const TITLE: &str = "fluidfield";

type Driver = FrameDriver<GpuBackend, ScreenPresenter>;

fn load_settings(path: &Path) -> FluidSettings {
    let mut settings = match FluidSettings::load_from_disk(path) {
        Ok(settings) => settings,
        Err(err) => {
            log::warn!("failed to load settings from {path:?}: {err:?}; using defaults");
            FluidSettings::default()
        }
    };
    settings.sanitize();
    settings
}

struct App {
    window: Arc<Window>,
    driver: Driver,
    settings_path: PathBuf,
    started: Instant,
    frames_since_title: u32,
    last_title_update: Instant,
}

impl App {
    fn now_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let (sim, presenter) = self.driver.parts_mut();
        presenter.resize(sim.backend().device(), width, height);
        if let Err(err) = sim.on_resize(width, height) {
            log::error!("resize to {width}x{height} failed: {err}");
        }
    }

    fn pointer_moved(&mut self, x: f32, y: f32) {
        let now = self.now_ms();
        let (sim, presenter) = self.driver.parts_mut();
        let (width, height) = presenter.size();
        if let Err(err) = sim.on_pointer_move(x, y, width as f32, height as f32, now) {
            log::debug!("pointer sample dropped: {err}");
        }
    }

    /// Returns false when the key asks to quit.
    fn key_pressed(&mut self, key: KeyCode) -> bool {
        let sim = self.driver.simulation_mut();
        let current = sim.settings().clone();
        match key {
            KeyCode::Escape => return false,
            KeyCode::ArrowUp => sim.set_iterations((current.iterations + ITERATION_STEP).min(100)),
            KeyCode::ArrowDown => {
                sim.set_iterations(current.iterations.saturating_sub(ITERATION_STEP).max(1))
            }
            KeyCode::BracketLeft => sim.set_viscosity_control(
                VISCOSITY.clamp((current.viscosity - CONTROL_STEP) as f64) as f32,
            ),
            KeyCode::BracketRight => sim.set_viscosity_control(
                VISCOSITY.clamp((current.viscosity + CONTROL_STEP) as f64) as f32,
            ),
            KeyCode::Minus => sim.set_pressure_control(
                PRESSURE.clamp((current.pressure - CONTROL_STEP) as f64) as f32,
            ),
            KeyCode::Equal => sim.set_pressure_control(
                PRESSURE.clamp((current.pressure + CONTROL_STEP) as f64) as f32,
            ),
            KeyCode::Comma | KeyCode::Period => {
                let resolution = if key == KeyCode::Comma {
                    current.resolution.saturating_sub(RESOLUTION_STEP)
                } else {
                    current.resolution + RESOLUTION_STEP
                }
                .clamp(FluidSettings::MIN_RESOLUTION, FluidSettings::MAX_RESOLUTION);
                if let Err(err) = sim.set_resolution(resolution) {
                    log::error!("resolution {resolution} failed: {err}");
                }
            }
            KeyCode::KeyR => sim.reset_fields(),
            KeyCode::KeyS => match sim.settings().save_to_disk(&self.settings_path) {
                Ok(()) => log::info!("settings saved to {:?}", self.settings_path),
                Err(err) => log::error!("failed to save settings: {err:?}"),
            },
            _ => {}
        }
        true
    }

    /// Returns false when presentation failed beyond recovery.
    fn redraw(&mut self) -> bool {
        let now = self.now_ms();
        match self.driver.tick(now) {
            Ok(()) => {}
            // A failed resize leaves nothing to draw until the next one.
            Err(FluidError::NotAllocated) => return true,
            Err(FluidError::Presentation(reason)) => {
                log::error!("presentation failed: {reason}");
                return false;
            }
            Err(err) => log::error!("frame failed: {err}"),
        }

        if self.driver.frames() % HEALTH_CHECK_INTERVAL == 0 {
            let sim = self.driver.simulation_mut();
            match sim.count_non_finite() {
                Ok(0) => {}
                Ok(bad) => {
                    log::warn!("{bad} non-finite texels after {} steps; resetting", sim.steps());
                    sim.reset_fields();
                }
                Err(err) => log::warn!("field health check failed: {err}"),
            }
        }

        self.update_title();
        true
    }

    fn update_title(&mut self) {
        self.frames_since_title += 1;
        let elapsed = self.last_title_update.elapsed().as_secs_f32();
        if elapsed < 0.5 {
            return;
        }
        let fps = self.frames_since_title as f32 / elapsed;
        let sim = self.driver.simulation();
        let settings = sim.settings();
        let grid = sim
            .grid()
            .map(|g| format!("{}x{}", g.width(), g.height()))
            .unwrap_or_else(|| "-".into());
        self.window.set_title(&format!(
            "{TITLE} - {grid} | {fps:.0} FPS | iterations {} | viscosity {:.0} | pressure {:.0}",
            settings.iterations, settings.viscosity, settings.pressure
        ));
        self.frames_since_title = 0;
        self.last_title_update = Instant::now();
    }
}

fn main() -> anyhow::Result<()> {
    use env_logger::Env;
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let settings_path = FluidSettings::default_path();
    let settings = load_settings(&settings_path);

    let event_loop = EventLoop::new()?;
    let window = Arc::new(
        event_loop.create_window(
            winit::window::WindowAttributes::default()
                .with_title(TITLE)
                .with_inner_size(winit::dpi::PhysicalSize::new(1024, 768)),
        )?,
    );

    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });
    let surface = instance
        .create_surface(window.clone())
        .context("creating window surface")?;
    let context = pollster::block_on(GpuContext::new(instance, Some(&surface)))?;
    let backend = GpuBackend::new(context)?;

    let size = window.inner_size();
    let presenter = ScreenPresenter::new(&backend, surface, size.width, size.height)?;
    let simulation = Simulation::new(backend, settings);
    let mut app = App {
        window: window.clone(),
        driver: FrameDriver::new(simulation, presenter),
        settings_path,
        started: Instant::now(),
        frames_since_title: 0,
        last_title_update: Instant::now(),
    };
    app.resize(size.width, size.height);

    event_loop.run(move |event, control_flow| match event {
        Event::WindowEvent {
            ref event,
            window_id,
        } if window_id == app.window.id() => match event {
            WindowEvent::CloseRequested => control_flow.exit(),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                if !app.key_pressed(*key) {
                    control_flow.exit();
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                app.pointer_moved(position.x as f32, position.y as f32);
            }
            WindowEvent::Resized(physical_size) => {
                app.resize(physical_size.width, physical_size.height);
            }
            WindowEvent::RedrawRequested => {
                if !app.redraw() {
                    control_flow.exit();
                }
            }
            _ => {}
        },
        Event::AboutToWait => {
            app.window.request_redraw();
        }
        _ => {}
    })?;
    Ok(())
}
