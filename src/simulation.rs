//! Simulation context: one object owning every piece of solver state.

use crate::backend::PassBackend;
use crate::error::FluidError;
use crate::field::{count_non_finite, FieldSet, FieldStore};
use crate::grid::{GridConstants, GridSize};
use crate::input::{InputFilter, InputState};
use crate::mapper::{PRESSURE, VISCOSITY};
use crate::settings::FluidSettings;
use crate::solver::{Orchestrator, SolverParams};

pub struct Simulation<B: PassBackend> {
    backend: B,
    store: FieldStore<B::Texture>,
    constants: Option<GridConstants>,
    viewport: Option<(u32, u32)>,
    settings: FluidSettings,
    params: SolverParams,
    input: InputFilter,
    orchestrator: Orchestrator,
}

impl<B: PassBackend> Simulation<B> {
    /// Fields are allocated by the first [`Simulation::on_resize`].
    pub fn new(backend: B, settings: FluidSettings) -> Self {
        let params = SolverParams {
            viscosity: VISCOSITY.map(settings.viscosity as f64) as f32,
            pressure_scale: PRESSURE.map(settings.pressure as f64) as f32,
            iterations: settings.iterations,
            diffusion_iterations: settings.diffusion_iterations,
            splat_radius: settings.splat_radius * settings.resolution as f32,
            force_scale: settings.force_scale,
        };
        Self {
            backend,
            store: FieldStore::new(),
            constants: None,
            viewport: None,
            input: InputFilter::new(settings.smoothing),
            settings,
            params,
            orchestrator: Orchestrator::new(),
        }
    }

    /// Recomputes the grid for a new viewport and reallocates every field.
    ///
    /// On failure the store is left empty and stepping is refused until a
    /// later resize succeeds.
    pub fn on_resize(
        &mut self,
        viewport_width: u32,
        viewport_height: u32,
    ) -> Result<GridSize, FluidError> {
        self.viewport = Some((viewport_width, viewport_height));
        self.constants = None;
        let grid = match GridSize::from_viewport(
            viewport_width,
            viewport_height,
            self.settings.resolution,
        ) {
            Ok(grid) => grid,
            Err(err) => {
                self.store.release(&mut self.backend);
                return Err(err);
            }
        };
        self.store.allocate(&mut self.backend, grid)?;
        self.constants = Some(grid.into());
        log::info!(
            "viewport {}x{} -> grid {}x{} (resolution {})",
            viewport_width,
            viewport_height,
            grid.width(),
            grid.height(),
            self.settings.resolution
        );
        Ok(grid)
    }

    /// Feeds the input filter. A rejected sample schedules no force.
    pub fn on_pointer_move(
        &mut self,
        x: f32,
        y: f32,
        viewport_width: f32,
        viewport_height: f32,
        timestamp_ms: f64,
    ) -> Result<(), FluidError> {
        self.input
            .observe(x, y, viewport_width, viewport_height, timestamp_ms)?;
        self.orchestrator.request_force();
        Ok(())
    }

    /// Changes the grid resolution; reallocates if a viewport is known.
    pub fn set_resolution(&mut self, resolution: u32) -> Result<(), FluidError> {
        self.settings.resolution = resolution;
        self.params.splat_radius = self.settings.splat_radius * resolution as f32;
        if let Some((width, height)) = self.viewport {
            self.on_resize(width, height)?;
        }
        Ok(())
    }

    pub fn set_iterations(&mut self, iterations: u32) {
        self.settings.iterations = iterations;
        self.params.iterations = iterations;
    }

    pub fn set_viscosity_control(&mut self, control: f32) {
        self.settings.viscosity = control;
        self.params.viscosity = VISCOSITY.map(control as f64) as f32;
        log::info!("viscosity control {control} -> {}", self.params.viscosity);
    }

    pub fn set_pressure_control(&mut self, control: f32) {
        self.settings.pressure = control;
        self.params.pressure_scale = PRESSURE.map(control as f64) as f32;
        log::info!("pressure control {control} -> {}", self.params.pressure_scale);
    }

    /// Runs one orchestrator cycle on a snapshot of the input state.
    pub fn step(&mut self) -> Result<(), FluidError> {
        let constants = self.constants.ok_or(FluidError::NotAllocated)?;
        let fields = self.store.fields_mut().ok_or(FluidError::NotAllocated)?;
        let input = self.input.snapshot();
        self.orchestrator
            .step(&mut self.backend, fields, &constants, &self.params, &input);
        Ok(())
    }

    /// Per-frame idle check of the input filter.
    pub fn decay_input(&mut self, now_ms: f64) -> bool {
        self.input.decay(now_ms)
    }

    /// Zeroes every field, keeping the current allocation.
    pub fn reset_fields(&mut self) {
        self.store.clear(&mut self.backend);
        log::info!("fields reset");
    }

    /// Non-finite texels in velocity and pressure. Reads the fields back,
    /// so hosts should call it sparingly.
    pub fn count_non_finite(&mut self) -> Result<usize, FluidError> {
        let fields = self.store.fields().ok_or(FluidError::NotAllocated)?;
        let velocity = self.backend.read_back(fields.velocity.front())?;
        let pressure = self.backend.read_back(fields.pressure.front())?;
        Ok(count_non_finite(&velocity) + count_non_finite(&pressure))
    }

    pub fn fields(&self) -> Option<&FieldSet<B::Texture>> {
        self.store.fields()
    }

    pub fn grid(&self) -> Option<GridSize> {
        self.store.grid()
    }

    pub fn constants(&self) -> Option<GridConstants> {
        self.constants
    }

    pub fn params(&self) -> &SolverParams {
        &self.params
    }

    /// Direct access for hosts that bypass the control mapping.
    pub fn params_mut(&mut self) -> &mut SolverParams {
        &mut self.params
    }

    pub fn input(&self) -> InputState {
        self.input.snapshot()
    }

    pub fn force_pending(&self) -> bool {
        self.orchestrator.force_pending()
    }

    pub fn steps(&self) -> u64 {
        self.orchestrator.steps()
    }

    /// Current control values, for persisting.
    pub fn settings(&self) -> &FluidSettings {
        &self.settings
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Backend and fields together, for presentation and diagnostics.
    pub fn parts(&mut self) -> (&mut B, Option<&FieldSet<B::Texture>>) {
        (&mut self.backend, self.store.fields())
    }
}

impl<B: PassBackend> Drop for Simulation<B> {
    fn drop(&mut self) {
        self.store.release(&mut self.backend);
    }
}
