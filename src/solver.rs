//! Simulation Orchestrator: the fixed sequence of passes run each frame.
//!
//! ```text
//! advect ─▶ [diffuse ×N] ─▶ [add force] ─▶ divergence ─▶ damp pressure
//!        ─▶ jacobi ×iterations ─▶ subtract gradient
//! ```
//!
//! Every pass that writes velocity is followed by a no-slip boundary pass,
//! every divergence/pressure pass by a Neumann one.

use crate::backend::{
    AdvectUniforms, ForceUniforms, PassBackend, PassIo, Program, ScaleUniforms, StencilUniforms,
};
use crate::boundary::{self, NEUMANN, NO_SLIP};
use crate::field::FieldSet;
use crate::grid::{GridConstants, Region};
use crate::input::InputState;

/// Constants the passes run with, derived from the control surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolverParams {
    pub viscosity: f32,
    /// Fraction of last frame's pressure kept as the relaxation start.
    pub pressure_scale: f32,
    /// Jacobi sweeps per frame; a fixed budget, not a convergence test.
    pub iterations: u32,
    /// Diffusion sweeps per frame; 0 disables the stage.
    pub diffusion_iterations: u32,
    /// Force splat radius in grid cells.
    pub splat_radius: f32,
    /// Converts smoothed pointer speed into velocity.
    pub force_scale: f32,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            viscosity: 0.0,
            pressure_scale: 0.75,
            iterations: 40,
            diffusion_iterations: 0,
            splat_radius: 9.0,
            force_scale: 20.0,
        }
    }
}

#[derive(Debug, Default)]
pub struct Orchestrator {
    force_pending: bool,
    steps: u64,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks that a pointer event arrived; the next step injects force.
    pub fn request_force(&mut self) {
        self.force_pending = true;
    }

    pub fn force_pending(&self) -> bool {
        self.force_pending
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Advances every field by one frame. `input` is the snapshot taken at
    /// the start of the frame.
    pub fn step<B: PassBackend>(
        &mut self,
        backend: &mut B,
        fields: &mut FieldSet<B::Texture>,
        grid: &GridConstants,
        params: &SolverParams,
        input: &InputState,
    ) {
        let stencil = StencilUniforms {
            grid_scale: grid.grid_scale,
        };

        advect(backend, fields, grid, params);
        for _ in 0..params.diffusion_iterations {
            diffuse(backend, fields, &stencil);
        }
        if self.force_pending {
            inject_force(backend, fields, grid, params, input);
            self.force_pending = false;
        }
        compute_divergence(backend, fields, &stencil);
        damp_pressure(backend, fields, params.pressure_scale);
        for _ in 0..params.iterations {
            relax_pressure(backend, fields, &stencil);
        }
        project(backend, fields, &stencil);

        backend.finish_frame();
        self.steps += 1;
        log::debug!(
            "step {}: {} jacobi sweeps, {} diffusion sweeps",
            self.steps,
            params.iterations,
            params.diffusion_iterations
        );
    }
}

fn advect<B: PassBackend>(
    backend: &mut B,
    fields: &mut FieldSet<B::Texture>,
    grid: &GridConstants,
    params: &SolverParams,
) {
    let program = Program::Advect(AdvectUniforms {
        aspect_ratio: grid.aspect_ratio,
        grid_scale: grid.grid_scale,
        viscosity: params.viscosity,
    });
    let swap = fields.velocity.swap();
    backend.dispatch(&program, Region::Interior, PassIo::new(swap.write).source(swap.read));
    boundary::apply(backend, fields.velocity.front(), NO_SLIP);
}

fn diffuse<B: PassBackend>(
    backend: &mut B,
    fields: &mut FieldSet<B::Texture>,
    stencil: &StencilUniforms,
) {
    let swap = fields.velocity.swap();
    backend.dispatch(
        &Program::Diffuse(*stencil),
        Region::Interior,
        PassIo::new(swap.write).source(swap.read),
    );
    boundary::apply(backend, fields.velocity.front(), NO_SLIP);
}

fn inject_force<B: PassBackend>(
    backend: &mut B,
    fields: &mut FieldSet<B::Texture>,
    grid: &GridConstants,
    params: &SolverParams,
    input: &InputState,
) {
    let program = Program::AddForce(ForceUniforms {
        mouse: [input.mouse_x, input.mouse_y],
        mouse_delta: [input.mouse_dx, input.mouse_dy],
        speed: input.speed,
        resolution: [grid.width as f32, grid.height as f32],
        radius: params.splat_radius,
        strength: params.force_scale,
    });
    let swap = fields.velocity.swap();
    backend.dispatch(&program, Region::Interior, PassIo::new(swap.write).source(swap.read));
    boundary::apply(backend, fields.velocity.front(), NO_SLIP);
}

fn compute_divergence<B: PassBackend>(
    backend: &mut B,
    fields: &mut FieldSet<B::Texture>,
    stencil: &StencilUniforms,
) {
    backend.dispatch(
        &Program::Divergence(*stencil),
        Region::Interior,
        PassIo::new(&fields.divergence).source(fields.velocity.front()),
    );
    boundary::apply(backend, &fields.divergence, NEUMANN);
}

fn damp_pressure<B: PassBackend>(backend: &mut B, fields: &mut FieldSet<B::Texture>, scale: f32) {
    let swap = fields.pressure.swap();
    backend.dispatch(
        &Program::ScalePressure(ScaleUniforms { scale }),
        Region::Closure,
        PassIo::new(swap.write).source(swap.read),
    );
}

fn relax_pressure<B: PassBackend>(
    backend: &mut B,
    fields: &mut FieldSet<B::Texture>,
    stencil: &StencilUniforms,
) {
    let swap = fields.pressure.swap();
    backend.dispatch(
        &Program::Jacobi(*stencil),
        Region::Interior,
        PassIo::new(swap.write)
            .source(swap.read)
            .aux(&fields.divergence),
    );
    boundary::apply(backend, fields.pressure.front(), NEUMANN);
}

fn project<B: PassBackend>(
    backend: &mut B,
    fields: &mut FieldSet<B::Texture>,
    stencil: &StencilUniforms,
) {
    let swap = fields.velocity.swap();
    backend.dispatch(
        &Program::SubtractGradient(*stencil),
        Region::Interior,
        PassIo::new(swap.write)
            .source(swap.read)
            .aux(fields.pressure.front()),
    );
    boundary::apply(backend, fields.velocity.front(), NO_SLIP);
}
