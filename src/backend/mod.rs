//! Rendering backend contract.
//!
//! The solver never touches a graphics API directly. Every stage is expressed
//! as a [`Program`] dispatched over a [`Region`] of a target texture, with up
//! to two read-only inputs. [`cpu::CpuBackend`] rasterizes passes on the host;
//! [`gpu::GpuBackend`] runs them as wgpu compute pipelines.

pub mod cpu;
pub mod gpu;

use crate::error::FluidError;
use crate::grid::{GridSize, Region};

/// One sample of a field. Vector fields use both channels, scalar fields
/// only channel 0.
pub type Texel = [f32; 2];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdvectUniforms {
    pub aspect_ratio: f32,
    pub grid_scale: f32,
    pub viscosity: f32,
}

impl AdvectUniforms {
    /// Normalized-coordinate displacement produced by a unit velocity.
    pub fn uv_per_velocity(&self) -> [f32; 2] {
        let root = self.aspect_ratio.sqrt();
        [1.0 / root, root]
    }

    pub fn dissipation(&self) -> f32 {
        1.0 / (1.0 + self.viscosity / self.grid_scale)
    }
}

/// Uniforms shared by the neighbour-stencil programs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StencilUniforms {
    pub grid_scale: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ForceUniforms {
    /// Pointer position in normalized coordinates.
    pub mouse: [f32; 2],
    pub mouse_delta: [f32; 2],
    pub speed: f32,
    /// Grid dimensions in cells.
    pub resolution: [f32; 2],
    /// Splat radius in cells.
    pub radius: f32,
    pub strength: f32,
}

impl ForceUniforms {
    /// Splats are cut off at this many radii so distant cells stay exactly zero.
    pub const CUTOFF_RADII: f32 = 3.0;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScaleUniforms {
    pub scale: f32,
}

/// A GPU program together with the uniform values for one pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Program {
    /// Semi-Lagrangian transport of the source velocity.
    Advect(AdvectUniforms),
    /// One smoothing sweep of viscous diffusion.
    Diffuse(StencilUniforms),
    /// Pointer splat added onto the source velocity.
    AddForce(ForceUniforms),
    /// Central-difference divergence of the source velocity.
    Divergence(StencilUniforms),
    /// Source pressure multiplied by a dissipation factor.
    ScalePressure(ScaleUniforms),
    /// One Jacobi sweep; source is the previous estimate, aux the divergence.
    Jacobi(StencilUniforms),
    /// Source velocity minus the gradient of the aux pressure.
    SubtractGradient(StencilUniforms),
    /// Edge cells of the target set from their interior neighbour.
    Boundary(ScaleUniforms),
}

impl Program {
    pub fn name(&self) -> &'static str {
        match self {
            Program::Advect(_) => "advect",
            Program::Diffuse(_) => "diffuse",
            Program::AddForce(_) => "add_force",
            Program::Divergence(_) => "divergence",
            Program::ScalePressure(_) => "scale_pressure",
            Program::Jacobi(_) => "jacobi",
            Program::SubtractGradient(_) => "subtract_gradient",
            Program::Boundary(_) => "enforce_boundary",
        }
    }

    /// The boundary program runs on the edge strip only; every other program
    /// reads neighbours or writes rectangles and never runs there.
    pub fn runs_over(&self, region: Region) -> bool {
        matches!(self, Program::Boundary(_)) == (region == Region::Boundary)
    }
}

/// Textures bound for a single pass. `source` and `aux` must not alias
/// `target`; the boundary program reads the target itself.
pub struct PassIo<'a, T> {
    pub target: &'a T,
    pub source: Option<&'a T>,
    pub aux: Option<&'a T>,
}

impl<'a, T> PassIo<'a, T> {
    pub fn new(target: &'a T) -> Self {
        Self {
            target,
            source: None,
            aux: None,
        }
    }

    pub fn source(mut self, source: &'a T) -> Self {
        self.source = Some(source);
        self
    }

    pub fn aux(mut self, aux: &'a T) -> Self {
        self.aux = Some(aux);
        self
    }
}

pub trait PassBackend {
    type Texture;

    /// Zero-initialised plane sized to `grid`.
    fn create_texture(&mut self, label: &'static str, grid: GridSize)
        -> Result<Self::Texture, FluidError>;

    fn release_texture(&mut self, texture: Self::Texture);

    fn clear_texture(&mut self, texture: &Self::Texture);

    fn upload(&mut self, texture: &Self::Texture, texels: &[Texel]) -> Result<(), FluidError>;

    fn read_back(&mut self, texture: &Self::Texture) -> Result<Vec<Texel>, FluidError>;

    /// Runs one pass. Work is ordered: a pass observes every write made by
    /// the passes dispatched before it.
    fn dispatch(&mut self, program: &Program, region: Region, io: PassIo<'_, Self::Texture>);

    /// Flushes recorded passes; called once at the end of every step.
    fn finish_frame(&mut self) {}
}
