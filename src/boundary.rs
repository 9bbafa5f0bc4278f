//! Boundary Enforcer.

use crate::backend::{PassBackend, PassIo, Program, ScaleUniforms};
use crate::grid::Region;

/// Velocity: edge cells mirror the interior with opposite sign (no-slip).
pub const NO_SLIP: f32 = -1.0;
/// Pressure and divergence: zero normal gradient (Neumann).
pub const NEUMANN: f32 = 1.0;

/// Overwrites every edge cell of `target` with `scale` times its nearest
/// interior cell. Runs over the edge strip only.
pub fn apply<B: PassBackend>(backend: &mut B, target: &B::Texture, scale: f32) {
    backend.dispatch(
        &Program::Boundary(ScaleUniforms { scale }),
        Region::Boundary,
        PassIo::new(target),
    );
}
