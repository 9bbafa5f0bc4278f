//! Real-time incompressible 2D fluid solver.
//!
//! Velocity and pressure live in GPU-resident planes advanced once per frame
//! by semi-Lagrangian advection, a fixed-budget Jacobi pressure solve and a
//! projection step. [`Simulation`] owns all of it; a [`FrameDriver`] ticks it
//! and hands the result to a [`Presenter`].

pub mod backend;
pub mod boundary;
pub mod driver;
pub mod error;
pub mod field;
pub mod grid;
pub mod input;
pub mod mapper;
pub mod settings;
pub mod simulation;
pub mod solver;

pub use backend::cpu::CpuBackend;
pub use backend::gpu::{GpuBackend, GpuContext};
pub use backend::{PassBackend, Program, Texel};
pub use driver::{FrameDriver, Headless, Presenter};
pub use error::FluidError;
pub use field::{DoubleBuffer, FieldSet, FieldStore};
pub use grid::{GridConstants, GridSize, Region};
pub use input::{InputFilter, InputState};
pub use settings::FluidSettings;
pub use simulation::Simulation;
pub use solver::{Orchestrator, SolverParams};
