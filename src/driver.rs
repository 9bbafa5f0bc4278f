//! Frame Driver: one simulation step and one presentation pass per tick.

use crate::backend::PassBackend;
use crate::error::FluidError;
use crate::field::FieldSet;
use crate::grid::GridConstants;
use crate::simulation::Simulation;

/// Draws the solved fields. Implemented by the host's presentation layer.
pub trait Presenter<B: PassBackend> {
    fn present(
        &mut self,
        backend: &mut B,
        fields: &FieldSet<B::Texture>,
        grid: &GridConstants,
    ) -> Result<(), FluidError>;
}

/// Presenter that draws nothing, for headless runs.
#[derive(Debug, Default)]
pub struct Headless;

impl<B: PassBackend> Presenter<B> for Headless {
    fn present(
        &mut self,
        _backend: &mut B,
        _fields: &FieldSet<B::Texture>,
        _grid: &GridConstants,
    ) -> Result<(), FluidError> {
        Ok(())
    }
}

pub struct FrameDriver<B: PassBackend, P> {
    simulation: Simulation<B>,
    presenter: P,
    frames: u64,
}

impl<B: PassBackend, P: Presenter<B>> FrameDriver<B, P> {
    pub fn new(simulation: Simulation<B>, presenter: P) -> Self {
        Self {
            simulation,
            presenter,
            frames: 0,
        }
    }

    /// Runs one display-refresh tick at `now_ms`.
    ///
    /// Ticks never overlap: the caller drives them from a single thread, so
    /// the step always sees a settled input snapshot.
    pub fn tick(&mut self, now_ms: f64) -> Result<(), FluidError> {
        self.simulation.decay_input(now_ms);
        self.simulation.step()?;

        let constants = self
            .simulation
            .constants()
            .ok_or(FluidError::NotAllocated)?;
        let (backend, fields) = self.simulation.parts();
        let fields = fields.ok_or(FluidError::NotAllocated)?;
        self.presenter.present(backend, fields, &constants)?;

        self.frames += 1;
        Ok(())
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn simulation(&self) -> &Simulation<B> {
        &self.simulation
    }

    pub fn simulation_mut(&mut self) -> &mut Simulation<B> {
        &mut self.simulation
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    /// Simulation and presenter borrowed together, for event handlers that
    /// touch both (a resize reconfigures the surface and the grid).
    pub fn parts_mut(&mut self) -> (&mut Simulation<B>, &mut P) {
        (&mut self.simulation, &mut self.presenter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::cpu::CpuBackend;
    use crate::settings::FluidSettings;

    #[derive(Default)]
    struct Recorder {
        grids: Vec<(u32, u32)>,
        peak_speed: f32,
    }

    impl Presenter<CpuBackend> for Recorder {
        fn present(
            &mut self,
            backend: &mut CpuBackend,
            fields: &FieldSet<<CpuBackend as PassBackend>::Texture>,
            grid: &GridConstants,
        ) -> Result<(), FluidError> {
            self.grids.push((grid.width, grid.height));
            let velocity = backend.read_back(fields.velocity.front())?;
            for v in velocity {
                self.peak_speed = self.peak_speed.max((v[0] * v[0] + v[1] * v[1]).sqrt());
            }
            Ok(())
        }
    }

    fn simulation() -> Simulation<CpuBackend> {
        let settings = FluidSettings {
            resolution: 24,
            iterations: 4,
            ..FluidSettings::default()
        };
        Simulation::new(CpuBackend::new(), settings)
    }

    #[test]
    fn tick_before_resize_fails_without_presenting() {
        let mut driver = FrameDriver::new(simulation(), Recorder::default());
        assert!(matches!(driver.tick(0.0), Err(FluidError::NotAllocated)));
        assert!(driver.presenter_mut().grids.is_empty());
        assert_eq!(driver.frames(), 0);
    }

    #[test]
    fn each_tick_steps_then_presents() {
        let mut driver = FrameDriver::new(simulation(), Recorder::default());
        driver.simulation_mut().on_resize(240, 120).unwrap();
        for frame in 0..3 {
            driver.tick(frame as f64 * 16.0).unwrap();
        }
        assert_eq!(driver.frames(), 3);
        assert_eq!(driver.simulation().steps(), 3);
        assert_eq!(driver.presenter_mut().grids, vec![(24, 12); 3]);
    }

    #[test]
    fn pointer_drag_reaches_the_presenter() {
        let mut driver = FrameDriver::new(simulation(), Recorder::default());
        let (sim, _) = driver.parts_mut();
        sim.on_resize(240, 240).unwrap();
        sim.params_mut().viscosity = 0.0;
        sim.on_pointer_move(100.0, 120.0, 240.0, 240.0, 0.0).unwrap();
        sim.on_pointer_move(130.0, 120.0, 240.0, 240.0, 10.0).unwrap();
        driver.tick(12.0).unwrap();
        assert!(driver.presenter_mut().peak_speed > 0.0);
    }

    #[test]
    fn headless_presenter_accepts_any_backend() {
        let mut driver = FrameDriver::new(simulation(), Headless);
        driver.simulation_mut().on_resize(100, 100).unwrap();
        driver.tick(0.0).unwrap();
        assert_eq!(driver.frames(), 1);
    }
}
