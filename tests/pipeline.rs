use fluidfield::backend::cpu::CpuBackend;
use fluidfield::backend::{PassBackend, Texel};
use fluidfield::{FluidError, FluidSettings, GridSize, Simulation};

const N: u32 = 48;

fn simulation(backend: CpuBackend) -> Simulation<CpuBackend> {
    let settings = FluidSettings {
        resolution: N,
        iterations: 4,
        ..FluidSettings::default()
    };
    let mut sim = Simulation::new(backend, settings);
    sim.on_resize(N, N).unwrap();
    sim
}

fn velocity(sim: &mut Simulation<CpuBackend>) -> Vec<Texel> {
    let (backend, fields) = sim.parts();
    backend.read_back(fields.unwrap().velocity.front()).unwrap()
}

fn magnitude(v: Texel) -> f32 {
    (v[0] * v[0] + v[1] * v[1]).sqrt()
}

/// Host-side central-difference divergence, same formula as the kernel.
fn divergence_at(grid: GridSize, velocity: &[Texel], grid_scale: f32, x: u32, y: u32) -> f32 {
    let l = velocity[grid.index(x - 1, y)][0];
    let r = velocity[grid.index(x + 1, y)][0];
    let b = velocity[grid.index(x, y - 1)][1];
    let t = velocity[grid.index(x, y + 1)][1];
    0.5 * grid_scale * ((r - l) + (t - b))
}

#[test]
fn injected_force_stays_local() {
    let mut sim = simulation(CpuBackend::new());
    {
        let params = sim.params_mut();
        params.viscosity = 0.0;
        params.splat_radius = 2.0;
    }
    sim.on_pointer_move(24.0, 24.0, N as f32, N as f32, 0.0).unwrap();
    sim.on_pointer_move(27.0, 24.0, N as f32, N as f32, 10.0).unwrap();
    assert!(sim.input().speed > 0.0);
    sim.step().unwrap();

    let grid = sim.grid().unwrap();
    let v = velocity(&mut sim);
    // Pointer sits at cell corner (27, 24) in grid units, y flipped.
    for (x, y) in [(27, 24), (26, 24), (28, 24), (27, 23), (27, 25)] {
        assert!(magnitude(v[grid.index(x, y)]) > 1e-6, "cell ({x}, {y}) is still");
    }
    for (x, y) in [(4, 4), (45, 24), (27, 44), (3, 40), (44, 3)] {
        assert_eq!(v[grid.index(x, y)], [0.0, 0.0], "cell ({x}, {y}) moved");
    }
}

#[test]
fn projection_without_iterations_keeps_divergence() {
    let mut sim = simulation(CpuBackend::new());
    {
        let params = sim.params_mut();
        params.iterations = 0;
        params.pressure_scale = 0.0;
    }
    let grid = sim.grid().unwrap();
    let swirl: Vec<Texel> = (0..grid.cells())
        .map(|i| {
            let x = (i % N as usize) as f32 / N as f32;
            let y = (i / N as usize) as f32 / N as f32;
            [0.002 * (x * 7.0).sin() * y, 0.003 * (y * 5.0).cos() * x]
        })
        .collect();
    {
        let (backend, fields) = sim.parts();
        backend.upload(fields.unwrap().velocity.front(), &swirl).unwrap();
    }
    sim.step().unwrap();

    let grid_scale = sim.constants().unwrap().grid_scale;
    let after = velocity(&mut sim);
    let (backend, fields) = sim.parts();
    let measured = backend.read_back(&fields.unwrap().divergence).unwrap();
    for y in 1..N - 1 {
        for x in 1..N - 1 {
            let expected = measured[grid.index(x, y)][0];
            let actual = divergence_at(grid, &after, grid_scale, x, y);
            assert!(
                (expected - actual).abs() <= 1e-6 * expected.abs().max(1.0),
                "divergence changed at ({x}, {y}): {expected} -> {actual}"
            );
        }
    }
}

#[test]
fn nan_in_velocity_propagates_until_reset() {
    let mut sim = simulation(CpuBackend::new());
    let grid = sim.grid().unwrap();
    let mut poisoned = vec![[0.0; 2]; grid.cells()];
    poisoned[grid.index(24, 24)] = [f32::NAN, 0.0];
    {
        let (backend, fields) = sim.parts();
        backend.upload(fields.unwrap().velocity.front(), &poisoned).unwrap();
    }
    sim.step().unwrap();
    let first = sim.count_non_finite().unwrap();
    assert!(first > 0);
    sim.step().unwrap();
    assert!(sim.count_non_finite().unwrap() >= first);

    sim.reset_fields();
    assert_eq!(sim.count_non_finite().unwrap(), 0);
    sim.step().unwrap();
    assert_eq!(sim.count_non_finite().unwrap(), 0);
}

#[test]
fn failed_reallocation_blocks_stepping_until_retry() {
    let budget = 5 * (N as usize) * (N as usize);
    let mut sim = simulation(CpuBackend::with_cell_budget(budget));
    sim.step().unwrap();

    let err = sim.set_resolution(N + 8).unwrap_err();
    assert!(matches!(err, FluidError::Allocation { .. }));
    assert!(sim.fields().is_none());
    assert!(matches!(sim.step(), Err(FluidError::NotAllocated)));
    assert!(matches!(sim.count_non_finite(), Err(FluidError::NotAllocated)));

    sim.set_resolution(N).unwrap();
    sim.step().unwrap();
    assert_eq!(sim.backend().live_cells(), budget);
}

#[test]
fn idle_pointer_stops_feeding_force() {
    let mut sim = simulation(CpuBackend::new());
    sim.on_pointer_move(10.0, 10.0, N as f32, N as f32, 0.0).unwrap();
    sim.on_pointer_move(20.0, 14.0, N as f32, N as f32, 8.0).unwrap();
    assert!(sim.input().speed > 0.0);
    assert!(!sim.decay_input(50.0));
    assert!(sim.decay_input(90.0));
    let input = sim.input();
    assert_eq!((input.mouse_dx, input.mouse_dy, input.speed), (0.0, 0.0, 0.0));
}

#[test]
fn empty_viewport_sample_does_not_poison_fields() {
    let mut sim = simulation(CpuBackend::new());
    sim.on_pointer_move(10.0, 10.0, N as f32, N as f32, 0.0).unwrap();
    assert!(matches!(
        sim.on_pointer_move(12.0, 10.0, 0.0, 0.0, 10.0),
        Err(FluidError::InvalidPointer { .. })
    ));
    sim.on_pointer_move(16.0, 16.0, N as f32, N as f32, 20.0).unwrap();
    assert!(sim.input().speed.is_finite());
    assert!(sim.input().speed > 0.0);

    sim.step().unwrap();
    assert_eq!(sim.count_non_finite().unwrap(), 0);
    assert!(velocity(&mut sim).iter().any(|v| magnitude(*v) > 0.0));
}
