//! Host rasterizer for the solver's passes.
//!
//! Mirrors the kernels in `shaders/fluid.wgsl` cell for cell on a single
//! thread. Used headless and by the test suite.

use super::{
    AdvectUniforms, ForceUniforms, PassBackend, PassIo, Program, ScaleUniforms, StencilUniforms,
    Texel,
};
use crate::error::FluidError;
use crate::grid::{GridSize, Region};

/// Handle into the backend's plane arena.
#[derive(Debug, PartialEq, Eq)]
pub struct CpuTexture {
    slot: usize,
    grid: GridSize,
    label: &'static str,
}

#[derive(Default)]
pub struct CpuBackend {
    planes: Vec<Option<Vec<Texel>>>,
    free_slots: Vec<usize>,
    /// Upper bound on live texels across all planes, if any.
    cell_budget: Option<usize>,
    live_cells: usize,
    passes: u64,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that refuses allocations once `cells` texels are live.
    pub fn with_cell_budget(cells: usize) -> Self {
        Self {
            cell_budget: Some(cells),
            ..Self::default()
        }
    }

    pub fn live_cells(&self) -> usize {
        self.live_cells
    }

    pub fn live_textures(&self) -> usize {
        self.planes.iter().filter(|p| p.is_some()).count()
    }

    /// Passes dispatched since construction.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    fn plane(&self, texture: &CpuTexture) -> &[Texel] {
        self.planes[texture.slot]
            .as_deref()
            .unwrap_or_else(|| panic!("texture {} used after release", texture.label))
    }
}

impl PassBackend for CpuBackend {
    type Texture = CpuTexture;

    fn create_texture(
        &mut self,
        label: &'static str,
        grid: GridSize,
    ) -> Result<CpuTexture, FluidError> {
        let cells = grid.cells();
        if let Some(budget) = self.cell_budget {
            if self.live_cells + cells > budget {
                return Err(FluidError::Allocation {
                    label,
                    width: grid.width(),
                    height: grid.height(),
                    reason: format!(
                        "cell budget exhausted ({} live + {} requested > {})",
                        self.live_cells, cells, budget
                    ),
                });
            }
        }
        let plane = vec![[0.0; 2]; cells];
        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.planes[slot] = Some(plane);
                slot
            }
            None => {
                self.planes.push(Some(plane));
                self.planes.len() - 1
            }
        };
        self.live_cells += cells;
        Ok(CpuTexture { slot, grid, label })
    }

    fn release_texture(&mut self, texture: CpuTexture) {
        if self.planes[texture.slot].take().is_some() {
            self.live_cells -= texture.grid.cells();
            self.free_slots.push(texture.slot);
        }
    }

    fn clear_texture(&mut self, texture: &CpuTexture) {
        if let Some(plane) = self.planes[texture.slot].as_mut() {
            plane.fill([0.0; 2]);
        }
    }

    fn upload(&mut self, texture: &CpuTexture, texels: &[Texel]) -> Result<(), FluidError> {
        let expected = texture.grid.cells();
        if texels.len() != expected {
            return Err(FluidError::ShapeMismatch {
                expected,
                actual: texels.len(),
            });
        }
        if let Some(plane) = self.planes[texture.slot].as_mut() {
            plane.copy_from_slice(texels);
        }
        Ok(())
    }

    fn read_back(&mut self, texture: &CpuTexture) -> Result<Vec<Texel>, FluidError> {
        Ok(self.plane(texture).to_vec())
    }

    fn dispatch(&mut self, program: &Program, region: Region, io: PassIo<'_, CpuTexture>) {
        if !program.runs_over(region) {
            log::warn!("{} cannot run over {region:?}; pass skipped", program.name());
            return;
        }
        self.passes += 1;
        let grid = io.target.grid;
        let slot = io.target.slot;
        let Some(mut out) = self.planes[slot].take() else {
            panic!("texture {} used after release", io.target.label);
        };

        if let Program::Boundary(ScaleUniforms { scale }) = program {
            for (x, y) in grid.region_cells(Region::Boundary) {
                let (nx, ny) = grid.inward_neighbor(x, y);
                let inner = out[grid.index(nx, ny)];
                out[grid.index(x, y)] = [inner[0] * scale, inner[1] * scale];
            }
            self.planes[slot] = Some(out);
            return;
        }

        let empty: &[Texel] = &[];
        let source = Plane::new(grid, io.source.map_or(empty, |t| self.plane(t)));
        let aux = Plane::new(grid, io.aux.map_or(empty, |t| self.plane(t)));
        for (x, y) in grid.region_cells(region) {
            out[grid.index(x, y)] = match program {
                Program::Advect(u) => advect(&source, x, y, u),
                Program::Diffuse(u) => diffuse(&source, x, y, u),
                Program::AddForce(u) => add_force(&source, x, y, u),
                Program::Divergence(u) => divergence(&source, x, y, u),
                Program::ScalePressure(u) => {
                    let p = source.get(x, y);
                    [p[0] * u.scale, p[1] * u.scale]
                }
                Program::Jacobi(u) => jacobi(&source, &aux, x, y, u),
                Program::SubtractGradient(u) => subtract_gradient(&source, &aux, x, y, u),
                Program::Boundary(_) => unreachable!("handled above"),
            };
        }
        self.planes[slot] = Some(out);
    }
}

struct Plane<'a> {
    grid: GridSize,
    texels: &'a [Texel],
}

impl<'a> Plane<'a> {
    fn new(grid: GridSize, texels: &'a [Texel]) -> Self {
        Self { grid, texels }
    }

    fn get(&self, x: u32, y: u32) -> Texel {
        self.texels[self.grid.index(x, y)]
    }

    fn fetch_clamped(&self, x: i32, y: i32) -> Texel {
        let cx = x.clamp(0, self.grid.width() as i32 - 1) as u32;
        let cy = y.clamp(0, self.grid.height() as i32 - 1) as u32;
        self.get(cx, cy)
    }

    /// Bilinear, clamp-to-edge sample at normalized coordinates.
    fn sample(&self, uv: [f32; 2]) -> Texel {
        let gx = uv[0] * self.grid.width() as f32 - 0.5;
        let gy = uv[1] * self.grid.height() as f32 - 0.5;
        let bx = gx.floor();
        let by = gy.floor();
        let tx = gx - bx;
        let ty = gy - by;
        let (x0, y0) = (bx as i32, by as i32);
        let a = mix(self.fetch_clamped(x0, y0), self.fetch_clamped(x0 + 1, y0), tx);
        let b = mix(self.fetch_clamped(x0, y0 + 1), self.fetch_clamped(x0 + 1, y0 + 1), tx);
        mix(a, b, ty)
    }
}

fn mix(a: Texel, b: Texel, t: f32) -> Texel {
    [a[0] * (1.0 - t) + b[0] * t, a[1] * (1.0 - t) + b[1] * t]
}

fn cell_uv(grid: GridSize, x: u32, y: u32) -> [f32; 2] {
    [
        (x as f32 + 0.5) / grid.width() as f32,
        (y as f32 + 0.5) / grid.height() as f32,
    ]
}

fn advect(source: &Plane, x: u32, y: u32, u: &AdvectUniforms) -> Texel {
    let uv = cell_uv(source.grid, x, y);
    let v = source.get(x, y);
    let step = u.uv_per_velocity();
    let back = [uv[0] - v[0] * step[0], uv[1] - v[1] * step[1]];
    let sampled = source.sample(back);
    let keep = u.dissipation();
    [sampled[0] * keep, sampled[1] * keep]
}

fn diffuse(source: &Plane, x: u32, y: u32, u: &StencilUniforms) -> Texel {
    let alpha = u.grid_scale;
    let c = source.get(x, y);
    let l = source.get(x - 1, y);
    let r = source.get(x + 1, y);
    let b = source.get(x, y - 1);
    let t = source.get(x, y + 1);
    let norm = 1.0 / (alpha + 4.0);
    [
        (alpha * c[0] + l[0] + r[0] + b[0] + t[0]) * norm,
        (alpha * c[1] + l[1] + r[1] + b[1] + t[1]) * norm,
    ]
}

fn add_force(source: &Plane, x: u32, y: u32, u: &ForceUniforms) -> Texel {
    let v = source.get(x, y);
    let uv = cell_uv(source.grid, x, y);
    let dx = (uv[0] - u.mouse[0]) * u.resolution[0];
    let dy = (uv[1] - u.mouse[1]) * u.resolution[1];
    let dist_sq = dx * dx + dy * dy;
    let cutoff = u.radius * ForceUniforms::CUTOFF_RADII;
    let len = (u.mouse_delta[0] * u.mouse_delta[0] + u.mouse_delta[1] * u.mouse_delta[1]).sqrt();
    if dist_sq >= cutoff * cutoff || len <= 0.0 {
        return v;
    }
    let weight = (-dist_sq / (u.radius * u.radius)).exp();
    let gain = u.speed * u.strength * weight / len;
    [v[0] + u.mouse_delta[0] * gain, v[1] + u.mouse_delta[1] * gain]
}

fn divergence(source: &Plane, x: u32, y: u32, u: &StencilUniforms) -> Texel {
    let l = source.get(x - 1, y)[0];
    let r = source.get(x + 1, y)[0];
    let b = source.get(x, y - 1)[1];
    let t = source.get(x, y + 1)[1];
    [0.5 * u.grid_scale * ((r - l) + (t - b)), 0.0]
}

fn jacobi(pressure: &Plane, div: &Plane, x: u32, y: u32, u: &StencilUniforms) -> Texel {
    let l = pressure.get(x - 1, y)[0];
    let r = pressure.get(x + 1, y)[0];
    let b = pressure.get(x, y - 1)[0];
    let t = pressure.get(x, y + 1)[0];
    let d = div.get(x, y)[0];
    [(l + r + b + t - d / (u.grid_scale * u.grid_scale)) * 0.25, 0.0]
}

fn subtract_gradient(
    velocity: &Plane,
    pressure: &Plane,
    x: u32,
    y: u32,
    u: &StencilUniforms,
) -> Texel {
    let l = pressure.get(x - 1, y)[0];
    let r = pressure.get(x + 1, y)[0];
    let b = pressure.get(x, y - 1)[0];
    let t = pressure.get(x, y + 1)[0];
    let v = velocity.get(x, y);
    let half = 0.5 * u.grid_scale;
    [v[0] - half * (r - l), v[1] - half * (t - b)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(w: u32, h: u32) -> GridSize {
        GridSize::new(w, h).unwrap()
    }

    #[test]
    fn budget_rejects_and_release_frees() {
        let mut backend = CpuBackend::with_cell_budget(50);
        let a = backend.create_texture("a", grid(5, 5)).unwrap();
        let b = backend.create_texture("b", grid(5, 5)).unwrap();
        assert!(backend.create_texture("c", grid(5, 5)).is_err());
        backend.release_texture(a);
        assert_eq!(backend.live_cells(), 25);
        let c = backend.create_texture("c", grid(5, 5)).unwrap();
        assert_eq!(backend.live_textures(), 2);
        backend.release_texture(b);
        backend.release_texture(c);
        assert_eq!(backend.live_cells(), 0);
    }

    #[test]
    fn upload_checks_shape() {
        let mut backend = CpuBackend::new();
        let t = backend.create_texture("t", grid(4, 4)).unwrap();
        assert!(matches!(
            backend.upload(&t, &[[0.0; 2]; 3]),
            Err(FluidError::ShapeMismatch { expected: 16, actual: 3 })
        ));
    }

    #[test]
    fn interior_pass_leaves_edges_untouched() {
        let g = grid(4, 4);
        let mut backend = CpuBackend::new();
        let src = backend.create_texture("src", g).unwrap();
        let dst = backend.create_texture("dst", g).unwrap();
        backend.upload(&src, &vec![[2.0, 2.0]; 16]).unwrap();
        backend.upload(&dst, &vec![[9.0, 9.0]; 16]).unwrap();
        backend.dispatch(
            &Program::ScalePressure(ScaleUniforms { scale: 0.5 }),
            Region::Interior,
            PassIo::new(&dst).source(&src),
        );
        let out = backend.read_back(&dst).unwrap();
        assert_eq!(out[g.index(1, 1)], [1.0, 1.0]);
        assert_eq!(out[g.index(0, 0)], [9.0, 9.0]);
        assert_eq!(out[g.index(3, 2)], [9.0, 9.0]);
    }

    #[test]
    fn bilinear_sample_hits_texel_centers() {
        let g = grid(3, 3);
        let texels: Vec<Texel> = (0..9).map(|i| [i as f32, 0.0]).collect();
        let plane = Plane::new(g, &texels);
        let center = plane.sample(cell_uv(g, 2, 1));
        assert!((center[0] - 5.0).abs() < 1e-5);
        let between = plane.sample([0.5, 0.5 / 3.0]);
        assert!((between[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_velocity_advects_to_itself() {
        let g = grid(5, 5);
        let texels: Vec<Texel> = (0..25).map(|i| if i == 12 { [0.0, 0.0] } else { [0.1, 0.0] }).collect();
        let plane = Plane::new(g, &texels);
        let u = AdvectUniforms {
            aspect_ratio: 1.0,
            grid_scale: 5.0,
            viscosity: 0.0,
        };
        let v = advect(&plane, 2, 2, &u);
        assert!(v[0].abs() < 1e-6 && v[1] == 0.0);
    }

    #[test]
    fn jacobi_fixed_point_of_uniform_pressure() {
        let g = grid(3, 3);
        let pressure = vec![[1.5, 0.0]; 9];
        let div = vec![[0.0, 0.0]; 9];
        let u = StencilUniforms { grid_scale: 3.0 };
        let p = jacobi(&Plane::new(g, &pressure), &Plane::new(g, &div), 1, 1, &u);
        assert_eq!(p, [1.5, 0.0]);
    }

    #[test]
    fn diffuse_keeps_uniform_field_and_spreads_a_spike() {
        let g = grid(5, 5);
        let u = StencilUniforms { grid_scale: 5.0 };
        let uniform = vec![[0.75, -0.5]; 25];
        let flat = Plane::new(g, &uniform);
        for (x, y) in g.region_cells(Region::Interior) {
            let v = diffuse(&flat, x, y, &u);
            assert!((v[0] - 0.75).abs() < 1e-6 && (v[1] + 0.5).abs() < 1e-6);
        }

        let mut texels = vec![[0.0; 2]; 25];
        texels[g.index(2, 2)] = [1.0, 2.0];
        let spike = Plane::new(g, &texels);
        let alpha = u.grid_scale;
        let center = diffuse(&spike, 2, 2, &u);
        assert!((center[0] - alpha / (alpha + 4.0)).abs() < 1e-6);
        assert!((center[1] - 2.0 * alpha / (alpha + 4.0)).abs() < 1e-6);
        for (x, y) in [(1, 2), (3, 2), (2, 1), (2, 3)] {
            let v = diffuse(&spike, x, y, &u);
            assert!((v[0] - 1.0 / (alpha + 4.0)).abs() < 1e-6, "({x}, {y})");
            assert!((v[1] - 2.0 / (alpha + 4.0)).abs() < 1e-6, "({x}, {y})");
        }
        assert_eq!(diffuse(&spike, 1, 1, &u), [0.0, 0.0]);
    }

    #[test]
    fn mismatched_region_is_skipped() {
        let g = grid(4, 4);
        let mut backend = CpuBackend::new();
        let src = backend.create_texture("src", g).unwrap();
        let dst = backend.create_texture("dst", g).unwrap();
        backend.upload(&src, &vec![[1.0, 1.0]; 16]).unwrap();
        backend.upload(&dst, &vec![[9.0, 9.0]; 16]).unwrap();
        backend.dispatch(
            &Program::Diffuse(StencilUniforms { grid_scale: 4.0 }),
            Region::Boundary,
            PassIo::new(&dst).source(&src),
        );
        backend.dispatch(
            &Program::Boundary(ScaleUniforms { scale: -1.0 }),
            Region::Interior,
            PassIo::new(&dst),
        );
        assert_eq!(backend.passes(), 0);
        assert!(backend.read_back(&dst).unwrap().iter().all(|t| *t == [9.0, 9.0]));
    }

    #[test]
    fn force_is_zero_outside_cutoff() {
        let g = grid(32, 32);
        let texels = vec![[0.0; 2]; g.cells()];
        let plane = Plane::new(g, &texels);
        let u = ForceUniforms {
            mouse: [0.5, 0.5],
            mouse_delta: [1.0, 0.0],
            speed: 0.01,
            resolution: [32.0, 32.0],
            radius: 2.0,
            strength: 10.0,
        };
        assert!(add_force(&plane, 16, 16, &u)[0] > 0.0);
        assert_eq!(add_force(&plane, 16, 24, &u), [0.0, 0.0]);
        let still = ForceUniforms {
            mouse_delta: [0.0, 0.0],
            ..u
        };
        assert_eq!(add_force(&plane, 16, 16, &still), [0.0, 0.0]);
    }
}
