//! wgpu compute backend.
//!
//! Every field is a storage buffer of `vec2<f32>` texels. Each program is a
//! compute pipeline built once from `shaders/fluid.wgsl`; passes are recorded
//! into one encoder per frame with their uniforms packed into a ring of
//! dynamic-offset slots, and submitted by [`PassBackend::finish_frame`].

use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};

use super::{ForceUniforms, PassBackend, PassIo, Program, Texel};
use crate::error::FluidError;
use crate::grid::{GridSize, Region};

const TEXEL_BYTES: u64 = std::mem::size_of::<Texel>() as u64;
const RECT_WORKGROUP: u32 = 16;
const STRIP_WORKGROUP: u32 = 64;
/// Passes recorded before the uniform ring forces an early submit.
const RING_SLOTS: u64 = 256;

/// Device and queue shared by the solver and the presentation layer.
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Picks an adapter able to run compute shaders, compatible with
    /// `surface` when one is given.
    pub async fn new(
        instance: wgpu::Instance,
        surface: Option<&wgpu::Surface<'_>>,
    ) -> Result<Self, FluidError> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: surface,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| FluidError::Unsupported("no suitable graphics adapter".into()))?;

        let info = adapter.get_info();
        let downlevel = adapter.get_downlevel_capabilities();
        if !downlevel.flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS) {
            return Err(FluidError::Unsupported(format!(
                "adapter {} ({:?}) lacks compute shaders",
                info.name, info.backend
            )));
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Fluid Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits {
                        max_storage_buffer_binding_size: adapter
                            .limits()
                            .max_storage_buffer_binding_size,
                        ..wgpu::Limits::downlevel_defaults()
                    },
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| FluidError::Unsupported(format!("device request failed: {e}")))?;

        log::info!("using adapter {} ({:?})", info.name, info.backend);
        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }

    /// Context without a presentation surface.
    pub async fn headless() -> Result<Self, FluidError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        Self::new(instance, None).await
    }
}

/// A field plane living in a storage buffer.
#[derive(Debug)]
pub struct GpuTexture {
    buffer: wgpu::Buffer,
    grid: GridSize,
    label: &'static str,
}

impl GpuTexture {
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

/// Uniform block shared by every kernel; see `PassParams` in the shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
struct PassParams {
    grid: [u32; 2],
    origin: u32,
    count: u32,
    uv_per_velocity: [f32; 2],
    _pad: [f32; 2],
    mouse: [f32; 4],
    grid_scale: f32,
    scalar: f32,
    speed: f32,
    strength: f32,
    resolution: [f32; 2],
    radius: f32,
    cutoff: f32,
}

const PARAMS_BYTES: u64 = std::mem::size_of::<PassParams>() as u64;

impl PassParams {
    fn new(program: &Program, grid: GridSize, region: Region) -> Self {
        let mut params = PassParams {
            grid: [grid.width(), grid.height()],
            origin: u32::from(region == Region::Interior),
            count: grid.boundary_len() as u32,
            ..Default::default()
        };
        match program {
            Program::Advect(u) => {
                params.uv_per_velocity = u.uv_per_velocity();
                params.grid_scale = u.grid_scale;
                params.scalar = u.dissipation();
            }
            Program::Diffuse(u)
            | Program::Divergence(u)
            | Program::Jacobi(u)
            | Program::SubtractGradient(u) => {
                params.grid_scale = u.grid_scale;
            }
            Program::AddForce(u) => {
                params.mouse = [u.mouse[0], u.mouse[1], u.mouse_delta[0], u.mouse_delta[1]];
                params.speed = u.speed;
                params.strength = u.strength;
                params.resolution = u.resolution;
                params.radius = u.radius;
                params.cutoff = u.radius * ForceUniforms::CUTOFF_RADII;
            }
            Program::ScalePressure(u) | Program::Boundary(u) => params.scalar = u.scale,
        }
        params
    }
}

/// One compute pipeline per program, built at construction.
struct Programs {
    advect: wgpu::ComputePipeline,
    diffuse: wgpu::ComputePipeline,
    add_force: wgpu::ComputePipeline,
    divergence: wgpu::ComputePipeline,
    scale_pressure: wgpu::ComputePipeline,
    jacobi: wgpu::ComputePipeline,
    subtract_gradient: wgpu::ComputePipeline,
    enforce_boundary: wgpu::ComputePipeline,
}

impl Programs {
    fn build(device: &wgpu::Device, layout: &wgpu::PipelineLayout, module: &wgpu::ShaderModule) -> Self {
        let pipeline = |entry_point: &'static str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: Some(layout),
                module,
                entry_point,
                compilation_options: Default::default(),
                cache: None,
            })
        };
        Self {
            advect: pipeline("advect"),
            diffuse: pipeline("diffuse"),
            add_force: pipeline("add_force"),
            divergence: pipeline("divergence"),
            scale_pressure: pipeline("scale_pressure"),
            jacobi: pipeline("jacobi"),
            subtract_gradient: pipeline("subtract_gradient"),
            enforce_boundary: pipeline("enforce_boundary"),
        }
    }

    fn get(&self, program: &Program) -> &wgpu::ComputePipeline {
        match program {
            Program::Advect(_) => &self.advect,
            Program::Diffuse(_) => &self.diffuse,
            Program::AddForce(_) => &self.add_force,
            Program::Divergence(_) => &self.divergence,
            Program::ScalePressure(_) => &self.scale_pressure,
            Program::Jacobi(_) => &self.jacobi,
            Program::SubtractGradient(_) => &self.subtract_gradient,
            Program::Boundary(_) => &self.enforce_boundary,
        }
    }
}

pub struct GpuBackend {
    context: GpuContext,
    layout: wgpu::BindGroupLayout,
    programs: Programs,
    /// Bound where a program has no source or aux input.
    placeholder: wgpu::Buffer,
    params: wgpu::Buffer,
    params_stride: u64,
    staged_params: Vec<u8>,
    staged_slots: u64,
    pending: Option<wgpu::CommandEncoder>,
}

impl GpuBackend {
    pub fn new(context: GpuContext) -> Result<Self, FluidError> {
        let device = &context.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Fluid Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../shaders/fluid.wgsl").into()),
        });

        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Fluid Bind Group Layout"),
            entries: &[
                storage(0, true),
                storage(1, false),
                storage(2, true),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: NonZeroU64::new(PARAMS_BYTES),
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Fluid Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let programs = Programs::build(device, &pipeline_layout, &shader);

        let alignment = u64::from(device.limits().min_uniform_buffer_offset_alignment);
        let params_stride = PARAMS_BYTES.div_ceil(alignment) * alignment;
        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Pass Params Ring"),
            size: params_stride * RING_SLOTS,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let placeholder = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Unbound Field"),
            size: 16,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        log::debug!("fluid programs built, uniform slot stride {params_stride} bytes");
        Ok(Self {
            context,
            layout,
            programs,
            placeholder,
            params,
            params_stride,
            staged_params: vec![0; (params_stride * RING_SLOTS) as usize],
            staged_slots: 0,
            pending: None,
        })
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.context.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.context.queue
    }

    /// Submits everything recorded so far, uniforms first.
    pub fn flush(&mut self) {
        let Some(encoder) = self.pending.take() else {
            return;
        };
        if self.staged_slots > 0 {
            let used = (self.staged_slots * self.params_stride) as usize;
            self.context
                .queue
                .write_buffer(&self.params, 0, &self.staged_params[..used]);
            self.staged_slots = 0;
        }
        self.context.queue.submit(Some(encoder.finish()));
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.context.device;
        self.pending.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Fluid Step Encoder"),
            })
        })
    }

    /// Stages `params` in the next ring slot and returns its byte offset.
    fn stage_params(&mut self, params: &PassParams) -> u32 {
        if self.staged_slots == RING_SLOTS {
            self.flush();
        }
        let offset = self.staged_slots * self.params_stride;
        let start = offset as usize;
        self.staged_params[start..start + PARAMS_BYTES as usize]
            .copy_from_slice(bytemuck::bytes_of(params));
        self.staged_slots += 1;
        offset as u32
    }

    fn workgroups(program: &Program, region: Region, grid: GridSize) -> Option<(u32, u32)> {
        if !program.runs_over(region) {
            return None;
        }
        match region {
            Region::Boundary => Some(((grid.boundary_len() as u32).div_ceil(STRIP_WORKGROUP), 1)),
            Region::Interior => Some((
                (grid.width() - 2).div_ceil(RECT_WORKGROUP),
                (grid.height() - 2).div_ceil(RECT_WORKGROUP),
            )),
            Region::Closure => Some((
                grid.width().div_ceil(RECT_WORKGROUP),
                grid.height().div_ceil(RECT_WORKGROUP),
            )),
        }
    }
}

impl PassBackend for GpuBackend {
    type Texture = GpuTexture;

    fn create_texture(
        &mut self,
        label: &'static str,
        grid: GridSize,
    ) -> Result<GpuTexture, FluidError> {
        let size = grid.cells() as u64 * TEXEL_BYTES;
        let limits = self.context.device.limits();
        let max = u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
        let allocation_error = |reason: String| FluidError::Allocation {
            label,
            width: grid.width(),
            height: grid.height(),
            reason,
        };
        if size > max {
            return Err(allocation_error(format!(
                "{size} bytes exceeds the {max} byte storage binding limit"
            )));
        }

        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            buffer.destroy();
            return Err(allocation_error(err.to_string()));
        }
        Ok(GpuTexture { buffer, grid, label })
    }

    fn release_texture(&mut self, texture: GpuTexture) {
        // Recorded passes may still reference the buffer.
        self.flush();
        texture.buffer.destroy();
    }

    fn clear_texture(&mut self, texture: &GpuTexture) {
        self.encoder().clear_buffer(&texture.buffer, 0, None);
    }

    fn upload(&mut self, texture: &GpuTexture, texels: &[Texel]) -> Result<(), FluidError> {
        let expected = texture.grid.cells();
        if texels.len() != expected {
            return Err(FluidError::ShapeMismatch {
                expected,
                actual: texels.len(),
            });
        }
        // Queue writes land before the next submit; earlier passes go first.
        self.flush();
        self.context
            .queue
            .write_buffer(&texture.buffer, 0, bytemuck::cast_slice(texels));
        Ok(())
    }

    fn read_back(&mut self, texture: &GpuTexture) -> Result<Vec<Texel>, FluidError> {
        self.flush();
        let size = texture.buffer.size();
        let device = &self.context.device;
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Field Readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_buffer_to_buffer(&texture.buffer, 0, &staging, 0, size);
        self.context.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).ok();
        });
        device.poll(wgpu::Maintain::Wait);

        let readback_error = |reason: String| FluidError::Readback {
            label: texture.label,
            reason,
        };
        match pollster::block_on(receiver.receive()) {
            Some(Ok(())) => {}
            Some(Err(e)) => return Err(readback_error(e.to_string())),
            None => return Err(readback_error("map callback dropped".into())),
        }

        let texels = {
            let data = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, Texel>(&data).to_vec()
        };
        staging.unmap();
        staging.destroy();
        Ok(texels)
    }

    fn dispatch(&mut self, program: &Program, region: Region, io: PassIo<'_, GpuTexture>) {
        let grid = io.target.grid;
        let Some((groups_x, groups_y)) = Self::workgroups(program, region, grid) else {
            log::warn!("{} cannot run over {region:?}; pass skipped", program.name());
            return;
        };
        let offset = self.stage_params(&PassParams::new(program, grid, region));

        let source = io.source.map_or(&self.placeholder, |t| &t.buffer);
        let aux = io.aux.map_or(&self.placeholder, |t| &t.buffer);
        let bind_group = self
            .context
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(program.name()),
                layout: &self.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: source.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: io.target.buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: aux.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: &self.params,
                            offset: 0,
                            size: NonZeroU64::new(PARAMS_BYTES),
                        }),
                    },
                ],
            });

        let device = &self.context.device;
        let encoder = self.pending.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Fluid Step Encoder"),
            })
        });
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(program.name()),
            timestamp_writes: None,
        });
        pass.set_pipeline(self.programs.get(program));
        pass.set_bind_group(0, &bind_group, &[offset]);
        pass.dispatch_workgroups(groups_x, groups_y, 1);
    }

    fn finish_frame(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AdvectUniforms, ScaleUniforms};

    #[test]
    fn params_match_shader_layout() {
        assert_eq!(PARAMS_BYTES, 80);
        assert_eq!(std::mem::offset_of!(PassParams, mouse), 32);
        assert_eq!(std::mem::align_of::<PassParams>(), 4);
    }

    #[test]
    fn interior_params_are_inset() {
        let grid = GridSize::new(10, 6).unwrap();
        let program = Program::Advect(AdvectUniforms {
            aspect_ratio: 4.0,
            grid_scale: 2.0,
            viscosity: 2.0,
        });
        let params = PassParams::new(&program, grid, Region::Interior);
        assert_eq!(params.origin, 1);
        assert_eq!(params.uv_per_velocity, [0.5, 2.0]);
        assert_eq!(params.scalar, 0.5);
        let closure = PassParams::new(&program, grid, Region::Closure);
        assert_eq!(closure.origin, 0);
    }

    #[test]
    fn workgroups_cover_each_region() {
        let grid = GridSize::new(35, 18).unwrap();
        let boundary = Program::Boundary(ScaleUniforms { scale: -1.0 });
        let scale = Program::ScalePressure(ScaleUniforms { scale: 0.5 });
        assert_eq!(
            GpuBackend::workgroups(&boundary, Region::Boundary, grid),
            Some((2, 1))
        );
        assert_eq!(GpuBackend::workgroups(&scale, Region::Interior, grid), Some((3, 1)));
        assert_eq!(GpuBackend::workgroups(&scale, Region::Closure, grid), Some((3, 2)));
        assert_eq!(GpuBackend::workgroups(&scale, Region::Boundary, grid), None);
        assert_eq!(GpuBackend::workgroups(&boundary, Region::Closure, grid), None);
    }
}
