//! Shader programs for the field passes and the composite.
//!
//! Every pass is one full-screen draw of a shared unit quad. Field passes
//! take their scalars from a per-pass slot of one uniform buffer (dynamic
//! offsets), so the whole tick is written with a single `write_buffer`.

use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::physics::engine::EngineError;
use crate::render::targets::FieldPrecision;

const COMMON_WGSL: &str = include_str!("shaders/common.wgsl");
const FIELD_WGSL: &str = include_str!("shaders/field.wgsl");

/// Vertex of the full-screen quad.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
}

impl QuadVertex {
    pub fn buffer_layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x2,
            }],
        }
    }
}

/// Two triangles covering clip space.
pub const UNIT_QUAD: [QuadVertex; 6] = [
    QuadVertex { position: [-1.0, -1.0] },
    QuadVertex { position: [1.0, -1.0] },
    QuadVertex { position: [1.0, 1.0] },
    QuadVertex { position: [-1.0, -1.0] },
    QuadVertex { position: [1.0, 1.0] },
    QuadVertex { position: [-1.0, 1.0] },
];

/// Scalars of one field pass. Layout matches `PassUniform` in field.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, Default)]
pub struct PassUniform {
    pub point: [f32; 2],
    pub force: [f32; 2],
    pub texel: [f32; 2],
    pub radius: f32,
    pub amount: f32,
    pub dt: f32,
    pub dissipation: f32,
    pub gravity: f32,
    pub time: f32,
    pub threshold: f32,
    pub noise_strength: f32,
    /// Zero for float storage, otherwise the 8-bit packing range
    pub velocity_range: f32,
    pub _padding: f32,
}

/// Composite tuning. Layout matches `CompositeUniform` in composite.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, Default)]
pub struct CompositeUniform {
    pub light_dir: [f32; 4],
    pub texel: [f32; 2],
    pub time: f32,
    pub has_glass: f32,
    pub dry_epsilon: f32,
    pub refraction: f32,
    pub normal_strength: f32,
    pub specular_power: f32,
    pub specular_strength: f32,
    pub glass_strength: f32,
    pub grain: f32,
    pub alpha_low: f32,
    pub alpha_high: f32,
    pub _padding: [f32; 3],
}

/// Which field program a pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldProgram {
    SplatVelocity,
    SplatMask,
    AdvectVelocity,
    AdvectMask,
    InitMask,
}

impl FieldProgram {
    pub fn name(self) -> &'static str {
        match self {
            FieldProgram::SplatVelocity => "splat_velocity",
            FieldProgram::SplatMask => "splat_mask",
            FieldProgram::AdvectVelocity => "advect_velocity",
            FieldProgram::AdvectMask => "advect_mask",
            FieldProgram::InitMask => "init_mask",
        }
    }

    fn fragment_source(self) -> &'static str {
        match self {
            FieldProgram::SplatVelocity => include_str!("shaders/splat_velocity.wgsl"),
            FieldProgram::SplatMask => include_str!("shaders/splat_mask.wgsl"),
            FieldProgram::AdvectVelocity => include_str!("shaders/advect_velocity.wgsl"),
            FieldProgram::AdvectMask => include_str!("shaders/advect_mask.wgsl"),
            FieldProgram::InitMask => include_str!("shaders/init_mask.wgsl"),
        }
    }

    /// Whether the program writes the velocity field.
    pub fn writes_velocity(self) -> bool {
        matches!(self, FieldProgram::SplatVelocity | FieldProgram::AdvectVelocity)
    }

    /// Full WGSL source of the program.
    pub fn source(self) -> String {
        format!("{}\n{}\n{}", COMMON_WGSL, FIELD_WGSL, self.fragment_source())
    }
}

/// Full WGSL source of the composite program.
pub fn composite_source() -> String {
    format!("{}\n{}", COMMON_WGSL, include_str!("shaders/composite.wgsl"))
}

/// One uniform buffer holding a [`PassUniform`] per pass of a tick.
pub struct UniformArena {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    stride: u64,
    capacity: usize,
}

impl UniformArena {
    pub fn new(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, capacity: usize) -> Self {
        let alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        let size = std::mem::size_of::<PassUniform>() as u64;
        let stride = size.div_ceil(alignment) * alignment;
        let capacity = capacity.max(1).next_power_of_two();
        let (buffer, bind_group) = Self::create(device, layout, stride, capacity);
        Self {
            buffer,
            bind_group,
            stride,
            capacity,
        }
    }

    fn create(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        stride: u64,
        capacity: usize,
    ) -> (wgpu::Buffer, wgpu::BindGroup) {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Pass Uniform Arena"),
            size: stride * capacity as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Pass Uniform Bind Group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: NonZeroU64::new(std::mem::size_of::<PassUniform>() as u64),
                }),
            }],
        });
        (buffer, bind_group)
    }

    /// Grow (never shrink) so that `count` passes fit.
    pub fn ensure_capacity(
        &mut self,
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        count: usize,
    ) {
        if count <= self.capacity {
            return;
        }
        let capacity = count.next_power_of_two();
        log::debug!("Growing pass uniform arena to {} slots", capacity);
        let (buffer, bind_group) = Self::create(device, layout, self.stride, capacity);
        self.buffer = buffer;
        self.bind_group = bind_group;
        self.capacity = capacity;
    }

    /// Upload every pass's uniforms at once.
    pub fn write(&self, queue: &wgpu::Queue, uniforms: &[PassUniform]) {
        if uniforms.is_empty() {
            return;
        }
        let stride = self.stride as usize;
        let size = std::mem::size_of::<PassUniform>();
        let mut bytes = vec![0u8; stride * uniforms.len()];
        for (slot, uniform) in bytes.chunks_exact_mut(stride).zip(uniforms) {
            slot[..size].copy_from_slice(bytemuck::bytes_of(uniform));
        }
        queue.write_buffer(&self.buffer, 0, &bytes);
    }

    /// Dynamic offset of pass `index`.
    pub fn offset(&self, index: usize) -> wgpu::DynamicOffset {
        (index as u64 * self.stride) as wgpu::DynamicOffset
    }

    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }
}

/// Compiled pipelines, layouts and the shared quad.
pub struct PassPrograms {
    pub uniform_layout: wgpu::BindGroupLayout,
    pub field_layout: wgpu::BindGroupLayout,
    pub composite_layout: wgpu::BindGroupLayout,
    pub composite_uniform_layout: wgpu::BindGroupLayout,
    pub sampler: wgpu::Sampler,
    pub quad: wgpu::Buffer,
    precision: FieldPrecision,
    composite_pipeline_layout: wgpu::PipelineLayout,
    splat_velocity: wgpu::RenderPipeline,
    splat_mask: wgpu::RenderPipeline,
    advect_velocity: wgpu::RenderPipeline,
    advect_mask: wgpu::RenderPipeline,
    init_mask: wgpu::RenderPipeline,
    composite: wgpu::RenderPipeline,
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

fn uniform_entry(dynamic: bool, size: usize) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: dynamic,
            min_binding_size: NonZeroU64::new(size as u64),
        },
        count: None,
    }
}

/// Build one full-screen pipeline inside a validation scope.
fn build_pipeline(
    device: &wgpu::Device,
    program: &'static str,
    source: String,
    layout: &wgpu::PipelineLayout,
    format: wgpu::TextureFormat,
) -> Result<wgpu::RenderPipeline, EngineError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(program),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(program),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: &module,
            entry_point: Some("vs_main"),
            buffers: &[QuadVertex::buffer_layout()],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &module,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });

    match pollster::block_on(device.pop_error_scope()) {
        Some(error) => Err(EngineError::ShaderCompile {
            program,
            message: error.to_string(),
        }),
        None => Ok(pipeline),
    }
}

impl PassPrograms {
    /// Compile every program for the given field precision and output
    /// format. Any compile or link error is returned as
    /// [`EngineError::ShaderCompile`].
    pub fn new(
        device: &wgpu::Device,
        precision: FieldPrecision,
        output_format: wgpu::TextureFormat,
    ) -> Result<Self, EngineError> {
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Pass Uniform Layout"),
            entries: &[uniform_entry(true, std::mem::size_of::<PassUniform>())],
        });
        let field_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Field Texture Layout"),
            entries: &[texture_entry(0), texture_entry(1), sampler_entry(2)],
        });
        let composite_uniform_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Composite Uniform Layout"),
                entries: &[uniform_entry(false, std::mem::size_of::<CompositeUniform>())],
            });
        let composite_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Composite Texture Layout"),
            entries: &[
                texture_entry(0),
                texture_entry(1),
                texture_entry(2),
                sampler_entry(3),
            ],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Field Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let quad = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Unit Quad"),
            contents: bytemuck::cast_slice(&UNIT_QUAD),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let field_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Field Pipeline Layout"),
            bind_group_layouts: &[&uniform_layout, &field_layout],
            push_constant_ranges: &[],
        });
        let composite_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Composite Pipeline Layout"),
                bind_group_layouts: &[&composite_uniform_layout, &composite_layout],
                push_constant_ranges: &[],
            });

        let field = |program: FieldProgram| {
            let format = if program.writes_velocity() {
                precision.velocity_format()
            } else {
                precision.mask_format()
            };
            build_pipeline(device, program.name(), program.source(), &field_pipeline_layout, format)
        };

        let programs = Self {
            splat_velocity: field(FieldProgram::SplatVelocity)?,
            splat_mask: field(FieldProgram::SplatMask)?,
            advect_velocity: field(FieldProgram::AdvectVelocity)?,
            advect_mask: field(FieldProgram::AdvectMask)?,
            init_mask: field(FieldProgram::InitMask)?,
            composite: build_pipeline(
                device,
                "composite",
                composite_source(),
                &composite_pipeline_layout,
                output_format,
            )?,
            uniform_layout,
            field_layout,
            composite_layout,
            composite_uniform_layout,
            sampler,
            quad,
            precision,
            composite_pipeline_layout,
        };
        log::debug!("Built shader programs for {:?} fields", precision);
        Ok(programs)
    }

    pub fn precision(&self) -> FieldPrecision {
        self.precision
    }

    pub fn field_pipeline(&self, program: FieldProgram) -> &wgpu::RenderPipeline {
        match program {
            FieldProgram::SplatVelocity => &self.splat_velocity,
            FieldProgram::SplatMask => &self.splat_mask,
            FieldProgram::AdvectVelocity => &self.advect_velocity,
            FieldProgram::AdvectMask => &self.advect_mask,
            FieldProgram::InitMask => &self.init_mask,
        }
    }

    pub fn composite_pipeline(&self) -> &wgpu::RenderPipeline {
        &self.composite
    }

    /// Rebuild only the composite for a new output format. Layouts are
    /// kept, so existing bind groups stay valid.
    pub fn rebuild_composite(
        &mut self,
        device: &wgpu::Device,
        output_format: wgpu::TextureFormat,
    ) -> Result<(), EngineError> {
        self.composite = build_pipeline(
            device,
            "composite",
            composite_source(),
            &self.composite_pipeline_layout,
            output_format,
        )?;
        Ok(())
    }
}
