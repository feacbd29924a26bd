//! GPU implementation of the paint simulation.
//!
//! Owns the field targets, the compiled programs and the reference
//! textures. A tick plans every pass up front (the CPU side of the
//! simulation decides splats and drops), uploads all pass uniforms with a
//! single write, records every pass into one encoder and submits once.

use std::sync::Arc;

use image::RgbaImage;

use crate::assets::ReferenceImages;
use crate::config::{CompositeParameters, WallpaperConfig};
use crate::physics::engine::{EngineError, SimulationCore, SimulationEngine, SplatOp};
use crate::physics::field::{ResolutionTracker, SimResolution};
use crate::physics::touch::TouchEvent;
use crate::render::context::GpuContext;
use crate::render::headless::read_texture;
use crate::render::passes::{
    CompositeUniform, FieldProgram, PassPrograms, PassUniform, UniformArena,
};
use crate::render::targets::{decode_mask, decode_velocity, FieldPrecision, FieldTargets};

/// Initial number of uniform slots; grows on demand.
const INITIAL_ARENA_SLOTS: usize = 512;

/// Upload an RGBA8 image as a sampled texture.
fn upload_image(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    image: &RgbaImage,
) -> wgpu::TextureView {
    let (width, height) = image.dimensions();
    let size = wgpu::Extent3d {
        width: width.max(1),
        height: height.max(1),
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    if width > 0 && height > 0 {
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            image.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            size,
        );
    }
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

/// Reference images resident on the GPU.
struct ReferenceTextures {
    paint: wgpu::TextureView,
    glass: wgpu::TextureView,
    has_glass: bool,
}

impl ReferenceTextures {
    fn upload(device: &wgpu::Device, queue: &wgpu::Queue, references: &ReferenceImages) -> Self {
        let paint = upload_image(device, queue, "Paint Reference", &references.paint);
        let transparent = RgbaImage::new(1, 1);
        let glass = upload_image(
            device,
            queue,
            "Glass Reference",
            references.glass.as_ref().unwrap_or(&transparent),
        );
        Self {
            paint,
            glass,
            has_glass: references.has_glass(),
        }
    }
}

/// Bind groups for every source combination of the two fields.
///
/// Indexed by the `src` of the field(s) being read, so no bind group is
/// created while recording a tick.
struct FieldBindings {
    /// primary = velocity[s]
    velocity: [wgpu::BindGroup; 2],
    /// primary = mask[s]
    mask: [wgpu::BindGroup; 2],
    /// [velocity src][mask src]: primary velocity, secondary mask
    velocity_mask: [[wgpu::BindGroup; 2]; 2],
    /// [mask src][velocity src]: primary mask, secondary velocity
    mask_velocity: [[wgpu::BindGroup; 2]; 2],
    /// primary = foreground reference
    init: wgpu::BindGroup,
    /// indexed by mask src
    composite: [wgpu::BindGroup; 2],
}

impl FieldBindings {
    fn new(
        device: &wgpu::Device,
        programs: &PassPrograms,
        targets: &FieldTargets,
        references: &ReferenceTextures,
    ) -> Self {
        let velocity = targets.velocity.slots();
        let mask = targets.mask.slots();
        let pair = |primary: &wgpu::TextureView, secondary: &wgpu::TextureView| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Field Bind Group"),
                layout: &programs.field_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(primary),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(secondary),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Sampler(&programs.sampler),
                    },
                ],
            })
        };
        let composite = |mask_view: &wgpu::TextureView| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Composite Bind Group"),
                layout: &programs.composite_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(mask_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&references.paint),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(&references.glass),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: wgpu::BindingResource::Sampler(&programs.sampler),
                    },
                ],
            })
        };

        Self {
            velocity: std::array::from_fn(|s| pair(&velocity[s].view, &velocity[s].view)),
            mask: std::array::from_fn(|s| pair(&mask[s].view, &mask[s].view)),
            velocity_mask: std::array::from_fn(|v| {
                std::array::from_fn(|m| pair(&velocity[v].view, &mask[m].view))
            }),
            mask_velocity: std::array::from_fn(|m| {
                std::array::from_fn(|v| pair(&mask[m].view, &velocity[v].view))
            }),
            init: pair(&references.paint, &references.paint),
            composite: std::array::from_fn(|s| composite(&mask[s].view)),
        }
    }
}

/// A planned field pass: which program and its scalars.
struct PlannedPass {
    program: FieldProgram,
    uniform: PassUniform,
}

/// The paint simulation on the GPU.
pub struct GpuPaintEngine {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    core: SimulationCore,
    composite: CompositeParameters,
    sim_scale: f32,
    output_format: wgpu::TextureFormat,
    programs: PassPrograms,
    references: ReferenceTextures,
    arena: UniformArena,
    composite_uniform: wgpu::Buffer,
    composite_bind_group: wgpu::BindGroup,
    targets: Option<FieldTargets>,
    bindings: Option<FieldBindings>,
    tracker: ResolutionTracker,
    released: bool,
}

impl GpuPaintEngine {
    /// Compile programs and upload the reference images. Fields are
    /// allocated on the first `on_resize`.
    pub fn new(
        context: &GpuContext,
        config: &WallpaperConfig,
        references: &ReferenceImages,
        output_format: wgpu::TextureFormat,
    ) -> Result<Self, EngineError> {
        let device = context.device.clone();
        let queue = context.queue.clone();

        let precision = FieldPrecision::select(&context.adapter);
        let programs = PassPrograms::new(&device, precision, output_format)?;
        let references = ReferenceTextures::upload(&device, &queue, references);
        let arena = UniformArena::new(&device, &programs.uniform_layout, INITIAL_ARENA_SLOTS);

        let composite_uniform = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Composite Uniform Buffer"),
            size: std::mem::size_of::<CompositeUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let composite_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Composite Uniform Bind Group"),
            layout: &programs.composite_uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: composite_uniform.as_entire_binding(),
            }],
        });

        log::info!(
            "GPU paint engine ready ({:?} fields, output {:?})",
            precision,
            output_format
        );

        Ok(Self {
            device,
            queue,
            core: SimulationCore::new(config.simulation.clone()),
            composite: config.composite.clone(),
            sim_scale: config.simulation.sim_scale,
            output_format,
            programs,
            references,
            arena,
            composite_uniform,
            composite_bind_group,
            targets: None,
            bindings: None,
            tracker: ResolutionTracker::default(),
            released: false,
        })
    }

    pub fn core(&self) -> &SimulationCore {
        &self.core
    }

    pub fn output_format(&self) -> wgpu::TextureFormat {
        self.output_format
    }

    /// Composite into targets of `format` from now on. Fields, drops and
    /// time are kept.
    pub fn set_output_format(&mut self, format: wgpu::TextureFormat) -> Result<(), EngineError> {
        if format == self.output_format {
            return Ok(());
        }
        self.programs.rebuild_composite(&self.device, format)?;
        log::info!("Composite output format {:?} -> {:?}", self.output_format, format);
        self.output_format = format;
        Ok(())
    }

    /// Precision of the allocated fields, if any.
    pub fn precision(&self) -> Option<FieldPrecision> {
        self.targets.as_ref().map(|t| t.precision)
    }

    /// `(velocity src, mask src)` of the allocated fields.
    pub fn sources(&self) -> Option<(usize, usize)> {
        self.targets
            .as_ref()
            .map(|t| (t.velocity.src(), t.mask.src()))
    }

    fn base_uniform(&self, resolution: SimResolution, precision: FieldPrecision) -> PassUniform {
        PassUniform {
            texel: resolution.texel(),
            velocity_range: precision.velocity_range(),
            time: self.core.time(),
            ..PassUniform::default()
        }
    }

    fn splat_pass(&self, base: PassUniform, op: SplatOp) -> PlannedPass {
        match op {
            SplatOp::Velocity {
                point,
                force,
                radius,
            } => PlannedPass {
                program: FieldProgram::SplatVelocity,
                uniform: PassUniform {
                    point,
                    force,
                    radius,
                    ..base
                },
            },
            SplatOp::Mask {
                point,
                radius,
                amount,
            } => PlannedPass {
                program: FieldProgram::SplatMask,
                uniform: PassUniform {
                    point,
                    radius,
                    amount,
                    ..base
                },
            },
        }
    }

    /// Allocate fields, clear velocity and seed both mask slots from the
    /// foreground reference.
    fn allocate(&mut self, resolution: SimResolution) -> Result<(), EngineError> {
        self.bindings = None;
        self.targets = None;

        let targets = FieldTargets::allocate(&self.device, resolution, self.programs.precision())?;
        if targets.precision != self.programs.precision() {
            self.programs = PassPrograms::new(&self.device, targets.precision, self.output_format)?;
            self.arena = UniformArena::new(
                &self.device,
                &self.programs.uniform_layout,
                INITIAL_ARENA_SLOTS,
            );
        }
        let bindings = FieldBindings::new(&self.device, &self.programs, &targets, &self.references);

        let uniform = self.base_uniform(resolution, targets.precision);
        self.arena.write(&self.queue, &[uniform]);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Field Init Encoder"),
            });
        let zero = targets.precision.velocity_zero();
        for slot in targets.velocity.slots() {
            let _clear = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Velocity Clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &slot.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: zero,
                            g: zero,
                            b: 0.0,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
        }
        for slot in targets.mask.slots() {
            self.record_pass(
                &mut encoder,
                &slot.view,
                FieldProgram::InitMask,
                &bindings.init,
                0,
            );
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        let mut targets = targets;
        targets.velocity.reset();
        targets.mask.reset();
        self.targets = Some(targets);
        self.bindings = Some(bindings);
        Ok(())
    }

    fn record_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        program: FieldProgram,
        textures: &wgpu::BindGroup,
        slot: usize,
    ) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(program.name()),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        pass.set_pipeline(self.programs.field_pipeline(program));
        pass.set_bind_group(0, self.arena.bind_group(), &[self.arena.offset(slot)]);
        pass.set_bind_group(1, textures, &[]);
        pass.set_vertex_buffer(0, self.programs.quad.slice(..));
        pass.draw(0..6, 0..1);
    }

    fn composite_values(&self, resolution: SimResolution) -> CompositeUniform {
        let p = &self.composite;
        let [lx, ly, lz] = p.light_direction;
        CompositeUniform {
            light_dir: [lx, ly, lz, 0.0],
            texel: resolution.texel(),
            time: self.core.time(),
            has_glass: if self.references.has_glass { 1.0 } else { 0.0 },
            dry_epsilon: p.dry_epsilon,
            refraction: p.refraction,
            normal_strength: p.normal_strength,
            specular_power: p.specular_power,
            specular_strength: p.specular_strength,
            glass_strength: p.glass_strength,
            grain: p.grain,
            alpha_low: p.alpha_range[0],
            alpha_high: p.alpha_range[1],
            _padding: [0.0; 3],
        }
    }

    /// Read the current velocity field, row 0 at the top (texture order).
    pub fn read_velocity(&self) -> Result<Vec<[f32; 2]>, EngineError> {
        let Some(targets) = self.targets.as_ref() else {
            return Ok(Vec::new());
        };
        let (bytes_per_texel, _) = targets.texel_sizes();
        let res = targets.resolution;
        let bytes = read_texture(
            &self.device,
            &self.queue,
            &targets.velocity.current().texture,
            res.width,
            res.height,
            bytes_per_texel,
        )?;
        Ok(bytes
            .chunks_exact(bytes_per_texel as usize)
            .map(|texel| decode_velocity(targets.precision, texel))
            .collect())
    }

    /// Read the current mask field, row 0 at the top (texture order).
    pub fn read_mask(&self) -> Result<Vec<f32>, EngineError> {
        let Some(targets) = self.targets.as_ref() else {
            return Ok(Vec::new());
        };
        let (_, bytes_per_texel) = targets.texel_sizes();
        let res = targets.resolution;
        let bytes = read_texture(
            &self.device,
            &self.queue,
            &targets.mask.current().texture,
            res.width,
            res.height,
            bytes_per_texel,
        )?;
        Ok(bytes
            .chunks_exact(bytes_per_texel as usize)
            .map(|texel| decode_mask(targets.precision, texel))
            .collect())
    }
}

impl SimulationEngine<wgpu::TextureView> for GpuPaintEngine {
    fn on_resize(&mut self, width: u32, height: u32) -> Result<bool, EngineError> {
        if self.released {
            return Ok(false);
        }
        match self.tracker.update(width, height, self.sim_scale) {
            Some(resolution) => {
                log::debug!(
                    "Surface {}x{} -> simulation {}x{}",
                    width,
                    height,
                    resolution.width,
                    resolution.height
                );
                if let Err(error) = self.allocate(resolution) {
                    self.tracker.invalidate();
                    return Err(error);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn tick(
        &mut self,
        dt: f32,
        touches: &[TouchEvent],
        target: &mut wgpu::TextureView,
    ) -> Result<(), EngineError> {
        if self.released {
            return Ok(());
        }
        let Some((resolution, precision)) =
            self.targets.as_ref().map(|t| (t.resolution, t.precision))
        else {
            return Ok(());
        };

        let before = self.core.begin_tick(dt, touches);
        let after = self.core.update_drops(dt);
        let p = self.core.params();
        let base = PassUniform {
            dt,
            ..self.base_uniform(resolution, precision)
        };

        let mut plan: Vec<PlannedPass> = Vec::with_capacity(before.len() + after.len() + 2);
        plan.extend(before.into_iter().map(|op| self.splat_pass(base, op)));
        plan.push(PlannedPass {
            program: FieldProgram::AdvectVelocity,
            uniform: PassUniform {
                dissipation: p.velocity_dissipation,
                gravity: p.gravity,
                noise_strength: p.noise_strength,
                ..base
            },
        });
        plan.push(PlannedPass {
            program: FieldProgram::AdvectMask,
            uniform: PassUniform {
                dissipation: p.mask_dissipation,
                threshold: p.mask_threshold,
                ..base
            },
        });
        plan.extend(after.into_iter().map(|op| self.splat_pass(base, op)));

        self.arena
            .ensure_capacity(&self.device, &self.programs.uniform_layout, plan.len());
        let uniforms: Vec<PassUniform> = plan.iter().map(|pass| pass.uniform).collect();
        self.arena.write(&self.queue, &uniforms);
        self.queue.write_buffer(
            &self.composite_uniform,
            0,
            bytemuck::bytes_of(&self.composite_values(resolution)),
        );

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Paint Tick Encoder"),
            });

        let (Some(mut targets), Some(bindings)) = (self.targets.take(), self.bindings.take())
        else {
            return Ok(());
        };
        for (slot, pass) in plan.iter().enumerate() {
            let v = targets.velocity.src();
            let m = targets.mask.src();
            let (field, textures) = match pass.program {
                FieldProgram::SplatVelocity => (&mut targets.velocity, &bindings.velocity[v]),
                FieldProgram::AdvectVelocity => {
                    (&mut targets.velocity, &bindings.velocity_mask[v][m])
                }
                FieldProgram::SplatMask => (&mut targets.mask, &bindings.mask[m]),
                FieldProgram::AdvectMask => (&mut targets.mask, &bindings.mask_velocity[m][v]),
                FieldProgram::InitMask => (&mut targets.mask, &bindings.init),
            };
            self.record_pass(&mut encoder, &field.target().view, pass.program, textures, slot);
            field.flip();
        }

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("composite"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &*target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(self.programs.composite_pipeline());
            pass.set_bind_group(0, &self.composite_bind_group, &[]);
            pass.set_bind_group(1, &bindings.composite[targets.mask.src()], &[]);
            pass.set_vertex_buffer(0, self.programs.quad.slice(..));
            pass.draw(0..6, 0..1);
        }

        self.targets = Some(targets);
        self.bindings = Some(bindings);
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.bindings = None;
        self.targets = None;
        self.tracker.invalidate();
        self.released = true;
        log::info!("GPU paint engine released");
    }

    fn resolution(&self) -> Option<SimResolution> {
        self.tracker.sim()
    }
}
