//! GPU storage for the velocity and mask fields.
//!
//! Each field is a pair of render-target textures wrapped in a
//! [`Field`], so passes always read `current()` and render into
//! `target()`. Half-float storage is preferred; when the adapter cannot
//! render, sample and filter those formats, or allocation fails
//! validation, everything is reallocated once in 8-bit formats with the
//! velocity range-packed around 0.5.

use crate::physics::engine::EngineError;
use crate::physics::field::{Field, SimResolution};

/// Velocity range representable by 8-bit storage (UV units / s).
pub const BYTE_VELOCITY_RANGE: f32 = 8.0;

const FIELD_USAGES: wgpu::TextureUsages = wgpu::TextureUsages::RENDER_ATTACHMENT
    .union(wgpu::TextureUsages::TEXTURE_BINDING)
    .union(wgpu::TextureUsages::COPY_SRC);

/// Storage precision of the field textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPrecision {
    /// `Rg16Float` velocity, `R16Float` mask
    Half,
    /// `Rg8Unorm` velocity (range-packed), `R8Unorm` mask
    Byte,
}

impl FieldPrecision {
    pub fn velocity_format(self) -> wgpu::TextureFormat {
        match self {
            FieldPrecision::Half => wgpu::TextureFormat::Rg16Float,
            FieldPrecision::Byte => wgpu::TextureFormat::Rg8Unorm,
        }
    }

    pub fn mask_format(self) -> wgpu::TextureFormat {
        match self {
            FieldPrecision::Half => wgpu::TextureFormat::R16Float,
            FieldPrecision::Byte => wgpu::TextureFormat::R8Unorm,
        }
    }

    /// Packing range passed to the shaders; zero means unpacked floats.
    pub fn velocity_range(self) -> f32 {
        match self {
            FieldPrecision::Half => 0.0,
            FieldPrecision::Byte => BYTE_VELOCITY_RANGE,
        }
    }

    /// Stored value of a zero velocity component.
    pub fn velocity_zero(self) -> f64 {
        match self {
            FieldPrecision::Half => 0.0,
            FieldPrecision::Byte => 0.5,
        }
    }

    /// Whether the adapter can render to, sample and filter both formats.
    pub fn supported_by(self, adapter: &wgpu::Adapter) -> bool {
        [self.velocity_format(), self.mask_format()]
            .into_iter()
            .all(|format| {
                let features = adapter.get_texture_format_features(format);
                features.allowed_usages.contains(FIELD_USAGES)
                    && features
                        .flags
                        .contains(wgpu::TextureFormatFeatureFlags::FILTERABLE)
            })
    }

    /// Preferred precision for `adapter`.
    pub fn select(adapter: &wgpu::Adapter) -> Self {
        if FieldPrecision::Half.supported_by(adapter) {
            FieldPrecision::Half
        } else {
            log::warn!("Half-float field targets unsupported, using 8-bit storage");
            FieldPrecision::Byte
        }
    }
}

/// One texture of a field and its default view.
pub struct FieldTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl FieldTexture {
    fn new(
        device: &wgpu::Device,
        label: &str,
        resolution: SimResolution,
        format: wgpu::TextureFormat,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: resolution.width,
                height: resolution.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: FIELD_USAGES,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }
}

/// Both double-buffered fields at one simulation resolution.
pub struct FieldTargets {
    pub velocity: Field<FieldTexture>,
    pub mask: Field<FieldTexture>,
    pub resolution: SimResolution,
    pub precision: FieldPrecision,
}

impl FieldTargets {
    /// Allocate in `preferred` precision, falling back once to 8-bit.
    pub fn allocate(
        device: &wgpu::Device,
        resolution: SimResolution,
        preferred: FieldPrecision,
    ) -> Result<Self, EngineError> {
        match Self::try_allocate(device, resolution, preferred) {
            Ok(targets) => Ok(targets),
            Err(message) if preferred == FieldPrecision::Half => {
                log::warn!(
                    "Half-float field allocation failed ({}), retrying with 8-bit storage",
                    message
                );
                Self::try_allocate(device, resolution, FieldPrecision::Byte)
                    .map_err(EngineError::TargetAllocation)
            }
            Err(message) => Err(EngineError::TargetAllocation(message)),
        }
    }

    fn try_allocate(
        device: &wgpu::Device,
        resolution: SimResolution,
        precision: FieldPrecision,
    ) -> Result<Self, String> {
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let velocity_format = precision.velocity_format();
        let mask_format = precision.mask_format();
        let targets = Self {
            velocity: Field::new(
                FieldTexture::new(device, "Velocity A", resolution, velocity_format),
                FieldTexture::new(device, "Velocity B", resolution, velocity_format),
            ),
            mask: Field::new(
                FieldTexture::new(device, "Mask A", resolution, mask_format),
                FieldTexture::new(device, "Mask B", resolution, mask_format),
            ),
            resolution,
            precision,
        };

        let validation = pollster::block_on(device.pop_error_scope());
        let memory = pollster::block_on(device.pop_error_scope());
        match validation.or(memory) {
            Some(error) => Err(error.to_string()),
            None => {
                log::debug!(
                    "Allocated {:?} field targets at {}x{}",
                    precision,
                    resolution.width,
                    resolution.height
                );
                Ok(targets)
            }
        }
    }

    /// Bytes per texel of the velocity and mask textures.
    pub fn texel_sizes(&self) -> (u32, u32) {
        match self.precision {
            FieldPrecision::Half => (4, 2),
            FieldPrecision::Byte => (2, 1),
        }
    }
}

/// Convert stored velocity texel bytes to UV units per second.
pub fn decode_velocity(precision: FieldPrecision, texel: &[u8]) -> [f32; 2] {
    match precision {
        FieldPrecision::Half => [
            half::f16::from_le_bytes([texel[0], texel[1]]).to_f32(),
            half::f16::from_le_bytes([texel[2], texel[3]]).to_f32(),
        ],
        FieldPrecision::Byte => {
            let unpack = |b: u8| (b as f32 / 255.0 - 0.5) * 2.0 * BYTE_VELOCITY_RANGE;
            [unpack(texel[0]), unpack(texel[1])]
        }
    }
}

/// Convert stored mask texel bytes to coverage.
pub fn decode_mask(precision: FieldPrecision, texel: &[u8]) -> f32 {
    match precision {
        FieldPrecision::Half => half::f16::from_le_bytes([texel[0], texel[1]]).to_f32(),
        FieldPrecision::Byte => texel[0] as f32 / 255.0,
    }
}
