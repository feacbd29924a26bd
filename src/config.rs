//! Configuration module for the paint wallpaper.
//!
//! This module defines the parameter structures for the wallpaper,
//! including simulation constants, composite tuning, asset locations
//! and frame timing.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Constants driving the field simulation.
///
/// Every value here is a stability or look-tuning constant; the defaults
/// are the canonical preset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationParameters {
    /// Simulation resolution as a fraction of the surface size
    pub sim_scale: f32,

    /// Multiplier applied to touch displacement to obtain splat force
    pub touch_force: f32,

    /// Gaussian radius of the touch velocity splat (UV units)
    pub touch_velocity_radius: f32,

    /// Gaussian radius of the touch mask splat (UV units)
    pub touch_mask_radius: f32,

    /// Density added at the center of a touch mask splat
    pub touch_mask_amount: f32,

    /// Per-tick probability of an autonomous drip at the top edge
    pub drip_probability: f32,

    /// Density added at the center of a drip
    pub drip_mask_amount: f32,

    /// Downward velocity injected by a drip
    pub drip_fall_speed: f32,

    /// Horizontal velocity jitter range of a drip
    pub drip_jitter: f32,

    /// Velocity dissipation per advection step (< 1)
    pub velocity_dissipation: f32,

    /// Mask dissipation per advection step (< 1)
    pub mask_dissipation: f32,

    /// Constant vertical acceleration (UV units / s^2, negative is down)
    pub gravity: f32,

    /// Amplitude of the hashed-noise velocity perturbation
    pub noise_strength: f32,

    /// Advected mask values below this snap to exactly zero
    pub mask_threshold: f32,

    /// Number of recycled drops
    pub drop_count: u32,

    /// Density added by a drop every tick
    pub drop_mask_amount: f32,

    /// Downward velocity injected by a drop every tick
    pub drop_fall_speed: f32,

    /// Ratio of the drop velocity splat radius to the drop radius
    pub drop_velocity_radius_scale: f32,

    /// Seed for the simulation's pseudo-random generator
    pub seed: u64,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self {
            sim_scale: 0.5,
            touch_force: 2.8,
            touch_velocity_radius: 0.08,
            touch_mask_radius: 0.08,
            touch_mask_amount: 0.22,
            drip_probability: 0.04,
            drip_mask_amount: 0.35,
            drip_fall_speed: -1.15,
            drip_jitter: 0.7,
            velocity_dissipation: 0.985,
            mask_dissipation: 0.999,
            gravity: -1.2,
            noise_strength: 0.08,
            mask_threshold: 0.004,
            drop_count: 140,
            drop_mask_amount: 0.1,
            drop_fall_speed: -0.9,
            drop_velocity_radius_scale: 2.2,
            seed: 7,
        }
    }
}

impl SimulationParameters {
    /// Slower, softer tuning of the alternative paint-advection solver.
    pub fn calm() -> Self {
        Self {
            touch_force: 1.6,
            touch_velocity_radius: 0.1,
            touch_mask_amount: 0.18,
            drip_probability: 0.02,
            velocity_dissipation: 0.97,
            mask_dissipation: 0.998,
            gravity: -0.6,
            noise_strength: 0.04,
            drop_count: 60,
            drop_fall_speed: -0.5,
            ..Self::default()
        }
    }
}

/// Tuning of the final composite pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeParameters {
    /// Mask values below this render as dry glass
    pub dry_epsilon: f32,

    /// Amplitude of the dry-glass grain
    pub grain: f32,

    /// Refraction offset per unit of mask gradient
    pub refraction: f32,

    /// Gradient scale used to tilt the surface normal
    pub normal_strength: f32,

    /// Specular exponent
    pub specular_power: f32,

    /// Specular intensity
    pub specular_strength: f32,

    /// Weight of the background reference image
    pub glass_strength: f32,

    /// Mask range mapped to alpha through smoothstep
    pub alpha_range: [f32; 2],

    /// Direction towards the light (normalized by the shader)
    pub light_direction: [f32; 3],
}

impl Default for CompositeParameters {
    fn default() -> Self {
        Self {
            dry_epsilon: 0.003,
            grain: 0.02,
            refraction: 0.065,
            normal_strength: 2.4,
            specular_power: 48.0,
            specular_strength: 0.5,
            glass_strength: 0.08,
            alpha_range: [0.02, 0.6],
            light_direction: [0.25, 0.65, 0.72],
        }
    }
}

/// Location of the optional reference images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetParameters {
    /// Directory searched for reference images
    #[serde(default = "default_asset_dir")]
    pub directory: PathBuf,

    /// Foreground "paint" image file name
    #[serde(default = "default_paint_image")]
    pub paint_image: String,

    /// Background "glass" image file name
    #[serde(default = "default_glass_image")]
    pub glass_image: String,
}

fn default_asset_dir() -> PathBuf {
    PathBuf::from("assets")
}

fn default_paint_image() -> String {
    "paint_ref.png".to_string()
}

fn default_glass_image() -> String {
    "glass_ref.png".to_string()
}

impl Default for AssetParameters {
    fn default() -> Self {
        Self {
            directory: default_asset_dir(),
            paint_image: default_paint_image(),
            glass_image: default_glass_image(),
        }
    }
}

/// Frame timing of the render scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingParameters {
    /// Refresh rate of the built-in frame timer (Hz)
    #[serde(default = "default_refresh_hz")]
    pub refresh_hz: f32,

    /// Upper bound of the simulation step (seconds)
    #[serde(default = "default_max_dt")]
    pub max_dt: f32,
}

fn default_refresh_hz() -> f32 {
    60.0
}

fn default_max_dt() -> f32 {
    0.1
}

impl Default for TimingParameters {
    fn default() -> Self {
        Self {
            refresh_hz: default_refresh_hz(),
            max_dt: default_max_dt(),
        }
    }
}

/// Named simulation tunings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// Mask/velocity solver with drops and drips
    #[default]
    Canonical,
    /// Softer alternative tuning
    Calm,
}

impl Preset {
    /// Simulation parameters of this preset.
    pub fn parameters(self) -> SimulationParameters {
        match self {
            Preset::Canonical => SimulationParameters::default(),
            Preset::Calm => SimulationParameters::calm(),
        }
    }
}

impl std::str::FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "canonical" => Ok(Preset::Canonical),
            "calm" => Ok(Preset::Calm),
            other => Err(format!("unknown preset '{}'", other)),
        }
    }
}

/// Complete wallpaper configuration combining all parameter groups.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WallpaperConfig {
    /// Simulation constants
    #[serde(default)]
    pub simulation: SimulationParameters,

    /// Composite tuning
    #[serde(default)]
    pub composite: CompositeParameters,

    /// Reference image locations
    #[serde(default)]
    pub assets: AssetParameters,

    /// Frame timing
    #[serde(default)]
    pub timing: TimingParameters,
}

impl WallpaperConfig {
    /// Configuration using the given preset's simulation parameters.
    pub fn with_preset(preset: Preset) -> Self {
        Self {
            simulation: preset.parameters(),
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file.
    ///
    /// # Arguments
    /// * `path` - Path to the JSON configuration file
    ///
    /// # Returns
    /// * `Ok(WallpaperConfig)` - Parsed configuration
    /// * `Err` - If file cannot be read or parsed
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|error| ConfigError::Io {
            path: path.as_ref().to_path_buf(),
            error,
        })?;
        serde_json::from_str(&contents).map_err(|error| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            error,
        })
    }

    /// Save configuration to a JSON file.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents =
            serde_json::to_string_pretty(self).map_err(|error| ConfigError::Serialize { error })?;
        fs::write(path.as_ref(), contents).map_err(|error| ConfigError::Io {
            path: path.as_ref().to_path_buf(),
            error,
        })
    }

    /// Interval between refreshes of the built-in frame timer.
    pub fn frame_interval(&self) -> std::time::Duration {
        let hz = if self.timing.refresh_hz > 0.0 {
            self.timing.refresh_hz
        } else {
            default_refresh_hz()
        };
        std::time::Duration::from_secs_f32(1.0 / hz)
    }
}

/// Error types for configuration operations.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error when reading or writing configuration files
    Io {
        path: std::path::PathBuf,
        error: std::io::Error,
    },
    /// JSON parsing error
    Parse {
        path: std::path::PathBuf,
        error: serde_json::Error,
    },
    /// JSON serialization error
    Serialize { error: serde_json::Error },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, error } => {
                write!(
                    formatter,
                    "Failed to read/write config file '{}': {}",
                    path.display(),
                    error
                )
            }
            ConfigError::Parse { path, error } => {
                write!(
                    formatter,
                    "Failed to parse config file '{}': {}",
                    path.display(),
                    error
                )
            }
            ConfigError::Serialize { error } => {
                write!(formatter, "Failed to serialize config: {}", error)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { error, .. } => Some(error),
            ConfigError::Parse { error, .. } => Some(error),
            ConfigError::Serialize { error } => Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WallpaperConfig::default();
        assert!((config.simulation.sim_scale - 0.5).abs() < f32::EPSILON);
        assert!((config.simulation.touch_force - 2.8).abs() < f32::EPSILON);
        assert!((config.simulation.mask_threshold - 0.004).abs() < f32::EPSILON);
        assert_eq!(config.simulation.drop_count, 140);
        assert!((config.timing.max_dt - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn test_presets_differ() {
        let canonical = Preset::Canonical.parameters();
        let calm = Preset::Calm.parameters();
        assert!(calm.velocity_dissipation < canonical.velocity_dissipation);
        assert!(calm.drop_count < canonical.drop_count);
        assert_eq!(calm.seed, canonical.seed);
    }

    #[test]
    fn test_preset_from_str() {
        assert_eq!("Calm".parse::<Preset>(), Ok(Preset::Calm));
        assert_eq!("canonical".parse::<Preset>(), Ok(Preset::Canonical));
        assert!("stormy".parse::<Preset>().is_err());
    }

    #[test]
    fn test_frame_interval() {
        let mut config = WallpaperConfig::default();
        config.timing.refresh_hz = 50.0;
        assert!((config.frame_interval().as_secs_f32() - 0.02).abs() < 1e-6);

        config.timing.refresh_hz = 0.0;
        assert!((config.frame_interval().as_secs_f32() - 1.0 / 60.0).abs() < 1e-6);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "simulation": { "sim_scale": 0.25, "touch_force": 2.8,
            "touch_velocity_radius": 0.08, "touch_mask_radius": 0.08,
            "touch_mask_amount": 0.22, "drip_probability": 0.0,
            "drip_mask_amount": 0.35, "drip_fall_speed": -1.15, "drip_jitter": 0.7,
            "velocity_dissipation": 0.985, "mask_dissipation": 0.999, "gravity": -1.2,
            "noise_strength": 0.08, "mask_threshold": 0.004, "drop_count": 0,
            "drop_mask_amount": 0.1, "drop_fall_speed": -0.9,
            "drop_velocity_radius_scale": 2.2, "seed": 3 } }"#;
        let config: WallpaperConfig = serde_json::from_str(json).unwrap();
        assert!((config.simulation.sim_scale - 0.25).abs() < f32::EPSILON);
        assert_eq!(config.simulation.drop_count, 0);
        assert_eq!(config.assets.paint_image, "paint_ref.png");
        assert!((config.timing.refresh_hz - 60.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_file_roundtrip() {
        let path = std::env::temp_dir().join("paint_wallpaper_config_test.json");
        let config = WallpaperConfig::with_preset(Preset::Calm);
        config.to_file(&path).unwrap();
        let loaded = WallpaperConfig::from_file(&path).unwrap();
        assert_eq!(loaded.simulation.drop_count, 60);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = WallpaperConfig::from_file("/nonexistent/paint_wallpaper.json");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
