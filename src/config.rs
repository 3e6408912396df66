//! Scene constants shared read-only by every path of a render.
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    closure::beckmann::{BeckmannSampling, BeckmannTable},
    error::ConfigError,
    film::Passes,
    scene::Scene,
    shader::{ShaderExclude, MAX_CLOSURE},
    SHADER_NONE,
};

/// Upper bound of volume stack entries, the terminator included.
pub const MAX_VOLUME_STACK_SIZE: usize = 32;
/// Upper bound of any bounce budget.
pub const MAX_BOUNCES: u32 = 1024;

/// How microfacet slopes of Beckmann closures are sampled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeckmannStrategy {
    /// Precomputed inverse cdf table
    #[default]
    Table,
    /// Newton refined analytic approximation
    Analytic,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubsurfaceMethod {
    #[default]
    Disk,
    /// Requested random walk subsurface, traced with disk sampling as well.
    RandomWalk,
}

/// Bounce budgets and integrator toggles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorData {
    /// Bounces before russian roulette kicks in
    pub min_bounce: u32,
    pub max_bounce: u32,
    pub max_diffuse_bounce: u32,
    pub max_glossy_bounce: u32,
    pub max_transmission_bounce: u32,
    pub max_volume_bounce: u32,
    pub transparent_min_bounce: u32,
    pub transparent_max_bounce: u32,
    pub transparent_shadows: bool,

    /// Blurs glossy closures on unlikely paths, `f64::MAX` disables it.
    pub filter_glossy: f64,

    pub use_direct_light: bool,
    /// Lights are intersectable and weighted against light sampling.
    pub use_light_mis: bool,
    /// Inverse of the contribution below which shadow rays are subject to russian roulette,
    /// zero disables it.
    pub light_inv_rr_threshold: f64,

    /// Bounces after which indirect light is replaced by ambient occlusion, zero disables it.
    pub ao_bounces: u32,
    pub ao_bounces_distance: f64,
    pub ao_bounces_factor: f64,
    /// Ambient occlusion added to the combined pass by AO closures, zero disables it.
    pub ao_additive_factor: f64,
    /// Distance of AO closures and the AO pass
    pub ao_distance: f64,

    pub volume_max_steps: u32,
    pub volume_step_rate: f64,

    pub beckmann: BeckmannStrategy,
    pub subsurface: SubsurfaceMethod,

    /// Scrambles the random numbers of every pixel.
    pub seed: u32,
}

impl Default for IntegratorData {
    fn default() -> Self {
        Self {
            min_bounce: 0,
            max_bounce: 12,
            max_diffuse_bounce: 4,
            max_glossy_bounce: 4,
            max_transmission_bounce: 12,
            max_volume_bounce: 0,
            transparent_min_bounce: 0,
            transparent_max_bounce: 8,
            transparent_shadows: true,
            filter_glossy: f64::MAX,
            use_direct_light: true,
            use_light_mis: true,
            light_inv_rr_threshold: 0.0,
            ao_bounces: 0,
            ao_bounces_distance: 0.0,
            ao_bounces_factor: 1.0,
            ao_additive_factor: 0.0,
            ao_distance: 1.0,
            volume_max_steps: 1024,
            volume_step_rate: 1.0,
            beckmann: BeckmannStrategy::Table,
            subsurface: SubsurfaceMethod::Disk,
            seed: 0,
        }
    }
}

/// The world.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundData {
    pub surface_shader: i32,
    pub volume_shader: i32,
    pub volume_step_size: f64,
    /// The background is sampled as a light and weighted against BSDF sampling.
    pub use_mis: bool,
    /// Camera rays that see the background leave the film transparent.
    pub transparent: bool,
    /// Ray types that do not see the background
    pub exclude: ShaderExclude,
}

impl Default for BackgroundData {
    fn default() -> Self {
        Self {
            surface_shader: SHADER_NONE,
            volume_shader: SHADER_NONE,
            volume_step_size: 1.0,
            use_mis: false,
            transparent: false,
            exclude: ShaderExclude::empty(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilmData {
    pub passes: Passes,
}

/// All scene constants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelData {
    pub integrator: IntegratorData,
    pub background: BackgroundData,
    pub film: FilmData,
    /// Volume stack entries per path, the terminator included
    pub volume_stack_size: usize,
    /// Closures per shading point
    pub max_closures: usize,
    /// Transparent shadow hits recorded per shadow intersection
    pub shadow_isect_size: usize,
    /// The camera may start inside a volume, camera paths rebuild their volume stack first.
    pub camera_inside_volume: bool,
}

impl Default for KernelData {
    fn default() -> Self {
        Self {
            integrator: IntegratorData::default(),
            background: BackgroundData::default(),
            film: FilmData::default(),
            volume_stack_size: 16,
            max_closures: MAX_CLOSURE,
            shadow_isect_size: 1024,
            camera_inside_volume: false,
        }
    }
}

fn clamp_bounces(field: &'static str, value: &mut u32) {
    if *value > MAX_BOUNCES {
        warn!(field, value = *value, max = MAX_BOUNCES, "bounce budget clamped");
        *value = MAX_BOUNCES;
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value < 0.0 {
        Err(ConfigError::NegativeThreshold { field, value })
    } else {
        Ok(())
    }
}

impl KernelData {
    /// Checks the constants, values out of range but usable are clamped with a warning.
    ///
    /// # Errors
    /// Returns the first constant the integrator can not work with.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        let integrator = &mut self.integrator;
        clamp_bounces("max_bounce", &mut integrator.max_bounce);
        clamp_bounces("max_diffuse_bounce", &mut integrator.max_diffuse_bounce);
        clamp_bounces("max_glossy_bounce", &mut integrator.max_glossy_bounce);
        clamp_bounces(
            "max_transmission_bounce",
            &mut integrator.max_transmission_bounce,
        );
        clamp_bounces("max_volume_bounce", &mut integrator.max_volume_bounce);
        clamp_bounces(
            "transparent_max_bounce",
            &mut integrator.transparent_max_bounce,
        );
        if self.volume_stack_size > MAX_VOLUME_STACK_SIZE {
            warn!(
                requested = self.volume_stack_size,
                max = MAX_VOLUME_STACK_SIZE,
                "volume stack size clamped"
            );
            self.volume_stack_size = MAX_VOLUME_STACK_SIZE;
        }

        if self.volume_stack_size < 2 {
            return Err(ConfigError::ZeroVolumeStackSize);
        }
        if self.max_closures > MAX_CLOSURE {
            return Err(ConfigError::ClosureCapacity {
                requested: self.max_closures,
                max: MAX_CLOSURE,
            });
        }
        if self.shadow_isect_size == 0 {
            return Err(ConfigError::ZeroShadowIntersections);
        }
        let integrator = &self.integrator;
        if integrator.volume_step_rate <= 0.0 || integrator.volume_step_rate.is_nan() {
            return Err(ConfigError::NonPositiveStepRate(integrator.volume_step_rate));
        }
        if integrator.volume_max_steps == 0 {
            return Err(ConfigError::ZeroMaxSteps);
        }
        non_negative("filter_glossy", integrator.filter_glossy)?;
        non_negative("light_inv_rr_threshold", integrator.light_inv_rr_threshold)?;
        non_negative("ao_bounces_distance", integrator.ao_bounces_distance)?;
        non_negative("ao_distance", integrator.ao_distance)?;
        non_negative("volume_step_size", self.background.volume_step_size)?;
        Ok(())
    }
}

/// Read-only context handed to every kernel.
pub struct KernelGlobals<'a, S: Scene> {
    pub data: &'a KernelData,
    pub scene: &'a S,
    pub beckmann_table: Option<&'a BeckmannTable>,
}

// derived impls would require `S: Copy`
impl<S: Scene> Clone for KernelGlobals<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: Scene> Copy for KernelGlobals<'_, S> {}

impl<'a, S: Scene> KernelGlobals<'a, S> {
    #[must_use]
    pub const fn new(
        data: &'a KernelData,
        scene: &'a S,
        beckmann_table: Option<&'a BeckmannTable>,
    ) -> Self {
        Self {
            data,
            scene,
            beckmann_table,
        }
    }

    /// Beckmann slope sampling as configured, analytic when no table is loaded.
    #[must_use]
    pub fn beckmann_sampling(&self) -> BeckmannSampling<'a> {
        match (self.data.integrator.beckmann, self.beckmann_table) {
            (BeckmannStrategy::Table, Some(table)) => BeckmannSampling::Table(table),
            _ => BeckmannSampling::Analytic,
        }
    }
}
