//! Per path state carried between kernels.
//!
//! A path owns its state exclusively. Kernels read and write only the state of the path they run
//! for, the film is the only thing shared between paths.
use crate::{
    scene::Intersection, volume_stack::VolumeStack, PathRayFlag, Ray, Spectrum, Vec3d,
    OBJECT_NONE,
};

/// The kernels of the wavefront state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceKernel {
    IntersectClosest,
    IntersectShadow,
    IntersectSubsurface,
    IntersectVolumeStack,
    ShadeBackground,
    ShadeLight,
    ShadeSurface,
    /// Surface shading for shaders that trace rays of their own, or when AO is rendered.
    ShadeSurfaceRaytrace,
    ShadeVolume,
    ShadeShadow,
}

impl DeviceKernel {
    /// Kernels that run on shadow and AO branches.
    #[must_use]
    pub const fn is_shadow(self) -> bool {
        matches!(self, Self::IntersectShadow | Self::ShadeShadow)
    }
}

/// State of the main path.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PathState {
    /// Pixel the path contributes to
    pub x: u32,
    pub y: u32,
    pub sample: u32,
    pub rng_hash: u32,
    pub rng_offset: u32,

    pub bounce: u32,
    pub diffuse_bounce: u32,
    pub glossy_bounce: u32,
    pub transmission_bounce: u32,
    pub transparent_bounce: u32,
    pub volume_bounce: u32,
    /// Crossings of volume boundaries without a surface
    pub volume_bounds_bounce: u32,

    pub flag: PathRayFlag,

    /// Pdf of the last BSDF sample, for MIS against lights hit later
    pub mis_ray_pdf: f64,
    /// Distance travelled through transparent surfaces since the last BSDF sample
    pub mis_ray_t: f64,
    /// Smallest pdf of any BSDF sample along the path, drives glossy filtering
    pub min_ray_pdf: f64,
    pub continuation_probability: f64,

    pub throughput: Spectrum,
    /// Split of the first bounce into diffuse and glossy, for the light passes
    pub pass_diffuse_weight: Spectrum,
    pub pass_glossy_weight: Spectrum,

    /// Next kernel to run, `None` once the path terminated
    pub queued_kernel: Option<DeviceKernel>,
}

impl Default for PathState {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            sample: 0,
            rng_hash: 0,
            rng_offset: 0,
            bounce: 0,
            diffuse_bounce: 0,
            glossy_bounce: 0,
            transmission_bounce: 0,
            transparent_bounce: 0,
            volume_bounce: 0,
            volume_bounds_bounce: 0,
            flag: PathRayFlag::empty(),
            mis_ray_pdf: 0.0,
            mis_ray_t: 0.0,
            min_ray_pdf: f64::MAX,
            continuation_probability: 1.0,
            throughput: Spectrum::ONE,
            pass_diffuse_weight: Spectrum::ZERO,
            pass_glossy_weight: Spectrum::ZERO,
            queued_kernel: None,
        }
    }
}

/// Parameters of a pending subsurface bounce.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SubsurfaceState {
    pub albedo: Spectrum,
    pub radius: Spectrum,
    pub roughness: Option<f64>,
    /// Geometric normal at the entry point
    pub ng: Vec3d,
    /// Object the probe rays are restricted to
    pub object: i32,
}

impl Default for SubsurfaceState {
    fn default() -> Self {
        Self {
            albedo: Spectrum::ZERO,
            radius: Spectrum::ZERO,
            roughness: None,
            ng: Vec3d::Z,
            object: OBJECT_NONE,
        }
    }
}

/// State of a shadow or ambient occlusion path branched off the main path.
#[derive(Clone, Debug, PartialEq)]
pub struct ShadowState {
    pub rng_offset: u32,
    pub bounce: u32,
    pub transparent_bounce: u32,
    pub flag: PathRayFlag,
    pub throughput: Spectrum,
    /// Contribution without occlusion, the AO pass stores it
    pub unshadowed_throughput: Spectrum,
    pub pass_diffuse_weight: Spectrum,
    pub pass_glossy_weight: Spectrum,
    pub ray: Ray,
    /// Transparent blockers of the current segment, sorted by distance
    pub isect: Vec<Intersection>,
    /// Blockers found in total, may exceed the recorded ones
    pub num_hits: usize,
    pub volume_stack: VolumeStack,
    pub queued_kernel: Option<DeviceKernel>,
}

impl ShadowState {
    #[must_use]
    pub fn new(volume_stack_size: usize, shadow_isect_size: usize) -> Self {
        Self {
            rng_offset: 0,
            bounce: 0,
            transparent_bounce: 0,
            flag: PathRayFlag::empty(),
            throughput: Spectrum::ZERO,
            unshadowed_throughput: Spectrum::ZERO,
            pass_diffuse_weight: Spectrum::ZERO,
            pass_glossy_weight: Spectrum::ZERO,
            ray: Ray::new(Vec3d::ZERO, Vec3d::Z, 0.0),
            isect: Vec::with_capacity(shadow_isect_size),
            num_hits: 0,
            volume_stack: VolumeStack::new(volume_stack_size),
            queued_kernel: None,
        }
    }
}

/// Everything a path carries between kernels. The shadow and AO branches are drained before the
/// main path continues, so each needs a single slot.
#[derive(Clone, Debug, PartialEq)]
pub struct IntegratorState {
    pub path: PathState,
    pub ray: Ray,
    /// Closest hit of `ray`, `None` on a miss
    pub isect: Option<Intersection>,
    pub volume_stack: VolumeStack,
    pub subsurface: SubsurfaceState,
    pub shadow: ShadowState,
    pub ao: ShadowState,
}

impl IntegratorState {
    #[must_use]
    pub fn new(volume_stack_size: usize, shadow_isect_size: usize) -> Self {
        Self {
            path: PathState::default(),
            ray: Ray::new(Vec3d::ZERO, Vec3d::Z, 0.0),
            isect: None,
            volume_stack: VolumeStack::new(volume_stack_size),
            subsurface: SubsurfaceState::default(),
            shadow: ShadowState::new(volume_stack_size, shadow_isect_size),
            ao: ShadowState::new(volume_stack_size, shadow_isect_size),
        }
    }

    /// Random numbers at the current bounce of the main path.
    #[must_use]
    pub const fn rng(&self) -> crate::rng::RngState {
        crate::rng::RngState::new(self.path.rng_hash, self.path.rng_offset, self.path.sample)
    }

    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        self.path.queued_kernel.is_none()
            && self.shadow.queued_kernel.is_none()
            && self.ao.queued_kernel.is_none()
    }

    /// Shadow or AO branch of the path.
    #[must_use]
    pub fn shadow_mut(&mut self, ao: bool) -> &mut ShadowState {
        if ao {
            &mut self.ao
        } else {
            &mut self.shadow
        }
    }

    #[must_use]
    pub const fn shadow(&self, ao: bool) -> &ShadowState {
        if ao {
            &self.ao
        } else {
            &self.shadow
        }
    }
}
