use bitflags::bitflags;

/// used for colors and spectral weights
pub type Spectrum = glam::f64::DVec3;

/// used for direction vectors and positions
pub type Vec3d = glam::f64::DVec3;
/// used for direction vectors
pub type Vec2d = glam::f64::DVec2;

/// Stand-in for an unbounded ray length. Finite on purpose, so `P + D * t` never overflows to
/// infinity when used as a sentinel.
pub const RAY_T_MAX: f64 = f64::MAX;

/// Object index meaning "no object", used by the world volume and the stack terminator.
pub const OBJECT_NONE: i32 = -1;
/// Shader index meaning "no shader".
pub const SHADER_NONE: i32 = -1;

bitflags! {
    /// Classifies a scattering event. Returned by every `sample` function and used by the
    /// integrator for path-type bookkeeping and MIS branching.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct ClosureLabel: u32 {
        const TRANSMIT = 1 << 0;
        const REFLECT = 1 << 1;
        const DIFFUSE = 1 << 2;
        const GLOSSY = 1 << 3;
        const SINGULAR = 1 << 4;
        const TRANSPARENT = 1 << 5;
        const VOLUME_SCATTER = 1 << 6;
        const SUBSURFACE_SCATTER = 1 << 7;
    }
}

bitflags! {
    /// State of a path. The low bits describe the ray type and double as the visibility mask
    /// handed to the scene, the remaining bits are integrator bookkeeping.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct PathRayFlag: u32 {
        const CAMERA = 1 << 0;
        const REFLECT = 1 << 1;
        const TRANSMIT = 1 << 2;
        const DIFFUSE = 1 << 3;
        const GLOSSY = 1 << 4;
        const SINGULAR = 1 << 5;
        const TRANSPARENT = 1 << 6;
        const VOLUME_SCATTER = 1 << 7;

        /// Shadow ray visibility, split so opaque and transparent blockers can be told apart.
        const SHADOW_OPAQUE = 1 << 8;
        const SHADOW_TRANSPARENT = 1 << 9;
        const SHADOW = Self::SHADOW_OPAQUE.bits() | Self::SHADOW_TRANSPARENT.bits();

        const ALL_VISIBILITY = (1 << 10) - 1;

        /// Skip multiple importance sampling for the next emission hit.
        const MIS_SKIP = 1 << 10;
        /// Some earlier bounce was diffuse.
        const DIFFUSE_ANCESTOR = 1 << 11;
        /// Background is still visible through transparent surfaces only.
        const TRANSPARENT_BACKGROUND = 1 << 12;

        const TERMINATE_ON_NEXT_SURFACE = 1 << 13;
        const TERMINATE_IN_NEXT_VOLUME = 1 << 14;
        /// Continue only through transparent surfaces.
        const TERMINATE_AFTER_TRANSPARENT = 1 << 15;
        const TERMINATE_IMMEDIATE =
            Self::TERMINATE_ON_NEXT_SURFACE.bits() | Self::TERMINATE_IN_NEXT_VOLUME.bits();
        const TERMINATE =
            Self::TERMINATE_IMMEDIATE.bits() | Self::TERMINATE_AFTER_TRANSPARENT.bits();

        /// The shader is evaluated for its emission only.
        const EMISSION = 1 << 16;

        /// The next intersection is the exit point of a subsurface bounce.
        const SUBSURFACE = 1 << 17;
        /// The subsurface exit uses a rough principled diffuse closure.
        const SUBSURFACE_USE_FRESNEL = 1 << 18;

        /// Contributions are split into diffuse, glossy and transmission passes.
        const SURFACE_PASS = 1 << 19;
        /// Contributions go to the volume pass.
        const VOLUME_PASS = 1 << 20;

        /// The shadow ray carries ambient occlusion.
        const SHADOW_FOR_AO = 1 << 21;
    }
}

impl PathRayFlag {
    /// Visibility mask for the next ray of a path in this state.
    #[must_use]
    pub fn visibility(self) -> Self {
        let mut vis = self & Self::ALL_VISIBILITY;
        if vis.contains(Self::TRANSMIT) {
            vis.remove(Self::DIFFUSE | Self::GLOSSY);
        }
        if vis.contains(Self::VOLUME_SCATTER) {
            vis.insert(Self::DIFFUSE);
        }
        vis
    }
}

/// A ray segment. `t` is the maximum distance along `d`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub p: Vec3d,
    pub d: Vec3d,
    pub t: f64,
}

impl Ray {
    #[must_use]
    pub const fn new(p: Vec3d, d: Vec3d, t: f64) -> Self {
        Self { p, d, t }
    }

    #[must_use]
    pub fn at(&self, t: f64) -> Vec3d {
        self.p + self.d * t
    }
}

/// Per-category accumulation of a BSDF evaluation. The split is kept for render passes,
/// `sum` is what the path throughput uses.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BsdfEval {
    pub diffuse: Spectrum,
    pub glossy: Spectrum,
    pub sum: Spectrum,
}

impl BsdfEval {
    #[must_use]
    pub fn new(is_diffuse: bool, value: Spectrum) -> Self {
        let mut eval = Self::default();
        eval.accum(is_diffuse, value);
        eval
    }

    pub fn accum(&mut self, is_diffuse: bool, value: Spectrum) {
        if is_diffuse {
            self.diffuse += value;
        } else {
            self.glossy += value;
        }
        self.sum += value;
    }

    pub fn mul(&mut self, value: Spectrum) {
        self.diffuse *= value;
        self.glossy *= value;
        self.sum *= value;
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.sum == Spectrum::ZERO
    }

    /// Fraction of the evaluation that came from diffuse closures
    #[must_use]
    pub fn pass_diffuse_weight(&self) -> Spectrum {
        crate::utils::safe_divide_spectrum(self.diffuse, self.sum)
    }

    /// Fraction of the evaluation that came from glossy closures
    #[must_use]
    pub fn pass_glossy_weight(&self) -> Spectrum {
        crate::utils::safe_divide_spectrum(self.glossy, self.sum)
    }
}

/// Contains the data that is returned by sampling a closure.
///
/// A failed sample has an empty `label` and a zero `pdf`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BsdfSample {
    /// The sampled direction, pointing away from the surface towards the light
    pub omega_in: Vec3d,

    /// The value of the closure for the sampled direction, cosine included
    pub eval: Spectrum,

    /// The probability density of choosing `omega_in`
    pub pdf: f64,

    pub label: ClosureLabel,
}

impl BsdfSample {
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.pdf > 0.0 && !self.label.is_empty()
    }
}

/// Marker value for delta distributions. Singular closures report this as both value and pdf
/// so the ratio is one and MIS can be skipped.
pub const SINGULAR_PDF: f64 = 1e6;
