//! Capabilities the integrator consumes from the renderer around it.
//!
//! Acceleration structures, shader graphs and light trees live outside of this crate. The
//! integrator only talks to them through the traits in this module, bundled as [`Scene`].
use crate::{
    shader::{ObjectFlag, ShaderData, ShaderExclude, ShaderFlag, PRIM_NONE},
    PathRayFlag, Ray, Spectrum, Vec2d, Vec3d, OBJECT_NONE, SHADER_NONE,
};

/// Lamp index meaning "not a lamp", emissive triangles and the background use it.
pub const LAMP_NONE: i32 = -1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    #[default]
    Triangle,
    /// Light geometry that is intersected by camera and bounce rays to apply MIS.
    Light,
}

/// A ray hit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Intersection {
    pub t: f64,
    /// Barycentric coordinates on the primitive
    pub u: f64,
    pub v: f64,
    pub prim: i32,
    pub object: i32,
    pub kind: PrimitiveKind,
}

impl Default for Intersection {
    fn default() -> Self {
        Self {
            t: 0.0,
            u: 0.0,
            v: 0.0,
            prim: PRIM_NONE,
            object: OBJECT_NONE,
            kind: PrimitiveKind::Triangle,
        }
    }
}

/// A hit found by the local intersection of subsurface probe rays.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LocalHit {
    pub isect: Intersection,
    /// Geometric normal at the hit
    pub ng: Vec3d,
}

/// Outcome of tracing a shadow ray through all its blockers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShadowHits {
    /// An opaque blocker was found, the recorded hits are meaningless then.
    pub opaque: bool,
    /// Number of transparent blockers along the ray, this may exceed the number recorded.
    pub num_hits: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LightKind {
    #[default]
    Point,
    Spot,
    Area,
    Distant,
    Background,
    /// Emissive mesh triangle
    Triangle,
}

/// A point sampled on a light, or reconstructed from a ray hitting one.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightSample {
    /// Position on the light
    pub p: Vec3d,
    /// Normal of the light at `p`
    pub ng: Vec3d,
    /// Direction from the shading point to the light
    pub d: Vec3d,
    /// Distance to the light, [`crate::RAY_T_MAX`] for distant lights and the background
    pub t: f64,
    pub u: f64,
    pub v: f64,
    /// Solid angle density of the sample
    pub pdf: f64,
    /// Factor applied to the evaluated emission
    pub eval_fac: f64,
    pub object: i32,
    pub prim: i32,
    pub shader: i32,
    pub lamp: i32,
    pub kind: LightKind,
    pub exclude: ShaderExclude,
    pub use_mis: bool,
    pub cast_shadow: bool,
}

impl Default for LightSample {
    fn default() -> Self {
        Self {
            p: Vec3d::ZERO,
            ng: Vec3d::Z,
            d: Vec3d::Z,
            t: 0.0,
            u: 0.0,
            v: 0.0,
            pdf: 0.0,
            eval_fac: 1.0,
            object: OBJECT_NONE,
            prim: PRIM_NONE,
            shader: SHADER_NONE,
            lamp: LAMP_NONE,
            kind: LightKind::Point,
            exclude: ShaderExclude::empty(),
            use_mis: true,
            cast_shadow: true,
        }
    }
}

impl LightSample {
    /// Lamps and the background, as opposed to emissive geometry. Lamps are evaluated again
    /// when their shadow ray arrives.
    #[must_use]
    pub fn is_lamp(&self) -> bool {
        self.prim == PRIM_NONE && self.kind != LightKind::Background
    }
}

/// Ray queries against the scene geometry.
pub trait SceneIntersect {
    /// Closest hit along `ray` among the primitives visible to `visibility`.
    fn intersect(&self, ray: &Ray, visibility: PathRayFlag) -> Option<Intersection>;

    /// Closest hit among lights that are intersectable for MIS, before `ray.t`.
    fn intersect_lights(&self, _ray: &Ray, _path_flag: PathRayFlag) -> Option<Intersection> {
        None
    }

    /// Records transparent blockers along `ray` into `hits`, in any order. The nearest
    /// `max_hits` blockers must be among them, the caller drops any others.
    fn intersect_shadow_all(
        &self,
        ray: &Ray,
        visibility: PathRayFlag,
        max_hits: usize,
        hits: &mut Vec<Intersection>,
    ) -> ShadowHits;

    /// Records hits with volume boundaries along `ray` into `hits`, in any order. The nearest
    /// `max_hits` hits must be among them, the caller drops any others.
    fn intersect_volume_all(
        &self,
        ray: &Ray,
        visibility: PathRayFlag,
        max_hits: usize,
        hits: &mut Vec<Intersection>,
    );

    /// Records up to `max_hits` hits with `object` along `ray` into `hits`, choosing the kept
    /// hits with reservoir sampling on `lcg_state` once more are found. Returns the number of
    /// hits found in total.
    fn intersect_local(
        &self,
        ray: &Ray,
        object: i32,
        max_hits: usize,
        lcg_state: &mut u32,
        hits: &mut Vec<LocalHit>,
    ) -> usize;

    /// Fills the geometry of `sd` for the hit of `ray`: position, normals, incoming direction,
    /// object, primitive, shader, object flags and the static shader flags including
    /// [`ShaderFlag::BACKFACING`].
    fn shader_setup_from_ray(&self, sd: &mut ShaderData, ray: &Ray, isect: &Intersection);

    /// Static flags of the shader at a hit, without evaluating it.
    fn intersection_shader_flags(&self, isect: &Intersection) -> ShaderFlag;

    /// Static flags of a shader.
    fn shader_flags(&self, shader: i32) -> ShaderFlag;

    fn object_flags(&self, object: i32) -> ObjectFlag;

    /// Ray marching step size inside the volume of `object`.
    fn object_volume_step_size(&self, _object: i32) -> f64 {
        f64::MAX
    }

    /// Ambient occlusion distance of `object`, zero falls back to the global one.
    fn object_ao_distance(&self, _object: i32) -> f64 {
        0.0
    }
}

/// Shader graph evaluation. Implementations fill the closures of a shading point through the
/// `add_*` builders of [`ShaderData`], which has been reset beforehand.
pub trait ShaderEval {
    fn eval_surface(&self, sd: &mut ShaderData, path_flag: PathRayFlag);

    fn eval_volume(&self, _sd: &mut ShaderData, _path_flag: PathRayFlag) {}

    fn eval_background(&self, _sd: &mut ShaderData, _path_flag: PathRayFlag) {}
}

/// Light selection and evaluation.
pub trait LightSampler {
    /// Picks a light and a point on it as seen from `p`.
    fn sample_light(
        &self,
        _p: Vec3d,
        _u: f64,
        _v: f64,
        _bounce: u32,
        _path_flag: PathRayFlag,
    ) -> Option<LightSample> {
        None
    }

    /// Rebuilds the light sample for a ray that hit a light, `ray.p` being the point the ray
    /// was sampled from.
    fn light_from_intersection(&self, _ray: &Ray, _isect: &Intersection) -> Option<LightSample> {
        None
    }

    /// Collects the distant lights a ray escaping the scene in direction `d` sees.
    fn distant_lights_from_ray(&self, _d: Vec3d, _lights: &mut Vec<LightSample>) {}

    /// Emission arriving from a light sample, `eval_fac` included.
    fn eval_light(&self, _ls: &LightSample) -> Spectrum {
        Spectrum::ZERO
    }

    /// Solid angle density of sampling the background in direction `d` from `p`.
    fn background_light_pdf(&self, _p: Vec3d, _d: Vec3d) -> f64 {
        0.0
    }

    /// Solid angle density of sampling the emissive triangle at `sd` from `t` away.
    fn triangle_light_pdf(&self, _sd: &ShaderData, _t: f64) -> f64 {
        0.0
    }
}

/// Everything the integrator needs from the scene.
pub trait Scene: SceneIntersect + ShaderEval + LightSampler + Sync {}

impl<T> Scene for T where T: SceneIntersect + ShaderEval + LightSampler + Sync {}

/// Generates primary rays.
pub trait Camera {
    /// Ray through pixel `(x, y)`, jittered by `filter` inside the pixel and by `lens` on the
    /// aperture. `None` when the pixel sees nothing.
    fn generate_ray(&self, x: u32, y: u32, filter: Vec2d, lens: Vec2d, time: f64) -> Option<Ray>;

    /// Whether the camera may sit inside a volume, camera paths then rebuild their volume stack
    /// before the first intersection.
    fn is_inside_volume(&self) -> bool {
        false
    }
}
