//! Small analytic scenes for integrator tests.
use std::f64::consts;

use crate::{
    rng::lcg_step_uint,
    scene::{
        Intersection, LightKind, LightSample, LightSampler, LocalHit, PrimitiveKind,
        SceneIntersect, ShaderEval, ShadowHits,
    },
    shader::{ObjectFlag, ShaderData, ShaderExclude, ShaderFlag},
    PathRayFlag, Ray, Spectrum, Vec3d, OBJECT_NONE, SHADER_NONE,
};

/// Hits closer than this to the ray origin are ignored.
const EPSILON: f64 = 1e-7;

pub type ShaderFn = Box<dyn Fn(&mut ShaderData, PathRayFlag) + Send + Sync>;

pub struct TestShader {
    pub flags: ShaderFlag,
    pub surface: ShaderFn,
    pub volume: ShaderFn,
}

impl TestShader {
    pub fn surface(
        flags: ShaderFlag,
        f: impl Fn(&mut ShaderData, PathRayFlag) + Send + Sync + 'static,
    ) -> Self {
        Self {
            flags,
            surface: Box::new(f),
            volume: Box::new(|_, _| {}),
        }
    }

    pub fn volume(
        flags: ShaderFlag,
        f: impl Fn(&mut ShaderData, PathRayFlag) + Send + Sync + 'static,
    ) -> Self {
        Self {
            flags: flags | ShaderFlag::HAS_VOLUME,
            surface: Box::new(|_, _| {}),
            volume: Box::new(f),
        }
    }

    /// Volume boundary without a surface
    pub fn only_volume(
        flags: ShaderFlag,
        f: impl Fn(&mut ShaderData, PathRayFlag) + Send + Sync + 'static,
    ) -> Self {
        Self::volume(flags | ShaderFlag::HAS_ONLY_VOLUME, f)
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Shape {
    /// Not intersectable
    None,
    /// Infinite plane, `n` points to the front side
    Plane { p: Vec3d, n: Vec3d },
    Sphere { center: Vec3d, radius: f64 },
}

impl Shape {
    /// All hits along the ray within `(EPSILON, ray.t)` with their outward normals.
    fn hits(&self, ray: &Ray) -> Vec<(f64, Vec3d)> {
        let mut hits = Vec::new();
        match *self {
            Self::None => {}
            Self::Plane { p, n } => {
                let denom = n.dot(ray.d);
                if denom != 0.0 {
                    let t = (p - ray.p).dot(n) / denom;
                    hits.push((t, n));
                }
            }
            Self::Sphere { center, radius } => {
                let oc = ray.p - center;
                let b = oc.dot(ray.d);
                let c = oc.length_squared() - radius * radius;
                let disc = b * b - c;
                if disc >= 0.0 {
                    let root = disc.sqrt();
                    for t in [-b - root, -b + root] {
                        hits.push((t, (ray.at(t) - center) / radius));
                    }
                }
            }
        }
        hits.retain(|(t, _)| *t > EPSILON && *t < ray.t);
        hits
    }
}

pub struct TestObject {
    pub shape: Shape,
    pub shader: i32,
    pub flags: ObjectFlag,
    pub visibility: PathRayFlag,
    pub step_size: f64,
}

/// Point light with an intensity of `strength` watts per steradian times `4 pi`.
#[derive(Clone, Copy, Debug)]
pub struct TestLight {
    pub p: Vec3d,
    pub strength: Spectrum,
    pub cast_shadow: bool,
    pub exclude: ShaderExclude,
}

/// Spherical lamp that bounce rays can hit, with uniform `radiance`.
#[derive(Clone, Copy, Debug)]
pub struct TestLamp {
    pub center: Vec3d,
    pub radius: f64,
    pub radiance: Spectrum,
    /// Density reported for sampling it, only used for MIS
    pub pdf: f64,
    pub exclude: ShaderExclude,
}

/// Distant light covering the directions within `cos_angle` of `d`.
#[derive(Clone, Copy, Debug)]
pub struct TestSun {
    pub d: Vec3d,
    pub cos_angle: f64,
    pub radiance: Spectrum,
    pub pdf: f64,
}

#[derive(Default)]
pub struct TestScene {
    pub objects: Vec<TestObject>,
    pub shaders: Vec<TestShader>,
    /// Uniform background emission
    pub background: Option<Spectrum>,
    pub light: Option<TestLight>,
    pub lamp: Option<TestLamp>,
    pub sun: Option<TestSun>,
    /// Density reported for sampling the background
    pub background_pdf: f64,
    /// Hand out every shadow and volume hit furthest first, ignoring `max_hits`
    pub record_all_hits: bool,
}

impl TestScene {
    pub fn add_shader(&mut self, shader: TestShader) -> i32 {
        self.shaders.push(shader);
        self.shaders.len() as i32 - 1
    }

    pub fn add_object(&mut self, shape: Shape, shader: i32) -> i32 {
        let mut flags = ObjectFlag::empty();
        if self.shader_flags(shader).contains(ShaderFlag::HAS_VOLUME) {
            flags |= ObjectFlag::HAS_VOLUME;
        }
        self.objects.push(TestObject {
            shape,
            shader,
            flags,
            visibility: PathRayFlag::ALL_VISIBILITY,
            step_size: 1.0,
        });
        self.objects.len() as i32 - 1
    }

    /// Object that is never hit, only used through the volume stack.
    pub fn add_volume_object(&mut self, step_size: f64, flags: ObjectFlag) -> i32 {
        self.objects.push(TestObject {
            shape: Shape::None,
            shader: SHADER_NONE,
            flags: flags | ObjectFlag::HAS_VOLUME,
            visibility: PathRayFlag::empty(),
            step_size,
        });
        self.objects.len() as i32 - 1
    }

    fn object(&self, object: i32) -> Option<&TestObject> {
        usize::try_from(object).ok().and_then(|i| self.objects.get(i))
    }

    fn shader(&self, shader: i32) -> Option<&TestShader> {
        usize::try_from(shader).ok().and_then(|i| self.shaders.get(i))
    }

    /// Every hit along the ray on objects accepted by `filter`, sorted by distance.
    fn all_hits(
        &self,
        ray: &Ray,
        filter: impl Fn(i32, &TestObject) -> bool,
    ) -> Vec<(Intersection, Vec3d)> {
        let mut hits: Vec<_> = self
            .objects
            .iter()
            .enumerate()
            .filter(|(index, object)| filter(*index as i32, object))
            .flat_map(|(index, object)| {
                object.shape.hits(ray).into_iter().map(move |(t, ng)| {
                    (
                        Intersection {
                            t,
                            u: 0.0,
                            v: 0.0,
                            prim: index as i32,
                            object: index as i32,
                            kind: PrimitiveKind::Triangle,
                        },
                        ng,
                    )
                })
            })
            .collect();
        hits.sort_by(|a, b| a.0.t.total_cmp(&b.0.t));
        hits
    }

    fn outward_normal(&self, ray: &Ray, isect: &Intersection) -> Vec3d {
        let p = ray.at(isect.t);
        match self.object(isect.object).map(|o| o.shape) {
            Some(Shape::Plane { n, .. }) => n,
            Some(Shape::Sphere { center, radius }) => (p - center) / radius,
            _ => -ray.d,
        }
    }
}

impl SceneIntersect for TestScene {
    fn intersect(&self, ray: &Ray, visibility: PathRayFlag) -> Option<Intersection> {
        self.all_hits(ray, |_, o| o.visibility.intersects(visibility))
            .first()
            .map(|(isect, _)| *isect)
    }

    fn intersect_lights(&self, ray: &Ray, _path_flag: PathRayFlag) -> Option<Intersection> {
        let lamp = self.lamp?;
        let shape = Shape::Sphere {
            center: lamp.center,
            radius: lamp.radius,
        };
        let (t, _) = *shape.hits(ray).first()?;
        Some(Intersection {
            t,
            kind: PrimitiveKind::Light,
            ..Intersection::default()
        })
    }

    fn intersect_shadow_all(
        &self,
        ray: &Ray,
        visibility: PathRayFlag,
        max_hits: usize,
        hits: &mut Vec<Intersection>,
    ) -> ShadowHits {
        hits.clear();
        let mut num_hits = 0;
        for (isect, _) in self.all_hits(ray, |_, o| o.visibility.intersects(visibility)) {
            if !self
                .intersection_shader_flags(&isect)
                .intersects(ShaderFlag::HAS_TRANSPARENT_SHADOW | ShaderFlag::HAS_ONLY_VOLUME)
            {
                return ShadowHits {
                    opaque: true,
                    num_hits,
                };
            }
            if self.record_all_hits || hits.len() < max_hits {
                hits.push(isect);
            }
            num_hits += 1;
        }
        // hand them out unsorted, the integrator sorts
        hits.reverse();
        ShadowHits {
            opaque: false,
            num_hits,
        }
    }

    fn intersect_volume_all(
        &self,
        ray: &Ray,
        _visibility: PathRayFlag,
        max_hits: usize,
        hits: &mut Vec<Intersection>,
    ) {
        hits.clear();
        hits.extend(
            self.all_hits(ray, |_, o| o.flags.contains(ObjectFlag::HAS_VOLUME))
                .into_iter()
                .map(|(isect, _)| isect)
                .take(if self.record_all_hits {
                    usize::MAX
                } else {
                    max_hits
                }),
        );
        hits.reverse();
    }

    fn intersect_local(
        &self,
        ray: &Ray,
        object: i32,
        max_hits: usize,
        lcg_state: &mut u32,
        hits: &mut Vec<LocalHit>,
    ) -> usize {
        hits.clear();
        let mut num_hits = 0;
        for (isect, ng) in self.all_hits(ray, |index, _| index == object) {
            num_hits += 1;
            let hit = LocalHit { isect, ng };
            if hits.len() < max_hits {
                hits.push(hit);
            } else {
                let slot = lcg_step_uint(lcg_state) as usize % num_hits;
                if slot < max_hits {
                    hits[slot] = hit;
                }
            }
        }
        num_hits
    }

    fn shader_setup_from_ray(&self, sd: &mut ShaderData, ray: &Ray, isect: &Intersection) {
        let mut ng = self.outward_normal(ray, isect);
        sd.p = ray.at(isect.t);
        sd.i = -ray.d;
        sd.object = isect.object;
        sd.prim = isect.prim;
        sd.shader = self.object(isect.object).map_or(SHADER_NONE, |o| o.shader);
        sd.object_flag = self
            .object(isect.object)
            .map_or(ObjectFlag::empty(), |o| o.flags);
        sd.flag = self.shader_flags(sd.shader);
        sd.ray_length = isect.t;
        if ng.dot(ray.d) > 0.0 {
            ng = -ng;
            sd.flag |= ShaderFlag::BACKFACING;
        }
        sd.ng = ng;
        sd.n = ng;
    }

    fn intersection_shader_flags(&self, isect: &Intersection) -> ShaderFlag {
        self.object(isect.object)
            .map_or(ShaderFlag::empty(), |o| self.shader_flags(o.shader))
    }

    fn shader_flags(&self, shader: i32) -> ShaderFlag {
        self.shader(shader).map_or(ShaderFlag::empty(), |s| s.flags)
    }

    fn object_flags(&self, object: i32) -> ObjectFlag {
        self.object(object).map_or(ObjectFlag::empty(), |o| o.flags)
    }

    fn object_volume_step_size(&self, object: i32) -> f64 {
        self.object(object).map_or(f64::MAX, |o| o.step_size)
    }
}

impl ShaderEval for TestScene {
    fn eval_surface(&self, sd: &mut ShaderData, path_flag: PathRayFlag) {
        if let Some(shader) = self.shader(sd.shader) {
            (shader.surface)(sd, path_flag);
        }
    }

    fn eval_volume(&self, sd: &mut ShaderData, path_flag: PathRayFlag) {
        if let Some(shader) = self.shader(sd.shader) {
            (shader.volume)(sd, path_flag);
        }
    }

    fn eval_background(&self, sd: &mut ShaderData, _path_flag: PathRayFlag) {
        if let Some(background) = self.background {
            sd.add_background(background);
        }
    }
}

impl LightSampler for TestScene {
    fn sample_light(
        &self,
        p: Vec3d,
        _u: f64,
        _v: f64,
        _bounce: u32,
        _path_flag: PathRayFlag,
    ) -> Option<LightSample> {
        let light = self.light?;
        let to_light = light.p - p;
        let t = to_light.length();
        if t == 0.0 {
            return None;
        }
        let d = to_light / t;
        Some(LightSample {
            p: light.p,
            ng: -d,
            d,
            t,
            pdf: t * t,
            eval_fac: 0.25 * consts::FRAC_1_PI,
            object: OBJECT_NONE,
            lamp: 0,
            kind: LightKind::Point,
            exclude: light.exclude,
            use_mis: false,
            cast_shadow: light.cast_shadow,
            ..LightSample::default()
        })
    }

    fn light_from_intersection(&self, ray: &Ray, isect: &Intersection) -> Option<LightSample> {
        let lamp = self.lamp?;
        let p = ray.at(isect.t);
        Some(LightSample {
            p,
            ng: (p - lamp.center) / lamp.radius,
            d: ray.d,
            t: isect.t,
            pdf: lamp.pdf,
            lamp: 1,
            kind: LightKind::Area,
            exclude: lamp.exclude,
            ..LightSample::default()
        })
    }

    fn distant_lights_from_ray(&self, d: Vec3d, lights: &mut Vec<LightSample>) {
        if let Some(sun) = self.sun {
            if d.dot(sun.d) >= sun.cos_angle {
                lights.push(LightSample {
                    d,
                    t: crate::RAY_T_MAX,
                    pdf: sun.pdf,
                    lamp: 2,
                    kind: LightKind::Distant,
                    ..LightSample::default()
                });
            }
        }
    }

    fn eval_light(&self, ls: &LightSample) -> Spectrum {
        match (ls.kind, self.light) {
            (LightKind::Background, _) => self.background.unwrap_or(Spectrum::ZERO),
            (LightKind::Area, _) => self
                .lamp
                .map_or(Spectrum::ZERO, |lamp| lamp.radiance * ls.eval_fac),
            (LightKind::Distant, _) => self
                .sun
                .map_or(Spectrum::ZERO, |sun| sun.radiance * ls.eval_fac),
            (_, Some(light)) if ls.lamp == 0 => light.strength * ls.eval_fac,
            _ => Spectrum::ZERO,
        }
    }

    fn background_light_pdf(&self, _p: Vec3d, _d: Vec3d) -> f64 {
        self.background_pdf
    }
}
