// Renders a few spheres through the megakernel and writes `image.png`.
//
// An optional argument names a JSON file with kernel settings, e.g. `{"integrator":
// {"max_bounce": 4}}`. `RUST_LOG=pathkernel=debug` shows why paths end.
use std::{error::Error, f64::consts, path::Path};

use pathkernel::{
    closure::{
        beckmann::BeckmannTable, bssrdf::Bssrdf, diffuse::Diffuse, microfacet::Microfacet,
        reflection::Reflection, refraction::Refraction, Closure,
    },
    integrator::{render_sample, IntegratorState},
    scene::{
        Camera, Intersection, LightKind, LightSample, LightSampler, LocalHit, SceneIntersect,
        ShaderEval, ShadowHits,
    },
    shader::{ObjectFlag, ShaderData, ShaderFlag},
    utils::fresnel_dielectric_cos,
    Film, KernelData, KernelGlobals, Passes, PathRayFlag, Ray, Spectrum, Vec2d, Vec3d,
};
use rayon::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

const EPSILON: f64 = 1e-7;

#[derive(Copy, Clone)]
enum Material {
    Diffuse(Spectrum),
    Glossy(Spectrum, f64),
    Glass(f64),
    /// albedo and mean free path
    Skin(Spectrum, Spectrum),
    Emission(Spectrum),
    /// scattering density of a volume without a surface
    Fog(Spectrum),
}

#[derive(Copy, Clone)]
struct Sphere {
    center: Vec3d,
    radius: f64,
    material: Material,
}

impl Sphere {
    // both roots inside the ray
    fn hits(&self, ray: &Ray) -> impl Iterator<Item = f64> {
        let oc = ray.p - self.center;
        let b = oc.dot(ray.d);
        let c = oc.length_squared() - self.radius * self.radius;
        let disc = b * b - c;
        let roots = if disc < 0.0 {
            [f64::NAN; 2]
        } else {
            let root = disc.sqrt();
            [-b - root, -b + root]
        };
        let t_max = ray.t;
        roots.into_iter().filter(move |t| *t > EPSILON && *t < t_max)
    }

    const fn is_fog(&self) -> bool {
        matches!(self.material, Material::Fog(_))
    }
}

struct World {
    spheres: Vec<Sphere>,
    light_p: Vec3d,
    light_strength: Spectrum,
}

impl World {
    fn sphere(&self, index: i32) -> Option<&Sphere> {
        usize::try_from(index).ok().and_then(|i| self.spheres.get(i))
    }

    /// All hits on spheres accepted by `filter`, nearest first.
    fn all_hits(&self, ray: &Ray, filter: impl Fn(&Sphere) -> bool) -> Vec<Intersection> {
        let mut hits: Vec<_> = self
            .spheres
            .iter()
            .zip(0..)
            .filter(|(sphere, _)| filter(sphere))
            .flat_map(|(sphere, index)| {
                sphere.hits(ray).map(move |t| Intersection {
                    t,
                    prim: index,
                    object: index,
                    ..Intersection::default()
                })
            })
            .collect();
        hits.sort_by(|a, b| a.t.total_cmp(&b.t));
        hits
    }
}

impl SceneIntersect for World {
    fn intersect(&self, ray: &Ray, _visibility: PathRayFlag) -> Option<Intersection> {
        self.all_hits(ray, |_| true).first().copied()
    }

    fn intersect_shadow_all(
        &self,
        ray: &Ray,
        _visibility: PathRayFlag,
        max_hits: usize,
        hits: &mut Vec<Intersection>,
    ) -> ShadowHits {
        hits.clear();
        let mut num_hits = 0;
        for isect in self.all_hits(ray, |_| true) {
            if !self.sphere(isect.object).is_some_and(Sphere::is_fog) {
                return ShadowHits {
                    opaque: true,
                    num_hits,
                };
            }
            if hits.len() < max_hits {
                hits.push(isect);
            }
            num_hits += 1;
        }
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
        hits.extend(self.all_hits(ray, Sphere::is_fog).into_iter().take(max_hits));
    }

    fn intersect_local(
        &self,
        ray: &Ray,
        object: i32,
        max_hits: usize,
        _lcg_state: &mut u32,
        hits: &mut Vec<LocalHit>,
    ) -> usize {
        hits.clear();
        let Some(sphere) = self.sphere(object) else {
            return 0;
        };
        // a sphere is hit at most twice, no reservoir sampling needed
        for t in sphere.hits(ray).take(max_hits) {
            hits.push(LocalHit {
                isect: Intersection {
                    t,
                    prim: object,
                    object,
                    ..Intersection::default()
                },
                ng: (ray.at(t) - sphere.center) / sphere.radius,
            });
        }
        hits.len()
    }

    fn shader_setup_from_ray(&self, sd: &mut ShaderData, ray: &Ray, isect: &Intersection) {
        sd.p = ray.at(isect.t);
        sd.i = -ray.d;
        sd.object = isect.object;
        sd.prim = isect.prim;
        sd.shader = isect.object;
        sd.object_flag = self.object_flags(isect.object);
        sd.flag = self.shader_flags(sd.shader);
        sd.ray_length = isect.t;
        let mut ng = self
            .sphere(isect.object)
            .map_or(-ray.d, |s| (sd.p - s.center) / s.radius);
        if ng.dot(ray.d) > 0.0 {
            ng = -ng;
            sd.flag |= ShaderFlag::BACKFACING;
        }
        sd.ng = ng;
        sd.n = ng;
    }

    fn intersection_shader_flags(&self, isect: &Intersection) -> ShaderFlag {
        self.shader_flags(isect.object)
    }

    fn shader_flags(&self, shader: i32) -> ShaderFlag {
        match self.sphere(shader).map(|s| s.material) {
            Some(Material::Fog(_)) => ShaderFlag::HAS_VOLUME | ShaderFlag::HAS_ONLY_VOLUME,
            _ => ShaderFlag::empty(),
        }
    }

    fn object_flags(&self, object: i32) -> ObjectFlag {
        match self.sphere(object).map(|s| s.material) {
            Some(Material::Fog(_)) => ObjectFlag::HAS_VOLUME,
            _ => ObjectFlag::empty(),
        }
    }

    fn object_volume_step_size(&self, _object: i32) -> f64 {
        0.05
    }
}

impl ShaderEval for World {
    fn eval_surface(&self, sd: &mut ShaderData, path_flag: PathRayFlag) {
        let Some(sphere) = self.sphere(sd.shader) else {
            return;
        };
        let n = sd.n;
        match sphere.material {
            Material::Diffuse(color) => {
                sd.add_bsdf(n, color, Closure::Diffuse(Diffuse));
            }
            Material::Glossy(color, roughness) => {
                sd.add_bsdf(n, color * 0.8, Closure::Diffuse(Diffuse));
                let alpha = roughness * roughness;
                sd.add_bsdf(n, Spectrum::splat(0.2), Closure::Microfacet(Microfacet::ggx(alpha)));
            }
            Material::Glass(ior) => {
                let eta = if sd.flag.contains(ShaderFlag::BACKFACING) {
                    1.0 / ior
                } else {
                    ior
                };
                let fresnel = fresnel_dielectric_cos(n.dot(sd.i), eta);
                sd.add_bsdf(n, Spectrum::splat(fresnel), Closure::Reflection(Reflection));
                let transmitted = Spectrum::splat(1.0 - fresnel);
                sd.add_bsdf(n, transmitted, Closure::Refraction(Refraction::new(eta)));
            }
            Material::Skin(albedo, radius) => {
                let bssrdf = Bssrdf::new(radius, albedo, None, 1.4);
                sd.add_bssrdf(n, albedo, bssrdf, path_flag);
            }
            Material::Emission(strength) => sd.add_emission(strength),
            Material::Fog(_) => sd.add_transparent(Spectrum::ONE, path_flag),
        }
    }

    fn eval_volume(&self, sd: &mut ShaderData, _path_flag: PathRayFlag) {
        if let Some(Material::Fog(density)) = self.sphere(sd.object).map(|s| s.material) {
            sd.add_volume_scatter(density, 0.3);
            sd.add_volume_absorption(density * 0.1);
        }
    }

    fn eval_background(&self, sd: &mut ShaderData, _path_flag: PathRayFlag) {
        let d = -sd.i;
        let a = 0.5 * (d.z + 1.0);
        sd.add_background(Spectrum::ONE.lerp(Spectrum::new(0.5, 0.7, 1.0), a) * 0.5);
    }
}

impl LightSampler for World {
    fn sample_light(
        &self,
        p: Vec3d,
        _u: f64,
        _v: f64,
        _bounce: u32,
        _path_flag: PathRayFlag,
    ) -> Option<LightSample> {
        let to_light = self.light_p - p;
        let t = to_light.length();
        if t == 0.0 {
            return None;
        }
        let d = to_light / t;
        Some(LightSample {
            p: self.light_p,
            ng: -d,
            d,
            t,
            pdf: t * t,
            eval_fac: 0.25 * consts::FRAC_1_PI,
            lamp: 0,
            kind: LightKind::Point,
            use_mis: false,
            ..LightSample::default()
        })
    }

    fn eval_light(&self, ls: &LightSample) -> Spectrum {
        if ls.lamp == 0 {
            self.light_strength * ls.eval_fac
        } else {
            Spectrum::ZERO
        }
    }
}

struct Pinhole {
    center: Vec3d,
    forward: Vec3d,
    right: Vec3d,
    up: Vec3d,
    width: u32,
    height: u32,
}

impl Pinhole {
    fn new(center: Vec3d, target: Vec3d, focal_length: f64, (width, height): (u32, u32)) -> Self {
        let forward = (target - center).normalize();
        // keeps the image undistorted for any aspect ratio
        let right = forward.cross(Vec3d::Z).normalize() * f64::from(width) / f64::from(height);
        let up = -right.cross(forward).normalize();
        Self {
            center,
            forward: forward * focal_length,
            right,
            up,
            width,
            height,
        }
    }
}

impl Camera for Pinhole {
    fn generate_ray(&self, x: u32, y: u32, filter: Vec2d, _lens: Vec2d, _time: f64) -> Option<Ray> {
        let u = (f64::from(x) + filter.x) / f64::from(self.width) * 2.0 - 1.0;
        let v = (f64::from(y) + filter.y) / f64::from(self.height) * 2.0 - 1.0;
        let d = (self.forward + self.right * u + self.up * v).normalize();
        Some(Ray::new(self.center, d, f64::MAX))
    }
}

fn load_kernel_data() -> Result<KernelData, Box<dyn Error>> {
    let mut data = match std::env::args().nth(1) {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => KernelData::default(),
    };
    data.validate()?;
    Ok(data)
}

fn save_image(path: &Path, buffer: &[u8], width: u32, height: u32) -> Result<(), Box<dyn Error>> {
    let file = std::fs::File::create(path)?;
    let mut writer = std::io::BufWriter::new(file);

    let mut encoder = png::Encoder::new(&mut writer, width, height);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_source_gamma(png::ScaledFloat::new(1.0 / 2.2));
    let mut writer = encoder.write_header()?;
    writer.write_image_data(buffer)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let sphere = |x, y, z, radius, material| Sphere {
        center: Vec3d::new(x, y, z),
        radius,
        material,
    };
    let world = World {
        spheres: vec![
            sphere(0.0, 0.0, -1000.0, 1000.0, Material::Diffuse(Spectrum::splat(0.5))),
            sphere(0.6, 0.0, 0.5, 0.5, Material::Glossy(Spectrum::new(0.8, 0.4, 0.1), 0.3)),
            sphere(-0.3, -0.8, 0.3, 0.3, Material::Emission(Spectrum::new(7.0, 7.0, 10.0))),
            sphere(0.2, -1.3, 0.2, 0.2, Material::Glass(1.45)),
            sphere(
                -1.3,
                0.0,
                0.3,
                0.3,
                Material::Skin(Spectrum::new(0.9, 0.6, 0.5), Spectrum::new(0.1, 0.05, 0.02)),
            ),
            sphere(-0.6, 0.8, 0.6, 0.6, Material::Fog(Spectrum::splat(1.5))),
        ],
        light_p: Vec3d::new(2.0, -2.0, 4.0),
        light_strength: Spectrum::splat(800.0),
    };

    let data = load_kernel_data()?;
    let table = BeckmannTable::new();
    let kg = KernelGlobals::new(&data, &world, Some(&table));

    let (width, height) = (960, 540);
    let num_samples = 64;
    let camera = Pinhole::new(
        Vec3d::new(0.0, -5.0, 1.0),
        Vec3d::new(0.0, 0.0, 0.5),
        4.0,
        (width, height),
    );
    let film = Film::new(width, height, Passes::empty());

    (0..height).into_par_iter().for_each(|y| {
        let mut state = IntegratorState::new(data.volume_stack_size, data.shadow_isect_size);
        for x in 0..width {
            for sample in 0..num_samples {
                render_sample(&kg, &camera, &film, &mut state, (x, y), sample);
            }
        }
    });
    info!(width, height, num_samples, "render finished");

    let mut image = Vec::with_capacity(3 * width as usize * height as usize);
    // rows go bottom to top in the film
    for y in (0..height).rev() {
        for x in 0..width {
            let color = film.read(x, y, Passes::COMBINED) / f64::from(num_samples);
            for c in color.to_array() {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                image.push((c * 255.0).clamp(0.0, 255.0) as u8);
            }
        }
    }
    save_image(Path::new("image.png"), &image, width, height)
}
