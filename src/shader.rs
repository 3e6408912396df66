//! Shading points and the aggregate queries over their closures.
//!
//! A [`ShaderData`] is filled by the scene's shader evaluation through the `add_*` builders and
//! consumed by the integrator through one-sample MIS evaluation and sampling.
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{
    closure::{
        beckmann::BeckmannSampling,
        bssrdf::{Bssrdf, BSSRDF_MIN_RADIUS},
        diffuse::Diffuse,
        principled_diffuse::{DiffuseComponents, PrincipledDiffuse},
        transparent::Transparent,
        volume::HenyeyGreenstein,
        Closure, ShaderClosure, CLOSURE_WEIGHT_CUTOFF,
    },
    utils::{safe_divide_spectrum, VecExt},
    BsdfEval, BsdfSample, ClosureLabel, PathRayFlag, Ray, Spectrum, Vec3d, OBJECT_NONE,
    SHADER_NONE,
};

/// Static upper bound of closures per shading point.
pub const MAX_CLOSURE: usize = 64;
/// Upper bound of distinct phase functions kept for a volume scatter event.
pub const MAX_VOLUME_CLOSURE: usize = 8;
/// Primitive index meaning "no primitive".
pub const PRIM_NONE: i32 = -1;

bitflags! {
    /// Properties of a shading point. The closure part is rebuilt on every evaluation, the
    /// shader part is static per shader and comes from the scene.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct ShaderFlag: u32 {
        // closure flags
        const BSDF = 1 << 0;
        const BSDF_HAS_EVAL = 1 << 1;
        const BSDF_HAS_TRANSMISSION = 1 << 2;
        const BSSRDF = 1 << 3;
        const HOLDOUT = 1 << 4;
        const EXTINCTION = 1 << 5;
        const SCATTER = 1 << 6;
        const EMISSION = 1 << 7;
        const TRANSPARENT = 1 << 8;
        const AO = 1 << 9;

        // geometry
        const BACKFACING = 1 << 12;

        // shader flags
        const USE_MIS = 1 << 16;
        const HAS_TRANSPARENT_SHADOW = 1 << 17;
        const HAS_VOLUME = 1 << 18;
        const HAS_ONLY_VOLUME = 1 << 19;
        const HETEROGENEOUS_VOLUME = 1 << 20;
        const HAS_BSSRDF_BUMP = 1 << 21;
        const VOLUME_EQUIANGULAR = 1 << 22;
        const VOLUME_MIS = 1 << 23;
        const HAS_EMISSION = 1 << 24;
        const NEED_VOLUME_ATTRIBUTES = 1 << 25;
        const HAS_RAYTRACE = 1 << 26;

        const CLOSURE_FLAGS = Self::BSDF.bits()
            | Self::BSDF_HAS_EVAL.bits()
            | Self::BSDF_HAS_TRANSMISSION.bits()
            | Self::BSSRDF.bits()
            | Self::HOLDOUT.bits()
            | Self::EXTINCTION.bits()
            | Self::SCATTER.bits()
            | Self::EMISSION.bits()
            | Self::TRANSPARENT.bits()
            | Self::AO.bits();

        const SHADER_FLAGS = Self::USE_MIS.bits()
            | Self::HAS_TRANSPARENT_SHADOW.bits()
            | Self::HAS_VOLUME.bits()
            | Self::HAS_ONLY_VOLUME.bits()
            | Self::HETEROGENEOUS_VOLUME.bits()
            | Self::HAS_BSSRDF_BUMP.bits()
            | Self::VOLUME_EQUIANGULAR.bits()
            | Self::VOLUME_MIS.bits()
            | Self::HAS_EMISSION.bits()
            | Self::NEED_VOLUME_ATTRIBUTES.bits()
            | Self::HAS_RAYTRACE.bits();
    }
}

bitflags! {
    /// Per object properties.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct ObjectFlag: u32 {
        const HOLDOUT_MASK = 1 << 0;
        const HAS_VOLUME = 1 << 1;
        const HAS_VOLUME_ATTRIBUTES = 1 << 2;
        const INTERSECTS_VOLUME = 1 << 3;
    }
}

bitflags! {
    /// Light visibility settings. A light excluded for a ray type neither contributes to nor is
    /// evaluated against the closures of that type.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ShaderExclude: u32 {
        const DIFFUSE = 1 << 0;
        const GLOSSY = 1 << 1;
        const TRANSMIT = 1 << 2;
        const CAMERA = 1 << 3;
        const SCATTER = 1 << 4;
    }
}

impl ShaderExclude {
    /// Whether a closure of type `ty` is hidden from this light.
    #[must_use]
    pub fn excludes_closure(self, ty: crate::closure::ClosureType) -> bool {
        (self.contains(Self::DIFFUSE) && ty.is_bsdf_diffuse())
            || (self.contains(Self::GLOSSY) && ty.is_bsdf_glossy())
            || (self.contains(Self::TRANSMIT) && ty.is_bsdf_transmission())
    }

    /// Whether a path with `path_flag` does not see the light.
    #[must_use]
    pub fn excludes_path(self, path_flag: PathRayFlag) -> bool {
        let glossy_reflect = PathRayFlag::GLOSSY | PathRayFlag::REFLECT;
        (self.contains(Self::DIFFUSE) && path_flag.contains(PathRayFlag::DIFFUSE))
            || (self.contains(Self::GLOSSY) && path_flag.contains(glossy_reflect))
            || (self.contains(Self::TRANSMIT) && path_flag.contains(PathRayFlag::TRANSMIT))
            || (self.contains(Self::CAMERA) && path_flag.contains(PathRayFlag::CAMERA))
            || (self.contains(Self::SCATTER) && path_flag.contains(PathRayFlag::VOLUME_SCATTER))
    }
}

/// Closures of a shading point with a fixed capacity.
///
/// Up to [`MAX_CLOSURE`] closures are stored inline, a shading point never allocates. Closures
/// that do not fit are dropped, entries already stored are never touched by a failed push.
#[derive(Clone, Debug, Default)]
pub struct ClosureArray {
    closures: SmallVec<[ShaderClosure; MAX_CLOSURE]>,
    capacity: usize,
}

impl ClosureArray {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(MAX_CLOSURE);
        Self {
            closures: SmallVec::new(),
            capacity,
        }
    }

    /// Removes all closures and sets how many may be added.
    pub fn reset(&mut self, capacity: usize) {
        self.closures.clear();
        self.capacity = capacity.min(MAX_CLOSURE);
    }

    /// Number of closures that can still be added
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.closures.len())
    }

    /// Makes room for exactly `n` more closures.
    pub fn set_remaining(&mut self, n: usize) {
        self.capacity = (self.closures.len() + n).min(MAX_CLOSURE);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.closures.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.closures.is_empty()
    }

    pub fn push(&mut self, sc: ShaderClosure) -> Option<&mut ShaderClosure> {
        if self.remaining() == 0 {
            return None;
        }
        self.closures.push(sc);
        self.closures.last_mut()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ShaderClosure> {
        self.closures.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, ShaderClosure> {
        self.closures.iter_mut()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ShaderClosure> {
        self.closures.get(index)
    }

    pub fn retain(&mut self, mut f: impl FnMut(&ShaderClosure) -> bool) {
        self.closures.retain(|sc| f(&*sc));
    }

    pub(crate) fn remove(&mut self, index: usize) -> ShaderClosure {
        self.closures.remove(index)
    }
}

impl<'a> IntoIterator for &'a ClosureArray {
    type Item = &'a ShaderClosure;
    type IntoIter = std::slice::Iter<'a, ShaderClosure>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Everything known about a point being shaded.
#[derive(Clone, Debug)]
pub struct ShaderData {
    /// Position
    pub p: Vec3d,
    /// Smooth shading normal, facing the viewer
    pub n: Vec3d,
    /// Geometric normal, facing the viewer
    pub ng: Vec3d,
    /// Direction towards the viewer
    pub i: Vec3d,
    pub flag: ShaderFlag,
    pub object_flag: ObjectFlag,
    pub object: i32,
    pub prim: i32,
    pub shader: i32,
    /// Distance the incoming ray travelled to reach this point
    pub ray_length: f64,
    pub closures: ClosureArray,
    /// Sum of the transparent closure weights on surfaces, the extinction coefficient in volumes.
    pub closure_transparent_extinction: Spectrum,
    pub closure_emission_background: Spectrum,
}

impl Default for ShaderData {
    fn default() -> Self {
        Self::new(MAX_CLOSURE)
    }
}

impl ShaderData {
    #[must_use]
    pub fn new(max_closures: usize) -> Self {
        Self {
            p: Vec3d::ZERO,
            n: Vec3d::Z,
            ng: Vec3d::Z,
            i: Vec3d::Z,
            flag: ShaderFlag::empty(),
            object_flag: ObjectFlag::empty(),
            object: OBJECT_NONE,
            prim: PRIM_NONE,
            shader: SHADER_NONE,
            ray_length: 0.0,
            closures: ClosureArray::new(max_closures),
            closure_transparent_extinction: Spectrum::ZERO,
            closure_emission_background: Spectrum::ZERO,
        }
    }

    /// Clears the closure state before a shader evaluation. Terminated, shadow and emission
    /// paths only need the aggregate weights, they get no closure storage at all.
    pub fn reset_closures(&mut self, max_closures: usize, path_flag: PathRayFlag) {
        let terminated = path_flag.intersects(
            PathRayFlag::TERMINATE | PathRayFlag::SHADOW | PathRayFlag::EMISSION,
        );
        self.closures
            .reset(if terminated { 0 } else { max_closures });
        self.flag &= !ShaderFlag::CLOSURE_FLAGS;
        self.closure_transparent_extinction = Spectrum::ZERO;
        self.closure_emission_background = Spectrum::ZERO;
    }

    /// Shading point for a volume segment starting at the ray origin.
    pub fn setup_from_volume(&mut self, ray: &Ray) {
        self.p = ray.p;
        self.n = -ray.d;
        self.ng = -ray.d;
        self.i = -ray.d;
        self.shader = SHADER_NONE;
        self.flag = ShaderFlag::empty();
        self.object_flag = ObjectFlag::empty();
        self.ray_length = 0.0;
        self.object = OBJECT_NONE;
        self.prim = PRIM_NONE;
    }

    /// Shading point for the world seen along `d`.
    pub fn setup_from_background(&mut self, d: Vec3d, shader: i32) {
        self.p = d;
        self.n = -d;
        self.ng = -d;
        self.i = -d;
        self.shader = shader;
        self.flag = ShaderFlag::empty();
        self.object_flag = ObjectFlag::empty();
        self.object = OBJECT_NONE;
        self.prim = PRIM_NONE;
        self.ray_length = 0.0;
    }
}

/// Closure builders, called by shader evaluation.
impl ShaderData {
    /// Adds a scattering closure with shading normal `n`. Returns false when the weight is below
    /// the cutoff or the closure array is full.
    pub fn add_bsdf(&mut self, n: Vec3d, weight: Spectrum, closure: Closure) -> bool {
        let sc = ShaderClosure::new(n, weight, closure);
        // written so that a NaN weight is rejected as well
        if !(sc.sample_weight >= CLOSURE_WEIGHT_CUTOFF) {
            return false;
        }
        let i = self.i;
        match self.closures.push(sc) {
            Some(sc) => {
                self.flag |= sc.setup(i);
                true
            }
            None => false,
        }
    }

    /// Adds a subsurface closure. Channels with a radius too small to sample are moved into a
    /// diffuse closure, which is also where the whole weight goes when no channel is left.
    ///
    /// Paths that already bounced off a diffuse surface only ever see the diffuse closure, a
    /// path takes at most one subsurface bounce.
    pub fn add_bssrdf(
        &mut self,
        n: Vec3d,
        weight: Spectrum,
        mut bssrdf: Bssrdf,
        path_flag: PathRayFlag,
    ) {
        if !(weight.average().abs() >= CLOSURE_WEIGHT_CUTOFF) {
            return;
        }
        if path_flag.contains(PathRayFlag::DIFFUSE_ANCESTOR) {
            bssrdf.radius = Spectrum::ZERO;
        }
        if let Some(roughness) = bssrdf.roughness {
            let retro = Closure::PrincipledDiffuse(PrincipledDiffuse::new(
                roughness,
                DiffuseComponents::RETRO_REFLECTION,
            ));
            if self.add_bsdf(n, weight, retro) {
                // keep the retro-reflection from taking half the samples away from the bssrdf
                let fresnel = crate::utils::pow5((1.0 - n.dot(self.i)).clamp(0.0, 1.0));
                if let Some(sc) = self.closures.iter_mut().last() {
                    sc.sample_weight *= roughness * fresnel;
                }
            }
        }

        let mut weight = weight;
        let mut diffuse_weight = Spectrum::ZERO;
        let mut channels = 3;
        for c in 0..3 {
            if bssrdf.radius[c] < BSSRDF_MIN_RADIUS {
                diffuse_weight[c] = weight[c];
                weight[c] = 0.0;
                bssrdf.disable_channel(c);
                channels -= 1;
            }
        }

        if channels < 3 {
            let diffuse = match bssrdf.roughness {
                Some(roughness) => Closure::PrincipledDiffuse(PrincipledDiffuse::new(
                    roughness,
                    DiffuseComponents::LAMBERT,
                )),
                None => Closure::Diffuse(Diffuse),
            };
            self.add_bsdf(n, diffuse_weight, diffuse);
        }

        if channels == 0 {
            return;
        }
        let i = self.i;
        let mut sc = ShaderClosure::new(n, weight, Closure::Bssrdf(bssrdf));
        #[allow(clippy::cast_precision_loss)]
        {
            sc.sample_weight = weight.average().abs() * channels as f64;
        }
        if let Some(sc) = self.closures.push(sc) {
            self.flag |= sc.setup(i);
        }
    }

    /// Adds transparency. All transparent weight is merged into a single closure.
    pub fn add_transparent(&mut self, weight: Spectrum, path_flag: PathRayFlag) {
        let sample_weight = weight.average().abs();
        if !(sample_weight >= CLOSURE_WEIGHT_CUTOFF) {
            return;
        }

        if self.flag.contains(ShaderFlag::TRANSPARENT) {
            self.closure_transparent_extinction += weight;
            if let Some(sc) = self
                .closures
                .iter_mut()
                .find(|sc| sc.closure_type().is_bsdf_transparent())
            {
                sc.weight += weight;
                sc.sample_weight += sample_weight;
            }
            return;
        }

        self.flag |= ShaderFlag::BSDF | ShaderFlag::TRANSPARENT;
        self.closure_transparent_extinction = weight;

        // terminated paths have no closure storage but still need to continue through
        let terminated = path_flag.intersects(PathRayFlag::TERMINATE);
        if terminated {
            self.closures.set_remaining(1);
        }
        let n = self.n;
        let added = self
            .closures
            .push(ShaderClosure::new(n, weight, Closure::Transparent(Transparent)))
            .is_some();
        if !added && terminated {
            self.closures.set_remaining(0);
        }
    }

    pub fn add_emission(&mut self, weight: Spectrum) {
        if self.flag.contains(ShaderFlag::EMISSION) {
            self.closure_emission_background += weight;
        } else {
            self.flag |= ShaderFlag::EMISSION;
            self.closure_emission_background = weight;
        }
    }

    /// Background emission, shares storage with surface emission.
    pub fn add_background(&mut self, weight: Spectrum) {
        self.add_emission(weight);
    }

    pub fn add_holdout(&mut self, weight: Spectrum) {
        let n = self.n;
        if self
            .closures
            .push(ShaderClosure::new(n, weight, Closure::Holdout))
            .is_some()
        {
            self.flag |= ShaderFlag::HOLDOUT;
        }
    }

    /// Marks the shading point for ambient occlusion, `weight` scales the diffuse closures.
    pub fn add_ambient_occlusion(&mut self, weight: Spectrum) {
        let n = self.n;
        if self
            .closures
            .push(ShaderClosure::new(n, weight, Closure::AmbientOcclusion))
            .is_some()
        {
            self.flag |= ShaderFlag::AO;
        }
    }

    /// Volume absorption, only contributes to extinction.
    pub fn add_volume_absorption(&mut self, weight: Spectrum) {
        self.add_volume_extinction(weight);
    }

    /// Volume scattering with a Henyey-Greenstein phase, contributes to extinction as well.
    pub fn add_volume_scatter(&mut self, weight: Spectrum, g: f64) {
        let sc = ShaderClosure::new(
            -self.i,
            weight,
            Closure::HenyeyGreenstein(HenyeyGreenstein::new(g)),
        );
        if sc.sample_weight >= CLOSURE_WEIGHT_CUTOFF {
            let i = self.i;
            if let Some(sc) = self.closures.push(sc) {
                self.flag |= sc.setup(i);
            }
        }
        self.add_volume_extinction(weight);
    }

    fn add_volume_extinction(&mut self, weight: Spectrum) {
        if self.flag.contains(ShaderFlag::EXTINCTION) {
            self.closure_transparent_extinction += weight;
        } else {
            self.flag |= ShaderFlag::EXTINCTION;
            self.closure_transparent_extinction = weight;
        }
    }

    /// Merges phase closures with the same anisotropy, stacked volumes would run out of closure
    /// storage otherwise.
    pub fn merge_volume_closures(&mut self) {
        let mut i = 0;
        while i < self.closures.len() {
            let Some(&ShaderClosure {
                closure: Closure::HenyeyGreenstein(hg_i),
                ..
            }) = self.closures.get(i)
            else {
                i += 1;
                continue;
            };
            let mut j = i + 1;
            while j < self.closures.len() {
                let same = matches!(
                    self.closures.get(j),
                    Some(ShaderClosure { closure: Closure::HenyeyGreenstein(hg_j), .. })
                        if hg_j.g == hg_i.g
                );
                if same {
                    let merged = self.closures.remove(j);
                    if let Some(sc) = self.closures.iter_mut().nth(i) {
                        sc.weight += merged.weight;
                        sc.sample_weight += merged.sample_weight;
                    }
                } else {
                    j += 1;
                }
            }
            i += 1;
        }
    }
}

/// Aggregate queries, called by the integrator once the closures are in place.
impl ShaderData {
    /// Whether `omega_in` lies on the transmission side of the shading point.
    #[must_use]
    pub fn is_transmission(&self, omega_in: Vec3d) -> bool {
        self.n.dot(omega_in) < 0.0
    }

    fn bsdf_bssrdf_sample_weight_sum(&self) -> f64 {
        self.closures
            .iter()
            .filter(|sc| sc.closure_type().is_bsdf_or_bssrdf())
            .map(|sc| sc.sample_weight)
            .sum()
    }

    /// Adjusts the closures before they are sampled. At the first bounce every closure keeps at
    /// least an eighth of the total sample weight. Once the path became unlikely enough,
    /// everything is blurred by `filter_glossy`; `f64::MAX` disables it.
    pub fn prepare_surface_closures(
        &mut self,
        bounce: u32,
        transparent_bounce: u32,
        min_ray_pdf: f64,
        filter_glossy: f64,
    ) {
        if bounce + transparent_bounce == 0 && self.closures.len() > 1 {
            let sum = self.bsdf_bssrdf_sample_weight_sum();
            for sc in self.closures.iter_mut() {
                if sc.closure_type().is_bsdf_or_bssrdf() {
                    sc.sample_weight = sc.sample_weight.max(0.125 * sum);
                }
            }
        }

        #[allow(clippy::float_cmp)]
        if filter_glossy != f64::MAX {
            let blur_pdf = filter_glossy * min_ray_pdf;
            if blur_pdf < 1.0 {
                let blur_roughness = (1.0 - blur_pdf).sqrt() * 0.5;
                for sc in self.closures.iter_mut() {
                    if sc.closure_type().is_bsdf() {
                        sc.blur(blur_roughness);
                    }
                }
            }
        }
    }

    /// One-sample MIS over all closures but `skip`. Adds into `eval` and returns the combined
    /// pdf, the per closure pdfs weighted by their selection probability.
    fn bsdf_multi_eval(
        &self,
        omega_in: Vec3d,
        skip: Option<usize>,
        eval: &mut BsdfEval,
        mut sum_pdf: f64,
        mut sum_sample_weight: f64,
        exclude: ShaderExclude,
    ) -> f64 {
        for (index, sc) in self.closures.iter().enumerate() {
            if Some(index) == skip {
                continue;
            }
            let ty = sc.closure_type();
            if !ty.is_bsdf_or_bssrdf() {
                continue;
            }
            if ty.is_bsdf() && !exclude.excludes_closure(ty) {
                let (value, pdf) = sc.eval(self.n, self.i, omega_in);
                if pdf != 0.0 {
                    eval.accum(ty.is_bsdf_diffuse(), value * sc.weight);
                    sum_pdf += pdf * sc.sample_weight;
                }
            }
            sum_sample_weight += sc.sample_weight;
        }
        if sum_sample_weight > 0.0 {
            sum_pdf / sum_sample_weight
        } else {
            0.0
        }
    }

    /// Evaluates all closures for light arriving from `omega_in`, skipping the closures hidden
    /// from the light by `exclude`.
    #[must_use]
    pub fn bsdf_eval(&self, omega_in: Vec3d, exclude: ShaderExclude) -> (BsdfEval, f64) {
        let mut eval = BsdfEval::default();
        let pdf = self.bsdf_multi_eval(omega_in, None, &mut eval, 0.0, 0.0, exclude);
        (eval, pdf)
    }

    /// Picks a scattering or subsurface closure proportional to the sample weights and rescales
    /// `randu` so it can be reused for sampling the picked closure.
    #[must_use]
    pub fn bsdf_bssrdf_pick(&self, randu: &mut f64) -> Option<usize> {
        if self.closures.len() <= 1 {
            return self
                .closures
                .get(0)
                .filter(|sc| sc.closure_type().is_bsdf_or_bssrdf())
                .map(|_| 0);
        }
        let sum = self.bsdf_bssrdf_sample_weight_sum();
        let r = *randu * sum;
        let mut partial_sum = 0.0;
        for (index, sc) in self.closures.iter().enumerate() {
            if !sc.closure_type().is_bsdf_or_bssrdf() {
                continue;
            }
            let next_sum = partial_sum + sc.sample_weight;
            if r < next_sum {
                *randu = (r - partial_sum) / sc.sample_weight;
                return Some(index);
            }
            partial_sum = next_sum;
        }
        None
    }

    /// Throughput weight of taking the subsurface closure at `index`, compensating for its pick
    /// probability.
    #[must_use]
    pub fn bssrdf_sample_weight(&self, index: usize) -> Spectrum {
        let Some(sc) = self.closures.get(index) else {
            return Spectrum::ZERO;
        };
        if self.closures.len() > 1 && sc.sample_weight > 0.0 {
            sc.weight * (self.bsdf_bssrdf_sample_weight_sum() / sc.sample_weight)
        } else {
            sc.weight
        }
    }

    /// Samples the closure at `index` and evaluates all the others in the sampled direction.
    /// The returned sample carries the weighted evaluation split, its `pdf` is the combined pdf.
    #[must_use]
    pub fn bsdf_sample_closure(
        &self,
        index: usize,
        randu: f64,
        randv: f64,
        beckmann: BeckmannSampling<'_>,
    ) -> (BsdfSample, BsdfEval) {
        let Some(sc) = self.closures.get(index) else {
            return (BsdfSample::none(), BsdfEval::default());
        };
        let mut sample = sc.sample(self.ng, self.i, randu, randv, beckmann);
        if sample.pdf == 0.0 {
            return (BsdfSample::none(), BsdfEval::default());
        }
        let mut eval = BsdfEval::new(sc.closure_type().is_bsdf_diffuse(), sample.eval * sc.weight);
        if self.closures.len() > 1 {
            let sweight = sc.sample_weight;
            sample.pdf = self.bsdf_multi_eval(
                sample.omega_in,
                Some(index),
                &mut eval,
                sample.pdf * sweight,
                sweight,
                ShaderExclude::empty(),
            );
        }
        sample.eval = eval.sum;
        (sample, eval)
    }

    /// Weighted average roughness of the scattering closures.
    #[must_use]
    pub fn average_roughness(&self) -> f64 {
        let mut roughness = 0.0;
        let mut sum_weight = 0.0;
        for sc in self.closures.iter().filter(|sc| sc.closure_type().is_bsdf()) {
            let weight = sc.weight.average().abs();
            // one root undoes the product of both axes, the other the squared convention
            roughness += weight * crate::utils::safe_sqrt(sc.roughness_squared()).sqrt();
            sum_weight += weight;
        }
        if sum_weight > 0.0 {
            roughness / sum_weight
        } else {
            0.0
        }
    }

    /// How much light passes straight through the shading point.
    #[must_use]
    pub fn transparency(&self) -> Spectrum {
        if self.flag.contains(ShaderFlag::HAS_ONLY_VOLUME) {
            Spectrum::ONE
        } else if self.flag.contains(ShaderFlag::TRANSPARENT) {
            self.closure_transparent_extinction
        } else {
            Spectrum::ZERO
        }
    }

    pub fn disable_transparency(&mut self) {
        if self.flag.contains(ShaderFlag::TRANSPARENT) {
            for sc in self.closures.iter_mut() {
                if sc.closure_type().is_bsdf_transparent() {
                    sc.sample_weight = 0.0;
                    sc.weight = Spectrum::ZERO;
                }
            }
            self.flag.remove(ShaderFlag::TRANSPARENT);
        }
    }

    #[must_use]
    pub fn alpha(&self) -> Spectrum {
        (Spectrum::ONE - self.transparency()).clamp(Spectrum::ZERO, Spectrum::ONE)
    }

    /// Diffuse albedo, subsurface closures count as diffuse.
    #[must_use]
    pub fn diffuse(&self) -> Spectrum {
        self.weight_sum(|ty| ty.is_bsdf_diffuse() || ty.is_bssrdf())
    }

    #[must_use]
    pub fn glossy(&self) -> Spectrum {
        self.weight_sum(crate::closure::ClosureType::is_bsdf_glossy)
    }

    #[must_use]
    pub fn transmission(&self) -> Spectrum {
        self.weight_sum(crate::closure::ClosureType::is_bsdf_transmission)
    }

    fn weight_sum(&self, filter: impl Fn(crate::closure::ClosureType) -> bool) -> Spectrum {
        self.closures
            .iter()
            .filter(|sc| filter(sc.closure_type()))
            .map(|sc| sc.weight)
            .sum()
    }

    fn weighted_normal(&self, filter: impl Fn(crate::closure::ClosureType) -> bool) -> Vec3d {
        let n: Vec3d = self
            .closures
            .iter()
            .filter(|sc| filter(sc.closure_type()))
            .map(|sc| sc.n * sc.weight.average().abs())
            .sum();
        n.try_normalize().unwrap_or(self.n)
    }

    /// Normal of the scattering closures weighted by their contribution.
    #[must_use]
    pub fn average_normal(&self) -> Vec3d {
        self.weighted_normal(crate::closure::ClosureType::is_bsdf_or_bssrdf)
    }

    /// Normal of the subsurface closures, used for the exit point of a subsurface bounce.
    #[must_use]
    pub fn bssrdf_normal(&self) -> Vec3d {
        self.weighted_normal(crate::closure::ClosureType::is_bssrdf)
    }

    /// Ambient occlusion weight and normal of the diffuse closures.
    #[must_use]
    pub fn ao(&self, ao_factor: f64) -> (Spectrum, Vec3d) {
        let weight = self.weight_sum(crate::closure::ClosureType::is_bsdf_diffuse) * ao_factor;
        let n = self.weighted_normal(crate::closure::ClosureType::is_bsdf_diffuse);
        (weight, n)
    }

    /// Emitted light towards the viewer.
    #[must_use]
    pub fn emission(&self) -> Spectrum {
        if self.flag.contains(ShaderFlag::EMISSION) {
            let facing = if self.ng.dot(self.i).abs() > 0.0 {
                1.0
            } else {
                0.0
            };
            self.closure_emission_background * facing
        } else {
            Spectrum::ZERO
        }
    }

    #[must_use]
    pub fn background(&self) -> Spectrum {
        if self.flag.contains(ShaderFlag::EMISSION) {
            self.closure_emission_background
        } else {
            Spectrum::ZERO
        }
    }

    /// Computes the holdout weight. Holdout objects keep only their transparency, every other
    /// closure is removed.
    pub fn holdout_apply(&mut self) -> Spectrum {
        if self.object_flag.contains(ObjectFlag::HOLDOUT_MASK) {
            if self.flag.contains(ShaderFlag::TRANSPARENT)
                && !self.flag.contains(ShaderFlag::HAS_ONLY_VOLUME)
            {
                self.closures
                    .retain(|sc| sc.closure_type().is_bsdf_transparent());
                self.flag.remove(
                    ShaderFlag::CLOSURE_FLAGS - (ShaderFlag::TRANSPARENT | ShaderFlag::BSDF),
                );
                Spectrum::ONE - self.closure_transparent_extinction
            } else {
                Spectrum::ONE
            }
        } else {
            self.weight_sum(crate::closure::ClosureType::is_holdout)
        }
    }
}

/// A phase function kept from a volume shading point.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VolumePhase {
    pub weight: Spectrum,
    pub sample_weight: f64,
    pub phase: HenyeyGreenstein,
}

/// The phase functions of a volume scatter event, copied out of the shading point so they
/// survive further volume shader evaluations along the segment.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ShaderVolumePhases {
    phases: [VolumePhase; MAX_VOLUME_CLOSURE],
    len: usize,
}

impl ShaderVolumePhases {
    #[must_use]
    pub fn from_shader_data(sd: &ShaderData) -> Self {
        let mut phases = Self::default();
        for sc in &sd.closures {
            if let Closure::HenyeyGreenstein(phase) = sc.closure {
                phases.phases[phases.len] = VolumePhase {
                    weight: sc.weight,
                    sample_weight: sc.sample_weight,
                    phase,
                };
                phases.len += 1;
                if phases.len >= MAX_VOLUME_CLOSURE {
                    break;
                }
            }
        }
        phases
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &VolumePhase> {
        self.phases[..self.len].iter()
    }

    fn sum_sample_weight(&self) -> f64 {
        self.iter().map(|p| p.sample_weight).sum()
    }

    /// Evaluates the mixture of phases for light arriving from `omega_in`. The pdf weights each
    /// phase by its selection probability, the value per channel by its share of the scattering
    /// coefficient, which the integrator already carries in the throughput.
    #[must_use]
    pub fn eval(&self, i: Vec3d, omega_in: Vec3d) -> (Spectrum, f64) {
        let mut value = Spectrum::ZERO;
        let mut sum_weight = Spectrum::ZERO;
        let mut sum_pdf = 0.0;
        for p in self.iter() {
            let (phase_value, pdf) = p.phase.eval(i, omega_in);
            value += phase_value * p.weight;
            sum_weight += p.weight;
            sum_pdf += pdf * p.sample_weight;
        }
        let sum_sample_weight = self.sum_sample_weight();
        if sum_sample_weight > 0.0 {
            (
                safe_divide_spectrum(value, sum_weight),
                sum_pdf / sum_sample_weight,
            )
        } else {
            (Spectrum::ZERO, 0.0)
        }
    }

    /// Picks a phase by sample weight, samples a direction from it and evaluates the mixture in
    /// that direction.
    #[must_use]
    pub fn sample(&self, i: Vec3d, mut randu: f64, randv: f64) -> BsdfSample {
        let sum = self.sum_sample_weight();
        let r = randu * sum;
        let mut partial_sum = 0.0;
        let mut picked = None;
        for p in self.iter() {
            let next_sum = partial_sum + p.sample_weight;
            if r <= next_sum && p.sample_weight > 0.0 {
                randu = (r - partial_sum) / p.sample_weight;
                picked = Some(p);
                break;
            }
            partial_sum = next_sum;
        }
        let Some(picked) = picked else {
            return BsdfSample::none();
        };
        let sample = picked.phase.sample(i, randu, randv);
        let (eval, pdf) = self.eval(i, sample.omega_in);
        if pdf == 0.0 {
            return BsdfSample::none();
        }
        BsdfSample {
            omega_in: sample.omega_in,
            eval,
            pdf,
            label: ClosureLabel::VOLUME_SCATTER,
        }
    }
}
