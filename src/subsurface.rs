//! Subsurface scattering with disk sampling
//!
//! Light entering an object at one point leaves it at another point of the same object. The exit
//! point is found by tracing a probe ray through a disk around the entry point, along one of the
//! three axes of the local frame. One of the probe hits is picked by resampling with the
//! diffusion profile and shaded with a diffuse exit closure.
use std::f64::consts;

use crate::{
    closure::{
        bssrdf::Bssrdf,
        diffuse::Diffuse,
        principled_diffuse::{DiffuseComponents, PrincipledDiffuse},
        Closure, ShaderClosure,
    },
    config::KernelGlobals,
    integrator::state::IntegratorState,
    rng::{lcg_step_float, RngState, LCG_SUBSURFACE_SCRAMBLE, PRNG_BOUNCE_NUM, PRNG_BSDF_U},
    scene::{LocalHit, Scene},
    shader::{ShaderData, ShaderFlag},
    utils::{make_orthonormals, FloatExt, VecExt},
    ClosureLabel, PathRayFlag, Ray, Spectrum, Vec3d, RAY_T_MAX,
};

/// Probe hits that take part in the resampling. Further hits are picked at random in their place.
pub const BSSRDF_MAX_HITS: usize = 4;

/// Starts a subsurface bounce with the closure at `index`. The ray is pointed into the surface and
/// the profile parameters are stored for the probe kernel.
pub(crate) fn subsurface_bounce(
    state: &mut IntegratorState,
    sd: &ShaderData,
    index: usize,
) -> ClosureLabel {
    debug_assert!(
        !state.path.flag.contains(PathRayFlag::DIFFUSE_ANCESTOR),
        "consecutive subsurface bounces"
    );
    let Some(&ShaderClosure {
        n,
        closure: Closure::Bssrdf(bssrdf),
        ..
    }) = sd.closures.get(index)
    else {
        return ClosureLabel::empty();
    };

    state.ray = Ray::new(sd.p, n, RAY_T_MAX);
    state.subsurface.ng = sd.ng;
    state.subsurface.object = sd.object;
    state.subsurface.albedo = bssrdf.albedo;
    state.subsurface.radius = bssrdf.radius;
    state.subsurface.roughness = bssrdf.roughness;

    let path = &mut state.path;
    path.throughput *= sd.bssrdf_sample_weight(index);
    path.flag.remove(PathRayFlag::CAMERA);
    path.flag |= PathRayFlag::SUBSURFACE;
    if bssrdf.roughness.is_some() {
        path.flag |= PathRayFlag::SUBSURFACE_USE_FRESNEL;
    }
    if path.bounce == 0 {
        path.set_pass_weights(Spectrum::ONE, Spectrum::ZERO);
    }
    path.rng_offset += PRNG_BOUNCE_NUM;
    ClosureLabel::SUBSURFACE_SCATTER
}

/// Replaces the closures at a subsurface exit point with a single diffuse closure. With
/// `SUBSURFACE_USE_FRESNEL` the exit gets the Fresnel weighted principled diffuse instead.
pub(crate) fn subsurface_shader_data_setup<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    sd: &mut ShaderData,
    path_flag: PathRayFlag,
) {
    let n = if sd.flag.contains(ShaderFlag::HAS_BSSRDF_BUMP) {
        sd.bssrdf_normal()
    } else {
        sd.n
    };
    sd.reset_closures(kg.data.max_closures, path_flag);
    let exit = if path_flag.contains(PathRayFlag::SUBSURFACE_USE_FRESNEL) {
        Closure::PrincipledDiffuse(PrincipledDiffuse::new(
            0.0,
            DiffuseComponents::LAMBERT_EXIT,
        ))
    } else {
        Closure::Diffuse(Diffuse)
    };
    sd.add_bsdf(n, Spectrum::ONE, exit);
}

/// The exit point picked among the probe hits.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SubsurfaceExit {
    pub hit: LocalHit,
    /// Position of the exit point
    pub p: Vec3d,
    /// Throughput weight of the pick
    pub weight: Spectrum,
}

/// Samples an exit point for the subsurface bounce stored in `state`. Returns `None` when the
/// probe ray found nothing to exit through.
#[allow(clippy::cast_precision_loss, clippy::similar_names)]
pub fn subsurface_disk<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    state: &IntegratorState,
    rng: &RngState,
) -> Option<SubsurfaceExit> {
    let ss = &state.subsurface;
    let p = state.ray.p;
    let (disk_u, disk_v) = rng.rng_2d(PRNG_BSDF_U);

    let mut bssrdf = Bssrdf::new(ss.radius, ss.albedo, ss.roughness, 1.0);
    bssrdf.setup();

    // the normal axis is picked half the time, it sees the least foreshortening
    let (t, b) = make_orthonormals(ss.ng);
    let (disk_n, disk_t, disk_b, pick_pdf, disk_v) = if disk_v < 0.5 {
        (ss.ng, t, b, [0.5, 0.25, 0.25], disk_v * 2.0)
    } else if disk_v < 0.75 {
        (t, ss.ng, b, [0.25, 0.5, 0.25], (disk_v - 0.5) * 4.0)
    } else {
        (b, t, ss.ng, [0.25, 0.25, 0.5], (disk_v - 0.75) * 4.0)
    };

    let (r, h) = bssrdf.sample(disk_u);
    if h <= 0.0 {
        return None;
    }
    let phi = consts::TAU * disk_v;
    let disk_p = (r * phi.cos()) * disk_t + (r * phi.sin()) * disk_b;
    let ray = Ray::new(p + disk_n * h + disk_p, -disk_n, 2.0 * h);

    let mut lcg_state = rng.lcg_state(LCG_SUBSURFACE_SCRAMBLE);
    let mut hits = Vec::with_capacity(BSSRDF_MAX_HITS);
    let num_hits = kg.scene.intersect_local(
        &ray,
        ss.object,
        BSSRDF_MAX_HITS,
        &mut lcg_state,
        &mut hits,
    );
    hits.truncate(BSSRDF_MAX_HITS);
    if hits.is_empty() {
        return None;
    }
    // independent of the order the scene reports them in
    hits.sort_by(|a, b| a.isect.t.total_cmp(&b.isect.t));

    let mut weights = [Spectrum::ZERO; BSSRDF_MAX_HITS];
    let mut sum_weights = 0.0;
    for (hit, weight) in hits.iter().zip(weights.iter_mut()) {
        let pdf_n = pick_pdf[0] * disk_n.dot(hit.ng).abs();
        let pdf_t = pick_pdf[1] * disk_t.dot(hit.ng).abs();
        let pdf_b = pick_pdf[2] * disk_b.dot(hit.ng).abs();
        // power heuristic over the three axes, pdf_n cancels against the estimator
        let denom = pdf_n.sq() + pdf_t.sq() + pdf_b.sq();
        if denom <= 0.0 {
            continue;
        }
        let mut w = pdf_n / denom;
        if num_hits > BSSRDF_MAX_HITS {
            w *= num_hits as f64 / BSSRDF_MAX_HITS as f64;
        }

        let r = (ray.at(hit.isect.t) - p).length();
        let pdf = bssrdf.pdf(r);
        if pdf > 0.0 {
            *weight = bssrdf.eval(r) * (w / pdf);
            sum_weights += weight.abs().average();
        }
    }
    if sum_weights <= 0.0 {
        return None;
    }

    let pick = lcg_step_float(&mut lcg_state) * sum_weights;
    let mut partial_sum = 0.0;
    for (hit, weight) in hits.iter().zip(weights) {
        let sample_weight = weight.abs().average();
        let next_sum = partial_sum + sample_weight;
        if pick < next_sum {
            return Some(SubsurfaceExit {
                hit: *hit,
                p: ray.at(hit.isect.t),
                weight: weight * (sum_weights / sample_weight),
            });
        }
        partial_sum = next_sum;
    }
    None
}
