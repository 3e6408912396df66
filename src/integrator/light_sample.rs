//! Helpers shared by the next event estimation of surfaces and volumes.
use crate::{
    config::IntegratorData,
    scene::LightSample,
    shader::ShaderData,
    utils::{power_heuristic, ray_offset},
    BsdfEval, Ray, Spectrum, Vec3d, RAY_T_MAX,
};

/// Russian roulette on the contribution of a light sample. Returns true when the sample is
/// dropped, survivors are scaled up in `eval`.
pub(crate) fn light_sample_terminate(
    data: &IntegratorData,
    eval: &mut BsdfEval,
    rand_terminate: f64,
) -> bool {
    if eval.is_zero() {
        return true;
    }
    if data.light_inv_rr_threshold > 0.0 {
        let probability = eval.sum.abs().max_element() * data.light_inv_rr_threshold;
        if probability < 1.0 {
            if rand_terminate >= probability {
                return true;
            }
            eval.mul(Spectrum::splat(1.0 / probability));
        }
    }
    false
}

/// Weight of a light sample against BSDF sampling of the same direction.
pub(crate) fn light_sample_mis_weight(ls: &LightSample, bsdf_pdf: f64) -> f64 {
    if ls.use_mis {
        power_heuristic(ls.pdf, bsdf_pdf)
    } else {
        1.0
    }
}

/// Shadow ray from `p` to the light sample, both ends moved off their surfaces. Lights that cast
/// no shadow get a ray of zero length.
fn shadow_ray(p: Vec3d, ls: &LightSample) -> Ray {
    if !ls.cast_shadow {
        return Ray::new(p, ls.d, 0.0);
    }
    if ls.t >= RAY_T_MAX {
        return Ray::new(p, ls.d, RAY_T_MAX);
    }
    let end = ray_offset(ls.p, ls.ng);
    let to_light = end - p;
    let t = to_light.length();
    if t > 0.0 {
        Ray::new(p, to_light / t, t)
    } else {
        Ray::new(p, ls.d, 0.0)
    }
}

/// Shadow ray leaving the surface of `sd` on the side of the light.
pub(crate) fn surface_shadow_ray(sd: &ShaderData, ls: &LightSample) -> Ray {
    let ng = if sd.is_transmission(ls.d) { -sd.ng } else { sd.ng };
    shadow_ray(ray_offset(sd.p, ng), ls)
}

/// Shadow ray from a scatter point inside a volume.
pub(crate) fn volume_shadow_ray(p: Vec3d, ls: &LightSample) -> Ray {
    shadow_ray(p, ls)
}
