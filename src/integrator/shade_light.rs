use tracing::trace;

use crate::{
    config::KernelGlobals,
    film::Film,
    integrator::{
        accumulate::write_emission,
        state::{DeviceKernel, IntegratorState},
    },
    scene::Scene,
    utils::{power_heuristic, ray_offset},
    PathRayFlag, Ray, Spectrum,
};

/// Emission of a light hit by the path, weighted against having sampled the same light at the
/// previous bounce.
fn integrate_light<S: Scene>(kg: &KernelGlobals<'_, S>, state: &mut IntegratorState, film: &Film) {
    let Some(isect) = state.isect else {
        return;
    };
    let ray = state.ray;

    // continue past the light
    state.ray.p = ray_offset(ray.at(isect.t), ray.d);
    state.ray.t -= isect.t;

    // the light pdf is measured from where the bounce was sampled
    let mis_ray_t = state.path.mis_ray_t;
    let sampled_from = Ray::new(ray.p - ray.d * mis_ray_t, ray.d, ray.t + mis_ray_t);
    let mut light_isect = isect;
    light_isect.t += mis_ray_t;
    state.path.mis_ray_t = light_isect.t;

    let Some(ls) = kg.scene.light_from_intersection(&sampled_from, &light_isect) else {
        return;
    };
    let path = &state.path;
    if ls.exclude.excludes_path(path.flag) {
        return;
    }
    let mut light_eval = kg.scene.eval_light(&ls);
    if light_eval == Spectrum::ZERO {
        return;
    }
    if !path.flag.contains(PathRayFlag::MIS_SKIP) {
        light_eval *= power_heuristic(path.mis_ray_pdf, ls.pdf);
    }
    write_emission(film, path, path.throughput * light_eval);
}

/// Shades a light hit by a camera or bounce ray. Lights count as transparent surfaces so a path
/// that keeps hitting the same light ends eventually.
pub fn shade_light<S: Scene>(kg: &KernelGlobals<'_, S>, state: &mut IntegratorState, film: &Film) {
    integrate_light(kg, state, film);

    state.path.transparent_bounce += 1;
    if state.path.transparent_bounce >= kg.data.integrator.transparent_max_bounce {
        trace!(
            transparent_bounce = state.path.transparent_bounce,
            "path ends at light"
        );
        state.path.queued_kernel = None;
    } else {
        state.path.queued_kernel = Some(DeviceKernel::IntersectClosest);
    }
}
