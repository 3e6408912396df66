use tracing::debug;

use crate::{
    config::KernelGlobals,
    film::Passes,
    integrator::state::{DeviceKernel, IntegratorState},
    rng::PRNG_TERMINATE,
    scene::{Intersection, PrimitiveKind, Scene},
    shader::ShaderFlag,
    PathRayFlag,
};

/// Decides whether the path ends at the hit with `shader_flags`, before the shader is evaluated.
/// Emissive and transparent surfaces and volumes still get shaded, they only flag the path so
/// it ends right after.
fn intersect_terminate<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    state: &mut IntegratorState,
    shader_flags: ShaderFlag,
) -> bool {
    let data = &kg.data.integrator;
    if state.path.ao_bounce(data) {
        if shader_flags.intersects(ShaderFlag::HAS_TRANSPARENT_SHADOW | ShaderFlag::HAS_EMISSION) {
            state.path.flag |= PathRayFlag::TERMINATE_AFTER_TRANSPARENT;
        } else if !state.volume_stack.is_empty() {
            state.path.flag |= PathRayFlag::TERMINATE_IN_NEXT_VOLUME;
        } else {
            return true;
        }
    }

    let probability = state.path.continuation_probability(data);
    state.path.continuation_probability = probability;
    #[allow(clippy::float_cmp)]
    if probability != 1.0 {
        let terminate = state.rng().rng_1d(PRNG_TERMINATE);
        if probability == 0.0 || terminate >= probability {
            if shader_flags.contains(ShaderFlag::HAS_EMISSION) {
                state.path.flag |= PathRayFlag::TERMINATE_ON_NEXT_SURFACE;
            } else if !state.volume_stack.is_empty() {
                state.path.flag |= PathRayFlag::TERMINATE_IN_NEXT_VOLUME;
            } else {
                return true;
            }
        }
    }
    false
}

/// Kernel that shades a surface hit.
pub(crate) fn shader_next_kernel<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    shader_flags: ShaderFlag,
) -> DeviceKernel {
    if shader_flags.contains(ShaderFlag::HAS_RAYTRACE) || kg.data.film.passes.contains(Passes::AO) {
        DeviceKernel::ShadeSurfaceRaytrace
    } else {
        DeviceKernel::ShadeSurface
    }
}

/// Finds the closest hit of the path's ray and picks the kernel that handles it.
pub fn intersect_closest<S: Scene>(kg: &KernelGlobals<'_, S>, state: &mut IntegratorState) {
    let data = &kg.data.integrator;
    let mut ray = state.ray;

    // indirect light is approximated by ambient occlusion, the ray only needs to reach that far
    if state.path.ao_bounce(data) {
        ray.t = data.ao_bounces_distance;
        if let Some(last) = state.isect {
            let object_ao_distance = kg.scene.object_ao_distance(last.object);
            if object_ao_distance != 0.0 {
                ray.t = object_ao_distance;
            }
        }
    }

    let visibility = state.path.ray_visibility();
    let mut isect = kg.scene.intersect(&ray, visibility);
    if data.use_light_mis {
        let mut light_ray = ray;
        if let Some(hit) = isect {
            light_ray.t = hit.t;
        }
        if let Some(light) = kg.scene.intersect_lights(&light_ray, state.path.flag) {
            if isect.map_or(true, |hit| light.t < hit.t) {
                isect = Some(light);
            }
        }
    }
    state.ray = ray;
    state.isect = isect;

    let surface: Option<Intersection> = isect.filter(|hit| hit.kind != PrimitiveKind::Light);
    let shader_flags = surface.map_or(ShaderFlag::empty(), |hit| {
        kg.scene.intersection_shader_flags(&hit)
    });

    if !state.volume_stack.is_empty() {
        // the volume kernel continues with whatever comes after the segment
        state.path.queued_kernel = if intersect_terminate(kg, state, shader_flags) {
            debug!(bounce = state.path.bounce, "path terminated inside volume");
            None
        } else {
            Some(DeviceKernel::ShadeVolume)
        };
        return;
    }

    state.path.queued_kernel = match isect {
        Some(hit) if hit.kind == PrimitiveKind::Light => Some(DeviceKernel::ShadeLight),
        Some(_) => {
            if intersect_terminate(kg, state, shader_flags) {
                debug!(bounce = state.path.bounce, "path terminated by russian roulette");
                None
            } else {
                Some(shader_next_kernel(kg, shader_flags))
            }
        }
        None => Some(DeviceKernel::ShadeBackground),
    };
}
