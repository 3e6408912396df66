use tracing::trace;

use crate::{
    config::KernelGlobals,
    integrator::state::{DeviceKernel, IntegratorState},
    scene::{Intersection, Scene},
    shader::{ShaderData, ShaderFlag},
    volume_stack::{VolumeStack, VolumeStackEntry},
    PathRayFlag, Ray, Vec3d, RAY_T_MAX,
};

/// Volume boundaries crossed by `ray`, nearest first.
fn volume_boundaries<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    ray: &Ray,
    visibility: PathRayFlag,
    hits: &mut Vec<Intersection>,
) {
    // every volume on the stack can be crossed twice
    let max_hits = 2 * kg.data.volume_stack_size;
    kg.scene.intersect_volume_all(ray, visibility, max_hits, hits);
    hits.sort_by(|a, b| a.t.total_cmp(&b.t));
    hits.truncate(max_hits);
}

/// Replays the volume boundaries between the entry and exit point of a subsurface bounce on
/// `stack`.
pub(crate) fn volume_stack_update_for_subsurface<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    stack: &mut VolumeStack,
    from: Vec3d,
    to: Vec3d,
) {
    let d = to - from;
    let t = d.length();
    if t <= 0.0 {
        return;
    }
    let ray = Ray::new(from, d / t, t);
    let mut hits = Vec::new();
    volume_boundaries(kg, &ray, PathRayFlag::ALL_VISIBILITY, &mut hits);

    let mut sd = ShaderData::new(0);
    for isect in &hits {
        kg.scene.shader_setup_from_ray(&mut sd, &ray, isect);
        stack.enter_exit(&sd);
    }
}

/// Builds the volume stack of a camera ray that may start inside volumes. A volume is added when
/// the ray leaves it without having entered it first. The world volume always comes first.
pub fn intersect_volume_stack<S: Scene>(kg: &KernelGlobals<'_, S>, state: &mut IntegratorState) {
    let mut ray = state.ray;
    ray.t = RAY_T_MAX;
    let visibility = state.path.ray_visibility();

    let mut stack =
        VolumeStack::with_world(kg.data.volume_stack_size, kg.data.background.volume_shader);
    let mut stack_index = stack.len();

    let mut hits = Vec::new();
    volume_boundaries(kg, &ray, visibility, &mut hits);

    let mut enclosed = Vec::new();
    let mut sd = ShaderData::new(0);
    for isect in &hits {
        kg.scene.shader_setup_from_ray(&mut sd, &ray, isect);
        if sd.flag.contains(ShaderFlag::BACKFACING) {
            if enclosed.contains(&sd.object) || stack.contains(sd.object) {
                continue;
            }
            if stack_index + 1 < stack.size() {
                stack.write(stack_index, VolumeStackEntry::new(sd.object, sd.shader));
                stack_index += 1;
            }
        } else {
            // entered in front of the camera, leaving it later does not put it on the stack
            enclosed.push(sd.object);
        }
    }
    stack.write(stack_index, VolumeStackEntry::TERMINATOR);
    trace!(volumes = stack_index, "camera volume stack");

    state.volume_stack = stack;
    state.path.queued_kernel = Some(DeviceKernel::IntersectClosest);
}
