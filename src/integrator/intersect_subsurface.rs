use tracing::debug;

use crate::{
    config::KernelGlobals,
    integrator::{
        intersect_closest::shader_next_kernel,
        intersect_volume_stack::volume_stack_update_for_subsurface,
        state::IntegratorState,
    },
    rng::PRNG_BOUNCE_NUM,
    scene::Scene,
    shader::ObjectFlag,
    subsurface::subsurface_disk,
    utils::ray_offset,
    Ray,
};

/// Finds the exit point of a subsurface bounce and continues with shading it. The path ends
/// when no exit point was found.
pub fn intersect_subsurface<S: Scene>(kg: &KernelGlobals<'_, S>, state: &mut IntegratorState) {
    let rng = state.rng();
    let Some(exit) = subsurface_disk(kg, state, &rng) else {
        debug!(bounce = state.path.bounce, "no subsurface exit point");
        state.path.queued_kernel = None;
        return;
    };
    state.path.throughput *= exit.weight;

    let object_flag = kg.scene.object_flags(exit.hit.isect.object);
    if object_flag.contains(ObjectFlag::INTERSECTS_VOLUME) {
        let from = ray_offset(state.ray.p, -state.subsurface.ng);
        let mut stack = state.volume_stack;
        volume_stack_update_for_subsurface(kg, &mut stack, from, exit.p);
        state.volume_stack = stack;
    }

    // the exit point is shaded as if it was hit from outside
    let mut isect = exit.hit.isect;
    isect.t = 1.0;
    state.ray = Ray::new(exit.p + exit.hit.ng, -exit.hit.ng, 1.0);
    state.isect = Some(isect);
    state.path.rng_offset += PRNG_BOUNCE_NUM;

    let shader_flags = kg.scene.intersection_shader_flags(&isect);
    state.path.queued_kernel = Some(shader_next_kernel(kg, shader_flags));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::KernelData,
        integrator::state::{DeviceKernel, PathState},
        rng::PRNG_BASE_NUM,
        shader::ShaderFlag,
        test_scene::{Shape, TestScene, TestShader},
        test_utils::assert_eq_approx_abs,
        Spectrum, Vec3d, RAY_T_MAX,
    };

    fn entered(scene: &mut TestScene, data: &KernelData, sample: u32) -> IntegratorState {
        let shader = scene.add_shader(TestShader::surface(ShaderFlag::empty(), |_, _| {}));
        let object = scene.add_object(
            Shape::Plane {
                p: Vec3d::ZERO,
                n: Vec3d::Z,
            },
            shader,
        );
        let mut state = IntegratorState::new(data.volume_stack_size, data.shadow_isect_size);
        state.init_path(data, PathState::new(0, 0, sample, 0x5eed));
        state.path.rng_offset = PRNG_BASE_NUM + PRNG_BOUNCE_NUM;
        state.ray = Ray::new(Vec3d::ZERO, Vec3d::Z, RAY_T_MAX);
        state.subsurface.ng = Vec3d::Z;
        state.subsurface.object = object;
        state.subsurface.radius = Spectrum::splat(0.2);
        state.subsurface.albedo = Spectrum::splat(0.5);
        state
    }

    #[test]
    fn exit_point_is_shaded_from_outside() {
        let data = KernelData::default();
        let mut found = 0;
        for sample in 0..32 {
            let mut scene = TestScene::default();
            let mut state = entered(&mut scene, &data, sample);
            let kg = KernelGlobals::new(&data, &scene, None);
            intersect_subsurface(&kg, &mut state);

            let Some(kernel) = state.path.queued_kernel else {
                continue;
            };
            found += 1;
            assert_eq!(kernel, DeviceKernel::ShadeSurface);
            assert_eq!(state.path.rng_offset, PRNG_BASE_NUM + 2 * PRNG_BOUNCE_NUM);
            let isect = state.isect.unwrap();
            let p = state.ray.at(isect.t);
            assert_eq_approx_abs!(p.z, 0.0, 1e-12);
            assert_eq!(state.ray.d, Vec3d::NEG_Z);
        }
        assert!(found > 0);
    }

    #[test]
    fn missing_exit_terminates_the_path() {
        let data = KernelData::default();
        let mut scene = TestScene::default();
        let mut state = entered(&mut scene, &data, 0);
        state.subsurface.object = 5;
        let kg = KernelGlobals::new(&data, &scene, None);
        state.path.queued_kernel = Some(DeviceKernel::IntersectSubsurface);
        intersect_subsurface(&kg, &mut state);
        assert_eq!(state.path.queued_kernel, None);
    }
}
