use tracing::debug;

use crate::{
    config::KernelGlobals,
    film::Film,
    integrator::{
        accumulate::{write_ao, write_direct_light},
        shade_volume::volume_shadow_transmittance,
        state::{DeviceKernel, IntegratorState, ShadowState},
    },
    rng::RngState,
    scene::{Intersection, Scene},
    shader::ShaderData,
    utils::ray_offset,
    PathRayFlag, Ray, Spectrum,
};

/// Light let through by a recorded blocker. Only the transparency of its shader is evaluated.
fn shadow_surface_attenuation<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    sd: &mut ShaderData,
    shadow: &ShadowState,
    isect: &Intersection,
) -> Spectrum {
    kg.scene.shader_setup_from_ray(sd, &shadow.ray, isect);
    let path_flag = shadow.flag | PathRayFlag::SHADOW;
    sd.reset_closures(kg.data.max_closures, path_flag);
    kg.scene.eval_surface(sd, path_flag);
    sd.transparency()
}

/// Attenuates the shadow throughput by the recorded blockers and the volumes between them.
/// Returns false once nothing gets through anymore.
fn integrate_transparent_shadow<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    shadow: &mut ShadowState,
    rng: &RngState,
) -> bool {
    let mut sd = ShaderData::new(0);
    let num_recorded = shadow.isect.len();
    let has_remaining = shadow.num_hits > num_recorded;
    let mut t_prev = 0.0;

    for hit in 0..=num_recorded {
        let t_hit = shadow.isect.get(hit).map_or(shadow.ray.t, |isect| isect.t);

        // the segment past the last recorded hit is handled by the next round
        if !shadow.volume_stack.is_empty() && (hit < num_recorded || !has_remaining) {
            let segment = Ray::new(shadow.ray.at(t_prev), shadow.ray.d, t_hit - t_prev);
            shadow.throughput *=
                volume_shadow_transmittance(kg, &mut sd, &shadow.volume_stack, &segment, rng);
        }

        let Some(&isect) = shadow.isect.get(hit) else {
            break;
        };
        let attenuation = shadow_surface_attenuation(kg, &mut sd, shadow, &isect);
        shadow.throughput *= attenuation;
        if shadow.throughput == Spectrum::ZERO {
            return false;
        }
        shadow.volume_stack.enter_exit(&sd);
        t_prev = t_hit;
    }
    shadow.throughput != Spectrum::ZERO
}

/// Shades the blockers of the shadow or AO branch. The branch continues with another
/// intersection round while blockers beyond the recorded ones remain, otherwise the light
/// that made it through is written to the film.
pub fn shade_shadow<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    state: &mut IntegratorState,
    film: &Film,
    ao: bool,
) {
    let path = state.path;
    let shadow = state.shadow_mut(ao);
    let rng = RngState::new(path.rng_hash, shadow.rng_offset, path.sample);

    if !integrate_transparent_shadow(kg, shadow, &rng) {
        debug!(ao, "shadow ray absorbed");
        shadow.queued_kernel = None;
        return;
    }

    let num_recorded = shadow.isect.len();
    shadow.transparent_bounce += u32::try_from(num_recorded).unwrap_or(u32::MAX);
    if shadow.num_hits > num_recorded {
        // trace again from just past the last recorded blocker
        if let Some(last) = shadow.isect.last() {
            let last_t = last.t;
            shadow.ray.p = ray_offset(shadow.ray.at(last_t), shadow.ray.d);
            shadow.ray.t -= last_t;
        }
        shadow.queued_kernel = Some(DeviceKernel::IntersectShadow);
        return;
    }

    if shadow.flag.contains(PathRayFlag::SHADOW_FOR_AO) {
        let additive = kg.data.integrator.ao_additive_factor > 0.0;
        write_ao(film, &path, shadow, additive);
    } else {
        write_direct_light(film, &path, shadow);
    }
    shadow.queued_kernel = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::KernelData,
        film::Passes,
        integrator::{intersect_shadow::intersect_shadow, state::PathState},
        shader::ShaderFlag,
        test_scene::{Shape, TestScene, TestShader},
        test_utils::assert_eq_approx_abs,
        volume_stack::{VolumeStack, VolumeStackEntry},
        Vec3d, OBJECT_NONE,
    };

    fn panes(count: usize, transparency: f64) -> TestScene {
        let mut scene = TestScene::default();
        let shader = scene.add_shader(TestShader::surface(
            ShaderFlag::HAS_TRANSPARENT_SHADOW,
            move |sd, flag| sd.add_transparent(Spectrum::splat(transparency), flag),
        ));
        for k in 0..count {
            #[allow(clippy::cast_precision_loss)]
            let z = 1.0 + k as f64;
            scene.add_object(
                Shape::Plane {
                    p: Vec3d::new(0.0, 0.0, z),
                    n: Vec3d::NEG_Z,
                },
                shader,
            );
        }
        scene
    }

    fn light_path(data: &KernelData) -> IntegratorState {
        let mut state = IntegratorState::new(data.volume_stack_size, data.shadow_isect_size);
        state.init_path(data, PathState::new(0, 0, 0, 0));
        state.init_shadow_path(false, Ray::new(Vec3d::ZERO, Vec3d::Z, 10.0), Spectrum::ONE);
        state
    }

    #[test]
    fn light_passes_through_transparent_blockers() {
        let scene = panes(2, 0.5);
        let data = KernelData::default();
        let kg = KernelGlobals::new(&data, &scene, None);
        let film = Film::new(1, 1, Passes::empty());
        let mut state = light_path(&data);
        intersect_shadow(&kg, &mut state, false);
        shade_shadow(&kg, &mut state, &film, false);

        assert_eq!(state.shadow.queued_kernel, None);
        assert_eq!(state.shadow.transparent_bounce, 2);
        assert_eq_approx_abs!(state.shadow.throughput.x, 0.25, 1e-12);
        assert_eq_approx_abs!(film.read(0, 0, Passes::COMBINED).x, 0.25, 1e-12);
    }

    #[test]
    fn unrecorded_blockers_take_another_round() {
        let scene = panes(3, 0.5);
        let mut data = KernelData::default();
        data.shadow_isect_size = 2;
        let kg = KernelGlobals::new(&data, &scene, None);
        let film = Film::new(1, 1, Passes::empty());
        let mut state = light_path(&data);

        intersect_shadow(&kg, &mut state, false);
        shade_shadow(&kg, &mut state, &film, false);
        assert_eq!(state.shadow.queued_kernel, Some(DeviceKernel::IntersectShadow));
        assert_eq!(state.shadow.transparent_bounce, 2);
        assert!(state.shadow.ray.p.z > 2.0);
        assert_eq!(state.shadow.ray.t, 8.0);
        assert_eq!(film.read(0, 0, Passes::COMBINED), Spectrum::ZERO);

        intersect_shadow(&kg, &mut state, false);
        assert_eq!(state.shadow.num_hits, 1);
        shade_shadow(&kg, &mut state, &film, false);
        assert_eq!(state.shadow.queued_kernel, None);
        assert_eq!(state.shadow.transparent_bounce, 3);
        assert_eq_approx_abs!(film.read(0, 0, Passes::COMBINED).x, 0.125, 1e-12);
    }

    #[test]
    fn blocker_without_transparency_absorbs() {
        let scene = panes(1, 0.0);
        let data = KernelData::default();
        let kg = KernelGlobals::new(&data, &scene, None);
        let film = Film::new(1, 1, Passes::empty());
        let mut state = light_path(&data);
        intersect_shadow(&kg, &mut state, false);
        assert_eq!(state.shadow.queued_kernel, Some(DeviceKernel::ShadeShadow));
        shade_shadow(&kg, &mut state, &film, false);
        assert_eq!(state.shadow.queued_kernel, None);
        assert_eq!(film.read(0, 0, Passes::COMBINED), Spectrum::ZERO);
    }

    #[test]
    fn volumes_attenuate_the_shadow() {
        let mut scene = panes(1, 0.5);
        let absorber = scene.add_shader(TestShader::volume(ShaderFlag::empty(), |sd, _| {
            sd.add_volume_absorption(Spectrum::splat(0.5));
        }));
        let data = KernelData::default();
        let kg = KernelGlobals::new(&data, &scene, None);
        let film = Film::new(1, 1, Passes::empty());
        let mut state = light_path(&data);
        state.shadow.ray.t = 4.0;
        let mut stack = VolumeStack::new(data.volume_stack_size);
        stack.write(0, VolumeStackEntry::new(OBJECT_NONE, absorber));
        state.shadow.volume_stack = stack;

        intersect_shadow(&kg, &mut state, false);
        shade_shadow(&kg, &mut state, &film, false);
        let expected = 0.5 * (-2.0f64).exp();
        assert_eq_approx_abs!(film.read(0, 0, Passes::COMBINED).x, expected, 1e-9);
    }

    #[test]
    fn ao_ray_writes_the_ao_pass() {
        let scene = TestScene::default();
        let mut data = KernelData::default();
        data.integrator.ao_additive_factor = 1.0;
        let kg = KernelGlobals::new(&data, &scene, None);
        let film = Film::new(1, 1, Passes::AO);
        let mut state = light_path(&data);
        let ao = state.init_shadow_path(
            true,
            Ray::new(Vec3d::ZERO, Vec3d::Z, 1.0),
            Spectrum::splat(0.5),
        );
        ao.flag |= PathRayFlag::SHADOW_FOR_AO;
        ao.unshadowed_throughput = Spectrum::splat(0.2);

        intersect_shadow(&kg, &mut state, true);
        shade_shadow(&kg, &mut state, &film, true);
        assert_eq!(state.ao.queued_kernel, None);
        assert_eq!(film.read(0, 0, Passes::AO), Spectrum::splat(0.5));
        assert_eq_approx_abs!(film.read(0, 0, Passes::COMBINED).x, 0.1, 1e-12);
    }
}
