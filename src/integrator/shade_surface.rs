use tracing::debug;

use crate::{
    config::KernelGlobals,
    film::{Film, Passes},
    integrator::{
        accumulate::{write_emission, write_transparent},
        light_sample::{light_sample_mis_weight, light_sample_terminate, surface_shadow_ray},
        state::{DeviceKernel, IntegratorState},
    },
    rng::{RngState, PRNG_BOUNCE_NUM, PRNG_BSDF_U, PRNG_LIGHT_TERMINATE, PRNG_LIGHT_U},
    scene::Scene,
    shader::{ObjectFlag, ShaderData, ShaderFlag},
    subsurface::{subsurface_bounce, subsurface_shader_data_setup},
    utils::{power_heuristic, ray_offset, sample_cos_hemisphere, VecExt},
    ClosureLabel, PathRayFlag, Ray, Spectrum, RAY_T_MAX,
};

/// Volume boundaries a path may pass before it is considered stuck.
const VOLUME_BOUNDS_MAX: u32 = 1024;

/// Light emitted by the surface towards the path, weighted against light sampling of the same
/// surface unless the path was not light sampled at the previous bounce.
fn integrate_surface_emission<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    state: &IntegratorState,
    sd: &ShaderData,
    film: &Film,
) {
    let path = &state.path;
    let mut emission = sd.emission();
    if !path.flag.contains(PathRayFlag::MIS_SKIP) && sd.flag.contains(ShaderFlag::USE_MIS) {
        let t = sd.ray_length + path.mis_ray_t;
        let light_pdf = kg.scene.triangle_light_pdf(sd, t);
        emission *= power_heuristic(path.mis_ray_pdf, light_pdf);
    }
    write_emission(film, path, path.throughput * emission);
}

/// Next event estimation: samples a light and branches a shadow path towards it.
fn integrate_surface_direct_light<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    state: &mut IntegratorState,
    sd: &ShaderData,
    rng: &RngState,
) {
    if !sd.flag.contains(ShaderFlag::BSDF_HAS_EVAL) {
        return;
    }
    let (u, v) = rng.rng_2d(PRNG_LIGHT_U);
    let Some(ls) = kg
        .scene
        .sample_light(sd.p, u, v, state.path.bounce, state.path.flag)
    else {
        return;
    };
    if ls.pdf <= 0.0 {
        return;
    }

    let light_eval = kg.scene.eval_light(&ls);
    if light_eval == Spectrum::ZERO {
        return;
    }

    let (mut bsdf_eval, bsdf_pdf) = sd.bsdf_eval(ls.d, ls.exclude);
    bsdf_eval.mul(light_eval / ls.pdf * light_sample_mis_weight(&ls, bsdf_pdf));
    if light_sample_terminate(
        &kg.data.integrator,
        &mut bsdf_eval,
        rng.rng_1d(PRNG_LIGHT_TERMINATE),
    ) {
        return;
    }

    let is_transmission = sd.is_transmission(ls.d);
    let shadow_ray = surface_shadow_ray(sd, &ls);
    let throughput = state.path.throughput * bsdf_eval.sum;
    let bounce = state.path.bounce;
    let shadow = state.init_shadow_path(false, shadow_ray, throughput);
    if is_transmission {
        shadow.volume_stack.enter_exit(sd);
    }
    if bounce == 0 {
        shadow.flag |= PathRayFlag::SURFACE_PASS;
        shadow.pass_diffuse_weight = bsdf_eval.pass_diffuse_weight();
        shadow.pass_glossy_weight = bsdf_eval.pass_glossy_weight();
    }
}

/// Branches an ambient occlusion path off the surface, into the cosine weighted hemisphere
/// around the diffuse normal.
fn integrate_surface_ao<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    state: &mut IntegratorState,
    sd: &ShaderData,
    rng: &RngState,
) {
    let data = &kg.data.integrator;
    let (u, v) = rng.rng_2d(PRNG_BSDF_U);
    let (ao_weight, ao_n) = sd.ao(data.ao_additive_factor);
    let (ao_d, _) = sample_cos_hemisphere(ao_n, u, v);
    let ng = if ao_d.dot(sd.ng) < 0.0 { -sd.ng } else { sd.ng };

    let object_ao_distance = kg.scene.object_ao_distance(sd.object);
    let distance = if object_ao_distance != 0.0 {
        object_ao_distance
    } else {
        data.ao_distance
    };

    let throughput = state.path.throughput * sd.alpha();
    let ray = Ray::new(ray_offset(sd.p, ng), ao_d, distance);
    let ao = state.init_shadow_path(true, ray, throughput);
    ao.flag |= PathRayFlag::SHADOW_FOR_AO;
    ao.unshadowed_throughput = ao_weight;
}

/// Volume boundary without a surface shader: the ray passes through unchanged.
fn integrate_surface_volume_only_bounce(
    state: &mut IntegratorState,
    sd: &ShaderData,
) -> ClosureLabel {
    let path = &mut state.path;
    path.volume_bounds_bounce += 1;
    if path.volume_bounds_bounce > VOLUME_BOUNDS_MAX {
        return ClosureLabel::empty();
    }
    if path.volume_bounds_bounce > 1 {
        path.rng_offset += PRNG_BOUNCE_NUM;
    }
    state.ray.p = ray_offset(sd.p, -sd.ng);
    state.ray.t -= sd.ray_length;
    ClosureLabel::TRANSMIT | ClosureLabel::TRANSPARENT
}

/// Picks a scattering or subsurface closure and continues the path with it.
fn integrate_surface_bsdf_bssrdf_bounce<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    state: &mut IntegratorState,
    sd: &ShaderData,
    rng: &RngState,
) -> ClosureLabel {
    if !sd.flag.intersects(ShaderFlag::BSDF | ShaderFlag::BSSRDF) {
        return ClosureLabel::empty();
    }
    let (mut u, v) = rng.rng_2d(PRNG_BSDF_U);
    let Some(index) = sd.bsdf_bssrdf_pick(&mut u) else {
        return ClosureLabel::empty();
    };
    let is_bssrdf = sd
        .closures
        .get(index)
        .is_some_and(|sc| sc.closure_type().is_bssrdf());
    if is_bssrdf {
        return subsurface_bounce(state, sd, index);
    }

    let (sample, eval) = sd.bsdf_sample_closure(index, u, v, kg.beckmann_sampling());
    if sample.pdf == 0.0 || eval.is_zero() {
        return ClosureLabel::empty();
    }
    let label = sample.label;

    // clipping carries through transparent surfaces
    let t = if label.contains(ClosureLabel::TRANSPARENT) {
        state.ray.t - sd.ray_length
    } else {
        RAY_T_MAX
    };
    let ng = if label.contains(ClosureLabel::TRANSMIT) {
        -sd.ng
    } else {
        sd.ng
    };
    state.ray = Ray::new(ray_offset(sd.p, ng), sample.omega_in.normalize(), t);

    let path = &mut state.path;
    path.throughput *= eval.sum / sample.pdf;
    if path.bounce == 0 {
        path.set_pass_weights(eval.pass_diffuse_weight(), eval.pass_glossy_weight());
    }
    if label.contains(ClosureLabel::TRANSPARENT) {
        path.mis_ray_t += sd.ray_length;
    } else {
        path.mis_ray_pdf = sample.pdf;
        path.mis_ray_t = 0.0;
        path.min_ray_pdf = path.min_ray_pdf.min(sample.pdf);
    }
    path.next(&kg.data.integrator, label);
    label
}

/// Shades the surface hit of the path. Returns the label of the continuation, empty when the
/// path ends here.
fn integrate_surface<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    state: &mut IntegratorState,
    film: &Film,
) -> ClosureLabel {
    let Some(isect) = state.isect else {
        return ClosureLabel::empty();
    };
    let data = &kg.data.integrator;
    let path_flag = state.path.flag;
    let mut sd = ShaderData::new(kg.data.max_closures);
    kg.scene.shader_setup_from_ray(&mut sd, &state.ray, &isect);

    let label = if sd.flag.contains(ShaderFlag::HAS_ONLY_VOLUME) {
        integrate_surface_volume_only_bounce(state, &sd)
    } else {
        sd.reset_closures(kg.data.max_closures, path_flag);
        kg.scene.eval_surface(&mut sd, path_flag);
        if path_flag.contains(PathRayFlag::SUBSURFACE) {
            // lighting at the exit point of a subsurface bounce
            subsurface_shader_data_setup(kg, &mut sd, path_flag);
            state.path.flag.remove(PathRayFlag::SUBSURFACE);
        }
        let path = &state.path;
        sd.prepare_surface_closures(
            path.bounce,
            path.transparent_bounce,
            path.min_ray_pdf,
            data.filter_glossy,
        );

        let is_holdout = sd.flag.contains(ShaderFlag::HOLDOUT)
            || sd.object_flag.contains(ObjectFlag::HOLDOUT_MASK);
        if is_holdout && path_flag.contains(PathRayFlag::TRANSPARENT_BACKGROUND) {
            let holdout_weight = sd.holdout_apply();
            let transparent = (holdout_weight * state.path.throughput).average();
            write_transparent(film, &state.path, transparent);
            if holdout_weight == Spectrum::ONE {
                return ClosureLabel::empty();
            }
        }

        if sd.flag.contains(ShaderFlag::EMISSION) {
            integrate_surface_emission(kg, state, &sd, film);
        }

        // russian roulette was decided at intersection time, subsurface exits already paid
        #[allow(clippy::float_cmp)]
        if !path_flag.contains(PathRayFlag::SUBSURFACE) {
            if path_flag.contains(PathRayFlag::TERMINATE_ON_NEXT_SURFACE) {
                return ClosureLabel::empty();
            }
            let probability = state.path.continuation_probability;
            if probability == 0.0 {
                return ClosureLabel::empty();
            }
            if probability != 1.0 {
                state.path.throughput /= probability;
            }
        }

        let rng = state.rng();
        if data.use_direct_light {
            integrate_surface_direct_light(kg, state, &sd, &rng);
        }
        let ao_pass = kg.data.film.passes.contains(Passes::AO)
            && state.path.flag.contains(PathRayFlag::CAMERA);
        if ao_pass || data.ao_additive_factor != 0.0 {
            integrate_surface_ao(kg, state, &sd, &rng);
        }
        integrate_surface_bsdf_bssrdf_bounce(kg, state, &sd, &rng)
    };

    if label.contains(ClosureLabel::TRANSMIT) {
        state.volume_stack.enter_exit(&sd);
    }
    label
}

/// Shades a surface hit: holdouts, emission, direct light and ambient occlusion, then picks the
/// next bounce. Both surface kernels run this.
pub fn shade_surface<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    state: &mut IntegratorState,
    film: &Film,
) {
    let label = integrate_surface(kg, state, film);
    state.path.queued_kernel = if label.is_empty() {
        debug!(bounce = state.path.bounce, "path ended at surface");
        None
    } else if label.contains(ClosureLabel::SUBSURFACE_SCATTER) {
        Some(DeviceKernel::IntersectSubsurface)
    } else {
        Some(DeviceKernel::IntersectClosest)
    };
}

#[cfg(test)]
mod tests {
    use std::f64::consts;

    use super::*;
    use crate::{
        closure::{bssrdf::Bssrdf, diffuse::Diffuse, Closure},
        config::KernelData,
        integrator::{intersect_closest::intersect_closest, state::PathState},
        shader::ShaderExclude,
        test_scene::{Shape, TestLight, TestScene, TestShader},
        test_utils::assert_eq_approx_abs,
        Vec3d,
    };

    fn floor(
        flags: ShaderFlag,
        surface: impl Fn(&mut ShaderData, PathRayFlag) + Send + Sync + 'static,
    ) -> TestScene {
        let mut scene = TestScene::default();
        let shader = scene.add_shader(TestShader::surface(flags, surface));
        scene.add_object(
            Shape::Plane {
                p: Vec3d::ZERO,
                n: Vec3d::Z,
            },
            shader,
        );
        scene
    }

    fn diffuse_floor() -> TestScene {
        floor(ShaderFlag::empty(), |sd, _| {
            sd.add_bsdf(sd.n, Spectrum::splat(0.8), Closure::Diffuse(Diffuse));
        })
    }

    /// Light above the floor whose sampled contribution is exactly one.
    fn unit_light() -> TestLight {
        TestLight {
            p: Vec3d::new(0.0, 0.0, 2.0),
            strength: Spectrum::splat(16.0 * consts::PI),
            cast_shadow: true,
            exclude: ShaderExclude::empty(),
        }
    }

    fn camera_hit<S: Scene>(kg: &KernelGlobals<'_, S>) -> IntegratorState {
        let data = kg.data;
        let mut state = IntegratorState::new(data.volume_stack_size, data.shadow_isect_size);
        state.init_path(data, PathState::new(0, 0, 0, 7));
        state.ray = Ray::new(Vec3d::new(0.0, 0.0, 1.0), Vec3d::NEG_Z, RAY_T_MAX);
        intersect_closest(kg, &mut state);
        state
    }

    #[test]
    fn emission_seen_by_the_camera() {
        let scene = floor(ShaderFlag::HAS_EMISSION, |sd, _| {
            sd.add_emission(Spectrum::splat(2.0));
        });
        let data = KernelData::default();
        let kg = KernelGlobals::new(&data, &scene, None);
        let film = Film::new(1, 1, Passes::empty());
        let mut state = camera_hit(&kg);
        assert_eq!(state.path.queued_kernel, Some(DeviceKernel::ShadeSurface));

        shade_surface(&kg, &mut state, &film);
        assert_eq!(film.read(0, 0, Passes::COMBINED), Spectrum::splat(2.0));
        assert_eq!(state.path.queued_kernel, None);
    }

    #[test]
    fn diffuse_surface_samples_the_light_and_bounces() {
        let mut scene = diffuse_floor();
        scene.light = Some(unit_light());
        let data = KernelData::default();
        let kg = KernelGlobals::new(&data, &scene, None);
        let film = Film::new(1, 1, Passes::empty());
        let mut state = camera_hit(&kg);
        shade_surface(&kg, &mut state, &film);

        let shadow = &state.shadow;
        assert_eq!(shadow.queued_kernel, Some(DeviceKernel::IntersectShadow));
        assert_eq_approx_abs!(shadow.throughput.x, 0.8 * consts::FRAC_1_PI, 1e-9);
        assert_eq!(shadow.ray.d, Vec3d::Z);
        assert!(shadow.ray.p.z > 0.0);
        assert!(shadow.flag.contains(PathRayFlag::SURFACE_PASS));
        assert_eq!(shadow.pass_diffuse_weight, Spectrum::ONE);
        assert_eq!(shadow.bounce, 0);

        assert_eq!(state.path.queued_kernel, Some(DeviceKernel::IntersectClosest));
        assert_eq!(state.path.bounce, 1);
        assert!(state.path.flag.contains(PathRayFlag::DIFFUSE));
        assert!(!state.path.flag.contains(PathRayFlag::CAMERA));
        assert_eq_approx_abs!(state.path.throughput.x, 0.8, 1e-9);
        assert!(state.ray.d.z > 0.0);
        assert!(state.path.mis_ray_pdf > 0.0);
    }

    #[test]
    fn excluded_light_leaves_no_shadow_path() {
        let mut scene = diffuse_floor();
        scene.light = Some(TestLight {
            exclude: ShaderExclude::DIFFUSE,
            ..unit_light()
        });
        let data = KernelData::default();
        let kg = KernelGlobals::new(&data, &scene, None);
        let film = Film::new(1, 1, Passes::empty());
        let mut state = camera_hit(&kg);
        shade_surface(&kg, &mut state, &film);
        assert_eq!(state.shadow.queued_kernel, None);
        assert_eq!(state.path.queued_kernel, Some(DeviceKernel::IntersectClosest));
    }

    #[test]
    fn transparent_surface_is_passed_through() {
        let scene = floor(ShaderFlag::HAS_TRANSPARENT_SHADOW, |sd, flag| {
            sd.add_transparent(Spectrum::ONE, flag);
        });
        let data = KernelData::default();
        let kg = KernelGlobals::new(&data, &scene, None);
        let film = Film::new(1, 1, Passes::empty());
        let mut state = camera_hit(&kg);
        shade_surface(&kg, &mut state, &film);

        assert_eq!(state.path.queued_kernel, Some(DeviceKernel::IntersectClosest));
        assert_eq!(state.ray.d, Vec3d::NEG_Z);
        assert!(state.ray.p.z < 0.0);
        assert_eq!(state.path.bounce, 0);
        assert_eq!(state.path.transparent_bounce, 1);
        assert_eq_approx_abs!(state.path.mis_ray_t, 1.0, 1e-12);
        assert!(state.path.flag.contains(PathRayFlag::CAMERA));
        assert!(state.path.flag.contains(PathRayFlag::TRANSPARENT_BACKGROUND));
        assert_eq_approx_abs!(state.path.throughput.x, 1.0, 1e-12);
    }

    #[test]
    fn holdout_cuts_out_the_film() {
        let scene = floor(ShaderFlag::empty(), |sd, _| sd.add_holdout(Spectrum::ONE));
        let data = KernelData::default();
        let kg = KernelGlobals::new(&data, &scene, None);
        let film = Film::new(1, 1, Passes::empty());
        let mut state = camera_hit(&kg);
        shade_surface(&kg, &mut state, &film);

        assert_eq!(state.path.queued_kernel, None);
        assert_eq_approx_abs!(film.read_transparent(0, 0), 1.0, 1e-12);
        assert_eq!(film.read(0, 0, Passes::COMBINED), Spectrum::ZERO);
    }

    #[test]
    fn terminated_path_still_sees_emission() {
        let scene = floor(ShaderFlag::HAS_EMISSION, |sd, _| {
            sd.add_emission(Spectrum::ONE);
            sd.add_bsdf(sd.n, Spectrum::ONE, Closure::Diffuse(Diffuse));
        });
        let data = KernelData::default();
        let kg = KernelGlobals::new(&data, &scene, None);
        let film = Film::new(1, 1, Passes::empty());
        let mut state = camera_hit(&kg);
        state.path.flag |= PathRayFlag::TERMINATE_ON_NEXT_SURFACE;
        shade_surface(&kg, &mut state, &film);

        assert_eq!(film.read(0, 0, Passes::COMBINED), Spectrum::ONE);
        assert_eq!(state.path.queued_kernel, None);
        assert_eq!(state.shadow.queued_kernel, None);
    }

    #[test]
    fn survivors_of_russian_roulette_are_scaled_up() {
        let scene = diffuse_floor();
        let data = KernelData::default();
        let kg = KernelGlobals::new(&data, &scene, None);
        let film = Film::new(1, 1, Passes::empty());
        let mut state = camera_hit(&kg);
        state.path.continuation_probability = 0.5;
        shade_surface(&kg, &mut state, &film);
        assert_eq_approx_abs!(state.path.throughput.x, 1.6, 1e-9);
    }

    #[test]
    fn volume_boundary_enters_the_volume() {
        let mut scene = TestScene::default();
        let shader = scene.add_shader(TestShader::only_volume(ShaderFlag::empty(), |_, _| {}));
        let object = scene.add_object(
            Shape::Plane {
                p: Vec3d::ZERO,
                n: Vec3d::Z,
            },
            shader,
        );
        let data = KernelData::default();
        let kg = KernelGlobals::new(&data, &scene, None);
        let film = Film::new(1, 1, Passes::empty());
        let mut state = camera_hit(&kg);
        shade_surface(&kg, &mut state, &film);

        assert_eq!(state.path.queued_kernel, Some(DeviceKernel::IntersectClosest));
        assert!(state.volume_stack.contains(object));
        assert_eq!(state.path.volume_bounds_bounce, 1);
        assert_eq!(state.path.transparent_bounce, 0);
        assert!(state.ray.p.z < 0.0);
    }

    #[test]
    fn subsurface_closure_starts_a_probe() {
        let scene = floor(ShaderFlag::empty(), |sd, path_flag| {
            let bssrdf = Bssrdf::new(Spectrum::splat(0.1), Spectrum::splat(0.8), None, 1.4);
            sd.add_bssrdf(sd.n, Spectrum::ONE, bssrdf, path_flag);
        });
        let data = KernelData::default();
        let kg = KernelGlobals::new(&data, &scene, None);
        let film = Film::new(1, 1, Passes::empty());
        let mut state = camera_hit(&kg);
        shade_surface(&kg, &mut state, &film);

        assert_eq!(state.path.queued_kernel, Some(DeviceKernel::IntersectSubsurface));
        assert!(state.path.flag.contains(PathRayFlag::SUBSURFACE));
        assert_eq!(state.subsurface.ng, Vec3d::Z);
    }

    #[test]
    fn subsurface_is_diffuse_after_a_diffuse_bounce() {
        let scene = floor(ShaderFlag::empty(), |sd, path_flag| {
            let bssrdf = Bssrdf::new(Spectrum::splat(0.1), Spectrum::splat(0.8), None, 1.4);
            sd.add_bssrdf(sd.n, Spectrum::ONE, bssrdf, path_flag);
        });
        let data = KernelData::default();
        let kg = KernelGlobals::new(&data, &scene, None);
        let film = Film::new(1, 1, Passes::empty());
        let mut state = camera_hit(&kg);
        state.path.flag = PathRayFlag::DIFFUSE | PathRayFlag::DIFFUSE_ANCESTOR;
        state.path.bounce = 1;
        shade_surface(&kg, &mut state, &film);

        assert_ne!(state.path.queued_kernel, Some(DeviceKernel::IntersectSubsurface));
        assert!(!state.path.flag.contains(PathRayFlag::SUBSURFACE));
        assert!(state.path.flag.contains(PathRayFlag::DIFFUSE_ANCESTOR));
    }

    #[test]
    fn ao_branches_off_the_surface() {
        let scene = diffuse_floor();
        let mut data = KernelData::default();
        data.integrator.ao_additive_factor = 0.5;
        data.integrator.ao_distance = 3.0;
        let kg = KernelGlobals::new(&data, &scene, None);
        let film = Film::new(1, 1, Passes::empty());
        let mut state = camera_hit(&kg);
        shade_surface(&kg, &mut state, &film);

        let ao = &state.ao;
        assert_eq!(ao.queued_kernel, Some(DeviceKernel::IntersectShadow));
        assert!(ao.flag.contains(PathRayFlag::SHADOW_FOR_AO));
        assert_eq!(ao.ray.t, 3.0);
        assert!(ao.ray.d.z >= 0.0);
        assert_eq_approx_abs!(ao.unshadowed_throughput.x, 0.4, 1e-12);
    }
}
