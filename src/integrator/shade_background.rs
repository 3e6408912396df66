use tracing::trace;

use crate::{
    config::KernelGlobals,
    film::{Film, Passes},
    integrator::{
        accumulate::{write_background, write_emission},
        state::IntegratorState,
    },
    scene::Scene,
    shader::{ShaderData, ShaderExclude},
    utils::{power_heuristic, VecExt},
    PathRayFlag, Spectrum,
};

/// World shader seen by the ray, weighted against sampling the background as a light.
fn eval_background_shader<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    state: &IntegratorState,
) -> Spectrum {
    let background = &kg.data.background;
    let path = &state.path;
    if background.exclude.excludes_path(path.flag) {
        return Spectrum::ZERO;
    }

    let mut sd = ShaderData::new(kg.data.max_closures);
    sd.setup_from_background(state.ray.d, background.surface_shader);
    let path_flag = path.flag | PathRayFlag::EMISSION;
    sd.reset_closures(kg.data.max_closures, path_flag);
    kg.scene.eval_background(&mut sd, path_flag);
    let mut radiance = sd.background();

    if background.use_mis && !path.flag.contains(PathRayFlag::MIS_SKIP) {
        let p = state.ray.p - state.ray.d * path.mis_ray_t;
        let pdf = kg.scene.background_light_pdf(p, state.ray.d);
        radiance *= power_heuristic(path.mis_ray_pdf, pdf);
    }
    radiance
}

fn integrate_background<S: Scene>(kg: &KernelGlobals<'_, S>, state: &IntegratorState, film: &Film) {
    let path = &state.path;
    let is_transparent_background_ray = kg.data.background.transparent
        && path.flag.contains(PathRayFlag::TRANSPARENT_BACKGROUND);

    // a transparent film only needs the shader for the background pass
    let (transparent, eval_background) = if is_transparent_background_ray {
        (path.throughput.average(), film.has(Passes::BACKGROUND))
    } else {
        (0.0, true)
    };

    let mut radiance = if eval_background {
        eval_background_shader(kg, state)
    } else {
        Spectrum::ZERO
    };
    if path.ao_bounce(&kg.data.integrator) {
        radiance *= kg.data.integrator.ao_bounces_factor;
    }
    write_background(
        film,
        path,
        path.throughput * radiance,
        transparent,
        is_transparent_background_ray,
    );
}

/// Distant lights in the direction of the escaping ray.
fn integrate_distant_lights<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    state: &IntegratorState,
    film: &Film,
) {
    let path = &state.path;
    let mut lights = Vec::new();
    kg.scene.distant_lights_from_ray(state.ray.d, &mut lights);
    for ls in &lights {
        if ls.exclude.excludes_path(path.flag) {
            continue;
        }
        let mut light_eval = kg.scene.eval_light(ls);
        if light_eval == Spectrum::ZERO {
            continue;
        }
        if !path.flag.contains(PathRayFlag::MIS_SKIP) {
            light_eval *= power_heuristic(path.mis_ray_pdf, ls.pdf);
        }
        write_emission(film, path, path.throughput * light_eval);
    }
}

/// Shades a path that left the scene. The path always ends here.
pub fn shade_background<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    state: &mut IntegratorState,
    film: &Film,
) {
    integrate_distant_lights(kg, state, film);
    integrate_background(kg, state, film);
    trace!(bounce = state.path.bounce, "path escaped");
    state.path.queued_kernel = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::KernelData,
        integrator::state::{DeviceKernel, PathState},
        test_scene::{TestScene, TestSun},
        test_utils::assert_eq_approx_abs,
        Ray, Vec3d, RAY_T_MAX,
    };

    fn escaped(data: &KernelData) -> IntegratorState {
        let mut state = IntegratorState::new(data.volume_stack_size, data.shadow_isect_size);
        state.init_path(data, PathState::new(0, 0, 0, 0));
        state.ray = Ray::new(Vec3d::ZERO, Vec3d::Z, RAY_T_MAX);
        state.path.queued_kernel = Some(DeviceKernel::ShadeBackground);
        state
    }

    fn sky() -> TestScene {
        TestScene {
            background: Some(Spectrum::splat(0.5)),
            background_pdf: 1.0,
            ..TestScene::default()
        }
    }

    #[test]
    fn camera_sees_the_background() {
        let scene = sky();
        let data = KernelData::default();
        let kg = KernelGlobals::new(&data, &scene, None);
        let film = Film::new(1, 1, Passes::BACKGROUND);
        let mut state = escaped(&data);

        shade_background(&kg, &mut state, &film);
        assert_eq!(state.path.queued_kernel, None);
        assert_eq!(film.read(0, 0, Passes::COMBINED), Spectrum::splat(0.5));
        assert_eq!(film.read(0, 0, Passes::BACKGROUND), Spectrum::splat(0.5));
        assert_eq!(film.read_transparent(0, 0), 0.0);
    }

    #[test]
    fn transparent_film_hides_the_background() {
        let scene = sky();
        let mut data = KernelData::default();
        data.background.transparent = true;
        let kg = KernelGlobals::new(&data, &scene, None);
        let film = Film::new(1, 1, Passes::empty());
        let mut state = escaped(&data);
        state.path.throughput = Spectrum::new(0.2, 0.4, 0.6);

        shade_background(&kg, &mut state, &film);
        assert_eq!(film.read(0, 0, Passes::COMBINED), Spectrum::ZERO);
        assert_eq_approx_abs!(film.read_transparent(0, 0), 0.4, 1e-12);
    }

    #[test]
    fn bounce_ray_is_weighted_against_background_sampling() {
        let scene = sky();
        let mut data = KernelData::default();
        data.background.use_mis = true;
        let kg = KernelGlobals::new(&data, &scene, None);
        let film = Film::new(1, 1, Passes::empty());
        let mut state = escaped(&data);
        state.path.flag = PathRayFlag::DIFFUSE | PathRayFlag::REFLECT;
        state.path.mis_ray_pdf = 1.0;

        shade_background(&kg, &mut state, &film);
        assert_eq_approx_abs!(film.read(0, 0, Passes::COMBINED).x, 0.25, 1e-12);
    }

    #[test]
    fn excluded_background_is_black() {
        let scene = sky();
        let mut data = KernelData::default();
        data.background.exclude = ShaderExclude::CAMERA;
        let kg = KernelGlobals::new(&data, &scene, None);
        let film = Film::new(1, 1, Passes::empty());
        let mut state = escaped(&data);

        shade_background(&kg, &mut state, &film);
        assert_eq!(film.read(0, 0, Passes::COMBINED), Spectrum::ZERO);
    }

    #[test]
    fn sun_is_seen_in_its_direction_only() {
        let scene = TestScene {
            sun: Some(TestSun {
                d: Vec3d::Z,
                cos_angle: 0.99,
                radiance: Spectrum::splat(3.0),
                pdf: 1.0,
            }),
            ..TestScene::default()
        };
        let data = KernelData::default();
        let kg = KernelGlobals::new(&data, &scene, None);

        let film = Film::new(1, 1, Passes::empty());
        let mut state = escaped(&data);
        shade_background(&kg, &mut state, &film);
        assert_eq!(film.read(0, 0, Passes::COMBINED), Spectrum::splat(3.0));

        let film = Film::new(1, 1, Passes::empty());
        let mut state = escaped(&data);
        state.ray.d = Vec3d::X;
        shade_background(&kg, &mut state, &film);
        assert_eq!(film.read(0, 0, Passes::COMBINED), Spectrum::ZERO);
    }
}
