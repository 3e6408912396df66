//! The path integrator as a state machine of kernels.
//!
//! Every kernel reads the [`IntegratorState`] of one path, does its part of the light transport
//! and queues the kernel to run next. A path ends once nothing is queued anymore. Shadow and
//! ambient occlusion rays are branches of the path with their own queue.
//!
//! [`megakernel`] runs a single path to completion. Since paths share nothing but the [`Film`],
//! any number of them can run in parallel.
use tracing::info_span;

use crate::{
    config::KernelGlobals,
    film::Film,
    rng::{pixel_rng_hash, RngState, PRNG_FILTER_U, PRNG_LENS_U, PRNG_TIME},
    scene::{Camera, Scene},
    Vec2d,
};

pub mod accumulate;
pub mod intersect_closest;
pub mod intersect_shadow;
pub mod intersect_subsurface;
pub mod intersect_volume_stack;
pub(crate) mod light_sample;
pub mod megakernel;
pub mod path_state;
pub mod shade_background;
pub mod shade_light;
pub mod shade_shadow;
pub mod shade_surface;
pub mod shade_volume;
pub mod state;

pub use megakernel::megakernel;
pub use state::{DeviceKernel, IntegratorState, PathState, ShadowState, SubsurfaceState};

/// Traces one sample of pixel `(x, y)` and adds it to `film`.
///
/// `state` is reset for the new path, reusing it between samples saves its allocations.
pub fn render_sample<S: Scene, C: Camera>(
    kg: &KernelGlobals<'_, S>,
    camera: &C,
    film: &Film,
    state: &mut IntegratorState,
    (x, y): (u32, u32),
    sample: u32,
) {
    let _span = info_span!("sample", x, y, sample).entered();

    let rng_hash = pixel_rng_hash(x, y, kg.data.integrator.seed);
    let rng = RngState::new(rng_hash, 0, sample);
    let (filter_u, filter_v) = rng.rng_2d(PRNG_FILTER_U);
    let (lens_u, lens_v) = rng.rng_2d(PRNG_LENS_U);
    let time = rng.rng_1d(PRNG_TIME);
    let Some(ray) = camera.generate_ray(
        x,
        y,
        Vec2d::new(filter_u, filter_v),
        Vec2d::new(lens_u, lens_v),
        time,
    ) else {
        return;
    };

    state.init_path(kg.data, PathState::new(x, y, sample, rng_hash));
    state.ray = ray;
    state.path.queued_kernel = Some(if camera.is_inside_volume() {
        DeviceKernel::IntersectVolumeStack
    } else {
        DeviceKernel::IntersectClosest
    });
    megakernel(kg, state, film);
}
