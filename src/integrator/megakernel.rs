use tracing::trace;

use crate::{
    config::KernelGlobals,
    film::Film,
    integrator::{
        intersect_closest::intersect_closest,
        intersect_shadow::intersect_shadow,
        intersect_subsurface::intersect_subsurface,
        intersect_volume_stack::intersect_volume_stack,
        shade_background::shade_background,
        shade_light::shade_light,
        shade_shadow::shade_shadow,
        shade_surface::shade_surface,
        shade_volume::shade_volume,
        state::{DeviceKernel, IntegratorState},
    },
    scene::Scene,
};

/// Runs a pending shadow or AO kernel. Returns false when that branch is idle.
fn run_shadow_kernel<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    state: &mut IntegratorState,
    film: &Film,
    ao: bool,
) -> bool {
    let Some(kernel) = state.shadow(ao).queued_kernel else {
        return false;
    };
    trace!(?kernel, ao, "shadow kernel");
    debug_assert!(kernel.is_shadow(), "{kernel:?} queued on a shadow path");
    match kernel {
        DeviceKernel::IntersectShadow => intersect_shadow(kg, state, ao),
        DeviceKernel::ShadeShadow => shade_shadow(kg, state, film, ao),
        _ => state.shadow_mut(ao).queued_kernel = None,
    }
    true
}

/// Runs the path until it and all of its shadow branches terminated.
///
/// Shadow and AO branches run to completion before the main path continues, a path never has
/// more than one branch of each kind in flight.
pub fn megakernel<S: Scene>(kg: &KernelGlobals<'_, S>, state: &mut IntegratorState, film: &Film) {
    loop {
        if run_shadow_kernel(kg, state, film, false) || run_shadow_kernel(kg, state, film, true) {
            continue;
        }

        let Some(kernel) = state.path.queued_kernel else {
            break;
        };
        trace!(?kernel, bounce = state.path.bounce, "path kernel");
        debug_assert!(!kernel.is_shadow(), "{kernel:?} queued on the main path");
        match kernel {
            DeviceKernel::IntersectClosest => intersect_closest(kg, state),
            DeviceKernel::IntersectSubsurface => intersect_subsurface(kg, state),
            DeviceKernel::IntersectVolumeStack => intersect_volume_stack(kg, state),
            DeviceKernel::ShadeBackground => shade_background(kg, state, film),
            DeviceKernel::ShadeLight => shade_light(kg, state, film),
            DeviceKernel::ShadeSurface | DeviceKernel::ShadeSurfaceRaytrace => {
                shade_surface(kg, state, film);
            }
            DeviceKernel::ShadeVolume => shade_volume(kg, state, film),
            DeviceKernel::IntersectShadow | DeviceKernel::ShadeShadow => {
                state.path.queued_kernel = None;
            }
        }
    }
}
