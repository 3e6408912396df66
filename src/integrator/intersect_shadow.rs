use tracing::debug;

use crate::{
    config::KernelGlobals,
    integrator::state::{DeviceKernel, IntegratorState},
    scene::Scene,
    PathRayFlag,
};

/// Traces the shadow or AO branch and records its transparent blockers. Blockers beyond the
/// remaining transparent budget make the shadow opaque.
pub fn intersect_shadow<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    state: &mut IntegratorState,
    ao: bool,
) {
    let data = &kg.data.integrator;
    let shadow_isect_size = kg.data.shadow_isect_size;
    let shadow = state.shadow_mut(ao);
    let visibility = PathRayFlag::SHADOW;

    let opaque = if data.transparent_shadows {
        let max_transparent_hits = data
            .transparent_max_bounce
            .saturating_sub(shadow.transparent_bounce)
            .saturating_sub(1) as usize;
        let max_hits = max_transparent_hits.min(shadow_isect_size);
        let hits = kg
            .scene
            .intersect_shadow_all(&shadow.ray, visibility, max_hits, &mut shadow.isect);
        let opaque = hits.opaque || hits.num_hits > max_transparent_hits;
        if opaque {
            shadow.isect.clear();
            shadow.num_hits = 0;
        } else {
            shadow.isect.sort_by(|a, b| a.t.total_cmp(&b.t));
            shadow.isect.truncate(max_hits);
            shadow.num_hits = hits.num_hits;
        }
        opaque
    } else {
        shadow.isect.clear();
        shadow.num_hits = 0;
        kg.scene.intersect(&shadow.ray, visibility).is_some()
    };

    shadow.queued_kernel = if opaque {
        debug!(ao, "shadow ray blocked");
        None
    } else {
        Some(DeviceKernel::ShadeShadow)
    };
}
