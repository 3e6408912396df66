//! Film writes of the integrator and the routing of contributions into the light passes.
use crate::{
    film::{Film, Passes},
    integrator::state::{PathState, ShadowState},
    PathRayFlag, Spectrum,
};

/// Routes a contribution into the light passes. Directly visible light goes to `direct_pass`,
/// indirect light to the pass of the first bounce.
fn write_light_passes(
    film: &Film,
    path: &PathState,
    flag: PathRayFlag,
    diffuse_weight: Spectrum,
    glossy_weight: Spectrum,
    contribution: Spectrum,
    direct_pass: Passes,
) {
    if !film.has(Passes::LIGHT) {
        return;
    }
    let (x, y) = (path.x, path.y);
    if flag.contains(PathRayFlag::VOLUME_PASS) {
        film.add(x, y, Passes::VOLUME, contribution);
    } else if flag.contains(PathRayFlag::SURFACE_PASS) {
        let transmission_weight = Spectrum::ONE - diffuse_weight - glossy_weight;
        film.add(x, y, Passes::DIFFUSE, contribution * diffuse_weight);
        film.add(x, y, Passes::GLOSSY, contribution * glossy_weight);
        film.add(x, y, Passes::TRANSMISSION, contribution * transmission_weight);
    } else {
        film.add(x, y, direct_pass, contribution);
    }
}

/// Emission of a surface or volume seen by the path, throughput and MIS weight included.
pub fn write_emission(film: &Film, path: &PathState, contribution: Spectrum) {
    film.add(path.x, path.y, Passes::COMBINED, contribution);
    write_light_passes(
        film,
        path,
        path.flag,
        path.pass_diffuse_weight,
        path.pass_glossy_weight,
        contribution,
        Passes::EMISSION,
    );
}

/// Background seen by the path. Camera rays that only passed transparent surfaces write
/// their transparency and nothing else when the film is transparent.
pub fn write_background(
    film: &Film,
    path: &PathState,
    contribution: Spectrum,
    transparent: f64,
    is_transparent_background_ray: bool,
) {
    if is_transparent_background_ray {
        film.add_transparent(path.x, path.y, transparent);
    } else {
        film.add(path.x, path.y, Passes::COMBINED, contribution);
        film.add_transparent(path.x, path.y, transparent);
    }
    write_light_passes(
        film,
        path,
        path.flag,
        path.pass_diffuse_weight,
        path.pass_glossy_weight,
        contribution,
        Passes::BACKGROUND,
    );
}

/// Transparency of holdouts.
pub fn write_transparent(film: &Film, path: &PathState, transparent: f64) {
    film.add_transparent(path.x, path.y, transparent);
}

/// Light arriving through an unoccluded shadow ray.
pub fn write_direct_light(film: &Film, path: &PathState, shadow: &ShadowState) {
    film.add(path.x, path.y, Passes::COMBINED, shadow.throughput);
    write_light_passes(
        film,
        path,
        shadow.flag,
        shadow.pass_diffuse_weight,
        shadow.pass_glossy_weight,
        shadow.throughput,
        Passes::EMISSION,
    );
}

/// Unoccluded ambient occlusion ray. Camera rays fill the AO pass, additive AO brightens the
/// combined pass.
pub fn write_ao(film: &Film, path: &PathState, shadow: &ShadowState, additive: bool) {
    if shadow.bounce == 0 {
        film.add(path.x, path.y, Passes::AO, shadow.throughput);
    }
    if additive {
        film.add(
            path.x,
            path.y,
            Passes::COMBINED,
            shadow.throughput * shadow.unshadowed_throughput,
        );
    }
}
