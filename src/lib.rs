#![warn(clippy::pedantic)]
#![warn(clippy::perf)]
#![warn(clippy::nursery)]
#![warn(clippy::suboptimal_flops)]
#![deny(clippy::return_self_not_must_use)]
#![allow(clippy::similar_names)]
#![deny(clippy::semicolon_if_nothing_returned)]
#![deny(clippy::must_use_candidate)]
#![deny(clippy::double_must_use)]
#![deny(clippy::use_self)]
#![deny(clippy::unreadable_literal)]
#![deny(clippy::explicit_iter_loop)]
// these are lints to enable later
#![allow(clippy::cast_lossless)]

//! Shading closures and a wavefront path integrator for physically based rendering.
//!
//! The crate covers the part of a renderer between "a ray hit something" and "light was added to
//! the film": the closures a shader graph produces, their aggregation at a shading point, nested
//! volumes, subsurface scattering and the state machine that strings all of it together into
//! paths. Geometry, shader graphs and light selection are provided by the caller through the
//! traits in [`scene`].
//!
//! # Design Decisions
//! Lighting calculations are done exclusively in [f64]s. Closures can be extremely spiky and
//! [f64] has helped reducing numerical errors.
//!
//! Directions follow the shading convention: the incoming direction `i` points from the surface
//! towards the viewer, sampled directions point away from the surface. Unlike a BSDF in local
//! space, closures are evaluated in world space around their own normal.
//!
//! Evaluated closures include the cosine of the sampled direction. Pdfs are solid angle
//! densities.
//!
//! `sample` functions are deterministic. The random numbers come from [`rng`], a hashed stream
//! indexed by pixel, sample and bounce, so a render is reproducible regardless of how paths are
//! scheduled.
//!
//! Failures of the numerics stay in-band: closures that cannot be evaluated return zero, closures
//! that do not fit into a shading point are dropped. The only fallible entry point is the
//! validation of [`config::KernelData`].
//!
//! This crate is built on [glam] for a simple but fast vector math library at the core.
//!
//! # References
//! * Eric Veach. *Robust monte carlo methods for light transport simulation.* PhD thesis, Stanford
//!     University, 1997.
//! * Bruce Walter, Stephen R. Marschner, Hongsong Li, and Kenneth E. Torrance. Microfacet models
//!     for refraction through rough surfaces. In *Proceedings of the Eurographics Symposium on
//!     Rendering,* 2007.
//! * Eric Heitz. Understanding the masking-shadowing function in microfacet-based brdfs.
//!     *Journal of Computer Graphics Techniques, 3(2):32–91,* 2014.
//! * Wenzel Jakob. An improved visible normal sampling routine for the Beckmann distribution.
//!     Technical report, 2014.
//! * Brent Burley. Extending the Disney BRDF to a BSDF with integrated subsurface scattering.
//!     *SIGGRAPH Course*, 19, 2015.
//! * Per H. Christensen and Brent Burley. Approximate reflectance profiles for efficient
//!     subsurface scattering. Technical report, Pixar, 2015.

mod core;

pub use core::{
    BsdfEval, BsdfSample, ClosureLabel, PathRayFlag, Ray, Spectrum, Vec2d, Vec3d, OBJECT_NONE,
    RAY_T_MAX, SHADER_NONE, SINGULAR_PDF,
};

#[cfg(test)]
pub(crate) mod test_scene;
#[cfg(test)]
pub(crate) mod test_utils;
pub mod utils;

pub mod closure;
pub mod config;
pub mod error;
pub mod film;
pub mod integrator;
pub mod rng;
pub mod scene;
pub mod shader;
pub mod subsurface;
pub mod volume_stack;

pub use config::{KernelData, KernelGlobals};
pub use error::ConfigError;
pub use film::{Film, Passes};
pub use integrator::{megakernel, render_sample, IntegratorState};
pub use scene::{Camera, Scene};
pub use shader::ShaderData;
