//! Perfectly smooth dielectric transmission
use super::Bsdf;
use crate::{utils::fresnel_dielectric, BsdfSample, ClosureLabel, Spectrum, Vec3d, SINGULAR_PDF};

/// Only the refracted part of a smooth dielectric. Pair it with a [`super::reflection::Reflection`]
/// for glass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Refraction {
    /// relative index of refraction
    pub ior: f64,
}

impl Refraction {
    #[must_use]
    pub const fn new(ior: f64) -> Self {
        Self { ior }
    }
}

impl Bsdf for Refraction {
    fn sample(&self, n: Vec3d, _ng: Vec3d, i: Vec3d, _randu: f64, _randv: f64) -> BsdfSample {
        let split = fresnel_dielectric(self.ior, n, i);
        #[allow(clippy::float_cmp)]
        if split.inside || split.fresnel == 1.0 {
            return BsdfSample::none();
        }
        BsdfSample {
            omega_in: split.transmitted,
            eval: Spectrum::splat(SINGULAR_PDF),
            pdf: SINGULAR_PDF,
            label: ClosureLabel::TRANSMIT | ClosureLabel::SINGULAR,
        }
    }
}
