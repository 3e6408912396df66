//! Straight pass-through, used for alpha cutouts
use super::Bsdf;
use crate::{BsdfSample, ClosureLabel, Spectrum, Vec3d};

/// Lets light continue along the ray unchanged. The shading point accumulates the weight of all
/// transparent closures in a single one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Transparent;

impl Bsdf for Transparent {
    fn sample(&self, _n: Vec3d, _ng: Vec3d, i: Vec3d, _randu: f64, _randv: f64) -> BsdfSample {
        BsdfSample {
            omega_in: -i,
            eval: Spectrum::ONE,
            pdf: 1.0,
            label: ClosureLabel::TRANSMIT | ClosureLabel::TRANSPARENT,
        }
    }
}
