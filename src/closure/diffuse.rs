//! Lambertian reflection and its transmissive counterpart
use std::f64::consts;

use super::Bsdf;
use crate::{utils::sample_cos_hemisphere, BsdfSample, ClosureLabel, Spectrum, Vec3d};

/// Ideal diffuse reflection. Resembles matte surfaces like plaster or unpolished stone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Diffuse;

impl Bsdf for Diffuse {
    fn eval_reflect(&self, n: Vec3d, _i: Vec3d, omega_in: Vec3d) -> (Spectrum, f64) {
        let cos_ni = n.dot(omega_in).max(0.0);
        let pdf = cos_ni * consts::FRAC_1_PI;
        (Spectrum::splat(pdf), pdf)
    }

    fn sample(&self, n: Vec3d, ng: Vec3d, _i: Vec3d, randu: f64, randv: f64) -> BsdfSample {
        let (omega_in, pdf) = sample_cos_hemisphere(n, randu, randv);
        if ng.dot(omega_in) > 0.0 {
            BsdfSample {
                omega_in,
                eval: Spectrum::splat(pdf),
                pdf,
                label: ClosureLabel::REFLECT | ClosureLabel::DIFFUSE,
            }
        } else {
            BsdfSample::none()
        }
    }
}

/// Diffuse transmission through thin surfaces like paper or leaves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Translucent;

impl Bsdf for Translucent {
    fn eval_transmit(&self, n: Vec3d, _i: Vec3d, omega_in: Vec3d) -> (Spectrum, f64) {
        let cos_ni = (-n).dot(omega_in).max(0.0);
        let pdf = cos_ni * consts::FRAC_1_PI;
        (Spectrum::splat(pdf), pdf)
    }

    fn sample(&self, n: Vec3d, ng: Vec3d, _i: Vec3d, randu: f64, randv: f64) -> BsdfSample {
        let (omega_in, pdf) = sample_cos_hemisphere(-n, randu, randv);
        if ng.dot(omega_in) < 0.0 {
            BsdfSample {
                omega_in,
                eval: Spectrum::splat(pdf),
                pdf,
                label: ClosureLabel::TRANSMIT | ClosureLabel::DIFFUSE,
            }
        } else {
            BsdfSample::none()
        }
    }
}
