//! Oren-Nayar rough diffuse reflection
use std::f64::consts;

use super::Bsdf;
use crate::{
    shader::ShaderFlag,
    utils::{sample_uniform_hemisphere, FloatExt},
    BsdfSample, ClosureLabel, Spectrum, Vec3d,
};

/// Rough diffuse surfaces like clay or the moon. Backscatters more light than
/// [`super::diffuse::Diffuse`].
///
/// This is the qualitative model with the coefficients `a` and `b` derived once from the
/// roughness in [`OrenNayar::setup`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct OrenNayar {
    pub roughness: f64,
    a: f64,
    b: f64,
}

impl OrenNayar {
    #[must_use]
    pub const fn new(roughness: f64) -> Self {
        Self {
            roughness,
            a: 0.0,
            b: 0.0,
        }
    }

    pub fn setup(&mut self) -> ShaderFlag {
        let sigma = self.roughness.saturate();
        self.roughness = sigma;

        #[allow(clippy::suboptimal_flops)]
        let div = 1.0 / (consts::PI + ((3.0 * consts::PI - 4.0) / 6.0) * sigma);
        self.a = div;
        self.b = sigma * div;

        ShaderFlag::BSDF | ShaderFlag::BSDF_HAS_EVAL
    }

    fn intensity(&self, n: Vec3d, v: Vec3d, l: Vec3d) -> Spectrum {
        let nl = n.dot(l).max(0.0);
        let nv = n.dot(v).max(0.0);
        #[allow(clippy::suboptimal_flops)]
        let mut t = l.dot(v) - nl * nv;
        if t > 0.0 {
            t /= nl.max(nv) + f64::MIN_POSITIVE;
        }
        #[allow(clippy::suboptimal_flops)]
        let is = nl * (self.a + self.b * t);
        Spectrum::splat(is)
    }
}

impl Bsdf for OrenNayar {
    fn eval_reflect(&self, n: Vec3d, i: Vec3d, omega_in: Vec3d) -> (Spectrum, f64) {
        if n.dot(omega_in) > 0.0 {
            (self.intensity(n, i, omega_in), 0.5 * consts::FRAC_1_PI)
        } else {
            (Spectrum::ZERO, 0.0)
        }
    }

    fn sample(&self, n: Vec3d, ng: Vec3d, i: Vec3d, randu: f64, randv: f64) -> BsdfSample {
        let (omega_in, pdf) = sample_uniform_hemisphere(n, randu, randv);
        if ng.dot(omega_in) > 0.0 {
            BsdfSample {
                omega_in,
                eval: self.intensity(n, i, omega_in),
                pdf,
                label: ClosureLabel::REFLECT | ClosureLabel::DIFFUSE,
            }
        } else {
            BsdfSample::none()
        }
    }
}
