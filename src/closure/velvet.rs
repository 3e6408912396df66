//! Ashikhmin velvet, a sheen model for cloth
use std::f64::consts;

use super::Bsdf;
use crate::{
    shader::ShaderFlag,
    utils::{sample_uniform_hemisphere, FloatExt},
    BsdfSample, ClosureLabel, Spectrum, Vec3d,
};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Velvet {
    pub sigma: f64,
    invsigma2: f64,
}

impl Velvet {
    #[must_use]
    pub const fn new(sigma: f64) -> Self {
        Self {
            sigma,
            invsigma2: 0.0,
        }
    }

    pub fn setup(&mut self) -> ShaderFlag {
        let sigma = self.sigma.max(0.01);
        self.invsigma2 = 1.0 / sigma.sq();
        ShaderFlag::BSDF | ShaderFlag::BSDF_HAS_EVAL
    }

    fn value(&self, n: Vec3d, i: Vec3d, omega_in: Vec3d) -> Option<f64> {
        let cos_no = n.dot(i);
        let cos_ni = n.dot(omega_in);
        if cos_no <= 0.0 || cos_ni <= 0.0 {
            return None;
        }
        let h = (omega_in + i).try_normalize()?;
        let cos_nh = n.dot(h);
        let cos_ho = i.dot(h).abs();
        if !(cos_nh.abs() < 1.0 - 1e-5 && cos_ho > 1e-5) {
            return None;
        }

        let cos_nh_div_ho = (cos_nh / cos_ho).max(1e-5);
        let fac1 = 2.0 * (cos_nh_div_ho * cos_no).abs();
        let fac2 = 2.0 * (cos_nh_div_ho * cos_ni).abs();

        let sin_nh2 = 1.0 - cos_nh.sq();
        let sin_nh4 = sin_nh2.sq();
        let cotangent2 = cos_nh.sq() / sin_nh2;

        let d = (-cotangent2 * self.invsigma2).exp() * self.invsigma2 * consts::FRAC_1_PI / sin_nh4;
        // heuristic shadowing, not derived from the distribution
        let g = fac1.min(fac2).min(1.0);

        Some(0.25 * (d * g) / cos_no)
    }
}

impl Bsdf for Velvet {
    fn eval_reflect(&self, n: Vec3d, i: Vec3d, omega_in: Vec3d) -> (Spectrum, f64) {
        self.value(n, i, omega_in)
            .map_or((Spectrum::ZERO, 0.0), |out| {
                (Spectrum::splat(out), 0.5 * consts::FRAC_1_PI)
            })
    }

    fn sample(&self, n: Vec3d, ng: Vec3d, i: Vec3d, randu: f64, randv: f64) -> BsdfSample {
        let (omega_in, pdf) = sample_uniform_hemisphere(n, randu, randv);
        if ng.dot(omega_in) <= 0.0 {
            return BsdfSample::none();
        }
        self.value(n, i, omega_in)
            .map_or_else(BsdfSample::none, |out| BsdfSample {
                omega_in,
                eval: Spectrum::splat(out),
                pdf,
                label: ClosureLabel::REFLECT | ClosureLabel::DIFFUSE,
            })
    }
}
