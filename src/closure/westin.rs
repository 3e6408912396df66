//! Westin's empirical backscatter and sheen lobes
use std::f64::consts;

use super::Bsdf;
use crate::{
    shader::ShaderFlag,
    utils::{make_orthonormals, safe_sqrt, sample_cos_hemisphere, FloatExt},
    BsdfSample, ClosureLabel, Spectrum, Vec3d,
};

/// A glossy lobe centered around the view direction.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WestinBackscatter {
    pub roughness: f64,
    invroughness: f64,
}

impl WestinBackscatter {
    #[must_use]
    pub const fn new(roughness: f64) -> Self {
        Self {
            roughness,
            invroughness: 0.0,
        }
    }

    pub fn setup(&mut self) -> ShaderFlag {
        self.roughness = self.roughness.clamp(1e-5, 1.0);
        self.invroughness = 2.0 / self.roughness.sq();
        ShaderFlag::BSDF | ShaderFlag::BSDF_HAS_EVAL
    }

    /// Exponent of the cosine lobe
    #[must_use]
    pub const fn exponent(&self) -> f64 {
        self.invroughness
    }

    fn pdf(&self, cosine: f64) -> f64 {
        if cosine > 0.0 {
            (self.invroughness + 1.0) * cosine.powf(self.invroughness) * 0.5 * consts::FRAC_1_PI
        } else {
            0.0
        }
    }
}

impl Bsdf for WestinBackscatter {
    fn eval_reflect(&self, n: Vec3d, i: Vec3d, omega_in: Vec3d) -> (Spectrum, f64) {
        let cos_no = n.dot(i);
        let cos_ni = n.dot(omega_in);
        if cos_no > 0.0 && cos_ni > 0.0 {
            let pdf = self.pdf(i.dot(omega_in));
            (Spectrum::splat(pdf), pdf)
        } else {
            (Spectrum::ZERO, 0.0)
        }
    }

    fn sample(&self, n: Vec3d, ng: Vec3d, i: Vec3d, randu: f64, randv: f64) -> BsdfSample {
        if n.dot(i) <= 0.0 {
            return BsdfSample::none();
        }
        // cosine power distribution around the view direction
        let (t, b) = make_orthonormals(i);
        let phi = 2.0 * consts::PI * randu;
        let cos_theta = randv.powf(1.0 / (self.invroughness + 1.0));
        let sin_theta = safe_sqrt(1.0 - cos_theta.sq());
        let (sin_phi, cos_phi) = phi.sin_cos();
        let omega_in = t * (cos_phi * sin_theta) + b * (sin_phi * sin_theta) + i * cos_theta;

        if ng.dot(omega_in) <= 0.0 || n.dot(omega_in) <= 0.0 {
            return BsdfSample::none();
        }
        let pdf = self.pdf(cos_theta);
        BsdfSample {
            omega_in,
            eval: Spectrum::splat(pdf),
            pdf,
            label: ClosureLabel::REFLECT | ClosureLabel::GLOSSY,
        }
    }

    fn blur(&mut self, roughness: f64) {
        self.roughness = self.roughness.max(roughness).min(1.0);
        self.invroughness = 2.0 / self.roughness.sq();
    }
}

/// Brightens surfaces seen at grazing angles, like dust or fuzz.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WestinSheen {
    pub edginess: f64,
}

impl WestinSheen {
    #[must_use]
    pub const fn new(edginess: f64) -> Self {
        Self { edginess }
    }

    fn westin(&self, cos_no: f64, pdf: f64) -> f64 {
        let sin_no2 = 1.0 - cos_no.sq();
        if sin_no2 > 0.0 {
            sin_no2.powf(0.5 * self.edginess) * pdf
        } else {
            0.0
        }
    }
}

impl Bsdf for WestinSheen {
    fn eval_reflect(&self, n: Vec3d, i: Vec3d, omega_in: Vec3d) -> (Spectrum, f64) {
        let cos_no = n.dot(i);
        let cos_ni = n.dot(omega_in);
        if cos_no > 0.0 && cos_ni > 0.0 {
            let pdf = cos_ni * consts::FRAC_1_PI;
            (Spectrum::splat(self.westin(cos_no, pdf)), pdf)
        } else {
            (Spectrum::ZERO, 0.0)
        }
    }

    fn sample(&self, n: Vec3d, ng: Vec3d, i: Vec3d, randu: f64, randv: f64) -> BsdfSample {
        let cos_no = n.dot(i);
        if cos_no <= 0.0 {
            return BsdfSample::none();
        }
        let (omega_in, pdf) = sample_cos_hemisphere(n, randu, randv);
        if ng.dot(omega_in) <= 0.0 {
            return BsdfSample::none();
        }
        BsdfSample {
            omega_in,
            eval: Spectrum::splat(self.westin(cos_no, pdf)),
            pdf,
            label: ClosureLabel::REFLECT | ClosureLabel::DIFFUSE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{self, assert_eq_approx_abs};

    fn backscatter(roughness: f64) -> WestinBackscatter {
        let mut bsdf = WestinBackscatter::new(roughness);
        bsdf.setup();
        bsdf
    }

    #[test]
    fn peak_is_at_view_direction() {
        let bsdf = backscatter(0.5);
        let i = Vec3d::new(0.0, 0.6, 0.8);
        let (peak, _) = bsdf.eval_reflect(Vec3d::Z, i, i);
        let (off, _) = bsdf.eval_reflect(Vec3d::Z, i, Vec3d::Z);
        assert!(peak.x > off.x);
        assert_eq_approx_abs!(peak.x, (bsdf.exponent() + 1.0) * 0.5 * consts::FRAC_1_PI, 1e-9);
    }

    #[test]
    fn blur_widens() {
        let mut bsdf = backscatter(0.1);
        let before = bsdf.exponent();
        bsdf.blur(0.05);
        assert_eq!(bsdf.exponent(), before);
        bsdf.blur(0.4);
        assert!(bsdf.exponent() < before);
        assert_eq!(bsdf.roughness, 0.4);
    }

    #[test]
    fn westin_backscatter() {
        for roughness in [0.2, 0.6, 1.0] {
            let bsdf = backscatter(roughness);
            test_utils::test_bsdf_sample_eval(&bsdf);
            test_utils::test_bsdf_non_negative(&bsdf);
            test_utils::test_bsdf_grazing(&bsdf, true);
        }
    }

    #[test]
    fn westin_sheen() {
        for edginess in [0.0, 1.0, 5.0] {
            let bsdf = WestinSheen::new(edginess);
            test_utils::test_bsdf_sample_eval(&bsdf);
            test_utils::test_bsdf_non_negative(&bsdf);
            test_utils::test_bsdf_grazing(&bsdf, true);
            test_utils::test_integrate_inverse_pdf(&bsdf);
        }
    }
}
