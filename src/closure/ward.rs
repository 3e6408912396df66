//! Ward's anisotropic gaussian lobe
use std::f64::consts;

use super::Bsdf;
use crate::{
    shader::ShaderFlag,
    utils::{make_orthonormals_tangent, FloatExt},
    BsdfSample, ClosureLabel, Spectrum, Vec3d,
};

/// Brushed metal and similar anisotropic highlights.
///
/// `t` is the tangent the roughness `alpha_x` is measured along.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ward {
    pub alpha_x: f64,
    pub alpha_y: f64,
    pub t: Vec3d,
}

impl Ward {
    #[must_use]
    pub const fn new(alpha_x: f64, alpha_y: f64, t: Vec3d) -> Self {
        Self {
            alpha_x,
            alpha_y,
            t,
        }
    }

    pub fn setup(&mut self) -> ShaderFlag {
        self.alpha_x = self.alpha_x.clamp(1e-5, 1.0);
        self.alpha_y = self.alpha_y.clamp(1e-5, 1.0);
        ShaderFlag::BSDF | ShaderFlag::BSDF_HAS_EVAL
    }

    /// Value and pdf for a half vector given by its projections on the local frame
    fn lobe(
        &self,
        dotx: f64,
        doty: f64,
        dotn: f64,
        oh: f64,
        cos_no: f64,
        cos_ni: f64,
    ) -> (f64, f64) {
        let exp_arg = (dotx.sq() + doty.sq()) / dotn.sq();
        let exp_val = (-exp_arg).exp();
        let norm = 4.0 * consts::PI * self.alpha_x * self.alpha_y;
        let value = cos_ni * exp_val / (norm * (cos_no * cos_ni).sqrt());
        let pdf = exp_val / (norm * oh * dotn * dotn * dotn);
        (value, pdf)
    }
}

impl Bsdf for Ward {
    fn eval_reflect(&self, n: Vec3d, i: Vec3d, omega_in: Vec3d) -> (Spectrum, f64) {
        let cos_no = n.dot(i);
        let cos_ni = n.dot(omega_in);
        if cos_ni <= 0.0 || cos_no <= 0.0 {
            return (Spectrum::ZERO, 0.0);
        }
        let Some(h) = (omega_in + i).try_normalize() else {
            return (Spectrum::ZERO, 0.0);
        };
        let (x, y) = make_orthonormals_tangent(n, self.t);
        let dotn = h.dot(n);
        let oh = h.dot(i);
        if dotn <= 0.0 || oh <= 0.0 {
            return (Spectrum::ZERO, 0.0);
        }
        let (value, pdf) = self.lobe(
            h.dot(x) / self.alpha_x,
            h.dot(y) / self.alpha_y,
            dotn,
            oh,
            cos_no,
            cos_ni,
        );
        (Spectrum::splat(value), pdf)
    }

    fn sample(&self, n: Vec3d, ng: Vec3d, i: Vec3d, randu: f64, randv: f64) -> BsdfSample {
        let cos_no = n.dot(i);
        if cos_no <= 0.0 {
            return BsdfSample::none();
        }
        let (x, y) = make_orthonormals_tangent(n, self.t);

        // quadrant aware inverse cdf of the azimuth, using
        // cos(atan(x)) = 1 / sqrt(1 + x^2) and sin(atan(x)) = x / sqrt(1 + x^2)
        let alpha_ratio = self.alpha_y / self.alpha_x;
        let tan_phi = |val: f64| alpha_ratio * (consts::FRAC_PI_2 * val).tan();
        let (cos_phi, sin_phi) = if randu < 0.25 {
            let tan_phi = tan_phi(4.0 * randu);
            let cos_phi = 1.0 / tan_phi.mul_add(tan_phi, 1.0).sqrt();
            (cos_phi, tan_phi * cos_phi)
        } else if randu < 0.5 {
            let tan_phi = tan_phi(4.0f64.mul_add(-(0.5 - randu), 1.0));
            let cos_phi = -1.0 / tan_phi.mul_add(tan_phi, 1.0).sqrt();
            (cos_phi, -tan_phi * cos_phi)
        } else if randu < 0.75 {
            let tan_phi = tan_phi(4.0 * (randu - 0.5));
            let cos_phi = -1.0 / tan_phi.mul_add(tan_phi, 1.0).sqrt();
            (cos_phi, tan_phi * cos_phi)
        } else {
            let tan_phi = tan_phi(4.0f64.mul_add(-(1.0 - randu), 1.0));
            let cos_phi = 1.0 / tan_phi.mul_add(tan_phi, 1.0).sqrt();
            (cos_phi, -tan_phi * cos_phi)
        };

        let theta_denom = cos_phi.sq() / self.alpha_x.sq() + sin_phi.sq() / self.alpha_y.sq();
        let tan_theta2 = -(1.0 - randv).ln() / theta_denom;
        let cos_theta = 1.0 / (1.0 + tan_theta2).sqrt();
        let sin_theta = tan_theta2.sqrt() * cos_theta;

        let local = Vec3d::new(sin_theta * cos_phi, sin_theta * sin_phi, cos_theta);
        let h = x * local.x + y * local.y + n * local.z;
        let oh = h.dot(i);
        if oh <= 0.0 {
            return BsdfSample::none();
        }
        let omega_in = h * (2.0 * oh) - i;
        let cos_ni = n.dot(omega_in);
        if ng.dot(omega_in) <= 0.0 || cos_ni <= 0.0 {
            return BsdfSample::none();
        }

        let (value, pdf) = self.lobe(
            local.x / self.alpha_x,
            local.y / self.alpha_y,
            local.z,
            oh,
            cos_no,
            cos_ni,
        );
        BsdfSample {
            omega_in,
            eval: Spectrum::splat(value),
            pdf,
            label: ClosureLabel::REFLECT | ClosureLabel::GLOSSY,
        }
    }

    fn blur(&mut self, roughness: f64) {
        self.alpha_x = self.alpha_x.max(roughness);
        self.alpha_y = self.alpha_y.max(roughness);
    }
}
