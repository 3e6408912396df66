//! Henyey-Greenstein phase function for scattering inside volumes
use std::f64::consts;

use crate::{
    shader::ShaderFlag,
    utils::{make_orthonormals, safe_sqrt, FloatExt},
    BsdfSample, ClosureLabel, Spectrum, Vec3d,
};

const ISOTROPIC_PDF: f64 = 0.25 * consts::FRAC_1_PI;

/// Single lobed phase function. `g` is the mean cosine of the scattering angle, positive values
/// scatter forward.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HenyeyGreenstein {
    pub g: f64,
}

fn single_peaked_henyey_greenstein(cos_theta: f64, g: f64) -> f64 {
    #[allow(clippy::suboptimal_flops)]
    let denom = (1.0 + g * g - 2.0 * g * cos_theta).max(0.0).powf(1.5);
    (1.0 - g * g) / denom * ISOTROPIC_PDF
}

impl HenyeyGreenstein {
    #[must_use]
    pub const fn new(g: f64) -> Self {
        Self { g }
    }

    /// Keeps the anisotropy away from a delta distribution.
    pub fn setup(&mut self) -> ShaderFlag {
        self.g = self.g.signum() * self.g.abs().min(1.0 - 1e-3);
        ShaderFlag::SCATTER
    }

    fn is_isotropic(&self) -> bool {
        self.g.abs() < 1e-3
    }

    /// Evaluates the phase for light arriving from `omega_in`, `i` points towards the viewer.
    /// Value and pdf coincide.
    #[must_use]
    pub fn eval(&self, i: Vec3d, omega_in: Vec3d) -> (Spectrum, f64) {
        let pdf = if self.is_isotropic() {
            ISOTROPIC_PDF
        } else {
            single_peaked_henyey_greenstein((-i).dot(omega_in), self.g)
        };
        (Spectrum::splat(pdf), pdf)
    }

    #[must_use]
    pub fn sample(&self, i: Vec3d, randu: f64, randv: f64) -> BsdfSample {
        let g = self.g;
        let d = -i;
        let (cos_theta, pdf) = if self.is_isotropic() {
            (2.0f64.mul_add(-randu, 1.0), ISOTROPIC_PDF)
        } else {
            #[allow(clippy::suboptimal_flops)]
            let k = (1.0 - g * g) / (1.0 - g + 2.0 * g * randu);
            #[allow(clippy::suboptimal_flops)]
            let cos_theta = (1.0 + g * g - k * k) / (2.0 * g);
            (cos_theta, single_peaked_henyey_greenstein(cos_theta, g))
        };
        let sin_theta = safe_sqrt(1.0 - cos_theta.sq());
        let (sin_phi, cos_phi) = (2.0 * consts::PI * randv).sin_cos();
        let (t, b) = make_orthonormals(d);
        let omega_in = t * (sin_theta * cos_phi) + b * (sin_theta * sin_phi) + d * cos_theta;
        BsdfSample {
            omega_in,
            eval: Spectrum::splat(pdf),
            pdf,
            label: ClosureLabel::VOLUME_SCATTER,
        }
    }
}
