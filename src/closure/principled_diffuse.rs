//! Diffuse lobe of the principled model (Burley 2015) split into selectable components
use bitflags::bitflags;
use std::f64::consts;

use super::Bsdf;
use crate::{
    utils::{pow5, sample_cos_hemisphere},
    BsdfSample, ClosureLabel, Spectrum, Vec3d,
};

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct DiffuseComponents: u8 {
        /// Lambert with retro-reflection
        const FULL = 1 << 0;
        /// Fresnel weighted on both directions
        const LAMBERT = 1 << 1;
        /// Fresnel weighted on the exit direction only, for subsurface exit points
        const LAMBERT_EXIT = 1 << 2;
        const RETRO_REFLECTION = 1 << 3;
    }
}

fn schlick_fresnel(u: f64) -> f64 {
    pow5((1.0 - u).clamp(0.0, 1.0))
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PrincipledDiffuse {
    pub roughness: f64,
    pub components: DiffuseComponents,
}

impl PrincipledDiffuse {
    #[must_use]
    pub const fn new(roughness: f64, components: DiffuseComponents) -> Self {
        Self {
            roughness,
            components,
        }
    }

    fn brdf(&self, n: Vec3d, v: Vec3d, l: Vec3d) -> Spectrum {
        let n_dot_l = n.dot(l);
        if n_dot_l <= 0.0 {
            return Spectrum::ZERO;
        }
        let n_dot_v = n.dot(v);
        let fv = schlick_fresnel(n_dot_v);
        let fl = schlick_fresnel(n_dot_l);

        let mut f = 0.0;
        if self
            .components
            .intersects(DiffuseComponents::FULL | DiffuseComponents::LAMBERT)
        {
            f += (1.0 - 0.5 * fv) * (1.0 - 0.5 * fl);
        } else if self.components.contains(DiffuseComponents::LAMBERT_EXIT) {
            f += 1.0 - 0.5 * fl;
        }

        if self
            .components
            .intersects(DiffuseComponents::FULL | DiffuseComponents::RETRO_REFLECTION)
        {
            // 2 (L.H)^2 expressed without the half vector
            let lh2 = l.dot(v) + 1.0;
            let rr = self.roughness * lh2;
            #[allow(clippy::suboptimal_flops)]
            {
                f += rr * (fl + fv + fl * fv * (rr - 1.0));
            }
        }

        Spectrum::splat(consts::FRAC_1_PI * n_dot_l * f)
    }
}

impl Bsdf for PrincipledDiffuse {
    fn eval_reflect(&self, n: Vec3d, i: Vec3d, omega_in: Vec3d) -> (Spectrum, f64) {
        let cos_ni = n.dot(omega_in);
        if cos_ni > 0.0 {
            (self.brdf(n, i, omega_in), cos_ni * consts::FRAC_1_PI)
        } else {
            (Spectrum::ZERO, 0.0)
        }
    }

    fn sample(&self, n: Vec3d, ng: Vec3d, i: Vec3d, randu: f64, randv: f64) -> BsdfSample {
        let (omega_in, pdf) = sample_cos_hemisphere(n, randu, randv);
        if ng.dot(omega_in) > 0.0 {
            BsdfSample {
                omega_in,
                eval: self.brdf(n, i, omega_in),
                pdf,
                label: ClosureLabel::REFLECT | ClosureLabel::DIFFUSE,
            }
        } else {
            BsdfSample::none()
        }
    }
}
