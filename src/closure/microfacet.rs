//! GGX and Beckmann microfacet models with Smith masking
//!
//! * Walter et al., "Microfacet Models for Refraction through Rough Surfaces", EGSR 2007
//! * Heitz and d'Eon, "Importance Sampling Microfacet-Based BSDFs using the Distribution of
//!   Visible Normals", EGSR 2014
//! * Heitz, "Understanding the Masking-Shadowing Function in Microfacet-Based BRDFs", 2014
//!
//! Anisotropy is supported for reflection only. Below a roughness product of `1e-7` the models
//! turn into a perfect mirror or a perfect refraction.
use std::f64::consts;

use super::{beckmann::BeckmannSampling, Bsdf, ClosureType};
use crate::{
    shader::ShaderFlag,
    utils::{
        fresnel_dielectric, fresnel_dielectric_cos, make_orthonormals, make_orthonormals_tangent,
        safe_sqrt, FloatExt, VecExt,
    },
    BsdfSample, ClosureLabel, Spectrum, Vec3d, SINGULAR_PDF,
};

const SINGULAR_ALPHA2: f64 = 1e-7;
/// Clearcoat masking always uses a fixed roughness of 0.25.
const CLEARCOAT_ALPHA2: f64 = 0.0625;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MicrofacetDistribution {
    Ggx,
    Beckmann,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MicrofacetKind {
    /// Uncolored reflection
    Reflect,
    /// Rough refraction, reflection is left to a separate closure
    Refract,
    /// Reflection tinted from `cspec0` towards white with the dielectric Fresnel term
    Fresnel,
    /// Fresnel reflection with a GTR1 distribution scaled by the clearcoat amount
    Clearcoat,
}

/// Parameters only Fresnel tinted microfacets carry.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MicrofacetExtra {
    pub color: Spectrum,
    /// Reflectance at normal incidence
    pub cspec0: Spectrum,
    /// Fresnel color as seen from the view direction, filled in by setup.
    pub fresnel_color: Spectrum,
    pub clearcoat: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Microfacet {
    pub distribution: MicrofacetDistribution,
    pub kind: MicrofacetKind,
    pub alpha_x: f64,
    pub alpha_y: f64,
    pub ior: f64,
    /// Tangent along `alpha_x`, only read when the closure is anisotropic.
    pub t: Vec3d,
    pub extra: Option<MicrofacetExtra>,
}

/// Slopes of a visible normal for the GGX distribution with unit roughness.
#[allow(clippy::suboptimal_flops)]
fn ggx_sample_slopes(cos_theta_i: f64, sin_theta_i: f64, randu: f64, randv: f64) -> (f64, f64) {
    if cos_theta_i >= 0.99999 {
        // normal incidence
        let r = safe_sqrt(randu / (1.0 - randu));
        let (sin_phi, cos_phi) = (2.0 * consts::PI * randv).sin_cos();
        return (r * cos_phi, r * sin_phi);
    }

    let tan_theta_i = sin_theta_i / cos_theta_i;
    let g1_inv = 0.5 * (1.0 + safe_sqrt(1.0 + tan_theta_i.sq()));

    let a = 2.0 * randu * g1_inv - 1.0;
    let aa = a.sq();
    let tmp = 1.0 / (aa - 1.0);
    let b = tan_theta_i;
    let bb = b.sq();
    let d = safe_sqrt(bb * tmp.sq() - (aa - bb) * tmp);
    let slope_x_1 = b * tmp - d;
    let slope_x_2 = b * tmp + d;
    let slope_x = if a < 0.0 || slope_x_2 * tan_theta_i > 1.0 {
        slope_x_1
    } else {
        slope_x_2
    };

    let (s, v) = if randv > 0.5 {
        (1.0, 2.0 * (randv - 0.5))
    } else {
        (-1.0, 2.0 * (0.5 - randv))
    };
    let z = (v * (v * (v * 0.27385 - 0.73369) + 0.46341))
        / (v * (v * (v * 0.093073 + 0.309_420) - 1.0) + 0.597_999);
    let slope_y = s * z * safe_sqrt(1.0 + slope_x.sq());
    (slope_x, slope_y)
}

/// Rational fit of the Beckmann masking, `inv_a` is `alpha * tan(theta)`.
#[allow(clippy::suboptimal_flops)]
fn beckmann_g1_fit(inv_a: f64) -> f64 {
    if inv_a < 0.625 {
        return 1.0;
    }
    let a = 1.0 / inv_a;
    ((2.181 * a + 3.535) * a) / ((2.577 * a + 2.276) * a + 1.0)
}

/// Generalized Trowbridge-Reitz with gamma 1
#[allow(clippy::suboptimal_flops)]
fn d_gtr1(cos_m: f64, alpha: f64) -> f64 {
    if alpha >= 1.0 {
        return consts::FRAC_1_PI;
    }
    let alpha2 = alpha.sq();
    let t = 1.0 + (alpha2 - 1.0) * cos_m.sq();
    (alpha2 - 1.0) / (consts::PI * alpha2.ln() * t)
}

struct Frame {
    x: Vec3d,
    y: Vec3d,
    z: Vec3d,
}

impl Frame {
    fn to_local(&self, v: Vec3d) -> Vec3d {
        Vec3d::new(v.dot(self.x), v.dot(self.y), v.dot(self.z))
    }

    fn to_world(&self, v: Vec3d) -> Vec3d {
        self.x * v.x + self.y * v.y + self.z * v.z
    }
}

impl Microfacet {
    const fn new(
        distribution: MicrofacetDistribution,
        kind: MicrofacetKind,
        alpha_x: f64,
        alpha_y: f64,
        ior: f64,
        t: Vec3d,
        extra: Option<MicrofacetExtra>,
    ) -> Self {
        Self {
            distribution,
            kind,
            alpha_x,
            alpha_y,
            ior,
            t,
            extra,
        }
    }

    #[must_use]
    pub const fn ggx(alpha: f64) -> Self {
        Self::new(
            MicrofacetDistribution::Ggx,
            MicrofacetKind::Reflect,
            alpha,
            alpha,
            1.0,
            Vec3d::ZERO,
            None,
        )
    }

    #[must_use]
    pub const fn ggx_aniso(alpha_x: f64, alpha_y: f64, t: Vec3d) -> Self {
        Self::new(
            MicrofacetDistribution::Ggx,
            MicrofacetKind::Reflect,
            alpha_x,
            alpha_y,
            1.0,
            t,
            None,
        )
    }

    #[must_use]
    pub const fn ggx_fresnel(
        alpha_x: f64,
        alpha_y: f64,
        t: Vec3d,
        ior: f64,
        extra: MicrofacetExtra,
    ) -> Self {
        Self::new(
            MicrofacetDistribution::Ggx,
            MicrofacetKind::Fresnel,
            alpha_x,
            alpha_y,
            ior,
            t,
            Some(extra),
        )
    }

    #[must_use]
    pub const fn ggx_clearcoat(alpha: f64, ior: f64, extra: MicrofacetExtra) -> Self {
        Self::new(
            MicrofacetDistribution::Ggx,
            MicrofacetKind::Clearcoat,
            alpha,
            alpha,
            ior,
            Vec3d::ZERO,
            Some(extra),
        )
    }

    #[must_use]
    pub const fn ggx_refraction(alpha: f64, ior: f64) -> Self {
        Self::new(
            MicrofacetDistribution::Ggx,
            MicrofacetKind::Refract,
            alpha,
            alpha,
            ior,
            Vec3d::ZERO,
            None,
        )
    }

    #[must_use]
    pub const fn beckmann(alpha: f64) -> Self {
        Self::beckmann_aniso(alpha, alpha, Vec3d::ZERO)
    }

    #[must_use]
    pub const fn beckmann_aniso(alpha_x: f64, alpha_y: f64, t: Vec3d) -> Self {
        Self::new(
            MicrofacetDistribution::Beckmann,
            MicrofacetKind::Reflect,
            alpha_x,
            alpha_y,
            1.0,
            t,
            None,
        )
    }

    #[must_use]
    pub const fn beckmann_refraction(alpha: f64, ior: f64) -> Self {
        Self::new(
            MicrofacetDistribution::Beckmann,
            MicrofacetKind::Refract,
            alpha,
            alpha,
            ior,
            Vec3d::ZERO,
            None,
        )
    }

    #[must_use]
    pub const fn closure_type(&self) -> ClosureType {
        match (self.distribution, self.kind) {
            (MicrofacetDistribution::Ggx, MicrofacetKind::Reflect) => ClosureType::MicrofacetGgx,
            (MicrofacetDistribution::Ggx, MicrofacetKind::Fresnel) => {
                ClosureType::MicrofacetGgxFresnel
            }
            (MicrofacetDistribution::Ggx, MicrofacetKind::Clearcoat) => {
                ClosureType::MicrofacetGgxClearcoat
            }
            (MicrofacetDistribution::Ggx, MicrofacetKind::Refract) => {
                ClosureType::MicrofacetGgxRefraction
            }
            (MicrofacetDistribution::Beckmann, MicrofacetKind::Refract) => {
                ClosureType::MicrofacetBeckmannRefraction
            }
            (MicrofacetDistribution::Beckmann, _) => ClosureType::MicrofacetBeckmann,
        }
    }

    /// Clamps the roughness and precomputes the Fresnel color seen from `i`.
    ///
    /// Returns the capabilities and the factor the sample weight of the closure has to be scaled
    /// with.
    pub fn setup(&mut self, n: Vec3d, i: Vec3d) -> (ShaderFlag, f64) {
        self.alpha_x = self.alpha_x.clamp(1e-5, 1.0);
        let anisotropic = match self.kind {
            MicrofacetKind::Reflect => true,
            MicrofacetKind::Fresnel => self.distribution == MicrofacetDistribution::Ggx,
            MicrofacetKind::Refract | MicrofacetKind::Clearcoat => false,
        };
        self.alpha_y = if anisotropic {
            self.alpha_y.clamp(1e-5, 1.0)
        } else {
            self.alpha_x
        };
        if self.extra.is_none() && self.is_fresnel() {
            self.kind = MicrofacetKind::Reflect;
        }
        if self.distribution == MicrofacetDistribution::Beckmann && self.is_fresnel() {
            self.kind = MicrofacetKind::Reflect;
        }

        let mut fresnel_scale = 1.0;
        let fresnel = self.is_fresnel().then(|| self.fresnel_color(i, n));
        if let (Some(extra), Some(fresnel)) = (self.extra.as_mut(), fresnel) {
            extra.fresnel_color = fresnel;
            fresnel_scale = fresnel.average();
        }

        let flag = if self.kind == MicrofacetKind::Refract {
            ShaderFlag::BSDF | ShaderFlag::BSDF_HAS_EVAL | ShaderFlag::BSDF_HAS_TRANSMISSION
        } else {
            ShaderFlag::BSDF | ShaderFlag::BSDF_HAS_EVAL
        };
        (flag, fresnel_scale)
    }

    const fn is_fresnel(&self) -> bool {
        matches!(self.kind, MicrofacetKind::Fresnel | MicrofacetKind::Clearcoat)
    }

    fn is_singular(&self) -> bool {
        self.alpha_x * self.alpha_y <= SINGULAR_ALPHA2
    }

    #[allow(clippy::float_cmp)]
    fn is_isotropic(&self) -> bool {
        self.alpha_x == self.alpha_y
    }

    fn frame(&self, n: Vec3d) -> Frame {
        let (x, y) = if self.is_isotropic() {
            make_orthonormals(n)
        } else {
            make_orthonormals_tangent(n, self.t)
        };
        Frame { x, y, z: n }
    }

    /// Fresnel color for light direction `l` and microfacet normal `h`, including the clearcoat
    /// scale. White for untinted closures.
    fn fresnel_color(&self, l: Vec3d, h: Vec3d) -> Spectrum {
        let Some(extra) = self.extra.filter(|_| self.is_fresnel()) else {
            return Spectrum::ONE;
        };
        let cspec0 = extra.cspec0.saturate();
        let f0 = fresnel_dielectric_cos(1.0, self.ior);
        let fh = (fresnel_dielectric_cos(l.dot(h), self.ior) - f0) / (1.0 - f0);
        let color = cspec0 * (1.0 - fh) + Spectrum::splat(fh);
        if self.kind == MicrofacetKind::Clearcoat {
            color * (0.25 * extra.clearcoat)
        } else {
            color
        }
    }

    /// Normal distribution for the microfacet normal `m` in local coordinates
    fn distribution_value(&self, m: Vec3d) -> f64 {
        let cos2 = m.z.sq();
        if cos2 <= 0.0 {
            return 0.0;
        }
        let cos4 = cos2.sq();
        let alpha2 = self.alpha_x * self.alpha_y;
        if self.kind == MicrofacetKind::Clearcoat {
            return d_gtr1(m.z, self.alpha_x);
        }
        match (self.distribution, self.is_isotropic()) {
            (MicrofacetDistribution::Ggx, true) => {
                let tan2 = (1.0 - cos2) / cos2;
                alpha2 / (consts::PI * cos4 * (alpha2 + tan2).sq())
            }
            (MicrofacetDistribution::Ggx, false) => {
                let slope_x = -m.x / (m.z * self.alpha_x);
                let slope_y = -m.y / (m.z * self.alpha_y);
                let slope_len = 1.0 + slope_x.sq() + slope_y.sq();
                1.0 / (slope_len.sq() * consts::PI * alpha2 * cos4)
            }
            (MicrofacetDistribution::Beckmann, true) => {
                let tan2 = (1.0 - cos2) / cos2;
                (-tan2 / alpha2).exp() / (consts::PI * alpha2 * cos4)
            }
            (MicrofacetDistribution::Beckmann, false) => {
                let slope_x = -m.x / (m.z * self.alpha_x);
                let slope_y = -m.y / (m.z * self.alpha_y);
                (-slope_x.sq() - slope_y.sq()).exp() / (consts::PI * alpha2 * cos4)
            }
        }
    }

    /// Squared roughness projected onto the azimuth of the local direction `v`
    fn projected_alpha2(&self, v: Vec3d) -> f64 {
        if self.kind == MicrofacetKind::Clearcoat {
            return CLEARCOAT_ALPHA2;
        }
        let alpha2 = self.alpha_x * self.alpha_y;
        if self.is_isotropic() {
            return alpha2;
        }
        let cos_phi2 = v.x.sq();
        let sin_phi2 = v.y.sq();
        let denom = cos_phi2 + sin_phi2;
        if denom <= 0.0 {
            return alpha2;
        }
        (cos_phi2 * self.alpha_x.sq() + sin_phi2 * self.alpha_y.sq()) / denom
    }

    /// Smith masking of the local direction `v`
    fn masking(&self, v: Vec3d) -> f64 {
        let cos2 = v.z.sq();
        if cos2 <= 0.0 {
            return 0.0;
        }
        let tan2 = (1.0 - cos2) / cos2;
        let alpha2 = self.projected_alpha2(v);
        match self.distribution {
            MicrofacetDistribution::Ggx => 2.0 / (1.0 + safe_sqrt(alpha2.mul_add(tan2, 1.0))),
            MicrofacetDistribution::Beckmann => beckmann_g1_fit(safe_sqrt(alpha2 * tan2)),
        }
    }

    /// Samples a visible normal for the local view direction by stretching the configuration to
    /// unit roughness.
    fn sample_visible_normal(
        &self,
        beckmann: BeckmannSampling<'_>,
        local_i: Vec3d,
        randu: f64,
        randv: f64,
    ) -> Vec3d {
        let stretched = Vec3d::new(self.alpha_x * local_i.x, self.alpha_y * local_i.y, local_i.z)
            .normalize();

        let (cos_theta, sin_theta, cos_phi, sin_phi) = if stretched.z < 0.99999 {
            let sin_theta = safe_sqrt(1.0 - stretched.z.sq());
            (
                stretched.z,
                sin_theta,
                stretched.x / sin_theta,
                stretched.y / sin_theta,
            )
        } else {
            (1.0, 0.0, 1.0, 0.0)
        };

        let (slope_x, slope_y) = match self.distribution {
            MicrofacetDistribution::Ggx => ggx_sample_slopes(cos_theta, sin_theta, randu, randv),
            MicrofacetDistribution::Beckmann => {
                beckmann.sample_slopes(cos_theta, sin_theta, randu, randv)
            }
        };

        // rotate back to the azimuth of the view direction, then unstretch
        #[allow(clippy::suboptimal_flops)]
        let rotated_x = cos_phi * slope_x - sin_phi * slope_y;
        #[allow(clippy::suboptimal_flops)]
        let rotated_y = sin_phi * slope_x + cos_phi * slope_y;
        Vec3d::new(-self.alpha_x * rotated_x, -self.alpha_y * rotated_y, 1.0).normalize()
    }

    /// Samples with the given strategy for Beckmann slopes.
    #[must_use]
    pub fn sample_with(
        &self,
        beckmann: BeckmannSampling<'_>,
        n: Vec3d,
        ng: Vec3d,
        i: Vec3d,
        randu: f64,
        randv: f64,
    ) -> BsdfSample {
        let cos_no = n.dot(i);
        if cos_no <= 0.0 {
            return BsdfSample::none();
        }
        let frame = self.frame(n);
        let local_i = frame.to_local(i);
        let local_m = self.sample_visible_normal(beckmann, local_i, randu, randv);
        let m = frame.to_world(local_m);

        if self.kind == MicrofacetKind::Refract {
            return self.sample_refraction(&frame, local_i, local_m, m, i);
        }

        let cos_mo = m.dot(i);
        if cos_mo <= 0.0 {
            return BsdfSample::none();
        }
        let omega_in = m * (2.0 * cos_mo) - i;
        if ng.dot(omega_in) <= 0.0 {
            return BsdfSample::none();
        }

        if self.is_singular() {
            return BsdfSample {
                omega_in,
                eval: self.fresnel_color(omega_in, m) * SINGULAR_PDF,
                pdf: SINGULAR_PDF,
                label: ClosureLabel::REFLECT | ClosureLabel::SINGULAR,
            };
        }

        let local_in = frame.to_local(omega_in);
        if local_in.z <= 0.0 {
            return BsdfSample::none();
        }
        let d = self.distribution_value(local_m);
        let g1o = self.masking(local_i);
        let g1i = self.masking(local_in);
        let common = g1o * d * 0.25 / cos_no;
        BsdfSample {
            omega_in,
            eval: self.fresnel_color(omega_in, m) * (g1i * common),
            pdf: common,
            label: ClosureLabel::REFLECT | ClosureLabel::GLOSSY,
        }
    }

    fn sample_refraction(
        &self,
        frame: &Frame,
        local_i: Vec3d,
        local_m: Vec3d,
        m: Vec3d,
        i: Vec3d,
    ) -> BsdfSample {
        let eta = self.ior;
        let split = fresnel_dielectric(eta, m, i);
        #[allow(clippy::float_cmp)]
        if split.inside || split.fresnel == 1.0 {
            return BsdfSample::none();
        }
        let omega_in = split.transmitted;

        if self.is_singular() || (eta - 1.0).abs() < 1e-4 {
            return BsdfSample {
                omega_in,
                eval: Spectrum::splat(SINGULAR_PDF),
                pdf: SINGULAR_PDF,
                label: ClosureLabel::TRANSMIT | ClosureLabel::SINGULAR,
            };
        }

        let local_in = frame.to_local(omega_in);
        if local_in.z >= 0.0 {
            return BsdfSample::none();
        }
        let d = self.distribution_value(local_m);
        let g1o = self.masking(local_i);
        let g1i = self.masking(local_in);

        let cos_hi = m.dot(omega_in);
        let cos_ho = m.dot(i);
        let ht2 = eta.mul_add(cos_hi, cos_ho).sq();
        let common = (g1o * d) * eta.sq() / (local_i.z * ht2);
        let out = g1i * (cos_hi * cos_ho).abs() * common;
        BsdfSample {
            omega_in,
            eval: Spectrum::splat(out),
            pdf: cos_ho * cos_hi.abs() * common,
            label: ClosureLabel::TRANSMIT | ClosureLabel::GLOSSY,
        }
    }
}

impl Bsdf for Microfacet {
    fn eval_reflect(&self, n: Vec3d, i: Vec3d, omega_in: Vec3d) -> (Spectrum, f64) {
        if self.kind == MicrofacetKind::Refract || self.is_singular() {
            return (Spectrum::ZERO, 0.0);
        }
        let cos_no = n.dot(i);
        let cos_ni = n.dot(omega_in);
        if cos_no <= 0.0 || cos_ni <= 0.0 {
            return (Spectrum::ZERO, 0.0);
        }
        let Some(m) = (omega_in + i).try_normalize() else {
            return (Spectrum::ZERO, 0.0);
        };
        let frame = self.frame(n);
        let d = self.distribution_value(frame.to_local(m));
        let g1o = self.masking(frame.to_local(i));
        let g1i = self.masking(frame.to_local(omega_in));

        let common = d * 0.25 / cos_no;
        let out = self.fresnel_color(omega_in, m) * (g1o * g1i * common);
        (out, g1o * common)
    }

    fn eval_transmit(&self, n: Vec3d, i: Vec3d, omega_in: Vec3d) -> (Spectrum, f64) {
        if self.kind != MicrofacetKind::Refract || self.is_singular() {
            return (Spectrum::ZERO, 0.0);
        }
        let cos_no = n.dot(i);
        let cos_ni = n.dot(omega_in);
        if cos_no <= 0.0 || cos_ni >= 0.0 {
            return (Spectrum::ZERO, 0.0);
        }
        let eta = self.ior;
        let ht = -(omega_in * eta + i);
        let Some(m) = ht.try_normalize() else {
            return (Spectrum::ZERO, 0.0);
        };
        let cos_ho = m.dot(i);
        let cos_hi = m.dot(omega_in);

        let frame = self.frame(n);
        let d = self.distribution_value(frame.to_local(m));
        let g1o = self.masking(frame.to_local(i));
        let g1i = self.masking(frame.to_local(omega_in));

        let common = d * eta.sq() / (cos_no * ht.length_squared());
        let out = g1o * g1i * (cos_hi * cos_ho).abs() * common;
        let pdf = g1o * (cos_ho * cos_hi).abs() * common;
        (Spectrum::splat(out), pdf)
    }

    fn sample(&self, n: Vec3d, ng: Vec3d, i: Vec3d, randu: f64, randv: f64) -> BsdfSample {
        self.sample_with(BeckmannSampling::Analytic, n, ng, i, randu, randv)
    }

    fn blur(&mut self, roughness: f64) {
        self.alpha_x = self.alpha_x.max(roughness);
        self.alpha_y = self.alpha_y.max(roughness);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        closure::beckmann::BeckmannTable,
        test_utils::{self, assert_eq_approx, assert_eq_approx_abs},
    };

    fn setup(mut bsdf: Microfacet, i: Vec3d) -> Microfacet {
        bsdf.setup(Vec3d::Z, i);
        bsdf
    }

    fn extra(cspec0: Spectrum, clearcoat: f64) -> MicrofacetExtra {
        MicrofacetExtra {
            color: Spectrum::ONE,
            cspec0,
            fresnel_color: Spectrum::ZERO,
            clearcoat,
        }
    }

    #[test]
    fn clamping_is_idempotent() {
        let mut bsdf = Microfacet::ggx_aniso(0.0, 3.0, Vec3d::X);
        bsdf.setup(Vec3d::Z, Vec3d::Z);
        assert_eq!((bsdf.alpha_x, bsdf.alpha_y), (1e-5, 1.0));
        let once = bsdf;
        bsdf.setup(Vec3d::Z, Vec3d::Z);
        assert_eq!(once, bsdf);

        // isotropic variants mirror alpha_x
        let mut bsdf = Microfacet::ggx_refraction(0.3, 1.5);
        bsdf.alpha_y = 0.9;
        bsdf.setup(Vec3d::Z, Vec3d::Z);
        assert_eq!(bsdf.alpha_y, 0.3);
    }

    #[test]
    fn mirror_limit_is_singular() {
        let bsdf = setup(Microfacet::ggx(0.0), Vec3d::Z);
        let i = Vec3d::new(0.0, 0.6, 0.8);
        let sample = bsdf.sample(Vec3d::Z, Vec3d::Z, i, 0.3, 0.7);
        assert_eq!(sample.label, ClosureLabel::REFLECT | ClosureLabel::SINGULAR);
        assert_eq!(sample.pdf, SINGULAR_PDF);
        assert_eq_approx_abs!(sample.omega_in, Vec3d::new(0.0, -0.6, 0.8), Vec3d::splat(1e-3));
        assert_eq!(bsdf.eval_reflect(Vec3d::Z, i, sample.omega_in), (Spectrum::ZERO, 0.0));
    }

    #[test]
    fn blur_never_sharpens() {
        let mut bsdf = setup(Microfacet::ggx_aniso(0.2, 0.5, Vec3d::X), Vec3d::Z);
        bsdf.blur(0.3);
        assert_eq!((bsdf.alpha_x, bsdf.alpha_y), (0.3, 0.5));
        bsdf.blur(0.1);
        assert_eq!((bsdf.alpha_x, bsdf.alpha_y), (0.3, 0.5));
    }

    #[test]
    fn reflect_and_refract_are_exclusive() {
        let refraction = setup(Microfacet::ggx_refraction(0.4, 1.5), Vec3d::Z);
        let reflection = setup(Microfacet::ggx(0.4), Vec3d::Z);
        let i = Vec3d::new(0.0, 0.6, 0.8);
        let up = Vec3d::new(0.0, -0.6, 0.8);
        let down = Vec3d::new(0.0, -0.3, -0.9).normalize();
        assert_eq!(refraction.eval_reflect(Vec3d::Z, i, up).1, 0.0);
        assert!(refraction.eval_transmit(Vec3d::Z, i, down).1 > 0.0);
        assert_eq!(reflection.eval_transmit(Vec3d::Z, i, down).1, 0.0);
        assert!(reflection.eval_reflect(Vec3d::Z, i, up).1 > 0.0);
    }

    #[test]
    fn fresnel_color_scales_sample_weight() {
        let i = Vec3d::new(0.0, 0.6, 0.8);
        let tint = extra(Spectrum::splat(0.5), 0.0);
        let mut bsdf = Microfacet::ggx_fresnel(0.3, 0.3, Vec3d::X, 1.5, tint);
        let (_, scale) = bsdf.setup(Vec3d::Z, i);
        let fresnel = bsdf.extra.map(|e| e.fresnel_color).unwrap_or_default();
        assert_eq_approx_abs!(scale, fresnel.average(), 1e-12);
        assert!(scale > 0.5 && scale < 1.0);

        let mut coat = Microfacet::ggx_clearcoat(0.1, 1.5, extra(Spectrum::splat(0.04), 1.0));
        let (_, coat_scale) = coat.setup(Vec3d::Z, i);
        assert!(coat_scale < 0.25);
    }

    #[test]
    fn missing_extra_falls_back_to_plain_reflection() {
        let mut bsdf = Microfacet::ggx(0.3);
        bsdf.kind = MicrofacetKind::Fresnel;
        let (_, scale) = bsdf.setup(Vec3d::Z, Vec3d::Z);
        assert_eq!(scale, 1.0);
        assert_eq!(bsdf.closure_type(), ClosureType::MicrofacetGgx);
    }

    #[test]
    fn ggx_reflection() {
        for alpha in [0.05, 0.3, 0.8] {
            let bsdf = setup(Microfacet::ggx(alpha), Vec3d::Z);
            test_utils::test_bsdf_sample_eval(&bsdf);
            test_utils::test_bsdf_reciprocity(&bsdf);
            test_utils::test_bsdf_non_negative(&bsdf);
            test_utils::test_bsdf_grazing(&bsdf, true);
            test_utils::test_bsdf_energy_bound(&bsdf);
        }
    }

    #[test]
    fn ggx_anisotropic() {
        for (ax, ay) in [(0.1, 0.5), (0.7, 0.2)] {
            let bsdf = setup(Microfacet::ggx_aniso(ax, ay, Vec3d::new(1.0, 1.0, 0.0)), Vec3d::Z);
            test_utils::test_bsdf_sample_eval(&bsdf);
            test_utils::test_bsdf_reciprocity(&bsdf);
            test_utils::test_bsdf_non_negative(&bsdf);
        }
    }

    #[test]
    fn ggx_fresnel_and_clearcoat() {
        let i = Vec3d::new(0.3, 0.0, 0.9).normalize();
        let orange = extra(Spectrum::new(0.9, 0.5, 0.1), 0.0);
        let fresnel = setup(Microfacet::ggx_fresnel(0.3, 0.3, Vec3d::X, 1.45, orange), i);
        let coat = setup(
            Microfacet::ggx_clearcoat(0.2, 1.5, extra(Spectrum::splat(0.04), 1.0)),
            i,
        );
        for bsdf in [fresnel, coat] {
            test_utils::test_bsdf_sample_eval(&bsdf);
            test_utils::test_bsdf_non_negative(&bsdf);
            test_utils::test_bsdf_energy_bound(&bsdf);
        }
    }

    #[test]
    fn ggx_refraction() {
        for (alpha, ior) in [(0.2, 1.5), (0.5, 1.33), (0.3, 1.0 / 1.5)] {
            let bsdf = setup(Microfacet::ggx_refraction(alpha, ior), Vec3d::Z);
            test_utils::test_bsdf_sample_eval(&bsdf);
            test_utils::test_bsdf_non_negative(&bsdf);
        }
    }

    #[test]
    fn beckmann_reflection() {
        for alpha in [0.1, 0.4, 0.9] {
            let bsdf = setup(Microfacet::beckmann(alpha), Vec3d::Z);
            test_utils::test_bsdf_sample_eval(&bsdf);
            test_utils::test_bsdf_reciprocity(&bsdf);
            test_utils::test_bsdf_non_negative(&bsdf);
            test_utils::test_bsdf_grazing(&bsdf, true);
        }
        let bsdf = setup(Microfacet::beckmann_aniso(0.2, 0.6, Vec3d::Y), Vec3d::Z);
        test_utils::test_bsdf_sample_eval(&bsdf);
        test_utils::test_bsdf_non_negative(&bsdf);
    }

    #[test]
    fn beckmann_refraction() {
        let bsdf = setup(Microfacet::beckmann_refraction(0.3, 1.5), Vec3d::Z);
        test_utils::test_bsdf_sample_eval(&bsdf);
        test_utils::test_bsdf_non_negative(&bsdf);
    }

    #[test]
    fn beckmann_table_sampling_matches_eval() {
        let table = BeckmannTable::new();
        let bsdf = setup(Microfacet::beckmann(0.35), Vec3d::Z);
        let mut rd = fastrand::Rng::with_seed(11);
        let mut valid = 0;
        for _ in 0..5000 {
            let i = test_utils::view_sample(&mut rd);
            let sample = bsdf.sample_with(
                BeckmannSampling::Table(&table),
                Vec3d::Z,
                Vec3d::Z,
                i,
                rd.f64(),
                rd.f64(),
            );
            if !sample.is_valid() {
                continue;
            }
            valid += 1;
            let (value, pdf) = bsdf.eval_reflect(Vec3d::Z, i, sample.omega_in);
            assert_eq_approx!(sample.pdf, pdf, 0.01, 0.003);
            assert_eq_approx!(sample.eval, value, Spectrum::splat(0.001), Spectrum::splat(0.001));
        }
        assert!(valid > 1000);
    }

    #[test]
    fn index_matched_refraction_is_singular() {
        let bsdf = setup(Microfacet::ggx_refraction(0.5, 1.0), Vec3d::Z);
        let sample = bsdf.sample(Vec3d::Z, Vec3d::Z, Vec3d::new(0.0, 0.6, 0.8), 0.5, 0.5);
        assert_eq!(sample.label, ClosureLabel::TRANSMIT | ClosureLabel::SINGULAR);
    }
}
