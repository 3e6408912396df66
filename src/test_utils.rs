use crate::Vec3d;

pub trait ApproxEqual: Copy {
    fn equals_approx(self, other: Self, eps: Self, eps_rel: Self) -> bool;
    fn equals_approx_abs(self, other: Self, eps: Self) -> bool;
    fn equals_approx_rel(self, other: Self, eps: Self) -> bool;
}

macro_rules! assert_eq_approx {
    ($lhs:expr, $rhs:expr, $eps_abs:expr, $eps_rel:expr) => {
        assert!(
            $crate::test_utils::ApproxEqual::equals_approx($lhs, $rhs, $eps_abs, $eps_rel),
            r#"assert_eq_abs failed:
    {}: {:?}
    {}: {:?}
    {} (maximum absolute error): {:?}
    {} (maximum relative error): {:?}"#,
            stringify!($lhs),
            $lhs,
            stringify!($rhs),
            $rhs,
            stringify!($eps_abs),
            $eps_abs,
            stringify!($eps_rel),
            $eps_rel,
        );
    };

    ($lhs:expr, $rhs:expr, $eps_abs: expr, $eps_rel:expr, $($arg:tt)+) => {
        assert!($crate::test_utils::ApproxEqual::equals_approx($lhs, $rhs, $eps_abs, $eps_rel), $($arg)*);
    }
}

macro_rules! assert_eq_approx_abs {
    ($lhs:expr, $rhs:expr, $eps_abs:expr) => {
        assert!(
            $crate::test_utils::ApproxEqual::equals_approx_abs($lhs, $rhs, $eps_abs),
            r#"assert_eq_abs failed:
    {}: {:?}
    {}: {:?}
    {} (maximum absolute error): {:?}"#,
            stringify!($lhs),
            $lhs,
            stringify!($rhs),
            $rhs,
            stringify!($eps_abs),
            $eps_abs,
        )
    };

    ($lhs:expr, $rhs:expr, $eps_abs:expr, $($arg:tt)+) => {
        assert!($crate::test_utils::ApproxEqual::equals_approx_abs($lhs, $rhs, $eps_abs),
        $($arg)*);
    };
}

macro_rules! assert_in_range {
    ($value:expr, $lower:expr, $upper:expr) => {
        assert!(
            $lower <= $value && $value <= $upper,
            r#"assert_in_range failed:
    {} (value): {:?}
    {} (lower bound): {:?}
    {} (upper bound): {:?}"#,
            stringify!($value),
            $value,
            stringify!($lower),
            $lower,
            stringify!($upper),
            $upper
        )
    };
}

macro_rules! impl_approx_equal {
    ($scalar:ty, $vector:ty) => {
        impl ApproxEqual for $scalar {
            fn equals_approx(self, other: Self, eps: Self, eps_rel: Self) -> bool {
                #[allow(clippy::float_cmp)]
                if self == other || (self - other).abs() <= eps {
                    true
                } else {
                    let diff = (self - other).abs();
                    let max = self.abs().max(other.abs());
                    diff <= max * eps_rel
                }
            }

            fn equals_approx_abs(self, other: Self, eps: Self) -> bool {
                #[allow(clippy::float_cmp)]
                if self == other {
                    true
                } else {
                    (self - other).abs() <= eps
                }
            }

            fn equals_approx_rel(self, other: Self, eps: Self) -> bool {
                #[allow(clippy::float_cmp)]
                if self == other {
                    return true;
                }
                let diff = (self - other).abs();
                let max = self.abs().max(other.abs());
                diff <= max * eps
            }
        }

        impl ApproxEqual for $vector {
            fn equals_approx_rel(self, other: Self, eps: Self) -> bool {
                $crate::test_utils::ApproxEqual::equals_approx_rel(self.x, other.x, eps.x)
                    && $crate::test_utils::ApproxEqual::equals_approx_rel(self.y, other.y, eps.y)
                    && $crate::test_utils::ApproxEqual::equals_approx_rel(self.z, other.z, eps.z)
            }
            fn equals_approx_abs(self, other: Self, eps: Self) -> bool {
                $crate::test_utils::ApproxEqual::equals_approx_abs(self.x, other.x, eps.x)
                    && $crate::test_utils::ApproxEqual::equals_approx_abs(self.y, other.y, eps.y)
                    && $crate::test_utils::ApproxEqual::equals_approx_abs(self.z, other.z, eps.z)
            }
            fn equals_approx(self, other: Self, eps_abs: Self, eps_rel: Self) -> bool {
                $crate::test_utils::ApproxEqual::equals_approx(
                    self.x, other.x, eps_abs.x, eps_rel.x,
                ) && $crate::test_utils::ApproxEqual::equals_approx(
                    self.y, other.y, eps_abs.y, eps_rel.y,
                ) && $crate::test_utils::ApproxEqual::equals_approx(
                    self.z, other.z, eps_abs.z, eps_rel.z,
                )
            }
        }
    };
}

impl_approx_equal!(f64, Vec3d);

pub(crate) use assert_eq_approx;
pub(crate) use assert_eq_approx_abs;
pub(crate) use assert_in_range;

use std::f64::consts;

use crate::{
    closure::Bsdf,
    utils::{FloatExt, VecExt},
    ClosureLabel, Spectrum,
};

pub trait SamplerExt {
    fn vec3d(&mut self) -> Vec3d;
}

impl SamplerExt for fastrand::Rng {
    fn vec3d(&mut self) -> Vec3d {
        Vec3d::new(self.f64(), self.f64(), self.f64())
    }
}

/** sample a direction with density 1 / 4pi */
pub fn spherical_sample(rd: &mut fastrand::Rng) -> Vec3d {
    let u = rd.f64();
    let v = rd.f64();
    spherical_sample_uv(u, v)
}

fn spherical_sample_uv(u: f64, v: f64) -> Vec3d {
    #[allow(clippy::suboptimal_flops)]
    let cos_theta = 2.0 * u - 1.0;
    #[allow(clippy::suboptimal_flops)]
    let sin_theta = (1.0 - cos_theta * cos_theta).sqrt();
    let phi = v * 2.0 * consts::PI;
    let (sin_phi, cos_phi) = phi.sin_cos();
    Vec3d::new(sin_theta * sin_phi, sin_theta * cos_phi, cos_theta)
}

/// A view direction in the upper hemisphere around `z`, away from grazing angles
pub fn view_sample(rd: &mut fastrand::Rng) -> Vec3d {
    loop {
        let v = spherical_sample(rd);
        if v.z > 0.05 {
            return v;
        }
    }
}

/// Evaluates in the hemisphere `omega_in` lies in, relative to the `z` normal
pub fn eval_any<T: Bsdf>(bsdf: &T, i: Vec3d, omega_in: Vec3d) -> (Spectrum, f64) {
    if omega_in.z >= 0.0 {
        bsdf.eval_reflect(Vec3d::Z, i, omega_in)
    } else {
        bsdf.eval_transmit(Vec3d::Z, i, omega_in)
    }
}

/// Samples directions and checks that evaluating them again reproduces value and pdf.
pub fn test_bsdf_sample_eval<T: Bsdf>(bsdf: &T) {
    let mut rd = fastrand::Rng::new();
    let runs = 10000;
    let mut valid = 0;
    for _ in 0..runs {
        let i = view_sample(&mut rd);
        let sample = bsdf.sample(Vec3d::Z, Vec3d::Z, i, rd.f64(), rd.f64());
        if !sample.is_valid() {
            continue;
        }
        valid += 1;
        assert!(
            !sample.label.contains(ClosureLabel::SINGULAR),
            "singular sample from a closure with an eval"
        );
        let omega_in = sample.omega_in;
        let (c_eval, c_pdf) = eval_any(bsdf, i, omega_in);
        let pdf = sample.pdf;
        assert_eq_approx!(
            pdf,
            c_pdf,
            0.01,
            0.003,
            r#"
    PDFs must be equal for sample and eval,
    pdf: {pdf},
    c_pdf: {c_pdf},
    i: {i:?},
    omega_in: {omega_in:?}"#
        );
        assert_eq_approx!(
            sample.eval,
            c_eval,
            Spectrum::splat(0.001),
            Spectrum::splat(0.001)
        );

        assert!(pdf >= 0.0);
        assert!(sample.eval.min_element() >= 0.0);
    }
    assert!(valid > runs / 10, "only {valid} of {runs} samples succeeded");
}

/// Random direction pairs never produce negative or non finite results.
pub fn test_bsdf_non_negative<T: Bsdf>(bsdf: &T) {
    let mut rd = fastrand::Rng::new();
    for _ in 0..10000 {
        let i = spherical_sample(&mut rd);
        let omega_in = spherical_sample(&mut rd);
        for (value, pdf) in [
            bsdf.eval_reflect(Vec3d::Z, i, omega_in),
            bsdf.eval_transmit(Vec3d::Z, i, omega_in),
        ] {
            assert!(pdf >= 0.0 && pdf.is_finite(), "pdf: {pdf}");
            assert!(value.is_finite(), "value: {value:?}");
            assert!(value.min_element() >= 0.0, "value: {value:?}");
        }
    }
}

/// Grazing light directions give exactly zero. With `check_view` grazing view directions must
/// as well.
pub fn test_bsdf_grazing<T: Bsdf>(bsdf: &T, check_view: bool) {
    let mut rd = fastrand::Rng::new();
    for _ in 0..1000 {
        let phi = rd.f64() * 2.0 * consts::PI;
        let grazing = Vec3d::new(phi.cos(), phi.sin(), 0.0);
        let other = view_sample(&mut rd);
        let pairs = if check_view {
            vec![(other, grazing), (grazing, other)]
        } else {
            vec![(other, grazing)]
        };
        for (i, omega_in) in pairs {
            let (value, pdf) = bsdf.eval_reflect(Vec3d::Z, i, omega_in);
            assert_eq!(value, Spectrum::ZERO, "i: {i:?}, omega_in: {omega_in:?}");
            assert_eq!(pdf, 0.0);
        }
    }
}

/// Grazing and zero length directions never give negative or non finite results, and a sample
/// that succeeds still points somewhere unless it passes straight through.
pub fn test_bsdf_degenerate<T: Bsdf>(bsdf: &T) {
    let mut rd = fastrand::Rng::new();
    for _ in 0..1000 {
        let phi = rd.f64() * 2.0 * consts::PI;
        let grazing = Vec3d::new(phi.cos(), phi.sin(), 0.0);
        let other = view_sample(&mut rd);
        for (i, omega_in) in [
            (other, grazing),
            (grazing, other),
            (other, Vec3d::ZERO),
            (Vec3d::ZERO, other),
        ] {
            for (value, pdf) in [
                bsdf.eval_reflect(Vec3d::Z, i, omega_in),
                bsdf.eval_transmit(Vec3d::Z, i, omega_in),
            ] {
                assert!(pdf >= 0.0 && pdf.is_finite(), "pdf: {pdf}");
                assert!(value.is_finite(), "value: {value:?}");
                assert!(value.min_element() >= 0.0, "value: {value:?}");
            }
        }
        for i in [grazing, Vec3d::ZERO] {
            let sample = bsdf.sample(Vec3d::Z, Vec3d::Z, i, rd.f64(), rd.f64());
            if !sample.is_valid() {
                continue;
            }
            assert!(sample.pdf.is_finite(), "pdf: {}", sample.pdf);
            assert!(sample.eval.is_finite(), "eval: {:?}", sample.eval);
            assert!(sample.eval.min_element() >= 0.0, "eval: {:?}", sample.eval);
            assert!(sample.omega_in.is_finite(), "omega_in: {:?}", sample.omega_in);
            if !sample.label.contains(ClosureLabel::TRANSPARENT) {
                assert!(sample.omega_in.length_squared() > 0.0, "i: {i:?}");
            }
        }
    }
}

pub fn test_bsdf_reciprocity<T: Bsdf>(bsdf: &T) {
    let mut rd = fastrand::Rng::new();
    let runs = 10000;
    for _i in 0..runs {
        let i = view_sample(&mut rd);
        let omega_in = view_sample(&mut rd);

        let (c_value, _) = bsdf.eval_reflect(Vec3d::Z, i, omega_in);
        let (r_value, _) = bsdf.eval_reflect(Vec3d::Z, omega_in, i);

        // the value carries the cosine of the incoming direction
        let c_bsdf = c_value / omega_in.z;
        let r_bsdf = r_value / i.z;
        assert_eq_approx!(c_bsdf, r_bsdf, Spectrum::splat(0.001), Spectrum::splat(0.0001));
    }
}

/// Monte Carlo estimate of the integral of the pdf over the sphere, which must approach one.
/// Only meaningful for closures whose sampling never fails.
#[allow(clippy::cast_lossless)]
pub fn test_integrate_inverse_pdf<T: Bsdf>(bsdf: &T) {
    const DOMAIN: f64 = 4.0 * std::f64::consts::PI;

    let mut rd = fastrand::Rng::new();
    let runs = 20;
    let num_samples = 200_000;
    for i in 0..runs {
        let view = view_sample(&mut rd);
        let mut sum = 0.0;
        let mut sum_of_squared = 0.0;
        for _ in 0..num_samples {
            let spheric_pdf = 1.0 / DOMAIN;
            let pdf_bsdf = if rd.f32() > 0.5 {
                let sample = bsdf.sample(Vec3d::Z, Vec3d::Z, view, rd.f64(), rd.f64());
                assert!(sample.is_valid(), "sampling failed for view {view:?}");
                eval_any(bsdf, view, sample.omega_in).1
            } else {
                let omega_in = spherical_sample(&mut rd);
                eval_any(bsdf, view, omega_in).1
            };
            #[allow(clippy::suboptimal_flops)]
            let pdf = 0.5 * spheric_pdf + 0.5 * pdf_bsdf;
            let value = 1.0 / pdf;
            sum += value;
            sum_of_squared += value.sq();
        }
        sum /= DOMAIN * num_samples as f64;
        sum_of_squared /= DOMAIN.sq() * (num_samples) as f64;
        let variance_unscaled = sum_of_squared - sum.sq();

        let sample_standard_deviation =
            ((num_samples as f64) / (num_samples - 1) as f64 * variance_unscaled).sqrt();
        let standard_error = sample_standard_deviation / (num_samples as f64).sqrt();

        let confidence_thres = (4.0 * standard_error).max(0.01);
        assert_eq_approx_abs!(
            sum,
            1.0,
            confidence_thres,
            r#"
    expected the monte carlo test to approach 1.
    But it approached {sum} after {num_samples} Samples with a standard error of {standard_error}.
    view: {view:?}
    i: {i}"#
        );
    }
}

/// Estimates the directional albedo and checks it stays below `1 + tolerance`.
#[allow(clippy::cast_lossless)]
pub fn test_bsdf_energy_bound<T: Bsdf>(bsdf: &T) {
    let mut rd = fastrand::Rng::new();
    let num_samples = 50_000;
    for _ in 0..20 {
        let i = view_sample(&mut rd);
        let mut sum = Spectrum::ZERO;
        for _ in 0..num_samples {
            let sample = bsdf.sample(Vec3d::Z, Vec3d::Z, i, rd.f64(), rd.f64());
            if sample.is_valid() {
                sum += sample.eval / sample.pdf;
            }
        }
        sum /= num_samples as f64;
        assert_in_range!(sum.luminance(), 0.0, 1.03);
    }
}
