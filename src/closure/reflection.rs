//! Perfect mirror reflection
use super::Bsdf;
use crate::{BsdfSample, ClosureLabel, Spectrum, Vec3d, SINGULAR_PDF};

/// A delta distribution, so it can only be sampled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Reflection;

impl Bsdf for Reflection {
    fn sample(&self, n: Vec3d, ng: Vec3d, i: Vec3d, _randu: f64, _randv: f64) -> BsdfSample {
        let cos_no = n.dot(i);
        if cos_no <= 0.0 {
            return BsdfSample::none();
        }
        let omega_in = n * (2.0 * cos_no) - i;
        if ng.dot(omega_in) <= 0.0 {
            return BsdfSample::none();
        }
        BsdfSample {
            omega_in,
            eval: Spectrum::splat(SINGULAR_PDF),
            pdf: SINGULAR_PDF,
            label: ClosureLabel::REFLECT | ClosureLabel::SINGULAR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{self, assert_eq_approx_abs};

    #[test]
    fn mirrors_the_view() {
        let i = Vec3d::new(0.6, 0.0, 0.8);
        let s = Reflection.sample(Vec3d::Z, Vec3d::Z, i, 0.1, 0.9);
        assert_eq_approx_abs!(s.omega_in, Vec3d::new(-0.6, 0.0, 0.8), Vec3d::splat(1e-12));
        assert_eq!(s.pdf, SINGULAR_PDF);
        assert_eq!(s.label, ClosureLabel::REFLECT | ClosureLabel::SINGULAR);
    }

    #[test]
    fn never_evaluates() {
        let i = Vec3d::new(0.6, 0.0, 0.8);
        let r = Vec3d::new(-0.6, 0.0, 0.8);
        assert_eq!(Reflection.eval_reflect(Vec3d::Z, i, r), (Spectrum::ZERO, 0.0));
    }

    #[test]
    fn below_horizon_fails() {
        let s = Reflection.sample(Vec3d::Z, Vec3d::Z, Vec3d::new(0.6, 0.0, -0.8), 0.1, 0.9);
        assert!(!s.is_valid());
    }

    #[test]
    fn degenerate_directions() {
        test_utils::test_bsdf_non_negative(&Reflection);
        test_utils::test_bsdf_grazing(&Reflection, true);
        test_utils::test_bsdf_degenerate(&Reflection);
    }
}
