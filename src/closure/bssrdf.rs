//! Burley's normalized diffusion profile for subsurface scattering
//!
//! The radial profile is truncated at `16 d` and sampled per color channel. See Christensen and
//! Burley, "Approximate Reflectance Profiles for Efficient Subsurface Scattering", 2015.
use std::f64::consts;

use crate::{
    utils::{safe_sqrt, FloatExt},
    Spectrum,
};

/// Radii below this are too small to sample and are replaced by a diffuse closure.
pub const BSSRDF_MIN_RADIUS: f64 = 1e-8;

const BURLEY_TRUNCATE: f64 = 16.0;
/// Value of the cdf at the truncation radius
const BURLEY_TRUNCATE_CDF: f64 = 0.996_379_009_370_832_8;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bssrdf {
    /// Mean free path per channel
    pub radius: Spectrum,
    /// Surface albedo used to fit the profile
    pub albedo: Spectrum,
    /// Roughness of the diffuse fallback, plain Lambert if `None`
    pub roughness: Option<f64>,
    pub ior: f64,
    /// Shape parameter of the profile per channel, derived in setup.
    d: Spectrum,
}

/// Diffuse surface transmission fit, equation 6 of the paper.
fn burley_fitting(albedo: f64) -> f64 {
    #[allow(clippy::suboptimal_flops)]
    {
        1.9 - albedo + 3.5 * (albedo - 0.8).sq()
    }
}

fn burley_eval(d: f64, r: f64) -> f64 {
    let rm = BURLEY_TRUNCATE * d;
    if r >= rm {
        return 0.0;
    }
    // already multiplied by 2 pi r, the albedo lives in the closure weight
    let exp_r_3_d = (-r / (3.0 * d)).exp();
    let exp_r_d = exp_r_3_d * exp_r_3_d * exp_r_3_d;
    (exp_r_d + exp_r_3_d) / (4.0 * d)
}

fn burley_pdf(d: f64, r: f64) -> f64 {
    burley_eval(d, r) / BURLEY_TRUNCATE_CDF
}

/// Radius in units of `d` at which the cdf reaches `xi`, found with Newton iterations.
fn burley_root_find(xi: f64) -> f64 {
    const TOLERANCE: f64 = 1e-6;
    const MAX_ITERATIONS: usize = 10;

    // the initial guess keeps the iteration count at four or less across the unit range
    let mut r = if xi <= 0.9 {
        (xi.sq() * 2.4).exp() - 1.0
    } else {
        15.0
    };
    for _ in 0..MAX_ITERATIONS {
        let exp_r_3 = (-r / 3.0).exp();
        let exp_r = exp_r_3 * exp_r_3 * exp_r_3;
        #[allow(clippy::suboptimal_flops)]
        let f = 1.0 - 0.25 * exp_r - 0.75 * exp_r_3 - xi;
        #[allow(clippy::suboptimal_flops)]
        let f_ = 0.25 * exp_r + 0.25 * exp_r_3;
        if f.abs() < TOLERANCE || f_ == 0.0 {
            break;
        }
        r = (r - f / f_).max(0.0);
    }
    r
}

impl Bssrdf {
    #[must_use]
    pub const fn new(radius: Spectrum, albedo: Spectrum, roughness: Option<f64>, ior: f64) -> Self {
        Self {
            radius,
            albedo,
            roughness,
            ior,
            d: Spectrum::ZERO,
        }
    }

    /// Fits the profile shape to the albedo.
    pub fn setup(&mut self) {
        let l = self.radius * (0.25 * consts::FRAC_1_PI);
        let s = Spectrum::new(
            burley_fitting(self.albedo.x),
            burley_fitting(self.albedo.y),
            burley_fitting(self.albedo.z),
        );
        self.d = l / s;
    }

    /// Profile shape per channel, zero for disabled channels.
    #[must_use]
    pub const fn shape(&self) -> Spectrum {
        self.d
    }

    /// Number of channels with a usable radius
    #[must_use]
    pub fn channels(&self) -> usize {
        self.d.to_array().iter().filter(|d| **d > 0.0).count()
    }

    /// Picks a channel with `xi` and samples a radius `r` from its profile. `h` is the half
    /// length of the chord through the sphere of the truncation radius at distance `r`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn sample(&self, xi: f64) -> (f64, f64) {
        let mut enabled = [0.0; 3];
        let mut count = 0;
        for d in self.d.to_array() {
            if d > 0.0 {
                enabled[count] = d;
                count += 1;
            }
        }
        if count == 0 {
            return (0.0, 0.0);
        }
        // reuse the random number after selecting the channel
        let scaled = xi * count as f64;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let channel = (scaled as usize).min(count - 1);
        let xi = scaled - channel as f64;
        let d = enabled[channel];

        let rm = BURLEY_TRUNCATE * d;
        let r = burley_root_find(xi * BURLEY_TRUNCATE_CDF) * d;
        let h = safe_sqrt(rm.sq() - r.sq());
        (r, h)
    }

    /// Radial density of every channel at distance `r`
    #[must_use]
    pub fn eval(&self, r: f64) -> Spectrum {
        Spectrum::new(
            burley_pdf(self.d.x, r),
            burley_pdf(self.d.y, r),
            burley_pdf(self.d.z, r),
        )
    }

    /// Density of [`Self::sample`] at distance `r`, the channel average.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn pdf(&self, r: f64) -> f64 {
        let channels = self.channels();
        if channels == 0 {
            return 0.0;
        }
        self.eval(r).element_sum() / channels as f64
    }

    /// Largest radius any channel can reach
    #[must_use]
    pub fn max_radius(&self) -> f64 {
        BURLEY_TRUNCATE * self.d.max_element()
    }

    /// Disables a channel whose radius is too small to sample.
    pub(crate) fn disable_channel(&mut self, channel: usize) {
        self.radius[channel] = 0.0;
        self.d[channel] = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{assert_eq_approx_abs, assert_in_range};

    fn setup(radius: Spectrum) -> Bssrdf {
        let mut bssrdf = Bssrdf::new(radius, Spectrum::splat(0.8), None, 1.4);
        bssrdf.setup();
        bssrdf
    }

    fn cdf(r: f64) -> f64 {
        #[allow(clippy::suboptimal_flops)]
        {
            1.0 - 0.25 * (-r).exp() - 0.75 * (-r / 3.0).exp()
        }
    }

    #[test]
    fn root_find_inverts_cdf() {
        for k in 0..20 {
            let xi = f64::from(k) / 20.0 * BURLEY_TRUNCATE_CDF;
            let r = burley_root_find(xi);
            assert_eq_approx_abs!(cdf(r), xi, 1e-5);
        }
        assert_eq_approx_abs!(cdf(BURLEY_TRUNCATE), BURLEY_TRUNCATE_CDF, 1e-9);
    }

    #[test]
    fn profile_is_truncated() {
        let bssrdf = setup(Spectrum::new(1.0, 0.5, 0.25));
        let d = bssrdf.shape();
        assert_eq!(burley_eval(d.x, 16.0 * d.x), 0.0);
        assert!(burley_eval(d.x, 15.9 * d.x) > 0.0);
        assert_eq!(bssrdf.eval(bssrdf.max_radius()), Spectrum::ZERO);
    }

    #[test]
    fn pdf_integrates_to_one() {
        let bssrdf = setup(Spectrum::new(1.0, 0.5, 0.25));
        let steps = 200_000;
        let dr = bssrdf.max_radius() / f64::from(steps);
        let integral: f64 = (0..steps)
            .map(|k| bssrdf.pdf((f64::from(k) + 0.5) * dr) * dr)
            .sum();
        assert_eq_approx_abs!(integral, 1.0, 1e-3);
    }

    #[test]
    fn samples_stay_inside_the_sphere() {
        let bssrdf = setup(Spectrum::new(0.3, 0.0, 0.1));
        assert_eq!(bssrdf.channels(), 2);
        let mut rd = fastrand::Rng::with_seed(5);
        for _ in 0..1000 {
            let (r, h) = bssrdf.sample(rd.f64());
            assert_in_range!(r, 0.0, bssrdf.max_radius());
            assert_in_range!(h, 0.0, bssrdf.max_radius());
            assert!(bssrdf.pdf(r) > 0.0);
        }
    }

    #[test]
    fn sampled_histogram_matches_pdf() {
        let bssrdf = setup(Spectrum::new(1.0, 0.4, 0.1));
        let mut rd = fastrand::Rng::with_seed(9);
        let bins = 20;
        let rmax = bssrdf.max_radius();
        let mut histogram = vec![0.0; bins];
        let n = 200_000;
        for _ in 0..n {
            let (r, _) = bssrdf.sample(rd.f64());
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let bin = ((r / rmax * bins as f64) as usize).min(bins - 1);
            histogram[bin] += 1.0 / f64::from(n);
        }
        for (k, value) in histogram.iter().enumerate() {
            let lo = k as f64 / bins as f64 * rmax;
            let hi = (k + 1) as f64 / bins as f64 * rmax;
            let dr = (hi - lo) / 100.0;
            let expected: f64 = (0..100)
                .map(|j| bssrdf.pdf(lo + (f64::from(j) + 0.5) * dr) * dr)
                .sum();
            assert_eq_approx_abs!(*value, expected, 0.005);
        }
    }

    #[test]
    fn disabled_channels_drop_out() {
        let mut bssrdf = setup(Spectrum::splat(1.0));
        bssrdf.disable_channel(1);
        assert_eq!(bssrdf.channels(), 2);
        assert_eq!(bssrdf.eval(0.01).y, 0.0);
        bssrdf.setup();
        assert_eq!(bssrdf.channels(), 2);
    }
}
