//! Visible normal slope sampling for the Beckmann distribution.
//!
//! Two interchangeable strategies produce the `x` slope for a given incident elevation:
//! * [`BeckmannSampling::Analytic`]: a coarse closed-form guess refined by Newton steps
//!   (Jakob, "An Improved Visible Normal Sampling Routine for the Beckmann Distribution")
//! * [`BeckmannSampling::Table`]: a precomputed inverse CDF read with bilinear interpolation
//!
//! Both agree up to the resolution of the table.

use std::f64::consts;

use crate::utils::{fast_erf, fast_ierf, safe_sqrt, FloatExt};

/// Resolution of the slope table along both axes.
pub const BECKMANN_TABLE_SIZE: usize = 256;
const BECKMANN_TABLE_SLOPE_MAX: f64 = 6.0;
const CDF_RESOLUTION: usize = 512;
const MARGINAL_RESOLUTION: usize = 100;

/// `1 / sqrt(pi)`
const SQRT_PI_INV: f64 = 0.564_189_583_547_756_3;

/// A 2D table of `f32` values, read with bilinear interpolation over `[0, 1]^2`.
#[derive(Clone, Debug, PartialEq)]
pub struct LookupTable2D {
    data: Vec<f32>,
    xsize: usize,
    ysize: usize,
}

impl LookupTable2D {
    #[must_use]
    pub fn new(data: Vec<f32>, xsize: usize, ysize: usize) -> Self {
        debug_assert_eq!(data.len(), xsize * ysize);
        Self { data, xsize, ysize }
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn read_row(&self, x: f64, row: usize) -> f64 {
        let x = x.saturate() * (self.xsize - 1) as f64;
        let index = (x as usize).min(self.xsize - 1);
        let nindex = (index + 1).min(self.xsize - 1);
        let t = x - index as f64;
        let offset = row * self.xsize;
        let data0 = f64::from(self.data[offset + index]);
        if t == 0.0 {
            return data0;
        }
        let data1 = f64::from(self.data[offset + nindex]);
        data0.lerp(data1, t)
    }

    /// Bilinear lookup, `x` runs along a row and `y` selects the rows.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn read(&self, x: f64, y: f64) -> f64 {
        let y = y.saturate() * (self.ysize - 1) as f64;
        let index = (y as usize).min(self.ysize - 1);
        let nindex = (index + 1).min(self.ysize - 1);
        let t = y - index as f64;
        let data0 = self.read_row(x, index);
        if t == 0.0 {
            return data0;
        }
        let data1 = self.read_row(x, nindex);
        data0.lerp(data1, t)
    }
}

/// Inverse CDF of the visible `x` slope, indexed by the random number and `cos(theta_i)`.
#[derive(Clone, Debug, PartialEq)]
pub struct BeckmannTable {
    table: LookupTable2D,
}

impl Default for BeckmannTable {
    fn default() -> Self {
        Self::new()
    }
}

impl BeckmannTable {
    /// Precomputes the table. This integrates the slope distribution for every row and takes a
    /// moment, so build it once per scene.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn new() -> Self {
        let size = BECKMANN_TABLE_SIZE;
        let mut data = vec![0.0_f32; size * size];
        let mut slope_x = vec![0.0_f64; CDF_RESOLUTION];
        let mut cdf = vec![0.0_f64; CDF_RESOLUTION];

        for index_theta in 0..size {
            let cos_theta = index_theta as f64 / (size - 1) as f64;
            let sin_theta = safe_sqrt(1.0 - cos_theta.sq());

            // integrate the projected slope distribution along y, then accumulate along x
            slope_x[0] = -BECKMANN_TABLE_SLOPE_MAX;
            cdf[0] = 0.0;
            for index_slope_x in 1..CDF_RESOLUTION {
                let sx = (2.0 * BECKMANN_TABLE_SLOPE_MAX).mul_add(
                    index_slope_x as f64 / (CDF_RESOLUTION - 1) as f64,
                    -BECKMANN_TABLE_SLOPE_MAX,
                );
                slope_x[index_slope_x] = sx;

                let dot_product = (-sx).mul_add(sin_theta, cos_theta).max(0.0);
                let p22: f64 = (0..MARGINAL_RESOLUTION)
                    .map(|j| {
                        let sy = (2.0 * BECKMANN_TABLE_SLOPE_MAX).mul_add(
                            j as f64 / (MARGINAL_RESOLUTION - 1) as f64,
                            -BECKMANN_TABLE_SLOPE_MAX,
                        );
                        dot_product * (-(sx.sq() + sy.sq())).exp()
                    })
                    .sum();
                cdf[index_slope_x] = cdf[index_slope_x - 1] + p22;
            }

            let total = cdf[CDF_RESOLUTION - 1];
            for value in &mut cdf[1..] {
                *value /= total;
            }

            // invert the cdf at evenly spaced random numbers
            let mut index_slope_x = 1;
            for index_u in 0..size {
                let u = 0.999_999_8_f64.mul_add(index_u as f64 / (size - 1) as f64, 0.000_000_1);
                while index_slope_x < CDF_RESOLUTION - 1 && cdf[index_slope_x] <= u {
                    index_slope_x += 1;
                }
                let interp =
                    (cdf[index_slope_x] - u) / (cdf[index_slope_x] - cdf[index_slope_x - 1]);
                let value = slope_x[index_slope_x].lerp(slope_x[index_slope_x - 1], interp);
                data[index_u + index_theta * size] = value as f32;
            }
        }

        Self {
            table: LookupTable2D::new(data, size, size),
        }
    }

    /// Slope for the random number `u` at incident elevation `cos_theta`
    #[must_use]
    pub fn slope_x(&self, u: f64, cos_theta: f64) -> f64 {
        self.table.read(u, cos_theta)
    }
}

/// Strategy used to draw Beckmann slopes.
#[derive(Clone, Copy, Debug, Default)]
pub enum BeckmannSampling<'a> {
    #[default]
    Analytic,
    Table(&'a BeckmannTable),
}

impl BeckmannSampling<'_> {
    /// Samples the slopes of a visible normal of the unit roughness distribution seen from
    /// elevation `theta_i`.
    #[must_use]
    pub fn sample_slopes(
        self,
        cos_theta_i: f64,
        sin_theta_i: f64,
        randu: f64,
        randv: f64,
    ) -> (f64, f64) {
        if cos_theta_i >= 0.99999 {
            // normal incidence
            let r = safe_sqrt(-randu.max(f64::MIN_POSITIVE).ln());
            let (sin_phi, cos_phi) = (2.0 * consts::PI * randv).sin_cos();
            return (r * cos_phi, r * sin_phi);
        }

        #[allow(clippy::suboptimal_flops)]
        let slope_y = fast_ierf(2.0 * randv - 1.0);
        let slope_x = match self {
            Self::Analytic => analytic_slope_x(cos_theta_i, sin_theta_i, randu),
            Self::Table(table) => table.slope_x(randu, cos_theta_i),
        };
        (slope_x, slope_y)
    }
}

/// Smith masking of the unit roughness Beckmann distribution, `1 / (1 + Lambda)`
#[must_use]
pub fn beckmann_g1_exact(cos_theta_i: f64, sin_theta_i: f64) -> f64 {
    if cos_theta_i >= 0.99999 {
        return 1.0;
    }
    let tan_theta_i = sin_theta_i / cos_theta_i;
    let cot_theta_i = 1.0 / tan_theta_i;
    let erf_a = fast_erf(cot_theta_i);
    let exp_a2 = (-cot_theta_i.sq()).exp();
    #[allow(clippy::suboptimal_flops)]
    let lambda = 0.5 * (erf_a - 1.0) + (0.5 * SQRT_PI_INV) * (exp_a2 * tan_theta_i);
    1.0 / (1.0 + lambda)
}

#[allow(clippy::suboptimal_flops)]
fn analytic_slope_x(cos_theta_i: f64, sin_theta_i: f64, randu: f64) -> f64 {
    let tan_theta_i = sin_theta_i / cos_theta_i;
    let cot_theta_i = 1.0 / tan_theta_i;
    let erf_a = fast_erf(cot_theta_i);
    let exp_a2 = (-cot_theta_i.sq()).exp();

    // coarse guess from exp(-ierf(x)^2) ~= 1 - x^2, solving y = 1 + b + K * (1 - b^2)
    let k = tan_theta_i * SQRT_PI_INV;
    let y_approx = randu * (1.0 + erf_a + k * (1.0 - erf_a.sq()));
    let y_exact = randu * (1.0 + erf_a + k * exp_a2);
    let mut b = if k > 0.0 {
        (0.5 - safe_sqrt(k * (k - y_approx + 1.0) + 0.25)) / k
    } else {
        y_approx - 1.0
    };

    let mut inv_erf = fast_ierf(b);
    let mut value = 1.0 + b + k * (-inv_erf.sq()).exp() - y_exact;
    // close to the root the newton step would only add noise
    if value.abs() <= 1e-6 {
        return inv_erf;
    }
    b -= value / (1.0 - inv_erf * tan_theta_i);
    inv_erf = fast_ierf(b);
    value = 1.0 + b + k * (-inv_erf.sq()).exp() - y_exact;
    b -= value / (1.0 - inv_erf * tan_theta_i);
    fast_ierf(b)
}
