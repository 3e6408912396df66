use crate::{Spectrum, Vec3d};
use std::f64::consts;

pub trait FloatExt {
    fn sq(self) -> Self;
    fn lerp(self, other: Self, t: Self) -> Self;
    fn saturate(self) -> Self;
}

impl FloatExt for f64 {
    fn sq(self) -> Self {
        self * self
    }
    fn lerp(self, other: Self, t: Self) -> Self {
        #[allow(clippy::suboptimal_flops)]
        {
            self * (1.0 - t) + other * t
        }
    }
    fn saturate(self) -> Self {
        self.clamp(0.0, 1.0)
    }
}

pub trait VecExt {
    type Scalar;
    /// Returns the perceived brightness of the color
    #[must_use]
    fn luminance(self) -> Self::Scalar;
    #[must_use]
    fn average(self) -> Self::Scalar;
    #[must_use]
    fn sq(self) -> Self;
    #[must_use]
    fn saturate(self) -> Self;
    #[must_use]
    fn channel(self, i: usize) -> Self::Scalar;
}

impl VecExt for Vec3d {
    type Scalar = f64;

    fn sq(self) -> Self {
        self * self
    }

    fn luminance(self) -> Self::Scalar {
        let lfac = Self::new(0.2126, 0.7152, 0.0722);
        self.dot(lfac)
    }

    fn average(self) -> Self::Scalar {
        (self.x + self.y + self.z) / 3.0
    }

    fn saturate(self) -> Self {
        self.clamp(Self::ZERO, Self::ONE)
    }

    fn channel(self, i: usize) -> Self::Scalar {
        match i {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }
}

#[must_use]
pub fn safe_sqrt(v: f64) -> f64 {
    v.max(0.0).sqrt()
}

#[must_use]
pub fn safe_divide(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        0.0
    } else {
        a / b
    }
}

#[must_use]
pub fn safe_divide_spectrum(a: Spectrum, b: Spectrum) -> Spectrum {
    Spectrum::new(
        safe_divide(a.x, b.x),
        safe_divide(a.y, b.y),
        safe_divide(a.z, b.z),
    )
}

/// Componentwise `exp(-sigma * t)`, guarding the `0 * inf` case.
#[must_use]
pub fn volume_color_transmittance(sigma: Spectrum, t: f64) -> Spectrum {
    let channel = |s: f64| if s == 0.0 { 1.0 } else { (-s * t).exp() };
    Spectrum::new(channel(sigma.x), channel(sigma.y), channel(sigma.z))
}

pub fn reflect(n: Vec3d, vec: Vec3d) -> Vec3d {
    n * (n.dot(vec) * 2.0) - vec
}

/// Builds two tangents perpendicular to `n`.
#[must_use]
pub fn make_orthonormals(n: Vec3d) -> (Vec3d, Vec3d) {
    let a = if n.x != n.y || n.x != n.z {
        Vec3d::new(n.z - n.y, n.x - n.z, n.y - n.x)
    } else {
        Vec3d::new(n.z - n.y, n.x + n.z, -n.y - n.x)
    };
    let a = a.normalize();
    let b = n.cross(a);
    (a, b)
}

/// Builds a frame around `n` whose first axis follows the tangent `t` as closely as possible.
#[must_use]
pub fn make_orthonormals_tangent(n: Vec3d, t: Vec3d) -> (Vec3d, Vec3d) {
    match n.cross(t).try_normalize() {
        Some(b) => (b.cross(n), b),
        None => make_orthonormals(n),
    }
}

/// Unpolarized Fresnel reflectance of a dielectric, `eta` being the relative index of refraction.
pub fn fresnel_dielectric_cos(cosi: f64, eta: f64) -> f64 {
    let c = cosi.abs();
    let g2 = eta.sq() - 1.0 + c.sq();
    if g2 <= 0.0 {
        // total internal reflection
        return 1.0;
    }
    let g = g2.sqrt();
    let f1 = (g - c) / (g + c);

    #[allow(clippy::suboptimal_flops)]
    let f2 = (c * (g + c) - 1.0) / (c * (g - c) + 1.0);
    0.5 * f1.sq() * (1.0 + f2.sq())
}

/// Result of splitting an incident direction at a dielectric boundary.
#[derive(Clone, Copy, Debug)]
pub struct DielectricSplit {
    pub fresnel: f64,
    pub reflected: Vec3d,
    pub transmitted: Vec3d,
    pub inside: bool,
}

/// Computes the mirror and refracted directions for `i` (pointing away from the surface) at a
/// boundary with normal `n`, together with the reflectance. A fresnel of `1.0` means total
/// internal reflection and a zero transmitted vector.
#[must_use]
pub fn fresnel_dielectric(eta: f64, n: Vec3d, i: Vec3d) -> DielectricSplit {
    let mut cos = n.dot(i);
    let (neta, nn, inside) = if cos > 0.0 {
        (1.0 / eta, n, false)
    } else {
        cos = -cos;
        (eta, -n, true)
    };
    let reflected = nn * (2.0 * cos) - i;
    #[allow(clippy::suboptimal_flops)]
    let arg = 1.0 - neta.sq() * (1.0 - cos.sq());
    if arg < 0.0 {
        return DielectricSplit {
            fresnel: 1.0,
            reflected,
            transmitted: Vec3d::ZERO,
            inside,
        };
    }
    let dnp = arg.sqrt().max(1e-7);
    #[allow(clippy::suboptimal_flops)]
    let nk = neta * cos - dnp;
    let transmitted = nk * nn - neta * i;
    DielectricSplit {
        fresnel: fresnel_dielectric_cos(cos, 1.0 / neta),
        reflected,
        transmitted,
        inside,
    }
}

/// Cosine weighted direction around `n`. pdf is `cos(theta) / pi`
#[must_use]
pub fn sample_cos_hemisphere(n: Vec3d, u: f64, v: f64) -> (Vec3d, f64) {
    let (local, pdf) = hemispherical_sample_cos_weighted_uv(u, v);
    let (t, b) = make_orthonormals(n);
    (t * local.x + b * local.y + n * local.z, pdf)
}

/// Uniform direction in the hemisphere around `n`. pdf is `1 / (2 pi)`
#[must_use]
pub fn sample_uniform_hemisphere(n: Vec3d, u: f64, v: f64) -> (Vec3d, f64) {
    let z = u;
    let r = safe_sqrt(1.0 - z.sq());
    let phi = 2.0 * consts::PI * v;
    let (sin_phi, cos_phi) = phi.sin_cos();
    let (t, b) = make_orthonormals(n);
    (
        t * (r * cos_phi) + b * (r * sin_phi) + n * z,
        0.5 * consts::FRAC_1_PI,
    )
}

/* pdf is cos(theta) / pi */
#[must_use]
pub fn hemispherical_sample_cos_weighted_uv(u: f64, v: f64) -> (Vec3d, f64) {
    let eps_theta_sample = u.clamp(1e-6, 1.0); // prevent division by zero (division by pdf)
    let cos_theta = eps_theta_sample.sqrt();
    let sin_theta = (1.0 - eps_theta_sample).sqrt();
    let phi = 2.0 * consts::PI * v;
    let (sin_phi, cos_phi) = phi.sin_cos();
    let omega_i = Vec3d {
        x: sin_theta * cos_phi,
        y: sin_theta * sin_phi,
        z: cos_theta,
    };
    (omega_i, cos_theta / consts::PI)
}

/// Uniform point on the unit disk
#[must_use]
pub fn sample_uniform_disk(u: f64, v: f64) -> (f64, f64) {
    let r = u.sqrt();
    let (sin, cos) = (2.0 * consts::PI * v).sin_cos();
    (r * cos, r * sin)
}

#[must_use]
pub fn power_heuristic(a: f64, b: f64) -> f64 {
    let a2 = a.sq();
    let denom = a2 + b.sq();
    if denom == 0.0 {
        0.0
    } else {
        a2 / denom
    }
}

#[must_use]
pub fn pow5(v: f64) -> f64 {
    let v2 = v * v;
    v2 * v2 * v
}

/// Error function approximation, max error about `2e-6` on `[0, 4]`.
#[must_use]
pub fn fast_erf(x: f64) -> f64 {
    const A1: f64 = 0.070_523_078_4;
    const A2: f64 = 0.042_282_012_3;
    const A3: f64 = 0.009_270_527_2;
    const A4: f64 = 0.000_152_014_3;
    const A5: f64 = 0.000_276_567_2;
    const A6: f64 = 0.000_043_063_8;
    let a = x.abs();
    if a >= 12.3 {
        return 1.0_f64.copysign(x);
    }
    let r = A6
        .mul_add(a, A5)
        .mul_add(a, A4)
        .mul_add(a, A3)
        .mul_add(a, A2)
        .mul_add(a, A1)
        .mul_add(a, 1.0);
    let s = r * r;
    let t = s * s;
    let u = t * t;
    let v = u * u;
    (1.0 - 1.0 / v).copysign(x)
}

/// Inverse error function after Giles, "Approximating the erfinv function".
#[must_use]
pub fn fast_ierf(x: f64) -> f64 {
    let a = x.abs().min(0.999_999_94);
    let mut w = -((1.0 - a) * (1.0 + a)).ln();
    let p = if w < 5.0 {
        w -= 2.5;
        2.810_226_36e-08_f64
            .mul_add(w, 3.432_739_39e-07)
            .mul_add(w, -3.523_387_7e-06)
            .mul_add(w, -4.391_506_54e-06)
            .mul_add(w, 0.000_218_580_87)
            .mul_add(w, -0.001_253_725_03)
            .mul_add(w, -0.004_177_681_64)
            .mul_add(w, 0.246_640_727)
            .mul_add(w, 1.501_409_41)
    } else {
        w = w.sqrt() - 3.0;
        (-0.000_200_214_257_f64)
            .mul_add(w, 0.000_100_950_558)
            .mul_add(w, 0.001_349_343_22)
            .mul_add(w, -0.003_673_428_44)
            .mul_add(w, 0.005_739_507_73)
            .mul_add(w, -0.007_622_461_3)
            .mul_add(w, 0.009_438_870_47)
            .mul_add(w, 1.001_674_06)
            .mul_add(w, 2.832_976_82)
    };
    p * x.clamp(-0.999_999_94, 0.999_999_94)
}

/// Offsets a hit position along `ng` to avoid self intersection.
#[must_use]
pub fn ray_offset(p: Vec3d, ng: Vec3d) -> Vec3d {
    const EPSILON: f64 = 1e-5;
    let scale = 1.0 + p.abs().max_element();
    p + ng * (EPSILON * scale)
}
