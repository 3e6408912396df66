//! The closures a shading point is made of.
//!
//! A [`ShaderClosure`] is a weighted scattering primitive with a shading normal. Its payload is
//! the closed [`Closure`] enum, so dispatch is a `match` and every closure fits into the same
//! fixed slot of a [`crate::shader::ClosureArray`].
//!
//! All vectors are in world space. `i` points from the surface towards the viewer, `omega_in`
//! from the surface towards the light. Values returned by `eval_*` and `sample` already contain
//! the cosine of `omega_in`.

pub mod beckmann;
pub mod bssrdf;
pub mod diffuse;
pub mod microfacet;
pub mod oren_nayar;
pub mod principled_diffuse;
pub mod reflection;
pub mod refraction;
pub mod transparent;
pub mod velvet;
pub mod volume;
pub mod ward;
pub mod westin;

use crate::{shader::ShaderFlag, BsdfSample, Spectrum, Vec3d};

use self::{
    beckmann::BeckmannSampling,
    bssrdf::Bssrdf,
    diffuse::{Diffuse, Translucent},
    microfacet::{Microfacet, MicrofacetKind},
    oren_nayar::OrenNayar,
    principled_diffuse::PrincipledDiffuse,
    reflection::Reflection,
    refraction::Refraction,
    transparent::Transparent,
    velvet::Velvet,
    volume::HenyeyGreenstein,
    ward::Ward,
    westin::{WestinBackscatter, WestinSheen},
};

/// Closures with a smaller sample weight are not allocated at all.
pub const CLOSURE_WEIGHT_CUTOFF: f64 = 1e-5;

/// Size of the storage slot every closure payload has to fit in.
pub const CLOSURE_PAYLOAD_SIZE: usize = 256;

/// Common interface of the scattering models.
///
/// `n` is the shading normal of the closure. A model that cannot produce a value for a pair of
/// directions returns zero value and zero pdf.
pub trait Bsdf {
    fn eval_reflect(&self, n: Vec3d, i: Vec3d, omega_in: Vec3d) -> (Spectrum, f64) {
        let _ = (n, i, omega_in);
        (Spectrum::ZERO, 0.0)
    }

    fn eval_transmit(&self, n: Vec3d, i: Vec3d, omega_in: Vec3d) -> (Spectrum, f64) {
        let _ = (n, i, omega_in);
        (Spectrum::ZERO, 0.0)
    }

    /// Importance samples an incoming direction. `ng` is the geometric normal.
    fn sample(&self, n: Vec3d, ng: Vec3d, i: Vec3d, randu: f64, randv: f64) -> BsdfSample;

    /// Widens the roughness to at least `roughness`.
    fn blur(&mut self, roughness: f64) {
        let _ = roughness;
    }
}

/// Tag of a closure, used for categorization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClosureType {
    Diffuse,
    OrenNayar,
    PrincipledDiffuse,
    WestinSheen,
    Translucent,
    Reflection,
    MicrofacetGgx,
    MicrofacetGgxFresnel,
    MicrofacetGgxClearcoat,
    MicrofacetBeckmann,
    AshikhminVelvet,
    WestinBackscatter,
    Ward,
    Refraction,
    MicrofacetGgxRefraction,
    MicrofacetBeckmannRefraction,
    Transparent,
    BssrdfBurley,
    HenyeyGreenstein,
    Holdout,
    AmbientOcclusion,
}

impl ClosureType {
    #[must_use]
    pub const fn is_bsdf_diffuse(self) -> bool {
        matches!(
            self,
            Self::Diffuse
                | Self::OrenNayar
                | Self::PrincipledDiffuse
                | Self::WestinSheen
                | Self::Translucent
        )
    }

    #[must_use]
    pub const fn is_bsdf_glossy(self) -> bool {
        matches!(
            self,
            Self::Reflection
                | Self::MicrofacetGgx
                | Self::MicrofacetGgxFresnel
                | Self::MicrofacetGgxClearcoat
                | Self::MicrofacetBeckmann
                | Self::AshikhminVelvet
                | Self::WestinBackscatter
                | Self::Ward
        )
    }

    #[must_use]
    pub const fn is_bsdf_transmission(self) -> bool {
        matches!(
            self,
            Self::Translucent
                | Self::Refraction
                | Self::MicrofacetGgxRefraction
                | Self::MicrofacetBeckmannRefraction
                | Self::Transparent
        )
    }

    #[must_use]
    pub const fn is_bsdf_singular(self) -> bool {
        matches!(self, Self::Reflection | Self::Refraction | Self::Transparent)
    }

    #[must_use]
    pub const fn is_bsdf_transparent(self) -> bool {
        matches!(self, Self::Transparent)
    }

    #[must_use]
    pub const fn is_bsdf(self) -> bool {
        self.is_bsdf_diffuse() || self.is_bsdf_glossy() || self.is_bsdf_transmission()
    }

    #[must_use]
    pub const fn is_bssrdf(self) -> bool {
        matches!(self, Self::BssrdfBurley)
    }

    #[must_use]
    pub const fn is_bsdf_or_bssrdf(self) -> bool {
        self.is_bsdf() || self.is_bssrdf()
    }

    #[must_use]
    pub const fn is_phase(self) -> bool {
        matches!(self, Self::HenyeyGreenstein)
    }

    #[must_use]
    pub const fn is_holdout(self) -> bool {
        matches!(self, Self::Holdout)
    }

    #[must_use]
    pub const fn is_ambient_occlusion(self) -> bool {
        matches!(self, Self::AmbientOcclusion)
    }
}

/// The payload of a closure.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Closure {
    Diffuse(Diffuse),
    Translucent(Translucent),
    OrenNayar(OrenNayar),
    PrincipledDiffuse(PrincipledDiffuse),
    Microfacet(Microfacet),
    AshikhminVelvet(Velvet),
    WestinBackscatter(WestinBackscatter),
    WestinSheen(WestinSheen),
    Ward(Ward),
    Reflection(Reflection),
    Refraction(Refraction),
    Transparent(Transparent),
    Bssrdf(Bssrdf),
    HenyeyGreenstein(HenyeyGreenstein),
    Holdout,
    AmbientOcclusion,
}

/// Statically dispatches `$body` over the scattering models, `$none` for everything else.
macro_rules! with_bsdf {
    ($closure:expr, $b:ident => $body:expr, $none:expr) => {
        match $closure {
            Closure::Diffuse($b) => $body,
            Closure::Translucent($b) => $body,
            Closure::OrenNayar($b) => $body,
            Closure::PrincipledDiffuse($b) => $body,
            Closure::Microfacet($b) => $body,
            Closure::AshikhminVelvet($b) => $body,
            Closure::WestinBackscatter($b) => $body,
            Closure::WestinSheen($b) => $body,
            Closure::Ward($b) => $body,
            Closure::Reflection($b) => $body,
            Closure::Refraction($b) => $body,
            Closure::Transparent($b) => $body,
            Closure::Bssrdf(_)
            | Closure::HenyeyGreenstein(_)
            | Closure::Holdout
            | Closure::AmbientOcclusion => $none,
        }
    };
}

const _: () = assert!(std::mem::size_of::<Closure>() <= CLOSURE_PAYLOAD_SIZE);

impl Closure {
    #[must_use]
    pub const fn closure_type(&self) -> ClosureType {
        match self {
            Self::Diffuse(_) => ClosureType::Diffuse,
            Self::Translucent(_) => ClosureType::Translucent,
            Self::OrenNayar(_) => ClosureType::OrenNayar,
            Self::PrincipledDiffuse(_) => ClosureType::PrincipledDiffuse,
            Self::Microfacet(m) => m.closure_type(),
            Self::AshikhminVelvet(_) => ClosureType::AshikhminVelvet,
            Self::WestinBackscatter(_) => ClosureType::WestinBackscatter,
            Self::WestinSheen(_) => ClosureType::WestinSheen,
            Self::Ward(_) => ClosureType::Ward,
            Self::Reflection(_) => ClosureType::Reflection,
            Self::Refraction(_) => ClosureType::Refraction,
            Self::Transparent(_) => ClosureType::Transparent,
            Self::Bssrdf(_) => ClosureType::BssrdfBurley,
            Self::HenyeyGreenstein(_) => ClosureType::HenyeyGreenstein,
            Self::Holdout => ClosureType::Holdout,
            Self::AmbientOcclusion => ClosureType::AmbientOcclusion,
        }
    }
}

/// A weighted closure attached to a shading point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShaderClosure {
    pub n: Vec3d,
    pub weight: Spectrum,
    /// Selection weight among the closures of a shading point, never negative.
    pub sample_weight: f64,
    pub closure: Closure,
}

impl ShaderClosure {
    #[must_use]
    pub fn new(n: Vec3d, weight: Spectrum, closure: Closure) -> Self {
        Self {
            n,
            weight,
            sample_weight: crate::utils::VecExt::average(weight).abs(),
            closure,
        }
    }

    #[must_use]
    pub const fn closure_type(&self) -> ClosureType {
        self.closure.closure_type()
    }

    /// Clamps the parameters of the closure and reports what it is capable of.
    ///
    /// `i` is the view direction of the shading point.
    pub fn setup(&mut self, i: Vec3d) -> ShaderFlag {
        let n = self.n;
        match &mut self.closure {
            Closure::Diffuse(_) | Closure::PrincipledDiffuse(_) | Closure::WestinSheen(_) => {
                ShaderFlag::BSDF | ShaderFlag::BSDF_HAS_EVAL
            }
            Closure::Translucent(_) => {
                ShaderFlag::BSDF | ShaderFlag::BSDF_HAS_EVAL | ShaderFlag::BSDF_HAS_TRANSMISSION
            }
            Closure::OrenNayar(b) => b.setup(),
            Closure::Microfacet(b) => {
                let (flag, fresnel_scale) = b.setup(n, i);
                self.sample_weight *= fresnel_scale;
                flag
            }
            Closure::AshikhminVelvet(b) => b.setup(),
            Closure::WestinBackscatter(b) => b.setup(),
            Closure::Ward(b) => b.setup(),
            Closure::Reflection(_) => ShaderFlag::BSDF,
            Closure::Refraction(_) => ShaderFlag::BSDF | ShaderFlag::BSDF_HAS_TRANSMISSION,
            Closure::Transparent(_) => ShaderFlag::BSDF | ShaderFlag::TRANSPARENT,
            Closure::Bssrdf(b) => {
                b.setup();
                ShaderFlag::BSSRDF
            }
            Closure::HenyeyGreenstein(b) => b.setup(),
            Closure::Holdout => ShaderFlag::HOLDOUT,
            Closure::AmbientOcclusion => ShaderFlag::AO,
        }
    }

    /// Evaluates the closure for `omega_in`, choosing reflection or transmission by the side of
    /// `sd_n` the direction is on. Weight is not applied.
    #[must_use]
    pub fn eval(&self, sd_n: Vec3d, i: Vec3d, omega_in: Vec3d) -> (Spectrum, f64) {
        let n = self.n;
        let reflect = sd_n.dot(omega_in) >= 0.0;
        with_bsdf!(
            &self.closure,
            b => if reflect {
                b.eval_reflect(n, i, omega_in)
            } else {
                b.eval_transmit(n, i, omega_in)
            },
            (Spectrum::ZERO, 0.0)
        )
    }

    /// Samples an incoming direction. Weight is not applied.
    #[must_use]
    pub fn sample(
        &self,
        ng: Vec3d,
        i: Vec3d,
        randu: f64,
        randv: f64,
        beckmann: BeckmannSampling<'_>,
    ) -> BsdfSample {
        let n = self.n;
        match &self.closure {
            Closure::Microfacet(m) => m.sample_with(beckmann, n, ng, i, randu, randv),
            closure => with_bsdf!(
                closure,
                b => b.sample(n, ng, i, randu, randv),
                BsdfSample::none()
            ),
        }
    }

    pub fn blur(&mut self, roughness: f64) {
        with_bsdf!(&mut self.closure, b => b.blur(roughness), ());
    }

    /// Squared roughness, `alpha_x * alpha_y` for microfacets, zero for singular closures and one
    /// for everything else.
    #[must_use]
    pub fn roughness_squared(&self) -> f64 {
        match &self.closure {
            Closure::Microfacet(m) => m.alpha_x * m.alpha_y,
            c if c.closure_type().is_bsdf_singular() => 0.0,
            _ => 1.0,
        }
    }

    /// Whether a Fresnel colored microfacet should read its extra block.
    #[must_use]
    pub fn is_fresnel_microfacet(&self) -> bool {
        matches!(
            &self.closure,
            Closure::Microfacet(Microfacet {
                kind: MicrofacetKind::Fresnel | MicrofacetKind::Clearcoat,
                ..
            })
        )
    }
}
