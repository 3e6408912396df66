//! Volume segments between two surface hits.
//!
//! The segment is ray marched in steps. The main path picks an indirect scatter distance by
//! tracking transmittance along the steps, and a direct light scatter position either at the
//! same point or by equiangular sampling towards the light. Shadow rays only collect the
//! transmittance.
use tracing::debug;

use crate::{
    config::{IntegratorData, KernelGlobals},
    film::Film,
    integrator::{
        accumulate::write_emission,
        intersect_closest::shader_next_kernel,
        light_sample::{light_sample_mis_weight, light_sample_terminate, volume_shadow_ray},
        state::{DeviceKernel, IntegratorState},
    },
    rng::{
        RngState, HASH_VOLUME_SHADE_OFFSET, HASH_VOLUME_STEP_OFFSET, PRNG_BSDF_U,
        PRNG_LIGHT_TERMINATE, PRNG_LIGHT_U, PRNG_PHASE_CHANNEL, PRNG_SCATTER_DISTANCE,
    },
    scene::{LightSample, PrimitiveKind, Scene},
    shader::{ObjectFlag, ShaderData, ShaderExclude, ShaderFlag, ShaderVolumePhases},
    utils::{power_heuristic, safe_divide, volume_color_transmittance, FloatExt, VecExt},
    volume_stack::{VolumeSampleMethod, VolumeStack},
    BsdfEval, ClosureLabel, PathRayFlag, Ray, Spectrum, Vec3d, OBJECT_NONE, RAY_T_MAX,
};

/// Throughput below which a volume no longer lets anything through.
pub(crate) const VOLUME_THROUGHPUT_EPSILON: f64 = 1e-6;
/// Scatter positions sampled with a lower density are ignored.
const VOLUME_SAMPLE_PDF_CUTOFF: f64 = 1e-8;

/// Coefficients of all volumes on the stack at one point.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct VolumeCoefficients {
    sigma_t: Spectrum,
    sigma_s: Spectrum,
    emission: Spectrum,
}

/// Evaluates every volume on `stack` at `sd.p`. Their closures add up in `sd`.
pub(crate) fn volume_shader_eval<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    sd: &mut ShaderData,
    stack: &VolumeStack,
    path_flag: PathRayFlag,
) {
    sd.reset_closures(kg.data.max_closures, path_flag);
    sd.flag = ShaderFlag::empty();
    for entry in stack.iter() {
        sd.object = entry.object;
        sd.shader = entry.shader;
        sd.flag = (sd.flag & ShaderFlag::CLOSURE_FLAGS) | kg.scene.shader_flags(entry.shader);
        sd.object_flag = if entry.object == OBJECT_NONE {
            ObjectFlag::empty()
        } else {
            kg.scene.object_flags(entry.object)
        };
        kg.scene.eval_volume(sd, path_flag);
    }
    if sd.flag.contains(ShaderFlag::SCATTER) && !path_flag.intersects(PathRayFlag::SHADOW) {
        sd.merge_volume_closures();
    }
}

fn volume_shader_sample<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    sd: &mut ShaderData,
    stack: &VolumeStack,
    path_flag: PathRayFlag,
) -> Option<VolumeCoefficients> {
    volume_shader_eval(kg, sd, stack, path_flag);
    if !sd
        .flag
        .intersects(ShaderFlag::EXTINCTION | ShaderFlag::SCATTER | ShaderFlag::EMISSION)
    {
        return None;
    }
    let mut coeff = VolumeCoefficients::default();
    if sd.flag.contains(ShaderFlag::EXTINCTION) {
        coeff.sigma_t = sd.closure_transparent_extinction;
    }
    if sd.flag.contains(ShaderFlag::SCATTER) {
        coeff.sigma_s = sd
            .closures
            .iter()
            .filter(|sc| sc.closure_type().is_phase())
            .map(|sc| sc.weight)
            .sum();
    }
    if sd.flag.contains(ShaderFlag::EMISSION) {
        coeff.emission = sd.closure_emission_background;
    }
    Some(coeff)
}

fn spectrum_exp(v: Spectrum) -> Spectrum {
    Spectrum::new(v.x.exp(), v.y.exp(), v.z.exp())
}

/// Subdivision of a ray into marching steps. Homogeneous volumes take a single step.
#[derive(Clone, Copy, Debug)]
struct VolumeStep {
    size: f64,
    /// Position of the shading point inside a step
    shade_offset: f64,
    /// Length of the first step relative to `size`
    offset: f64,
    max_steps: u32,
    t_min: f64,
    t_max: f64,
}

impl VolumeStep {
    fn new(
        data: &IntegratorData,
        rng: &RngState,
        object_step_size: f64,
        tmax: f64,
        shadow: bool,
    ) -> Self {
        if object_step_size >= f64::MAX {
            return Self {
                size: tmax,
                shade_offset: 0.0,
                offset: 1.0,
                max_steps: 1,
                t_min: 0.0,
                t_max: 0.0,
            };
        }
        let max_steps = data.volume_max_steps.max(1);
        let mut size = object_step_size.min(tmax);
        if tmax > f64::from(max_steps) * size {
            size = tmax / f64::from(max_steps);
        }
        Self {
            size,
            shade_offset: rng.rng_1d_hash(HASH_VOLUME_SHADE_OFFSET),
            offset: if shadow {
                1.0
            } else {
                rng.rng_1d_hash(HASH_VOLUME_STEP_OFFSET)
            },
            max_steps,
            t_min: 0.0,
            t_max: 0.0,
        }
    }

    /// Moves on to step number `step` and returns its shading point, `None` once the end of
    /// the ray or the step limit is reached.
    #[allow(clippy::float_cmp)]
    fn advance(&mut self, step: u32, ray: &Ray) -> Option<Vec3d> {
        if self.t_max == ray.t {
            return None;
        }
        self.t_min = self.t_max;
        self.t_max = ray.t.min((f64::from(step) + self.offset) * self.size);
        let shade_t = self.t_min.lerp(self.t_max, self.shade_offset);
        (step < self.max_steps).then(|| ray.at(shade_t))
    }

    fn length(&self) -> f64 {
        self.t_max - self.t_min
    }
}

/// Transmittance of the volumes on `stack` along the shadow segment `ray`.
pub(crate) fn volume_shadow_transmittance<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    sd: &mut ShaderData,
    stack: &VolumeStack,
    ray: &Ray,
    rng: &RngState,
) -> Spectrum {
    let step_size = stack.step_size(
        kg.scene,
        kg.data.integrator.volume_step_rate,
        kg.data.background.volume_step_size,
    );
    let mut vstep = VolumeStep::new(&kg.data.integrator, rng, step_size, ray.t, true);
    sd.setup_from_volume(ray);

    let mut tp = Spectrum::ONE;
    let mut sum = Spectrum::ZERO;
    let mut step = 0;
    while let Some(p) = vstep.advance(step, ray) {
        sd.p = p;
        volume_shader_eval(kg, sd, stack, PathRayFlag::SHADOW);
        if sd.flag.contains(ShaderFlag::EXTINCTION) {
            sum -= sd.closure_transparent_extinction * vstep.length();
        }
        // the exponential is only worth it every few steps
        if step & 0x07 == 0 {
            tp = spectrum_exp(sum);
            if tp.max_element() < VOLUME_THROUGHPUT_EPSILON {
                break;
            }
        }
        step += 1;
    }
    #[allow(clippy::float_cmp)]
    if vstep.t_max == ray.t {
        tp = spectrum_exp(sum);
    }
    tp
}

/// Point light position for equiangular sampling and the range of the segment.
#[derive(Clone, Copy, Debug)]
struct EquiangularCoefficients {
    p: Vec3d,
    t_min: f64,
    t_max: f64,
}

impl EquiangularCoefficients {
    /// Foot of the perpendicular from the light onto the ray and the distance to it.
    fn project(&self, ray: &Ray) -> (f64, f64) {
        let delta = (self.p - ray.p).dot(ray.d);
        let d = (self.p - ray.p - ray.d * delta).length();
        (delta, d)
    }

    /// Distance along `ray` sampled proportionally to the inverse squared distance to the
    /// light, with its density.
    fn sample(&self, ray: &Ray, xi: f64) -> (f64, f64) {
        let (delta, d) = self.project(ray);
        if d == 0.0 {
            return (0.0, 0.0);
        }
        let theta_a = (self.t_min - delta).atan2(d);
        let theta_b = (self.t_max - delta).atan2(d);
        let theta_d = theta_b - theta_a;
        if theta_d < 1e-6 {
            // the light sits on the extension of the segment
            let length = self.t_max - self.t_min;
            return (self.t_min.lerp(self.t_max, xi), safe_divide(1.0, length));
        }
        let t = d * xi.mul_add(theta_b, (1.0 - xi) * theta_a).tan();
        let pdf = d / (theta_d * (d * d + t * t));
        ((delta + t).clamp(self.t_min, self.t_max), pdf)
    }

    fn pdf(&self, ray: &Ray, sample_t: f64) -> f64 {
        let (delta, d) = self.project(ray);
        if d == 0.0 {
            return 0.0;
        }
        let theta_a = (self.t_min - delta).atan2(d);
        let theta_b = (self.t_max - delta).atan2(d);
        let theta_d = theta_b - theta_a;
        if theta_d < 1e-6 {
            return safe_divide(1.0, self.t_max - self.t_min);
        }
        let t = sample_t - delta;
        d / (theta_d * (d * d + t * t))
    }
}

/// Emission integrated over a step of length `t`, attenuated by the extinction inside the
/// step.
fn volume_emission_integrate(
    coeff: &VolumeCoefficients,
    closure_flag: ShaderFlag,
    t: f64,
) -> Spectrum {
    if !closure_flag.contains(ShaderFlag::EXTINCTION) {
        return coeff.emission * t;
    }
    let integrate = |emission: f64, sigma_t: f64| {
        let optical_depth = sigma_t * t;
        if optical_depth > 1e-5 {
            emission * (1.0 - (-optical_depth).exp()) / sigma_t
        } else {
            // first order expansion of the exponential
            emission * t * optical_depth.mul_add(-0.5, 1.0)
        }
    };
    Spectrum::new(
        integrate(coeff.emission.x, coeff.sigma_t.x),
        integrate(coeff.emission.y, coeff.sigma_t.y),
        integrate(coeff.emission.z, coeff.sigma_t.z),
    )
}

/// Picks the color channel that drives distance sampling, proportionally to the throughput
/// weighted albedo. `rand` is rescaled for reuse.
fn volume_sample_channel(
    albedo: Spectrum,
    throughput: Spectrum,
    rand: &mut f64,
) -> (usize, Spectrum) {
    let weights = (throughput * albedo).abs();
    let sum = weights.x + weights.y + weights.z;
    let pdf = if sum > 0.0 {
        weights / sum
    } else {
        Spectrum::splat(1.0 / 3.0)
    };
    let mut cdf = 0.0;
    for channel in 0..3 {
        let channel_pdf = pdf.channel(channel);
        if *rand < cdf + channel_pdf || channel == 2 {
            if channel_pdf > 0.0 {
                *rand = ((*rand - cdf) / channel_pdf).min(1.0 - f64::EPSILON);
            }
            return (channel, pdf);
        }
        cdf += channel_pdf;
    }
    (2, pdf)
}

/// Scatter positions found along the segment.
#[derive(Clone, Copy, Debug, Default)]
struct VolumeIntegrateResult {
    direct_scatter: bool,
    direct_t: f64,
    direct_throughput: Spectrum,
    direct_phases: ShaderVolumePhases,
    indirect_scatter: bool,
    indirect_t: f64,
    indirect_throughput: Spectrum,
    indirect_phases: ShaderVolumePhases,
}

impl VolumeIntegrateResult {
    /// Nothing left to find once both positions are known or neither can contribute anymore.
    fn should_stop(&self) -> bool {
        (self.direct_scatter || self.direct_throughput == Spectrum::ZERO)
            && (self.indirect_scatter || self.indirect_throughput == Spectrum::ZERO)
    }
}

/// Sampling state carried along the steps of the main path.
#[derive(Clone, Copy, Debug)]
struct VolumeMarchingState {
    rscatter: f64,
    rchannel: f64,
    direct_sample_method: VolumeSampleMethod,
    use_mis: bool,
    distance_pdf: f64,
    equiangular_pdf: f64,
}

impl VolumeMarchingState {
    fn new(rng: &RngState, direct_sample_method: VolumeSampleMethod) -> Self {
        let mut rscatter = rng.rng_1d(PRNG_SCATTER_DISTANCE);
        let mut direct_sample_method = direct_sample_method;
        let use_mis = direct_sample_method == VolumeSampleMethod::Mis;
        // one sample model: the random number picks the strategy and is reused by it
        if use_mis {
            if rscatter < 0.5 {
                rscatter *= 2.0;
                direct_sample_method = VolumeSampleMethod::Distance;
            } else {
                rscatter = (rscatter - 0.5) * 2.0;
                direct_sample_method = VolumeSampleMethod::Equiangular;
            }
        }
        Self {
            rscatter,
            rchannel: rng.rng_1d(PRNG_PHASE_CHANNEL),
            direct_sample_method,
            use_mis,
            distance_pdf: 1.0,
            equiangular_pdf: 0.0,
        }
    }

    /// Distance sampling of the indirect scatter position inside the current step. Returns
    /// true once it scattered.
    #[allow(clippy::too_many_arguments)]
    fn sample_indirect_scatter(
        &mut self,
        sd: &ShaderData,
        coeff: &VolumeCoefficients,
        transmittance: Spectrum,
        channel_pdf: Spectrum,
        channel: usize,
        t_min: f64,
        result: &mut VolumeIntegrateResult,
    ) -> bool {
        if result.indirect_scatter {
            return false;
        }
        let sample_transmittance = transmittance.channel(channel);
        let sample_sigma_t = coeff.sigma_t.channel(channel);
        if 1.0 - self.rscatter >= sample_transmittance && sample_sigma_t > 0.0 {
            let new_dt = -(1.0 - self.rscatter).ln() / sample_sigma_t;
            let new_transmittance = volume_color_transmittance(coeff.sigma_t, new_dt);
            let distance_pdf = channel_pdf.dot(coeff.sigma_t * new_transmittance);
            if self.distance_pdf * distance_pdf > VOLUME_SAMPLE_PDF_CUTOFF {
                result.indirect_scatter = true;
                result.indirect_t = t_min + new_dt;
                result.indirect_throughput *= coeff.sigma_s * new_transmittance / distance_pdf;
                if self.direct_sample_method == VolumeSampleMethod::Distance {
                    self.distance_pdf *= distance_pdf;
                }
                result.indirect_phases = ShaderVolumePhases::from_shader_data(sd);
                return true;
            }
        } else {
            let distance_pdf = channel_pdf.dot(transmittance);
            result.indirect_throughput *= transmittance / distance_pdf;
            if self.direct_sample_method == VolumeSampleMethod::Distance {
                self.distance_pdf *= distance_pdf;
            }
            // the number is reused further along the ray
            self.rscatter = 1.0 - (1.0 - self.rscatter) / sample_transmittance;
        }
        false
    }

    /// Scattering and absorption of one step.
    #[allow(clippy::too_many_arguments)]
    fn step_scattering(
        &mut self,
        sd: &ShaderData,
        ray: &Ray,
        equiangular: &EquiangularCoefficients,
        coeff: &VolumeCoefficients,
        transmittance: Spectrum,
        t_min: f64,
        t_max: f64,
        result: &mut VolumeIntegrateResult,
    ) {
        // channels without extinction get an albedo of one, a distance sampled for them
        // always ends up past the step
        let albedo = Spectrum::new(
            safe_divide_or(coeff.sigma_s.x, coeff.sigma_t.x),
            safe_divide_or(coeff.sigma_s.y, coeff.sigma_t.y),
            safe_divide_or(coeff.sigma_s.z, coeff.sigma_t.z),
        );
        let (channel, channel_pdf) =
            volume_sample_channel(albedo, result.indirect_throughput, &mut self.rchannel);

        if self.direct_sample_method == VolumeSampleMethod::Equiangular && !result.direct_scatter
        {
            if (t_min..=t_max).contains(&result.direct_t)
                && self.equiangular_pdf > VOLUME_SAMPLE_PDF_CUTOFF
            {
                let new_dt = result.direct_t - t_min;
                let new_transmittance = volume_color_transmittance(coeff.sigma_t, new_dt);
                result.direct_scatter = true;
                result.direct_throughput *=
                    coeff.sigma_s * new_transmittance / self.equiangular_pdf;
                result.direct_phases = ShaderVolumePhases::from_shader_data(sd);
                if self.use_mis {
                    let distance_pdf =
                        self.distance_pdf * channel_pdf.dot(coeff.sigma_t * new_transmittance);
                    result.direct_throughput *=
                        2.0 * power_heuristic(self.equiangular_pdf, distance_pdf);
                }
            } else {
                result.direct_throughput *= transmittance;
                self.distance_pdf *= channel_pdf.dot(transmittance);
            }
        }

        if self.sample_indirect_scatter(
            sd,
            coeff,
            transmittance,
            channel_pdf,
            channel,
            t_min,
            result,
        ) && self.direct_sample_method == VolumeSampleMethod::Distance
        {
            // direct light is gathered where the path scatters
            result.direct_scatter = true;
            result.direct_t = result.indirect_t;
            result.direct_throughput = result.indirect_throughput;
            result.direct_phases = result.indirect_phases;
            if self.use_mis {
                let equiangular_pdf = equiangular.pdf(ray, result.indirect_t);
                result.direct_throughput *=
                    2.0 * power_heuristic(self.distance_pdf, equiangular_pdf);
            }
        }
    }
}

fn safe_divide_or(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        1.0
    } else {
        a / b
    }
}

/// Outcome of a volume segment for the main path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum VolumeIntegrateEvent {
    /// The path ends inside the volume.
    Missed,
    /// The path continues to whatever ended the segment.
    Attenuated,
    /// The path scattered inside the volume and continues in a new direction.
    Scattered,
}

/// Light sample from the start of the segment. Its position steers the direct scatter
/// position, lights without one fall back to distance sampling.
fn volume_direct_sample<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    state: &IntegratorState,
    ray: &Ray,
    rng: &RngState,
) -> (Option<LightSample>, VolumeSampleMethod) {
    let path = &state.path;
    if path.flag.intersects(PathRayFlag::TERMINATE) || !kg.data.integrator.use_direct_light {
        return (None, VolumeSampleMethod::None);
    }
    let (u, v) = rng.rng_2d(PRNG_LIGHT_U);
    let Some(ls) = kg.scene.sample_light(ray.p, u, v, path.bounce, path.flag) else {
        return (None, VolumeSampleMethod::None);
    };
    if ls.exclude.contains(ShaderExclude::SCATTER) {
        return (None, VolumeSampleMethod::None);
    }
    let method = if ls.t < RAY_T_MAX {
        state.volume_stack.sample_method(kg.scene)
    } else {
        VolumeSampleMethod::Distance
    };
    (Some(ls), method)
}

/// Marches along `ray`, writing the emission of the volumes and finding the scatter
/// positions.
fn volume_integrate<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    state: &mut IntegratorState,
    film: &Film,
    ray: &Ray,
) -> VolumeIntegrateEvent {
    let rng = state.rng();
    let mut sd = ShaderData::new(kg.data.max_closures);
    sd.setup_from_volume(ray);

    let (ls, direct_sample_method) = volume_direct_sample(kg, state, ray, &rng);
    let equiangular = EquiangularCoefficients {
        p: ls.as_ref().map_or(Vec3d::ZERO, |ls| ls.p),
        t_min: 0.0,
        t_max: ray.t,
    };
    let step_size = state.volume_stack.step_size(
        kg.scene,
        kg.data.integrator.volume_step_rate,
        kg.data.background.volume_step_size,
    );
    let mut vstep = VolumeStep::new(&kg.data.integrator, &rng, step_size, ray.t, false);
    let mut vstate = VolumeMarchingState::new(&rng, direct_sample_method);

    let throughput = state.path.throughput;
    let mut result = VolumeIntegrateResult {
        direct_throughput: if direct_sample_method == VolumeSampleMethod::None {
            Spectrum::ZERO
        } else {
            throughput
        },
        indirect_throughput: throughput,
        ..VolumeIntegrateResult::default()
    };
    if vstate.direct_sample_method == VolumeSampleMethod::Equiangular {
        let (t, pdf) = equiangular.sample(ray, vstate.rscatter);
        result.direct_t = t;
        vstate.equiangular_pdf = pdf;
    }

    let mut accum_emission = Spectrum::ZERO;
    let mut step = 0;
    while let Some(p) = vstep.advance(step, ray) {
        step += 1;
        sd.p = p;
        let Some(coeff) = volume_shader_sample(kg, &mut sd, &state.volume_stack, state.path.flag)
        else {
            continue;
        };
        let closure_flag = sd.flag;
        let dt = vstep.length();
        let transmittance = if closure_flag.contains(ShaderFlag::EXTINCTION) {
            volume_color_transmittance(coeff.sigma_t, dt)
        } else {
            Spectrum::ONE
        };

        // past the indirect scatter position only the direct light is still searched for
        if closure_flag.contains(ShaderFlag::EMISSION) && !result.indirect_scatter {
            accum_emission +=
                result.indirect_throughput * volume_emission_integrate(&coeff, closure_flag, dt);
        }

        if closure_flag.contains(ShaderFlag::SCATTER) {
            vstate.step_scattering(
                &sd,
                ray,
                &equiangular,
                &coeff,
                transmittance,
                vstep.t_min,
                vstep.t_max,
                &mut result,
            );
        } else if closure_flag.contains(ShaderFlag::EXTINCTION) {
            result.indirect_throughput *= transmittance;
            result.direct_throughput *= transmittance;
        }

        if !result.indirect_scatter
            && result.indirect_throughput.max_element() < VOLUME_THROUGHPUT_EPSILON
        {
            result.indirect_throughput = Spectrum::ZERO;
        }
        if result.should_stop() {
            break;
        }
    }

    if accum_emission != Spectrum::ZERO {
        write_emission(film, &state.path, accum_emission);
    }

    volume_integrate_event(kg, state, ray, &mut sd, &rng, ls.is_some(), &result)
}

/// Next event estimation from a scatter point inside the volume.
fn integrate_volume_direct_light<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    state: &mut IntegratorState,
    rng: &RngState,
    ray: &Ray,
    p: Vec3d,
    phases: &ShaderVolumePhases,
    throughput: Spectrum,
) {
    // the same light again, sampled from the scatter point
    let (u, v) = rng.rng_2d(PRNG_LIGHT_U);
    let Some(ls) = kg
        .scene
        .sample_light(p, u, v, state.path.bounce, state.path.flag)
    else {
        return;
    };
    if ls.exclude.contains(ShaderExclude::SCATTER) || ls.pdf <= 0.0 {
        return;
    }

    let (phase_value, phase_pdf) = phases.eval(-ray.d, ls.d);
    let mut phase_eval = BsdfEval::new(false, phase_value);
    phase_eval.mul(kg.scene.eval_light(&ls) / ls.pdf * light_sample_mis_weight(&ls, phase_pdf));
    if light_sample_terminate(
        &kg.data.integrator,
        &mut phase_eval,
        rng.rng_1d(PRNG_LIGHT_TERMINATE),
    ) {
        return;
    }

    let shadow_ray = volume_shadow_ray(p, &ls);
    let path_flag = state.path.flag;
    let shadow = state.init_shadow_path(false, shadow_ray, throughput * phase_eval.sum);
    if !path_flag.intersects(PathRayFlag::SURFACE_PASS | PathRayFlag::VOLUME_PASS) {
        // directly lit volume, no diffuse and glossy split
        shadow.flag |= PathRayFlag::VOLUME_PASS;
        shadow.pass_diffuse_weight = Spectrum::ONE;
        shadow.pass_glossy_weight = Spectrum::ZERO;
    }
}

/// Samples a new direction from the phase functions at `sd.p`. Returns false when no valid
/// direction was found.
fn integrate_volume_phase_scatter<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    state: &mut IntegratorState,
    sd: &ShaderData,
    rng: &RngState,
    phases: &ShaderVolumePhases,
) -> bool {
    let (u, v) = rng.rng_2d(PRNG_BSDF_U);
    let sample = phases.sample(sd.i, u, v);
    if !sample.is_valid() || sample.eval == Spectrum::ZERO {
        return false;
    }

    state.ray = Ray::new(sd.p, sample.omega_in.normalize(), RAY_T_MAX);
    state.isect = None;

    let path = &mut state.path;
    path.throughput *= sample.eval / sample.pdf;
    if path.bounce == 0 {
        path.set_pass_weights(Spectrum::ONE, Spectrum::ZERO);
    }
    path.mis_ray_pdf = sample.pdf;
    path.mis_ray_t = 0.0;
    path.min_ray_pdf = path.min_ray_pdf.min(sample.pdf);
    debug_assert!(sample.label.contains(ClosureLabel::VOLUME_SCATTER));
    path.next(&kg.data.integrator, sample.label);
    true
}

/// Applies the scatter positions found along the segment to the path.
fn volume_integrate_event<S: Scene>(
    kg: &KernelGlobals<'_, S>,
    state: &mut IntegratorState,
    ray: &Ray,
    sd: &mut ShaderData,
    rng: &RngState,
    has_light_sample: bool,
    result: &VolumeIntegrateResult,
) -> VolumeIntegrateEvent {
    // emission and absorption were still accounted for a path flagged to end here
    let continuation_probability = if state
        .path
        .flag
        .contains(PathRayFlag::TERMINATE_IN_NEXT_VOLUME)
    {
        0.0
    } else {
        state.path.continuation_probability
    };
    if continuation_probability == 0.0 {
        return VolumeIntegrateEvent::Missed;
    }

    if result.direct_scatter && has_light_sample {
        integrate_volume_direct_light(
            kg,
            state,
            rng,
            ray,
            ray.at(result.direct_t),
            &result.direct_phases,
            result.direct_throughput / continuation_probability,
        );
    }

    // attenuated paths are divided by the next surface
    let mut throughput = result.indirect_throughput;
    if result.indirect_scatter {
        throughput /= continuation_probability;
    }
    state.path.throughput = throughput;

    if !result.indirect_scatter {
        return VolumeIntegrateEvent::Attenuated;
    }
    sd.p = ray.at(result.indirect_t);
    if integrate_volume_phase_scatter(kg, state, sd, rng, &result.indirect_phases) {
        VolumeIntegrateEvent::Scattered
    } else {
        VolumeIntegrateEvent::Missed
    }
}

/// Integrates the volumes along the last segment of the path, then continues with whatever
/// ended the segment.
pub fn shade_volume<S: Scene>(kg: &KernelGlobals<'_, S>, state: &mut IntegratorState, film: &Film) {
    let isect = state.isect;
    let mut ray = state.ray;
    ray.t = isect.map_or(RAY_T_MAX, |hit| hit.t);
    if isect.is_none() {
        // stale entries would leak into the background
        state.volume_stack.clean(kg.data.background.volume_shader);
    }

    let event = if state.volume_stack.is_empty() {
        VolumeIntegrateEvent::Attenuated
    } else {
        volume_integrate(kg, state, film, &ray)
    };

    state.path.queued_kernel = match event {
        VolumeIntegrateEvent::Missed => {
            debug!(bounce = state.path.bounce, "path ended inside volume");
            None
        }
        VolumeIntegrateEvent::Attenuated => Some(match isect {
            Some(hit) if hit.kind == PrimitiveKind::Light => DeviceKernel::ShadeLight,
            Some(hit) => shader_next_kernel(kg, kg.scene.intersection_shader_flags(&hit)),
            None => DeviceKernel::ShadeBackground,
        }),
        VolumeIntegrateEvent::Scattered => Some(DeviceKernel::IntersectClosest),
    };
}
