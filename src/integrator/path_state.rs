//! Bounce bookkeeping of the main path.
use crate::{
    config::{IntegratorData, KernelData},
    integrator::state::{DeviceKernel, IntegratorState, PathState, ShadowState},
    rng::{PRNG_BASE_NUM, PRNG_BOUNCE_NUM},
    volume_stack::VolumeStack,
    ClosureLabel, PathRayFlag, Ray, Spectrum,
};

impl PathState {
    /// Fresh camera path for `sample` of pixel `(x, y)`.
    #[must_use]
    pub fn new(x: u32, y: u32, sample: u32, rng_hash: u32) -> Self {
        Self {
            x,
            y,
            sample,
            rng_hash,
            rng_offset: PRNG_BASE_NUM,
            flag: PathRayFlag::CAMERA
                | PathRayFlag::MIS_SKIP
                | PathRayFlag::TRANSPARENT_BACKGROUND,
            ..Self::default()
        }
    }

    /// Updates the bounce counters and flags for a scattering event with `label`.
    pub fn next(&mut self, data: &IntegratorData, label: ClosureLabel) {
        let mut flag = self.flag;

        // transparency keeps the flags of the previous ray and has its own budget
        if label.contains(ClosureLabel::TRANSPARENT) {
            self.transparent_bounce += 1;
            flag |= PathRayFlag::TRANSPARENT;
            if self.transparent_bounce >= data.transparent_max_bounce {
                flag |= PathRayFlag::TERMINATE_ON_NEXT_SURFACE;
            }
            if !data.transparent_shadows {
                flag |= PathRayFlag::MIS_SKIP;
            }
            self.flag = flag;
            self.rng_offset += PRNG_BOUNCE_NUM;
            return;
        }

        let bounce = self.bounce + 1;
        if bounce >= data.max_bounce {
            flag |= PathRayFlag::TERMINATE_AFTER_TRANSPARENT;
        }
        flag.remove(PathRayFlag::ALL_VISIBILITY | PathRayFlag::MIS_SKIP);

        if label.contains(ClosureLabel::VOLUME_SCATTER) {
            flag |= PathRayFlag::VOLUME_SCATTER;
            flag.remove(PathRayFlag::TRANSPARENT_BACKGROUND);
            if bounce == 1 {
                flag |= PathRayFlag::VOLUME_PASS;
            }
            self.volume_bounce += 1;
            if self.volume_bounce >= data.max_volume_bounce {
                flag |= PathRayFlag::TERMINATE_AFTER_TRANSPARENT;
            }
        } else {
            if label.contains(ClosureLabel::REFLECT) {
                flag |= PathRayFlag::REFLECT;
                flag.remove(PathRayFlag::TRANSPARENT_BACKGROUND);
                if label.contains(ClosureLabel::DIFFUSE) {
                    self.diffuse_bounce += 1;
                    if self.diffuse_bounce >= data.max_diffuse_bounce {
                        flag |= PathRayFlag::TERMINATE_AFTER_TRANSPARENT;
                    }
                } else {
                    self.glossy_bounce += 1;
                    if self.glossy_bounce >= data.max_glossy_bounce {
                        flag |= PathRayFlag::TERMINATE_AFTER_TRANSPARENT;
                    }
                }
            } else {
                debug_assert!(label.contains(ClosureLabel::TRANSMIT));
                flag |= PathRayFlag::TRANSMIT;
                flag.remove(PathRayFlag::TRANSPARENT_BACKGROUND);
                self.transmission_bounce += 1;
                if self.transmission_bounce >= data.max_transmission_bounce {
                    flag |= PathRayFlag::TERMINATE_AFTER_TRANSPARENT;
                }
            }

            if label.contains(ClosureLabel::DIFFUSE) {
                flag |= PathRayFlag::DIFFUSE | PathRayFlag::DIFFUSE_ANCESTOR;
            } else if label.contains(ClosureLabel::GLOSSY) {
                flag |= PathRayFlag::GLOSSY;
            } else {
                debug_assert!(label.contains(ClosureLabel::SINGULAR));
                flag |= PathRayFlag::GLOSSY | PathRayFlag::SINGULAR | PathRayFlag::MIS_SKIP;
            }

            if bounce == 1 {
                flag |= PathRayFlag::SURFACE_PASS;
            }
        }

        self.flag = flag;
        self.bounce = bounce;
        self.rng_offset += PRNG_BOUNCE_NUM;
    }

    /// Visibility of the next ray.
    #[must_use]
    pub fn ray_visibility(&self) -> PathRayFlag {
        self.flag.visibility()
    }

    /// Russian roulette survival probability. The first bounces always survive, later ones
    /// survive proportionally to the throughput.
    #[must_use]
    pub fn continuation_probability(&self, data: &IntegratorData) -> f64 {
        if self.flag.contains(PathRayFlag::TRANSPARENT) {
            if self.transparent_bounce <= data.transparent_min_bounce.max(1) {
                return 1.0;
            }
        } else if self.bounce <= data.min_bounce.max(1) {
            return 1.0;
        }
        // the root roughly matches a typical view transform and terminates a little later
        self.throughput.abs().max_element().sqrt().min(1.0)
    }

    /// Whether indirect light is replaced by ambient occlusion from here on.
    #[must_use]
    pub fn ao_bounce(&self, data: &IntegratorData) -> bool {
        if data.ao_bounces == 0 {
            return false;
        }
        let bounce = i64::from(self.bounce) - i64::from(self.transmission_bounce)
            - i64::from(self.glossy_bounce > 0)
            + 1;
        bounce > i64::from(data.ao_bounces)
    }

    /// Splits the light passes by the first bounce.
    pub fn set_pass_weights(&mut self, diffuse: Spectrum, glossy: Spectrum) {
        self.pass_diffuse_weight = diffuse;
        self.pass_glossy_weight = glossy;
    }
}

impl IntegratorState {
    /// Resets the state for a new camera path. The volume stack starts out with the world
    /// volume only.
    pub fn init_path(&mut self, data: &KernelData, path: PathState) {
        self.path = path;
        self.isect = None;
        self.volume_stack =
            VolumeStack::with_world(data.volume_stack_size, data.background.volume_shader);
        self.shadow.queued_kernel = None;
        self.ao.queued_kernel = None;
    }

    /// Branches a shadow or AO path off the main path. It inherits the bounce counters, random
    /// numbers and volumes of the main path and starts with the intersection kernel.
    pub fn init_shadow_path(
        &mut self,
        ao: bool,
        ray: Ray,
        throughput: Spectrum,
    ) -> &mut ShadowState {
        let path = self.path;
        let volume_stack = self.volume_stack;
        let shadow = self.shadow_mut(ao);
        shadow.rng_offset = path.rng_offset;
        shadow.bounce = path.bounce;
        shadow.transparent_bounce = path.transparent_bounce;
        shadow.flag = path.flag;
        shadow.throughput = throughput;
        shadow.unshadowed_throughput = Spectrum::ZERO;
        shadow.pass_diffuse_weight = path.pass_diffuse_weight;
        shadow.pass_glossy_weight = path.pass_glossy_weight;
        shadow.ray = ray;
        shadow.isect.clear();
        shadow.num_hits = 0;
        shadow.volume_stack = volume_stack;
        shadow.queued_kernel = Some(DeviceKernel::IntersectShadow);
        shadow
    }
}
