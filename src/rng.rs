//! Deterministic random numbers.
//!
//! Every number is a hash of the pixel, the sample index and a dimension, so a path draws the
//! same numbers no matter which thread runs it or in which order paths are scheduled.

/// Dimensions drawn once per camera path.
pub const PRNG_FILTER_U: u32 = 0;
pub const PRNG_FILTER_V: u32 = 1;
pub const PRNG_LENS_U: u32 = 2;
pub const PRNG_LENS_V: u32 = 3;
pub const PRNG_TIME: u32 = 4;
pub const PRNG_BASE_NUM: u32 = 10;

/// Dimensions drawn per bounce, relative to the path's offset.
pub const PRNG_BSDF_U: u32 = 0;
pub const PRNG_BSDF_V: u32 = 1;
pub const PRNG_LIGHT_U: u32 = 2;
pub const PRNG_LIGHT_V: u32 = 3;
pub const PRNG_LIGHT_TERMINATE: u32 = 4;
pub const PRNG_TERMINATE: u32 = 5;
pub const PRNG_PHASE_CHANNEL: u32 = 6;
pub const PRNG_SCATTER_DISTANCE: u32 = 7;
pub const PRNG_BOUNCE_NUM: u32 = 8;

/// Scrambles the seed of the subsurface probe's local intersection.
pub const LCG_SUBSURFACE_SCRAMBLE: u32 = 0x68bc_21eb;
/// Scrambles of the ray marching offsets, see [`RngState::rng_1d_hash`].
pub const HASH_VOLUME_SHADE_OFFSET: u32 = 0x1e31_d8a4;
pub const HASH_VOLUME_STEP_OFFSET: u32 = 0x3d22_c7b3;

const HASH_INIT: u32 = 0xdead_beef;

#[allow(clippy::many_single_char_names)]
const fn hash_final(mut a: u32, mut b: u32, mut c: u32) -> u32 {
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(14));
    a ^= c;
    a = a.wrapping_sub(c.rotate_left(11));
    b ^= a;
    b = b.wrapping_sub(a.rotate_left(25));
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(16));
    a ^= c;
    a = a.wrapping_sub(c.rotate_left(4));
    b ^= a;
    b = b.wrapping_sub(a.rotate_left(14));
    c ^= b;
    c.wrapping_sub(b.rotate_left(24))
}

/// Bob Jenkins' lookup3 hash of two words.
#[must_use]
pub const fn hash_uint2(kx: u32, ky: u32) -> u32 {
    let init = HASH_INIT.wrapping_add((2 << 2) + 13);
    hash_final(init.wrapping_add(kx), init.wrapping_add(ky), init)
}

/// Bob Jenkins' lookup3 hash of three words.
#[must_use]
pub const fn hash_uint3(kx: u32, ky: u32, kz: u32) -> u32 {
    let init = HASH_INIT.wrapping_add((3 << 2) + 13);
    hash_final(
        init.wrapping_add(kx),
        init.wrapping_add(ky),
        init.wrapping_add(kz),
    )
}

/// Maps a hash to `[0, 1)`.
#[must_use]
pub fn uint_to_unit(h: u32) -> f64 {
    f64::from(h) / 4_294_967_296.0
}

/// Seed of all random numbers of a pixel.
#[must_use]
pub const fn pixel_rng_hash(x: u32, y: u32, seed: u32) -> u32 {
    hash_uint3(x, y, seed)
}

/// Position of a path in the random number stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RngState {
    pub rng_hash: u32,
    pub rng_offset: u32,
    pub sample: u32,
}

impl RngState {
    #[must_use]
    pub const fn new(rng_hash: u32, rng_offset: u32, sample: u32) -> Self {
        Self {
            rng_hash,
            rng_offset,
            sample,
        }
    }

    /// Number in `[0, 1)` for `dimension` at the current offset.
    #[must_use]
    pub fn rng_1d(&self, dimension: u32) -> f64 {
        uint_to_unit(hash_uint3(
            self.rng_hash,
            self.sample,
            self.rng_offset.wrapping_add(dimension),
        ))
    }

    /// Numbers for `dimension` and the one following it.
    #[must_use]
    pub fn rng_2d(&self, dimension: u32) -> (f64, f64) {
        (self.rng_1d(dimension), self.rng_1d(dimension + 1))
    }

    /// Number in `[0, 1)` decorrelated from the regular dimensions by `scramble`.
    #[must_use]
    pub fn rng_1d_hash(&self, scramble: u32) -> f64 {
        Self {
            rng_hash: hash_uint2(self.rng_hash, scramble),
            ..*self
        }
        .rng_1d(0)
    }

    /// Seeds a linear congruential generator for loops with an unknown number of draws.
    #[must_use]
    pub fn lcg_state(&self, scramble: u32) -> u32 {
        lcg_init(
            self.rng_hash
                .wrapping_add(self.rng_offset)
                .wrapping_add(self.sample.wrapping_mul(scramble)),
        )
    }
}

pub fn lcg_step_uint(state: &mut u32) -> u32 {
    *state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
    *state
}

/// Next number in `[0, 1)`.
pub fn lcg_step_float(state: &mut u32) -> f64 {
    uint_to_unit(lcg_step_uint(state))
}

#[must_use]
pub fn lcg_init(seed: u32) -> u32 {
    let mut state = seed;
    lcg_step_uint(&mut state);
    state
}
