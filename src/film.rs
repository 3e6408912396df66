//! Render buffer shared by all paths of a frame.
//!
//! Writes are atomic adds, so any number of threads may accumulate into the same pixel and
//! the result does not depend on the order the paths finish in.
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::Spectrum;

bitflags! {
    /// Render passes. Combined and transparent are always present.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Passes: u32 {
        const COMBINED = 1 << 0;
        /// Alpha of the film, a single channel
        const TRANSPARENT = 1 << 1;
        const EMISSION = 1 << 2;
        const BACKGROUND = 1 << 3;
        const AO = 1 << 4;
        const DIFFUSE = 1 << 5;
        const GLOSSY = 1 << 6;
        const TRANSMISSION = 1 << 7;
        const VOLUME = 1 << 8;

        /// Passes that split the combined light by the type of the last bounce
        const LIGHT = Self::EMISSION.bits()
            | Self::BACKGROUND.bits()
            | Self::DIFFUSE.bits()
            | Self::GLOSSY.bits()
            | Self::TRANSMISSION.bits()
            | Self::VOLUME.bits();
    }
}

impl Passes {
    const fn channels(self) -> usize {
        if self.bits() == Self::TRANSPARENT.bits() {
            1
        } else {
            3
        }
    }
}

/// Accumulated radiance of every pixel and pass. Values are sums over all samples, divide by the
/// sample count to get the estimate.
#[derive(Debug)]
pub struct Film {
    width: u32,
    height: u32,
    passes: Passes,
    /// Channel offset of every single pass inside a pixel, in bit order
    offsets: [Option<usize>; 9],
    stride: usize,
    data: Vec<AtomicU64>,
}

impl Film {
    #[must_use]
    pub fn new(width: u32, height: u32, passes: Passes) -> Self {
        let passes = passes | Passes::COMBINED | Passes::TRANSPARENT;
        let mut offsets = [None; 9];
        let mut stride = 0;
        for (bit, offset) in offsets.iter_mut().enumerate() {
            let pass = Passes::from_bits_truncate(1 << bit);
            if passes.contains(pass) {
                *offset = Some(stride);
                stride += pass.channels();
            }
        }
        let len = width as usize * height as usize * stride;
        Self {
            width,
            height,
            passes,
            offsets,
            stride,
            data: (0..len).map(|_| AtomicU64::new(0.0f64.to_bits())).collect(),
        }
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub const fn passes(&self) -> Passes {
        self.passes
    }

    /// Whether any pass of `passes` is stored.
    #[must_use]
    pub fn has(&self, passes: Passes) -> bool {
        self.passes.intersects(passes)
    }

    fn index(&self, x: u32, y: u32, pass: Passes) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bit = pass.bits().trailing_zeros() as usize;
        let offset = (*self.offsets.get(bit)?)?;
        let pixel = y as usize * self.width as usize + x as usize;
        Some(pixel * self.stride + offset)
    }

    fn add_channel(&self, index: usize, value: f64) {
        // zero and non finite values are dropped, the latter would poison the pixel forever
        if value == 0.0 || !value.is_finite() {
            return;
        }
        let _ = self.data[index].fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
            Some((f64::from_bits(bits) + value).to_bits())
        });
    }

    /// Adds `value` to a color pass of pixel `(x, y)`. Passes that are not stored are ignored.
    pub fn add(&self, x: u32, y: u32, pass: Passes, value: Spectrum) {
        if let Some(index) = self.index(x, y, pass) {
            for (channel, v) in value.to_array().into_iter().enumerate() {
                self.add_channel(index + channel, v);
            }
        }
    }

    /// Adds `value` to the single channel transparent pass.
    pub fn add_transparent(&self, x: u32, y: u32, value: f64) {
        if let Some(index) = self.index(x, y, Passes::TRANSPARENT) {
            self.add_channel(index, value);
        }
    }

    fn read_channel(&self, index: usize) -> f64 {
        f64::from_bits(self.data[index].load(Ordering::Relaxed))
    }

    /// Accumulated value of a color pass, zero for passes that are not stored.
    #[must_use]
    pub fn read(&self, x: u32, y: u32, pass: Passes) -> Spectrum {
        self.index(x, y, pass).map_or(Spectrum::ZERO, |index| {
            Spectrum::new(
                self.read_channel(index),
                self.read_channel(index + 1),
                self.read_channel(index + 2),
            )
        })
    }

    #[must_use]
    pub fn read_transparent(&self, x: u32, y: u32) -> f64 {
        self.index(x, y, Passes::TRANSPARENT)
            .map_or(0.0, |index| self.read_channel(index))
    }

    /// Resets every pass of every pixel to zero.
    pub fn clear(&mut self) {
        for value in &mut self.data {
            *value.get_mut() = 0.0f64.to_bits();
        }
    }
}
