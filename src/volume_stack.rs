//! The volumes enclosing a ray.
//!
//! Entries are kept in a fixed size array. The first entry with [`SHADER_NONE`] terminates the
//! active prefix, so there is always room for one terminator behind the last volume.
use crate::{
    config::MAX_VOLUME_STACK_SIZE,
    scene::SceneIntersect,
    shader::{ObjectFlag, ShaderData, ShaderFlag},
    OBJECT_NONE, SHADER_NONE,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VolumeStackEntry {
    pub object: i32,
    pub shader: i32,
}

impl VolumeStackEntry {
    pub const TERMINATOR: Self = Self {
        object: OBJECT_NONE,
        shader: SHADER_NONE,
    };

    #[must_use]
    pub const fn new(object: i32, shader: i32) -> Self {
        Self { object, shader }
    }

    #[must_use]
    pub const fn is_terminator(&self) -> bool {
        self.shader == SHADER_NONE
    }
}

/// Distance sampling strategy for a volume segment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum VolumeSampleMethod {
    #[default]
    None,
    Distance,
    Equiangular,
    /// Both strategies combined with multiple importance sampling
    Mis,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumeStack {
    entries: [VolumeStackEntry; MAX_VOLUME_STACK_SIZE],
    /// Usable entries, the terminator included
    size: usize,
}

impl VolumeStack {
    /// Empty stack with room for `size - 1` volumes.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            entries: [VolumeStackEntry::TERMINATOR; MAX_VOLUME_STACK_SIZE],
            size: size.clamp(1, MAX_VOLUME_STACK_SIZE),
        }
    }

    /// Stack holding only the world volume, if there is one.
    #[must_use]
    pub fn with_world(size: usize, world_shader: i32) -> Self {
        let mut stack = Self::new(size);
        if world_shader != SHADER_NONE && stack.size > 1 {
            stack.entries[0] = VolumeStackEntry::new(OBJECT_NONE, world_shader);
        }
        stack
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries[..self.size]
            .iter()
            .position(VolumeStackEntry::is_terminator)
            .unwrap_or(self.size)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries[0].is_terminator()
    }

    /// The active entries, in the order they were entered.
    pub fn iter(&self) -> impl Iterator<Item = &VolumeStackEntry> {
        self.entries[..self.size]
            .iter()
            .take_while(|entry| !entry.is_terminator())
    }

    /// Entry at `index`, the terminator for anything past the end.
    #[must_use]
    pub fn get(&self, index: usize) -> VolumeStackEntry {
        self.entries[..self.size]
            .get(index)
            .copied()
            .unwrap_or(VolumeStackEntry::TERMINATOR)
    }

    /// Overwrites the entry at `index`. Writes past the end are ignored.
    pub fn write(&mut self, index: usize, entry: VolumeStackEntry) {
        if let Some(slot) = self.entries[..self.size].get_mut(index) {
            *slot = entry;
        }
    }

    /// Whether `object` is on the stack.
    #[must_use]
    pub fn contains(&self, object: i32) -> bool {
        self.iter().any(|entry| entry.object == object)
    }

    /// Updates the stack for a ray crossing the surface of `sd`. Crossing from the back exits
    /// the object's volume, crossing from the front enters it. Entering is ignored when the
    /// object is already inside or the stack is full, exiting when the object is not on it.
    pub fn enter_exit(&mut self, sd: &ShaderData) {
        if !sd.flag.contains(ShaderFlag::HAS_VOLUME) {
            return;
        }
        if sd.flag.contains(ShaderFlag::BACKFACING) {
            self.exit(sd.object);
        } else {
            self.enter(VolumeStackEntry::new(sd.object, sd.shader));
        }
    }

    fn exit(&mut self, object: i32) {
        let Some(index) = self.iter().position(|entry| entry.object == object) else {
            return;
        };
        // shift the entries behind it down, the terminator included
        let mut i = index;
        loop {
            let next = self.get(i + 1);
            self.write(i, next);
            i += 1;
            if next.is_terminator() || i >= self.size {
                break;
            }
        }
    }

    fn enter(&mut self, entry: VolumeStackEntry) {
        if self.contains(entry.object) {
            return;
        }
        let i = self.len();
        if i + 1 >= self.size {
            return;
        }
        self.write(i, entry);
        self.write(i + 1, VolumeStackEntry::TERMINATOR);
    }

    /// Drops everything but the world volume. Run after the last bounce, precision issues can
    /// leave stale entries behind otherwise.
    pub fn clean(&mut self, world_shader: i32) {
        if world_shader != SHADER_NONE {
            self.write(1, VolumeStackEntry::TERMINATOR);
        } else {
            self.write(0, VolumeStackEntry::TERMINATOR);
        }
    }

    /// Ray marching step size for the stack, the smallest step of any heterogeneous volume on
    /// it. `f64::MAX` means every volume is homogeneous and one step suffices.
    #[must_use]
    pub fn step_size(
        &self,
        scene: &impl SceneIntersect,
        step_rate: f64,
        world_step_size: f64,
    ) -> f64 {
        let mut step_size = f64::MAX;
        for entry in self.iter() {
            let shader_flag = scene.shader_flags(entry.shader);
            let heterogeneous = if shader_flag.contains(ShaderFlag::HETEROGENEOUS_VOLUME) {
                true
            } else if shader_flag.contains(ShaderFlag::NEED_VOLUME_ATTRIBUTES) {
                // volumes without attributes render as homogeneous, even with a shader that
                // can read them
                entry.object != OBJECT_NONE
                    && scene
                        .object_flags(entry.object)
                        .contains(ObjectFlag::HAS_VOLUME_ATTRIBUTES)
            } else {
                false
            };
            if heterogeneous {
                let object_step_size = if entry.object == OBJECT_NONE {
                    world_step_size
                } else {
                    scene.object_volume_step_size(entry.object)
                };
                step_size = step_size.min(object_step_size * step_rate);
            }
        }
        step_size
    }

    /// Combines the sampling strategies requested by the volumes on the stack. Different
    /// requests anywhere on the stack turn into MIS.
    #[must_use]
    pub fn sample_method(&self, scene: &impl SceneIntersect) -> VolumeSampleMethod {
        let mut method = VolumeSampleMethod::None;
        for entry in self.iter() {
            let shader_flag = scene.shader_flags(entry.shader);
            let requested = if shader_flag.contains(ShaderFlag::VOLUME_MIS) {
                return VolumeSampleMethod::Mis;
            } else if shader_flag.contains(ShaderFlag::VOLUME_EQUIANGULAR) {
                VolumeSampleMethod::Equiangular
            } else {
                VolumeSampleMethod::Distance
            };
            if method == VolumeSampleMethod::None {
                method = requested;
            } else if method != requested {
                return VolumeSampleMethod::Mis;
            }
        }
        method
    }
}
