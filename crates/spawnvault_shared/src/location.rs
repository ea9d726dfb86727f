//! # World Locations
//!
//! A [`Location`] is a point inside one world. The horizontal plane is cut
//! into [`ChunkCoord`] cells (the spatial index used by presence checks),
//! and chunks are grouped into [`RegionCoord`]s (the unit of executor
//! affinity).

use serde::{Deserialize, Serialize};

use crate::constants::{CHUNK_SHIFT, CHUNK_SIZE, REGION_SHIFT};
use crate::ids::WorldId;
use crate::math::Vec3;

/// A point in a specific world.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// World the point belongs to.
    pub world: WorldId,
    /// Position inside the world.
    pub position: Vec3,
}

impl Location {
    /// Creates a new location.
    #[inline]
    #[must_use]
    pub const fn new(world: WorldId, position: Vec3) -> Self {
        Self { world, position }
    }

    /// Chunk cell containing this location.
    #[inline]
    #[must_use]
    pub fn chunk(&self) -> ChunkCoord {
        ChunkCoord::from_position(self.position)
    }

    /// Region containing this location.
    #[inline]
    #[must_use]
    pub fn region(&self) -> RegionCoord {
        self.chunk().region()
    }
}

/// Chunk coordinate (identifies a cell in the world grid).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkCoord {
    /// X coordinate (in chunks, not blocks).
    pub x: i32,
    /// Z coordinate (in chunks, not blocks).
    pub z: i32,
}

impl ChunkCoord {
    /// Creates a new chunk coordinate.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Converts world block coordinates to chunk coordinate.
    #[inline]
    #[must_use]
    pub const fn from_block_pos(block_x: i32, block_z: i32) -> Self {
        Self {
            x: block_x >> CHUNK_SHIFT,
            z: block_z >> CHUNK_SHIFT,
        }
    }

    /// Converts a continuous position to the chunk containing it.
    #[inline]
    #[must_use]
    pub fn from_position(position: Vec3) -> Self {
        Self::from_block_pos(position.x.floor() as i32, position.z.floor() as i32)
    }

    /// Returns the world X coordinate of the chunk's origin (corner).
    #[inline]
    #[must_use]
    pub const fn world_x(self) -> i32 {
        self.x * CHUNK_SIZE
    }

    /// Returns the world Z coordinate of the chunk's origin.
    #[inline]
    #[must_use]
    pub const fn world_z(self) -> i32 {
        self.z * CHUNK_SIZE
    }

    /// Region this chunk belongs to.
    #[inline]
    #[must_use]
    pub const fn region(self) -> RegionCoord {
        RegionCoord {
            x: self.x >> REGION_SHIFT,
            z: self.z >> REGION_SHIFT,
        }
    }

    /// All chunks overlapping the square footprint `center ± radius`.
    ///
    /// The footprint is horizontal only; vertical distance is checked by the
    /// caller against the actual entities found in each cell. A negative
    /// or non-finite radius covers nothing.
    #[must_use]
    pub fn covering(center: Vec3, radius: f32) -> Vec<Self> {
        if !(radius.is_finite() && radius >= 0.0) {
            return Vec::new();
        }
        let min = Self::from_position(Vec3::new(center.x - radius, 0.0, center.z - radius));
        let max = Self::from_position(Vec3::new(center.x + radius, 0.0, center.z + radius));

        let width = (max.x - min.x + 1).max(0) as usize;
        let depth = (max.z - min.z + 1).max(0) as usize;
        let mut cells = Vec::with_capacity(width * depth);
        for x in min.x..=max.x {
            for z in min.z..=max.z {
                cells.push(Self::new(x, z));
            }
        }
        cells
    }
}

/// Region coordinate: a 32 x 32 block of chunks sharing one executor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegionCoord {
    /// X coordinate (in regions).
    pub x: i32,
    /// Z coordinate (in regions).
    pub z: i32,
}

impl RegionCoord {
    /// Creates a new region coordinate.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}
