//! # Spawnvault Shared
//!
//! Common types used by the economy and the runtime crates.
//!
//! ## CRITICAL RULE
//!
//! This crate must NEVER depend on the economy or the runtime.
//! It only describes *where* things are and *who* they are.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod constants;
pub mod ids;
pub mod location;
pub mod math;

pub use constants::{CHUNK_SHIFT, CHUNK_SIZE, REGION_SHIFT};
pub use ids::{ActorId, SpawnerId, WorldId};
pub use location::{ChunkCoord, Location, RegionCoord};
pub use math::Vec3;
