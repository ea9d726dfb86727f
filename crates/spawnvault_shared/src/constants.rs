//! # Grid Constants
//!
//! The world is partitioned into square chunks, and chunks are grouped
//! into regions. Each region is owned by exactly one serial executor.
//!
//! **CRITICAL:** Changing these values remaps every spawner to a different
//! executor. Only change them while the server is stopped.

// =============================================================================
// CHUNK GRID
// =============================================================================

/// log2 of the chunk width in blocks.
pub const CHUNK_SHIFT: u32 = 4;

/// Chunk width/depth in blocks.
pub const CHUNK_SIZE: i32 = 1 << CHUNK_SHIFT;

// =============================================================================
// REGION GRID
// =============================================================================

/// log2 of the region width in chunks (32 x 32 chunks per region).
pub const REGION_SHIFT: u32 = 5;
