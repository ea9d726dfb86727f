//! # World Query Contract
//!
//! The runtime never owns actors or chunks. It asks a [`WorldQuery`] who is
//! around. [`MemoryWorld`] is the in-process implementation used by the
//! simulation binary and the tests.

use parking_lot::RwLock;
use spawnvault_shared::{ActorId, ChunkCoord, Location, Vec3, WorldId};
use std::collections::{HashMap, HashSet};

/// An actor as seen by presence checks.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Actor {
    /// Actor id.
    pub id: ActorId,
    /// World the actor is in.
    pub world: WorldId,
    /// Current position.
    pub position: Vec3,
    /// Connected to the server.
    pub connected: bool,
    /// Alive.
    pub alive: bool,
    /// In a non-interactive observer mode.
    pub observer: bool,
}

impl Actor {
    /// A connected, alive, interactive actor.
    #[must_use]
    pub fn new(id: ActorId, world: WorldId, position: Vec3) -> Self {
        Self {
            id,
            world,
            position,
            connected: true,
            alive: true,
            observer: false,
        }
    }

    /// Whether this actor can keep spawners active.
    #[inline]
    #[must_use]
    pub fn qualifies(&self) -> bool {
        self.connected && self.alive && !self.observer
    }
}

/// True if `point` lies within `range` of `center` (inclusive).
/// A negative range contains nothing.
#[inline]
#[must_use]
pub fn within_range(center: Vec3, point: Vec3, range: f32) -> bool {
    range >= 0.0 && center.distance_squared(point) <= range * range
}

/// Host world/entity queries.
pub trait WorldQuery: Send + Sync {
    /// Every qualifying actor in a world.
    fn qualifying_actors(&self, world: WorldId) -> Vec<Actor>;

    /// Every actor (qualifying or not) inside one chunk cell.
    fn actors_in_cell(&self, world: WorldId, cell: ChunkCoord) -> Vec<Actor>;

    /// Whether a chunk cell is loaded.
    fn is_cell_loaded(&self, world: WorldId, cell: ChunkCoord) -> bool;

    /// Qualifying actors within `radius` of a location.
    fn qualifying_actors_near(&self, location: Location, radius: f32) -> Vec<Actor> {
        self.qualifying_actors(location.world)
            .into_iter()
            .filter(|actor| within_range(location.position, actor.position, radius))
            .collect()
    }
}

#[derive(Default)]
struct WorldIndex {
    actors: HashMap<ActorId, Actor>,
    cells: HashMap<(WorldId, ChunkCoord), HashSet<ActorId>>,
    loaded: HashSet<(WorldId, ChunkCoord)>,
}

impl WorldIndex {
    fn unindex(&mut self, actor: &Actor) {
        let key = (actor.world, ChunkCoord::from_position(actor.position));
        if let Some(ids) = self.cells.get_mut(&key) {
            ids.remove(&actor.id);
            if ids.is_empty() {
                self.cells.remove(&key);
            }
        }
    }
}

/// In-memory world: actors indexed by chunk cell.
///
/// A cell holding an actor always counts as loaded, like a host world
/// keeping chunks around its players.
#[derive(Default)]
pub struct MemoryWorld {
    index: RwLock<WorldIndex>,
}

impl MemoryWorld {
    /// Creates an empty world.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an actor.
    pub fn upsert_actor(&self, actor: Actor) {
        let mut index = self.index.write();
        if let Some(previous) = index.actors.insert(actor.id, actor) {
            index.unindex(&previous);
        }
        index
            .cells
            .entry((actor.world, ChunkCoord::from_position(actor.position)))
            .or_default()
            .insert(actor.id);
    }

    /// Moves an actor. Unknown actors are ignored.
    pub fn move_actor(&self, id: ActorId, position: Vec3) {
        let actor = self.index.read().actors.get(&id).copied();
        if let Some(actor) = actor {
            self.upsert_actor(Actor { position, ..actor });
        }
    }

    /// Updates an actor's status flags. Unknown actors are ignored.
    pub fn set_status(&self, id: ActorId, connected: bool, alive: bool, observer: bool) {
        if let Some(actor) = self.index.write().actors.get_mut(&id) {
            actor.connected = connected;
            actor.alive = alive;
            actor.observer = observer;
        }
    }

    /// Removes an actor.
    pub fn remove_actor(&self, id: ActorId) -> Option<Actor> {
        let mut index = self.index.write();
        let actor = index.actors.remove(&id)?;
        index.unindex(&actor);
        Some(actor)
    }

    /// Marks a cell loaded.
    pub fn load_cell(&self, world: WorldId, cell: ChunkCoord) {
        self.index.write().loaded.insert((world, cell));
    }

    /// Marks a cell unloaded (cells with actors stay loaded).
    pub fn unload_cell(&self, world: WorldId, cell: ChunkCoord) {
        self.index.write().loaded.remove(&(world, cell));
    }

    /// Number of actors.
    #[must_use]
    pub fn actor_count(&self) -> usize {
        self.index.read().actors.len()
    }
}

impl WorldQuery for MemoryWorld {
    fn qualifying_actors(&self, world: WorldId) -> Vec<Actor> {
        self.index
            .read()
            .actors
            .values()
            .filter(|actor| actor.world == world && actor.qualifies())
            .copied()
            .collect()
    }

    fn actors_in_cell(&self, world: WorldId, cell: ChunkCoord) -> Vec<Actor> {
        let index = self.index.read();
        index
            .cells
            .get(&(world, cell))
            .into_iter()
            .flatten()
            .filter_map(|id| index.actors.get(id).copied())
            .collect()
    }

    fn is_cell_loaded(&self, world: WorldId, cell: ChunkCoord) -> bool {
        let index = self.index.read();
        index.loaded.contains(&(world, cell)) || index.cells.contains_key(&(world, cell))
    }
}

impl std::fmt::Debug for MemoryWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryWorld")
            .field("actors", &self.actor_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_is_inclusive() {
        let center = Vec3::new(0.0, 64.0, 0.0);
        assert!(within_range(center, Vec3::new(16.0, 64.0, 0.0), 16.0));
        assert!(!within_range(center, Vec3::new(16.1, 64.0, 0.0), 16.0));
        assert!(!within_range(center, center, -1.0));
    }

    #[test]
    fn test_cell_index_follows_moves() {
        let world = MemoryWorld::new();
        let id = ActorId(1);
        world.upsert_actor(Actor::new(id, WorldId(0), Vec3::new(1.0, 64.0, 1.0)));
        assert_eq!(world.actors_in_cell(WorldId(0), ChunkCoord::new(0, 0)).len(), 1);

        world.move_actor(id, Vec3::new(40.0, 64.0, -3.0));
        assert!(world.actors_in_cell(WorldId(0), ChunkCoord::new(0, 0)).is_empty());
        assert_eq!(world.actors_in_cell(WorldId(0), ChunkCoord::new(2, -1)).len(), 1);
        assert!(world.is_cell_loaded(WorldId(0), ChunkCoord::new(2, -1)));
        assert!(!world.is_cell_loaded(WorldId(0), ChunkCoord::new(0, 0)));
    }

    #[test]
    fn test_qualification_flags() {
        let world = MemoryWorld::new();
        world.upsert_actor(Actor::new(ActorId(1), WorldId(0), Vec3::ZERO));
        world.upsert_actor(Actor::new(ActorId(2), WorldId(0), Vec3::ZERO));
        world.upsert_actor(Actor::new(ActorId(3), WorldId(1), Vec3::ZERO));
        world.set_status(ActorId(2), true, true, true);

        let near = world.qualifying_actors_near(Location::new(WorldId(0), Vec3::ZERO), 4.0);
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].id, ActorId(1));
    }
}
