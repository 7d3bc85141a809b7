//! Core overlay types shared across all modules.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Basic math
// ---------------------------------------------------------------------------

/// World-space vector. Double precision so block coordinates in the millions
/// keep sub-block accuracy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn sub(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn scale(self, s: f64) -> Vec3 {
        Vec3::new(self.x * s, self.y * s, self.z * s)
    }

    pub fn length_squared(self) -> f64 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    pub fn distance_squared(self, other: Vec3) -> f64 {
        self.sub(other).length_squared()
    }

    /// Unit vector in the same direction, or `None` for a zero vector.
    pub fn normalized(self) -> Option<Vec3> {
        let len = self.length_squared().sqrt();
        if len <= f64::EPSILON {
            return None;
        }
        Some(self.scale(1.0 / len))
    }
}

impl std::fmt::Display for Vec3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// Block coordinates
// ---------------------------------------------------------------------------

/// Integer block coordinate without a world, as carried on the wire.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn offset(self, face: BlockFace) -> Self {
        let (dx, dy, dz) = face.direction();
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    pub fn at(self, world: &Arc<str>) -> Position {
        Position::new(world.clone(), self.x, self.y, self.z)
    }
}

impl std::fmt::Display for BlockPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{},{}]", self.x, self.y, self.z)
    }
}

/// A block coordinate inside a named world.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct Position {
    pub world: Arc<str>,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Position {
    pub fn new(world: impl Into<Arc<str>>, x: i32, y: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }

    pub fn chunk(&self) -> ChunkKey {
        ChunkKey::new(self.world.clone(), self.x >> 4, self.z >> 4)
    }

    pub fn block_pos(&self) -> BlockPos {
        BlockPos::new(self.x, self.y, self.z)
    }

    pub fn offset(&self, dx: i32, dy: i32, dz: i32) -> Position {
        Position::new(self.world.clone(), self.x + dx, self.y + dy, self.z + dz)
    }

    pub fn relative(&self, face: BlockFace) -> Position {
        let (dx, dy, dz) = face.direction();
        self.offset(dx, dy, dz)
    }

    /// Minimum corner of the block in world space.
    pub fn corner(&self) -> Vec3 {
        Vec3::new(self.x as f64, self.y as f64, self.z as f64)
    }

    /// Centre of the block in world space.
    pub fn centre(&self) -> Vec3 {
        self.corner().add(Vec3::new(0.5, 0.5, 0.5))
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{},{},{}]", self.world, self.x, self.y, self.z)
    }
}

/// A 16x16 chunk column inside a named world.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct ChunkKey {
    pub world: Arc<str>,
    pub x: i32,
    pub z: i32,
}

impl ChunkKey {
    pub fn new(world: impl Into<Arc<str>>, x: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            x,
            z,
        }
    }
}

impl std::fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({},{})", self.world, self.x, self.z)
    }
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockFace {
    Down,
    Up,
    North,
    South,
    West,
    East,
}

impl BlockFace {
    pub fn direction(self) -> (i32, i32, i32) {
        match self {
            BlockFace::Down => (0, -1, 0),
            BlockFace::Up => (0, 1, 0),
            BlockFace::North => (0, 0, -1),
            BlockFace::South => (0, 0, 1),
            BlockFace::West => (-1, 0, 0),
            BlockFace::East => (1, 0, 0),
        }
    }
}

// ---------------------------------------------------------------------------
// Block states & items
// ---------------------------------------------------------------------------

/// Canonical string encoding of a block state, e.g.
/// `minecraft:oak_stairs[facing=north,half=bottom]`.
///
/// Doubles as the key into the bounding-box dataset.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockState(Arc<str>);

impl BlockState {
    pub fn new(encoded: impl Into<Arc<str>>) -> Self {
        Self(encoded.into())
    }

    pub fn air() -> Self {
        Self::new("minecraft:air")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Material portion of the state, without the property list.
    pub fn material(&self) -> &str {
        self.0.split('[').next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for BlockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlockState {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub kind: String,
    pub count: u32,
}

impl ItemStack {
    pub fn new(kind: impl Into<String>, count: u32) -> Self {
        Self {
            kind: kind.into(),
            count,
        }
    }
}

// ---------------------------------------------------------------------------
// Viewers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewerId(pub Uuid);

impl ViewerId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ViewerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    Survival,
    Creative,
    Adventure,
    Spectator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hand {
    Main,
    Off,
}

/// Snapshot of an online viewer, as reported by the host.
#[derive(Debug, Clone)]
pub struct ViewerInfo {
    pub id: ViewerId,
    /// Network entity id used in animation and effect packets.
    pub entity_id: i32,
    pub world: Arc<str>,
    pub game_mode: GameMode,
    pub main_hand: Option<ItemStack>,
    pub off_hand: Option<ItemStack>,
    pub eye: Vec3,
    pub look: Vec3,
    pub sneaking: bool,
    pub interaction_range: f64,
    /// Collision box of the viewer's body, relative to `eye`.
    pub body: crate::geometry::BoundingBox,
}

impl ViewerInfo {
    pub fn new(id: ViewerId, entity_id: i32, world: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            entity_id,
            world: world.into(),
            game_mode: GameMode::Survival,
            main_hand: None,
            off_hand: None,
            eye: Vec3::zero(),
            look: Vec3::new(0.0, 0.0, 1.0),
            sneaking: false,
            interaction_range: 4.5,
            body: crate::geometry::BoundingBox::new(
                Vec3::new(-0.3, -1.62, -0.3),
                Vec3::new(0.3, 0.18, 0.3),
            ),
        }
    }

    pub fn held_item(&self, hand: Hand) -> Option<&ItemStack> {
        match hand {
            Hand::Main => self.main_hand.as_ref(),
            Hand::Off => self.off_hand.as_ref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stats & config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverlayStats {
    pub cells: usize,
    pub groups: usize,
    pub structures: usize,
    pub indexed_chunks: usize,
    pub active_breaks: usize,
    pub pending_deferred: usize,
    pub total_ticks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayServiceConfig {
    /// Session name stamped on every published envelope.
    pub session: String,
    /// Game-loop tick rate in Hz.
    pub tick_rate_hz: f32,
    /// Maximum number of block states kept in the geometry cache.
    pub geometry_cache_capacity: usize,
    /// Optional path to the bounding-box dataset (JSON).
    pub bounding_boxes_path: Option<std::path::PathBuf>,
    /// Minimum build height used for worlds the host does not describe.
    pub default_min_height: i32,
    /// Amplifier of the mining-impairment effect applied while breaking.
    pub fatigue_amplifier: u8,
}

impl Default for OverlayServiceConfig {
    fn default() -> Self {
        Self {
            session: "default".into(),
            tick_rate_hz: 20.0,
            geometry_cache_capacity: 500,
            bounding_boxes_path: None,
            default_min_height: -64,
            fatigue_amplifier: 127,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_uses_arithmetic_shift() {
        let pos = Position::new("world", -1, 64, 17);
        let chunk = pos.chunk();
        assert_eq!((chunk.x, chunk.z), (-1, 1));
    }

    #[test]
    fn material_strips_properties() {
        let state = BlockState::new("minecraft:oak_stairs[facing=north]");
        assert_eq!(state.material(), "minecraft:oak_stairs");
        assert_eq!(BlockState::air().material(), "minecraft:air");
    }

    #[test]
    fn relative_follows_face() {
        let pos = Position::new("world", 0, 0, 0);
        assert_eq!(pos.relative(BlockFace::East), Position::new("world", 1, 0, 0));
        assert_eq!(pos.relative(BlockFace::North), Position::new("world", 0, 0, -1));
    }
}
