//! In-memory host: a flat-terrain [`WorldAuthority`], a viewer [`Roster`]
//! and a recording [`Outbox`].
//!
//! The standalone server runs on these, and so do the integration tests.

use crate::host::{PacketSink, ViewerDirectory, WorldAuthority};
use crate::protocol::{ClientboundPacket, ServerboundPacket};
use crate::types::{BlockFace, BlockState, ItemStack, Position, Vec3, ViewerId, ViewerInfo};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};

pub const STONE: &str = "minecraft:stone";

// ---------------------------------------------------------------------------
// Flat terrain
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct WorldShape {
    min_height: i32,
    /// Highest solid y.
    surface: i32,
}

/// An item that landed in the world.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedItem {
    pub world: String,
    pub at: Vec3,
    pub item: ItemStack,
}

/// Worlds of stone up to a surface height and air above, plus per-position
/// overrides.
pub struct FlatTerrain {
    worlds: RwLock<HashMap<String, WorldShape>>,
    overrides: RwLock<HashMap<Position, BlockState>>,
    hardness: HashMap<String, f32>,
    interactable: HashSet<String>,
    partial: HashSet<String>,
    block_items: HashMap<String, BlockState>,
    dropped: Mutex<Vec<DroppedItem>>,
}

impl Default for FlatTerrain {
    fn default() -> Self {
        Self::new()
    }
}

impl FlatTerrain {
    pub fn new() -> Self {
        let hardness = [
            (STONE, 1.5),
            ("minecraft:dirt", 0.5),
            ("minecraft:oak_planks", 2.0),
            ("minecraft:glass", 0.3),
            ("minecraft:short_grass", 0.0),
            ("minecraft:torch", 0.0),
            ("minecraft:bedrock", -1.0),
        ]
        .into_iter()
        .map(|(m, h)| (m.to_string(), h))
        .collect();

        let interactable = ["minecraft:chest", "minecraft:crafting_table", "minecraft:oak_door", "minecraft:lever"]
            .into_iter()
            .map(String::from)
            .collect();

        let partial = ["minecraft:oak_slab", "minecraft:torch", "minecraft:short_grass", "minecraft:glass_pane"]
            .into_iter()
            .map(String::from)
            .collect();

        let block_items = [STONE, "minecraft:dirt", "minecraft:oak_planks", "minecraft:glass", "minecraft:torch"]
            .into_iter()
            .map(|m| (m.to_string(), BlockState::new(m)))
            .collect();

        Self {
            worlds: RwLock::new(HashMap::new()),
            overrides: RwLock::new(HashMap::new()),
            hardness,
            interactable,
            partial,
            block_items,
            dropped: Mutex::new(Vec::new()),
        }
    }

    /// Adds a world with the given minimum height and surface.
    pub fn with_world(self, name: &str, min_height: i32, surface: i32) -> Self {
        self.add_world(name, min_height, surface);
        self
    }

    pub fn add_world(&self, name: &str, min_height: i32, surface: i32) {
        self.worlds
            .write()
            .insert(name.to_string(), WorldShape { min_height, surface });
    }

    pub fn with_hardness(mut self, material: &str, hardness: f32) -> Self {
        self.hardness.insert(material.to_string(), hardness);
        self
    }

    pub fn with_block_item(mut self, item: &str, state: BlockState) -> Self {
        self.block_items.insert(item.to_string(), state);
        self
    }

    /// Replaces the true state at `pos`.
    pub fn set_block(&self, pos: Position, state: BlockState) {
        self.overrides.write().insert(pos, state);
    }

    pub fn dropped(&self) -> Vec<DroppedItem> {
        self.dropped.lock().clone()
    }
}

impl WorldAuthority for FlatTerrain {
    fn has_world(&self, world: &str) -> bool {
        self.worlds.read().contains_key(world)
    }

    fn min_height(&self, world: &str) -> i32 {
        self.worlds
            .read()
            .get(world)
            .map(|w| w.min_height)
            .unwrap_or(-64)
    }

    fn block_state(&self, pos: &Position) -> BlockState {
        if let Some(state) = self.overrides.read().get(pos) {
            return state.clone();
        }
        let Some(shape) = self.worlds.read().get(&*pos.world).copied() else {
            return BlockState::air();
        };
        if pos.y >= shape.min_height && pos.y <= shape.surface {
            BlockState::new(STONE)
        } else {
            BlockState::air()
        }
    }

    fn hardness(&self, state: &BlockState) -> f32 {
        if self.is_air(state) {
            return 0.0;
        }
        self.hardness.get(state.material()).copied().unwrap_or(1.0)
    }

    fn is_interactable(&self, state: &BlockState) -> bool {
        self.interactable.contains(state.material())
    }

    fn is_face_sturdy(&self, state: &BlockState, _face: BlockFace) -> bool {
        !self.is_air(state) && !self.partial.contains(state.material())
    }

    fn block_for_item(&self, item: &ItemStack) -> Option<BlockState> {
        self.block_items.get(&item.kind).cloned()
    }

    fn drops(&self, state: &BlockState, _tool: Option<&ItemStack>) -> Vec<ItemStack> {
        if self.is_air(state) {
            return Vec::new();
        }
        vec![ItemStack::new(state.material(), 1)]
    }

    fn drop_item(&self, world: &str, at: Vec3, item: ItemStack) {
        self.dropped.lock().push(DroppedItem {
            world: world.to_string(),
            at,
            item,
        });
    }
}

// ---------------------------------------------------------------------------
// Roster
// ---------------------------------------------------------------------------

/// Online viewers keyed by id.
#[derive(Default)]
pub struct Roster {
    online: RwLock<HashMap<ViewerId, ViewerInfo>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, viewer: ViewerInfo) {
        self.online.write().insert(viewer.id, viewer);
    }

    pub fn leave(&self, id: &ViewerId) -> Option<ViewerInfo> {
        self.online.write().remove(id)
    }

    /// Applies `f` to an online viewer. Returns `false` if offline.
    pub fn update(&self, id: &ViewerId, f: impl FnOnce(&mut ViewerInfo)) -> bool {
        match self.online.write().get_mut(id) {
            Some(info) => {
                f(info);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.online.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.online.read().is_empty()
    }
}

impl ViewerDirectory for Roster {
    fn lookup(&self, id: &ViewerId) -> Option<ViewerInfo> {
        self.online.read().get(id).cloned()
    }
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// Records every packet the engine emits until drained.
#[derive(Default)]
pub struct Outbox {
    sent: Mutex<Vec<(ViewerId, ClientboundPacket)>>,
    forwarded: Mutex<Vec<(ViewerId, ServerboundPacket)>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain_sent(&self) -> Vec<(ViewerId, ClientboundPacket)> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn drain_forwarded(&self) -> Vec<(ViewerId, ServerboundPacket)> {
        std::mem::take(&mut *self.forwarded.lock())
    }

    /// Packets sent to `viewer` so far, oldest first.
    pub fn sent_to(&self, viewer: &ViewerId) -> Vec<ClientboundPacket> {
        self.sent
            .lock()
            .iter()
            .filter(|(id, _)| id == viewer)
            .map(|(_, packet)| packet.clone())
            .collect()
    }

    pub fn forwarded(&self) -> Vec<(ViewerId, ServerboundPacket)> {
        self.forwarded.lock().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
        self.forwarded.lock().clear();
    }
}

impl PacketSink for Outbox {
    fn send(&self, viewer: &ViewerId, packet: ClientboundPacket) {
        self.sent.lock().push((*viewer, packet));
    }

    fn forward_inbound(&self, viewer: &ViewerId, packet: ServerboundPacket) {
        self.forwarded.lock().push((*viewer, packet));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_world_is_stone_up_to_surface() {
        let terrain = FlatTerrain::new().with_world("world", -64, 63);
        assert_eq!(terrain.block_state(&Position::new("world", 0, 63, 0)).as_str(), STONE);
        assert!(terrain.is_air(&terrain.block_state(&Position::new("world", 0, 64, 0))));
        assert!(terrain.is_air(&terrain.block_state(&Position::new("world", 0, -65, 0))));
        assert!(terrain.is_air(&terrain.block_state(&Position::new("nether", 0, 0, 0))));
    }

    #[test]
    fn overrides_win_over_the_surface() {
        let terrain = FlatTerrain::new().with_world("world", -64, 63);
        let pos = Position::new("world", 1, 70, 1);
        terrain.set_block(pos.clone(), BlockState::new("minecraft:chest[facing=north]"));
        let state = terrain.block_state(&pos);
        assert!(terrain.is_interactable(&state));
    }

    #[test]
    fn roster_update_reports_offline() {
        let roster = Roster::new();
        let id = ViewerId::random();
        assert!(!roster.update(&id, |v| v.sneaking = true));
        roster.join(ViewerInfo::new(id, 1, "world"));
        assert!(roster.update(&id, |v| v.sneaking = true));
        assert!(roster.lookup(&id).is_some_and(|v| v.sneaking));
    }

    #[test]
    fn outbox_filters_by_viewer() {
        let outbox = Outbox::new();
        let a = ViewerId::random();
        let b = ViewerId::random();
        outbox.send(&a, ClientboundPacket::clear_mining_fatigue(1));
        outbox.send(&b, ClientboundPacket::clear_mining_fatigue(2));
        assert_eq!(outbox.sent_to(&a).len(), 1);
        assert_eq!(outbox.drain_sent().len(), 2);
        assert!(outbox.sent_to(&b).is_empty());
    }
}
