//! Collaborator boundary: what the engine needs from the hosting server.

use crate::events::EventBus;
use crate::geometry::BoundingGeometry;
use crate::protocol::{ClientboundPacket, ServerboundPacket};
use crate::types::{BlockFace, BlockState, ItemStack, Position, Vec3, ViewerId, ViewerInfo};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Read access to the authoritative world, plus item spawning.
pub trait WorldAuthority: Send + Sync {
    fn has_world(&self, world: &str) -> bool;

    /// Lowest buildable y in `world`.
    fn min_height(&self, world: &str) -> i32;

    /// True state at `pos`.
    fn block_state(&self, pos: &Position) -> BlockState;

    /// Vanilla hardness; `0.0` breaks instantly.
    fn hardness(&self, state: &BlockState) -> f32;

    fn is_air(&self, state: &BlockState) -> bool {
        state.material().ends_with("air")
    }

    /// Whether clicking the block opens or toggles something.
    fn is_interactable(&self, state: &BlockState) -> bool;

    /// Whether `face` of the block fully supports a block placed against it.
    fn is_face_sturdy(&self, state: &BlockState, face: BlockFace) -> bool;

    /// Block placed by using `item`, `None` if the item is not a block.
    fn block_for_item(&self, item: &ItemStack) -> Option<BlockState>;

    fn drops(&self, state: &BlockState, tool: Option<&ItemStack>) -> Vec<ItemStack>;

    fn drop_item(&self, world: &str, at: Vec3, item: ItemStack);
}

/// Online viewer lookup. `None` means the viewer is offline.
pub trait ViewerDirectory: Send + Sync {
    fn lookup(&self, id: &ViewerId) -> Option<ViewerInfo>;
}

/// Outbound network path.
pub trait PacketSink: Send + Sync {
    fn send(&self, viewer: &ViewerId, packet: ClientboundPacket);

    /// Hands an inbound packet to the true world handler unchanged.
    fn forward_inbound(&self, viewer: &ViewerId, packet: ServerboundPacket);
}

// ---------------------------------------------------------------------------
// EngineContext
// ---------------------------------------------------------------------------

/// Everything an overlay operation may reach outside the engine.
#[derive(Clone)]
pub struct EngineContext {
    pub world: Arc<dyn WorldAuthority>,
    pub viewers: Arc<dyn ViewerDirectory>,
    pub sink: Arc<dyn PacketSink>,
    pub events: Arc<dyn EventBus>,
    pub geometry: Arc<BoundingGeometry>,
    /// Amplifier of the mining-impairment effect sent while breaking.
    pub fatigue_amplifier: u8,
}

impl EngineContext {
    pub fn new(
        world: Arc<dyn WorldAuthority>,
        viewers: Arc<dyn ViewerDirectory>,
        sink: Arc<dyn PacketSink>,
        events: Arc<dyn EventBus>,
        geometry: Arc<BoundingGeometry>,
    ) -> Self {
        Self {
            world,
            viewers,
            sink,
            events,
            geometry,
            fatigue_amplifier: 127,
        }
    }

    pub fn with_fatigue_amplifier(mut self, amplifier: u8) -> Self {
        self.fatigue_amplifier = amplifier;
        self
    }

    pub fn is_online(&self, id: &ViewerId) -> bool {
        self.viewers.lookup(id).is_some()
    }

    pub fn send(&self, id: &ViewerId, packet: ClientboundPacket) {
        self.sink.send(id, packet);
    }
}
