//! Events raised by the engine and the decisions listeners hand back.

use crate::overlay::OverlayHandle;
use crate::types::{BlockFace, BlockPos, Hand, ItemStack, Position, Vec3, ViewerInfo};

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Decision {
    #[default]
    Proceed,
    /// `restore` resends the viewer's visible state.
    Cancel { restore: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakDecision {
    /// `restore` only applies when the break's start was vetoed; the visible
    /// state is then resent instead of dropping anything.
    Proceed { drop_items: bool, restore: bool },
    Cancel { restore: bool },
}

impl Default for BreakDecision {
    fn default() -> Self {
        BreakDecision::Proceed {
            drop_items: false,
            restore: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractAction {
    LeftClick,
    RightClick,
}

/// A viewer began mining an overlay position at a managed speed.
pub struct BreakStarted {
    pub viewer: ViewerInfo,
    pub overlay: OverlayHandle,
    pub position: Position,
    pub face: BlockFace,
}

/// A cell or group position finished breaking.
pub struct BlockBroken {
    pub viewer: ViewerInfo,
    pub overlay: OverlayHandle,
    pub position: Position,
    pub tool: Option<ItemStack>,
}

/// A structure block finished breaking.
pub struct StructureBroken {
    pub viewer: ViewerInfo,
    pub overlay: OverlayHandle,
    pub position: Position,
    /// Position relative to the structure origin.
    pub relative: BlockPos,
    pub tool: Option<ItemStack>,
}

pub struct Interaction {
    pub viewer: ViewerInfo,
    pub overlay: OverlayHandle,
    pub position: Position,
    pub face: BlockFace,
    pub point: Vec3,
    pub action: InteractAction,
    pub hand: Hand,
}

pub struct StructureInteraction {
    pub viewer: ViewerInfo,
    pub overlay: OverlayHandle,
    pub position: Position,
    pub relative: BlockPos,
    pub face: BlockFace,
    pub point: Vec3,
    pub action: InteractAction,
    pub hand: Hand,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Listener hooks. Every method defaults to "carry on".
pub trait EventBus: Send + Sync {
    fn start_break(&self, _event: &BreakStarted) -> Decision {
        Decision::Proceed
    }

    fn block_break(&self, _event: &BlockBroken) -> BreakDecision {
        BreakDecision::default()
    }

    fn structure_break(&self, _event: &StructureBroken) -> BreakDecision {
        BreakDecision::default()
    }

    fn interact(&self, _event: &Interaction) {}

    fn structure_interact(&self, _event: &StructureInteraction) {}
}

/// Accepts every default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvents;

impl EventBus for NoopEvents {}
