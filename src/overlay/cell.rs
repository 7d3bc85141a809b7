//! Single-position overlay.

use super::{OverlayBase, OverlayView};
use crate::host::EngineContext;
use crate::types::{BlockState, ChunkKey, Position, ViewerId};
use crate::viewer::Supplier;
use parking_lot::RwLock;

pub struct OverlayCell {
    pub(crate) base: OverlayBase<BlockState>,
    position: Position,
    state: RwLock<BlockState>,
}

impl OverlayCell {
    pub(crate) fn new(position: Position, state: BlockState) -> Self {
        Self {
            base: OverlayBase::new(),
            position,
            state: RwLock::new(state),
        }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    /// Canonical state shown to viewers without an override.
    pub fn state(&self) -> BlockState {
        self.state.read().clone()
    }

    /// Replaces the canonical state and resends it to every viewer.
    pub fn set_state(&self, ctx: &EngineContext, state: BlockState) {
        *self.state.write() = state;
        self.send_updates(ctx);
    }

    pub fn set_viewer_state(&self, ctx: &EngineContext, viewer: &ViewerId, state: Option<BlockState>) -> bool {
        let known = self.base.set_viewer_state(viewer, state);
        if known {
            self.send_view(ctx, viewer);
        }
        known
    }

    pub fn set_viewer_supplier(
        &self,
        ctx: &EngineContext,
        viewer: &ViewerId,
        supplier: Option<Supplier<BlockState>>,
    ) -> bool {
        let known = self.base.set_viewer_supplier(viewer, supplier);
        if known {
            self.send_view(ctx, viewer);
        }
        known
    }

    pub fn add_viewer_with_supplier(&self, ctx: &EngineContext, viewer: ViewerId, supplier: Supplier<BlockState>) {
        self.base.viewers.add_with_supplier(viewer, supplier);
        self.send_view(ctx, &viewer);
    }

    /// Gives every current viewer the same override.
    pub fn set_state_for_all(&self, ctx: &EngineContext, state: BlockState) {
        self.base.set_state_for_all(state);
        self.send_updates(ctx);
    }

    pub fn set_supplier_for_all(&self, ctx: &EngineContext, supplier: Supplier<BlockState>) {
        self.base.set_supplier_for_all(supplier);
        self.send_updates(ctx);
    }
}

impl OverlayView for OverlayCell {
    type State = BlockState;

    fn base(&self) -> &OverlayBase<BlockState> {
        &self.base
    }

    fn positions(&self) -> Vec<Position> {
        vec![self.position.clone()]
    }

    fn positions_in_chunk(&self, chunk: &ChunkKey) -> Vec<Position> {
        if self.position.chunk() == *chunk {
            vec![self.position.clone()]
        } else {
            Vec::new()
        }
    }

    fn contains(&self, pos: &Position) -> bool {
        self.position == *pos
    }

    fn canonical(&self, pos: &Position) -> Option<BlockState> {
        self.contains(pos).then(|| self.state())
    }

    fn resolve(&self, viewer: &ViewerId, pos: &Position) -> Option<BlockState> {
        if !self.contains(pos) {
            return None;
        }
        let record = self.base.viewers.get(viewer)?;
        Some(record.resolved().unwrap_or_else(|| self.state()))
    }
}
