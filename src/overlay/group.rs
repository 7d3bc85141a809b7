//! Named set of positions sharing one viewer set.

use super::{OverlayBase, OverlayView};
use crate::error::{OverlayError, Result};
use crate::host::EngineContext;
use crate::types::{BlockState, ChunkKey, Position, ViewerId};
use crate::viewer::Supplier;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-viewer override shape for groups.
pub type GroupStates = HashMap<Position, BlockState>;

#[derive(Default)]
struct Layout {
    states: GroupStates,
    chunks: HashMap<ChunkKey, Vec<Position>>,
    // world -> member count
    worlds: HashMap<Arc<str>, usize>,
}

impl Layout {
    /// `true` when `pos` was not a member yet.
    fn insert(&mut self, pos: Position, state: BlockState) -> bool {
        if let Some(slot) = self.states.get_mut(&pos) {
            *slot = state;
            return false;
        }
        self.chunks.entry(pos.chunk()).or_default().push(pos.clone());
        *self.worlds.entry(pos.world.clone()).or_insert(0) += 1;
        self.states.insert(pos, state);
        true
    }

    fn remove(&mut self, pos: &Position) -> Option<BlockState> {
        let state = self.states.remove(pos)?;

        let chunk = pos.chunk();
        if let Some(members) = self.chunks.get_mut(&chunk) {
            members.retain(|p| p != pos);
            if members.is_empty() {
                self.chunks.remove(&chunk);
            }
        }

        if let Some(count) = self.worlds.get_mut(&pos.world) {
            *count -= 1;
            if *count == 0 {
                self.worlds.remove(&pos.world);
            }
        }
        Some(state)
    }
}

pub struct OverlayGroup {
    pub(crate) base: OverlayBase<GroupStates>,
    name: String,
    layout: RwLock<Layout>,
}

impl OverlayGroup {
    pub(crate) fn new(name: impl Into<String>, states: GroupStates) -> Self {
        let mut layout = Layout::default();
        for (pos, state) in states {
            layout.insert(pos, state);
        }
        Self {
            base: OverlayBase::new(),
            name: name.into(),
            layout: RwLock::new(layout),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.layout.read().states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.read().states.is_empty()
    }

    pub fn members(&self) -> GroupStates {
        self.layout.read().states.clone()
    }

    pub fn worlds(&self) -> Vec<Arc<str>> {
        self.layout.read().worlds.keys().cloned().collect()
    }

    pub fn chunks(&self) -> Vec<ChunkKey> {
        self.layout.read().chunks.keys().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Membership (driven by the registry so the index stays in sync)
    // -----------------------------------------------------------------------

    /// Adds or re-states members. Returns the positions that are new.
    pub(crate) fn insert_members(&self, states: GroupStates) -> Vec<Position> {
        let mut layout = self.layout.write();
        states
            .into_iter()
            .filter_map(|(pos, state)| layout.insert(pos.clone(), state).then_some(pos))
            .collect()
    }

    /// Drops members and any viewer overrides for them. Returns the
    /// positions that were members.
    pub(crate) fn remove_members(&self, positions: &[Position]) -> Vec<Position> {
        let removed: Vec<Position> = {
            let mut layout = self.layout.write();
            positions
                .iter()
                .filter(|pos| layout.remove(pos).is_some())
                .cloned()
                .collect()
        };
        if !removed.is_empty() {
            self.base.viewers.for_each_mut(|_, record| {
                if let Some(overrides) = record.state.as_mut() {
                    for pos in &removed {
                        overrides.remove(pos);
                    }
                }
            });
        }
        removed
    }

    // -----------------------------------------------------------------------
    // States
    // -----------------------------------------------------------------------

    /// Changes the canonical state of a member and resends to every viewer.
    pub fn set_block_state(&self, ctx: &EngineContext, pos: &Position, state: BlockState) -> Result<()> {
        {
            let mut layout = self.layout.write();
            let slot = layout
                .states
                .get_mut(pos)
                .ok_or_else(|| OverlayError::NotAMember(pos.clone()))?;
            *slot = state;
        }
        self.send_updates(ctx);
        Ok(())
    }

    /// Overrides a single member for one viewer. `Ok(false)` if `viewer` is
    /// not registered.
    pub fn set_viewer_block(
        &self,
        ctx: &EngineContext,
        viewer: &ViewerId,
        pos: &Position,
        state: BlockState,
    ) -> Result<bool> {
        if !self.contains(pos) {
            return Err(OverlayError::NotAMember(pos.clone()));
        }
        let known = self
            .base
            .viewers
            .with_record_mut(viewer, |record| {
                record
                    .state
                    .get_or_insert_with(HashMap::new)
                    .insert(pos.clone(), state);
            })
            .is_some();
        if known {
            self.send_view(ctx, viewer);
        }
        Ok(known)
    }

    pub fn set_viewer_states(&self, ctx: &EngineContext, viewer: &ViewerId, states: Option<GroupStates>) -> bool {
        let known = self.base.set_viewer_state(viewer, states);
        if known {
            self.send_view(ctx, viewer);
        }
        known
    }

    pub fn set_viewer_supplier(
        &self,
        ctx: &EngineContext,
        viewer: &ViewerId,
        supplier: Option<Supplier<GroupStates>>,
    ) -> bool {
        let known = self.base.set_viewer_supplier(viewer, supplier);
        if known {
            self.send_view(ctx, viewer);
        }
        known
    }

    pub fn add_viewer_with_supplier(&self, ctx: &EngineContext, viewer: ViewerId, supplier: Supplier<GroupStates>) {
        self.base.viewers.add_with_supplier(viewer, supplier);
        self.send_view(ctx, &viewer);
    }

    pub fn set_states_for_all(&self, ctx: &EngineContext, states: GroupStates) {
        self.base.set_state_for_all(states);
        self.send_updates(ctx);
    }

    pub fn set_supplier_for_all(&self, ctx: &EngineContext, supplier: Supplier<GroupStates>) {
        self.base.set_supplier_for_all(supplier);
        self.send_updates(ctx);
    }
}

impl OverlayView for OverlayGroup {
    type State = GroupStates;

    fn base(&self) -> &OverlayBase<GroupStates> {
        &self.base
    }

    fn positions(&self) -> Vec<Position> {
        self.layout.read().states.keys().cloned().collect()
    }

    fn positions_in_chunk(&self, chunk: &ChunkKey) -> Vec<Position> {
        self.layout
            .read()
            .chunks
            .get(chunk)
            .cloned()
            .unwrap_or_default()
    }

    fn positions_in_world(&self, world: &str) -> Vec<Position> {
        let layout = self.layout.read();
        layout
            .chunks
            .iter()
            .filter(|(chunk, _)| &*chunk.world == world)
            .flat_map(|(_, members)| members.iter().cloned())
            .collect()
    }

    fn contains(&self, pos: &Position) -> bool {
        self.layout.read().states.contains_key(pos)
    }

    fn canonical(&self, pos: &Position) -> Option<BlockState> {
        self.layout.read().states.get(pos).cloned()
    }

    fn resolve(&self, viewer: &ViewerId, pos: &Position) -> Option<BlockState> {
        let canonical = self.canonical(pos)?;
        let record = self.base.viewers.get(viewer)?;
        let overridden = record
            .state
            .as_ref()
            .and_then(|states| states.get(pos).cloned())
            .or_else(|| {
                record
                    .supplier
                    .as_ref()
                    .and_then(|supplier| supplier())
                    .and_then(|states| states.get(pos).cloned())
            });
        Some(overridden.unwrap_or(canonical))
    }
}
