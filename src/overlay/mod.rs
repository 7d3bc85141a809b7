//! Overlay variants and the operations they share.
//!
//! ```text
//! Overlay (enum, shared as Arc)
//!   ├── Cell       one position, one state
//!   ├── Group      named position → state map, mutable membership
//!   └── Structure  origin + packed relative keys, chunk-indexed
//! ```
//!
//! Each variant embeds an [`OverlayBase`] holding its settings, metadata and
//! viewer set. Everything that only depends on "which positions, which
//! states" is written once in [`OverlayView`]; [`Overlay`] forwards to it.

pub mod cell;
pub mod group;
pub mod structure;

pub use cell::OverlayCell;
pub use group::OverlayGroup;
pub use structure::OverlayStructure;

use crate::geometry::BoundingBox;
use crate::host::EngineContext;
use crate::metadata::MetadataStore;
use crate::protocol::{section_changes, ClientboundPacket};
use crate::types::{BlockPos, BlockState, ChunkKey, Position, ViewerId, ViewerInfo};
use crate::viewer::ViewerSet;
use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

pub type OverlayHandle = Arc<Overlay>;

// ---------------------------------------------------------------------------
// Identity & settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OverlayId(pub Uuid);

impl OverlayId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for OverlayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayKind {
    Cell,
    Group,
    Structure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlaySettings {
    /// Ticks to break, `-1` for vanilla timing.
    pub break_speed: i32,
    /// Viewers are offered the overlay when they join its world.
    pub auto_add_on_join: bool,
    /// Break animations are shown to every viewer, not just the breaker.
    pub global_break_animation: bool,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            break_speed: -1,
            auto_add_on_join: false,
            global_break_animation: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakSpeed {
    /// Client-side timing; the engine only sees the finish.
    Vanilla,
    /// Engine-driven animation lasting this many ticks.
    Ticks(u32),
}

impl BreakSpeed {
    pub fn from_raw(raw: i32) -> Self {
        if raw < 0 {
            BreakSpeed::Vanilla
        } else {
            BreakSpeed::Ticks(raw as u32)
        }
    }

    pub fn is_managed(self) -> bool {
        matches!(self, BreakSpeed::Ticks(_))
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub(crate) struct OverlayBase<T> {
    pub(crate) id: OverlayId,
    pub(crate) settings: RwLock<OverlaySettings>,
    pub(crate) viewers: ViewerSet<T>,
    pub(crate) metadata: MetadataStore,
}

impl<T: Clone> OverlayBase<T> {
    pub(crate) fn new() -> Self {
        Self {
            id: OverlayId::random(),
            settings: RwLock::new(OverlaySettings::default()),
            viewers: ViewerSet::new(),
            metadata: MetadataStore::new(),
        }
    }

    pub(crate) fn set_viewer_state(&self, id: &ViewerId, state: Option<T>) -> bool {
        self.viewers
            .with_record_mut(id, |record| record.state = state)
            .is_some()
    }

    pub(crate) fn set_viewer_supplier(
        &self,
        id: &ViewerId,
        supplier: Option<crate::viewer::Supplier<T>>,
    ) -> bool {
        self.viewers
            .with_record_mut(id, |record| record.supplier = supplier)
            .is_some()
    }

    pub(crate) fn set_state_for_all(&self, state: T) {
        self.viewers
            .for_each_mut(|_, record| record.state = Some(state.clone()));
    }

    pub(crate) fn set_supplier_for_all(&self, supplier: crate::viewer::Supplier<T>) {
        self.viewers
            .for_each_mut(|_, record| record.supplier = Some(supplier.clone()));
    }
}

/// Sends `changes` to one viewer: a single block change when there is only
/// one, otherwise one multi-block change per section.
pub(crate) fn send_changes(ctx: &EngineContext, viewer: &ViewerId, changes: Vec<(BlockPos, BlockState)>) {
    match changes.len() {
        0 => {}
        1 => {
            if let Some((position, state)) = changes.into_iter().next() {
                ctx.send(viewer, ClientboundPacket::block_change(position, state));
            }
        }
        _ => {
            for packet in section_changes(changes) {
                ctx.send(viewer, packet);
            }
        }
    }
}

/// Position/state view shared by every variant.
pub(crate) trait OverlayView {
    type State: Clone;

    fn base(&self) -> &OverlayBase<Self::State>;

    fn positions(&self) -> Vec<Position>;

    fn positions_in_chunk(&self, chunk: &ChunkKey) -> Vec<Position>;

    fn contains(&self, pos: &Position) -> bool;

    fn canonical(&self, pos: &Position) -> Option<BlockState>;

    /// Viewer-resolved state; `None` for non-viewers and non-members.
    fn resolve(&self, viewer: &ViewerId, pos: &Position) -> Option<BlockState>;

    fn positions_in_world(&self, world: &str) -> Vec<Position> {
        self.positions()
            .into_iter()
            .filter(|pos| &*pos.world == world)
            .collect()
    }

    fn view_changes(&self, viewer: &ViewerId, world: &str) -> Vec<(BlockPos, BlockState)> {
        self.positions_in_world(world)
            .into_iter()
            .filter_map(|pos| {
                let state = self.resolve(viewer, &pos)?;
                Some((pos.block_pos(), state))
            })
            .collect()
    }

    fn send_view(&self, ctx: &EngineContext, viewer: &ViewerId) {
        let Some(info) = ctx.viewers.lookup(viewer) else {
            return;
        };
        send_changes(ctx, viewer, self.view_changes(viewer, &info.world));
    }

    fn send_restore(&self, ctx: &EngineContext, viewer: &ViewerId) {
        let Some(info) = ctx.viewers.lookup(viewer) else {
            return;
        };
        let changes = self
            .positions_in_world(&info.world)
            .into_iter()
            .map(|pos| {
                let state = ctx.world.block_state(&pos);
                (pos.block_pos(), state)
            })
            .collect();
        send_changes(ctx, viewer, changes);
    }

    /// Resends to every viewer, pruning those that went offline.
    fn send_updates(&self, ctx: &EngineContext) -> usize {
        let mut sent = 0;
        for id in self.base().viewers.ids() {
            if ctx.is_online(&id) {
                self.send_view(ctx, &id);
                sent += 1;
            } else if self.base().viewers.prune(&id) {
                debug!("Pruned offline viewer {} from overlay {}", id, self.base().id);
            }
        }
        sent
    }
}

// ---------------------------------------------------------------------------
// Overlay
// ---------------------------------------------------------------------------

pub enum Overlay {
    Cell(OverlayCell),
    Group(OverlayGroup),
    Structure(OverlayStructure),
}

impl std::fmt::Debug for Overlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Overlay")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .finish()
    }
}

macro_rules! dispatch {
    ($overlay:expr, $v:ident => $body:expr) => {
        match $overlay {
            Overlay::Cell($v) => $body,
            Overlay::Group($v) => $body,
            Overlay::Structure($v) => $body,
        }
    };
}

impl Overlay {
    pub fn id(&self) -> OverlayId {
        dispatch!(self, o => o.base.id)
    }

    pub fn kind(&self) -> OverlayKind {
        match self {
            Overlay::Cell(_) => OverlayKind::Cell,
            Overlay::Group(_) => OverlayKind::Group,
            Overlay::Structure(_) => OverlayKind::Structure,
        }
    }

    pub fn as_cell(&self) -> Option<&OverlayCell> {
        match self {
            Overlay::Cell(cell) => Some(cell),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&OverlayGroup> {
        match self {
            Overlay::Group(group) => Some(group),
            _ => None,
        }
    }

    pub fn as_structure(&self) -> Option<&OverlayStructure> {
        match self {
            Overlay::Structure(structure) => Some(structure),
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Settings & metadata
    // -----------------------------------------------------------------------

    pub fn settings(&self) -> OverlaySettings {
        dispatch!(self, o => *o.base.settings.read())
    }

    pub fn update_settings(&self, f: impl FnOnce(&mut OverlaySettings)) {
        dispatch!(self, o => f(&mut o.base.settings.write()))
    }

    pub fn metadata(&self) -> &MetadataStore {
        dispatch!(self, o => &o.base.metadata)
    }

    // -----------------------------------------------------------------------
    // Viewers
    // -----------------------------------------------------------------------

    pub fn add_condition(&self, condition: impl Fn(&ViewerInfo) -> bool + Send + Sync + 'static) {
        dispatch!(self, o => o.base.viewers.add_condition(condition))
    }

    pub fn can_view(&self, viewer: &ViewerInfo) -> bool {
        dispatch!(self, o => o.base.viewers.can_view(viewer))
    }

    pub fn is_viewer(&self, id: &ViewerId) -> bool {
        dispatch!(self, o => o.base.viewers.is_viewer(id))
    }

    pub fn viewer_ids(&self) -> Vec<ViewerId> {
        dispatch!(self, o => o.base.viewers.ids())
    }

    pub fn viewer_count(&self) -> usize {
        dispatch!(self, o => o.base.viewers.len())
    }

    /// Admits the viewer if it passes every condition. With `notify` the
    /// overlay is sent to a newly admitted viewer right away.
    pub fn attempt_add_viewer(&self, ctx: &EngineContext, viewer: &ViewerInfo, notify: bool) -> bool {
        dispatch!(self, o => o
            .base
            .viewers
            .attempt_add(viewer, || {
                if notify {
                    o.send_view(ctx, &viewer.id);
                }
            })
            .is_some())
    }

    /// Adds without checking conditions.
    pub fn add_viewer(&self, id: ViewerId) {
        dispatch!(self, o => {
            o.base.viewers.add(id);
        })
    }

    pub fn add_and_update_viewer(&self, ctx: &EngineContext, id: ViewerId) {
        self.add_viewer(id);
        self.send_view(ctx, &id);
    }

    /// Removes the viewer and restores its true world view. Idempotent.
    pub fn remove_viewer(&self, ctx: &EngineContext, id: &ViewerId) -> bool {
        dispatch!(self, o => o.base.viewers.remove(id, || o.send_restore(ctx, id)))
    }

    /// Forgets the viewer without sending anything.
    pub fn prune_viewer(&self, id: &ViewerId) -> bool {
        dispatch!(self, o => o.base.viewers.prune(id))
    }

    /// Effective break speed for the viewer: its override, else the default.
    pub fn break_speed_for(&self, id: &ViewerId) -> i32 {
        let fallback = self.settings().break_speed;
        dispatch!(self, o => o.base.viewers.break_speed(id)).unwrap_or(fallback)
    }

    pub fn set_viewer_break_speed(&self, id: &ViewerId, speed: Option<i32>) -> bool {
        dispatch!(self, o => o
            .base
            .viewers
            .with_record_mut(id, |record| record.break_speed = speed)
            .is_some())
    }

    pub fn add_viewer_metadata(&self, id: &ViewerId, key: impl Into<String>, value: Value) -> bool {
        dispatch!(self, o => o.base.viewers.add_metadata(id, key, value))
    }

    pub fn remove_viewer_metadata(&self, id: &ViewerId, key: &str) -> Option<Value> {
        dispatch!(self, o => o.base.viewers.remove_metadata(id, key))
    }

    pub fn has_viewer_metadata(&self, id: &ViewerId, key: &str) -> bool {
        dispatch!(self, o => o.base.viewers.has_metadata(id, key))
    }

    pub fn viewer_metadata(&self, id: &ViewerId, key: &str) -> Option<Value> {
        dispatch!(self, o => o.base.viewers.metadata(id, key))
    }

    // -----------------------------------------------------------------------
    // Positions & states
    // -----------------------------------------------------------------------

    pub fn positions(&self) -> Vec<Position> {
        dispatch!(self, o => o.positions())
    }

    pub fn positions_in_chunk(&self, chunk: &ChunkKey) -> Vec<Position> {
        dispatch!(self, o => o.positions_in_chunk(chunk))
    }

    pub fn contains(&self, pos: &Position) -> bool {
        dispatch!(self, o => o.contains(pos))
    }

    pub fn worlds(&self) -> Vec<Arc<str>> {
        match self {
            Overlay::Cell(cell) => vec![cell.position().world.clone()],
            Overlay::Group(group) => group.worlds(),
            Overlay::Structure(structure) => vec![structure.origin().world.clone()],
        }
    }

    pub fn in_world(&self, world: &str) -> bool {
        self.worlds().iter().any(|w| &**w == world)
    }

    pub fn canonical_state(&self, pos: &Position) -> Option<BlockState> {
        dispatch!(self, o => o.canonical(pos))
    }

    /// State `viewer` sees at `pos`: override, else supplier, else canonical.
    pub fn resolve_state(&self, viewer: &ViewerId, pos: &Position) -> Option<BlockState> {
        dispatch!(self, o => o.resolve(viewer, pos))
    }

    /// Collision boxes at `pos`, viewer-resolved when a viewer is given.
    pub fn hit_boxes(&self, ctx: &EngineContext, viewer: Option<&ViewerId>, pos: &Position) -> Vec<BoundingBox> {
        let state = match viewer {
            Some(id) => self.resolve_state(id, pos),
            None => self.canonical_state(pos),
        };
        let Some(state) = state else {
            return Vec::new();
        };
        let fallback = ctx.world.block_state(pos);
        ctx.geometry.collision_boxes_at(&state, pos, Some(&fallback))
    }

    /// Appends the viewer's resolved view inside `world`.
    pub fn collect_view(&self, viewer: &ViewerId, world: &str, out: &mut Vec<(BlockPos, BlockState)>) {
        dispatch!(self, o => out.extend(o.view_changes(viewer, world)))
    }

    // -----------------------------------------------------------------------
    // Network
    // -----------------------------------------------------------------------

    pub fn send_view(&self, ctx: &EngineContext, viewer: &ViewerId) {
        dispatch!(self, o => o.send_view(ctx, viewer))
    }

    pub fn send_restore(&self, ctx: &EngineContext, viewer: &ViewerId) {
        dispatch!(self, o => o.send_restore(ctx, viewer))
    }

    pub fn send_updates(&self, ctx: &EngineContext) -> usize {
        dispatch!(self, o => o.send_updates(ctx))
    }

    /// Resends the viewer's resolved state at a single position.
    pub fn send_position(&self, ctx: &EngineContext, viewer: &ViewerId, pos: &Position) {
        if let Some(state) = self.resolve_state(viewer, pos) {
            ctx.send(viewer, ClientboundPacket::block_change(pos.block_pos(), state));
        }
    }

    /// Positions sharing the break animation of `pos`.
    pub(crate) fn animation_positions(&self, pos: &Position) -> Vec<Position> {
        match self {
            Overlay::Group(group) => group.positions(),
            _ => vec![pos.clone()],
        }
    }
}

/// De-duplicates handles by overlay id, keeping first occurrences.
pub(crate) fn dedup_handles(handles: impl IntoIterator<Item = OverlayHandle>) -> Vec<OverlayHandle> {
    let mut seen = HashSet::new();
    handles
        .into_iter()
        .filter(|handle| seen.insert(handle.id()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_break_speed_is_vanilla() {
        assert_eq!(BreakSpeed::from_raw(-1), BreakSpeed::Vanilla);
        assert_eq!(BreakSpeed::from_raw(0), BreakSpeed::Ticks(0));
        assert!(BreakSpeed::from_raw(20).is_managed());
        assert!(!BreakSpeed::from_raw(-5).is_managed());
    }

    #[test]
    fn default_settings_use_vanilla_timing() {
        let settings = OverlaySettings::default();
        assert_eq!(settings.break_speed, -1);
        assert!(!settings.auto_add_on_join);
        assert!(!settings.global_break_animation);
    }
}
