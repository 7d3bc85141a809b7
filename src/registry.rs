//! OverlayRegistry: spatially indexed ownership of every overlay.
//!
//! Cells and groups are indexed per position under their chunk. Structures
//! are indexed per chunk only; the structure itself answers which positions
//! inside that chunk it owns. A position belongs to at most one overlay.

use crate::deferred::{DeferredAction, DeferredQueue};
use crate::error::{OverlayError, Result};
use crate::geometry::BoundingBox;
use crate::host::EngineContext;
use crate::overlay::group::GroupStates;
use crate::overlay::{
    dedup_handles, Overlay, OverlayCell, OverlayGroup, OverlayHandle, OverlayId, OverlayKind,
    OverlayStructure,
};
use crate::types::{BlockPos, BlockState, ChunkKey, Position, ViewerId, ViewerInfo};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// SpatialIndex
// ---------------------------------------------------------------------------

/// Lock order: a structure's chunk index may be held while calling in here,
/// never the other way round. Nothing in here calls back into an overlay
/// while one of its own map guards is alive.
#[derive(Default)]
pub(crate) struct SpatialIndex {
    blocks: DashMap<ChunkKey, HashMap<Position, OverlayHandle>>,
    // registered cells and groups, including empty groups
    block_overlays: DashMap<OverlayId, OverlayHandle>,
    structure_chunks: DashMap<ChunkKey, HashSet<OverlayId>>,
    structures: DashMap<OverlayId, OverlayHandle>,
}

impl SpatialIndex {
    pub(crate) fn index_structure_chunk(&self, chunk: ChunkKey, id: OverlayId) {
        self.structure_chunks.entry(chunk).or_default().insert(id);
    }

    pub(crate) fn unindex_structure_chunk(&self, chunk: &ChunkKey, id: OverlayId) {
        if let Entry::Occupied(mut ids) = self.structure_chunks.entry(chunk.clone()) {
            ids.get_mut().remove(&id);
            if ids.get().is_empty() {
                ids.remove();
            }
        }
    }

    fn block_owner(&self, pos: &Position) -> Option<OverlayHandle> {
        self.blocks
            .get(&pos.chunk())
            .and_then(|owners| owners.get(pos).cloned())
    }

    fn structures_in_chunk(&self, chunk: &ChunkKey) -> Vec<OverlayHandle> {
        let ids: Vec<OverlayId> = match self.structure_chunks.get(chunk) {
            Some(ids) => ids.iter().copied().collect(),
            None => return Vec::new(),
        };
        ids.into_iter()
            .filter_map(|id| self.structures.get(&id).map(|handle| handle.clone()))
            .collect()
    }

    fn structure_owner(&self, pos: &Position, except: Option<OverlayId>) -> Option<OverlayHandle> {
        self.structures_in_chunk(&pos.chunk())
            .into_iter()
            .find(|handle| Some(handle.id()) != except && handle.contains(pos))
    }

    fn owner(&self, pos: &Position) -> Option<OverlayHandle> {
        self.block_owner(pos)
            .or_else(|| self.structure_owner(pos, None))
    }

    /// Owner of `pos` other than the overlay `id`.
    pub(crate) fn owner_excluding(&self, pos: &Position, id: OverlayId) -> Option<OverlayHandle> {
        self.block_owner(pos)
            .filter(|handle| handle.id() != id)
            .or_else(|| self.structure_owner(pos, Some(id)))
    }

    fn insert_block(&self, pos: Position, handle: &OverlayHandle) {
        self.blocks
            .entry(pos.chunk())
            .or_default()
            .insert(pos, handle.clone());
    }

    fn remove_block(&self, pos: &Position, id: OverlayId) {
        if let Entry::Occupied(mut owners) = self.blocks.entry(pos.chunk()) {
            if owners.get().get(pos).is_some_and(|h| h.id() == id) {
                owners.get_mut().remove(pos);
            }
            if owners.get().is_empty() {
                owners.remove();
            }
        }
    }

    fn block_chunks(&self) -> Vec<ChunkKey> {
        self.blocks.iter().map(|entry| entry.key().clone()).collect()
    }

    fn handles_in_block_chunk(&self, chunk: &ChunkKey) -> Vec<OverlayHandle> {
        self.blocks
            .get(chunk)
            .map(|owners| owners.values().cloned().collect())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// OverlayRegistry
// ---------------------------------------------------------------------------

pub struct OverlayRegistry {
    ctx: EngineContext,
    index: Arc<SpatialIndex>,
    deferred: DeferredQueue,
}

impl OverlayRegistry {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            index: Arc::new(SpatialIndex::default()),
            deferred: DeferredQueue::new(),
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn deferred(&self) -> &DeferredQueue {
        &self.deferred
    }

    fn check_world(&self, world: &str) -> Result<()> {
        if world.is_empty() || !self.ctx.world.has_world(world) {
            warn!("Refusing to create overlay in unknown world '{}'", world);
            return Err(OverlayError::UnknownWorld(world.to_string()));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Factories
    // -----------------------------------------------------------------------

    /// Creates a cell. If a cell already sits at `pos` it is returned
    /// unchanged; any other owner makes this fail.
    pub fn create_cell(&self, pos: Position, state: BlockState) -> Result<OverlayHandle> {
        self.check_world(&pos.world)?;

        if let Some(existing) = self.index.owner(&pos) {
            return match existing.kind() {
                OverlayKind::Cell => Ok(existing),
                _ => Err(OverlayError::PositionOccupied(pos)),
            };
        }

        let handle: OverlayHandle = Arc::new(Overlay::Cell(OverlayCell::new(pos.clone(), state)));
        self.index.block_overlays.insert(handle.id(), handle.clone());
        self.index.insert_block(pos.clone(), &handle);
        debug!("Created cell {} at {}", handle.id(), pos);
        Ok(handle)
    }

    /// Creates a group over `states`. Fails without side effects if any
    /// position is already owned.
    pub fn create_group(&self, name: impl Into<String>, states: GroupStates) -> Result<OverlayHandle> {
        let worlds: HashSet<&str> = states.keys().map(|pos| &*pos.world).collect();
        for world in worlds {
            self.check_world(world)?;
        }
        if let Some(pos) = states.keys().find(|pos| self.index.owner(pos).is_some()) {
            return Err(OverlayError::PositionOccupied(pos.clone()));
        }

        let positions: Vec<Position> = states.keys().cloned().collect();
        let handle: OverlayHandle = Arc::new(Overlay::Group(OverlayGroup::new(name, states)));
        self.index.block_overlays.insert(handle.id(), handle.clone());
        for pos in positions {
            self.index.insert_block(pos, &handle);
        }
        debug!("Created group {} ({} positions)", handle.id(), handle.positions().len());
        Ok(handle)
    }

    pub fn create_structure(&self, origin: Position) -> Result<OverlayHandle> {
        self.check_world(&origin.world)?;

        let structure = OverlayStructure::new(origin, Arc::downgrade(&self.index));
        let handle: OverlayHandle = Arc::new(Overlay::Structure(structure));
        self.index.structures.insert(handle.id(), handle.clone());
        debug!("Created structure {}", handle.id());
        Ok(handle)
    }

    // -----------------------------------------------------------------------
    // Group membership
    // -----------------------------------------------------------------------

    /// Adds (or re-states) members of `group` and shows them to its viewers.
    pub fn add_to_group(&self, group: &OverlayHandle, states: GroupStates) -> Result<()> {
        let inner = group.as_group().ok_or(OverlayError::NotAGroup)?;
        if !self.is_registered(group) {
            return Err(OverlayError::Detached);
        }

        let worlds: HashSet<&str> = states.keys().map(|pos| &*pos.world).collect();
        for world in worlds {
            self.check_world(world)?;
        }
        if let Some(pos) = states
            .keys()
            .find(|pos| self.index.owner_excluding(pos, group.id()).is_some())
        {
            return Err(OverlayError::PositionOccupied(pos.clone()));
        }

        for pos in inner.insert_members(states) {
            self.index.insert_block(pos, group);
        }
        group.send_updates(&self.ctx);
        Ok(())
    }

    /// Removes members, restoring the true world at those positions for
    /// every online viewer. Returns how many positions were removed.
    pub fn remove_from_group(&self, group: &OverlayHandle, positions: &[Position]) -> Result<usize> {
        let inner = group.as_group().ok_or(OverlayError::NotAGroup)?;

        let removed = inner.remove_members(positions);
        for pos in &removed {
            self.index.remove_block(pos, group.id());
        }

        for viewer in group.viewer_ids() {
            let Some(info) = self.ctx.viewers.lookup(&viewer) else {
                continue;
            };
            let changes = removed
                .iter()
                .filter(|pos| pos.world == info.world)
                .map(|pos| (pos.block_pos(), self.ctx.world.block_state(pos)))
                .collect();
            crate::overlay::send_changes(&self.ctx, &viewer, changes);
        }
        Ok(removed.len())
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub fn get_at(&self, pos: &Position) -> Option<OverlayHandle> {
        self.index.owner(pos)
    }

    /// Structure owning `pos` and the position relative to its origin.
    pub fn structure_block_at(&self, pos: &Position) -> Option<(OverlayHandle, BlockPos)> {
        let handle = self.index.structure_owner(pos, None)?;
        let rel = handle.as_structure()?.relative_of(pos)?;
        Some((handle, rel))
    }

    pub fn is_registered(&self, handle: &OverlayHandle) -> bool {
        match handle.as_ref() {
            Overlay::Structure(_) => self.index.structures.contains_key(&handle.id()),
            _ => self.index.block_overlays.contains_key(&handle.id()),
        }
    }

    pub fn get_in_chunk(&self, world: &str, chunk_x: i32, chunk_z: i32) -> Vec<OverlayHandle> {
        let chunk = ChunkKey::new(world, chunk_x, chunk_z);
        let mut handles = self.index.handles_in_block_chunk(&chunk);
        handles.extend(self.index.structures_in_chunk(&chunk));
        dedup_handles(handles)
    }

    pub fn get_in_world(&self, world: &str) -> Vec<OverlayHandle> {
        self.all()
            .into_iter()
            .filter(|handle| handle.in_world(world))
            .collect()
    }

    /// Every registered overlay.
    pub fn all(&self) -> Vec<OverlayHandle> {
        let mut handles: Vec<OverlayHandle> = self
            .index
            .block_overlays
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        handles.extend(
            self.index
                .structures
                .iter()
                .map(|entry| entry.value().clone()),
        );
        handles
    }

    pub fn get_by_viewer(&self, viewer: &ViewerId) -> Vec<OverlayHandle> {
        self.all()
            .into_iter()
            .filter(|handle| handle.is_viewer(viewer))
            .collect()
    }

    /// Overlays the viewer sees that carry the metadata key.
    pub fn get_by_viewer_with_meta(&self, viewer: &ViewerId, key: &str) -> Vec<OverlayHandle> {
        self.get_by_viewer(viewer)
            .into_iter()
            .filter(|handle| handle.metadata().contains(key))
            .collect()
    }

    pub fn get_by_metadata(&self, key: &str) -> Vec<OverlayHandle> {
        self.all()
            .into_iter()
            .filter(|handle| handle.metadata().contains(key))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Hit queries
    // -----------------------------------------------------------------------

    /// Overlays in `world` with a canonical collision box overlapping `area`.
    pub fn get_hit(&self, world: &str, area: &BoundingBox) -> Vec<OverlayHandle> {
        self.hit_query(world, area, None)
    }

    pub fn get_hit_with_meta(&self, world: &str, area: &BoundingBox, key: &str) -> Vec<OverlayHandle> {
        self.get_hit(world, area)
            .into_iter()
            .filter(|handle| handle.metadata().contains(key))
            .collect()
    }

    /// Overlays the viewer sees whose resolved boxes overlap `area`.
    pub fn get_hit_by_viewer(&self, viewer: &ViewerInfo, area: &BoundingBox) -> Vec<OverlayHandle> {
        self.hit_query(&viewer.world, area, Some(&viewer.id))
    }

    pub fn get_hit_by_viewer_with_meta(
        &self,
        viewer: &ViewerInfo,
        area: &BoundingBox,
        key: &str,
    ) -> Vec<OverlayHandle> {
        self.get_hit_by_viewer(viewer, area)
            .into_iter()
            .filter(|handle| handle.metadata().contains(key))
            .collect()
    }

    fn hit_query(&self, world: &str, area: &BoundingBox, viewer: Option<&ViewerId>) -> Vec<OverlayHandle> {
        let min_cx = (area.min.x.floor() as i32) >> 4;
        let max_cx = (area.max.x.floor() as i32) >> 4;
        let min_cz = (area.min.z.floor() as i32) >> 4;
        let max_cz = (area.max.z.floor() as i32) >> 4;

        let mut hits = Vec::new();
        let mut tested = HashSet::new();
        for cx in min_cx..=max_cx {
            for cz in min_cz..=max_cz {
                let chunk = ChunkKey::new(world, cx, cz);
                for handle in self.get_in_chunk(world, cx, cz) {
                    if tested.contains(&handle.id()) {
                        continue;
                    }
                    if viewer.is_some_and(|id| !handle.is_viewer(id)) {
                        continue;
                    }
                    let hit = handle.positions_in_chunk(&chunk).iter().any(|pos| {
                        handle
                            .hit_boxes(&self.ctx, viewer, pos)
                            .iter()
                            .any(|b| b.overlaps(area))
                    });
                    if hit {
                        tested.insert(handle.id());
                        hits.push(handle);
                    }
                }
            }
        }
        hits
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    /// State at `pos` as `viewer` sees it, or canonical for `None`. `None`
    /// when no overlay owns the position or the viewer is not registered.
    pub fn visible_state(&self, viewer: Option<&ViewerId>, pos: &Position) -> Option<BlockState> {
        let owner = self.get_at(pos)?;
        match viewer {
            Some(id) => owner.resolve_state(id, pos),
            None => owner.canonical_state(pos),
        }
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    fn unindex(&self, handle: &OverlayHandle) {
        match handle.as_ref() {
            Overlay::Structure(structure) => {
                for chunk in structure.chunks() {
                    self.index.unindex_structure_chunk(&chunk, handle.id());
                }
                self.index.structures.remove(&handle.id());
                structure.detach();
            }
            _ => {
                for pos in handle.positions() {
                    self.index.remove_block(&pos, handle.id());
                }
                self.index.block_overlays.remove(&handle.id());
            }
        }
    }

    /// Restores every viewer, then drops the overlay from the index.
    /// Returns `false` if it was not registered.
    pub fn remove(&self, handle: &OverlayHandle) -> bool {
        if !self.is_registered(handle) {
            return false;
        }
        for viewer in handle.viewer_ids() {
            handle.remove_viewer(&self.ctx, &viewer);
        }
        self.unindex(handle);
        debug!("Removed overlay {}", handle.id());
        true
    }

    /// Drops every matching overlay from the index now; viewer restoration
    /// runs on the next tick.
    pub fn remove_if(&self, predicate: impl Fn(&OverlayHandle) -> bool) -> usize {
        let doomed: Vec<OverlayHandle> = self.all().into_iter().filter(|h| predicate(h)).collect();
        for handle in &doomed {
            self.unindex(handle);
            for viewer in handle.viewer_ids() {
                self.deferred.push(DeferredAction::RemoveViewer {
                    overlay: handle.clone(),
                    viewer,
                });
            }
        }
        doomed.len()
    }

    /// Applies queued deferred actions. Called once per tick.
    pub fn run_deferred(&self) -> usize {
        self.deferred.run(&self.ctx)
    }

    // -----------------------------------------------------------------------
    // Refresh
    // -----------------------------------------------------------------------

    /// Resends every overlay the viewer sees.
    pub fn update_viewer(&self, viewer: &ViewerId) -> usize {
        let handles = self.get_by_viewer(viewer);
        for handle in &handles {
            handle.send_view(&self.ctx, viewer);
        }
        handles.len()
    }

    pub fn update_viewer_with_meta(&self, viewer: &ViewerId, key: &str) -> usize {
        let handles = self.get_by_viewer_with_meta(viewer, key);
        for handle in &handles {
            handle.send_view(&self.ctx, viewer);
        }
        handles.len()
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    pub fn count(&self, kind: OverlayKind) -> usize {
        match kind {
            OverlayKind::Structure => self.index.structures.len(),
            _ => self
                .index
                .block_overlays
                .iter()
                .filter(|entry| entry.value().kind() == kind)
                .count(),
        }
    }

    /// Chunks holding at least one indexed position or structure.
    pub fn indexed_chunks(&self) -> usize {
        let mut chunks: HashSet<ChunkKey> = self.index.block_chunks().into_iter().collect();
        chunks.extend(
            self.index
                .structure_chunks
                .iter()
                .map(|entry| entry.key().clone()),
        );
        chunks.len()
    }

    /// Whether the structure index has an entry for this chunk.
    pub fn is_structure_chunk_indexed(&self, world: &str, chunk_x: i32, chunk_z: i32) -> bool {
        self.index
            .structure_chunks
            .contains_key(&ChunkKey::new(world, chunk_x, chunk_z))
    }
}
