//! Bulk overlay: an origin plus a sparse map of packed relative keys.
//!
//! The chunk index maps each absolute chunk the structure touches to the set
//! of keys inside it. An entry is created with the first key in a chunk and
//! dropped with the last, and the registry is told about exactly those two
//! transitions while the entry is still locked.

use super::{OverlayBase, OverlayId, OverlayView};
use crate::codec::{pack_chunk, unpack_chunk, PackedKey};
use crate::error::{OverlayError, Result};
use crate::host::EngineContext;
use crate::registry::SpatialIndex;
use crate::types::{BlockPos, BlockState, ChunkKey, Position, ViewerId};
use crate::viewer::Supplier;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::{Arc, Weak};

pub struct OverlayStructure {
    pub(crate) base: OverlayBase<BlockState>,
    origin: Position,
    blocks: DashMap<PackedKey, BlockState>,
    chunk_index: DashMap<u64, HashSet<PackedKey>>,
    index: RwLock<Weak<SpatialIndex>>,
}

impl OverlayStructure {
    pub(crate) fn new(origin: Position, index: Weak<SpatialIndex>) -> Self {
        Self {
            base: OverlayBase::new(),
            origin,
            blocks: DashMap::new(),
            chunk_index: DashMap::new(),
            index: RwLock::new(index),
        }
    }

    pub fn id(&self) -> OverlayId {
        self.base.id
    }

    pub fn origin(&self) -> &Position {
        &self.origin
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn is_detached(&self) -> bool {
        self.index.read().strong_count() == 0
    }

    pub(crate) fn detach(&self) {
        *self.index.write() = Weak::new();
    }

    fn registry_index(&self) -> Result<Arc<SpatialIndex>> {
        self.index.read().upgrade().ok_or(OverlayError::Detached)
    }

    // -----------------------------------------------------------------------
    // Coordinates
    // -----------------------------------------------------------------------

    pub fn absolute(&self, rel: BlockPos) -> Position {
        self.origin.offset(rel.x, rel.y, rel.z)
    }

    /// Position relative to the origin, if `pos` is in the structure's world.
    pub fn relative_of(&self, pos: &Position) -> Option<BlockPos> {
        if pos.world != self.origin.world {
            return None;
        }
        Some(BlockPos::new(
            pos.x - self.origin.x,
            pos.y - self.origin.y,
            pos.z - self.origin.z,
        ))
    }

    fn key_of(&self, pos: &Position) -> Option<PackedKey> {
        let rel = self.relative_of(pos)?;
        PackedKey::new(rel.x, rel.y, rel.z).ok()
    }

    fn chunk_of(&self, abs: &Position) -> u64 {
        pack_chunk(abs.x >> 4, abs.z >> 4)
    }

    // -----------------------------------------------------------------------
    // Blocks
    // -----------------------------------------------------------------------

    /// Places `state` at `rel`. Fails if the position is owned by another
    /// overlay, the offset does not fit a packed key, or the structure has
    /// been removed from its registry.
    pub fn set_block(&self, rel: BlockPos, state: BlockState) -> Result<()> {
        let key = PackedKey::new(rel.x, rel.y, rel.z)?;
        let index = self.registry_index()?;
        let abs = self.absolute(rel);
        if index.owner_excluding(&abs, self.base.id).is_some() {
            return Err(OverlayError::PositionOccupied(abs));
        }

        self.blocks.insert(key, state);

        let chunk = self.chunk_of(&abs);
        match self.chunk_index.entry(chunk) {
            Entry::Occupied(mut members) => {
                members.get_mut().insert(key);
            }
            Entry::Vacant(slot) => {
                let mut members = HashSet::new();
                members.insert(key);
                let _held = slot.insert(members);
                index.index_structure_chunk(abs.chunk(), self.base.id);
            }
        }
        Ok(())
    }

    /// Removes the block at `rel`, returning its state.
    pub fn remove_block(&self, rel: BlockPos) -> Option<BlockState> {
        let key = PackedKey::new(rel.x, rel.y, rel.z).ok()?;
        let (_, state) = self.blocks.remove(&key)?;

        let abs = self.absolute(rel);
        if let Entry::Occupied(mut members) = self.chunk_index.entry(self.chunk_of(&abs)) {
            members.get_mut().remove(&key);
            if members.get().is_empty() {
                if let Some(index) = self.index.read().upgrade() {
                    index.unindex_structure_chunk(&abs.chunk(), self.base.id);
                }
                members.remove();
            }
        }
        Some(state)
    }

    pub fn get_block(&self, rel: BlockPos) -> Option<BlockState> {
        let key = PackedKey::new(rel.x, rel.y, rel.z).ok()?;
        self.blocks.get(&key).map(|state| state.clone())
    }

    pub fn block_at(&self, pos: &Position) -> Option<BlockState> {
        let key = self.key_of(pos)?;
        self.blocks.get(&key).map(|state| state.clone())
    }

    /// Relative positions of every block.
    pub fn relative_positions(&self) -> Vec<BlockPos> {
        self.blocks
            .iter()
            .map(|entry| {
                let (x, y, z) = entry.key().unpack();
                BlockPos::new(x, y, z)
            })
            .collect()
    }

    /// Absolute chunk coordinates the structure currently occupies.
    pub fn chunks(&self) -> Vec<ChunkKey> {
        self.chunk_index
            .iter()
            .map(|entry| {
                let (cx, cz) = unpack_chunk(*entry.key());
                ChunkKey::new(self.origin.world.clone(), cx, cz)
            })
            .collect()
    }

    /// Restores every viewer, then empties blocks, chunk index and viewers.
    pub fn clear(&self, ctx: &EngineContext) {
        for id in self.base.viewers.ids() {
            self.base.viewers.remove(&id, || self.send_restore(ctx, &id));
        }

        let chunks = self.chunks();
        self.blocks.clear();
        self.chunk_index.clear();
        if let Some(index) = self.index.read().upgrade() {
            for chunk in &chunks {
                index.unindex_structure_chunk(chunk, self.base.id);
            }
        }
        debug!("Cleared structure {} ({} chunks)", self.base.id, chunks.len());
    }

    // -----------------------------------------------------------------------
    // Viewer overrides (apply to every block of the structure)
    // -----------------------------------------------------------------------

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

    pub fn set_state_for_all(&self, ctx: &EngineContext, state: BlockState) {
        self.base.set_state_for_all(state);
        self.send_updates(ctx);
    }

    pub fn set_supplier_for_all(&self, ctx: &EngineContext, supplier: Supplier<BlockState>) {
        self.base.set_supplier_for_all(supplier);
        self.send_updates(ctx);
    }

    /// Resends the structure to every viewer.
    pub fn update(&self, ctx: &EngineContext) -> usize {
        self.send_updates(ctx)
    }
}

impl OverlayView for OverlayStructure {
    type State = BlockState;

    fn base(&self) -> &OverlayBase<BlockState> {
        &self.base
    }

    fn positions(&self) -> Vec<Position> {
        self.relative_positions()
            .into_iter()
            .map(|rel| self.absolute(rel))
            .collect()
    }

    fn positions_in_chunk(&self, chunk: &ChunkKey) -> Vec<Position> {
        if chunk.world != self.origin.world {
            return Vec::new();
        }
        let keys: Vec<PackedKey> = match self.chunk_index.get(&pack_chunk(chunk.x, chunk.z)) {
            Some(members) => members.iter().copied().collect(),
            None => return Vec::new(),
        };
        keys.into_iter()
            .map(|key| {
                let (x, y, z) = key.unpack();
                self.absolute(BlockPos::new(x, y, z))
            })
            .collect()
    }

    fn positions_in_world(&self, world: &str) -> Vec<Position> {
        if &*self.origin.world == world {
            self.positions()
        } else {
            Vec::new()
        }
    }

    fn contains(&self, pos: &Position) -> bool {
        self.key_of(pos)
            .is_some_and(|key| self.blocks.contains_key(&key))
    }

    fn canonical(&self, pos: &Position) -> Option<BlockState> {
        self.block_at(pos)
    }

    fn resolve(&self, viewer: &ViewerId, pos: &Position) -> Option<BlockState> {
        let block = self.block_at(pos)?;
        let record = self.base.viewers.get(viewer)?;
        Some(record.resolved().unwrap_or(block))
    }
}
