//! Outbound rewrite: substitutes viewer-resolved overlay states into
//! world-sync packets on their way to one viewer.
//!
//! Only positions whose overlay has the receiving viewer registered are
//! touched; everything else passes through unchanged.

use crate::protocol::ClientboundPacket;
use crate::registry::OverlayRegistry;
use crate::types::{BlockPos, ChunkKey, ViewerInfo};
use log::debug;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteOutcome {
    /// Block entries replaced in the packet.
    pub rewritten: usize,
}

pub struct PacketRewriter {
    registry: Arc<OverlayRegistry>,
}

impl PacketRewriter {
    pub fn new(registry: Arc<OverlayRegistry>) -> Self {
        Self { registry }
    }

    /// Rewrites `packet` in place for `viewer`.
    pub fn rewrite(&self, viewer: &ViewerInfo, packet: &mut ClientboundPacket) -> RewriteOutcome {
        let rewritten = match packet {
            ClientboundPacket::ChunkData {
                chunk_x,
                chunk_z,
                sections,
            } => self.rewrite_chunk(viewer, *chunk_x, *chunk_z, sections),
            ClientboundPacket::BlockChange { position, state } => {
                match self.resolve(viewer, *position) {
                    Some(visible) => {
                        *state = visible;
                        1
                    }
                    None => 0,
                }
            }
            ClientboundPacket::MultiBlockChange { entries, .. } => {
                let mut count = 0;
                for entry in entries.iter_mut() {
                    if let Some(visible) = self.resolve(viewer, entry.position) {
                        entry.state = visible;
                        count += 1;
                    }
                }
                count
            }
            _ => 0,
        };

        if rewritten > 0 {
            debug!("Rewrote {} block(s) for viewer {}", rewritten, viewer.id);
        }
        RewriteOutcome { rewritten }
    }

    fn resolve(&self, viewer: &ViewerInfo, position: BlockPos) -> Option<crate::types::BlockState> {
        self.registry
            .visible_state(Some(&viewer.id), &position.at(&viewer.world))
    }

    fn rewrite_chunk(
        &self,
        viewer: &ViewerInfo,
        chunk_x: i32,
        chunk_z: i32,
        sections: &mut [Option<crate::protocol::ChunkSection>],
    ) -> usize {
        let overlays = self.registry.get_in_chunk(&viewer.world, chunk_x, chunk_z);
        if overlays.is_empty() {
            return 0;
        }

        let min_section = self.registry.context().world.min_height(&viewer.world) >> 4;
        let chunk = ChunkKey::new(viewer.world.clone(), chunk_x, chunk_z);

        let mut count = 0;
        for overlay in overlays {
            if !overlay.is_viewer(&viewer.id) {
                continue;
            }
            for pos in overlay.positions_in_chunk(&chunk) {
                let Some(state) = overlay.resolve_state(&viewer.id, &pos) else {
                    continue;
                };
                let index = (pos.y >> 4) - min_section;
                if index < 0 {
                    continue;
                }
                let Some(Some(section)) = sections.get_mut(index as usize) else {
                    continue;
                };
                section.set(pos.x, pos.y, pos.z, state);
                count += 1;
            }
        }
        count
    }
}
