//! `overlay.*` wire protocol.
//!
//! This module owns **every packet the engine produces, rewrites or consumes**
//! at the boundary with the host's network layer, plus the envelope used when
//! frames are published on the bus.
//!
//! ## Directions
//!
//! | Type                  | Direction        | Handled by                       |
//! |-----------------------|------------------|----------------------------------|
//! | [`ClientboundPacket`] | server → viewer  | produced by overlays, rewritten  |
//! | [`ServerboundPacket`] | viewer → server  | break tracker, placement handler |
//!
//! ## Design rules
//!
//! 1. Packets carry block coordinates without a world; the receiving
//!    viewer's world is implied.
//! 2. Block states travel as their canonical string encoding.
//! 3. Multi-block changes never span more than one 16³ section.
//! 4. Every published frame includes `frame: u64` and `session: String`.

use crate::codec::SectionKey;
use crate::types::{BlockFace, BlockPos, BlockState, Hand, ViewerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Blocks per chunk section (16³).
pub const SECTION_VOLUME: usize = 4096;

/// Indefinite effect duration, as the client understands it.
pub const INFINITE_DURATION: i32 = i32::MAX;

// ---------------------------------------------------------------------------
// Common envelope
// ---------------------------------------------------------------------------

/// Every published frame is wrapped in this envelope.
///
/// The `session` field lets multiplexed consumers distinguish servers.
/// The `frame` field is the tick that produced the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayEvent<T> {
    pub session: String,
    pub frame: u64,
    pub payload: T,
}

impl<T> OverlayEvent<T> {
    pub fn new(session: impl Into<String>, frame: u64, payload: T) -> Self {
        Self {
            session: session.into(),
            frame,
            payload,
        }
    }
}

/// A clientbound packet addressed to one viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outbound {
    pub viewer: ViewerId,
    pub packet: ClientboundPacket,
}

/// A serverbound packet handed back to the true world handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forwarded {
    pub viewer: ViewerId,
    pub packet: ServerboundPacket,
}

// ---------------------------------------------------------------------------
// Chunk sections
// ---------------------------------------------------------------------------

/// One 16x16x16 slice of a chunk snapshot, indexed `y << 8 | z << 4 | x`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSection {
    states: Vec<BlockState>,
}

impl ChunkSection {
    pub fn filled(state: BlockState) -> Self {
        Self {
            states: vec![state; SECTION_VOLUME],
        }
    }

    fn index(x: i32, y: i32, z: i32) -> usize {
        (((y & 15) << 8) | ((z & 15) << 4) | (x & 15)) as usize
    }

    /// Reads the state at block coordinates; only the low four bits count.
    pub fn get(&self, x: i32, y: i32, z: i32) -> Option<&BlockState> {
        self.states.get(Self::index(x, y, z))
    }

    pub fn set(&mut self, x: i32, y: i32, z: i32, state: BlockState) {
        if let Some(slot) = self.states.get_mut(Self::index(x, y, z)) {
            *slot = state;
        }
    }
}

// ---------------------------------------------------------------------------
// Clientbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockChangeEntry {
    pub position: BlockPos,
    pub state: BlockState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    MiningFatigue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientboundPacket {
    /// Full column snapshot. Sections are ordered bottom-up from the world's
    /// minimum height; `None` marks a section the packet does not carry.
    ChunkData {
        chunk_x: i32,
        chunk_z: i32,
        sections: Vec<Option<ChunkSection>>,
    },
    BlockChange {
        position: BlockPos,
        state: BlockState,
    },
    MultiBlockChange {
        section: SectionKey,
        entries: Vec<BlockChangeEntry>,
    },
    /// Stage 0..=9, or -1 to clear.
    BreakAnimation {
        entity_id: i32,
        position: BlockPos,
        stage: i8,
    },
    EffectApply {
        entity_id: i32,
        effect: Effect,
        amplifier: u8,
        duration: i32,
        flags: u8,
    },
    EffectRemove {
        entity_id: i32,
        effect: Effect,
    },
}

impl ClientboundPacket {
    pub fn block_change(position: BlockPos, state: BlockState) -> Self {
        Self::BlockChange { position, state }
    }

    pub fn mining_fatigue(entity_id: i32, amplifier: u8) -> Self {
        Self::EffectApply {
            entity_id,
            effect: Effect::MiningFatigue,
            amplifier,
            duration: INFINITE_DURATION,
            flags: 1,
        }
    }

    pub fn clear_mining_fatigue(entity_id: i32) -> Self {
        Self::EffectRemove {
            entity_id,
            effect: Effect::MiningFatigue,
        }
    }
}

/// Groups block changes into one multi-block change per section, in section
/// key order. Entry order inside a section is preserved.
pub fn section_changes(
    changes: impl IntoIterator<Item = (BlockPos, BlockState)>,
) -> Vec<ClientboundPacket> {
    let mut by_section: BTreeMap<SectionKey, Vec<BlockChangeEntry>> = BTreeMap::new();
    for (position, state) in changes {
        by_section
            .entry(SectionKey::of_block(position.x, position.y, position.z))
            .or_default()
            .push(BlockChangeEntry { position, state });
    }
    by_section
        .into_iter()
        .map(|(section, entries)| ClientboundPacket::MultiBlockChange { section, entries })
        .collect()
}

// ---------------------------------------------------------------------------
// Serverbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigAction {
    Start,
    Cancel,
    Finish,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerboundPacket {
    Digging {
        position: BlockPos,
        face: BlockFace,
        action: DigAction,
    },
    PlaceBlock {
        position: BlockPos,
        face: BlockFace,
        hand: Hand,
    },
}

// ---------------------------------------------------------------------------
// Bus subjects (string constants)
// ---------------------------------------------------------------------------

pub mod subjects {
    use super::ClientboundPacket;

    pub const BLOCK_CHANGE: &str = "overlay.block.change";
    pub const MULTI_BLOCK_CHANGE: &str = "overlay.block.multi_change";
    pub const CHUNK_DATA: &str = "overlay.chunk.data";
    pub const BREAK_ANIMATION: &str = "overlay.block.break_animation";
    pub const EFFECT_APPLY: &str = "overlay.effect.apply";
    pub const EFFECT_REMOVE: &str = "overlay.effect.remove";
    pub const INBOUND_FORWARD: &str = "overlay.inbound.forward";

    pub mod cmd {
        pub const STATS: &str = "overlay.command.stats";
        pub const SUBMIT: &str = "overlay.command.submit";
    }

    /// Subject a clientbound packet is published on.
    pub fn for_packet(packet: &ClientboundPacket) -> &'static str {
        match packet {
            ClientboundPacket::ChunkData { .. } => CHUNK_DATA,
            ClientboundPacket::BlockChange { .. } => BLOCK_CHANGE,
            ClientboundPacket::MultiBlockChange { .. } => MULTI_BLOCK_CHANGE,
            ClientboundPacket::BreakAnimation { .. } => BREAK_ANIMATION,
            ClientboundPacket::EffectApply { .. } => EFFECT_APPLY,
            ClientboundPacket::EffectRemove { .. } => EFFECT_REMOVE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_index_uses_low_bits() {
        let mut section = ChunkSection::filled(BlockState::air());
        section.set(-1, 70, 33, BlockState::new("minecraft:stone"));
        assert_eq!(
            section.get(15, 6, 1),
            Some(&BlockState::new("minecraft:stone"))
        );
        assert_eq!(section.get(0, 0, 0), Some(&BlockState::air()));
    }

    #[test]
    fn changes_group_by_section() {
        let stone = BlockState::new("minecraft:stone");
        let packets = section_changes(vec![
            (BlockPos::new(0, 0, 0), stone.clone()),
            (BlockPos::new(15, 15, 15), stone.clone()),
            (BlockPos::new(16, 0, 0), stone.clone()),
            (BlockPos::new(0, -1, 0), stone),
        ]);
        assert_eq!(packets.len(), 3);

        let sizes: Vec<usize> = packets
            .iter()
            .map(|p| match p {
                ClientboundPacket::MultiBlockChange { entries, .. } => entries.len(),
                _ => 0,
            })
            .collect();
        assert_eq!(sizes.iter().sum::<usize>(), 4);
        assert!(sizes.contains(&2));
    }

    #[test]
    fn packets_serialise_with_type_tag() {
        let packet = ClientboundPacket::BreakAnimation {
            entity_id: 7,
            position: BlockPos::new(1, 2, 3),
            stage: 4,
        };
        let json = serde_json::to_value(&packet).unwrap();
        assert_eq!(json["type"], "break_animation");
        assert_eq!(json["stage"], 4);
        assert_eq!(subjects::for_packet(&packet), subjects::BREAK_ANIMATION);
    }
}
