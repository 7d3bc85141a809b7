//! OverlayService – the tick domain tying registry, rewrite, listener and
//! break tracking together.
//!
//! Network threads call [`OverlayService::rewrite_outbound`] and
//! [`OverlayService::submit_inbound`]; everything that mutates viewer-visible
//! state on behalf of inbound traffic happens inside [`OverlayService::tick`].

use crate::breaking::{BreakTracker, InboundOutcome};
use crate::error::Result;
use crate::geometry::{BoundingGeometry, JsonBoundingBoxes};
use crate::host::EngineContext;
use crate::listener::{OverlayListener, PlacementOutcome};
use crate::overlay::OverlayKind;
use crate::protocol::{ClientboundPacket, ServerboundPacket};
use crate::registry::OverlayRegistry;
use crate::rewrite::{PacketRewriter, RewriteOutcome};
use crate::types::{OverlayServiceConfig, OverlayStats, ViewerId, ViewerInfo};
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Tick result
// ---------------------------------------------------------------------------

/// Counters produced by a single [`OverlayService::tick`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickEvents {
    /// The tick counter that produced this set of events.
    pub tick: u64,
    /// Deferred side effects applied at the start of the tick.
    pub deferred_applied: usize,
    /// Inbound packets taken off the queue.
    pub inbound_processed: usize,
    /// Of those, how many were handed to the true world.
    pub forwarded: usize,
    /// Breaks that completed during animation advance.
    pub finished_breaks: usize,
}

pub struct OverlayService {
    config: OverlayServiceConfig,
    registry: Arc<OverlayRegistry>,
    breaks: Arc<BreakTracker>,
    listener: OverlayListener,
    rewriter: PacketRewriter,
    inbound: Mutex<VecDeque<(ViewerId, ServerboundPacket)>>,
    tick_count: u64,
}

impl OverlayService {
    pub fn new(config: OverlayServiceConfig, ctx: EngineContext) -> Self {
        let ctx = ctx.with_fatigue_amplifier(config.fatigue_amplifier);
        let registry = Arc::new(OverlayRegistry::new(ctx));
        let breaks = Arc::new(BreakTracker::new());
        Self {
            listener: OverlayListener::new(registry.clone(), breaks.clone()),
            rewriter: PacketRewriter::new(registry.clone()),
            config,
            registry,
            breaks,
            inbound: Mutex::new(VecDeque::new()),
            tick_count: 0,
        }
    }

    /// Geometry service described by `config`: the dataset at
    /// `bounding_boxes_path` if set, an empty one otherwise.
    pub fn load_geometry(config: &OverlayServiceConfig) -> Result<Arc<BoundingGeometry>> {
        let dataset = match &config.bounding_boxes_path {
            Some(path) => JsonBoundingBoxes::from_path(path)?,
            None => JsonBoundingBoxes::default(),
        };
        info!("Geometry dataset ready ({} block states)", dataset.len());
        Ok(Arc::new(BoundingGeometry::new(
            Arc::new(dataset),
            config.geometry_cache_capacity,
        )))
    }

    pub fn config(&self) -> &OverlayServiceConfig {
        &self.config
    }

    pub fn context(&self) -> &EngineContext {
        self.registry.context()
    }

    pub fn registry(&self) -> &Arc<OverlayRegistry> {
        &self.registry
    }

    pub fn breaks(&self) -> &Arc<BreakTracker> {
        &self.breaks
    }

    pub fn listener(&self) -> &OverlayListener {
        &self.listener
    }

    // -----------------------------------------------------------------------
    // Viewer lifecycle
    // -----------------------------------------------------------------------

    pub fn viewer_joined(&self, viewer: &ViewerInfo) -> usize {
        self.listener.on_join(viewer)
    }

    pub fn viewer_left(&self, viewer: &ViewerId) {
        self.listener.on_quit(viewer);
    }

    // -----------------------------------------------------------------------
    // Network paths
    // -----------------------------------------------------------------------

    /// Rewrites an outbound world-sync packet for one viewer.
    pub fn rewrite_outbound(&self, viewer: &ViewerInfo, packet: &mut ClientboundPacket) -> RewriteOutcome {
        self.rewriter.rewrite(viewer, packet)
    }

    /// Queues an inbound packet for the next tick.
    pub fn submit_inbound(&self, viewer: ViewerId, packet: ServerboundPacket) {
        self.inbound.lock().push_back((viewer, packet));
    }

    pub fn pending_inbound(&self) -> usize {
        self.inbound.lock().len()
    }

    /// Routes one inbound packet. Forwarded packets go to the sink.
    pub fn handle_inbound(&self, viewer: &ViewerId, packet: ServerboundPacket) -> InboundOutcome {
        let ctx = self.registry.context();
        let Some(info) = ctx.viewers.lookup(viewer) else {
            debug!("Dropped inbound packet from offline viewer {}", viewer);
            return InboundOutcome::Consumed;
        };

        let (outcome, packet) = match packet {
            ServerboundPacket::Digging {
                position,
                face,
                action,
            } => (
                self.breaks
                    .handle_digging(&self.registry, &info, position, face, action),
                packet,
            ),
            ServerboundPacket::PlaceBlock {
                position,
                face,
                hand,
            } => match self.listener.on_place(&info, position, face) {
                PlacementOutcome::Pass => (InboundOutcome::Forward, packet),
                PlacementOutcome::Cancel => (InboundOutcome::Consumed, packet),
                PlacementOutcome::Redirect(target) => {
                    debug!("Placement by {} redirected {} -> {}", viewer, position, target);
                    (
                        InboundOutcome::Forward,
                        ServerboundPacket::PlaceBlock {
                            position: target,
                            face,
                            hand,
                        },
                    )
                }
            },
        };

        if outcome == InboundOutcome::Forward {
            ctx.sink.forward_inbound(viewer, packet);
        }
        outcome
    }

    // -----------------------------------------------------------------------
    // Main tick
    // -----------------------------------------------------------------------

    /// Advance by one tick: deferred effects, then queued inbound packets,
    /// then break animations.
    pub fn tick(&mut self) -> TickEvents {
        self.tick_count += 1;

        let deferred_applied = self.registry.run_deferred();

        let queued: Vec<_> = self.inbound.lock().drain(..).collect();
        let inbound_processed = queued.len();
        let mut forwarded = 0;
        for (viewer, packet) in queued {
            if self.handle_inbound(&viewer, packet) == InboundOutcome::Forward {
                forwarded += 1;
            }
        }

        let finished_breaks = self.breaks.tick(self.registry.context());

        TickEvents {
            tick: self.tick_count,
            deferred_applied,
            inbound_processed,
            forwarded,
            finished_breaks,
        }
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    pub fn stats(&self) -> OverlayStats {
        OverlayStats {
            cells: self.registry.count(OverlayKind::Cell),
            groups: self.registry.count(OverlayKind::Group),
            structures: self.registry.count(OverlayKind::Structure),
            indexed_chunks: self.registry.indexed_chunks(),
            active_breaks: self.breaks.active_count(),
            pending_deferred: self.registry.deferred().len(),
            total_ticks: self.tick_count,
        }
    }
}
