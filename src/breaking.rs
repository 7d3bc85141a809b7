//! Break interaction state machine.
//!
//! ```text
//!   Idle ──start──▶ Mining ──tick*──▶ Finished
//!                     │
//!                     └──cancel──▶ Cancelled
//! ```
//!
//! A viewer is "Mining" exactly while it has an [`AnimationContext`]. The
//! context is created on a managed-speed start and is dropped on every exit,
//! together with the mining-impairment effect applied at the start.

use crate::events::{BlockBroken, BreakDecision, BreakStarted, Decision, StructureBroken};
use crate::host::EngineContext;
use crate::overlay::{BreakSpeed, Overlay, OverlayHandle};
use crate::protocol::{ClientboundPacket, DigAction};
use crate::registry::OverlayRegistry;
use crate::types::{BlockFace, BlockPos, GameMode, Hand, Position, ViewerId, ViewerInfo};
use log::debug;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

/// Stage value that clears the crack overlay.
pub const CLEAR_STAGE: i8 = -1;

/// Per-viewer progress of one break.
#[derive(Clone)]
pub struct AnimationContext {
    pub overlay: OverlayHandle,
    pub position: Position,
    /// Last stage sent, `-1` before the first.
    pub stage: i8,
    /// Ticks elapsed since the start.
    pub ticks: u32,
}

/// What should happen to an inbound packet after the tracker saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// The engine handled it; the true world never sees it.
    Consumed,
    /// Hand it to the true world handler.
    Forward,
}

enum Step {
    Idle,
    Stage(OverlayHandle, Position, i8),
    Finish(OverlayHandle, Position),
}

#[derive(Default)]
pub struct BreakTracker {
    active: Mutex<HashMap<ViewerId, AnimationContext>>,
    // viewers whose last start was vetoed
    cancelled: Mutex<HashSet<ViewerId>>,
}

impl BreakTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_mining(&self, viewer: &ViewerId) -> bool {
        self.active.lock().contains_key(viewer)
    }

    pub fn context(&self, viewer: &ViewerId) -> Option<AnimationContext> {
        self.active.lock().get(viewer).cloned()
    }

    pub fn has_pending_cancellation(&self, viewer: &ViewerId) -> bool {
        self.cancelled.lock().contains(viewer)
    }

    /// Drops all state for a viewer without sending anything.
    pub fn forget(&self, viewer: &ViewerId) {
        self.active.lock().remove(viewer);
        self.cancelled.lock().remove(viewer);
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Handles a digging packet. Positions the viewer does not see as an
    /// overlay are forwarded untouched.
    pub fn handle_digging(
        &self,
        registry: &OverlayRegistry,
        viewer: &ViewerInfo,
        position: BlockPos,
        face: BlockFace,
        action: DigAction,
    ) -> InboundOutcome {
        let pos = position.at(&viewer.world);
        let Some(overlay) = registry.get_at(&pos) else {
            return InboundOutcome::Forward;
        };
        if !overlay.is_viewer(&viewer.id) {
            return InboundOutcome::Forward;
        }

        let ctx = registry.context();
        match action {
            DigAction::Start => self.start(ctx, viewer, &overlay, &pos, face),
            DigAction::Cancel => {
                if BreakSpeed::from_raw(overlay.break_speed_for(&viewer.id)).is_managed() {
                    self.cancel(ctx, &viewer.id);
                }
                InboundOutcome::Consumed
            }
            DigAction::Finish => {
                self.finish(ctx, viewer, &overlay, &pos);
                InboundOutcome::Consumed
            }
        }
    }

    fn start(
        &self,
        ctx: &EngineContext,
        viewer: &ViewerInfo,
        overlay: &OverlayHandle,
        pos: &Position,
        face: BlockFace,
    ) -> InboundOutcome {
        self.cancelled.lock().remove(&viewer.id);
        let speed = BreakSpeed::from_raw(overlay.break_speed_for(&viewer.id));

        if speed.is_managed() {
            let event = BreakStarted {
                viewer: viewer.clone(),
                overlay: overlay.clone(),
                position: pos.clone(),
                face,
            };
            if let Decision::Cancel { restore } = ctx.events.start_break(&event) {
                self.cancelled.lock().insert(viewer.id);
                if restore {
                    overlay.send_position(ctx, &viewer.id, pos);
                }
                debug!("Break start at {} vetoed for {}", pos, viewer.id);
                return InboundOutcome::Forward;
            }
        }

        let instant = viewer.game_mode == GameMode::Creative
            || match speed {
                BreakSpeed::Ticks(ticks) => ticks == 0,
                BreakSpeed::Vanilla => overlay
                    .resolve_state(&viewer.id, pos)
                    .is_some_and(|state| ctx.world.hardness(&state) == 0.0),
            };
        if instant {
            self.finish(ctx, viewer, overlay, pos);
            return InboundOutcome::Consumed;
        }

        if speed.is_managed() {
            self.begin(ctx, viewer, overlay, pos);
        }
        InboundOutcome::Consumed
    }

    fn begin(&self, ctx: &EngineContext, viewer: &ViewerInfo, overlay: &OverlayHandle, pos: &Position) {
        let previous = self.active.lock().insert(
            viewer.id,
            AnimationContext {
                overlay: overlay.clone(),
                position: pos.clone(),
                stage: CLEAR_STAGE,
                ticks: 0,
            },
        );
        if let Some(previous) = previous {
            self.send_stage(ctx, viewer, &previous.overlay, &previous.position, CLEAR_STAGE);
        } else {
            ctx.send(
                &viewer.id,
                ClientboundPacket::mining_fatigue(viewer.entity_id, ctx.fatigue_amplifier),
            );
        }
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Advances every animation by one tick. Returns how many breaks
    /// finished.
    pub fn tick(&self, ctx: &EngineContext) -> usize {
        let viewers: Vec<ViewerId> = self.active.lock().keys().copied().collect();
        let mut finished = 0;

        for id in viewers {
            let Some(viewer) = ctx.viewers.lookup(&id) else {
                self.forget(&id);
                debug!("Pruned break context of offline viewer {}", id);
                continue;
            };

            let step = {
                let mut active = self.active.lock();
                let Some(context) = active.get_mut(&id) else {
                    continue;
                };
                let speed = context.overlay.break_speed_for(&id);
                let progress = if speed > 0 {
                    context.ticks as f64 / speed as f64
                } else {
                    1.0
                };
                context.ticks += 1;

                if speed <= 0 || progress >= 1.0 {
                    Step::Finish(context.overlay.clone(), context.position.clone())
                } else {
                    let stage = (progress * 10.0).floor() as i8;
                    if stage != context.stage {
                        context.stage = stage;
                        Step::Stage(context.overlay.clone(), context.position.clone(), stage)
                    } else {
                        Step::Idle
                    }
                }
            };

            match step {
                Step::Idle => {}
                Step::Stage(overlay, pos, stage) => {
                    self.send_stage(ctx, &viewer, &overlay, &pos, stage);
                }
                Step::Finish(overlay, pos) => {
                    self.finish(ctx, &viewer, &overlay, &pos);
                    finished += 1;
                }
            }
        }
        finished
    }

    // -----------------------------------------------------------------------
    // Exits
    // -----------------------------------------------------------------------

    /// Aborts the viewer's break: clears the animation and the effect.
    pub fn cancel(&self, ctx: &EngineContext, viewer: &ViewerId) -> bool {
        let Some(context) = self.active.lock().remove(viewer) else {
            return false;
        };
        if let Some(info) = ctx.viewers.lookup(viewer) {
            self.terminate(ctx, &info, &context);
        }
        true
    }

    fn terminate(&self, ctx: &EngineContext, viewer: &ViewerInfo, context: &AnimationContext) {
        self.send_stage(ctx, viewer, &context.overlay, &context.position, CLEAR_STAGE);
        ctx.send(&viewer.id, ClientboundPacket::clear_mining_fatigue(viewer.entity_id));
    }

    /// Completes a break: raises the break event, then restores or drops
    /// according to the decision. The context always ends here.
    pub fn finish(&self, ctx: &EngineContext, viewer: &ViewerInfo, overlay: &OverlayHandle, pos: &Position) {
        let context = self.active.lock().remove(&viewer.id);
        let start_vetoed = self.cancelled.lock().remove(&viewer.id);
        let tool = viewer.held_item(Hand::Main).cloned();

        let decision = match overlay.as_ref() {
            Overlay::Structure(structure) => {
                let relative = structure
                    .relative_of(pos)
                    .unwrap_or(BlockPos::new(0, 0, 0));
                ctx.events.structure_break(&StructureBroken {
                    viewer: viewer.clone(),
                    overlay: overlay.clone(),
                    position: pos.clone(),
                    relative,
                    tool: tool.clone(),
                })
            }
            _ => ctx.events.block_break(&BlockBroken {
                viewer: viewer.clone(),
                overlay: overlay.clone(),
                position: pos.clone(),
                tool: tool.clone(),
            }),
        };

        match decision {
            BreakDecision::Cancel { restore } => {
                if restore {
                    overlay.send_position(ctx, &viewer.id, pos);
                }
            }
            BreakDecision::Proceed { restore, .. } if start_vetoed => {
                if restore {
                    overlay.send_position(ctx, &viewer.id, pos);
                }
            }
            BreakDecision::Proceed { drop_items, .. } => {
                if drop_items {
                    self.drop_items(ctx, viewer, overlay, pos, tool.as_ref());
                }
            }
        }

        if let Some(context) = context {
            self.terminate(ctx, viewer, &context);
        }
        debug!("Break at {} finished for {}", pos, viewer.id);
    }

    fn drop_items(
        &self,
        ctx: &EngineContext,
        viewer: &ViewerInfo,
        overlay: &OverlayHandle,
        pos: &Position,
        tool: Option<&crate::types::ItemStack>,
    ) {
        let Some(state) = overlay.resolve_state(&viewer.id, pos) else {
            return;
        };
        let at = match overlay.as_ref() {
            Overlay::Structure(_) => pos.centre(),
            _ => pos.corner(),
        };
        for item in ctx.world.drops(&state, tool) {
            ctx.world.drop_item(&pos.world, at, item);
        }
    }

    // -----------------------------------------------------------------------
    // Animation packets
    // -----------------------------------------------------------------------

    /// Sends `stage` for every animated position of the overlay, to the
    /// breaker or to every online viewer when the animation is global.
    /// Offline viewers met on the way are pruned.
    fn send_stage(
        &self,
        ctx: &EngineContext,
        breaker: &ViewerInfo,
        overlay: &OverlayHandle,
        pos: &Position,
        stage: i8,
    ) {
        let recipients = if overlay.settings().global_break_animation {
            let mut online = Vec::new();
            for id in overlay.viewer_ids() {
                if ctx.is_online(&id) {
                    online.push(id);
                } else if overlay.prune_viewer(&id) {
                    debug!("Pruned offline viewer {} from overlay {}", id, overlay.id());
                }
            }
            online
        } else {
            vec![breaker.id]
        };

        let positions = overlay.animation_positions(pos);
        for recipient in &recipients {
            for target in &positions {
                ctx.send(
                    recipient,
                    ClientboundPacket::BreakAnimation {
                        entity_id: breaker.entity_id,
                        position: target.block_pos(),
                        stage,
                    },
                );
            }
        }
    }
}
