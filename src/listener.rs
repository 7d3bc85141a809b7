//! Viewer lifecycle and world-interaction hooks.
//!
//! | Hook             | Effect                                                  |
//! |------------------|---------------------------------------------------------|
//! | `on_join`        | offer join-bound overlays, send the collected view once |
//! | `on_quit`        | forget the viewer on join-bound overlays and breaks     |
//! | `on_block_break` | veto true-world breaks of positions the viewer sees     |
//! | `on_interact`    | ray-trace the look direction, raise interact events     |
//! | `on_place`       | redirect or cancel placements against overlay faces     |

use crate::breaking::BreakTracker;
use crate::events::{InteractAction, Interaction, StructureInteraction};
use crate::geometry::{BoundingBox, RayHit};
use crate::overlay::{send_changes, Overlay, OverlayHandle};
use crate::registry::OverlayRegistry;
use crate::types::{BlockFace, BlockPos, BlockState, Hand, Position, Vec3, ViewerId, ViewerInfo};
use log::debug;
use std::sync::Arc;

/// Result of a placement against the world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementOutcome {
    /// Not ours; let the true world handle it.
    Pass,
    /// Drop the placement.
    Cancel,
    /// Place at this position instead.
    Redirect(BlockPos),
}

/// An overlay hit by a viewer's look ray.
pub struct InteractionHit {
    pub overlay: OverlayHandle,
    pub position: Position,
    pub hit: RayHit,
}

pub struct OverlayListener {
    registry: Arc<OverlayRegistry>,
    breaks: Arc<BreakTracker>,
}

impl OverlayListener {
    pub fn new(registry: Arc<OverlayRegistry>, breaks: Arc<BreakTracker>) -> Self {
        Self { registry, breaks }
    }

    // -----------------------------------------------------------------------
    // Join / quit
    // -----------------------------------------------------------------------

    /// Returns how many overlays admitted the viewer.
    pub fn on_join(&self, viewer: &ViewerInfo) -> usize {
        let ctx = self.registry.context();
        let mut changes = Vec::new();
        let mut admitted = 0;

        for overlay in self.registry.get_in_world(&viewer.world) {
            if !overlay.settings().auto_add_on_join {
                continue;
            }
            if overlay.attempt_add_viewer(ctx, viewer, false) {
                overlay.collect_view(&viewer.id, &viewer.world, &mut changes);
                admitted += 1;
            }
        }

        send_changes(ctx, &viewer.id, changes);
        debug!("Viewer {} joined, admitted by {} overlay(s)", viewer.id, admitted);
        admitted
    }

    pub fn on_quit(&self, viewer: &ViewerId) {
        for overlay in self.registry.get_by_viewer(viewer) {
            if overlay.settings().auto_add_on_join {
                overlay.prune_viewer(viewer);
            }
        }
        self.breaks.forget(viewer);
    }

    // -----------------------------------------------------------------------
    // True-world hooks
    // -----------------------------------------------------------------------

    /// `true` if the true-world break must be cancelled.
    pub fn on_block_break(&self, viewer: &ViewerId, pos: &Position) -> bool {
        self.registry
            .get_at(pos)
            .is_some_and(|overlay| overlay.is_viewer(viewer))
    }

    /// Walks the viewer's look ray and reports the first overlay it hits.
    /// Solid true-world blocks stop the walk.
    pub fn on_interact(&self, viewer: &ViewerInfo, action: InteractAction, hand: Hand) -> Option<InteractionHit> {
        let ctx = self.registry.context();
        let direction = viewer.look.normalized()?;
        let origin = viewer.eye;
        let range = viewer.interaction_range;

        let mut found = None;
        walk_voxels(origin, direction, range, |x, y, z| {
            let pos = Position::new(viewer.world.clone(), x, y, z);
            if let Some(overlay) = self.registry.get_at(&pos) {
                if overlay.is_viewer(&viewer.id) {
                    let Some(state) = overlay.resolve_state(&viewer.id, &pos) else {
                        return true;
                    };
                    if let Some(hit) = self.trace(&state, &pos, origin, direction, range) {
                        found = Some(InteractionHit {
                            overlay,
                            position: pos,
                            hit,
                        });
                        return false;
                    }
                    return true;
                }
            }
            let state = ctx.world.block_state(&pos);
            ctx.world.is_air(&state)
        });

        let found = found?;
        self.raise_interact(viewer, &found, action, hand);
        Some(found)
    }

    fn trace(&self, state: &BlockState, pos: &Position, origin: Vec3, direction: Vec3, range: f64) -> Option<RayHit> {
        let geometry = &self.registry.context().geometry;
        match geometry.get_boxes(state) {
            Some(_) => geometry.ray_trace(state, pos, origin, direction, range),
            None => BoundingBox::unit_at(pos).ray_trace(origin, direction, range),
        }
    }

    fn raise_interact(&self, viewer: &ViewerInfo, found: &InteractionHit, action: InteractAction, hand: Hand) {
        let events = &self.registry.context().events;
        match found.overlay.as_ref() {
            Overlay::Structure(structure) => {
                let Some(relative) = structure.relative_of(&found.position) else {
                    return;
                };
                events.structure_interact(&StructureInteraction {
                    viewer: viewer.clone(),
                    overlay: found.overlay.clone(),
                    position: found.position.clone(),
                    relative,
                    face: found.hit.face,
                    point: found.hit.point,
                    action,
                    hand,
                });
            }
            _ => events.interact(&Interaction {
                viewer: viewer.clone(),
                overlay: found.overlay.clone(),
                position: found.position.clone(),
                face: found.hit.face,
                point: found.hit.point,
                action,
                hand,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Placement
    // -----------------------------------------------------------------------

    /// Adjusts a placement the client made against `clicked`/`face`.
    pub fn on_place(&self, viewer: &ViewerInfo, clicked: BlockPos, face: BlockFace) -> PlacementOutcome {
        let ctx = self.registry.context();

        let held = [Hand::Main, Hand::Off].into_iter().find_map(|hand| {
            viewer
                .held_item(hand)
                .and_then(|item| ctx.world.block_for_item(item))
        });
        let Some(placing) = held else {
            return PlacementOutcome::Pass;
        };

        let original = clicked.at(&viewer.world);
        let true_clicked = ctx.world.block_state(&original);
        if ctx.world.is_interactable(&true_clicked) {
            return PlacementOutcome::Pass;
        }

        let mut target = original.clone();
        let mut shifted = false;
        let visible = self.visible_or_true(&viewer.id, &target);
        if !ctx.world.is_air(&visible) && ctx.world.is_face_sturdy(&true_clicked, face) {
            target = target.relative(face);
            shifted = true;
        }

        let body = viewer.body.shift(viewer.eye);
        let placed_boxes = ctx.geometry.get_boxes_at(&placing, &target);
        if placed_boxes.iter().any(|b| b.overlaps(&body)) {
            return PlacementOutcome::Pass;
        }

        let ours = self
            .registry
            .get_at(&target)
            .is_some_and(|overlay| overlay.is_viewer(&viewer.id));
        if !ours {
            return PlacementOutcome::Pass;
        }

        let destination = target.relative(face);
        let occupied = !ctx.world.is_air(&self.visible_or_true(&viewer.id, &destination));
        if shifted || occupied {
            return PlacementOutcome::Cancel;
        }
        PlacementOutcome::Redirect(destination.block_pos())
    }

    fn visible_or_true(&self, viewer: &ViewerId, pos: &Position) -> BlockState {
        self.registry
            .visible_state(Some(viewer), pos)
            .unwrap_or_else(|| self.registry.context().world.block_state(pos))
    }
}

// ---------------------------------------------------------------------------
// Voxel walk
// ---------------------------------------------------------------------------

/// Amanatides & Woo traversal of unit cells along a normalised ray, starting
/// with the cell containing `origin`. `visit` returns `false` to stop.
/// A non-finite `max_distance` visits nothing.
pub fn walk_voxels(origin: Vec3, direction: Vec3, max_distance: f64, mut visit: impl FnMut(i32, i32, i32) -> bool) {
    let mut x = origin.x.floor() as i32;
    let mut y = origin.y.floor() as i32;
    let mut z = origin.z.floor() as i32;

    if !max_distance.is_finite() || !visit(x, y, z) {
        return;
    }

    let step = |d: f64| -> i32 {
        if d > 0.0 {
            1
        } else if d < 0.0 {
            -1
        } else {
            0
        }
    };
    let (step_x, step_y, step_z) = (step(direction.x), step(direction.y), step(direction.z));

    let next_boundary = |p: f64, dir: i32| -> f64 {
        let f = p - p.floor();
        if dir > 0 {
            1.0 - f
        } else {
            f
        }
    };
    let first = |p: f64, d: f64, s: i32| -> f64 {
        if s == 0 {
            f64::INFINITY
        } else {
            next_boundary(p, s) / d.abs()
        }
    };
    let delta = |d: f64, s: i32| -> f64 {
        if s == 0 {
            f64::INFINITY
        } else {
            1.0 / d.abs()
        }
    };

    let mut t_max_x = first(origin.x, direction.x, step_x);
    let mut t_max_y = first(origin.y, direction.y, step_y);
    let mut t_max_z = first(origin.z, direction.z, step_z);
    let t_delta_x = delta(direction.x, step_x);
    let t_delta_y = delta(direction.y, step_y);
    let t_delta_z = delta(direction.z, step_z);

    loop {
        let t = if t_max_x <= t_max_y && t_max_x <= t_max_z {
            x += step_x;
            let t = t_max_x;
            t_max_x += t_delta_x;
            t
        } else if t_max_y <= t_max_z {
            y += step_y;
            let t = t_max_y;
            t_max_y += t_delta_y;
            t
        } else {
            z += step_z;
            let t = t_max_z;
            t_max_z += t_delta_z;
            t
        };

        if !t.is_finite() || t > max_distance {
            return;
        }
        if !visit(x, y, z) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_visits_cells_along_x() {
        let mut cells = Vec::new();
        walk_voxels(Vec3::new(0.5, 0.5, 0.5), Vec3::new(1.0, 0.0, 0.0), 3.2, |x, y, z| {
            cells.push((x, y, z));
            true
        });
        assert_eq!(cells, vec![(0, 0, 0), (1, 0, 0), (2, 0, 0), (3, 0, 0)]);
    }

    #[test]
    fn walk_handles_negative_coordinates() {
        let mut cells = Vec::new();
        walk_voxels(Vec3::new(-0.5, 2.5, 0.5), Vec3::new(0.0, -1.0, 0.0), 2.0, |x, y, z| {
            cells.push((x, y, z));
            true
        });
        assert_eq!(cells, vec![(-1, 2, 0), (-1, 1, 0), (-1, 0, 0)]);
    }

    #[test]
    fn walk_refuses_unbounded_range() {
        for range in [f64::INFINITY, f64::NAN] {
            let mut visited = 0;
            walk_voxels(Vec3::new(0.5, 0.5, 0.5), Vec3::new(0.0, 0.0, 1.0), range, |_, _, _| {
                visited += 1;
                true
            });
            assert_eq!(visited, 0);
        }
    }

    #[test]
    fn walk_stops_when_visitor_says_so() {
        let mut visited = 0;
        walk_voxels(Vec3::new(0.5, 0.5, 0.5), Vec3::new(0.0, 0.0, 1.0), 10.0, |_, _, z| {
            visited += 1;
            z < 2
        });
        assert_eq!(visited, 3);
    }
}
