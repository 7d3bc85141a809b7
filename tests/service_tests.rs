//! OverlayService integration tests

#[cfg(test)]
mod tests {
    use overlay_blocks::{
        breaking::InboundOutcome,
        events::{EventBus, InteractAction, Interaction, StructureInteraction},
        geometry::{BoundingBox, BoundingGeometry, JsonBoundingBoxes},
        host::EngineContext,
        listener::PlacementOutcome,
        overlay::group::GroupStates,
        protocol::{ClientboundPacket, DigAction, ServerboundPacket},
        service::{OverlayService, TickEvents},
        terrain::{FlatTerrain, Outbox, Roster},
        types::{
            BlockFace, BlockPos, BlockState, Hand, ItemStack, OverlayServiceConfig, Position, Vec3,
            ViewerId, ViewerInfo,
        },
    };
    use parking_lot::Mutex;
    use std::sync::Arc;

    const WORLD: &str = "world";

    // -----------------------------------------------------------------------
    // Harness
    // -----------------------------------------------------------------------

    #[derive(Default)]
    struct Interactions {
        hits: Mutex<Vec<(Position, BlockFace)>>,
        structure_hits: Mutex<Vec<BlockPos>>,
    }

    impl EventBus for Interactions {
        fn interact(&self, event: &Interaction) {
            self.hits.lock().push((event.position.clone(), event.face));
        }

        fn structure_interact(&self, event: &StructureInteraction) {
            self.structure_hits.lock().push(event.relative);
        }
    }

    struct Harness {
        terrain: Arc<FlatTerrain>,
        roster: Arc<Roster>,
        outbox: Arc<Outbox>,
        events: Arc<Interactions>,
        svc: OverlayService,
    }

    fn make_service() -> Harness {
        make_service_with(BoundingGeometry::empty())
    }

    fn make_service_with(geometry: BoundingGeometry) -> Harness {
        let terrain = Arc::new(FlatTerrain::new().with_world(WORLD, -64, 63));
        let roster = Arc::new(Roster::new());
        let outbox = Arc::new(Outbox::new());
        let events = Arc::new(Interactions::default());
        let ctx = EngineContext::new(
            terrain.clone(),
            roster.clone(),
            outbox.clone(),
            events.clone(),
            Arc::new(geometry),
        );
        Harness {
            terrain,
            roster,
            outbox,
            events,
            svc: OverlayService::new(OverlayServiceConfig::default(), ctx),
        }
    }

    fn stone_geometry() -> BoundingGeometry {
        let mut dataset = JsonBoundingBoxes::default();
        dataset.insert(
            "minecraft:stone",
            vec![BoundingBox::new(Vec3::zero(), Vec3::new(1.0, 1.0, 1.0))],
        );
        BoundingGeometry::new(Arc::new(dataset), 16)
    }

    impl Harness {
        fn join(&self, entity_id: i32, setup: impl FnOnce(&mut ViewerInfo)) -> ViewerInfo {
            let mut info = ViewerInfo::new(ViewerId::random(), entity_id, WORLD);
            setup(&mut info);
            self.roster.join(info.clone());
            info
        }

        fn cell(&self, x: i32, y: i32, z: i32, state: &str) -> overlay_blocks::OverlayHandle {
            self.svc
                .registry()
                .create_cell(Position::new(WORLD, x, y, z), BlockState::new(state))
                .unwrap()
        }

        fn stages(&self, viewer: &ViewerId) -> Vec<i8> {
            self.outbox
                .sent_to(viewer)
                .into_iter()
                .filter_map(|p| match p {
                    ClientboundPacket::BreakAnimation { stage, .. } => Some(stage),
                    _ => None,
                })
                .collect()
        }
    }

    fn place(position: BlockPos) -> ServerboundPacket {
        ServerboundPacket::PlaceBlock {
            position,
            face: BlockFace::Up,
            hand: Hand::Main,
        }
    }

    fn holding_stone(info: &mut ViewerInfo) {
        info.main_hand = Some(ItemStack::new("minecraft:stone", 1));
    }

    // -----------------------------------------------------------------------
    // Stats & tick
    // -----------------------------------------------------------------------

    #[test]
    fn stats_count_overlays_and_ticks() {
        let mut h = make_service();
        h.cell(0, 70, 0, "minecraft:glass");
        let mut states = GroupStates::new();
        states.insert(Position::new(WORLD, 40, 70, 0), BlockState::new("minecraft:glass"));
        h.svc.registry().create_group("wall", states).unwrap();
        h.svc
            .registry()
            .create_structure(Position::new(WORLD, 100, 64, 100))
            .unwrap();

        h.svc.tick();
        h.svc.tick();

        let stats = h.svc.stats();
        assert_eq!(stats.cells, 1);
        assert_eq!(stats.groups, 1);
        assert_eq!(stats.structures, 1);
        assert_eq!(stats.indexed_chunks, 2);
        assert_eq!(stats.active_breaks, 0);
        assert_eq!(stats.total_ticks, 2);
    }

    #[test]
    fn empty_tick_reports_only_the_counter() {
        let mut h = make_service();
        assert_eq!(
            h.svc.tick(),
            TickEvents {
                tick: 1,
                ..Default::default()
            }
        );
    }

    #[test]
    fn tick_applies_deferred_then_inbound() {
        let mut h = make_service();
        let v = h.join(1, |_| {});
        h.cell(0, 70, 0, "minecraft:glass").add_viewer(v.id);

        assert_eq!(h.svc.registry().remove_if(|_| true), 1);
        assert_eq!(h.svc.stats().pending_deferred, 1);
        assert!(h.outbox.sent_to(&v.id).is_empty());

        h.svc.submit_inbound(
            v.id,
            ServerboundPacket::Digging {
                position: BlockPos::new(5, 63, 5),
                face: BlockFace::Up,
                action: DigAction::Start,
            },
        );
        assert_eq!(h.svc.pending_inbound(), 1);

        let events = h.svc.tick();
        assert_eq!(events.deferred_applied, 1);
        assert_eq!(events.inbound_processed, 1);
        assert_eq!(events.forwarded, 1);
        assert_eq!(h.svc.pending_inbound(), 0);

        assert_eq!(
            h.outbox.sent_to(&v.id),
            vec![ClientboundPacket::block_change(
                BlockPos::new(0, 70, 0),
                BlockState::air()
            )]
        );
        assert_eq!(h.outbox.forwarded().len(), 1);
    }

    #[test]
    fn inbound_from_offline_viewer_is_dropped() {
        let mut h = make_service();
        h.svc.submit_inbound(ViewerId::random(), place(BlockPos::new(0, 63, 0)));
        let events = h.svc.tick();
        assert_eq!(events.inbound_processed, 1);
        assert_eq!(events.forwarded, 0);
        assert!(h.outbox.forwarded().is_empty());
    }

    #[test]
    fn missing_geometry_file_is_an_error() {
        let config = OverlayServiceConfig {
            bounding_boxes_path: Some(std::env::temp_dir().join("no-such-boxes.json")),
            ..Default::default()
        };
        assert!(OverlayService::load_geometry(&config).is_err());
        assert!(OverlayService::load_geometry(&OverlayServiceConfig::default()).is_ok());
    }

    // -----------------------------------------------------------------------
    // Join / quit
    // -----------------------------------------------------------------------

    #[test]
    fn join_sends_auto_overlays_in_one_batch() {
        let h = make_service();

        let mut states = GroupStates::new();
        for x in 0..3 {
            states.insert(Position::new(WORLD, x, 70, 0), BlockState::new("minecraft:glass"));
        }
        let group = h.svc.registry().create_group("ring", states).unwrap();
        group.update_settings(|s| s.auto_add_on_join = true);

        let cell = h.cell(3, 70, 0, "minecraft:dirt");
        cell.update_settings(|s| s.auto_add_on_join = true);

        let manual = h.cell(5, 70, 0, "minecraft:dirt");

        let gated = h.cell(7, 70, 0, "minecraft:dirt");
        gated.update_settings(|s| s.auto_add_on_join = true);
        gated.add_condition(|viewer| viewer.sneaking);

        let v = h.join(1, |_| {});
        assert_eq!(h.svc.viewer_joined(&v), 2);
        assert!(group.is_viewer(&v.id));
        assert!(cell.is_viewer(&v.id));
        assert!(!manual.is_viewer(&v.id));
        assert!(!gated.is_viewer(&v.id));

        let sent = h.outbox.sent_to(&v.id);
        assert_eq!(sent.len(), 1);
        let ClientboundPacket::MultiBlockChange { entries, .. } = &sent[0] else {
            panic!("expected a multi-block change");
        };
        assert_eq!(entries.len(), 4);
    }

    #[test]
    fn quit_forgets_join_bound_overlays_only() {
        let h = make_service();
        let auto = h.cell(0, 70, 0, "minecraft:glass");
        auto.update_settings(|s| s.auto_add_on_join = true);
        let manual = h.cell(1, 70, 0, "minecraft:glass");

        let v = h.join(1, |_| {});
        h.svc.viewer_joined(&v);
        manual.add_viewer(v.id);
        h.outbox.clear();

        h.svc.viewer_left(&v.id);
        assert!(!auto.is_viewer(&v.id));
        assert!(manual.is_viewer(&v.id));
        assert!(h.outbox.sent_to(&v.id).is_empty());
    }

    // -----------------------------------------------------------------------
    // Interaction
    // -----------------------------------------------------------------------

    fn looking_north_to_south(info: &mut ViewerInfo) {
        info.eye = Vec3::new(0.5, 65.5, -2.5);
        info.look = Vec3::new(0.0, 0.0, 1.0);
    }

    #[test]
    fn interact_hits_visible_cell() {
        let h = make_service();
        let v = h.join(1, looking_north_to_south);
        h.cell(0, 65, 0, "minecraft:glass").add_viewer(v.id);

        let hit = h
            .svc
            .listener()
            .on_interact(&v, InteractAction::RightClick, Hand::Main)
            .expect("look ray should hit the cell");
        assert_eq!(hit.position, Position::new(WORLD, 0, 65, 0));
        assert_eq!(hit.hit.face, BlockFace::North);
        assert!((hit.hit.distance - 2.5).abs() < 1e-9);

        assert_eq!(
            *h.events.hits.lock(),
            vec![(Position::new(WORLD, 0, 65, 0), BlockFace::North)]
        );
    }

    #[test]
    fn interact_reports_structure_relative_position() {
        let h = make_service();
        let v = h.join(1, looking_north_to_south);
        let handle = h
            .svc
            .registry()
            .create_structure(Position::new(WORLD, -1, 65, -1))
            .unwrap();
        handle
            .as_structure()
            .unwrap()
            .set_block(BlockPos::new(1, 0, 1), BlockState::new("minecraft:glass"))
            .unwrap();
        handle.add_viewer(v.id);

        assert!(h
            .svc
            .listener()
            .on_interact(&v, InteractAction::LeftClick, Hand::Main)
            .is_some());
        assert_eq!(*h.events.structure_hits.lock(), vec![BlockPos::new(1, 0, 1)]);
        assert!(h.events.hits.lock().is_empty());
    }

    #[test]
    fn solid_true_block_stops_the_look_ray() {
        let h = make_service();
        let v = h.join(1, looking_north_to_south);
        h.cell(0, 65, 0, "minecraft:glass").add_viewer(v.id);
        h.terrain
            .set_block(Position::new(WORLD, 0, 65, -1), BlockState::new("minecraft:stone"));

        assert!(h
            .svc
            .listener()
            .on_interact(&v, InteractAction::RightClick, Hand::Main)
            .is_none());
        assert!(h.events.hits.lock().is_empty());
    }

    #[test]
    fn interact_ignores_overlays_the_viewer_cannot_see() {
        let h = make_service();
        let v = h.join(1, looking_north_to_south);
        h.cell(0, 65, 0, "minecraft:glass");

        assert!(h
            .svc
            .listener()
            .on_interact(&v, InteractAction::RightClick, Hand::Main)
            .is_none());
    }

    #[test]
    fn true_break_is_vetoed_for_viewers() {
        let h = make_service();
        let seer = h.join(1, |_| {});
        let other = h.join(2, |_| {});
        h.cell(0, 63, 0, "minecraft:glass").add_viewer(seer.id);

        let pos = Position::new(WORLD, 0, 63, 0);
        assert!(h.svc.listener().on_block_break(&seer.id, &pos));
        assert!(!h.svc.listener().on_block_break(&other.id, &pos));
    }

    // -----------------------------------------------------------------------
    // Placement
    // -----------------------------------------------------------------------

    #[test]
    fn placement_against_overlay_face_is_redirected() {
        let h = make_service();
        let v = h.join(1, |info| {
            holding_stone(info);
            info.eye = Vec3::new(0.5, 66.62, -3.5);
        });
        h.cell(0, 64, 0, "minecraft:glass").add_viewer(v.id);

        assert_eq!(
            h.svc.listener().on_place(&v, BlockPos::new(0, 64, 0), BlockFace::Up),
            PlacementOutcome::Redirect(BlockPos::new(0, 65, 0))
        );
        assert_eq!(
            h.svc.handle_inbound(&v.id, place(BlockPos::new(0, 64, 0))),
            InboundOutcome::Forward
        );
        assert_eq!(
            h.outbox.forwarded(),
            vec![(v.id, place(BlockPos::new(0, 65, 0)))]
        );
    }

    #[test]
    fn placement_into_occupied_overlay_is_cancelled() {
        let h = make_service();
        let v = h.join(1, |info| {
            holding_stone(info);
            info.eye = Vec3::new(0.5, 66.62, -3.5);
        });
        h.cell(0, 64, 0, "minecraft:glass").add_viewer(v.id);
        h.cell(0, 65, 0, "minecraft:glass").add_viewer(v.id);

        assert_eq!(
            h.svc.handle_inbound(&v.id, place(BlockPos::new(0, 64, 0))),
            InboundOutcome::Consumed
        );
        assert!(h.outbox.forwarded().is_empty());
    }

    #[test]
    fn placement_without_block_item_passes() {
        let h = make_service();
        let v = h.join(1, |_| {});
        h.cell(0, 64, 0, "minecraft:glass").add_viewer(v.id);

        assert_eq!(
            h.svc.handle_inbound(&v.id, place(BlockPos::new(0, 64, 0))),
            InboundOutcome::Forward
        );
        assert_eq!(
            h.outbox.forwarded(),
            vec![(v.id, place(BlockPos::new(0, 64, 0)))]
        );
    }

    #[test]
    fn placement_overlapping_the_body_passes() {
        let h = make_service_with(stone_geometry());
        let v = h.join(1, |info| {
            holding_stone(info);
            info.eye = Vec3::new(0.5, 65.62, 0.5);
        });
        h.cell(0, 64, 0, "minecraft:glass").add_viewer(v.id);

        assert_eq!(
            h.svc.listener().on_place(&v, BlockPos::new(0, 64, 0), BlockFace::Up),
            PlacementOutcome::Pass
        );
    }

    #[test]
    fn placement_against_interactable_true_block_passes() {
        let h = make_service();
        let v = h.join(1, |info| {
            holding_stone(info);
            info.eye = Vec3::new(0.5, 66.62, -3.5);
        });
        h.terrain
            .set_block(Position::new(WORLD, 0, 64, 0), BlockState::new("minecraft:chest"));
        h.cell(0, 64, 0, "minecraft:glass").add_viewer(v.id);

        assert_eq!(
            h.svc.listener().on_place(&v, BlockPos::new(0, 64, 0), BlockFace::Up),
            PlacementOutcome::Pass
        );
    }

    // -----------------------------------------------------------------------
    // End to end
    // -----------------------------------------------------------------------

    #[test]
    fn structure_break_is_private_and_survives_disconnect() {
        let mut h = make_service();
        let a = h.join(10, |_| {});
        let b = h.join(11, |_| {});

        let handle = h
            .svc
            .registry()
            .create_structure(Position::new(WORLD, 0, 64, 0))
            .unwrap();
        let structure = handle.as_structure().unwrap();
        structure
            .set_block(BlockPos::new(1, 0, 1), BlockState::new("minecraft:stone"))
            .unwrap();
        handle.add_viewer(a.id);
        handle.add_viewer(b.id);
        structure.set_viewer_state(h.svc.context(), &b.id, Some(BlockState::air()));
        handle.update_settings(|s| s.break_speed = 20);

        let probe = ClientboundPacket::block_change(BlockPos::new(1, 64, 1), BlockState::air());
        let mut for_a = probe.clone();
        let mut for_b = probe.clone();
        h.svc.rewrite_outbound(&a, &mut for_a);
        h.svc.rewrite_outbound(&b, &mut for_b);
        assert_eq!(
            for_a,
            ClientboundPacket::block_change(BlockPos::new(1, 64, 1), BlockState::new("minecraft:stone"))
        );
        assert_eq!(for_b, probe);
        h.outbox.clear();

        h.svc.submit_inbound(
            a.id,
            ServerboundPacket::Digging {
                position: BlockPos::new(1, 64, 1),
                face: BlockFace::Up,
                action: DigAction::Start,
            },
        );
        for _ in 0..10 {
            let events = h.svc.tick();
            assert_eq!(events.finished_breaks, 0);
        }

        let stages = h.stages(&a.id);
        assert_eq!(stages.first(), Some(&0));
        assert_eq!(stages.last(), Some(&4));
        assert!(h.stages(&b.id).is_empty());
        assert_eq!(h.svc.stats().active_breaks, 1);

        h.roster.leave(&a.id);
        let events = h.svc.tick();
        assert_eq!(events.finished_breaks, 0);
        assert_eq!(h.svc.stats().active_breaks, 0);
        assert!(!h.svc.breaks().is_mining(&a.id));
    }
}
