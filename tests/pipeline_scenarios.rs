use async_trait::async_trait;
use fleetmap::background::job::ClusterJob;
use fleetmap::prelude::*;
use fleetmap::traits::RecordingSink;
use std::time::SystemTime;

/// End-to-end scenarios: inbound events in, presented frames out
#[cfg(test)]
mod pipeline_scenarios {
    use super::*;

    /// Worker that accepts jobs and never answers
    struct NeverRespondingWorker;

    #[async_trait]
    impl ClusterWorker for NeverRespondingWorker {
        async fn compute(&self, _job: ClusterJob) -> Result<ClusterPlan> {
            futures::future::pending().await
        }

        fn name(&self) -> &str {
            "never-responding"
        }
    }

    fn inline_pipeline() -> FramePipeline<RecordingSink> {
        FramePipeline::with_worker(PipelineConfig::default(), RecordingSink::default(), None)
            .unwrap()
    }

    fn downtown() -> Viewport {
        Viewport::new(
            LatLng::new(37.78, -122.42),
            13.0,
            LatLngBounds::from_coords(37.70, -122.55, 37.85, -122.30),
        )
    }

    /// Vehicles laid out on a ~1 km lattice, far enough apart at zoom 13 to
    /// stay standalone
    fn fleet(count: u64) -> Vec<EntityPosition> {
        (0..count)
            .map(|i| {
                EntityPosition::new(
                    i,
                    37.71 + (i % 15) as f64 * 0.009,
                    -122.54 + (i / 15) as f64 * 0.011,
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_burst_of_updates_coalesces_into_one_pass() {
        let mut pipeline = inline_pipeline();
        pipeline.set_viewport(downtown());
        pipeline.on_frame(Instant::now()).await;
        let frames_before = pipeline.sink().frames.len();

        let start = SystemTime::now();
        for step in 0..50u64 {
            pipeline.ingest(
                EntityPosition::new(42, 37.75 + step as f64 * 0.0005, -122.42)
                    .with_timestamp(start + Duration::from_millis(step * 20)),
            );
        }

        let frame = pipeline.on_frame(Instant::now()).await.unwrap();
        assert_eq!(pipeline.sink().frames.len(), frames_before + 1);
        assert_eq!(frame.marker_ids(), vec![42]);
        let newest = frame.markers[0].config().position.lat;
        assert!((newest - (37.75 + 49.0 * 0.0005)).abs() < 1e-9);

        // Nothing left for the following boundary
        assert!(pipeline.on_frame(Instant::now()).await.is_none());
        assert_eq!(pipeline.diagnostics().scheduler.coalesced, 49);
    }

    #[tokio::test]
    async fn test_burst_across_fifty_vehicles_lands_in_one_pass() {
        let mut pipeline = inline_pipeline();
        pipeline.set_viewport(downtown());
        pipeline.on_frame(Instant::now()).await;
        let frames_before = pipeline.sink().frames.len();

        let start = SystemTime::now();
        let moved: Vec<_> = fleet(50)
            .into_iter()
            .map(|p| {
                EntityPosition::new(p.entity_id, p.latitude + 0.001, p.longitude)
                    .with_timestamp(start + Duration::from_millis(p.entity_id))
            })
            .collect();
        for position in &moved {
            pipeline.ingest(position.clone());
        }

        let frame = pipeline.on_frame(Instant::now()).await.unwrap();
        assert_eq!(pipeline.sink().frames.len(), frames_before + 1);
        assert_eq!(frame.marker_ids(), (0..50).collect::<Vec<_>>());
        for marker in &frame.markers {
            let config = marker.config();
            let expected = &moved[config.entity_id as usize];
            assert_eq!(config.position.lat, expected.latitude);
            assert_eq!(config.position.lng, expected.longitude);
        }

        assert!(pipeline.on_frame(Instant::now()).await.is_none());
        assert_eq!(pipeline.diagnostics().scheduler.coalesced, 49);
    }

    #[tokio::test]
    async fn test_unresponsive_worker_falls_back_inline_within_deadline() {
        let config = PipelineConfig::default();
        let deadline = config.worker.timeout();
        let mut pipeline = FramePipeline::<RecordingSink>::with_worker(
            config,
            RecordingSink::default(),
            Some(Arc::new(NeverRespondingWorker)),
        )
        .unwrap();
        pipeline.set_viewport(downtown());
        pipeline.ingest_batch(fleet(300));

        let started = std::time::Instant::now();
        let frame = pipeline.on_frame(Instant::now()).await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= deadline);
        assert!(elapsed < deadline + Duration::from_millis(250));
        assert_eq!(frame.stats.visible, 300);
        assert_eq!(frame.entity_count(), 300);

        let dispatch = pipeline.diagnostics().dispatch;
        assert_eq!(dispatch.offloaded, 1);
        assert_eq!(dispatch.timeouts, 1);
    }

    #[tokio::test]
    async fn test_thread_worker_produces_same_frame_as_inline() {
        let mut threaded = FramePipeline::<RecordingSink>::new(
            PipelineConfig::default(),
            RecordingSink::default(),
        )
        .unwrap();
        let mut inline = inline_pipeline();

        for pipeline in [&mut threaded, &mut inline] {
            pipeline.set_viewport(downtown());
            pipeline.ingest_batch(fleet(260));
        }
        let a = threaded.on_frame(Instant::now()).await.unwrap();
        let b = inline.on_frame(Instant::now()).await.unwrap();

        assert_eq!(a.marker_ids(), b.marker_ids());
        assert_eq!(a.clusters, b.clusters);
        assert_eq!(threaded.diagnostics().dispatch.offloaded, 1);
    }

    #[tokio::test]
    async fn test_cold_start_from_persisted_snapshot() {
        let mut store = MemorySnapshotStore::new();
        {
            let mut previous = inline_pipeline();
            previous.ingest_batch(fleet(30));
            let snapshot = previous.hub().snapshot(TierSizes::from([30, 0, 0]));
            store.save(&snapshot.encode().unwrap()).unwrap();
        }

        let mut pipeline = inline_pipeline();
        assert_eq!(pipeline.warm_start(&store).unwrap(), 30);
        assert_eq!(pipeline.hub().entity_count(), 30);

        // No viewport yet: the restored state waits for one
        assert!(pipeline.on_frame(Instant::now()).await.is_none());
        pipeline.set_viewport(downtown());
        let frame = pipeline.on_frame(Instant::now()).await.unwrap();
        assert_eq!(frame.entity_count(), 30);
    }

    #[tokio::test]
    async fn test_warm_start_without_snapshot_is_a_no_op() {
        let mut pipeline = inline_pipeline();
        assert_eq!(pipeline.warm_start(&MemorySnapshotStore::new()).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pause_persists_and_resume_forces_rebuild() {
        let mut pipeline =
            inline_pipeline().with_snapshot_store(Box::new(MemorySnapshotStore::new()));
        pipeline.set_viewport(downtown());
        pipeline.ingest_batch(fleet(5));
        pipeline.on_frame(Instant::now()).await.unwrap();

        pipeline.pause().unwrap();
        pipeline.ingest(EntityPosition::new(99, 37.8, -122.4));
        assert!(pipeline.on_frame(Instant::now()).await.is_none());

        pipeline.resume().unwrap();
        let frame = pipeline.on_frame(Instant::now()).await.unwrap();
        assert_eq!(frame.entity_count(), 6);
        assert!(pipeline.diagnostics().scheduler.refused >= 1);
    }

    #[tokio::test]
    async fn test_file_store_round_trip_through_pause() {
        let path = std::env::temp_dir().join(format!(
            "fleetmap-pause-{}-{}.bin",
            std::process::id(),
            line!()
        ));
        let mut pipeline = inline_pipeline()
            .with_snapshot_store(Box::new(FileSnapshotStore::new(&path)));
        pipeline.ingest_batch(fleet(12));
        pipeline.pause().unwrap();

        let bytes = FileSnapshotStore::new(&path).load().unwrap().unwrap();
        let snapshot = HubSnapshot::decode(&bytes).unwrap();
        assert_eq!(snapshot.positions.len(), 12);
        assert_eq!(snapshot.positions, pipeline.hub().all_latest_positions());
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_sustained_low_fps_steps_down_one_tier_at_a_time() {
        let mut pipeline = inline_pipeline();
        pipeline.set_viewport(downtown());
        pipeline.ingest_batch(fleet(10));
        pipeline.on_frame(Instant::now()).await;

        let base = Instant::now();
        let at = |ms: u64| base + Duration::from_millis(ms);

        assert_eq!(pipeline.record_fps_at(30.0, at(0)), RenderMode::High);
        assert_eq!(pipeline.record_fps_at(30.0, at(100)), RenderMode::High);
        assert_eq!(pipeline.record_fps_at(30.0, at(200)), RenderMode::Medium);

        // Held by the dwell time
        for ms in (300..2200).step_by(100) {
            assert_eq!(pipeline.record_fps_at(30.0, at(ms)), RenderMode::Medium);
        }
        pipeline.record_fps_at(30.0, at(2300));
        pipeline.record_fps_at(30.0, at(2400));
        assert_eq!(pipeline.record_fps_at(30.0, at(2500)), RenderMode::Low);

        let frame = pipeline.on_frame(Instant::now()).await.unwrap();
        assert_eq!(frame.mode, RenderMode::Low);
        assert!(frame.markers.iter().all(|m| m.tier() == RenderMode::Low));

        let pools = pipeline.pools();
        assert_eq!(pools.active_tier(), RenderMode::Low);
        let low = &pipeline.config().modes.low;
        assert_eq!(pools.bitmaps.limits(), (low.bitmap_entries, low.bitmap_bytes));

        // Recovery is also a single step
        pipeline.record_fps_at(60.0, at(5000));
        pipeline.record_fps_at(60.0, at(5100));
        assert_eq!(pipeline.record_fps_at(60.0, at(5200)), RenderMode::Medium);
        assert_eq!(pipeline.diagnostics().mode_transitions, 3);
    }

    #[tokio::test]
    async fn test_hub_subscribers_only_see_their_entity() {
        let mut pipeline = inline_pipeline();
        let mut watched = pipeline.hub().position_stream(1).unwrap();

        pipeline.ingest(EntityPosition::new(2, 10.0, 10.0));
        assert!(watched.try_next().is_none());

        pipeline.ingest(EntityPosition::new(1, 11.0, 11.0));
        assert_eq!(watched.next().await.unwrap().latitude, 11.0);
    }

    #[tokio::test]
    async fn test_selected_vehicle_is_never_clustered() {
        let mut pipeline = inline_pipeline();
        pipeline.set_viewport(downtown());
        // Ten vehicles parked on top of each other
        pipeline.ingest_batch(
            (0..10).map(|i| EntityPosition::new(i, 37.7800 + i as f64 * 1e-6, -122.4200)),
        );
        pipeline.select(3);

        let frame = pipeline.on_frame(Instant::now()).await.unwrap();
        assert_eq!(frame.marker_ids(), vec![3]);
        assert_eq!(frame.clusters.len(), 1);
        assert_eq!(frame.clusters[0].member_count, 9);
        assert!(frame.markers[0].config().is_selected);
    }

    #[tokio::test]
    async fn test_invalid_reports_are_counted_not_rendered() {
        let mut pipeline = inline_pipeline();
        pipeline.set_viewport(downtown());
        pipeline.ingest(EntityPosition::new(1, 37.78, -122.42));
        pipeline.ingest(EntityPosition::new(2, f64::INFINITY, -122.42));
        pipeline.ingest(EntityPosition::new(3, 37.78, -122.42).invalid());
        pipeline.ingest(EntityPosition::new(4, 48.85, 2.35));

        let frame = pipeline.on_frame(Instant::now()).await.unwrap();
        assert_eq!(frame.marker_ids(), vec![1]);
        // Unusable coordinates never reach the hub; flagged reports do
        assert_eq!(frame.stats.invalid, 1);
        assert_eq!(frame.stats.off_screen, 1);
        assert_eq!(pipeline.diagnostics().pipeline.invalid, 1);
        assert!(pipeline.hub().latest_position(2).is_none());
    }

    #[tokio::test]
    async fn test_malformed_fix_keeps_last_good_position() {
        let mut pipeline = inline_pipeline();
        pipeline.set_viewport(downtown());
        let start = SystemTime::now();
        pipeline.ingest(EntityPosition::new(1, 37.78, -122.42).with_timestamp(start));
        pipeline.on_frame(Instant::now()).await.unwrap();

        pipeline.ingest(
            EntityPosition::new(1, f64::NAN, -122.42)
                .with_timestamp(start + Duration::from_secs(1)),
        );
        pipeline.request_rebuild();
        let frame = pipeline.on_frame(Instant::now()).await.unwrap();

        assert_eq!(frame.marker_ids(), vec![1]);
        assert_eq!(pipeline.hub().latest_position(1).unwrap().latitude, 37.78);
        assert_eq!(pipeline.diagnostics().pipeline.invalid, 1);
    }
}
