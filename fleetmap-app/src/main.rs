use anyhow::Context;
use fleetmap::prelude::*;
use std::path::PathBuf;
use std::time::SystemTime;

/// Headless replay: simulates a fleet, feeds it through the pipeline on a
/// fixed frame clock and logs what the adaptive controller does with it.
///
/// Usage: `fleetmap-app [vehicles] [seconds] [snapshot-path]`
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = ReplayOptions::from_args()?;
    log::info!(
        "replaying {} vehicles for {}s (snapshot at {})",
        options.vehicles,
        options.seconds,
        options.snapshot.display()
    );

    let mut pipeline = FramePipeline::<FrameCounter>::from_preset(
        PipelinePreset::Balanced,
        FrameCounter::default(),
    )
    .context("building pipeline")?
    .with_snapshot_store(Box::new(FileSnapshotStore::new(&options.snapshot)));

    let restored = pipeline
        .warm_start(&FileSnapshotStore::new(&options.snapshot))
        .context("restoring snapshot")?;
    if restored > 0 {
        log::info!("warm start restored {} vehicles", restored);
    }

    let center = LatLng::new(37.7749, -122.4194);
    let mut zoom = 12.0;
    pipeline.set_viewport(Viewport::around(center, zoom, 1200.0, 800.0));

    let mut fleet = Fleet::new(options.vehicles, center);
    let mut ticker = FrameTicker::new(pipeline.config().scheduler.frame_interval());
    let frames_per_second = (1000 / ticker.period().as_millis().max(1)) as u64;
    let total_frames = options.seconds * frames_per_second;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    for frame in 0..total_frames {
        let now = tokio::select! {
            now = ticker.tick() => now,
            _ = &mut shutdown => {
                log::info!("interrupted");
                break;
            }
        };

        let started = Instant::now();
        pipeline.ingest_batch(fleet.step(frame, ticker.period().as_secs_f64()));

        // Zoom in and out every five seconds to exercise re-clustering
        if frame > 0 && frame % (5 * frames_per_second) == 0 {
            zoom = if zoom < 13.0 { 14.0 } else { 11.0 };
            pipeline.set_viewport(Viewport::around(center, zoom, 1200.0, 800.0));
        }

        pipeline.on_frame(now).await;

        // Stand-in for the renderer: every drawn marker costs a little frame time
        let drawn = pipeline.sink().last_markers + pipeline.sink().last_clusters;
        let frame_ms = started.elapsed().as_secs_f32() * 1000.0 + 6.0 + drawn as f32 * 0.05;
        pipeline.record_fps((1000.0 / frame_ms).min(60.0));

        if frame % frames_per_second == 0 {
            let diagnostics = pipeline.diagnostics();
            log::info!(
                "t={}s mode={} markers={} clusters={} p95={:.1}ms reuse={:.2}",
                frame / frames_per_second,
                diagnostics.mode,
                pipeline.sink().last_markers,
                pipeline.sink().last_clusters,
                diagnostics.frame_timing.p95_ms,
                diagnostics.pools.marker_reuse_rate
            );
        }
    }

    pipeline.pause().context("writing snapshot")?;
    println!("{}", pipeline.diagnostics().to_json()?);
    pipeline.dispose();
    Ok(())
}

struct ReplayOptions {
    vehicles: u64,
    seconds: u64,
    snapshot: PathBuf,
}

impl ReplayOptions {
    fn from_args() -> anyhow::Result<Self> {
        let mut args = std::env::args().skip(1);
        let vehicles = match args.next() {
            Some(raw) => raw.parse().context("vehicles must be a number")?,
            None => 1000,
        };
        let seconds = match args.next() {
            Some(raw) => raw.parse().context("seconds must be a number")?,
            None => 30,
        };
        let snapshot = args
            .next()
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("fleetmap-replay.snapshot"));
        Ok(Self {
            vehicles,
            seconds,
            snapshot,
        })
    }
}

/// Sink that only remembers the size of the last frame
#[derive(Default)]
struct FrameCounter {
    frames: u64,
    last_markers: usize,
    last_clusters: usize,
}

impl RenderSink for FrameCounter {
    fn present(&mut self, frame: &RenderFrame) {
        self.frames += 1;
        self.last_markers = frame.markers.len();
        self.last_clusters = frame.clusters.len();
        log::trace!("frame {} presented (pass {})", self.frames, frame.pass);
    }
}

struct Vehicle {
    id: EntityId,
    lat: f64,
    lng: f64,
    heading: f64,
    speed_mps: f64,
}

/// Deterministic fleet: vehicles drive straight and bounce off a box
/// around the depot.
struct Fleet {
    vehicles: Vec<Vehicle>,
    bounds: LatLngBounds,
}

impl Fleet {
    fn new(count: u64, depot: LatLng) -> Self {
        let vehicles = (0..count)
            .map(|id| {
                let spread = (id % 97) as f64 / 97.0 - 0.5;
                let ring = (id % 13) as f64 / 13.0 - 0.5;
                Vehicle {
                    id,
                    lat: depot.lat + spread * 0.12,
                    lng: depot.lng + ring * 0.16,
                    heading: ((id * 37) % 360) as f64,
                    speed_mps: 5.0 + (id % 20) as f64,
                }
            })
            .collect();
        Self {
            vehicles,
            bounds: LatLngBounds::from_coords(
                depot.lat - 0.1,
                depot.lng - 0.12,
                depot.lat + 0.1,
                depot.lng + 0.12,
            ),
        }
    }

    /// Advance every vehicle; a quarter of them report each frame
    fn step(&mut self, frame: u64, dt: f64) -> Vec<EntityPosition> {
        let now = SystemTime::now();
        let mut reports = Vec::new();
        for vehicle in &mut self.vehicles {
            let meters = vehicle.speed_mps * dt;
            let rad = vehicle.heading.to_radians();
            vehicle.lat += meters * rad.cos() / 111_320.0;
            vehicle.lng += meters * rad.sin() / (111_320.0 * vehicle.lat.to_radians().cos());

            let position = LatLng::new(vehicle.lat, vehicle.lng);
            if !self.bounds.contains(&position) {
                vehicle.heading = (vehicle.heading + 180.0) % 360.0;
            }

            if (frame + vehicle.id) % 4 == 0 {
                reports.push(
                    EntityPosition::new(vehicle.id, vehicle.lat, vehicle.lng)
                        .with_heading(vehicle.heading as f32)
                        .with_speed(vehicle.speed_mps as f32)
                        .with_timestamp(now),
                );
            }
        }
        reports
    }
}
