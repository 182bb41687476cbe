use glam::{Mat4, Vec2, Vec3};
use pointstream::{
    evaluate_frame, AccuracyLevel, BatchSet, ChannelSet, FrameSettings, IngestOutcome, MemorySource, PointRecord,
    StreamConfig, StreamingIngest, TransferQueue, UploadSignal, UploadState, SIZE_OF_POINT,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::Cell;

/// Host-memory stand-in for device buffers; completes every transfer at once.
#[derive(Default)]
struct HostQueue {
    uploads: Cell<usize>,
}

impl TransferQueue for HostQueue {
    type Buffer = std::cell::RefCell<Vec<u32>>;

    fn create_channel_buffer(&self, _label: &str, byte_len: u64) -> Self::Buffer {
        std::cell::RefCell::new(vec![0; (byte_len / 4) as usize])
    }

    fn upload_channels(&self, dst: &ChannelSet<Self::Buffer>, src: ChannelSet<&[u32]>, signal: UploadSignal) {
        for (channel, &data) in src.iter() {
            dst.get(channel).borrow_mut()[..data.len()].copy_from_slice(data);
        }
        self.uploads.set(self.uploads.get() + 1);
        signal.complete();
    }
}

fn random_cloud(n: usize, seed: u64) -> Vec<PointRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut records: Vec<_> = (0..n)
        .map(|_| {
            PointRecord::new(
                rng.gen_range(0.0..100.0),
                rng.gen_range(0.0..100.0),
                rng.gen_range(0.0..100.0),
                rng.gen::<u32>() & 0x00FF_FFFF,
            )
        })
        .collect();
    // Pin the extent to the full cube.
    records[0].position = [0.0; 3];
    records[n - 1].position = [100.0; 3];
    records
}

#[test]
fn million_points_stream_into_four_batches() {
    let _ = env_logger::builder().is_test(true).try_init();

    let config = StreamConfig {
        batch_bytes: 300_000 * SIZE_OF_POINT as u64,
        ..Default::default()
    };
    let mut set: BatchSet<std::cell::RefCell<Vec<u32>>> = BatchSet::new(config.clone()).unwrap();
    let mut ingest = StreamingIngest::new(config.ingest_chunk_points);
    let mut source = MemorySource::from_records("cloud.las", &random_cloud(1_000_000, 7));

    let outcome = ingest.ingest(&mut set, &mut source);
    let extent = match outcome {
        IngestOutcome::Ingested { points, extent } => {
            assert_eq!(points, 1_000_000);
            extent
        }
        other => panic!("unexpected outcome {other:?}"),
    };

    let fills: Vec<_> = set.iter().map(|b| b.filled_count()).collect();
    assert_eq!(fills, [300_000, 300_000, 300_000, 100_000]);

    let total = set.total_extent();
    assert_eq!(total, extent);
    for (got, want) in total.to_array().iter().zip([0.0, 0.0, 0.0, 100.0, 100.0, 100.0]) {
        assert!((got - want).abs() < 1e-3, "extent {:?}", total.to_array());
    }

    // One transfer per frame until everything is resident.
    let queue = HostQueue::default();
    let mut frames = 0;
    while set.write_one_buffer_to_gpu(&queue).is_some() {
        frames += 1;
        assert_eq!(queue.uploads.get(), frames);
    }
    assert_eq!(frames, 4);
    assert_eq!(set.resident_points(), 1_000_000);
    assert!(set.iter().all(|b| b.state() == UploadState::OnDevice));

    // Full batches dropped their host copy; the partial tail keeps it.
    let host_kept: Vec<_> = set.iter().map(|b| b.host_channels().is_some()).collect();
    assert_eq!(host_kept, [false, false, false, true]);

    // The device copy matches what was quantized on the host.
    let tail = set.get(3).unwrap();
    let device = tail.device_buffers().unwrap();
    let host = tail.host_channels().unwrap();
    assert_eq!(device.fine.borrow()[..100_000], host.fine[..100_000]);
}

#[test]
fn frame_from_outside_and_inside_the_cloud() {
    let config = StreamConfig {
        batch_bytes: 10_000 * SIZE_OF_POINT as u64,
        ..Default::default()
    };
    let mut set = BatchSet::new(config).unwrap();
    let mut ingest = StreamingIngest::new(4096);
    ingest.ingest(&mut set, &mut MemorySource::from_records("a", &random_cloud(30_000, 1)));

    let queue = HostQueue::default();
    while set.write_one_buffer_to_gpu(&queue).is_some() {}

    let screen = Vec2::new(1600.0, 900.0);
    let settings = FrameSettings {
        screen_size: screen,
        ..Default::default()
    };
    let proj = Mat4::perspective_rh(60f32.to_radians(), screen.x / screen.y, 0.1, 10_000.0);

    // Far away and looking at the cloud: every batch drawn at coarse level.
    let far = proj * Mat4::look_at_rh(Vec3::new(50.0, 50.0, 5_000.0), Vec3::splat(50.0), Vec3::Y);
    let report = evaluate_frame(&mut set, &far, &settings);
    assert_eq!(report.shown_ids(), [0, 1, 2]);
    assert_eq!(report.drawn_points(), 30_000);
    assert!(report.draws().all(|d| d.level == AccuracyLevel::Coarse));
    assert!(report.draws().all(|d| d.workgroups == [157, 1, 1]));

    // Looking away: nothing drawn.
    let away = proj * Mat4::look_at_rh(Vec3::new(50.0, 50.0, 5_000.0), Vec3::new(50.0, 50.0, 10_000.0), Vec3::Y);
    let report = evaluate_frame(&mut set, &away, &settings);
    assert!(report.shown_ids().is_empty());
    assert_eq!(report.render_levels(), [-1, -1, -1]);

    // From the middle of the cloud every box straddles the camera.
    let inside = proj * Mat4::look_at_rh(Vec3::splat(50.0), Vec3::new(50.0, 50.0, 0.0), Vec3::Y);
    let report = evaluate_frame(&mut set, &inside, &settings);
    assert_eq!(report.render_levels(), [2, 2, 2]);
}
