use crate::bounds::BoundingBox;
use crate::config::StreamConfig;
use crate::point::{PointRecord, SIZE_OF_POINT};
use crate::quantize::{quantize_position, AccuracyLevel};
use crate::upload::{ChannelSet, SignalState, TransferQueue, UploadSignal, UploadState};
use crate::visibility::{ProjectedBox, ProjectionCache};
use glam::{Mat4, Vec2, Vec3};
use rayon::prelude::*;
use std::time::{Duration, Instant};

/// Fixed-capacity group of points sharing one bounding box.
///
/// Owns the host copy of its four channels and, after the first upload, the
/// matching device buffers of type `B`.
pub struct PointBatch<B> {
    id: u32,
    capacity: u32,
    filled: u32,
    bbox: BoundingBox,

    host: Option<ChannelSet<Vec<u32>>>,
    device: Option<ChannelSet<B>>,
    device_generation: u64,

    state: UploadState,
    signal: Option<UploadSignal>,
    upload_started: Option<Instant>,
    submitted_count: u32,
    resident_count: u32,
    /// Points arrived while a transfer was in flight.
    dirty: bool,
    failure_logged: bool,

    release_host_buffers: bool,
    upload_timeout: Option<Duration>,

    projection: ProjectionCache,
}

impl<B> PointBatch<B> {
    pub fn new(id: u32, config: &StreamConfig) -> Self {
        let capacity = config.capacity_points();
        log::debug!("batch {id}: created, capacity {capacity} points");

        Self {
            id,
            capacity,
            filled: 0,
            bbox: BoundingBox::EMPTY,
            host: Some(ChannelSet::from_fn(|_| vec![0u32; capacity as usize])),
            device: None,
            device_generation: 0,
            state: UploadState::Empty,
            signal: None,
            upload_started: None,
            submitted_count: 0,
            resident_count: 0,
            dirty: false,
            failure_logged: false,
            release_host_buffers: config.release_host_buffers,
            upload_timeout: config.upload_timeout,
            projection: ProjectionCache::default(),
        }
    }

    /// Appends as many whole records from `bytes` as fit and returns how many
    /// were taken. The box is grown over the new records first, then each new
    /// record is quantized against the grown box. Earlier points keep the
    /// encoding they got against the box of their own call.
    pub fn load_data(&mut self, bytes: &[u8]) -> u32 {
        let take = (bytes.len() / SIZE_OF_POINT).min(self.remaining() as usize);
        if take == 0 {
            return 0;
        }
        let Some(host) = self.host.as_mut() else {
            return 0;
        };

        let records = &bytes[..take * SIZE_OF_POINT];

        let grown = records
            .par_chunks_exact(SIZE_OF_POINT)
            .map(|chunk| {
                let p = PointRecord::read(chunk).position();
                BoundingBox::new(p, p)
            })
            .reduce(|| BoundingBox::EMPTY, |a, b| a.union(&b));
        let bbox = self.bbox.union(&grown);

        let range = self.filled as usize..self.filled as usize + take;
        let ChannelSet {
            coarse,
            medium,
            fine,
            color,
        } = host;

        records
            .par_chunks_exact(SIZE_OF_POINT)
            .zip(coarse[range.clone()].par_iter_mut())
            .zip(medium[range.clone()].par_iter_mut())
            .zip(fine[range.clone()].par_iter_mut())
            .zip(color[range].par_iter_mut())
            .for_each(|((((chunk, c), m), f), rgb)| {
                let record = PointRecord::read(chunk);
                let q = quantize_position(record.position(), &bbox);
                *c = q.coarse;
                *m = q.medium;
                *f = q.fine;
                *rgb = record.color;
            });

        if bbox != self.bbox {
            self.bbox = bbox;
            self.projection.invalidate();
        }
        self.filled += take as u32;

        match self.state {
            UploadState::InFlight => self.dirty = true,
            _ => self.state = UploadState::PendingUpload,
        }

        take as u32
    }

    /// Starts an upload of the filled prefix of every channel if the batch is
    /// waiting for one. Returns whether a transfer was submitted.
    pub fn write_data_to_gpu_buffer<Q>(&mut self, queue: &Q) -> bool
    where
        Q: TransferQueue<Buffer = B>,
    {
        if self.state != UploadState::PendingUpload {
            return false;
        }
        let Some(host) = self.host.as_ref() else {
            return false;
        };

        let id = self.id;
        let byte_len = self.capacity as u64 * 4;
        if self.device.is_none() {
            self.device = Some(ChannelSet::from_fn(|channel| {
                queue.create_channel_buffer(&format!("batch {id} {}", channel.label()), byte_len)
            }));
            self.device_generation += 1;
        }
        let Some(device) = self.device.as_ref() else {
            return false;
        };

        let filled = self.filled as usize;
        let signal = UploadSignal::new();
        queue.upload_channels(device, host.each_ref().map(|v| &v[..filled]), signal.clone());

        log::debug!("batch {id}: upload of {filled} points submitted");

        self.signal = Some(signal);
        self.upload_started = Some(Instant::now());
        self.submitted_count = self.filled;
        self.dirty = false;
        self.failure_logged = false;
        self.state = UploadState::InFlight;
        true
    }

    /// Observes the in-flight transfer. Returns true when it completed during
    /// this call.
    pub fn poll_upload(&mut self) -> bool {
        if self.state != UploadState::InFlight {
            return false;
        }
        let Some(signal) = self.signal.as_ref() else {
            return false;
        };

        match signal.state() {
            SignalState::Done => {
                self.resident_count = self.submitted_count;
                self.signal = None;
                self.upload_started = None;
                self.state = if self.dirty {
                    UploadState::PendingUpload
                } else {
                    UploadState::OnDevice
                };
                self.dirty = false;
                log::debug!("batch {}: {} points resident", self.id, self.resident_count);

                self.maybe_release_host();
                true
            }
            SignalState::Failed(message) => {
                if !self.failure_logged {
                    log::error!("batch {}: upload failed: {message}", self.id);
                    self.failure_logged = true;
                }
                self.check_timeout();
                false
            }
            SignalState::Pending => {
                self.check_timeout();
                false
            }
        }
    }

    fn check_timeout(&mut self) {
        let (Some(limit), Some(started)) = (self.upload_timeout, self.upload_started) else {
            return;
        };
        if started.elapsed() < limit {
            return;
        }

        log::warn!(
            "batch {}: upload still in flight after {:?}, re-queueing",
            self.id,
            started.elapsed()
        );
        self.signal = None;
        self.upload_started = None;
        self.dirty = false;
        self.state = UploadState::PendingUpload;
    }

    fn maybe_release_host(&mut self) {
        if self.release_host_buffers
            && self.is_full()
            && self.resident_count == self.capacity
            && self.state == UploadState::OnDevice
            && self.host.take().is_some()
        {
            log::debug!("batch {}: host buffers released", self.id);
        }
    }

    /// Whether any part of the box overlaps the view.
    pub fn is_visible(&mut self, view_proj: &Mat4, screen_size: Vec2) -> bool {
        self.projected(view_proj, screen_size).is_visible()
    }

    /// Level of detail from the on-screen size of the box.
    pub fn accuracy_level(&mut self, view_proj: &Mat4, screen_size: Vec2) -> AccuracyLevel {
        self.projected(view_proj, screen_size).accuracy_level(screen_size)
    }

    pub fn projected(&mut self, view_proj: &Mat4, screen_size: Vec2) -> &ProjectedBox {
        self.projection.get_or_project(&self.bbox, view_proj, screen_size)
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn filled_count(&self) -> u32 {
        self.filled
    }

    #[inline]
    pub fn remaining(&self) -> u32 {
        self.capacity - self.filled
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.filled == self.capacity
    }

    #[inline]
    pub fn bounding_box(&self) -> &BoundingBox {
        &self.bbox
    }

    #[inline]
    pub fn origin(&self) -> Vec3 {
        self.bbox.origin()
    }

    #[inline]
    pub fn size(&self) -> Vec3 {
        self.bbox.size()
    }

    #[inline]
    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Points present in the device copy.
    #[inline]
    pub fn resident_count(&self) -> u32 {
        self.resident_count
    }

    #[inline]
    pub fn is_resident(&self) -> bool {
        self.resident_count > 0 && self.device.is_some()
    }

    pub fn device_buffers(&self) -> Option<&ChannelSet<B>> {
        self.device.as_ref()
    }

    /// Bumped whenever the device buffers are (re)created.
    #[inline]
    pub fn device_generation(&self) -> u64 {
        self.device_generation
    }

    pub fn host_channels(&self) -> Option<&ChannelSet<Vec<u32>>> {
        self.host.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::{records_to_bytes, PointRecord};
    use crate::quantize::unpack_tier;
    use crate::upload::testing::MockQueue;
    use crate::upload::testing::MockBuffer;

    fn config(capacity: u32) -> StreamConfig {
        StreamConfig {
            batch_bytes: capacity as u64 * SIZE_OF_POINT as u64,
            ..Default::default()
        }
    }

    fn bytes(points: &[[f32; 3]]) -> Vec<u8> {
        let records: Vec<_> = points
            .iter()
            .enumerate()
            .map(|(i, p)| PointRecord::new(p[0], p[1], p[2], i as u32))
            .collect();
        records_to_bytes(&records)
    }

    #[test]
    fn load_clamps_to_capacity() {
        let mut batch = PointBatch::<MockBuffer>::new(0, &config(4));
        let input = bytes(&[[0.0; 3]; 6]);

        assert_eq!(batch.load_data(&input), 4);
        assert!(batch.is_full());
        assert_eq!(batch.load_data(&input), 0);
        assert_eq!(batch.filled_count(), 4);
    }

    #[test]
    fn bbox_covers_loaded_points_and_corners_encode_to_extremes() {
        let mut batch = PointBatch::<MockBuffer>::new(0, &config(8));
        batch.load_data(&bytes(&[[1.0, 2.0, 3.0], [4.0, -6.0, 9.0], [2.0, 0.0, 5.0]]));

        let bbox = batch.bounding_box();
        assert_eq!(bbox.to_array(), [1.0, -6.0, 3.0, 4.0, 2.0, 9.0]);

        let host = batch.host_channels().unwrap();
        // First point: x at min, y at max, z at min.
        for word in [host.coarse[0], host.medium[0], host.fine[0]] {
            assert_eq!(unpack_tier(word), [0, 0x3FF, 0]);
        }
        // Second point: x max, y min, z max.
        for word in [host.coarse[1], host.medium[1], host.fine[1]] {
            assert_eq!(unpack_tier(word), [0x3FF, 0, 0x3FF]);
        }
        assert_eq!(&host.color[..3], &[0, 1, 2]);
    }

    #[test]
    fn flat_axis_quantizes_to_zero() {
        let mut batch = PointBatch::<MockBuffer>::new(0, &config(8));
        batch.load_data(&bytes(&[[7.5, 0.0, 1.0], [7.5, 3.0, 2.0], [7.5, 1.5, 4.0]]));

        assert_eq!(batch.size().x, 0.0);
        let host = batch.host_channels().unwrap();
        for i in 0..3 {
            for word in [host.coarse[i], host.medium[i], host.fine[i]] {
                let [x, _, _] = unpack_tier(word);
                assert_eq!(x, 0);
            }
        }
        // The other axes still span their range.
        assert_eq!(unpack_tier(host.coarse[1])[1], 0x3FF);
        assert_eq!(unpack_tier(host.coarse[2])[2], 0x3FF);
    }

    #[test]
    fn earlier_points_are_not_requantized() {
        let mut batch = PointBatch::<MockBuffer>::new(0, &config(8));
        batch.load_data(&bytes(&[[0.0; 3], [1.0; 3]]));
        let before = batch.host_channels().unwrap().coarse[1];

        batch.load_data(&bytes(&[[10.0; 3]]));
        let host = batch.host_channels().unwrap();
        assert_eq!(host.coarse[1], before);
        assert_eq!(unpack_tier(host.coarse[2]), [0x3FF; 3]);
    }

    #[test]
    fn at_most_one_upload_in_flight() {
        let queue = MockQueue::stalled();
        let mut batch = PointBatch::new(3, &config(16));
        batch.load_data(&bytes(&[[0.0; 3]; 4]));

        assert!(batch.write_data_to_gpu_buffer(&queue));
        assert_eq!(batch.state(), UploadState::InFlight);

        for _ in 0..5 {
            batch.load_data(&bytes(&[[1.0; 3]]));
            assert!(!batch.write_data_to_gpu_buffer(&queue));
            assert!(!batch.poll_upload());
        }
        assert_eq!(queue.submit_count(), 1);
        assert_eq!(batch.resident_count(), 0);
        assert_eq!(queue.created.borrow().len(), 4);
        assert_eq!(queue.created.borrow()[0], "batch 3 coarse");
    }

    #[test]
    fn points_added_in_flight_requeue_the_batch() {
        let queue = MockQueue::stalled();
        let mut batch = PointBatch::new(0, &config(16));
        batch.load_data(&bytes(&[[0.0; 3]; 4]));
        batch.write_data_to_gpu_buffer(&queue);
        batch.load_data(&bytes(&[[1.0; 3]; 2]));

        queue.complete_all();
        assert!(batch.poll_upload());
        assert_eq!(batch.resident_count(), 4);
        assert_eq!(batch.state(), UploadState::PendingUpload);

        assert!(batch.write_data_to_gpu_buffer(&queue));
        queue.complete_all();
        assert!(batch.poll_upload());
        assert_eq!(batch.resident_count(), 6);
        assert_eq!(batch.state(), UploadState::OnDevice);
        assert_eq!(batch.device_generation(), 1);
        assert_eq!(queue.submits.borrow()[1].1, 6);
    }

    #[test]
    fn full_resident_batch_releases_host_buffers() {
        let queue = MockQueue::resolving();
        let mut batch = PointBatch::new(0, &config(2));
        batch.load_data(&bytes(&[[0.0; 3]]));
        batch.write_data_to_gpu_buffer(&queue);
        batch.poll_upload();
        assert!(batch.host_channels().is_some());

        batch.load_data(&bytes(&[[1.0; 3]]));
        batch.write_data_to_gpu_buffer(&queue);
        batch.poll_upload();
        assert!(batch.host_channels().is_none());
        assert!(batch.is_resident());
    }

    #[test]
    fn failed_upload_stays_in_flight() {
        let queue = MockQueue::stalled();
        let mut batch = PointBatch::new(0, &config(4));
        batch.load_data(&bytes(&[[0.0; 3]]));
        batch.write_data_to_gpu_buffer(&queue);
        queue.fail_all("out of memory");

        assert!(!batch.poll_upload());
        assert!(!batch.poll_upload());
        assert_eq!(batch.state(), UploadState::InFlight);
        assert!(!batch.write_data_to_gpu_buffer(&queue));
    }

    #[test]
    fn timed_out_upload_is_retried() {
        let queue = MockQueue::stalled();
        let mut batch = PointBatch::new(
            0,
            &StreamConfig {
                upload_timeout: Some(Duration::ZERO),
                ..config(4)
            },
        );
        batch.load_data(&bytes(&[[0.0; 3]]));
        batch.write_data_to_gpu_buffer(&queue);

        assert!(!batch.poll_upload());
        assert_eq!(batch.state(), UploadState::PendingUpload);
        assert!(batch.write_data_to_gpu_buffer(&queue));
        assert_eq!(queue.submit_count(), 2);
    }

    #[test]
    fn bbox_change_invalidates_projection() {
        let mut batch = PointBatch::<MockBuffer>::new(0, &config(8));
        batch.load_data(&bytes(&[[0.0; 3], [1.0; 3]]));

        let vp = Mat4::perspective_rh(1.0, 1.0, 0.1, 100.0)
            * Mat4::look_at_rh(Vec3::new(0.5, 0.5, 10.0), Vec3::splat(0.5), Vec3::Y);
        let screen = Vec2::new(640.0, 480.0);
        let small = batch.projected(&vp, screen).screen_extent();

        batch.load_data(&bytes(&[[3.0; 3]]));
        let large = batch.projected(&vp, screen).screen_extent();
        assert!(large.x > small.x);
    }
}
