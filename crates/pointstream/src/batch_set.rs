use crate::batch::PointBatch;
use crate::bounds::BoundingBox;
use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::point::SIZE_OF_POINT;
use crate::upload::{TransferQueue, UploadState};

/// Sink for decoded point records.
pub trait PointDataHandler {
    /// Appends every whole record in `bytes`; returns the number of points taken.
    fn add(&mut self, bytes: &[u8]) -> usize;

    /// Lazily appends `bytes` in steps of at most `chunk_points` records, one
    /// step per `next()`.
    fn add_chunked<'a>(&'a mut self, bytes: &'a [u8], chunk_points: usize) -> ChunkedAdd<'a, Self>
    where
        Self: Sized,
    {
        ChunkedAdd {
            handler: self,
            rest: bytes,
            step_bytes: chunk_points.max(1) * SIZE_OF_POINT,
        }
    }

    fn buffer_count(&self) -> usize;

    /// Byte length of one full batch.
    fn buffer_byte_length(&self) -> u64;
}

/// Iterator returned by [`PointDataHandler::add_chunked`]; yields the point
/// count of each step.
pub struct ChunkedAdd<'a, H> {
    handler: &'a mut H,
    rest: &'a [u8],
    step_bytes: usize,
}

impl<H: PointDataHandler> Iterator for ChunkedAdd<'_, H> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.rest.len() < SIZE_OF_POINT {
            return None;
        }
        let take = self.step_bytes.min(self.rest.len());
        let (head, tail) = self.rest.split_at(take);
        self.rest = tail;
        Some(self.handler.add(head))
    }
}

/// Append-only sequence of batches. Only the last one may be partially filled.
pub struct BatchSet<B> {
    config: StreamConfig,
    batches: Vec<PointBatch<B>>,
}

impl<B> BatchSet<B> {
    /// Fails when `config` does not validate, e.g. a batch too small for one
    /// point.
    pub fn new(config: StreamConfig) -> Result<Self, StreamError> {
        config.validate()?;
        Ok(Self {
            config,
            batches: Vec::new(),
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Routes `bytes` into the last batch, opening new batches as each fills.
    pub fn add(&mut self, bytes: &[u8]) -> usize {
        let mut rest = &bytes[..bytes.len() - bytes.len() % SIZE_OF_POINT];
        let mut added = 0usize;

        while !rest.is_empty() {
            let open = self.batches.last().map_or(false, |b| !b.is_full());
            if !open {
                let id = self.batches.len() as u32;
                self.batches.push(PointBatch::new(id, &self.config));
            }
            let Some(batch) = self.batches.last_mut() else {
                break;
            };

            let room = batch.remaining() as usize * SIZE_OF_POINT;
            let (head, tail) = rest.split_at(room.min(rest.len()));
            let loaded = batch.load_data(head) as usize;
            if loaded == 0 {
                break;
            }
            added += loaded;
            rest = tail;
        }

        added
    }

    /// Polls in-flight transfers, then submits the first batch waiting for
    /// an upload. Never starts more than one transfer per call.
    pub fn write_one_buffer_to_gpu<Q>(&mut self, queue: &Q) -> Option<u32>
    where
        Q: TransferQueue<Buffer = B>,
    {
        self.poll_uploads();

        let batch = self
            .batches
            .iter_mut()
            .find(|b| b.state() == UploadState::PendingUpload)?;
        batch.write_data_to_gpu_buffer(queue).then(|| batch.id())
    }

    /// Returns the number of transfers observed complete.
    pub fn poll_uploads(&mut self) -> usize {
        self.batches
            .iter_mut()
            .filter(|b| b.state() == UploadState::InFlight)
            .map(|b| b.poll_upload() as usize)
            .sum()
    }

    /// Union of every batch box.
    pub fn total_extent(&self) -> BoundingBox {
        self.batches
            .iter()
            .fold(BoundingBox::EMPTY, |acc, b| acc.union(b.bounding_box()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&PointBatch<B>> {
        self.batches.get(id as usize)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PointBatch<B>> {
        self.batches.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, PointBatch<B>> {
        self.batches.iter_mut()
    }

    pub fn total_points(&self) -> u64 {
        self.batches.iter().map(|b| b.filled_count() as u64).sum()
    }

    pub fn resident_points(&self) -> u64 {
        self.batches.iter().map(|b| b.resident_count() as u64).sum()
    }

    #[inline]
    pub fn capacity_points(&self) -> u32 {
        self.config.capacity_points()
    }

    /// Batches whose host data is ahead of the device.
    pub fn pending_uploads(&self) -> usize {
        self.batches
            .iter()
            .filter(|b| matches!(b.state(), UploadState::PendingUpload | UploadState::InFlight))
            .count()
    }
}

impl<B> PointDataHandler for BatchSet<B> {
    fn add(&mut self, bytes: &[u8]) -> usize {
        BatchSet::add(self, bytes)
    }

    fn buffer_count(&self) -> usize {
        self.len()
    }

    fn buffer_byte_length(&self) -> u64 {
        self.config.capacity_points() as u64 * SIZE_OF_POINT as u64
    }
}

impl<'a, B> IntoIterator for &'a BatchSet<B> {
    type Item = &'a PointBatch<B>;
    type IntoIter = std::slice::Iter<'a, PointBatch<B>>;

    fn into_iter(self) -> Self::IntoIter {
        self.batches.iter()
    }
}
