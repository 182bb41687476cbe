//! Named point sources streamed into a [`PointDataHandler`] chunk by chunk.

use crate::batch_set::PointDataHandler;
use crate::bounds::BoundingBox;
use crate::error::StreamError;
use crate::point::{iter_records, records_to_bytes, PointRecord, SIZE_OF_POINT};
use std::collections::HashSet;

/// A decoder producing 16-byte point records.
pub trait PointSource {
    /// Identity used for de-duplication, typically the file name.
    fn name(&self) -> &str;

    /// Extent declared by the source before any point is decoded.
    fn header_extent(&self) -> Option<BoundingBox> {
        None
    }

    /// Total number of points, when known up front.
    fn point_count_hint(&self) -> Option<u64> {
        None
    }

    /// Returns up to `max_points` records, or `None` once exhausted.
    fn next_chunk(&mut self, max_points: usize) -> Result<Option<Vec<u8>>, StreamError>;
}

/// In-memory source over an encoded record buffer.
#[derive(Clone, Debug)]
pub struct MemorySource {
    name: String,
    bytes: Vec<u8>,
    cursor: usize,
    header_extent: Option<BoundingBox>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
            cursor: 0,
            header_extent: None,
        }
    }

    pub fn from_records(name: impl Into<String>, records: &[PointRecord]) -> Self {
        Self::new(name, records_to_bytes(records))
    }

    pub fn with_header_extent(mut self, extent: BoundingBox) -> Self {
        self.header_extent = Some(extent);
        self
    }
}

impl PointSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn header_extent(&self) -> Option<BoundingBox> {
        self.header_extent
    }

    fn point_count_hint(&self) -> Option<u64> {
        Some((self.bytes.len() / SIZE_OF_POINT) as u64)
    }

    fn next_chunk(&mut self, max_points: usize) -> Result<Option<Vec<u8>>, StreamError> {
        let whole = self.bytes.len() - self.bytes.len() % SIZE_OF_POINT;
        if self.cursor >= whole {
            return Ok(None);
        }
        let end = whole.min(self.cursor + max_points.max(1) * SIZE_OF_POINT);
        let chunk = self.bytes[self.cursor..end].to_vec();
        self.cursor = end;
        Ok(Some(chunk))
    }
}

/// Result of ingesting one source.
#[derive(Debug)]
pub enum IngestOutcome {
    Ingested {
        points: u64,
        /// Extent of everything ingested in this session so far.
        extent: BoundingBox,
    },
    /// A source with the same name was ingested before; nothing was read.
    AlreadyIngested,
    /// Decoding failed part way; the points before the failure are kept.
    Truncated {
        points: u64,
        extent: BoundingBox,
        reason: StreamError,
    },
}

impl IngestOutcome {
    pub fn points(&self) -> u64 {
        match self {
            Self::Ingested { points, .. } | Self::Truncated { points, .. } => *points,
            Self::AlreadyIngested => 0,
        }
    }
}

/// One step of an [`IngestSession`].
#[derive(Debug)]
pub enum IngestProgress {
    Loaded {
        /// Points in this step.
        points: usize,
        /// Points of this source so far.
        total: u64,
    },
    Finished(IngestOutcome),
}

impl<S: PointSource + ?Sized> PointSource for &mut S {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn header_extent(&self) -> Option<BoundingBox> {
        (**self).header_extent()
    }

    fn point_count_hint(&self) -> Option<u64> {
        (**self).point_count_hint()
    }

    fn next_chunk(&mut self, max_points: usize) -> Result<Option<Vec<u8>>, StreamError> {
        (**self).next_chunk(max_points)
    }
}

impl<S: PointSource + ?Sized> PointSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn header_extent(&self) -> Option<BoundingBox> {
        (**self).header_extent()
    }

    fn point_count_hint(&self) -> Option<u64> {
        (**self).point_count_hint()
    }

    fn next_chunk(&mut self, max_points: usize) -> Result<Option<Vec<u8>>, StreamError> {
        (**self).next_chunk(max_points)
    }
}

/// Tracks which sources were ingested and the extent they cover.
#[derive(Debug)]
pub struct StreamingIngest {
    chunk_points: usize,
    seen: HashSet<String>,
    extent: BoundingBox,
}

impl StreamingIngest {
    pub fn new(chunk_points: usize) -> Self {
        Self {
            chunk_points: chunk_points.max(1),
            seen: HashSet::new(),
            extent: BoundingBox::EMPTY,
        }
    }

    pub fn is_ingested(&self, name: &str) -> bool {
        self.seen.contains(name)
    }

    pub fn source_count(&self) -> usize {
        self.seen.len()
    }

    /// Union of all points ingested through this instance.
    pub fn extent(&self) -> BoundingBox {
        self.extent
    }

    /// Registers `source` and returns the job that streams it. A name seen
    /// before yields a job that finishes with
    /// [`IngestOutcome::AlreadyIngested`] without reading anything.
    pub fn begin<S: PointSource>(&mut self, source: S) -> IngestJob<S> {
        let skip = !self.seen.insert(source.name().to_string());
        if skip {
            log::info!("{}: already ingested, skipping", source.name());
        } else if let Some(hint) = source.point_count_hint() {
            log::debug!("{}: streaming {hint} points", source.name());
        }

        IngestJob {
            source,
            points: 0,
            state: if skip {
                JobState::Skipped
            } else {
                JobState::Streaming
            },
        }
    }

    /// Moves one chunk of `job` into `handler`. Returns `None` once the job
    /// has reported [`IngestProgress::Finished`].
    pub fn step<H, S>(&mut self, job: &mut IngestJob<S>, handler: &mut H) -> Option<IngestProgress>
    where
        H: PointDataHandler + ?Sized,
        S: PointSource,
    {
        match job.state {
            JobState::Done => return None,
            JobState::Skipped => {
                job.state = JobState::Done;
                return Some(IngestProgress::Finished(IngestOutcome::AlreadyIngested));
            }
            JobState::Streaming => {}
        }

        match job.source.next_chunk(self.chunk_points) {
            Ok(Some(chunk)) => {
                let added = handler.add(&chunk);
                let chunk_box: BoundingBox = iter_records(&chunk).take(added).map(|r| r.position()).collect();
                self.extent = self.extent.union(&chunk_box);
                job.points += added as u64;
                Some(IngestProgress::Loaded {
                    points: added,
                    total: job.points,
                })
            }
            Ok(None) => {
                job.state = JobState::Done;
                log::info!("{}: ingested {} points", job.source.name(), job.points);
                Some(IngestProgress::Finished(IngestOutcome::Ingested {
                    points: job.points,
                    extent: self.extent,
                }))
            }
            Err(reason) => {
                job.state = JobState::Done;
                log::warn!(
                    "{}: stopped after {} points: {reason}",
                    job.source.name(),
                    job.points
                );
                Some(IngestProgress::Finished(IngestOutcome::Truncated {
                    points: job.points,
                    extent: self.extent,
                    reason,
                }))
            }
        }
    }

    /// Streams `source` into `handler` to completion.
    pub fn ingest<H, S>(&mut self, handler: &mut H, source: &mut S) -> IngestOutcome
    where
        H: PointDataHandler + ?Sized,
        S: PointSource + ?Sized,
    {
        let mut outcome = IngestOutcome::AlreadyIngested;
        for step in self.session(handler, source) {
            if let IngestProgress::Finished(done) = step {
                outcome = done;
            }
        }
        outcome
    }

    /// Iterator form of [`Self::step`]: every `next()` moves one chunk.
    pub fn session<'a, H, S>(&'a mut self, handler: &'a mut H, source: &'a mut S) -> IngestSession<'a, H, S>
    where
        H: PointDataHandler + ?Sized,
        S: PointSource + ?Sized,
    {
        let job = self.begin(source);
        IngestSession {
            ingest: self,
            handler,
            job,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JobState {
    Streaming,
    Skipped,
    Done,
}

/// One registered source and its progress.
pub struct IngestJob<S> {
    source: S,
    points: u64,
    state: JobState,
}

impl<S: PointSource> IngestJob<S> {
    pub fn name(&self) -> &str {
        self.source.name()
    }

    /// Points moved so far.
    pub fn points(&self) -> u64 {
        self.points
    }

    pub fn is_done(&self) -> bool {
        self.state == JobState::Done
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

/// Iterator returned by [`StreamingIngest::session`].
pub struct IngestSession<'a, H: ?Sized, S: ?Sized> {
    ingest: &'a mut StreamingIngest,
    handler: &'a mut H,
    job: IngestJob<&'a mut S>,
}

impl<H, S> Iterator for IngestSession<'_, H, S>
where
    H: PointDataHandler + ?Sized,
    S: PointSource + ?Sized,
{
    type Item = IngestProgress;

    fn next(&mut self) -> Option<IngestProgress> {
        self.ingest.step(&mut self.job, &mut *self.handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch_set::BatchSet;
    use crate::config::StreamConfig;
    use crate::upload::testing::MockBuffer;
    use glam::Vec3;

    fn set(capacity: u32) -> BatchSet<MockBuffer> {
        BatchSet::new(StreamConfig {
            batch_bytes: capacity as u64 * SIZE_OF_POINT as u64,
            ..Default::default()
        })
        .unwrap()
    }

    fn line(name: &str, n: usize, offset: f32) -> MemorySource {
        let records: Vec<_> = (0..n)
            .map(|i| PointRecord::new(offset + i as f32, 0.0, 1.0, 0))
            .collect();
        MemorySource::from_records(name, &records)
    }

    struct Failing {
        inner: MemorySource,
        chunks_left: usize,
    }

    impl PointSource for Failing {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn next_chunk(&mut self, max_points: usize) -> Result<Option<Vec<u8>>, StreamError> {
            if self.chunks_left == 0 {
                return Err(StreamError::Source {
                    name: self.inner.name().to_string(),
                    message: "bad point record".into(),
                });
            }
            self.chunks_left -= 1;
            self.inner.next_chunk(max_points)
        }
    }

    #[test]
    fn same_name_is_ingested_once() {
        let mut handler = set(100);
        let mut ingest = StreamingIngest::new(16);

        let first = ingest.ingest(&mut handler, &mut line("a.las", 40, 0.0));
        assert_eq!(first.points(), 40);
        let again = ingest.ingest(&mut handler, &mut line("a.las", 40, 0.0));
        assert!(matches!(again, IngestOutcome::AlreadyIngested));
        assert_eq!(handler.total_points(), 40);
        assert!(ingest.is_ingested("a.las"));
    }

    #[test]
    fn extent_accumulates_per_session() {
        let mut handler = set(100);
        let mut ingest = StreamingIngest::new(16);
        ingest.ingest(&mut handler, &mut line("a", 10, 0.0));
        let outcome = ingest.ingest(&mut handler, &mut line("b", 10, 50.0));

        match outcome {
            IngestOutcome::Ingested { points, extent } => {
                assert_eq!(points, 10);
                assert_eq!(extent.to_array(), [0.0, 0.0, 1.0, 59.0, 0.0, 1.0]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let fresh = StreamingIngest::new(16);
        assert!(fresh.extent().is_empty());
    }

    #[test]
    fn session_moves_one_chunk_per_step() {
        let mut handler = set(100);
        let mut ingest = StreamingIngest::new(16);
        let mut source = line("a", 40, 0.0);

        let steps: Vec<_> = ingest.session(&mut handler, &mut source).collect();
        assert_eq!(steps.len(), 4);
        assert!(matches!(steps[0], IngestProgress::Loaded { points: 16, total: 16 }));
        assert!(matches!(steps[2], IngestProgress::Loaded { points: 8, total: 40 }));
        assert!(matches!(steps[3], IngestProgress::Finished(IngestOutcome::Ingested { points: 40, .. })));
    }

    #[test]
    fn decode_error_keeps_loaded_points() {
        let mut handler = set(100);
        let mut ingest = StreamingIngest::new(10);
        let mut source = Failing {
            inner: line("broken", 50, 0.0),
            chunks_left: 2,
        };

        match ingest.ingest(&mut handler, &mut source) {
            IngestOutcome::Truncated { points, extent, .. } => {
                assert_eq!(points, 20);
                assert_eq!(extent.max, Vec3::new(19.0, 0.0, 1.0));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(handler.total_points(), 20);
        assert!(ingest.is_ingested("broken"));
    }

    #[test]
    fn jobs_step_across_calls() {
        let mut handler = set(100);
        let mut ingest = StreamingIngest::new(25);
        let mut job = ingest.begin(Box::new(line("a", 60, 0.0)) as Box<dyn PointSource>);

        assert!(matches!(ingest.step(&mut job, &mut handler), Some(IngestProgress::Loaded { points: 25, .. })));
        assert_eq!(job.points(), 25);
        assert!(!job.is_done());

        while let Some(progress) = ingest.step(&mut job, &mut handler) {
            if let IngestProgress::Finished(outcome) = progress {
                assert_eq!(outcome.points(), 60);
            }
        }
        assert!(job.is_done());
        assert_eq!(handler.total_points(), 60);

        let mut dup = ingest.begin(line("a", 60, 0.0));
        assert!(matches!(
            ingest.step(&mut dup, &mut handler),
            Some(IngestProgress::Finished(IngestOutcome::AlreadyIngested))
        ));
        assert!(ingest.step(&mut dup, &mut handler).is_none());
    }

    #[test]
    fn memory_source_reports_header() {
        let extent = BoundingBox::new(Vec3::ZERO, Vec3::ONE);
        let source = line("a", 3, 0.0).with_header_extent(extent);
        assert_eq!(source.header_extent(), Some(extent));
        assert_eq!(source.point_count_hint(), Some(3));
    }
}
