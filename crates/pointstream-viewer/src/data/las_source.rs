//! LAS/LAZ files as a [`PointSource`].

use anyhow::{Context, Result};
use glam::{DVec3, Vec3};
use pointstream::{
    point::{color_to_8bit, pack_rgb, records_to_bytes},
    BoundingBox, PointRecord, PointSource, StreamError, StreamingIngest,
};
use std::{fs::File, io::BufReader, path::Path};

/// Points without color are drawn in this gray.
const DEFAULT_COLOR: u32 = 0x00C0_C0C0;

pub fn has_las_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("las") || ext.eq_ignore_ascii_case("laz"))
}

/// Name a file is deduplicated by: its file name without the directory.
pub fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Opens `path` unless a file of the same name was already ingested. The
/// name check comes first, so a loaded file is never read twice.
pub fn open_unless_ingested(path: &Path, ingest: &StreamingIngest) -> Result<Option<LasSource>> {
    let name = source_name(path);
    if ingest.is_ingested(&name) {
        log::info!("{name}: already loaded, skipping");
        return Ok(None);
    }
    LasSource::open(path).map(Some)
}

/// Sequential reader over one LAS/LAZ file.
///
/// Coordinates are rebased on `origin` in f64 before narrowing to f32, so
/// georeferenced files keep their precision.
pub struct LasSource {
    name: String,
    reader: las::Reader,
    origin: DVec3,
    header_min: DVec3,
    header_max: DVec3,
    total: u64,
}

impl LasSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let reader = las::Reader::new(BufReader::new(file))
            .with_context(|| format!("Failed to read LAS header of {}", path.display()))?;

        let header = reader.header();
        let bounds = header.bounds();
        let total = header.number_of_points();
        let name = source_name(path);

        log::info!(
            "{name}: {total} points, bounds ({:.2},{:.2},{:.2})..({:.2},{:.2},{:.2})",
            bounds.min.x,
            bounds.min.y,
            bounds.min.z,
            bounds.max.x,
            bounds.max.y,
            bounds.max.z,
        );

        let header_min = DVec3::new(bounds.min.x, bounds.min.y, bounds.min.z);
        let header_max = DVec3::new(bounds.max.x, bounds.max.y, bounds.max.z);

        Ok(Self {
            name,
            reader,
            origin: DVec3::ZERO,
            header_min,
            header_max,
            total,
        })
    }

    /// Minimum corner declared by the header, in file coordinates.
    pub fn header_min(&self) -> DVec3 {
        self.header_min
    }

    pub fn with_origin(mut self, origin: DVec3) -> Self {
        self.origin = origin;
        self
    }

    fn rebase(&self, p: DVec3) -> Vec3 {
        (p - self.origin).as_vec3()
    }
}

fn to_record(point: &las::Point, origin: DVec3) -> PointRecord {
    let p = (DVec3::new(point.x, point.y, point.z) - origin).as_vec3();
    let color = point.color.map_or(DEFAULT_COLOR, |c| {
        pack_rgb(color_to_8bit(c.red), color_to_8bit(c.green), color_to_8bit(c.blue))
    });
    PointRecord::new(p.x, p.y, p.z, color)
}

impl PointSource for LasSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn header_extent(&self) -> Option<BoundingBox> {
        (self.total > 0).then(|| BoundingBox::new(self.rebase(self.header_min), self.rebase(self.header_max)))
    }

    fn point_count_hint(&self) -> Option<u64> {
        Some(self.total)
    }

    fn next_chunk(&mut self, max_points: usize) -> Result<Option<Vec<u8>>, StreamError> {
        let origin = self.origin;
        let mut records = Vec::with_capacity(max_points.min(self.total as usize));
        for point in self.reader.points().take(max_points) {
            let point = point.map_err(|e| StreamError::Source {
                name: self.name.clone(),
                message: e.to_string(),
            })?;
            records.push(to_record(&point, origin));
        }

        if records.is_empty() {
            return Ok(None);
        }
        Ok(Some(records_to_bytes(&records)))
    }
}
