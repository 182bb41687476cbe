use crate::error::StreamError;
use crate::point::SIZE_OF_POINT;
use crate::quantize::AccuracyLevel;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for threads per workgroup accepted by the dispatch sizing.
pub const MAX_THREADS_PER_WORKGROUP: u32 = 256;

/// Render quality knob: either pick the level per batch or force one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum RenderQuality {
    #[default]
    Auto,
    Coarse,
    Medium,
    Fine,
}

impl RenderQuality {
    pub const ALL: [RenderQuality; 4] = [Self::Auto, Self::Coarse, Self::Medium, Self::Fine];

    /// The forced level, or `None` for `Auto`.
    pub fn forced_level(self) -> Option<AccuracyLevel> {
        match self {
            Self::Auto => None,
            Self::Coarse => Some(AccuracyLevel::Coarse),
            Self::Medium => Some(AccuracyLevel::Medium),
            Self::Fine => Some(AccuracyLevel::Fine),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Coarse => "coarse",
            Self::Medium => "medium",
            Self::Fine => "fine",
        }
    }
}

impl fmt::Display for RenderQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderQuality {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "coarse" => Ok(Self::Coarse),
            "medium" => Ok(Self::Medium),
            "fine" => Ok(Self::Fine),
            _ => Err(StreamError::UnknownQuality(s.to_string())),
        }
    }
}

/// Settings for batching, upload pacing and dispatch sizing.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Byte budget of one batch; capacity is this divided by the record size.
    pub batch_bytes: u64,
    /// Threads per compute workgroup used for dispatch sizing.
    pub threads_per_workgroup: u32,
    pub quality: RenderQuality,
    /// Release host channel buffers of full batches once they are resident.
    pub release_host_buffers: bool,
    /// Re-queue uploads that have not completed within this time.
    /// `None` keeps a stalled batch in flight forever.
    pub upload_timeout: Option<Duration>,
    /// Points handed to the batch set per ingest step.
    pub ingest_chunk_points: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            // 2^20 points
            batch_bytes: (1u64 << 20) * SIZE_OF_POINT as u64,
            threads_per_workgroup: 64,
            quality: RenderQuality::Auto,
            release_host_buffers: true,
            upload_timeout: None,
            ingest_chunk_points: 1 << 16,
        }
    }
}

impl StreamConfig {
    /// Points per batch.
    #[inline]
    pub fn capacity_points(&self) -> u32 {
        (self.batch_bytes / SIZE_OF_POINT as u64).min(u32::MAX as u64) as u32
    }

    /// Clamps the batch size to what one device binding can hold and rounds
    /// it down to a whole number of records. `threads_per_workgroup` is
    /// clamped to `1..=256`.
    pub fn clamp_to_device(mut self, max_binding_bytes: u64) -> Self {
        let point = SIZE_OF_POINT as u64;
        self.batch_bytes = self.batch_bytes.min(max_binding_bytes);
        self.batch_bytes -= self.batch_bytes % point;
        self.threads_per_workgroup = self
            .threads_per_workgroup
            .clamp(1, MAX_THREADS_PER_WORKGROUP);
        self
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if self.capacity_points() == 0 {
            return Err(StreamError::Config(format!(
                "batch size of {} bytes holds no {}-byte point",
                self.batch_bytes, SIZE_OF_POINT
            )));
        }

        if self.threads_per_workgroup == 0 || self.threads_per_workgroup > MAX_THREADS_PER_WORKGROUP {
            return Err(StreamError::Config(format!(
                "threads per workgroup must be in 1..={}, got {}",
                MAX_THREADS_PER_WORKGROUP, self.threads_per_workgroup
            )));
        }

        if self.ingest_chunk_points == 0 {
            return Err(StreamError::Config("ingest chunk must hold at least one point".into()));
        }

        Ok(())
    }
}

/// Parses a byte count: plain bytes, or a number suffixed with `k`, `m` or
/// `g` (powers of 1024, case-insensitive).
pub fn parse_byte_size(s: &str) -> Result<u64, StreamError> {
    let t = s.trim().to_ascii_lowercase();
    let bad = || StreamError::InvalidByteSize(s.to_string());

    let (digits, shift) = match t.chars().last() {
        Some('k') => (&t[..t.len() - 1], 10),
        Some('m') => (&t[..t.len() - 1], 20),
        Some('g') => (&t[..t.len() - 1], 30),
        Some(_) => (t.as_str(), 0),
        None => return Err(bad()),
    };

    let n: u64 = digits.trim().parse().map_err(|_| bad())?;
    n.checked_mul(1u64 << shift).ok_or_else(bad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_sizes() {
        assert_eq!(parse_byte_size("4096").unwrap(), 4096);
        assert_eq!(parse_byte_size("512k").unwrap(), 512 * 1024);
        assert_eq!(parse_byte_size("16M").unwrap(), 16 << 20);
        assert_eq!(parse_byte_size(" 1g ").unwrap(), 1 << 30);
        assert!(parse_byte_size("").is_err());
        assert!(parse_byte_size("m").is_err());
        assert!(parse_byte_size("12q").is_err());
        assert!(parse_byte_size("-3k").is_err());
    }

    #[test]
    fn clamp_rounds_to_whole_points() {
        let config = StreamConfig {
            batch_bytes: 1 << 30,
            threads_per_workgroup: 1000,
            ..Default::default()
        }
        .clamp_to_device(1_000_003);

        assert_eq!(config.batch_bytes, 1_000_000);
        assert_eq!(config.capacity_points(), 62_500);
        assert_eq!(config.threads_per_workgroup, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_capacity_is_one_mebi_point() {
        let config = StreamConfig::default();
        assert_eq!(config.capacity_points(), 1 << 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_degenerate_settings() {
        let tiny = StreamConfig {
            batch_bytes: 15,
            ..Default::default()
        };
        assert!(tiny.validate().is_err());

        let no_threads = StreamConfig {
            threads_per_workgroup: 0,
            ..Default::default()
        };
        assert!(no_threads.validate().is_err());
    }

    #[test]
    fn quality_round_trips_through_text() {
        for q in RenderQuality::ALL {
            assert_eq!(q.to_string().parse::<RenderQuality>().unwrap(), q);
        }
        assert_eq!("FINE".parse::<RenderQuality>().unwrap(), RenderQuality::Fine);
        assert!("ultra".parse::<RenderQuality>().is_err());
        assert_eq!(RenderQuality::Auto.forced_level(), None);
        assert_eq!(RenderQuality::Medium.forced_level(), Some(AccuracyLevel::Medium));
    }
}
