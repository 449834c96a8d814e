//! HTTP `Range` header parsing.

/// A single byte range as requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=start-end`
    Bounded { start: u64, end: u64 },
    /// `bytes=start-`
    From(u64),
    /// `bytes=-len`: the last `len` bytes
    Suffix(u64),
}

impl ByteRange {
    /// The whole resource; what an absent header means.
    pub const FULL: ByteRange = ByteRange::From(0);

    /// Parse an optional `Range` header value.
    ///
    /// Supports formats:
    /// - bytes=0-499
    /// - bytes=500-
    /// - bytes=-500 (last 500 bytes)
    ///
    /// Multiple ranges and anything malformed yield `None`.
    pub fn parse(header: Option<&str>) -> Option<Self> {
        let Some(header) = header else {
            return Some(Self::FULL);
        };
        let set = header.trim().strip_prefix("bytes=")?;
        if set.contains(',') {
            return None;
        }

        let (start, end) = set.split_once('-')?;
        let (start, end) = (start.trim(), end.trim());

        match (start.is_empty(), end.is_empty()) {
            (true, false) => {
                let len: u64 = end.parse().ok()?;
                if len == 0 {
                    return None;
                }
                Some(Self::Suffix(len))
            }
            (false, true) => Some(Self::From(start.parse().ok()?)),
            (false, false) => {
                let start: u64 = start.parse().ok()?;
                let end: u64 = end.parse().ok()?;
                if start > end {
                    return None;
                }
                Some(Self::Bounded { start, end })
            }
            (true, true) => None,
        }
    }

    /// First byte offset, when it does not depend on the total size.
    pub fn start(&self) -> Option<u64> {
        match *self {
            Self::Bounded { start, .. } | Self::From(start) => Some(start),
            Self::Suffix(_) => None,
        }
    }

    /// Inclusive `(start, end)` against a resource of `total` bytes.
    ///
    /// `end` past the resource is clamped; a start at or past it is
    /// unsatisfiable.
    pub fn resolve(&self, total: u64) -> Option<(u64, u64)> {
        if total == 0 {
            return None;
        }
        let (start, end) = match *self {
            Self::Bounded { start, end } => (start, end.min(total - 1)),
            Self::From(start) => (start, total - 1),
            Self::Suffix(len) => (total.saturating_sub(len), total - 1),
        };
        (start < total && start <= end).then_some((start, end))
    }
}
