//! Byte-range resolution for the streaming edge.
//!
//! The policy is deliberately permissive: a malformed or unsatisfiable
//! `Range` header falls back to full content (200) instead of 416, for
//! compatibility with clients that probe with speculative ranges. A valid,
//! satisfiable range answers 206 even when it happens to cover the whole
//! payload, so probing players always get the `Content-Range` they asked
//! about.

/// A byte range resolved against a known payload size. `len` is the number
/// of bytes covered, which makes a zero-byte payload representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: u64,
    pub len: u64,
}

impl ResolvedRange {
    pub fn full(size_bytes: u64) -> Self {
        Self {
            start: 0,
            len: size_bytes,
        }
    }

    /// Inclusive end offset for `Content-Range`. A zero-length range
    /// reports its start.
    pub fn end(&self) -> u64 {
        self.start + self.len.saturating_sub(1)
    }
}

/// Outcome of resolving a `Range` header: whether to answer
/// `200 OK` or `206 Partial Content`, and with which bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeResolution {
    /// No header, a malformed header, or an unsatisfiable one. Serve the
    /// whole payload with 200.
    Full(ResolvedRange),
    /// A valid `bytes=` range within bounds. Serve 206 with `Content-Range`.
    Partial(ResolvedRange),
}

impl RangeResolution {
    pub fn range(&self) -> ResolvedRange {
        match self {
            Self::Full(r) | Self::Partial(r) => *r,
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Partial(_))
    }
}

/// Resolve a `Range` header against the payload size.
///
/// - no header, or one not matching `bytes=<start>-<end?>` → full content
/// - omitted end → end of payload
/// - start past EOF, end past EOF, or start > end → full content
pub fn resolve_range(header: Option<&str>, size_bytes: u64) -> RangeResolution {
    let full = RangeResolution::Full(ResolvedRange::full(size_bytes));

    let Some(header) = header else {
        return full;
    };

    let Some((start, end)) = parse_bytes_spec(header) else {
        return full;
    };

    let end = end.unwrap_or_else(|| size_bytes.saturating_sub(1));

    if start >= size_bytes || end >= size_bytes || start > end {
        return full;
    }

    RangeResolution::Partial(ResolvedRange {
        start,
        len: end - start + 1,
    })
}

fn parse_bytes_spec(header: &str) -> Option<(u64, Option<u64>)> {
    let spec = header.trim().strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;

    let start: u64 = start.trim().parse().ok()?;
    let end = end.trim();
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse().ok()?)
    };

    Some((start, end))
}
