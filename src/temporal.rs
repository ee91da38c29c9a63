//! # Temporal Module
//!
//! Instants, half-open spans with optional boundaries, and the timestamp
//! conversions used when reconstructing histories. All times are UTC epoch
//! seconds.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// Represents a temporal instant as UTC epoch seconds
pub type Instant = i64;

/// Year bucket used for records whose timestamp is unknown.
/// Sorts before every real year, matching the open start boundary.
pub const UNKNOWN_YEAR: i32 = i32::MIN;

/// A half-open span `[start, end)` with optional boundaries.
///
/// A missing start is the open boundary at −∞ and a missing end is the open
/// boundary at +∞ ("still current").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Option<Instant>,
    pub end: Option<Instant>,
}

impl Span {
    /// Create a span, rejecting a start that lies after the end.
    pub fn new(start: Option<Instant>, end: Option<Instant>) -> anyhow::Result<Self> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                anyhow::bail!("Invalid span: start ({}) must not be after end ({})", s, e);
            }
        }
        Ok(Self { start, end })
    }

    /// Open-ended span starting at `start`
    pub fn from_start(start: Instant) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    pub fn all_time() -> Self {
        Self {
            start: None,
            end: None,
        }
    }

    /// Check if this span contains a specific instant
    pub fn contains(&self, instant: Instant) -> bool {
        self.start.map_or(true, |s| s <= instant) && self.end.map_or(true, |e| instant < e)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let start_str = match self.start {
            Some(s) => format!("[{}", s),
            None => "(-∞".to_string(),
        };
        let end_str = match self.end {
            Some(e) => format!("{})", e),
            None => "+∞)".to_string(),
        };
        write!(f, "{}, {}", start_str, end_str)
    }
}

impl PartialOrd for Span {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Span {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_start(self.start, other.start).then_with(|| compare_end(self.end, other.end))
    }
}

/// Compare start boundaries: an absent start is −∞.
#[inline]
pub fn compare_start(a: Option<Instant>, b: Option<Instant>) -> Ordering {
    // Option's derived order already puts None first.
    a.cmp(&b)
}

/// Compare end boundaries: an absent end is +∞.
#[inline]
pub fn compare_end(a: Option<Instant>, b: Option<Instant>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => x.cmp(&y),
    }
}

/// Check if two spans overlap (half-open semantics)
#[inline]
pub fn is_overlapping(a: &Span, b: &Span) -> bool {
    let a_before_b_end = match (a.start, b.end) {
        (Some(s), Some(e)) => s < e,
        _ => true,
    };
    let b_before_a_end = match (b.start, a.end) {
        (Some(s), Some(e)) => s < e,
        _ => true,
    };
    a_before_b_end && b_before_a_end
}

/// Check if `a` ends exactly where `b` starts
#[inline]
pub fn meets(a: &Span, b: &Span) -> bool {
    matches!((a.end, b.start), (Some(e), Some(s)) if e == s)
}

/// Calendar year (UTC) of an instant, used as the time-variant partition component.
pub fn year_of(instant: Instant) -> Option<i32> {
    OffsetDateTime::from_unix_timestamp(instant)
        .ok()
        .map(|dt| dt.year())
}

/// Year bucket for an optional instant; unknown or out-of-range maps to [`UNKNOWN_YEAR`].
pub fn year_bucket(instant: Option<Instant>) -> i32 {
    instant.and_then(year_of).unwrap_or(UNKNOWN_YEAR)
}

/// Parse a MediaWiki timestamp.
///
/// Accepts the 14-digit database form (`20240131235959`) and RFC 3339
/// (`2024-01-31T23:59:59Z`).
pub fn parse_mediawiki_timestamp(raw: &str) -> anyhow::Result<Instant> {
    let trimmed = raw.trim();
    if trimmed.len() == 14 && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        let format = format_description!("[year][month][day][hour][minute][second]");
        let parsed = PrimitiveDateTime::parse(trimmed, &format)
            .map_err(|err| anyhow::anyhow!("Invalid MediaWiki timestamp {:?}: {}", raw, err))?;
        return Ok(parsed.assume_utc().unix_timestamp());
    }
    let parsed = OffsetDateTime::parse(trimmed, &Rfc3339)
        .map_err(|err| anyhow::anyhow!("Invalid timestamp {:?}: {}", raw, err))?;
    Ok(parsed.unix_timestamp())
}
