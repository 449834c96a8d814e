//! Size-band candidate selection.
//!
//! Listing pages often offer the same title in several qualities, each
//! labelled with a free-text size ("1080p x264 [1.8 GB]"). A candidate
//! qualifies when its parsed size falls inside the inclusive band configured
//! for its unit; the largest qualifying size wins.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static SIZE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(\d+(?:\.\d+)?) ?(GB|MB)\b").unwrap());

/// Unit of a size descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeUnit {
    Mb,
    Gb,
}

/// A size parsed out of a candidate label.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParsedSize {
    pub value: f64,
    pub unit: SizeUnit,
}

impl ParsedSize {
    /// Size expressed in megabytes (1 GB = 1024 MB).
    pub fn in_mb(&self) -> f64 {
        match self.unit {
            SizeUnit::Mb => self.value,
            SizeUnit::Gb => self.value * 1024.0,
        }
    }
}

/// Inclusive `[min, max]` band in the unit it is configured under.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeBand {
    pub min: f64,
    pub max: f64,
}

impl SizeBand {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Independent bands per unit. A unit without a band never qualifies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SizeBands {
    #[serde(rename = "MB", default, skip_serializing_if = "Option::is_none")]
    pub mb: Option<SizeBand>,
    #[serde(rename = "GB", default, skip_serializing_if = "Option::is_none")]
    pub gb: Option<SizeBand>,
}

impl SizeBands {
    pub fn band(&self, unit: SizeUnit) -> Option<&SizeBand> {
        match unit {
            SizeUnit::Mb => self.mb.as_ref(),
            SizeUnit::Gb => self.gb.as_ref(),
        }
    }

    pub fn qualifies(&self, size: &ParsedSize) -> bool {
        self.band(size.unit)
            .is_some_and(|band| band.contains(size.value))
    }

    /// Bands whose `min` exceeds `max`, by unit label.
    pub fn inverted(&self) -> Vec<&'static str> {
        let mut bad = Vec::new();
        if self.mb.is_some_and(|b| b.min > b.max) {
            bad.push("MB");
        }
        if self.gb.is_some_and(|b| b.min > b.max) {
            bad.push("GB");
        }
        bad
    }
}

/// Parse the first `<number><unit>` in `text`.
///
/// Whitespace runs are collapsed first, so "1.8 \n GB" parses as 1.8 GB.
pub fn parse_size(text: &str) -> Option<ParsedSize> {
    let cleaned = WHITESPACE.replace_all(text, " ");
    let caps = SIZE.captures(&cleaned)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = if caps.get(2)?.as_str().eq_ignore_ascii_case("GB") {
        SizeUnit::Gb
    } else {
        SizeUnit::Mb
    };
    Some(ParsedSize { value, unit })
}

/// Index of the largest candidate inside its unit's band.
///
/// Ties keep the earliest candidate. `None` when nothing qualifies.
pub fn select_candidate<S: AsRef<str>>(texts: &[S], bands: &SizeBands) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, text) in texts.iter().enumerate() {
        let Some(size) = parse_size(text.as_ref()) else {
            continue;
        };
        if !bands.qualifies(&size) {
            continue;
        }
        let mb = size.in_mb();
        if best.map_or(true, |(_, top)| mb > top) {
            best = Some((i, mb));
        }
    }
    best.map(|(i, _)| i)
}
