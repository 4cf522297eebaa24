//! Temporal normalizer — locale-mixed date/time text to an absolute instant.
//!
//! Announcement dates arrive as anything from `２０２５／０７／３０` to
//! `7月30日 19時` to a complete `2025-07-30 20:00`. Normalization is an
//! ordered chain of pure passes; the order is a contract:
//! full-width folding must run before any ASCII pattern matching, and
//! separator folding must run before the 4-digit year detection (which
//! looks for a digit run bounded by `-`).
//!
//! A timestamp in the past is NOT rejected here — staleness policy lives
//! in the scheduler. This keeps the normalizer side-effect free.

use std::sync::LazyLock;

use chrono::{NaiveDateTime, NaiveTime};
use regex::Regex;

use crate::error::TemporalError;

/// `H:MM` / `HH:MM` shaped substring.
static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{1,2}:\d{2}").expect("valid time regex"));

/// Four-digit year run bounded by a date separator.
static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-").expect("valid year regex"));

/// Normalizes raw date/time text using a configured fallback time-of-day.
#[derive(Debug, Clone)]
pub struct TemporalNormalizer {
    fallback_time: NaiveTime,
}

impl TemporalNormalizer {
    pub fn new(fallback_time: NaiveTime) -> Self {
        Self { fallback_time }
    }

    /// Normalize `raw` into a local wall-clock timestamp.
    ///
    /// A year-less date resolves to `reference_year`; a time-less date
    /// gets the fallback time appended.
    pub fn normalize(
        &self,
        raw: &str,
        reference_year: i32,
    ) -> Result<NaiveDateTime, TemporalError> {
        let mut canonical = fold_whitespace(&fold_separators(&fold_full_width(raw)));

        if !TIME_RE.is_match(&canonical) {
            canonical = format!("{canonical} {}", self.fallback_time.format("%H:%M"));
        }

        if !YEAR_RE.is_match(&canonical) {
            canonical = format!("{reference_year}-{canonical}");
        }

        parse_canonical(&canonical).ok_or_else(|| TemporalError::Unparseable {
            input: raw.to_string(),
        })
    }
}

impl Default for TemporalNormalizer {
    fn default() -> Self {
        Self::new(NaiveTime::from_hms_opt(20, 0, 0).expect("valid constant time"))
    }
}

/// Pass 1: map full-width digits (U+FF10–U+FF19) to ASCII by fixed offset.
pub fn fold_full_width(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '\u{FF10}'..='\u{FF19}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
            _ => c,
        })
        .collect()
}

/// Pass 2: fold date/time separators into the canonical `-` / `:` forms.
///
/// `／`, `/`, `.`, `年`, `月` become `-`; `日` and `分` are stripped;
/// `時` becomes `:`.
pub fn fold_separators(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '／' | '/' | '.' | '年' | '月' => out.push('-'),
            '日' | '分' => {}
            '時' => out.push(':'),
            _ => out.push(c),
        }
    }
    out
}

/// Pass 3: collapse whitespace runs (including U+3000) to a single space
/// and trim.
pub fn fold_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_canonical(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .ok()
}
