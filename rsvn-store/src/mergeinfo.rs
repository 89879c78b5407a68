//! Merge-tracking metadata (`svn:mergeinfo` property values)
//!
//! A mergeinfo value maps absolute merge-source paths to revision range
//! lists, serialized one source per line as `/path:1-5,8,10-20`. Range
//! starts are exclusive: the textual range `5-9` covers revisions 5
//! through 9 but is stored as `start: 4, end: 9`. A trailing `*` marks a
//! range as non-inheritable.
//!
//! The loader rewrites these values when revisions are renumbered, which
//! needs parse/serialize plus range-level filtering, offset adjustment
//! and merging.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::{Error, Result};
use crate::store::Revnum;

/// One merged revision range, covering revisions `start + 1 ..= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeRange {
    /// Exclusive lower bound.
    pub start: Revnum,
    /// Inclusive upper bound. Always greater than `start`.
    pub end: Revnum,
    /// Whether the range applies to a path's children as well.
    pub inheritable: bool,
}

impl MergeRange {
    pub fn new(start: Revnum, end: Revnum) -> Self {
        Self {
            start,
            end,
            inheritable: true,
        }
    }
}

pub type RangeList = Vec<MergeRange>;

/// Merge-source path -> range list. A `BTreeMap` keeps serialization
/// sorted by source path.
pub type Mergeinfo = BTreeMap<String, RangeList>;

/// Parse a property value into structured mergeinfo.
pub fn parse(input: &str) -> Result<Mergeinfo> {
    let mut mergeinfo = Mergeinfo::new();
    for line in input.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let (path, ranges) = line
            .rsplit_once(':')
            .ok_or_else(|| Error::malformed(format!("mergeinfo line lacks a colon: '{line}'")))?;
        if path.is_empty() {
            return Err(Error::malformed("mergeinfo line has an empty merge source"));
        }
        let mut rangelist = RangeList::new();
        for token in ranges.split(',') {
            if token.is_empty() {
                continue;
            }
            rangelist.push(parse_range(token)?);
        }
        rangelist.sort_by_key(|r| (r.start, r.end));
        mergeinfo.insert(path.to_string(), rangelist);
    }
    Ok(mergeinfo)
}

fn parse_range(token: &str) -> Result<MergeRange> {
    let (token, inheritable) = match token.strip_suffix('*') {
        Some(rest) => (rest, false),
        None => (token, true),
    };
    let bad = || Error::malformed(format!("invalid mergeinfo revision range: '{token}'"));
    let (low, high) = match token.split_once('-') {
        Some((a, b)) => (
            a.parse::<Revnum>().map_err(|_| bad())?,
            b.parse::<Revnum>().map_err(|_| bad())?,
        ),
        None => {
            let rev = token.parse::<Revnum>().map_err(|_| bad())?;
            (rev, rev)
        }
    };
    if low == 0 || high < low {
        return Err(bad());
    }
    Ok(MergeRange {
        start: low - 1,
        end: high,
        inheritable,
    })
}

/// Serialize mergeinfo back to property-value form. Sources appear in
/// sorted order, one per line, with no trailing newline.
pub fn to_string(mergeinfo: &Mergeinfo) -> String {
    let mut out = String::new();
    for (i, (path, rangelist)) in mergeinfo.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(path);
        out.push(':');
        for (j, range) in rangelist.iter().enumerate() {
            if j > 0 {
                out.push(',');
            }
            if range.start + 1 == range.end {
                let _ = write!(out, "{}", range.end);
            } else {
                let _ = write!(out, "{}-{}", range.start + 1, range.end);
            }
            if !range.inheritable {
                out.push('*');
            }
        }
    }
    out
}

/// Keep (`include` true) or remove (`include` false) the portions of each
/// range list that intersect the revision interval with exclusive lower
/// bound `oldest` and inclusive upper bound `youngest`. Ranges straddling
/// the boundary are split. Sources left with no ranges are dropped.
pub fn filter_by_range(
    mergeinfo: &Mergeinfo,
    youngest: Revnum,
    oldest: Revnum,
    include: bool,
) -> Mergeinfo {
    let mut filtered = Mergeinfo::new();
    for (path, rangelist) in mergeinfo {
        let mut kept = RangeList::new();
        for range in rangelist {
            if include {
                let start = range.start.max(oldest);
                let end = range.end.min(youngest);
                if start < end {
                    kept.push(MergeRange {
                        start,
                        end,
                        inheritable: range.inheritable,
                    });
                }
            } else {
                // Portion below the interval.
                if range.start < oldest {
                    kept.push(MergeRange {
                        start: range.start,
                        end: range.end.min(oldest),
                        inheritable: range.inheritable,
                    });
                }
                // Portion above the interval.
                if range.end > youngest {
                    kept.push(MergeRange {
                        start: range.start.max(youngest),
                        end: range.end,
                        inheritable: range.inheritable,
                    });
                }
            }
        }
        if !kept.is_empty() {
            filtered.insert(path.clone(), kept);
        }
    }
    filtered
}

/// Shift every range by `offset`. Ranges pushed wholly at or below
/// revision zero are dropped; a straddling range is clamped at zero.
pub fn adjust(mergeinfo: &Mergeinfo, offset: i64) -> Mergeinfo {
    let mut adjusted = Mergeinfo::new();
    for (path, rangelist) in mergeinfo {
        let mut shifted = RangeList::new();
        for range in rangelist {
            let end = range.end as i64 + offset;
            if end <= 0 {
                continue;
            }
            let start = (range.start as i64 + offset).max(0);
            shifted.push(MergeRange {
                start: start as Revnum,
                end: end as Revnum,
                inheritable: range.inheritable,
            });
        }
        if !shifted.is_empty() {
            adjusted.insert(path.clone(), shifted);
        }
    }
    adjusted
}

/// Merge `other` into `mergeinfo`, unioning range lists per source and
/// normalizing the result.
pub fn merge(mergeinfo: &mut Mergeinfo, other: Mergeinfo) {
    for (path, rangelist) in other {
        mergeinfo.entry(path).or_default().extend(rangelist);
    }
    sort(mergeinfo);
}

/// Sort every range list and combine overlapping or adjacent ranges that
/// share an inheritability flag.
pub fn sort(mergeinfo: &mut Mergeinfo) {
    for rangelist in mergeinfo.values_mut() {
        rangelist.sort_by_key(|r| (r.start, r.end));
        let mut combined = RangeList::with_capacity(rangelist.len());
        for range in rangelist.drain(..) {
            match combined.last_mut() {
                Some(last)
                    if last.inheritable == range.inheritable && range.start <= last.end =>
                {
                    last.end = last.end.max(range.end);
                }
                _ => combined.push(range),
            }
        }
        *rangelist = combined;
    }
}
