// ze-gdbserver - remote debug stub for Intel GPU compute devices
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Thread/SIMD-lane range grammar:
//! `[inferior.]thread[:lane]`, whitespace-separated, with `a-b` ranges and
//! a `*` SIMD-lane wildcard.

use crate::error::TargetError;
use std::collections::VecDeque;

/// Sentinel meaning "no lane was specified" for this tuple.
pub const NO_LANE: i32 = -1;

const MAX_LANE: i32 = 31;

#[derive(Debug, Clone)]
struct TokenRanges {
    inferior: u32,
    thread_start: u32,
    thread_end: u32,
    lanes: Vec<i32>,
}

fn parse_u32_strict(s: &str) -> Result<u32, TargetError> {
    s.parse::<u32>()
        .map_err(|_| TargetError::MalformedThreadId(s.to_string()))
}

fn parse_token(
    tok: &str,
    default_inferior: u32,
    default_thread: Option<u32>,
) -> Result<TokenRanges, TargetError> {
    if tok.is_empty() {
        return Err(TargetError::MalformedThreadId(tok.to_string()));
    }

    let (addr_part, lane_part) = match tok.split_once(':') {
        Some((a, l)) => (a, Some(l)),
        None => (tok, None),
    };

    let (inf_str, thr_str) = match addr_part.split_once('.') {
        Some((i, t)) => (Some(i), t),
        None => (None, addr_part),
    };

    let inferior = match inf_str {
        Some(s) => {
            let v = parse_u32_strict(s)?;
            if v == 0 {
                return Err(TargetError::MalformedThreadId(tok.to_string()));
            }
            v
        }
        None => default_inferior,
    };

    let (thread_start, thread_end) = if thr_str.is_empty() {
        let default = default_thread
            .filter(|_| lane_part.is_some())
            .ok_or_else(|| TargetError::MalformedThreadId(tok.to_string()))?;
        (default, default)
    } else if let Some((a, b)) = thr_str.split_once('-') {
        let a = parse_u32_strict(a)?;
        let b = parse_u32_strict(b)?;
        if a == 0 || b == 0 || a > b {
            return Err(TargetError::MalformedThreadId(tok.to_string()));
        }
        (a, b)
    } else {
        let v = parse_u32_strict(thr_str)?;
        if v == 0 {
            return Err(TargetError::MalformedThreadId(tok.to_string()));
        }
        (v, v)
    };

    let lanes = match lane_part {
        None => vec![NO_LANE],
        Some("*") => (0..=MAX_LANE).collect(),
        Some(spec) => {
            if let Some((a, b)) = spec.split_once('-') {
                let a: i32 = a
                    .parse()
                    .map_err(|_| TargetError::MalformedThreadId(tok.to_string()))?;
                let b: i32 = b
                    .parse()
                    .map_err(|_| TargetError::MalformedThreadId(tok.to_string()))?;
                if a < 0 || b < 0 || a > b {
                    return Err(TargetError::MalformedThreadId(tok.to_string()));
                }
                if b > MAX_LANE {
                    return Err(TargetError::LaneOutOfRange(b as u32));
                }
                (a..=b).collect()
            } else {
                let v: i32 = spec
                    .parse()
                    .map_err(|_| TargetError::MalformedThreadId(tok.to_string()))?;
                if v < 0 {
                    return Err(TargetError::MalformedThreadId(tok.to_string()));
                }
                if v > MAX_LANE {
                    return Err(TargetError::LaneOutOfRange(v as u32));
                }
                vec![v]
            }
        }
    };

    Ok(TokenRanges {
        inferior,
        thread_start,
        thread_end,
        lanes,
    })
}

/// Iterative parser over a thread/lane list. Each call to [`next`] returns
/// one concrete `(inferior, thread, lane)` tuple, re-iterating the SIMD
/// lane sub-range for every thread in a thread range.
pub struct TidParser<'a> {
    tokens: std::str::SplitWhitespace<'a>,
    default_inferior: u32,
    default_thread: Option<u32>,
    pending: VecDeque<(u32, u32, i32)>,
}

impl<'a> TidParser<'a> {
    pub fn new(input: &'a str, default_inferior: u32, default_thread: Option<u32>) -> Self {
        Self {
            tokens: input.split_whitespace(),
            default_inferior,
            default_thread,
            pending: VecDeque::new(),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Result<(u32, u32, i32), TargetError>> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(Ok(item));
            }
            let tok = self.tokens.next()?;
            match parse_token(tok, self.default_inferior, self.default_thread) {
                Ok(ranges) => {
                    for thr in ranges.thread_start..=ranges.thread_end {
                        for &lane in &ranges.lanes {
                            self.pending.push_back((ranges.inferior, thr, lane));
                        }
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// One `(inferior, thread_start, thread_end)` range, used by
/// [`tid_is_in_list`] for breakpoint "thread=..." filtering without
/// expanding every concrete tuple.
#[derive(Debug, Clone, Copy)]
pub struct TidRange {
    pub inferior: u32,
    pub thread_start: u32,
    pub thread_end: u32,
}

fn parse_range_list(list: &str, default_inferior: u32) -> Result<Vec<TidRange>, TargetError> {
    list.split_whitespace()
        .map(|tok| {
            parse_token(tok, default_inferior, None).map(|r| TidRange {
                inferior: r.inferior,
                thread_start: r.thread_start,
                thread_end: r.thread_end,
            })
        })
        .collect()
}

/// `tid_is_in_list`: an empty list matches everything;
/// otherwise containment is checked against the parsed ranges.
pub fn tid_is_in_list(
    list: &str,
    default_inferior: u32,
    inferior: u32,
    thread: u32,
) -> Result<bool, TargetError> {
    if list.trim().is_empty() {
        return Ok(true);
    }
    let ranges = parse_range_list(list, default_inferior)?;
    Ok(ranges
        .iter()
        .any(|r| r.inferior == inferior && thread >= r.thread_start && thread <= r.thread_end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(input: &str, default_inferior: u32, default_thread: Option<u32>) -> Vec<(u32, u32, i32)> {
        let mut p = TidParser::new(input, default_inferior, default_thread);
        let mut out = Vec::new();
        while let Some(item) = p.next() {
            out.push(item.unwrap());
        }
        out
    }

    #[test]
    fn scenario_parse_mixed_list() {
        let mut items = collect("1.2 3.4-6:3-4", 1, None);
        items.sort();
        let mut expected = vec![
            (1, 2, NO_LANE),
            (3, 4, 3),
            (3, 4, 4),
            (3, 5, 3),
            (3, 5, 4),
            (3, 6, 3),
            (3, 6, 4),
        ];
        expected.sort();
        assert_eq!(items, expected);
    }

    #[test]
    fn lane_31_accepted_32_rejected() {
        assert_eq!(collect("1.1:31", 1, None), vec![(1, 1, 31)]);
        let mut p = TidParser::new("1.1:32", 1, None);
        assert!(matches!(
            p.next(),
            Some(Err(TargetError::LaneOutOfRange(32)))
        ));
    }

    #[test]
    fn thread_zero_rejected() {
        let mut p = TidParser::new("1.0", 1, None);
        assert!(p.next().unwrap().is_err());
        let mut p = TidParser::new("0.1", 1, None);
        assert!(p.next().unwrap().is_err());
    }

    #[test]
    fn missing_thread_requires_default_and_lane() {
        assert_eq!(collect(":3", 1, Some(7)), vec![(1, 7, 3)]);
        let mut p = TidParser::new(":3", 1, None);
        assert!(p.next().unwrap().is_err());
        let mut p = TidParser::new("1.", 1, Some(7));
        assert!(p.next().unwrap().is_err());
    }

    #[test]
    fn empty_list_matches_everything() {
        assert!(tid_is_in_list("", 1, 5, 9).unwrap());
        assert!(tid_is_in_list("   ", 1, 5, 9).unwrap());
    }

    #[test]
    fn list_containment() {
        assert!(tid_is_in_list("3.4-6", 1, 3, 5).unwrap());
        assert!(!tid_is_in_list("3.4-6", 1, 3, 7).unwrap());
        assert!(!tid_is_in_list("3.4-6", 1, 2, 5).unwrap());
    }
}
