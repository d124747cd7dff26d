//! GTID (Global Transaction ID) 집합 관리
//!
//! GTID 형식: `UUID:sequence-number`
//! 집합 형식은 서버의 `gtid_executed`와 동일합니다: "uuid1:1-100:200,uuid2:1-50"

use crate::error::{CdcError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// GTID 범위 (양 끝 포함)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GtidRange {
    pub start: u64,
    pub end: u64,
}

impl GtidRange {
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start == 0 || start > end {
            return Err(CdcError::GtidError(format!(
                "잘못된 GTID 범위: {}-{}",
                start, end
            )));
        }
        Ok(GtidRange { start, end })
    }

    pub fn contains(&self, value: u64) -> bool {
        value >= self.start && value <= self.end
    }
}

impl fmt::Display for GtidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// 서버 UUID별 실행 범위 집합
///
/// 범위는 항상 정렬되어 있고 서로 겹치거나 맞닿지 않습니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GtidSet {
    sets: BTreeMap<String, Vec<GtidRange>>,
}

impl GtidSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// `gtid_executed` 형식 문자열 파싱
    pub fn parse(gtid_str: &str) -> Result<Self> {
        let mut gtid_set = GtidSet::new();
        let compact: String = gtid_str.chars().filter(|c| !c.is_whitespace()).collect();

        if compact.is_empty() || compact.eq_ignore_ascii_case("NULL") {
            return Ok(gtid_set);
        }

        for member in compact.split(',').filter(|m| !m.is_empty()) {
            let mut parts = member.split(':');
            let uuid = parts
                .next()
                .filter(|u| !u.is_empty())
                .ok_or_else(|| CdcError::GtidError(format!("UUID 누락: {}", member)))?
                .to_lowercase();

            let mut has_interval = false;
            for interval in parts {
                let range = parse_interval(interval)?;
                gtid_set.insert_range(&uuid, range);
                has_interval = true;
            }

            if !has_interval {
                return Err(CdcError::GtidError(format!("구간 누락: {}", member)));
            }
        }

        Ok(gtid_set)
    }

    /// 단일 GTID (`uuid:seq`) 추가
    pub fn add_gtid(&mut self, gtid: &str) -> Result<()> {
        let (uuid, sequence) = split_gtid(gtid)?;
        self.insert_range(&uuid, GtidRange::new(sequence, sequence)?);
        Ok(())
    }

    pub fn contains(&self, gtid: &str) -> bool {
        match split_gtid(gtid) {
            Ok((uuid, sequence)) => self
                .sets
                .get(&uuid)
                .map(|ranges| ranges.iter().any(|r| r.contains(sequence)))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sets.values().all(|ranges| ranges.is_empty())
    }

    /// UUID별 `uuid:range:range` 문자열
    pub fn members(&self) -> Vec<String> {
        self.sets
            .iter()
            .filter(|(_, ranges)| !ranges.is_empty())
            .map(|(uuid, ranges)| {
                let ranges: Vec<String> = ranges.iter().map(|r| r.to_string()).collect();
                format!("{}:{}", uuid, ranges.join(":"))
            })
            .collect()
    }

    fn insert_range(&mut self, uuid: &str, range: GtidRange) {
        let ranges = self.sets.entry(uuid.to_string()).or_default();
        ranges.push(range);
        ranges.sort();

        // 겹치거나 연속된 범위 병합
        let mut merged: Vec<GtidRange> = Vec::with_capacity(ranges.len());
        for r in ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if r.start <= last.end.saturating_add(1) => {
                    last.end = last.end.max(r.end);
                }
                _ => merged.push(r),
            }
        }
        *ranges = merged;
    }
}

impl fmt::Display for GtidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.members().join(","))
    }
}

impl FromStr for GtidSet {
    type Err = CdcError;

    fn from_str(s: &str) -> Result<Self> {
        GtidSet::parse(s)
    }
}

fn parse_interval(interval: &str) -> Result<GtidRange> {
    let invalid = || CdcError::GtidError(format!("잘못된 구간: {}", interval));

    match interval.split_once('-') {
        Some((start, end)) => {
            let start = start.parse::<u64>().map_err(|_| invalid())?;
            let end = end.parse::<u64>().map_err(|_| invalid())?;
            GtidRange::new(start, end)
        }
        None => {
            let seq = interval.parse::<u64>().map_err(|_| invalid())?;
            GtidRange::new(seq, seq)
        }
    }
}

fn split_gtid(gtid: &str) -> Result<(String, u64)> {
    let (uuid, sequence) = gtid
        .trim()
        .split_once(':')
        .ok_or_else(|| CdcError::GtidError(format!("잘못된 GTID 형식: {}", gtid)))?;
    let sequence = sequence
        .parse::<u64>()
        .map_err(|_| CdcError::GtidError(format!("잘못된 시퀀스: {}", sequence)))?;
    Ok((uuid.to_lowercase(), sequence))
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID_A: &str = "550e8400-e29b-41d4-a716-446655440000";
    const UUID_B: &str = "3e11fa47-71ca-11e1-9e33-c80aa9429562";

    #[test]
    fn test_gtid_parse() {
        let gtid_str = format!("{}:1-100:200:300-400,\n{}:1-5", UUID_A, UUID_B);
        let gtid_set = GtidSet::parse(&gtid_str).unwrap();

        assert!(gtid_set.contains(&format!("{}:50", UUID_A)));
        assert!(gtid_set.contains(&format!("{}:200", UUID_A)));
        assert!(!gtid_set.contains(&format!("{}:201", UUID_A)));
        assert!(gtid_set.contains(&format!("{}:5", UUID_B)));
        assert_eq!(gtid_set.members().len(), 2);
    }

    #[test]
    fn test_gtid_parse_empty_and_invalid() {
        assert!(GtidSet::parse("").unwrap().is_empty());
        assert!(GtidSet::parse("NULL").unwrap().is_empty());
        assert!(GtidSet::parse(&format!("{}:5-1", UUID_A)).is_err());
        assert!(GtidSet::parse(UUID_A).is_err());
    }

    #[test]
    fn test_gtid_contains() {
        let mut gtid_set = GtidSet::new();
        gtid_set.add_gtid(&format!("{}:50", UUID_A)).unwrap();
        assert!(gtid_set.contains(&format!("{}:50", UUID_A)));
        assert!(!gtid_set.contains(&format!("{}:51", UUID_A)));
        assert!(!gtid_set.contains("garbage"));
    }

    #[test]
    fn test_add_gtid_merges_adjacent() {
        let mut gtid_set = GtidSet::parse(&format!("{}:1-3:5", UUID_A)).unwrap();
        gtid_set.add_gtid(&format!("{}:4", UUID_A)).unwrap();
        assert_eq!(gtid_set.to_string(), format!("{}:1-5", UUID_A));
    }

    #[test]
    fn test_display_round_trip() {
        let text = format!("{}:1-5:7,{}:1-100:200", UUID_B, UUID_A);
        let parsed: GtidSet = text.parse().unwrap();
        let again = GtidSet::parse(&parsed.to_string()).unwrap();
        assert_eq!(parsed, again);
    }
}
