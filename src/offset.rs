//! Binlog 처리 위치 추적
//!
//! 파일명 + 위치 또는 GTID 집합으로 재시작 지점을 표현합니다.
//! 예: "mysql-bin.000003" 파일의 4097 바이트 위치

use crate::gtid::GtidSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// MySQL binlog은 4 바이트 매직 헤더 다음부터 이벤트가 시작
pub const BINLOG_START_POSITION: u64 = 4;

/// Binlog 파일 위치 정보
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BinlogPosition {
    /// 바이너리 로그 파일명 (e.g., "mysql-bin.000001")
    pub filename: String,
    /// 바이트 위치
    pub position: u64,
}

impl BinlogPosition {
    pub fn new(filename: impl Into<String>, position: u64) -> Self {
        BinlogPosition {
            filename: filename.into(),
            position,
        }
    }

    /// 파일명에서 시퀀스 번호 추출
    pub fn file_sequence(&self) -> Option<u64> {
        self.filename
            .rsplit('.')
            .next()
            .and_then(|s| s.parse().ok())
    }
}

impl fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filename, self.position)
    }
}

/// 복제 스트림 시작 지점
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartPosition {
    File(BinlogPosition),
    /// 이미 실행된 GTID 집합 이후부터
    Gtid(GtidSet),
}

impl fmt::Display for StartPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartPosition::File(pos) => write!(f, "{}", pos),
            StartPosition::Gtid(set) if set.is_empty() => f.write_str("gtid:<empty>"),
            StartPosition::Gtid(set) => write!(f, "gtid:{}", set),
        }
    }
}

/// 커밋된 처리 위치 (재연결/재시작 시 재개 지점)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BinlogOffset {
    /// 마지막으로 커밋된 파일 위치
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<BinlogPosition>,
    /// 커밋된 GTID 집합 (문자열 형태로 저장)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gtid_set: String,
}

impl BinlogOffset {
    pub fn from_position(position: BinlogPosition) -> Self {
        BinlogOffset {
            position: Some(position),
            gtid_set: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.position.is_none() && self.gtid_set.is_empty()
    }

    /// GTID 모드 여부에 맞는 시작 지점으로 변환
    ///
    /// 저장된 값이 해당 모드에 쓸 수 없으면 `None`.
    pub fn start_position(&self, use_gtid: bool) -> Option<StartPosition> {
        if use_gtid {
            if self.gtid_set.is_empty() {
                return None;
            }
            GtidSet::parse(&self.gtid_set).ok().map(StartPosition::Gtid)
        } else {
            self.position.clone().map(StartPosition::File)
        }
    }
}

/// CDC 처리 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingState {
    /// 연결 시도 중
    Connecting,
    /// 스트리밍 처리 중
    Streaming,
    /// 재연결 대기 중
    Reconnecting,
    /// 중단됨
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binlog_position_parse() {
        let pos = BinlogPosition::new("mysql-bin.000123", 4096);
        assert_eq!(pos.file_sequence(), Some(123));
        assert_eq!(pos.to_string(), "mysql-bin.000123:4096");
    }

    #[test]
    fn test_offset_start_position_by_mode() {
        let offset = BinlogOffset::from_position(BinlogPosition::new("mysql-bin.000002", 120));
        assert_eq!(
            offset.start_position(false),
            Some(StartPosition::File(BinlogPosition::new(
                "mysql-bin.000002",
                120
            )))
        );
        assert_eq!(offset.start_position(true), None);

        let offset = BinlogOffset {
            position: None,
            gtid_set: "550e8400-e29b-41d4-a716-446655440000:1-9".to_string(),
        };
        assert!(matches!(
            offset.start_position(true),
            Some(StartPosition::Gtid(_))
        ));
        assert_eq!(offset.start_position(false), None);
    }

    #[test]
    fn test_offset_json_skips_empty_fields() {
        let offset = BinlogOffset::from_position(BinlogPosition::new("mysql-bin.000001", 4));
        let json = serde_json::to_value(&offset).unwrap();
        assert_eq!(json["position"]["filename"], "mysql-bin.000001");
        assert!(json.get("gtid_set").is_none());
        assert!(BinlogOffset::default().is_empty());
    }
}
