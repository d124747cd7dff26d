//! 복제 스트림에서 디코딩된 이벤트 타입 및 셀 값 정의
//!
//! 바이너리 프로토콜 디코딩은 상위 복제 라이브러리(`mysql_async`)가 담당하며,
//! 여기서는 이미 파싱된 이벤트를 파이프라인이 다루는 형태로 표현합니다.

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Binlog 이벤트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Unknown,
    Rotate,
    TableMap,
    WriteRows,
    UpdateRows,
    DeleteRows,
    Gtid,
    Xid,
    Query,
    Heartbeat,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Unknown => "UNKNOWN",
            EventType::Rotate => "ROTATE_EVENT",
            EventType::TableMap => "TABLE_MAP_EVENT",
            EventType::WriteRows => "WRITE_ROWS_EVENT",
            EventType::UpdateRows => "UPDATE_ROWS_EVENT",
            EventType::DeleteRows => "DELETE_ROWS_EVENT",
            EventType::Gtid => "GTID_EVENT",
            EventType::Xid => "XID_EVENT",
            EventType::Query => "QUERY_EVENT",
            EventType::Heartbeat => "HEARTBEAT_EVENT",
        }
    }
}

/// Binlog 이벤트 헤더
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventHeader {
    /// 이벤트 타임스탬프 (초 단위, 0이면 알 수 없음)
    pub timestamp: u32,
    /// MySQL 서버 ID
    pub server_id: u32,
    /// 다음 이벤트 위치
    pub next_pos: u64,
}

/// 테이블 맵 정보
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMapData {
    /// 테이블 ID
    pub table_id: u64,
    /// 데이터베이스명
    pub database: String,
    /// 테이블명
    pub table: String,
    /// 컬럼 개수
    pub column_count: u64,
}

/// 행 이벤트 데이터 (INSERT / UPDATE / DELETE 공통)
///
/// UPDATE의 경우 `rows`는 (before, after) 이미지가 번갈아 나열됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowsEventData {
    /// 테이블 ID
    pub table_id: u64,
    /// 행 이미지들
    pub rows: Vec<Vec<CellValue>>,
}

/// 회전 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotateEventData {
    /// 새 바이너리 로그 파일명
    pub next_binlog_name: String,
    /// 새 파일의 시작 위치
    pub position: u64,
}

/// GTID 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtidEventData {
    /// GTID 문자열 (format: uuid:sequence-number)
    pub gtid: String,
}

/// 쿼리 이벤트 데이터 (BEGIN, COMMIT, DDL 등)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryEventData {
    /// 기본 스키마
    pub schema: String,
    pub query: String,
}

impl QueryEventData {
    /// 트랜잭션을 끝내는 쿼리인지
    ///
    /// XID 없이 끝나는 트랜잭션(비트랜잭션 테이블의 `COMMIT`, DDL)도
    /// 여기서 커밋 경계가 됩니다. 트랜잭션을 여는 쿼리만 제외합니다.
    pub fn ends_transaction(&self) -> bool {
        let upper = self.query.trim_start().to_ascii_uppercase();
        let opens = ["BEGIN", "XA START", "XA BEGIN", "XA END", "SAVEPOINT"];
        !upper.is_empty() && !opens.iter().any(|prefix| upper.starts_with(prefix))
    }
}

/// 디코딩된 Binlog 이벤트 본문
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BinlogEventData {
    Rotate(RotateEventData),
    TableMap(TableMapData),
    WriteRows(RowsEventData),
    UpdateRows(RowsEventData),
    DeleteRows(RowsEventData),
    Gtid(GtidEventData),
    /// 트랜잭션 커밋
    Xid(u64),
    Query(QueryEventData),
    Heartbeat,
    Other,
}

impl BinlogEventData {
    pub fn event_type(&self) -> EventType {
        match self {
            BinlogEventData::Rotate(_) => EventType::Rotate,
            BinlogEventData::TableMap(_) => EventType::TableMap,
            BinlogEventData::WriteRows(_) => EventType::WriteRows,
            BinlogEventData::UpdateRows(_) => EventType::UpdateRows,
            BinlogEventData::DeleteRows(_) => EventType::DeleteRows,
            BinlogEventData::Gtid(_) => EventType::Gtid,
            BinlogEventData::Xid(_) => EventType::Xid,
            BinlogEventData::Query(_) => EventType::Query,
            BinlogEventData::Heartbeat => EventType::Heartbeat,
            BinlogEventData::Other => EventType::Unknown,
        }
    }
}

/// 완성된 Binlog 이벤트
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinlogEvent {
    pub header: EventHeader,
    pub data: BinlogEventData,
}

/// 셀 값
///
/// 컬럼 값은 이 닫힌 타입으로만 표현합니다. 비교와 직렬화 모두
/// [`CellValue::normalized`]를 거치므로 `Bytes(b"a")`와 `Text("a")`는 같은 값입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    /// `[-]HH:MM:SS[.ffffff]` 형태로 보존
    Time(String),
}

impl CellValue {
    /// 정규화된 JSON 값
    pub fn normalized(&self) -> Value {
        match self {
            CellValue::Null => Value::Null,
            CellValue::Bool(b) => Value::Bool(*b),
            CellValue::Int(i) => Value::from(*i),
            CellValue::UInt(u) => Value::from(*u),
            CellValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            CellValue::Text(s) => Value::String(s.clone()),
            CellValue::Bytes(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
            CellValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            CellValue::DateTime(dt) => Value::String(format_datetime(dt)),
            CellValue::Time(t) => Value::String(t.clone()),
        }
    }

    /// 정규화 기준 동등 비교
    pub fn same_as(&self, other: &CellValue) -> bool {
        self.normalized() == other.normalized()
    }

    /// 해시/식별자용 문자열 표현
    pub fn as_string(&self) -> String {
        match self.normalized() {
            Value::Null => "NULL".to_string(),
            Value::String(s) => s,
            other => other.to_string(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<i64> for CellValue {
    fn from(i: i64) -> Self {
        CellValue::Int(i)
    }
}

fn format_datetime(dt: &NaiveDateTime) -> String {
    if dt.nanosecond() == 0 {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
    }
}
