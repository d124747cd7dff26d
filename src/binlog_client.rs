//! MySQL Binlog 복제 세션
//!
//! 바이너리 프로토콜 디코딩은 `mysql_async`의 binlog 스트림이 담당하고,
//! 여기서는 디코딩된 이벤트를 [`BinlogEvent`]로 옮겨 담습니다.

use crate::connection::ConnectionConfig;
use crate::error::{CdcError, Result};
use crate::events::{
    BinlogEvent, BinlogEventData, CellValue, EventHeader, EventType, GtidEventData,
    QueryEventData, RotateEventData, RowsEventData, TableMapData,
};
use crate::offset::StartPosition;
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::StreamExt;
use mysql_async::binlog::events::{EventData, RowsEventData as MyRowsEventData};
use mysql_async::binlog::row::BinlogRow;
use mysql_async::binlog::value::BinlogValue;
use mysql_async::consts::ColumnType;
use mysql_async::prelude::*;
use mysql_async::{BinlogStream, BinlogStreamRequest, Sid, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// 복제 세션을 여는 쪽
#[async_trait]
pub trait ReplicationSource: Send + Sync {
    async fn open(&self, start: &StartPosition) -> Result<Box<dyn ReplicationStream>>;
}

/// 열린 복제 세션
#[async_trait]
pub trait ReplicationStream: Send {
    /// 다음 이벤트 (`None`이면 서버가 스트림을 끝냄)
    async fn next_event(&mut self) -> Result<Option<BinlogEvent>>;

    async fn close(self: Box<Self>) -> Result<()>;
}

/// `mysql_async` 기반 복제 소스
pub struct MySqlReplicationSource {
    config: ConnectionConfig,
    heartbeat_period: Duration,
}

impl MySqlReplicationSource {
    pub fn new(config: ConnectionConfig, heartbeat_period: Duration) -> Self {
        MySqlReplicationSource {
            config,
            heartbeat_period,
        }
    }
}

#[async_trait]
impl ReplicationSource for MySqlReplicationSource {
    async fn open(&self, start: &StartPosition) -> Result<Box<dyn ReplicationStream>> {
        let mut conn = self.config.connect().await?;

        if !self.heartbeat_period.is_zero() {
            // 단위: 나노초
            let period = self.heartbeat_period.as_nanos().min(u128::from(u64::MAX)) as u64;
            conn.query_drop(format!("SET @master_heartbeat_period = {}", period))
                .await?;
        }

        let server_id = self.config.server_id;
        let stream = match start {
            StartPosition::File(pos) => {
                let request = BinlogStreamRequest::new(server_id)
                    .with_filename(pos.filename.as_bytes())
                    .with_pos(pos.position);
                conn.get_binlog_stream(request).await?
            }
            StartPosition::Gtid(set) => {
                let sids = set
                    .members()
                    .iter()
                    .map(|member| {
                        member
                            .parse::<Sid<'static>>()
                            .map_err(|e| CdcError::GtidError(format!("{}: {:?}", member, e)))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let request = BinlogStreamRequest::new(server_id)
                    .with_gtid()
                    .with_gtid_set(sids);
                conn.get_binlog_stream(request).await?
            }
        };

        info!(server_id, start = %start, "복제 스트림 시작");
        Ok(Box::new(MySqlReplicationStream { stream }))
    }
}

struct MySqlReplicationStream {
    stream: BinlogStream,
}

#[async_trait]
impl ReplicationStream for MySqlReplicationStream {
    async fn next_event(&mut self) -> Result<Option<BinlogEvent>> {
        let event = match self.stream.next().await {
            Some(event) => event?,
            None => return Ok(None),
        };

        let header = EventHeader {
            timestamp: event.header().timestamp(),
            server_id: event.header().server_id(),
            next_pos: u64::from(event.header().log_pos()),
        };

        let data = match event.read_data()? {
            Some(data) => convert_event_data(&self.stream, data)?,
            None => BinlogEventData::Other,
        };

        Ok(Some(BinlogEvent { header, data }))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.stream.close().await?;
        debug!("복제 스트림 종료");
        Ok(())
    }
}

fn convert_event_data(stream: &BinlogStream, data: EventData<'_>) -> Result<BinlogEventData> {
    let converted = match data {
        EventData::RotateEvent(rotate) => BinlogEventData::Rotate(RotateEventData {
            next_binlog_name: rotate.name().into_owned(),
            position: rotate.position(),
        }),
        EventData::TableMapEvent(tme) => BinlogEventData::TableMap(TableMapData {
            table_id: tme.table_id(),
            database: tme.database_name().into_owned(),
            table: tme.table_name().into_owned(),
            column_count: tme.columns_count(),
        }),
        EventData::RowsEvent(rows) => convert_rows_event(stream, &rows)?,
        EventData::XidEvent(xid) => BinlogEventData::Xid(xid.xid),
        EventData::QueryEvent(query) => BinlogEventData::Query(QueryEventData {
            schema: query.schema().into_owned(),
            query: query.query().into_owned(),
        }),
        EventData::GtidEvent(gtid) => BinlogEventData::Gtid(GtidEventData {
            gtid: format!(
                "{}:{}",
                uuid::Uuid::from_bytes(gtid.sid()).hyphenated(),
                gtid.gno()
            ),
        }),
        EventData::HeartbeatEvent { .. } => BinlogEventData::Heartbeat,
        _ => BinlogEventData::Other,
    };
    Ok(converted)
}

fn convert_rows_event(stream: &BinlogStream, rows: &MyRowsEventData<'_>) -> Result<BinlogEventData> {
    let table_id = rows.table_id();
    let kind = rows_kind(rows);

    let tme = match stream.get_tme(table_id) {
        Some(tme) => tme,
        None => return Ok(unmapped_rows(kind, table_id)),
    };

    let mut images = Vec::new();
    for row in rows.rows(tme) {
        let (before, after) = row?;
        if let Some(before) = before {
            images.push(convert_row(&before));
        }
        if let Some(after) = after {
            images.push(convert_row(&after));
        }
    }

    Ok(wrap_rows(
        kind,
        RowsEventData {
            table_id,
            rows: images,
        },
    ))
}

/// 테이블 맵 없이 들어온 행 이벤트
///
/// 행을 해석할 수 없으므로 빈 배치로 넘기고 상위에서 건너뜁니다.
fn unmapped_rows(kind: EventType, table_id: u64) -> BinlogEventData {
    warn!(table_id, event = kind.as_str(), "테이블 맵 없는 행 이벤트, 행을 버림");
    wrap_rows(
        kind,
        RowsEventData {
            table_id,
            rows: Vec::new(),
        },
    )
}

fn rows_kind(rows: &MyRowsEventData<'_>) -> EventType {
    match rows {
        MyRowsEventData::WriteRowsEvent(_) | MyRowsEventData::WriteRowsEventV1(_) => {
            EventType::WriteRows
        }
        MyRowsEventData::DeleteRowsEvent(_) | MyRowsEventData::DeleteRowsEventV1(_) => {
            EventType::DeleteRows
        }
        // UPDATE, PARTIAL_UPDATE
        _ => EventType::UpdateRows,
    }
}

fn wrap_rows(kind: EventType, data: RowsEventData) -> BinlogEventData {
    match kind {
        EventType::WriteRows => BinlogEventData::WriteRows(data),
        EventType::DeleteRows => BinlogEventData::DeleteRows(data),
        _ => BinlogEventData::UpdateRows(data),
    }
}

fn convert_row(row: &BinlogRow) -> Vec<CellValue> {
    let columns = row.columns_ref();
    (0..row.len())
        .map(|i| match row.as_ref(i) {
            Some(BinlogValue::Value(value)) => {
                let column_type = columns
                    .get(i)
                    .map(|column| column.column_type())
                    .unwrap_or(ColumnType::MYSQL_TYPE_STRING);
                convert_value(value, column_type)
            }
            // JSON 컬럼은 디버그 표현으로 보존
            Some(other) => CellValue::Text(format!("{:?}", other)),
            None => CellValue::Null,
        })
        .collect()
}

/// mysql 값 → 셀 값
///
/// `DATE`와 자정의 `DATETIME`은 값만으로 구분되지 않으므로 컬럼 타입을 봅니다.
pub fn convert_value(value: &Value, column_type: ColumnType) -> CellValue {
    match value {
        Value::NULL => CellValue::Null,
        Value::Bytes(bytes) => match String::from_utf8(bytes.clone()) {
            Ok(text) => CellValue::Text(text),
            Err(_) => CellValue::Bytes(bytes.clone()),
        },
        Value::Int(i) => CellValue::Int(*i),
        Value::UInt(u) => CellValue::UInt(*u),
        Value::Float(f) => CellValue::Float(f64::from(*f)),
        Value::Double(d) => CellValue::Float(*d),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let date = NaiveDate::from_ymd_opt(i32::from(*year), u32::from(*month), u32::from(*day));
            match date {
                Some(date) if is_date_column(column_type) => CellValue::Date(date),
                Some(date) => match date.and_hms_micro_opt(
                    u32::from(*hour),
                    u32::from(*minute),
                    u32::from(*second),
                    *micros,
                ) {
                    Some(dt) => CellValue::DateTime(dt),
                    None => CellValue::Text(zero_datetime(value, column_type)),
                },
                // 0000-00-00 같은 값
                None => CellValue::Text(zero_datetime(value, column_type)),
            }
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let total_hours = u64::from(*days) * 24 + u64::from(*hours);
            let sign = if *negative { "-" } else { "" };
            let mut text = format!("{}{:02}:{:02}:{:02}", sign, total_hours, minutes, seconds);
            if *micros > 0 {
                text.push_str(&format!(".{:06}", micros));
            }
            CellValue::Time(text)
        }
    }
}

fn is_date_column(column_type: ColumnType) -> bool {
    matches!(
        column_type,
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE
    )
}

fn zero_datetime(value: &Value, column_type: ColumnType) -> String {
    match value {
        Value::Date(y, m, d, _, _, _, _) if is_date_column(column_type) => {
            format!("{:04}-{:02}-{:02}", y, m, d)
        }
        Value::Date(y, m, d, h, mi, s, _) => {
            format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}", y, m, d, h, mi, s)
        }
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    const TEXT: ColumnType = ColumnType::MYSQL_TYPE_VAR_STRING;
    const DATE: ColumnType = ColumnType::MYSQL_TYPE_DATE;
    const DATETIME: ColumnType = ColumnType::MYSQL_TYPE_DATETIME;

    #[test]
    fn test_convert_scalar_values() {
        assert_eq!(convert_value(&Value::NULL, TEXT), CellValue::Null);
        assert_eq!(
            convert_value(&Value::Int(-3), ColumnType::MYSQL_TYPE_LONG),
            CellValue::Int(-3)
        );
        assert_eq!(
            convert_value(&Value::Bytes(b"shipped".to_vec()), TEXT),
            CellValue::Text("shipped".to_string())
        );
        assert_eq!(
            convert_value(&Value::Bytes(vec![0xff, 0xfe]), ColumnType::MYSQL_TYPE_BLOB),
            CellValue::Bytes(vec![0xff, 0xfe])
        );
    }

    #[test]
    fn test_convert_date_and_datetime() {
        assert_eq!(
            convert_value(&Value::Date(2024, 5, 1, 0, 0, 0, 0), DATE),
            CellValue::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
        );
        assert_eq!(
            convert_value(&Value::Date(2024, 5, 1, 10, 30, 0, 0), DATETIME).as_string(),
            "2024-05-01 10:30:00"
        );
        assert_eq!(
            convert_value(&Value::Date(0, 0, 0, 0, 0, 0, 0), DATETIME),
            CellValue::Text("0000-00-00 00:00:00".to_string())
        );
        assert_eq!(
            convert_value(&Value::Date(0, 0, 0, 0, 0, 0, 0), DATE),
            CellValue::Text("0000-00-00".to_string())
        );
    }

    #[test]
    fn test_midnight_keeps_column_type() {
        let midnight = Value::Date(2024, 5, 1, 0, 0, 0, 0);

        assert_eq!(
            convert_value(&midnight, DATE).as_string(),
            "2024-05-01"
        );
        assert_eq!(
            convert_value(&midnight, ColumnType::MYSQL_TYPE_NEWDATE).as_string(),
            "2024-05-01"
        );

        let expected = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(convert_value(&midnight, DATETIME), CellValue::DateTime(expected));
        assert_eq!(
            convert_value(&midnight, ColumnType::MYSQL_TYPE_TIMESTAMP),
            CellValue::DateTime(expected)
        );
        assert_eq!(
            convert_value(&midnight, DATETIME).as_string(),
            "2024-05-01 00:00:00"
        );
    }

    #[test]
    fn test_convert_time() {
        assert_eq!(
            convert_value(&Value::Time(true, 1, 2, 3, 4, 0), ColumnType::MYSQL_TYPE_TIME),
            CellValue::Time("-26:03:04".to_string())
        );
        assert_eq!(
            convert_value(&Value::Time(false, 0, 0, 0, 1, 500), ColumnType::MYSQL_TYPE_TIME),
            CellValue::Time("00:00:01.000500".to_string())
        );
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_unmapped_rows_are_logged_and_emptied() {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let data = tracing::subscriber::with_default(subscriber, || {
            unmapped_rows(EventType::DeleteRows, 77)
        });

        match data {
            BinlogEventData::DeleteRows(rows) => {
                assert_eq!(rows.table_id, 77);
                assert!(rows.rows.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }

        let output = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("WARN"));
        assert!(output.contains("table_id=77"));
        assert!(output.contains("DELETE_ROWS_EVENT"));
    }
}
