//! 행 이미지로부터 변경 이벤트 생성

use crate::change_event::{ChangeEvent, ColumnChange, OperationType};
use crate::error::{CdcError, Result};
use crate::events::{CellValue, TableMapData};
use crate::row_identity::identify;
use crate::schema_cache::{positional_name, TableSchema};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 변경 이벤트 빌더
#[derive(Debug, Clone)]
pub struct ChangeEventBuilder {
    tz: FixedOffset,
}

impl Default for ChangeEventBuilder {
    fn default() -> Self {
        // +05:30
        let tz = FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap_or_else(|| Utc.fix());
        ChangeEventBuilder { tz }
    }
}

impl ChangeEventBuilder {
    pub fn new(tz: FixedOffset) -> Self {
        ChangeEventBuilder { tz }
    }

    pub fn insert(
        &self,
        table: &TableMapData,
        schema: Option<&TableSchema>,
        row: &[CellValue],
        event_time: u32,
    ) -> ChangeEvent {
        let mut event = self.base(OperationType::Create, table, schema, row, event_time);
        event.after = Some(named_values(schema, row));
        event
    }

    pub fn delete(
        &self,
        table: &TableMapData,
        schema: Option<&TableSchema>,
        row: &[CellValue],
        event_time: u32,
    ) -> ChangeEvent {
        let mut event = self.base(OperationType::Delete, table, schema, row, event_time);
        event.before = Some(named_values(schema, row));
        event.tombstone = true;
        event
    }

    /// before/after 비교로 UPDATE 이벤트 생성
    ///
    /// 변경 컬럼이 없어도 `changes`는 빈 목록으로 채워집니다.
    pub fn update(
        &self,
        table: &TableMapData,
        schema: Option<&TableSchema>,
        before: &[CellValue],
        after: &[CellValue],
        event_time: u32,
    ) -> Result<ChangeEvent> {
        if before.len() != after.len() {
            return Err(CdcError::InvalidEvent(format!(
                "{}.{} UPDATE 이미지 컬럼 수 불일치: before={} after={}",
                table.database,
                table.table,
                before.len(),
                after.len()
            )));
        }

        let changes = before
            .iter()
            .zip(after)
            .enumerate()
            .filter(|(_, (old, new))| !old.same_as(new))
            .map(|(i, (old, new))| ColumnChange {
                column: column_name(schema, after.len(), i),
                from: old.normalized(),
                to: new.normalized(),
            })
            .collect();

        let mut event = self.base(OperationType::Update, table, schema, after, event_time);
        event.changes = Some(changes);
        Ok(event)
    }

    fn base(
        &self,
        op: OperationType,
        table: &TableMapData,
        schema: Option<&TableSchema>,
        row: &[CellValue],
        event_time: u32,
    ) -> ChangeEvent {
        let identity = identify(schema, row);
        ChangeEvent {
            op,
            timestamp: self.format_time(event_time),
            db: table.database.clone(),
            table: table.table.clone(),
            row_key: identity.key,
            after: None,
            before: None,
            changes: None,
            tombstone: false,
        }
    }

    /// binlog 헤더 시각 (0이면 현재 시각)
    pub fn format_time(&self, event_time: u32) -> String {
        let utc = if event_time == 0 {
            Utc::now()
        } else {
            DateTime::<Utc>::from_timestamp(i64::from(event_time), 0).unwrap_or_else(Utc::now)
        };
        utc.with_timezone(&self.tz).format(TIMESTAMP_FORMAT).to_string()
    }
}

fn column_name(schema: Option<&TableSchema>, arity: usize, index: usize) -> String {
    match schema {
        Some(schema) if schema.column_count() == arity => schema.columns[index].clone(),
        _ => positional_name(index),
    }
}

fn named_values(schema: Option<&TableSchema>, row: &[CellValue]) -> BTreeMap<String, Value> {
    row.iter()
        .enumerate()
        .map(|(i, value)| (column_name(schema, row.len(), i), value.normalized()))
        .collect()
}
