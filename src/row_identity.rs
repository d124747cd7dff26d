//! 행 식별자 결정
//!
//! PK를 알면 PK 값, 모르면 전체 컬럼 값의 SHA-256 해시로 행을 식별합니다.
//! 해시 식별은 내용이 완전히 같은 두 행을 구분하지 못합니다.

use crate::change_event::RowKey;
use crate::events::CellValue;
use crate::schema_cache::{positional_name, TableSchema};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// 식별 전략
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    PrimaryKey,
    ContentHash,
}

/// 결정된 행 식별자
#[derive(Debug, Clone, PartialEq)]
pub struct RowIdentity {
    /// 정규 문자열 값
    pub value: String,
    pub strategy: IdStrategy,
    /// 식별에 참여한 컬럼
    pub columns: Vec<String>,
    pub key: RowKey,
}

/// 행 식별자 계산
pub fn identify(schema: Option<&TableSchema>, row: &[CellValue]) -> RowIdentity {
    if let Some(schema) = schema {
        if schema.has_primary_key() && schema.column_count() == row.len() {
            if let Some(identity) = primary_key_identity(schema, row) {
                return identity;
            }
        }
    }
    content_hash_identity(schema, row)
}

fn primary_key_identity(schema: &TableSchema, row: &[CellValue]) -> Option<RowIdentity> {
    let mut values = BTreeMap::new();
    for column in &schema.primary_key {
        let index = *schema.column_index.get(column)?;
        values.insert(column.clone(), row.get(index)?.normalized());
    }

    let key = if schema.primary_key.len() == 1 {
        let value = values.into_values().next()?;
        RowKey::Scalar(value)
    } else {
        RowKey::Composite(values)
    };

    Some(RowIdentity {
        value: key.canonical(),
        strategy: IdStrategy::PrimaryKey,
        columns: schema.primary_key.clone(),
        key,
    })
}

fn content_hash_identity(schema: Option<&TableSchema>, row: &[CellValue]) -> RowIdentity {
    let columns: Vec<String> = match schema {
        Some(schema) if schema.column_count() == row.len() => schema.columns.clone(),
        _ => (0..row.len()).map(positional_name).collect(),
    };

    let joined = row
        .iter()
        .map(hash_input)
        .collect::<Vec<_>>()
        .join("|");
    let value = content_hash(&joined);

    RowIdentity {
        key: RowKey::Scalar(serde_json::Value::String(value.clone())),
        value,
        strategy: IdStrategy::ContentHash,
        columns,
    }
}

/// 해시 입력에서 NULL 표기. 문자열 `"NULL"`과 달라야 함
const NULL_MARKER: &str = "\0";

fn hash_input(value: &CellValue) -> String {
    if value.is_null() {
        NULL_MARKER.to_string()
    } else {
        value.as_string()
    }
}

/// SHA-256 앞 8바이트를 16자리 hex로
fn content_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}
