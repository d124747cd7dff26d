//! 변경 이벤트 문서 (프로듀서와 컨슈머가 공유하는 와이어 포맷)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// 변경 연산 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 행 식별 키
///
/// 단일 PK 또는 콘텐츠 해시는 스칼라, 복합 PK는 컬럼→값 맵으로 직렬화됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowKey {
    Composite(BTreeMap<String, Value>),
    Scalar(Value),
}

impl RowKey {
    /// 값의 원래 타입과 무관한 정규 문자열 형태
    pub fn canonical(&self) -> String {
        match self {
            RowKey::Scalar(Value::String(s)) => s.clone(),
            RowKey::Scalar(other) => other.to_string(),
            RowKey::Composite(map) => {
                serde_json::to_string(map).unwrap_or_else(|_| format!("{:?}", map))
            }
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// UPDATE에서 실제로 값이 바뀐 컬럼
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnChange {
    pub column: String,
    pub from: Value,
    pub to: Value,
}

/// CDC 변경 이벤트
///
/// `op`에 따라 `after`(create), `before`(delete), `changes`(update) 중 정확히
/// 하나만 채워집니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub op: OperationType,
    pub timestamp: String,
    pub db: String,
    pub table: String,
    pub row_key: RowKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Vec<ColumnChange>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub tombstone: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl ChangeEvent {
    /// 멱등성 힌트 및 감사 로그용 이벤트 ID: `<db>.<table>:<op>:<row_key>`
    pub fn event_id(&self) -> String {
        format!(
            "{}.{}:{}:{}",
            self.db,
            self.table,
            self.op,
            self.row_key.canonical()
        )
    }

    /// 디바운스 키: `<db>.<table>:<row_key>`
    pub fn row_identity_key(&self) -> String {
        format!("{}.{}:{}", self.db, self.table, self.row_key.canonical())
    }

    /// 변경된 컬럼 이름들 (UPDATE가 아니면 비어 있음)
    pub fn changed_columns(&self) -> impl Iterator<Item = &str> {
        self.changes
            .iter()
            .flat_map(|changes| changes.iter().map(|c| c.column.as_str()))
    }

    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json_bytes(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}
