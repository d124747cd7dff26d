//! 구독자 측 이벤트 필터
//!
//! 제외 규칙을 먼저 보고, 그 다음 포함 규칙을 모두 만족해야 통과합니다.
//! 비어 있는 집합은 제한 없음으로 취급합니다.
//!
//! ```rust,ignore
//! let filter = EventFilter::new(
//!     FilterSpec::default()
//!         .with_dbs(["shop"])
//!         .with_ops(["UPDATE"])
//!         .with_change_any(["status"]),
//! );
//! ```

use crate::change_event::ChangeEvent;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 필터 규칙
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default)]
    pub dbs: HashSet<String>,
    #[serde(default)]
    pub tables: HashSet<String>,
    /// row_key 정규 문자열
    #[serde(default)]
    pub ids: HashSet<String>,
    /// 소문자로 저장
    #[serde(default)]
    pub ops: HashSet<String>,
    /// 이 중 하나라도 바뀌어야 통과
    #[serde(default)]
    pub change_any: HashSet<String>,
    /// 이 컬럼들이 모두 바뀌어야 통과
    #[serde(default)]
    pub change_all: HashSet<String>,
    #[serde(default)]
    pub exclude_dbs: HashSet<String>,
    #[serde(default)]
    pub exclude_tables: HashSet<String>,
}

fn to_set(values: impl IntoIterator<Item = impl Into<String>>) -> HashSet<String> {
    values.into_iter().map(Into::into).collect()
}

impl FilterSpec {
    pub fn with_dbs(mut self, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dbs = to_set(values);
        self
    }

    pub fn with_tables(mut self, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tables = to_set(values);
        self
    }

    pub fn with_ids(mut self, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ids = to_set(values);
        self
    }

    pub fn with_ops(mut self, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ops = values
            .into_iter()
            .map(|op| op.into().to_lowercase())
            .collect();
        self
    }

    pub fn with_change_any(mut self, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.change_any = to_set(values);
        self
    }

    pub fn with_change_all(mut self, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.change_all = to_set(values);
        self
    }

    pub fn with_exclude_dbs(mut self, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.exclude_dbs = to_set(values);
        self
    }

    pub fn with_exclude_tables(
        mut self,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.exclude_tables = to_set(values);
        self
    }

    /// 아무 제한도 없는지
    pub fn is_pass_all(&self) -> bool {
        *self == FilterSpec::default()
    }
}

/// 이벤트 필터
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    spec: FilterSpec,
}

impl EventFilter {
    pub fn new(mut spec: FilterSpec) -> Self {
        spec.ops = spec.ops.iter().map(|op| op.to_lowercase()).collect();
        EventFilter { spec }
    }

    pub fn spec(&self) -> &FilterSpec {
        &self.spec
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        let spec = &self.spec;

        if spec.exclude_dbs.contains(&event.db) || spec.exclude_tables.contains(&event.table) {
            return false;
        }
        if !spec.dbs.is_empty() && !spec.dbs.contains(&event.db) {
            return false;
        }
        if !spec.tables.is_empty() && !spec.tables.contains(&event.table) {
            return false;
        }
        if !spec.ids.is_empty() && !spec.ids.contains(&event.row_key.canonical()) {
            return false;
        }
        if !spec.ops.is_empty() && !spec.ops.contains(event.op.as_str()) {
            return false;
        }

        if !spec.change_any.is_empty() {
            let hit = event
                .changed_columns()
                .any(|column| spec.change_any.contains(column));
            if !hit {
                return false;
            }
        }

        if !spec.change_all.is_empty() {
            let changed: HashSet<&str> = event.changed_columns().collect();
            if !spec
                .change_all
                .iter()
                .all(|column| changed.contains(column.as_str()))
            {
                return false;
            }
        }

        true
    }
}
