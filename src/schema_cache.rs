//! 테이블 스키마 캐시와 테이블 맵 캐시
//!
//! 스키마는 (db, table) 단위로 처음 필요할 때 카탈로그에서 읽어 프로세스가 끝날 때까지
//! 보관합니다. 같은 키의 동시 조회는 키별 async 락으로 한 번만 쿼리하고,
//! 다른 키끼리는 서로 막지 않습니다.

use crate::connection::MetadataCatalog;
use crate::error::Result;
use crate::events::TableMapData;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 테이블 스키마 (컬럼 순서 + PK)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub columns: Vec<String>,
    pub column_index: HashMap<String, usize>,
    pub primary_key: Vec<String>,
}

impl TableSchema {
    pub fn new(columns: Vec<String>, primary_key: Vec<String>) -> Self {
        let column_index = columns
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        TableSchema {
            columns,
            column_index,
            primary_key,
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }
}

/// 스키마를 모를 때 쓰는 위치 기반 컬럼명 (`col_1`, `col_2`, ...)
pub fn positional_name(index: usize) -> String {
    format!("col_{}", index + 1)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TableKey {
    database: String,
    table: String,
}

impl TableKey {
    fn new(database: &str, table: &str) -> Self {
        TableKey {
            database: database.to_string(),
            table: table.to_string(),
        }
    }
}

type SchemaSlot = Arc<tokio::sync::Mutex<Option<Arc<TableSchema>>>>;

/// 스키마 캐시
pub struct SchemaCache {
    catalog: Arc<dyn MetadataCatalog>,
    slots: Mutex<HashMap<TableKey, SchemaSlot>>,
}

impl SchemaCache {
    pub fn new(catalog: Arc<dyn MetadataCatalog>) -> Self {
        SchemaCache {
            catalog,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, database: &str, table: &str) -> SchemaSlot {
        // 바깥 락은 슬롯을 꺼내는 동안만 잡음
        self.slots
            .lock()
            .entry(TableKey::new(database, table))
            .or_default()
            .clone()
    }

    /// 스키마 조회 (없으면 카탈로그에서 로드)
    ///
    /// 실패하면 아무것도 저장하지 않으므로 다음 테이블 맵에서 다시 시도합니다.
    pub async fn resolve(&self, database: &str, table: &str) -> Result<Arc<TableSchema>> {
        let slot = self.slot(database, table);
        let mut guard = slot.lock().await;

        if let Some(schema) = guard.as_ref() {
            return Ok(schema.clone());
        }

        match self.catalog.table_schema(database, table).await {
            Ok(schema) => {
                info!(
                    database,
                    table,
                    columns = schema.column_count(),
                    primary_key = ?schema.primary_key,
                    "테이블 스키마 로드"
                );
                let schema = Arc::new(schema);
                *guard = Some(schema.clone());
                Ok(schema)
            }
            Err(e) => {
                warn!(database, table, error = %e, "테이블 스키마 로드 실패");
                Err(e)
            }
        }
    }

    /// 이미 로드된 스키마만 반환 (로드하지 않음)
    pub fn cached(&self, database: &str, table: &str) -> Option<Arc<TableSchema>> {
        let slot = self
            .slots
            .lock()
            .get(&TableKey::new(database, table))
            .cloned()?;
        // 로드 중인 슬롯은 아직 없는 것으로 취급
        let guard = slot.try_lock().ok()?;
        guard.clone()
    }

    pub fn is_loaded(&self, database: &str, table: &str) -> bool {
        self.cached(database, table).is_some()
    }
}

struct TableMapEntry {
    map: TableMapData,
    last_seen: Instant,
}

/// table_id → 테이블 맵 캐시
///
/// 오래 안 보인 항목만 제거합니다. 활발한 테이블의 매핑은 유지됩니다.
#[derive(Default)]
pub struct TableMapCache {
    entries: HashMap<u64, TableMapEntry>,
}

impl TableMapCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, map: TableMapData) {
        self.insert_at(map, Instant::now());
    }

    fn insert_at(&mut self, map: TableMapData, now: Instant) {
        self.entries.insert(
            map.table_id,
            TableMapEntry {
                map,
                last_seen: now,
            },
        );
    }

    pub fn get(&self, table_id: u64) -> Option<&TableMapData> {
        self.entries.get(&table_id).map(|entry| &entry.map)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// retention 동안 보이지 않은 항목 제거, 제거된 개수 반환
    pub fn evict_stale(&mut self, retention: Duration) -> usize {
        self.evict_stale_at(retention, Instant::now())
    }

    fn evict_stale_at(&mut self, retention: Duration, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.last_seen) <= retention);
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.entries.len(), "오래된 테이블 맵 제거");
        }
        evicted
    }
}
