//! MySQL CDC 엔진 - 복제 스트림 소비 루프
//!
//! 엔진은 다음 단계를 반복합니다:
//! 1. 연결 및 시작 위치 결정 (마지막 커밋 위치 → 체크포인트 → 현재 헤드)
//! 2. 이벤트를 순서대로 읽어 변경 이벤트로 변환 후 발행
//! 3. 에러 시 세션을 닫고 재연결 대기 후 1로
//!
//! 취소 토큰이 트리거되면 세션을 닫고 체크포인트를 남긴 뒤 종료합니다.

use crate::binlog_client::{ReplicationSource, ReplicationStream};
use crate::builder::ChangeEventBuilder;
use crate::change_event::ChangeEvent;
use crate::checkpoint::CheckpointStore;
use crate::connection::MetadataCatalog;
use crate::error::{CdcError, Result};
use crate::events::{BinlogEvent, BinlogEventData, RowsEventData, TableMapData};
use crate::gtid::GtidSet;
use crate::offset::{BinlogOffset, BinlogPosition, ProcessingState, StartPosition};
use crate::publisher::BusPublisher;
use crate::schema_cache::{SchemaCache, TableMapCache};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// CDC 엔진 설정
#[derive(Debug, Clone)]
pub struct CdcConfig {
    /// GTID 기반으로 시작/재개
    pub use_gtid: bool,
    pub reconnect_delay: Duration,
    /// 이벤트 하나를 기다리는 최대 시간 (하트비트 주기보다 길어야 함)
    pub read_timeout: Duration,
    pub table_map_retention: Duration,
    /// N 커밋마다 체크포인트 저장 (0이면 종료 시에만)
    pub checkpoint_every: u64,
}

impl Default for CdcConfig {
    fn default() -> Self {
        CdcConfig {
            use_gtid: false,
            reconnect_delay: Duration::from_secs(5),
            read_timeout: Duration::from_secs(90),
            table_map_retention: Duration::from_secs(3600),
            checkpoint_every: 100,
        }
    }
}

/// 엔진 처리 통계
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub events: u64,
    pub rows: u64,
    pub published: u64,
    pub dropped: u64,
    pub skipped_batches: u64,
    pub commits: u64,
    pub sessions: u64,
}

#[derive(Debug, Clone, Copy)]
enum RowsKind {
    Insert,
    Update,
    Delete,
}

/// MySQL CDC 엔진
pub struct CdcEngine {
    config: CdcConfig,
    catalog: Arc<dyn MetadataCatalog>,
    source: Arc<dyn ReplicationSource>,
    schemas: SchemaCache,
    table_maps: TableMapCache,
    builder: ChangeEventBuilder,
    publisher: BusPublisher,
    checkpoint: Option<Arc<dyn CheckpointStore>>,
    state: ProcessingState,
    /// 마지막으로 커밋된 위치 (재연결 시 재개 지점)
    committed: Option<BinlogOffset>,
    current_file: Option<String>,
    executed: GtidSet,
    pending_gtid: Option<String>,
    commits_since_checkpoint: u64,
    last_eviction: Instant,
    stats: EngineStats,
}

impl CdcEngine {
    pub fn new(
        config: CdcConfig,
        catalog: Arc<dyn MetadataCatalog>,
        source: Arc<dyn ReplicationSource>,
        builder: ChangeEventBuilder,
        publisher: BusPublisher,
    ) -> Self {
        CdcEngine {
            config,
            schemas: SchemaCache::new(catalog.clone()),
            catalog,
            source,
            table_maps: TableMapCache::new(),
            builder,
            publisher,
            checkpoint: None,
            state: ProcessingState::Stopped,
            committed: None,
            current_file: None,
            executed: GtidSet::new(),
            pending_gtid: None,
            commits_since_checkpoint: 0,
            last_eviction: Instant::now(),
            stats: EngineStats::default(),
        }
    }

    pub fn with_checkpoint(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint = Some(store);
        self
    }

    pub fn state(&self) -> ProcessingState {
        self.state
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn committed(&self) -> Option<&BinlogOffset> {
        self.committed.as_ref()
    }

    /// 취소될 때까지 스트림 소비 (에러 시 무한 재연결)
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        info!(use_gtid = self.config.use_gtid, "CDC 엔진 시작");

        while !cancel.is_cancelled() {
            self.state = ProcessingState::Connecting;
            match self.stream_session(&cancel).await {
                Ok(()) => break,
                Err(e) => {
                    self.state = ProcessingState::Reconnecting;
                    warn!(
                        error = %e,
                        delay = ?self.config.reconnect_delay,
                        "복제 세션 종료, 재연결 대기"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                    }
                }
            }
        }

        self.flush_checkpoint().await;
        self.state = ProcessingState::Stopped;
        info!(stats = ?self.stats, "CDC 엔진 종료");
        Ok(())
    }

    /// 연결 한 번의 수명. 취소로 끝나면 `Ok`, 그 외 종료는 모두 에러.
    async fn stream_session(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.catalog.ping().await?;
        let start = self.start_position().await?;

        let mut stream = self.source.open(&start).await?;
        self.stats.sessions += 1;
        if let StartPosition::File(pos) = &start {
            self.current_file = Some(pos.filename.clone());
        }
        self.state = ProcessingState::Streaming;
        info!(start = %start, "스트리밍 시작");

        let result = self.consume(stream.as_mut(), cancel).await;

        if let Err(e) = stream.close().await {
            debug!(error = %e, "복제 세션 닫기 실패");
        }
        result
    }

    async fn consume(
        &mut self,
        stream: &mut dyn ReplicationStream,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let read_timeout = self.config.read_timeout;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                next = tokio::time::timeout(read_timeout, stream.next_event()) => next,
            };

            let event = match next {
                Ok(Ok(Some(event))) => event,
                Ok(Ok(None)) => return Err(CdcError::StreamEnded),
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(CdcError::Timeout(format!(
                        "{:?} 동안 이벤트 없음",
                        read_timeout
                    )))
                }
            };

            self.handle_event(event).await?;
            self.maybe_evict_table_maps();
        }
    }

    /// 시작 위치 결정
    async fn start_position(&mut self) -> Result<StartPosition> {
        let use_gtid = self.config.use_gtid;

        if let Some(start) = self
            .committed
            .as_ref()
            .and_then(|offset| offset.start_position(use_gtid))
        {
            debug!(start = %start, "마지막 커밋 위치에서 재개");
            return Ok(start);
        }

        if let Some(store) = &self.checkpoint {
            match store.load().await {
                Ok(Some(offset)) => {
                    if let Some(start) = offset.start_position(use_gtid) {
                        info!(start = %start, store = store.name(), "체크포인트에서 재개");
                        if let StartPosition::Gtid(set) = &start {
                            self.executed = set.clone();
                        }
                        self.committed = Some(offset);
                        return Ok(start);
                    }
                    warn!(?offset, "현재 모드에 쓸 수 없는 체크포인트, 무시");
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "체크포인트 로드 실패, 현재 헤드에서 시작"),
            }
        }

        if use_gtid {
            let executed = self.catalog.executed_gtid_set().await?;
            info!(gtid_executed = %executed, "현재 GTID 집합에서 시작");
            self.executed = executed.clone();
            Ok(StartPosition::Gtid(executed))
        } else {
            let status = self.catalog.binlog_status().await?;
            info!(position = %status.position, "현재 binlog 헤드에서 시작");
            Ok(StartPosition::File(status.position))
        }
    }

    async fn handle_event(&mut self, event: BinlogEvent) -> Result<()> {
        self.stats.events += 1;
        let timestamp = event.header.timestamp;

        match event.data {
            BinlogEventData::Rotate(rotate) => {
                info!(
                    file = %rotate.next_binlog_name,
                    position = rotate.position,
                    "binlog 파일 회전"
                );
                self.current_file = Some(rotate.next_binlog_name);
            }
            BinlogEventData::TableMap(map) => self.handle_table_map(map).await,
            BinlogEventData::WriteRows(rows) => {
                self.handle_rows(RowsKind::Insert, rows, timestamp).await
            }
            BinlogEventData::UpdateRows(rows) => {
                self.handle_rows(RowsKind::Update, rows, timestamp).await
            }
            BinlogEventData::DeleteRows(rows) => {
                self.handle_rows(RowsKind::Delete, rows, timestamp).await
            }
            BinlogEventData::Gtid(gtid) => self.pending_gtid = Some(gtid.gtid),
            BinlogEventData::Xid(_) => self.commit(event.header.next_pos).await,
            BinlogEventData::Query(query) => {
                if query.ends_transaction() {
                    debug!(query = %query.query, "쿼리 커밋 경계");
                    self.commit(event.header.next_pos).await;
                }
            }
            BinlogEventData::Heartbeat | BinlogEventData::Other => {}
        }
        Ok(())
    }

    async fn handle_table_map(&mut self, map: TableMapData) {
        let (database, table) = (map.database.clone(), map.table.clone());
        self.table_maps.insert(map);

        if !self.schemas.is_loaded(&database, &table) {
            // 실패는 resolve 안에서 기록, 이후 이벤트는 위치 기반 이름/해시로 처리
            let _ = self.schemas.resolve(&database, &table).await;
        }
    }

    async fn handle_rows(&mut self, kind: RowsKind, rows: RowsEventData, timestamp: u32) {
        let map = match self.table_maps.get(rows.table_id) {
            Some(map) => map.clone(),
            None => {
                warn!(table_id = rows.table_id, ?kind, "테이블 맵 없는 행 이벤트, 건너뜀");
                self.stats.skipped_batches += 1;
                return;
            }
        };
        let schema = self.schemas.cached(&map.database, &map.table);
        let schema = schema.as_deref();
        self.stats.rows += rows.rows.len() as u64;

        let events: Vec<ChangeEvent> = match kind {
            RowsKind::Insert => rows
                .rows
                .iter()
                .map(|row| self.builder.insert(&map, schema, row, timestamp))
                .collect(),
            RowsKind::Delete => rows
                .rows
                .iter()
                .map(|row| self.builder.delete(&map, schema, row, timestamp))
                .collect(),
            RowsKind::Update => {
                if rows.rows.len() % 2 != 0 {
                    warn!(
                        database = %map.database,
                        table = %map.table,
                        images = rows.rows.len(),
                        "짝이 없는 UPDATE 이미지, 마지막 이미지 폐기"
                    );
                }
                rows.rows
                    .chunks_exact(2)
                    .filter_map(|pair| {
                        match self
                            .builder
                            .update(&map, schema, &pair[0], &pair[1], timestamp)
                        {
                            Ok(event) => Some(event),
                            Err(e) => {
                                warn!(error = %e, "UPDATE 이벤트 생성 실패");
                                None
                            }
                        }
                    })
                    .collect()
            }
        };

        for event in events {
            self.publish(event).await;
        }
    }

    async fn publish(&mut self, event: ChangeEvent) {
        match self.publisher.publish_event(&event).await {
            Ok(()) => self.stats.published += 1,
            Err(e) => {
                self.stats.dropped += 1;
                error!(event_id = %event.event_id(), error = %e, "이벤트 발행 실패, 폐기");
            }
        }
    }

    async fn commit(&mut self, next_pos: u64) {
        if let Some(gtid) = self.pending_gtid.take() {
            if self.config.use_gtid {
                if let Err(e) = self.executed.add_gtid(&gtid) {
                    warn!(gtid = %gtid, error = %e, "GTID 기록 실패");
                }
            }
        }

        let position = self
            .current_file
            .as_ref()
            .map(|file| BinlogPosition::new(file.clone(), next_pos));
        let gtid_set = if self.config.use_gtid {
            self.executed.to_string()
        } else {
            String::new()
        };
        self.committed = Some(BinlogOffset { position, gtid_set });
        self.stats.commits += 1;
        self.commits_since_checkpoint += 1;

        if self.config.checkpoint_every > 0
            && self.commits_since_checkpoint >= self.config.checkpoint_every
        {
            self.flush_checkpoint().await;
        }
    }

    async fn flush_checkpoint(&mut self) {
        let (store, offset) = match (&self.checkpoint, &self.committed) {
            (Some(store), Some(offset)) => (store, offset),
            _ => return,
        };

        match store.save(offset).await {
            Ok(()) => self.commits_since_checkpoint = 0,
            Err(e) => warn!(error = %e, "체크포인트 저장 실패"),
        }
    }

    fn maybe_evict_table_maps(&mut self) {
        let retention = self.config.table_map_retention;
        // 보존 기간의 1/10 주기로 검사 (최소 100ms)
        let interval = (retention / 10).max(Duration::from_millis(100));
        if self.last_eviction.elapsed() >= interval {
            self.table_maps.evict_stale(retention);
            self.last_eviction = Instant::now();
        }
    }
}
