//! MySQL 데이터베이스 연결 및 메타데이터 조회

use crate::error::{CdcError, Result};
use crate::gtid::GtidSet;
use crate::offset::BinlogPosition;
use crate::schema_cache::TableSchema;
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Pool, Row};
use std::time::Duration;
use tracing::{debug, warn};

/// MySQL 연결 설정
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: Option<String>,
    /// 복제 클라이언트로 등록할 서버 ID (소스 서버와 겹치면 안 됨)
    pub server_id: u32,
    pub timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            hostname: "localhost".to_string(),
            port: 3306,
            username: "root".to_string(),
            password: String::new(),
            database: None,
            server_id: 100,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ConnectionConfig {
    pub fn new(hostname: impl Into<String>, username: impl Into<String>) -> Self {
        ConnectionConfig {
            hostname: hostname.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    /// `host:port` 형식 주소 적용 (포트가 없으면 기존 포트 유지)
    pub fn with_addr(mut self, addr: &str) -> Result<Self> {
        match addr.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                self.port = port
                    .parse()
                    .map_err(|_| CdcError::config(format!("잘못된 포트: {}", addr)))?;
                self.hostname = host.to_string();
            }
            _ => self.hostname = addr.to_string(),
        }
        Ok(self)
    }

    pub fn opts(&self) -> Opts {
        OptsBuilder::default()
            .ip_or_hostname(self.hostname.clone())
            .tcp_port(self.port)
            .user(Some(self.username.clone()))
            .pass(Some(self.password.clone()))
            .db_name(self.database.clone())
            .into()
    }

    /// 비밀번호를 가린 접속 문자열 (로그용)
    pub fn redacted_url(&self) -> String {
        format!(
            "mysql://{}:***@{}:{}/{}",
            self.username,
            self.hostname,
            self.port,
            self.database.as_deref().unwrap_or("")
        )
    }

    /// 새 단일 연결 (복제 세션용)
    pub async fn connect(&self) -> Result<Conn> {
        let conn = tokio::time::timeout(self.timeout, Conn::new(self.opts()))
            .await
            .map_err(|_| CdcError::Timeout(format!("MySQL 연결 시간 초과: {}", self.redacted_url())))?
            .map_err(|e| CdcError::ConnectionError(format!("MySQL 연결 실패: {}", e)))?;
        Ok(conn)
    }
}

/// Binlog 상태
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinlogStatus {
    pub position: BinlogPosition,
    pub executed_gtid_set: Option<String>,
}

/// 메타데이터 조회 인터페이스
///
/// 스트림 루프와 스키마 캐시는 이 trait 너머의 데이터베이스만 봅니다.
#[async_trait]
pub trait MetadataCatalog: Send + Sync {
    async fn ping(&self) -> Result<()>;

    /// 현재 binlog 헤드 위치
    async fn binlog_status(&self) -> Result<BinlogStatus>;

    /// `@@GLOBAL.gtid_executed`
    async fn executed_gtid_set(&self) -> Result<GtidSet>;

    /// 컬럼 순서와 PK 컬럼 목록
    async fn table_schema(&self, database: &str, table: &str) -> Result<TableSchema>;
}

/// `mysql_async` 커넥션 풀 기반 카탈로그
pub struct MySqlCatalog {
    pool: Pool,
}

impl MySqlCatalog {
    pub fn new(config: &ConnectionConfig) -> Self {
        MySqlCatalog {
            pool: Pool::new(config.opts()),
        }
    }

    async fn conn(&self) -> Result<Conn> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| CdcError::ConnectionError(format!("MySQL 연결 실패: {}", e)))
    }

    pub async fn disconnect(self) -> Result<()> {
        self.pool.disconnect().await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataCatalog for MySqlCatalog {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.ping()
            .await
            .map_err(|e| CdcError::ConnectionError(format!("ping 실패: {}", e)))
    }

    async fn binlog_status(&self) -> Result<BinlogStatus> {
        let mut conn = self.conn().await?;

        // 8.2+ 는 SHOW BINARY LOG STATUS, 그 이전은 SHOW MASTER STATUS
        let row: Option<Row> = match conn.query_first("SHOW BINARY LOG STATUS").await {
            Ok(row) => row,
            Err(e) => {
                debug!(error = %e, "SHOW BINARY LOG STATUS 실패, SHOW MASTER STATUS로 재시도");
                conn.query_first("SHOW MASTER STATUS").await?
            }
        };

        let row = row.ok_or_else(|| {
            CdcError::QueryError("binlog 상태 없음 (log_bin 비활성?)".to_string())
        })?;
        parse_status_row(&row)
    }

    async fn executed_gtid_set(&self) -> Result<GtidSet> {
        let mut conn = self.conn().await?;
        let value: Option<Option<String>> =
            conn.query_first("SELECT @@GLOBAL.gtid_executed").await?;
        GtidSet::parse(value.flatten().as_deref().unwrap_or(""))
    }

    async fn table_schema(&self, database: &str, table: &str) -> Result<TableSchema> {
        let mut conn = self.conn().await?;

        let columns: Vec<String> = conn
            .exec(
                "SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.COLUMNS \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
                 ORDER BY ORDINAL_POSITION",
                (database, table),
            )
            .await
            .map_err(|e| CdcError::schema_load(database, table, e.to_string()))?;

        if columns.is_empty() {
            return Err(CdcError::schema_load(database, table, "컬럼 정보 없음"));
        }

        let primary_key: Vec<String> = conn
            .exec(
                "SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY' \
                 ORDER BY ORDINAL_POSITION",
                (database, table),
            )
            .await
            .map_err(|e| CdcError::schema_load(database, table, e.to_string()))?;

        if primary_key.is_empty() {
            warn!(database, table, "PK 없는 테이블, 콘텐츠 해시로 식별");
        }

        Ok(TableSchema::new(columns, primary_key))
    }
}

fn parse_status_row(row: &Row) -> Result<BinlogStatus> {
    let file: String = row
        .get_opt(0)
        .and_then(|v| v.ok())
        .ok_or_else(|| CdcError::QueryError("binlog 파일명 파싱 실패".to_string()))?;
    let position: u64 = row
        .get_opt(1)
        .and_then(|v| v.ok())
        .ok_or_else(|| CdcError::QueryError("binlog 위치 파싱 실패".to_string()))?;
    // Executed_Gtid_Set 컬럼은 버전에 따라 없을 수 있음
    let executed_gtid_set: Option<String> = if row.len() > 4 {
        row.get_opt(4).and_then(|v| v.ok())
    } else {
        None
    };

    Ok(BinlogStatus {
        position: BinlogPosition::new(file, position),
        executed_gtid_set: executed_gtid_set.filter(|s| !s.is_empty()),
    })
}
