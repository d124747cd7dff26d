//! CDC 파이프라인 에러 타입

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CdcError {
    #[error("MySQL 연결 에러: {0}")]
    ConnectionError(String),

    #[error("쿼리 실행 에러: {0}")]
    QueryError(String),

    #[error("스키마 로드 에러 ({database}.{table}): {message}")]
    SchemaLoadError {
        database: String,
        table: String,
        message: String,
    },

    #[error("유효하지 않은 이벤트: {0}")]
    InvalidEvent(String),

    #[error("GTID 처리 에러: {0}")]
    GtidError(String),

    #[error("직렬화 에러: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("전송 에러: {0}")]
    TransportError(String),

    #[error("디스패치 에러: {0}")]
    DispatchError(String),

    #[error("설정 에러: {0}")]
    ConfigError(String),

    #[error("체크포인트 에러: {0}")]
    CheckpointError(String),

    #[error("I/O 에러: {0}")]
    IoError(String),

    #[error("Timeout 에러: {0}")]
    Timeout(String),

    #[error("복제 스트림이 종료되었습니다")]
    StreamEnded,

    #[error("채널이 닫혔습니다")]
    ChannelClosed,

    #[error("예상치 못한 에러: {0}")]
    Other(String),
}

impl CdcError {
    pub fn config(message: impl Into<String>) -> Self {
        CdcError::ConfigError(message.into())
    }

    pub fn schema_load(
        database: impl Into<String>,
        table: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CdcError::SchemaLoadError {
            database: database.into(),
            table: table.into(),
            message: message.into(),
        }
    }
}

impl From<io::Error> for CdcError {
    fn from(err: io::Error) -> Self {
        CdcError::IoError(err.to_string())
    }
}

impl From<mysql_async::Error> for CdcError {
    fn from(err: mysql_async::Error) -> Self {
        match err {
            mysql_async::Error::Io(e) => CdcError::ConnectionError(e.to_string()),
            mysql_async::Error::Driver(e) => CdcError::ConnectionError(e.to_string()),
            other => CdcError::QueryError(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for CdcError {
    fn from(err: redis::RedisError) -> Self {
        CdcError::TransportError(err.to_string())
    }
}

impl From<reqwest::Error> for CdcError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CdcError::Timeout(err.to_string())
        } else {
            CdcError::DispatchError(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, CdcError>;
