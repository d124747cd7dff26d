//! MySQL Binlog 변경 이벤트 팬아웃
//!
//! MySQL 바이너리 로그를 읽어 행 단위 변경 이벤트를 만들고
//! Redis 버스로 발행합니다. 구독자는 버스에서 이벤트를 받아
//! 필터링과 디바운스를 거쳐 HTTP 웹훅이나 콘솔로 전달합니다.
//!
//! 주요 기능:
//! - 스키마 캐시 기반 행 식별 (PK 또는 내용 해시)
//! - UPDATE 컬럼 단위 변경 추출
//! - 재연결 시 마지막 커밋 위치부터 재개 (파일 체크포인트 선택)
//! - 구독자 필터, 행 단위 디바운스, 웹훅 전달

pub mod binlog_client;
pub mod builder;
pub mod cdc_engine;
pub mod change_event;
pub mod checkpoint;
pub mod config;
pub mod connection;
pub mod debounce;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod filter;
pub mod gtid;
pub mod offset;
pub mod publisher;
pub mod row_identity;
pub mod runtime;
pub mod schema_cache;
pub mod subscriber;

pub use binlog_client::{MySqlReplicationSource, ReplicationSource, ReplicationStream};
pub use builder::ChangeEventBuilder;
pub use cdc_engine::{CdcConfig, CdcEngine};
pub use change_event::{ChangeEvent, ColumnChange, OperationType, RowKey};
pub use connection::{ConnectionConfig, MetadataCatalog, MySqlCatalog};
pub use error::{CdcError, Result};
pub use events::{BinlogEvent, CellValue, EventType};
pub use filter::{EventFilter, FilterSpec};
pub use gtid::GtidSet;
pub use offset::{BinlogOffset, BinlogPosition};
pub use publisher::{BusPublisher, Transport};
pub use subscriber::Subscriber;
