/// MySQL binlog → Redis 버스 발행기
///
/// 설정은 환경 변수(와 `.env`)에서 읽습니다. 필수 값이 없으면 바로 종료합니다.
use binlog_fanout::builder::ChangeEventBuilder;
use binlog_fanout::cdc_engine::CdcEngine;
use binlog_fanout::checkpoint::FileCheckpoint;
use binlog_fanout::config::EmitterConfig;
use binlog_fanout::connection::MySqlCatalog;
use binlog_fanout::binlog_client::MySqlReplicationSource;
use binlog_fanout::publisher::{AuditLog, BusPublisher, RedisTransport};
use binlog_fanout::runtime::{init_logging, shutdown_signal};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match EmitterConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "설정 오류");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "발행기 비정상 종료");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: EmitterConfig) -> binlog_fanout::Result<()> {
    info!(
        mysql = %config.connection.redacted_url(),
        redis = %config.redis.addr,
        channel = %config.channel,
        mode = ?config.redis.mode,
        use_gtid = config.engine.use_gtid,
        "발행기 시작"
    );

    let catalog = Arc::new(MySqlCatalog::new(&config.connection));
    let source = Arc::new(MySqlReplicationSource::new(
        config.connection.clone(),
        config.heartbeat_period,
    ));

    let transport = Arc::new(RedisTransport::new(&config.redis)?);
    if let Err(e) = transport.ping().await {
        // 발행 시점에 다시 연결을 시도하므로 시작은 계속함
        warn!(error = %e, "Redis 연결 확인 실패");
    }

    let mut publisher = BusPublisher::new(transport, config.channel.clone());
    if let Some(path) = &config.message_log_file {
        publisher = publisher.with_audit_log(AuditLog::open(path)?);
    }

    let mut engine = CdcEngine::new(
        config.engine.clone(),
        catalog.clone(),
        source,
        ChangeEventBuilder::new(config.tz_offset),
        publisher,
    );
    if let Some(path) = &config.checkpoint_file {
        info!(path = %path.display(), "파일 체크포인트 사용");
        engine = engine.with_checkpoint(Arc::new(FileCheckpoint::new(path.clone())));
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    engine.run(shutdown).await?;
    drop(engine);

    if let Ok(catalog) = Arc::try_unwrap(catalog) {
        catalog.disconnect().await?;
    }
    Ok(())
}
