//! 바이너리 공통 실행 환경 (로깅, 종료 신호)

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// `RUST_LOG`가 없으면 `binlog_fanout=info`
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("binlog_fanout=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// SIGTERM/SIGINT를 받으면 토큰 취소
pub async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("SIGTERM 수신, 종료 시작"),
                    _ = sigint.recv() => info!("SIGINT 수신, 종료 시작"),
                }
            }
            _ => {
                warn!("시그널 핸들러 등록 실패, Ctrl+C만 대기");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "Ctrl+C 대기 실패");
                    return;
                }
                info!("Ctrl+C 수신, 종료 시작");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C 대기 실패");
            return;
        }
        info!("Ctrl+C 수신, 종료 시작");
    }

    shutdown.cancel();
}
