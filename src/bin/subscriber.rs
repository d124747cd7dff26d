/// Redis 버스 구독자
///
/// `ENV_FILES`(또는 `ENV_FILE`)에 나열된 파일마다 구독자를 하나씩 띄웁니다.
/// `API_URL`이 있으면 웹훅으로, 없으면 콘솔로 전달합니다.
use binlog_fanout::config::SubscriberConfig;
use binlog_fanout::dispatcher::{ConsoleSink, EventSink, HttpDispatcher, OutcomeLog};
use binlog_fanout::filter::EventFilter;
use binlog_fanout::publisher::RedisTransport;
use binlog_fanout::runtime::{init_logging, shutdown_signal};
use binlog_fanout::subscriber::Subscriber;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let configs = match SubscriberConfig::all_from_env() {
        Ok(configs) => configs,
        Err(e) => {
            error!(error = %e, "설정 오류");
            return ExitCode::FAILURE;
        }
    };

    let mut subscribers = Vec::with_capacity(configs.len());
    for config in configs {
        match build_subscriber(config) {
            Ok(subscriber) => subscribers.push(subscriber),
            Err(e) => {
                error!(error = %e, "구독자 생성 실패");
                return ExitCode::FAILURE;
            }
        }
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let mut tasks = JoinSet::new();
    for mut subscriber in subscribers {
        let token = shutdown.clone();
        tasks.spawn(async move { subscriber.run(token).await });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "구독 태스크 비정상 종료");
        }
    }

    info!("모든 구독자 종료");
    ExitCode::SUCCESS
}

fn build_subscriber(config: SubscriberConfig) -> binlog_fanout::Result<Subscriber> {
    let transport = Arc::new(RedisTransport::new(&config.redis)?);

    let sink: Arc<dyn EventSink> = match &config.api_url {
        Some(url) => {
            let mut outcomes = OutcomeLog::new(config.name.clone());
            if let Some(path) = &config.api_log_file {
                outcomes = outcomes.with_file(path)?;
            }
            Arc::new(HttpDispatcher::new(
                config.name.clone(),
                url.clone(),
                config.api_timeout,
                outcomes,
            )?)
        }
        None => Arc::new(ConsoleSink::new(config.name.clone(), config.pretty_print)),
    };

    info!(
        subscriber = %config.name,
        redis = %config.redis.addr,
        channel = %config.channel,
        sink = sink.name(),
        "구독자 구성"
    );

    Ok(Subscriber::new(
        config.name,
        config.channel,
        transport,
        EventFilter::new(config.filter),
        sink,
    )
    .with_debounce(config.debounce)
    .with_resubscribe_delay(config.resubscribe_delay))
}
