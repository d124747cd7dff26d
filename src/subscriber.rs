//! 버스 구독 루프
//!
//! 채널을 구독해 페이로드를 디코딩하고, 필터를 통과한 이벤트를
//! 디바운스를 거치거나 바로 싱크로 전달합니다.
//! 구독 스트림이 끊기면 잠시 기다렸다가 다시 구독합니다.

use crate::change_event::ChangeEvent;
use crate::debounce::Coalescer;
use crate::dispatcher::EventSink;
use crate::filter::EventFilter;
use crate::publisher::{PayloadStream, Transport};
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 구독 통계
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriberStats {
    pub received: u64,
    pub malformed: u64,
    pub filtered: u64,
    pub forwarded: u64,
    pub subscriptions: u64,
}

pub struct Subscriber {
    name: String,
    channel: String,
    transport: Arc<dyn Transport>,
    filter: EventFilter,
    sink: Arc<dyn EventSink>,
    /// 0이면 디바운스 없이 바로 전달
    debounce: Duration,
    resubscribe_delay: Duration,
    stats: SubscriberStats,
}

impl Subscriber {
    pub fn new(
        name: impl Into<String>,
        channel: impl Into<String>,
        transport: Arc<dyn Transport>,
        filter: EventFilter,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Subscriber {
            name: name.into(),
            channel: channel.into(),
            transport,
            filter,
            sink,
            debounce: Duration::ZERO,
            resubscribe_delay: Duration::from_secs(2),
            stats: SubscriberStats::default(),
        }
    }

    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce = window;
        self
    }

    pub fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> &SubscriberStats {
        &self.stats
    }

    /// 취소될 때까지 구독
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(
            subscriber = %self.name,
            channel = %self.channel,
            transport = self.transport.name(),
            sink = self.sink.name(),
            debounce = ?self.debounce,
            "구독 시작"
        );

        let coalescer = if self.debounce.is_zero() {
            None
        } else {
            Some(Coalescer::spawn(
                self.debounce,
                self.sink.clone(),
                cancel.clone(),
            ))
        };

        loop {
            let subscribed = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.transport.subscribe(&self.channel) => result,
            };

            match subscribed {
                Ok(stream) => {
                    self.stats.subscriptions += 1;
                    debug!(subscriber = %self.name, channel = %self.channel, "구독됨");
                    self.consume(stream, &cancel, coalescer.as_ref()).await;
                    if cancel.is_cancelled() {
                        break;
                    }
                    warn!(subscriber = %self.name, "구독 스트림 종료, 재구독 대기");
                }
                Err(e) => {
                    warn!(subscriber = %self.name, error = %e, "구독 실패, 재시도 대기");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.resubscribe_delay) => {}
            }
        }

        if let Some(coalescer) = coalescer {
            coalescer.join().await;
        }

        info!(subscriber = %self.name, stats = ?self.stats, "구독 종료");
    }

    async fn consume(
        &mut self,
        mut stream: PayloadStream,
        cancel: &CancellationToken,
        coalescer: Option<&Coalescer>,
    ) {
        loop {
            let payload = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                payload = stream.next() => payload,
            };

            match payload {
                Some(payload) => self.handle_payload(payload, coalescer).await,
                None => return,
            }
        }
    }

    async fn handle_payload(&mut self, payload: Bytes, coalescer: Option<&Coalescer>) {
        self.stats.received += 1;

        let event = match ChangeEvent::from_json_bytes(&payload) {
            Ok(event) => event,
            Err(e) => {
                self.stats.malformed += 1;
                warn!(
                    subscriber = %self.name,
                    error = %e,
                    size = payload.len(),
                    "잘못된 페이로드 무시"
                );
                return;
            }
        };

        if !self.filter.matches(&event) {
            self.stats.filtered += 1;
            return;
        }

        self.stats.forwarded += 1;
        match coalescer {
            Some(coalescer) => {
                if let Err(e) = coalescer.submit(event).await {
                    warn!(subscriber = %self.name, error = %e, "디바운스 큐 전달 실패");
                }
            }
            None => {
                // 실패 기록은 싱크가 남김
                if let Err(e) = self.sink.deliver(&event).await {
                    debug!(subscriber = %self.name, error = %e, "전달 실패");
                }
            }
        }
    }
}
