//! 행 단위 디바운스
//!
//! 같은 행(`<db>.<table>:<row_key>`)에 대한 이벤트가 window 안에 연달아 오면
//! 마지막 이벤트 하나만 전달합니다. 새 이벤트가 올 때마다 타이머는 다시 시작됩니다.
//!
//! 대기 중인 항목은 하나의 액터 태스크가 소유하고, 만료된 항목의 전달은
//! 각각 별도 태스크에서 진행되므로 서로 다른 행은 동시에 전달될 수 있습니다.

use crate::change_event::ChangeEvent;
use crate::dispatcher::EventSink;
use crate::error::{CdcError, Result};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, info, warn};

const SUBMIT_BUFFER: usize = 1024;

/// 디바운스 핸들
pub struct Coalescer {
    sender: mpsc::Sender<ChangeEvent>,
    handle: JoinHandle<()>,
}

impl Coalescer {
    /// 액터 태스크 시작
    pub fn spawn(window: Duration, sink: Arc<dyn EventSink>, cancel: CancellationToken) -> Self {
        let (sender, receiver) = mpsc::channel(SUBMIT_BUFFER);
        let actor = CoalescerActor {
            window,
            sink,
            receiver,
            pending: HashMap::new(),
            queue: DelayQueue::new(),
            inflight: JoinSet::new(),
        };
        let handle = tokio::spawn(actor.run(cancel));
        Coalescer { sender, handle }
    }

    pub async fn submit(&self, event: ChangeEvent) -> Result<()> {
        self.sender
            .send(event)
            .await
            .map_err(|_| CdcError::ChannelClosed)
    }

    /// 액터 종료 대기 (대기 항목 flush 및 진행 중 전달 완료까지)
    pub async fn join(self) {
        drop(self.sender);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "디바운스 태스크 비정상 종료");
        }
    }
}

struct PendingDispatch {
    event: ChangeEvent,
    key: delay_queue::Key,
}

struct CoalescerActor {
    window: Duration,
    sink: Arc<dyn EventSink>,
    receiver: mpsc::Receiver<ChangeEvent>,
    pending: HashMap<String, PendingDispatch>,
    queue: DelayQueue<String>,
    inflight: JoinSet<()>,
}

impl CoalescerActor {
    async fn run(mut self, cancel: CancellationToken) {
        debug!(window = ?self.window, sink = self.sink.name(), "디바운스 시작");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                message = self.receiver.recv() => match message {
                    Some(event) => self.schedule(event),
                    None => break,
                },
                Some(expired) = self.queue.next(), if !self.queue.is_empty() => {
                    let row = expired.into_inner();
                    if let Some(pending) = self.pending.remove(&row) {
                        self.dispatch(pending.event);
                    }
                }
                Some(joined) = self.inflight.join_next(), if !self.inflight.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "전달 태스크 비정상 종료");
                    }
                }
            }
        }

        self.shutdown().await;
    }

    fn schedule(&mut self, event: ChangeEvent) {
        let row = event.row_identity_key();
        match self.pending.get_mut(&row) {
            Some(pending) => {
                // 마지막 이벤트가 이김
                self.queue.reset(&pending.key, self.window);
                pending.event = event;
                debug!(row = %row, "디바운스 타이머 재시작");
            }
            None => {
                let key = self.queue.insert(row.clone(), self.window);
                self.pending.insert(row, PendingDispatch { event, key });
            }
        }
    }

    fn dispatch(&mut self, event: ChangeEvent) {
        let sink = self.sink.clone();
        self.inflight.spawn(async move {
            if let Err(e) = sink.deliver(&event).await {
                warn!(
                    sink = sink.name(),
                    event_id = %event.event_id(),
                    error = %e,
                    "디바운스 전달 실패"
                );
            }
        });
    }

    async fn shutdown(&mut self) {
        let flushed = self.pending.len();
        let pending: Vec<PendingDispatch> = self.pending.drain().map(|(_, p)| p).collect();
        self.queue.clear();
        for item in pending {
            self.dispatch(item.event);
        }
        if flushed > 0 {
            info!(flushed, "종료 전 대기 중인 이벤트 전달");
        }

        while let Some(joined) = self.inflight.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "전달 태스크 비정상 종료");
            }
        }
    }
}
