//! 변경 이벤트 전달 (HTTP 웹훅, 콘솔)

use crate::change_event::ChangeEvent;
use crate::error::{CdcError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// 응답 본문 기록 최대 길이 (문자 수)
pub const MAX_BODY_CHARS: usize = 512;

/// 이벤트 전달 대상
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: &ChangeEvent) -> Result<()>;

    fn name(&self) -> &str;
}

/// 전달 결과 기록
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub delivery_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub op: String,
    pub db: String,
    pub table: String,
    pub row_key: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 전달 결과 로그 (JSON lines 파일 + tracing)
pub struct OutcomeLog {
    subscriber: String,
    file: Option<Mutex<File>>,
}

impl OutcomeLog {
    pub fn new(subscriber: impl Into<String>) -> Self {
        OutcomeLog {
            subscriber: subscriber.into(),
            file: None,
        }
    }

    pub fn with_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        self.file = Some(Mutex::new(file));
        Ok(self)
    }

    pub fn record(&self, outcome: &DispatchOutcome) {
        if outcome.success {
            info!(
                subscriber = %self.subscriber,
                delivery_id = %outcome.delivery_id,
                status = ?outcome.status,
                duration_ms = outcome.duration_ms,
                db = %outcome.db,
                table = %outcome.table,
                row_key = %outcome.row_key,
                "API 전달 성공"
            );
        } else {
            warn!(
                subscriber = %self.subscriber,
                delivery_id = %outcome.delivery_id,
                status = ?outcome.status,
                duration_ms = outcome.duration_ms,
                url = %outcome.url,
                error = ?outcome.error,
                "API 전달 실패"
            );
        }

        if let Some(file) = &self.file {
            let line = match serde_json::to_string(outcome) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "전달 결과 직렬화 실패");
                    return;
                }
            };
            if let Err(e) = writeln!(file.lock(), "{}", line) {
                warn!(error = %e, "전달 결과 기록 실패");
            }
        }
    }
}

/// HTTP POST 웹훅 전달 (재시도 없음)
pub struct HttpDispatcher {
    name: String,
    client: Client,
    url: String,
    outcomes: OutcomeLog,
}

impl HttpDispatcher {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
        outcomes: OutcomeLog,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CdcError::config(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        Ok(HttpDispatcher {
            name: name.into(),
            client,
            url: url.into(),
            outcomes,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// 상태 코드와 응답 본문. 본문을 못 읽어도 상태 코드는 돌려줍니다.
    async fn send(
        &self,
        event: &ChangeEvent,
    ) -> std::result::Result<(u16, std::result::Result<String, reqwest::Error>), reqwest::Error> {
        let response = self.client.post(&self.url).json(event).send().await?;
        let status = response.status().as_u16();
        Ok((status, response.text().await))
    }
}

#[async_trait]
impl EventSink for HttpDispatcher {
    async fn deliver(&self, event: &ChangeEvent) -> Result<()> {
        let delivery_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let result = self.send(event).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let mut outcome = DispatchOutcome {
            delivery_id,
            success: false,
            status: None,
            duration_ms,
            body: None,
            op: event.op.to_string(),
            db: event.db.clone(),
            table: event.table.clone(),
            row_key: event.row_key.canonical(),
            url: self.url.clone(),
            error: None,
        };

        let result = match result {
            Ok((status, body)) => {
                outcome.status = Some(status);
                outcome.success = (200..300).contains(&status);
                match body {
                    Ok(body) => outcome.body = Some(truncate_chars(&body, MAX_BODY_CHARS)),
                    Err(e) => {
                        warn!(
                            subscriber = %self.name,
                            status,
                            error = %e,
                            "응답 본문 읽기 실패"
                        );
                        outcome.body = Some(String::new());
                        outcome.error = Some(format!("응답 본문 읽기 실패: {}", e));
                    }
                }
                if outcome.success {
                    Ok(())
                } else {
                    let message = format!("HTTP {}", status);
                    outcome.error = Some(message.clone());
                    Err(CdcError::DispatchError(message))
                }
            }
            Err(e) => {
                outcome.error = Some(e.to_string());
                Err(CdcError::from(e))
            }
        };

        self.outcomes.record(&outcome);
        result
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

/// 표준 출력 전달
pub struct ConsoleSink {
    name: String,
    pretty: bool,
}

impl ConsoleSink {
    pub fn new(name: impl Into<String>, pretty: bool) -> Self {
        ConsoleSink {
            name: name.into(),
            pretty,
        }
    }

    pub fn render(&self, event: &ChangeEvent) -> Result<String> {
        let body = if self.pretty {
            serde_json::to_string_pretty(event)?
        } else {
            serde_json::to_string(event)?
        };
        Ok(format!("[{}] {}", self.name, body))
    }
}

#[async_trait]
impl EventSink for ConsoleSink {
    async fn deliver(&self, event: &ChangeEvent) -> Result<()> {
        let line = self.render(event)?;
        println!("{}", line);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
