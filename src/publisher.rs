//! 이벤트 버스 전송 계층
//!
//! 프로듀서는 하나의 고정 채널로 변경 이벤트를 발행하고, 구독자들은 같은 채널을 구독합니다.
//! Redis pub/sub, Redis stream, 테스트용 메모리 전송을 지원합니다.

use crate::change_event::ChangeEvent;
use crate::error::{CdcError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, OnceCell};
use tracing::{debug, info, trace, warn};

pub const DEFAULT_CHANNEL: &str = "binlog:all";

/// 구독 payload 스트림
pub type PayloadStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// 전송 계층 인터페이스
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, channel: &str, payload: Bytes, event_id: &str) -> Result<()>;

    /// 채널 구독. 연결이 끊기면 스트림이 끝납니다.
    async fn subscribe(&self, channel: &str) -> Result<PayloadStream>;

    fn name(&self) -> &'static str;
}

/// 전송 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    #[default]
    PubSub,
    Stream,
}

impl FromStr for TransportMode {
    type Err = CdcError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "pubsub" | "pub/sub" => Ok(TransportMode::PubSub),
            "stream" | "streams" => Ok(TransportMode::Stream),
            other => Err(CdcError::config(format!("알 수 없는 TRANSPORT_MODE: {}", other))),
        }
    }
}

/// Redis 접속 설정
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub addr: String,
    pub password: Option<String>,
    pub db: i64,
    pub mode: TransportMode,
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            addr: "127.0.0.1:6379".to_string(),
            password: None,
            db: 0,
            mode: TransportMode::PubSub,
        }
    }
}

impl RedisConfig {
    pub fn connection_info(&self) -> Result<ConnectionInfo> {
        let (host, port) = match self.addr.rsplit_once(':') {
            Some((host, port)) => (
                host.to_string(),
                port.parse::<u16>()
                    .map_err(|_| CdcError::config(format!("잘못된 REDIS_ADDR: {}", self.addr)))?,
            ),
            None => (self.addr.clone(), 6379),
        };

        Ok(ConnectionInfo {
            addr: ConnectionAddr::Tcp(host, port),
            redis: RedisConnectionInfo {
                db: self.db,
                password: self.password.clone().filter(|p| !p.is_empty()),
                ..Default::default()
            },
        })
    }
}

/// Redis 전송 (pub/sub 또는 stream)
///
/// 발행 연결은 [`ConnectionManager`]라서 끊기면 다음 발행부터 다시 연결됩니다.
/// 끊긴 순간의 발행은 실패로 돌아옵니다.
pub struct RedisTransport {
    client: redis::Client,
    mode: TransportMode,
    publisher: OnceCell<ConnectionManager>,
}

impl RedisTransport {
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.connection_info()?)?;
        Ok(RedisTransport {
            client,
            mode: config.mode,
            publisher: OnceCell::new(),
        })
    }

    async fn publisher(&self) -> Result<ConnectionManager> {
        let conn = self
            .publisher
            .get_or_try_init(|| async {
                let conn = ConnectionManager::new(self.client.clone()).await?;
                info!(mode = ?self.mode, "Redis 연결 완료");
                Ok::<_, CdcError>(conn)
            })
            .await?;
        Ok(conn.clone())
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.publisher().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn subscribe_pubsub(&self, channel: &str) -> Result<PayloadStream> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        info!(channel, "pub/sub 구독 시작");

        let stream = pubsub
            .into_on_message()
            .map(|msg| Bytes::copy_from_slice(msg.get_payload_bytes()));
        Ok(Box::pin(stream))
    }

    async fn subscribe_stream(&self, channel: &str) -> Result<PayloadStream> {
        // XREAD BLOCK은 연결을 점유하므로 구독마다 별도 연결
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = channel.to_string();
        info!(stream = %channel, "stream 구독 시작");

        let stream = async_stream::stream! {
            let mut last_id = "$".to_string();
            let options = StreamReadOptions::default().block(5_000).count(100);

            loop {
                let reply: StreamReadReply = match conn
                    .xread_options(&[channel.as_str()], &[last_id.as_str()], &options)
                    .await
                {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!(stream = %channel, error = %e, "XREAD 실패, 구독 종료");
                        break;
                    }
                };

                for key in reply.keys {
                    for entry in key.ids {
                        last_id = entry.id.clone();
                        match entry.get::<Vec<u8>>("payload") {
                            Some(payload) => yield Bytes::from(payload),
                            None => warn!(id = %entry.id, "payload 필드 없는 stream 항목"),
                        }
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn publish(&self, channel: &str, payload: Bytes, event_id: &str) -> Result<()> {
        let mut conn = self.publisher().await?;
        match self.mode {
            TransportMode::PubSub => {
                let receivers: i64 = conn.publish(channel, payload.as_ref()).await?;
                trace!(channel, receivers, event_id, "PUBLISH");
            }
            TransportMode::Stream => {
                let id: String = redis::cmd("XADD")
                    .arg(channel)
                    .arg("*")
                    .arg("payload")
                    .arg(payload.as_ref())
                    .arg("event_id")
                    .arg(event_id)
                    .arg("ts")
                    .arg(chrono::Utc::now().timestamp_millis())
                    .query_async(&mut conn)
                    .await?;
                trace!(channel, id = %id, event_id, "XADD");
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<PayloadStream> {
        match self.mode {
            TransportMode::PubSub => self.subscribe_pubsub(channel).await,
            TransportMode::Stream => self.subscribe_stream(channel).await,
        }
    }

    fn name(&self) -> &'static str {
        match self.mode {
            TransportMode::PubSub => "redis_pubsub",
            TransportMode::Stream => "redis_stream",
        }
    }
}

/// 프로세스 내부 broadcast 전송 (테스트용)
pub struct MemoryTransport {
    sender: broadcast::Sender<(String, Bytes)>,
    published: Mutex<Vec<(String, Bytes, String)>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        MemoryTransport {
            sender,
            published: Mutex::new(Vec::new()),
        }
    }

    /// 지금까지 발행된 (channel, payload, event_id)
    pub fn published(&self) -> Vec<(String, Bytes, String)> {
        self.published.lock().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, channel: &str, payload: Bytes, event_id: &str) -> Result<()> {
        self.published
            .lock()
            .push((channel.to_string(), payload.clone(), event_id.to_string()));
        // 구독자가 없어도 성공 (pub/sub 의미론)
        let _ = self.sender.send((channel.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<PayloadStream> {
        let receiver = self.sender.subscribe();
        let channel = channel.to_string();

        let stream = futures::stream::unfold(receiver, move |mut receiver| {
            let channel = channel.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok((c, payload)) if c == channel => return Some((payload, receiver)),
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "메모리 구독 지연으로 메시지 유실");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// 발행 감사 로그 (한 줄에 이벤트 하나)
pub struct AuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl AuditLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(AuditLog {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn record(&self, event_id: &str, payload: &[u8]) -> Result<()> {
        let line = format!(
            "{} event_id={} payload={}\n",
            chrono::Utc::now().to_rfc3339(),
            event_id,
            String::from_utf8_lossy(payload)
        );
        self.file.lock().write_all(line.as_bytes())?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// 변경 이벤트 발행기
pub struct BusPublisher {
    transport: Arc<dyn Transport>,
    channel: String,
    audit: Option<AuditLog>,
    published: AtomicU64,
}

impl BusPublisher {
    pub fn new(transport: Arc<dyn Transport>, channel: impl Into<String>) -> Self {
        BusPublisher {
            transport,
            channel: channel.into(),
            audit: None,
            published: AtomicU64::new(0),
        }
    }

    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        info!(path = ?audit.path(), "발행 감사 로그 활성화");
        self.audit = Some(audit);
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// 직렬화 후 발행
    ///
    /// 감사 로그 실패는 경고만 남기고 발행 결과에 영향을 주지 않습니다.
    pub async fn publish_event(&self, event: &ChangeEvent) -> Result<()> {
        let payload = Bytes::from(event.to_json_bytes()?);
        let event_id = event.event_id();

        self.transport
            .publish(&self.channel, payload.clone(), &event_id)
            .await?;
        self.published.fetch_add(1, Ordering::Relaxed);
        debug!(event_id = %event_id, channel = %self.channel, "이벤트 발행");

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.record(&event_id, &payload) {
                warn!(error = %e, "감사 로그 기록 실패");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_event::{OperationType, RowKey};
    use std::collections::BTreeMap;
    use std::net::SocketAddr;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    fn sample_event() -> ChangeEvent {
        let mut after = BTreeMap::new();
        after.insert("id".to_string(), serde_json::json!(1));
        ChangeEvent {
            op: OperationType::Create,
            timestamp: "2024-05-01 10:00:00".to_string(),
            db: "shop".to_string(),
            table: "orders".to_string(),
            row_key: RowKey::Scalar(serde_json::json!(1)),
            after: Some(after),
            before: None,
            changes: None,
            tombstone: false,
        }
    }

    #[test]
    fn test_transport_mode_parse() {
        assert_eq!("pubsub".parse::<TransportMode>().unwrap(), TransportMode::PubSub);
        assert_eq!("STREAM".parse::<TransportMode>().unwrap(), TransportMode::Stream);
        assert!("kafka".parse::<TransportMode>().is_err());
    }

    #[test]
    fn test_redis_connection_info() {
        let config = RedisConfig {
            addr: "redis.local:6380".to_string(),
            password: Some("pw".to_string()),
            db: 2,
            mode: TransportMode::Stream,
        };
        let info = config.connection_info().unwrap();
        assert!(matches!(
            info.addr,
            ConnectionAddr::Tcp(ref host, 6380) if host == "redis.local"
        ));
        assert_eq!(info.redis.db, 2);
        assert_eq!(info.redis.password.as_deref(), Some("pw"));

        let bad = RedisConfig {
            addr: "redis.local:port".to_string(),
            ..Default::default()
        };
        assert!(bad.connection_info().is_err());
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let transport = Arc::new(MemoryTransport::new());
        let mut stream = transport.subscribe(DEFAULT_CHANNEL).await.unwrap();
        let mut other = transport.subscribe("other").await.unwrap();

        let publisher = BusPublisher::new(transport.clone(), DEFAULT_CHANNEL);
        publisher.publish_event(&sample_event()).await.unwrap();

        let payload = stream.next().await.unwrap();
        let decoded = ChangeEvent::from_json_bytes(&payload).unwrap();
        assert_eq!(decoded, sample_event());
        assert_eq!(publisher.published_count(), 1);

        let published = transport.published();
        assert_eq!(published[0].2, "shop.orders:create:1");

        let nothing =
            tokio::time::timeout(std::time::Duration::from_millis(50), other.next()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn test_audit_log_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("messages.log");
        let transport = Arc::new(MemoryTransport::new());
        let publisher = BusPublisher::new(transport, DEFAULT_CHANNEL)
            .with_audit_log(AuditLog::open(&path).unwrap());

        publisher.publish_event(&sample_event()).await.unwrap();
        publisher.publish_event(&sample_event()).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("event_id=shop.orders:create:1 payload={"));
    }

    enum Reply {
        Send(Vec<u8>),
        SendThenClose(Vec<u8>),
        /// 응답 후 잠시 뒤 push 메시지
        SendThenPush(Vec<u8>, Vec<u8>),
        Hang,
    }

    type Handler = Arc<dyn Fn(usize, &[String]) -> Reply + Send + Sync>;

    /// RESP2만 말하는 최소한의 Redis 서버
    struct FakeRedis {
        addr: SocketAddr,
        commands: Arc<Mutex<Vec<Vec<String>>>>,
        connections: Arc<AtomicUsize>,
    }

    impl FakeRedis {
        async fn start(handler: impl Fn(usize, &[String]) -> Reply + Send + Sync + 'static) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let commands = Arc::new(Mutex::new(Vec::new()));
            let connections = Arc::new(AtomicUsize::new(0));
            let handler: Handler = Arc::new(handler);

            let accepted = connections.clone();
            let recorded = commands.clone();
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let index = accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(socket, index, handler.clone(), recorded.clone()));
                }
            });

            FakeRedis {
                addr,
                commands,
                connections,
            }
        }

        fn config(&self, mode: TransportMode) -> RedisConfig {
            RedisConfig {
                addr: self.addr.to_string(),
                password: None,
                db: 0,
                mode,
            }
        }

        fn commands(&self, name: &str) -> Vec<Vec<String>> {
            self.commands
                .lock()
                .iter()
                .filter(|args| args[0].eq_ignore_ascii_case(name))
                .cloned()
                .collect()
        }

        fn connections(&self) -> usize {
            self.connections.load(Ordering::SeqCst)
        }
    }

    async fn serve(
        socket: TcpStream,
        index: usize,
        handler: Handler,
        commands: Arc<Mutex<Vec<Vec<String>>>>,
    ) {
        let (read, mut write) = socket.into_split();
        let mut reader = BufReader::new(read);

        while let Some(args) = read_command(&mut reader).await {
            commands.lock().push(args.clone());
            match handler(index, &args) {
                Reply::Send(bytes) => {
                    if write.write_all(&bytes).await.is_err() {
                        return;
                    }
                }
                Reply::SendThenClose(bytes) => {
                    let _ = write.write_all(&bytes).await;
                    return;
                }
                Reply::SendThenPush(bytes, push) => {
                    if write.write_all(&bytes).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    if write.write_all(&push).await.is_err() {
                        return;
                    }
                }
                Reply::Hang => std::future::pending::<()>().await,
            }
        }
    }

    async fn read_command(
        reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    ) -> Option<Vec<String>> {
        let mut line = String::new();
        if reader.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        let count: usize = line.trim_end().strip_prefix('*')?.parse().ok()?;

        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            line.clear();
            reader.read_line(&mut line).await.ok()?;
            let len: usize = line.trim_end().strip_prefix('$')?.parse().ok()?;
            let mut buf = vec![0; len + 2];
            reader.read_exact(&mut buf).await.ok()?;
            buf.truncate(len);
            args.push(String::from_utf8_lossy(&buf).into_owned());
        }
        if args.is_empty() {
            return None;
        }
        Some(args)
    }

    fn bulk(data: &[u8]) -> Vec<u8> {
        let mut out = format!("${}\r\n", data.len()).into_bytes();
        out.extend_from_slice(data);
        out.extend_from_slice(b"\r\n");
        out
    }

    fn array(items: Vec<Vec<u8>>) -> Vec<u8> {
        let mut out = format!("*{}\r\n", items.len()).into_bytes();
        for item in items {
            out.extend(item);
        }
        out
    }

    /// 핸드셰이크(CLIENT SETINFO 등)와 PING
    fn default_reply(args: &[String]) -> Reply {
        if args[0].eq_ignore_ascii_case("PING") {
            Reply::Send(b"+PONG\r\n".to_vec())
        } else {
            Reply::Send(b"+OK\r\n".to_vec())
        }
    }

    fn stream_entry(key: &str, id: &str, payload: &[u8]) -> Vec<u8> {
        array(vec![array(vec![
            bulk(key.as_bytes()),
            array(vec![array(vec![
                bulk(id.as_bytes()),
                array(vec![bulk(b"payload"), bulk(payload)]),
            ])]),
        ])])
    }

    #[tokio::test]
    async fn test_publish_recovers_after_connection_drop() {
        let server = FakeRedis::start(|index, args| {
            if args[0].eq_ignore_ascii_case("PUBLISH") {
                if index == 0 {
                    Reply::SendThenClose(b":1\r\n".to_vec())
                } else {
                    Reply::Send(b":1\r\n".to_vec())
                }
            } else {
                default_reply(args)
            }
        })
        .await;

        let transport = RedisTransport::new(&server.config(TransportMode::PubSub)).unwrap();
        transport
            .publish(DEFAULT_CHANNEL, Bytes::from_static(b"first"), "evt-1")
            .await
            .unwrap();

        // 끊긴 직후의 발행은 실패할 수 있지만 곧 다시 연결되어야 함
        let mut recovered = false;
        for _ in 0..40 {
            if transport
                .publish(DEFAULT_CHANNEL, Bytes::from_static(b"second"), "evt-2")
                .await
                .is_ok()
            {
                recovered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        assert!(recovered);
        assert!(server.connections() >= 2);

        let publishes = server.commands("PUBLISH");
        assert_eq!(publishes[0], vec!["PUBLISH", DEFAULT_CHANNEL, "first"]);
        assert_eq!(
            publishes.last().unwrap(),
            &vec!["PUBLISH".to_string(), DEFAULT_CHANNEL.to_string(), "second".to_string()]
        );
    }

    #[tokio::test]
    async fn test_ping_redis() {
        let server = FakeRedis::start(|_, args| default_reply(args)).await;
        let transport = RedisTransport::new(&server.config(TransportMode::PubSub)).unwrap();

        transport.ping().await.unwrap();
        assert_eq!(server.commands("PING").len(), 1);
    }

    #[tokio::test]
    async fn test_stream_publish_uses_xadd() {
        let server = FakeRedis::start(|_, args| {
            if args[0].eq_ignore_ascii_case("XADD") {
                Reply::Send(bulk(b"1700000000000-0"))
            } else {
                default_reply(args)
            }
        })
        .await;

        let transport = RedisTransport::new(&server.config(TransportMode::Stream)).unwrap();
        let publisher = BusPublisher::new(Arc::new(transport), DEFAULT_CHANNEL);
        publisher.publish_event(&sample_event()).await.unwrap();

        let xadds = server.commands("XADD");
        assert_eq!(xadds.len(), 1);
        let args = &xadds[0];
        assert_eq!(&args[1..4], &[DEFAULT_CHANNEL, "*", "payload"]);
        assert_eq!(
            ChangeEvent::from_json_bytes(args[4].as_bytes()).unwrap(),
            sample_event()
        );
        assert_eq!(&args[5..7], &["event_id", "shop.orders:create:1"]);
        assert_eq!(args[7], "ts");
        assert!(args[8].parse::<i64>().is_ok());
    }

    #[tokio::test]
    async fn test_stream_subscribe_resumes_from_last_id() {
        let server = FakeRedis::start(|_, args| {
            if !args[0].eq_ignore_ascii_case("XREAD") {
                return default_reply(args);
            }
            let key = &args[args.len() - 2];
            match args[args.len() - 1].as_str() {
                "$" => Reply::Send(stream_entry(key, "1-0", b"first")),
                "1-0" => Reply::Send(stream_entry(key, "2-0", b"second")),
                _ => Reply::Hang,
            }
        })
        .await;

        let transport = RedisTransport::new(&server.config(TransportMode::Stream)).unwrap();
        let mut stream = transport.subscribe(DEFAULT_CHANNEL).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.as_ref(), b"first");
        assert_eq!(second.as_ref(), b"second");

        let reads = server.commands("XREAD");
        assert!(reads.len() >= 2);
        for read in &reads {
            assert!(read.contains(&"BLOCK".to_string()));
            assert_eq!(read[read.len() - 2], DEFAULT_CHANNEL);
        }
        assert_eq!(reads[0].last().unwrap(), "$");
        assert_eq!(reads[1].last().unwrap(), "1-0");
    }

    #[tokio::test]
    async fn test_pubsub_subscribe_receives_message() {
        let server = FakeRedis::start(|_, args| {
            if args[0].eq_ignore_ascii_case("SUBSCRIBE") {
                let channel = args[1].as_bytes();
                Reply::SendThenPush(
                    array(vec![bulk(b"subscribe"), bulk(channel), b":1\r\n".to_vec()]),
                    array(vec![bulk(b"message"), bulk(channel), bulk(b"hello")]),
                )
            } else {
                default_reply(args)
            }
        })
        .await;

        let transport = RedisTransport::new(&server.config(TransportMode::PubSub)).unwrap();
        let mut stream = transport.subscribe(DEFAULT_CHANNEL).await.unwrap();

        let payload = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload.as_ref(), b"hello");
        assert_eq!(
            server.commands("SUBSCRIBE"),
            vec![vec!["SUBSCRIBE".to_string(), DEFAULT_CHANNEL.to_string()]]
        );
    }
}
