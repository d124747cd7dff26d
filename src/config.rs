//! 환경 변수 기반 설정
//!
//! 값은 조회 함수(`Fn(&str) -> Option<String>`)를 통해 읽기 때문에
//! 프로세스 환경, env 파일, 테스트용 맵을 같은 방식으로 다룰 수 있습니다.
//!
//! 필수 키 누락, 숫자/기간 형식 오류는 설정 에러입니다.
//! bool 값은 알 수 없는 문자열이면 기본값을 씁니다.

use crate::cdc_engine::CdcConfig;
use crate::connection::ConnectionConfig;
use crate::error::{CdcError, Result};
use crate::filter::FilterSpec;
use crate::publisher::{RedisConfig, TransportMode, DEFAULT_CHANNEL};
use chrono::{FixedOffset, Offset};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

/// 기본 이벤트 시간대 (+05:30)
pub const DEFAULT_TZ_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// 프로듀서(binlog-emitter) 설정
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    pub connection: ConnectionConfig,
    pub engine: CdcConfig,
    pub heartbeat_period: Duration,
    pub redis: RedisConfig,
    pub channel: String,
    /// 발행 감사 로그
    pub message_log_file: Option<PathBuf>,
    pub checkpoint_file: Option<PathBuf>,
    pub tz_offset: FixedOffset,
}

impl EmitterConfig {
    /// 프로세스 환경 + 현재 디렉터리의 `.env` (프로세스 환경 우선)
    pub fn from_env() -> Result<Self> {
        let file = if Path::new(".env").exists() {
            load_env_file(".env")?
        } else {
            HashMap::new()
        };
        Self::from_lookup(|key| std::env::var(key).ok().or_else(|| file.get(key).cloned()))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env(lookup);

        let mut connection = ConnectionConfig::new(env.required("DB_HOST")?, env.required("DB_USER")?);
        connection.password = env.string("DB_PASS").unwrap_or_default();
        connection.port = env.number("DB_PORT", 3306)?;
        connection.database = Some(env.required("DB_NAME")?);
        connection.server_id = env.number("SERVER_ID", 100)?;
        if let Some(addr) = env.string("ADDR") {
            connection = connection.with_addr(&addr)?;
        }

        let defaults = CdcConfig::default();
        let engine = CdcConfig {
            use_gtid: env.boolean("USE_GTID", false),
            reconnect_delay: env.duration("RECONNECT_DELAY", defaults.reconnect_delay)?,
            read_timeout: env.duration("READ_TIMEOUT", defaults.read_timeout)?,
            table_map_retention: env.duration("TABLE_MAP_RETENTION", defaults.table_map_retention)?,
            checkpoint_every: env.number("CHECKPOINT_EVERY", defaults.checkpoint_every)?,
        };

        let tz_offset = match env.string("EVENT_TZ_OFFSET") {
            Some(text) => FixedOffset::from_str(&text)
                .map_err(|e| CdcError::config(format!("EVENT_TZ_OFFSET={}: {}", text, e)))?,
            None => default_tz_offset(),
        };

        Ok(EmitterConfig {
            connection,
            engine,
            heartbeat_period: env.duration("HEARTBEAT_PERIOD", Duration::from_secs(30))?,
            redis: redis_config(&env)?,
            channel: channel(&env),
            message_log_file: env.string("MESSAGE_LOG_FILE").map(PathBuf::from),
            checkpoint_file: env.string("CHECKPOINT_FILE").map(PathBuf::from),
            tz_offset,
        })
    }
}

pub fn default_tz_offset() -> FixedOffset {
    FixedOffset::east_opt(DEFAULT_TZ_OFFSET_SECS).unwrap_or_else(|| chrono::Utc.fix())
}

/// 구독자 설정
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub name: String,
    pub redis: RedisConfig,
    pub channel: String,
    pub pretty_print: bool,
    pub filter: FilterSpec,
    /// 0이면 디바운스 없음
    pub debounce: Duration,
    /// 없으면 콘솔 출력
    pub api_url: Option<String>,
    pub api_timeout: Duration,
    pub api_log_file: Option<PathBuf>,
    pub resubscribe_delay: Duration,
}

impl SubscriberConfig {
    pub fn from_lookup(
        default_name: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let env = Env(lookup);

        let filter = FilterSpec::default()
            .with_dbs(env.csv("FILTER_DBS"))
            .with_tables(env.csv("FILTER_TABLES"))
            .with_ids(env.csv("FILTER_IDS"))
            .with_ops(env.csv("FILTER_OPS"))
            .with_change_any(env.csv("FILTER_CHANGE_ANY"))
            .with_change_all(env.csv("FILTER_CHANGE_ALL"))
            .with_exclude_dbs(env.csv("EXCLUDE_DBS"))
            .with_exclude_tables(env.csv("EXCLUDE_TABLES"));

        Ok(SubscriberConfig {
            name: env
                .string("SUBSCRIBER_NAME")
                .unwrap_or_else(|| default_name.to_string()),
            redis: redis_config(&env)?,
            channel: channel(&env),
            pretty_print: env.boolean("PRETTY_PRINT", false),
            filter,
            debounce: env.seconds("DEBOUNCE_SECONDS", Duration::ZERO)?,
            api_url: env.string("API_URL"),
            api_timeout: env.duration("API_TIMEOUT", Duration::from_secs(10))?,
            api_log_file: env.string("API_LOG_FILE").map(PathBuf::from),
            resubscribe_delay: env.duration("RESUBSCRIBE_DELAY", Duration::from_secs(2))?,
        })
    }

    /// `ENV_FILES`(쉼표 구분) 또는 `ENV_FILE`에 나열된 파일마다 구독자 하나
    ///
    /// 파일 값이 프로세스 환경보다 우선하고, 파일 이름(확장자 제외)이 기본 구독자 이름입니다.
    /// 파일이 없으면 프로세스 환경만으로 구독자 하나를 만듭니다.
    pub fn all_from_env() -> Result<Vec<Self>> {
        let files = std::env::var("ENV_FILES")
            .ok()
            .or_else(|| std::env::var("ENV_FILE").ok())
            .map(|list| parse_csv(&list))
            .unwrap_or_default();

        if files.is_empty() {
            return Ok(vec![Self::from_lookup("default", |key| {
                std::env::var(key).ok()
            })?]);
        }

        files
            .iter()
            .map(|file| {
                let values = load_env_file(file)?;
                let name = Path::new(file)
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file.clone());
                Self::from_lookup(&name, |key| {
                    values.get(key).cloned().or_else(|| std::env::var(key).ok())
                })
            })
            .collect()
    }
}

fn redis_config<F: Fn(&str) -> Option<String>>(env: &Env<F>) -> Result<RedisConfig> {
    let defaults = RedisConfig::default();
    Ok(RedisConfig {
        addr: env.string("REDIS_ADDR").unwrap_or(defaults.addr),
        password: env.string("REDIS_PASS"),
        db: env.number("REDIS_DB", defaults.db)?,
        mode: match env.string("TRANSPORT_MODE") {
            Some(mode) => mode.parse()?,
            None => TransportMode::default(),
        },
    })
}

fn channel<F: Fn(&str) -> Option<String>>(env: &Env<F>) -> String {
    env.string("REDIS_CHANNEL")
        .or_else(|| env.string("REDIS_STREAM"))
        .unwrap_or_else(|| DEFAULT_CHANNEL.to_string())
}

/// 조회 함수 래퍼
struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// 공백 제거 후 비어 있으면 없음
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.string(key)
            .ok_or_else(|| CdcError::config(format!("필수 설정 누락: {}", key)))
    }

    fn number<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.string(key) {
            Some(text) => text
                .parse()
                .map_err(|_| CdcError::config(format!("숫자 형식 오류: {}={}", key, text))),
            None => Ok(default),
        }
    }

    fn boolean(&self, key: &str, default: bool) -> bool {
        match self.string(key) {
            Some(text) => parse_bool(&text).unwrap_or_else(|| {
                debug!(key, value = %text, "알 수 없는 bool 값, 기본값 사용");
                default
            }),
            None => default,
        }
    }

    /// `5s`, `1h 30m` 또는 초 단위 정수
    fn duration(&self, key: &str, default: Duration) -> Result<Duration> {
        match self.string(key) {
            Some(text) => parse_duration(&text)
                .ok_or_else(|| CdcError::config(format!("기간 형식 오류: {}={}", key, text))),
            None => Ok(default),
        }
    }

    /// 소수 초
    fn seconds(&self, key: &str, default: Duration) -> Result<Duration> {
        match self.string(key) {
            Some(text) => text
                .parse::<f64>()
                .ok()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .ok_or_else(|| CdcError::config(format!("초 형식 오류: {}={}", key, text))),
            None => Ok(default),
        }
    }

    fn csv(&self, key: &str) -> HashSet<String> {
        self.string(key)
            .map(|list| parse_csv(&list).into_iter().collect())
            .unwrap_or_default()
    }
}

/// 쉼표 구분 목록 (빈 항목 제외)
pub fn parse_csv(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    if let Ok(secs) = text.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    humantime::parse_duration(text).ok()
}

fn env_line_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:export\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.*)$").ok())
        .as_ref()
}

/// `KEY=VALUE` 형식 env 파일 내용 파싱
pub fn parse_env_file(content: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    let Some(pattern) = env_line_regex() else {
        return values;
    };
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some(captures) = pattern.captures(line) {
            values.insert(captures[1].to_string(), unquote(&captures[2]));
        }
    }
    values
}

fn unquote(raw: &str) -> String {
    let raw = raw.trim();
    for quote in ['"', '\''] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return raw[1..raw.len() - 1].to_string();
        }
    }
    // 따옴표 없는 값의 행 끝 주석
    match raw.find(" #") {
        Some(index) => raw[..index].trim_end().to_string(),
        None => raw.to_string(),
    }
}

pub fn load_env_file(path: impl AsRef<Path>) -> Result<HashMap<String, String>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| CdcError::config(format!("env 파일 읽기 실패 {}: {}", path.display(), e)))?;
    Ok(parse_env_file(&content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [("DB_USER", "repl"), ("DB_HOST", "db.local"), ("DB_NAME", "shop")];

    #[test]
    fn test_emitter_defaults() {
        let config = assert_ok!(EmitterConfig::from_lookup(lookup(&REQUIRED)));

        assert_eq!(config.connection.hostname, "db.local");
        assert_eq!(config.connection.port, 3306);
        assert_eq!(config.connection.server_id, 100);
        assert_eq!(config.connection.database.as_deref(), Some("shop"));
        assert!(!config.engine.use_gtid);
        assert_eq!(config.engine.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.engine.read_timeout, Duration::from_secs(90));
        assert_eq!(config.engine.table_map_retention, Duration::from_secs(3600));
        assert_eq!(config.engine.checkpoint_every, 100);
        assert_eq!(config.heartbeat_period, Duration::from_secs(30));
        assert_eq!(config.redis.addr, "127.0.0.1:6379");
        assert_eq!(config.redis.mode, TransportMode::PubSub);
        assert_eq!(config.channel, "binlog:all");
        assert_eq!(config.tz_offset.local_minus_utc(), 19800);
        assert!(config.checkpoint_file.is_none());
    }

    #[test]
    fn test_emitter_missing_required_key() {
        let result = EmitterConfig::from_lookup(lookup(&[("DB_USER", "repl"), ("DB_HOST", "db")]));
        match result {
            Err(CdcError::ConfigError(message)) => assert!(message.contains("DB_NAME")),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }

        // 빈 값도 누락
        let mut pairs = REQUIRED.to_vec();
        pairs[0] = ("DB_USER", "  ");
        assert_err!(EmitterConfig::from_lookup(lookup(&pairs)));
    }

    #[test]
    fn test_emitter_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("ADDR", "10.0.0.5:3307"),
            ("USE_GTID", "yes"),
            ("READ_TIMEOUT", "2m"),
            ("RECONNECT_DELAY", "1"),
            ("REDIS_STREAM", "cdc:orders"),
            ("TRANSPORT_MODE", "stream"),
            ("EVENT_TZ_OFFSET", "+00:00"),
            ("CHECKPOINT_FILE", "/var/lib/fanout/pos.json"),
        ]);
        let config = assert_ok!(EmitterConfig::from_lookup(lookup(&pairs)));

        assert_eq!(config.connection.hostname, "10.0.0.5");
        assert_eq!(config.connection.port, 3307);
        assert!(config.engine.use_gtid);
        assert_eq!(config.engine.read_timeout, Duration::from_secs(120));
        assert_eq!(config.engine.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.channel, "cdc:orders");
        assert_eq!(config.redis.mode, TransportMode::Stream);
        assert_eq!(config.tz_offset.local_minus_utc(), 0);
        assert_eq!(
            config.checkpoint_file,
            Some(PathBuf::from("/var/lib/fanout/pos.json"))
        );
    }

    #[test]
    fn test_channel_prefers_redis_channel() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([("REDIS_STREAM", "legacy"), ("REDIS_CHANNEL", "binlog:shop")]);
        let config = assert_ok!(EmitterConfig::from_lookup(lookup(&pairs)));
        assert_eq!(config.channel, "binlog:shop");
    }

    #[test]
    fn test_malformed_values_are_fatal() {
        for (key, value) in [
            ("DB_PORT", "abc"),
            ("SERVER_ID", "-1"),
            ("READ_TIMEOUT", "soon"),
            ("REDIS_DB", "one"),
            ("EVENT_TZ_OFFSET", "IST"),
            ("TRANSPORT_MODE", "kafka"),
        ] {
            let mut pairs = REQUIRED.to_vec();
            pairs.push((key, value));
            assert!(
                matches!(EmitterConfig::from_lookup(lookup(&pairs)), Err(CdcError::ConfigError(_))),
                "{}={} should be rejected",
                key,
                value
            );
        }
    }

    #[test]
    fn test_unknown_bool_falls_back() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("USE_GTID", "maybe"));
        let config = assert_ok!(EmitterConfig::from_lookup(lookup(&pairs)));
        assert!(!config.engine.use_gtid);
    }

    #[test]
    fn test_subscriber_config() {
        let config = assert_ok!(SubscriberConfig::from_lookup(
            "orders",
            lookup(&[
                ("FILTER_TABLES", "orders, order_items,"),
                ("FILTER_OPS", "UPDATE"),
                ("FILTER_CHANGE_ANY", "status"),
                ("EXCLUDE_DBS", "mysql"),
                ("DEBOUNCE_SECONDS", "1.5"),
                ("API_URL", "http://hooks.local/orders"),
                ("PRETTY_PRINT", "true"),
            ])
        ));

        assert_eq!(config.name, "orders");
        assert_eq!(config.filter.tables.len(), 2);
        assert!(config.filter.tables.contains("order_items"));
        assert!(config.filter.ops.contains("update"));
        assert!(config.filter.exclude_dbs.contains("mysql"));
        assert_eq!(config.debounce, Duration::from_millis(1500));
        assert_eq!(config.api_url.as_deref(), Some("http://hooks.local/orders"));
        assert_eq!(config.api_timeout, Duration::from_secs(10));
        assert_eq!(config.resubscribe_delay, Duration::from_secs(2));
        assert!(config.pretty_print);
    }

    #[test]
    fn test_subscriber_defaults_and_errors() {
        let config = assert_ok!(SubscriberConfig::from_lookup(
            "default",
            lookup(&[("SUBSCRIBER_NAME", "audit")])
        ));
        assert_eq!(config.name, "audit");
        assert!(config.filter.is_pass_all());
        assert!(config.debounce.is_zero());
        assert!(config.api_url.is_none());

        assert_err!(SubscriberConfig::from_lookup(
            "default",
            lookup(&[("DEBOUNCE_SECONDS", "-1")])
        ));
        assert_err!(SubscriberConfig::from_lookup(
            "default",
            lookup(&[("API_TIMEOUT", "fast")])
        ));
    }

    #[test]
    fn test_parse_env_file() {
        let values = parse_env_file(
            r#"
# comment
DB_USER=repl
export DB_HOST = db.local
DB_PASS="p#ss word"
REDIS_PASS='secret'
FILTER_OPS=update # only updates
not a line
"#,
        );

        assert_eq!(values.get("DB_USER").map(String::as_str), Some("repl"));
        assert_eq!(values.get("DB_HOST").map(String::as_str), Some("db.local"));
        assert_eq!(values.get("DB_PASS").map(String::as_str), Some("p#ss word"));
        assert_eq!(values.get("REDIS_PASS").map(String::as_str), Some("secret"));
        assert_eq!(values.get("FILTER_OPS").map(String::as_str), Some("update"));
        assert_eq!(values.len(), 5);
    }

    #[test]
    fn test_load_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.env");
        std::fs::write(&path, "API_URL=http://hooks.local\n").unwrap();

        let values = assert_ok!(load_env_file(&path));
        assert_eq!(values["API_URL"], "http://hooks.local");
        assert_err!(load_env_file(dir.path().join("missing.env")));
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_csv(" a, ,b "), vec!["a", "b"]);
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_duration("90"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("later"), None);
    }
}
