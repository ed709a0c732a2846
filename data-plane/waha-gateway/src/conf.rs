use envconfig::Envconfig;
use std::{env, fmt::Display, str::FromStr, time::Duration};
use waha_relay::BridgeConfig;
use waha_relay::PublisherOptions;

const ENV_PREFIX: &str = "WAHA_GW_";

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "HTTP_PORT", default = "8080")]
    pub http_port: u16,
    /// Upper bound on a single outbound provider call.
    #[envconfig(from = "REQUEST_TIMEOUT_MS", default = "30000")]
    pub request_timeout_ms: u64,
    #[envconfig(from = "STREAM_REPLAY_LIMIT", default = "50")]
    pub stream_replay_limit: usize,
    #[envconfig(from = "STREAM_KEEPALIVE_MS", default = "25000")]
    pub stream_keepalive_ms: u64,
    #[envconfig(from = "STREAM_CHANNEL_CAPACITY", default = "256")]
    pub stream_channel_capacity: usize,
    #[envconfig(from = "EVENT_BUFFER_CAPACITY", default = "200")]
    pub event_buffer_capacity: usize,
    /// Only reported on the config endpoint; inbound webhooks are not served.
    #[envconfig(from = "WAHA_WEBHOOK_TOKEN")]
    pub webhook_token: Option<String>,
    // "json" or "plain"/"text"; unset picks the tracing default
    #[envconfig(from = "LOG_FORMAT")]
    pub log_format: Option<String>,
    #[envconfig(nested)]
    pub bridge: BridgeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            request_timeout_ms: 30_000,
            stream_replay_limit: 50,
            stream_keepalive_ms: 25_000,
            stream_channel_capacity: 256,
            event_buffer_capacity: 200,
            webhook_token: None,
            log_format: None,
            bridge: BridgeConfig::default(),
        }
    }
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn publisher_options(&self) -> PublisherOptions {
        PublisherOptions {
            replay_limit: self.stream_replay_limit,
            keepalive: Duration::from_millis(self.stream_keepalive_ms.max(1)),
            channel_capacity: self.stream_channel_capacity.max(1),
        }
    }

    pub fn webhook_token_set(&self) -> bool {
        self.webhook_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }

    /// Gateway settings accept a `WAHA_GW_` prefixed override; provider
    /// settings are read as-is.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let http_port =
            read_with_prefix::<u16>("HTTP_PORT")?.unwrap_or(defaults.http_port);
        let request_timeout_ms = read_with_prefix::<u64>("REQUEST_TIMEOUT_MS")?
            .unwrap_or(defaults.request_timeout_ms);
        let stream_replay_limit =
            read_with_prefix::<usize>("STREAM_REPLAY_LIMIT")?
                .unwrap_or(defaults.stream_replay_limit);
        let stream_keepalive_ms =
            read_with_prefix::<u64>("STREAM_KEEPALIVE_MS")?
                .unwrap_or(defaults.stream_keepalive_ms);
        let stream_channel_capacity =
            read_with_prefix::<usize>("STREAM_CHANNEL_CAPACITY")?
                .unwrap_or(defaults.stream_channel_capacity);
        let event_buffer_capacity =
            read_with_prefix::<usize>("EVENT_BUFFER_CAPACITY")?
                .unwrap_or(defaults.event_buffer_capacity);
        let log_format = read_with_prefix::<String>("LOG_FORMAT")?;
        let webhook_token = read_env::<String>("WAHA_WEBHOOK_TOKEN")?;
        let bridge = BridgeConfig::init_from_env()?;
        Ok(Config {
            http_port,
            request_timeout_ms,
            stream_replay_limit,
            stream_keepalive_ms,
            stream_channel_capacity,
            event_buffer_capacity,
            webhook_token,
            log_format,
            bridge,
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("ParseError {{ name: '{name}', value: '{value}' }}")]
    Parse { name: String, value: String },
    #[error("Provider config error: {0}")]
    Provider(#[from] envconfig::Error),
}

fn read_env<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    <T as FromStr>::Err: Display,
{
    match env::var(name) {
        Ok(val) => match val.parse::<T>() {
            Ok(v) => Ok(Some(v)),
            Err(_e) => Err(ConfigError::Parse {
                name: name.to_string(),
                value: val,
            }),
        },
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(os)) => Err(ConfigError::Parse {
            name: name.to_string(),
            value: format!("non-unicode: {:?}", os),
        }),
    }
}

fn read_with_prefix<T>(base: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    <T as FromStr>::Err: Display,
{
    let prefixed = format!("{ENV_PREFIX}{base}");
    if let Some(v) = read_env::<T>(&prefixed)? {
        return Ok(Some(v));
    }
    read_env::<T>(base)
}
