use envconfig::Envconfig;
use std::time::Duration;
use url::Url;

use crate::error::BridgeError;

pub const API_KEY_PARAM: &str = "x-api-key";
const REDACTED: &str = "***";

#[derive(Envconfig, Clone, Debug)]
pub struct BridgeConfig {
    /// Provider REST base address; the feed address is derived from it
    /// unless `WAHA_WS_URL` is set.
    #[envconfig(from = "WAHA_API_URL", default = "http://localhost:3000")]
    pub api_url: String,
    #[envconfig(from = "WAHA_API_KEY")]
    pub api_key: Option<String>,
    #[envconfig(from = "WAHA_WS_URL")]
    pub ws_url: Option<String>,
    #[envconfig(from = "WAHA_WS_SESSION", default = "*")]
    pub ws_session: String,
    #[envconfig(from = "WAHA_WS_EVENTS", default = "*")]
    pub ws_events: String,
    #[envconfig(from = "WAHA_WS_BACKOFF_FLOOR_MS", default = "500")]
    pub backoff_floor_ms: u64,
    #[envconfig(from = "WAHA_WS_BACKOFF_CEILING_MS", default = "30000")]
    pub backoff_ceiling_ms: u64,
    #[envconfig(from = "WAHA_WS_KEEPALIVE_MS", default = "25000")]
    pub keepalive_ms: u64,
    /// Comma separated event classes that only duplicate a more specific one.
    #[envconfig(from = "WAHA_WS_SUPPRESS_EVENTS", default = "message.any")]
    pub suppress_events: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:3000".to_string(),
            api_key: None,
            ws_url: None,
            ws_session: "*".to_string(),
            ws_events: "*".to_string(),
            backoff_floor_ms: 500,
            backoff_ceiling_ms: 30_000,
            keepalive_ms: 25_000,
            suppress_events: "message.any".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn api_key(&self) -> Option<&str> {
        non_blank(self.api_key.as_deref())
    }

    pub fn backoff_floor(&self) -> Duration {
        Duration::from_millis(self.backoff_floor_ms)
    }

    pub fn backoff_ceiling(&self) -> Duration {
        Duration::from_millis(self.backoff_ceiling_ms)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms.max(1))
    }

    pub fn suppressed_events(&self) -> Vec<String> {
        self.suppress_events
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Resolve the realtime feed address, access key included.
    pub fn feed_url(&self) -> Result<Url, BridgeError> {
        if let Some(explicit) = non_blank(self.ws_url.as_deref()) {
            let mut url = Url::parse(explicit)?;
            if let Some(key) = self.api_key() {
                if !url.query_pairs().any(|(k, _)| k == API_KEY_PARAM) {
                    url.query_pairs_mut().append_pair(API_KEY_PARAM, key);
                }
            }
            return Ok(url);
        }

        let mut url = Url::parse(self.api_url.trim())?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(BridgeError::UnsupportedScheme(other.to_string()));
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| BridgeError::UnsupportedScheme(scheme.to_string()))?;
        let _ = url.set_username("");
        let _ = url.set_password(None);
        url.set_path("/ws");
        url.set_query(None);
        url.set_fragment(None);
        {
            let mut query = url.query_pairs_mut();
            if let Some(key) = self.api_key() {
                query.append_pair(API_KEY_PARAM, key);
            }
            let session = non_blank(Some(&self.ws_session)).unwrap_or("*");
            let events = non_blank(Some(&self.ws_events)).unwrap_or("*");
            query.append_pair("session", session);
            query.append_pair("events", events);
        }
        Ok(url)
    }
}

/// Render `url` with the access key value masked.
pub fn redact(url: &Url) -> String {
    if !url.query_pairs().any(|(k, _)| k == API_KEY_PARAM) {
        return url.to_string();
    }
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == API_KEY_PARAM {
                REDACTED.to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), v)
        })
        .collect();
    let mut out = url.clone();
    out.query_pairs_mut().clear().extend_pairs(pairs);
    out.to_string()
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn cfg(api_url: &str, key: Option<&str>) -> BridgeConfig {
        BridgeConfig {
            api_url: api_url.into(),
            api_key: key.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn derives_ws_address_from_http_base() {
        let url = cfg("http://waha.local:3000", Some("secret"))
            .feed_url()
            .unwrap();
        assert_eq!(
            url.as_str(),
            "ws://waha.local:3000/ws?x-api-key=secret&session=*&events=*"
        );
    }

    #[test]
    fn https_maps_to_wss_and_drops_path() {
        let mut c = cfg("https://user:pw@api.example.com/base?x=1", None);
        c.ws_session = "  work ".into();
        let url = c.feed_url().unwrap();
        assert_eq!(
            url.as_str(),
            "wss://api.example.com/ws?session=work&events=*"
        );
    }

    #[test]
    fn blank_session_falls_back_to_wildcard() {
        let mut c = cfg("http://h", Some("  "));
        c.ws_session = "   ".into();
        let url = c.feed_url().unwrap();
        assert_eq!(url.as_str(), "ws://h/ws?session=*&events=*");
    }

    #[test]
    fn explicit_address_gets_key_once() {
        let mut c = cfg("http://ignored", Some("k1"));
        c.ws_url = Some("ws://feed:9/socket?session=a".into());
        assert_eq!(
            c.feed_url().unwrap().as_str(),
            "ws://feed:9/socket?session=a&x-api-key=k1"
        );

        c.ws_url = Some("ws://feed:9/socket?x-api-key=mine".into());
        assert_eq!(
            c.feed_url().unwrap().as_str(),
            "ws://feed:9/socket?x-api-key=mine"
        );
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let err = cfg("ftp://h", None).feed_url().unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedScheme(_)));
        assert!(cfg("not a url", None).feed_url().is_err());
    }

    #[test]
    fn redacts_key() {
        let url = cfg("http://h:1", Some("secret")).feed_url().unwrap();
        let shown = redact(&url);
        assert!(!shown.contains("secret"));
        assert_eq!(shown, "ws://h:1/ws?x-api-key=***&session=*&events=*");

        let plain = cfg("http://h:1", None).feed_url().unwrap();
        assert_eq!(redact(&plain), plain.to_string());
    }

    #[test]
    fn suppressed_list_parsing() {
        let mut c = BridgeConfig::default();
        assert_eq!(c.suppressed_events(), vec!["message.any"]);
        c.suppress_events = " message.any, ,presence.any ".into();
        assert_eq!(c.suppressed_events(), vec!["message.any", "presence.any"]);
        c.suppress_events = String::new();
        assert!(c.suppressed_events().is_empty());
    }

    #[test]
    #[serial]
    fn loads_from_env() {
        unsafe {
            std::env::set_var("WAHA_API_URL", "https://waha.example.com");
            std::env::set_var("WAHA_API_KEY", "abc");
            std::env::set_var("WAHA_WS_BACKOFF_FLOOR_MS", "250");
        }
        let c = BridgeConfig::init_from_env().unwrap();
        assert_eq!(c.api_url, "https://waha.example.com");
        assert_eq!(c.api_key(), Some("abc"));
        assert_eq!(c.backoff_floor(), Duration::from_millis(250));
        assert_eq!(c.backoff_ceiling(), Duration::from_secs(30));
        assert_eq!(c.keepalive(), Duration::from_secs(25));
        unsafe {
            std::env::remove_var("WAHA_API_URL");
            std::env::remove_var("WAHA_API_KEY");
            std::env::remove_var("WAHA_WS_BACKOFF_FLOOR_MS");
        }
    }
}
