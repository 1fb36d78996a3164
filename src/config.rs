//! Hub configuration. `HubConfig` is the opaque input the hub constructor
//! and `main` consume; how it is produced (env vars here, an optional JSON
//! overlay) is deliberately not part of the hub's own contract.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_PANEL_PATH: &str = "/ws/panel";
const DEFAULT_RECONNECT_SECS: u64 = 5;

/// A statically pre-registered route, applied once via `add_route` at
/// startup with no supervisor task attached.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    pub target_id: String,
    pub url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
}

/// A managed upstream, applied via `start_managed_upstream` at startup;
/// the hub keeps redialing it for the lifetime of the process.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub target_id: String,
    pub url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub listen_addr: String,
    pub panel_path: String,
    pub panel_auth_token: Option<String>,
    pub default_sdk_auth_token: Option<String>,
    pub redis_addr: Option<String>,
    pub reconnect_interval: Duration,
    pub routes: Vec<RouteConfig>,
    pub upstreams: Vec<UpstreamConfig>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_owned(),
            panel_path: DEFAULT_PANEL_PATH.to_owned(),
            panel_auth_token: None,
            default_sdk_auth_token: None,
            redis_addr: None,
            reconnect_interval: Duration::from_secs(DEFAULT_RECONNECT_SECS),
            routes: Vec::new(),
            upstreams: Vec::new(),
        }
    }
}

/// Raw shape of the optional JSON config-file overlay, mirroring the
/// reference `config.Load` file format. Every field is optional; absent
/// fields keep whatever `from_env` already produced.
#[derive(Debug, Deserialize, Default)]
struct FileOverlay {
    #[serde(default)]
    server: Option<FileServer>,
    #[serde(default)]
    client: Option<FileClient>,
    #[serde(default)]
    routes: Option<Vec<RouteConfig>>,
}

#[derive(Debug, Deserialize, Default)]
struct FileServer {
    listen_addr: Option<String>,
    panel_path: Option<String>,
    panel_auth_token: Option<String>,
    default_sdk_auth_token: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FileClient {
    reconnect_interval_seconds: Option<u64>,
    upstreams: Option<Vec<UpstreamConfig>>,
}

impl HubConfig {
    /// Builds config the way the reference binary's `main` does:
    /// `AGENT_LISTEN_ADDR` (falling back to `BIND_ADDR`) for the listen
    /// address, `PANEL_AUTH_TOKEN`/`SDK_AUTH_TOKEN` for the two static
    /// bearer tokens, and `REDIS_ADDR` selecting the Redis-backed store
    /// when present.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(addr) = std::env::var("AGENT_LISTEN_ADDR").or_else(|_| std::env::var("BIND_ADDR"))
        {
            if !addr.is_empty() {
                cfg.listen_addr = addr;
            }
        }
        cfg.panel_auth_token = non_empty_env("PANEL_AUTH_TOKEN");
        cfg.default_sdk_auth_token = non_empty_env("SDK_AUTH_TOKEN");
        cfg.redis_addr = non_empty_env("REDIS_ADDR");
        cfg
    }

    /// Overlays a JSON config file on top of the already-built config,
    /// following the reference `Load(path)` fallback-filling behavior:
    /// blank fields in the file keep the existing value rather than
    /// zeroing it out.
    pub fn apply_file_overlay(mut self, contents: &str) -> Result<Self, serde_json::Error> {
        let overlay: FileOverlay = serde_json::from_str(contents)?;

        if let Some(server) = overlay.server {
            if let Some(addr) = server.listen_addr.filter(|s| !s.is_empty()) {
                self.listen_addr = addr;
            }
            if let Some(path) = server.panel_path.filter(|s| !s.is_empty()) {
                self.panel_path = path;
            }
            if server.panel_auth_token.is_some() {
                self.panel_auth_token = server.panel_auth_token.filter(|s| !s.is_empty());
            }
            if server.default_sdk_auth_token.is_some() {
                self.default_sdk_auth_token =
                    server.default_sdk_auth_token.filter(|s| !s.is_empty());
            }
        }

        if let Some(client) = overlay.client {
            if let Some(secs) = client.reconnect_interval_seconds {
                self.reconnect_interval = if secs == 0 {
                    Duration::from_secs(DEFAULT_RECONNECT_SECS)
                } else {
                    Duration::from_secs(secs)
                };
            }
            if let Some(upstreams) = client.upstreams {
                self.upstreams = upstreams;
            }
        }

        if let Some(routes) = overlay.routes {
            self.routes = routes;
        }

        Ok(self)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// `reconnect_interval` defaults to 5s when a non-positive value is
/// supplied directly to `start_managed_upstream` (§4.5).
pub fn normalize_reconnect_interval(interval: Duration) -> Duration {
    if interval.is_zero() {
        Duration::from_secs(DEFAULT_RECONNECT_SECS)
    } else {
        interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_implementation() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.listen_addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(cfg.panel_path, DEFAULT_PANEL_PATH);
        assert_eq!(cfg.reconnect_interval, Duration::from_secs(5));
        assert!(cfg.panel_auth_token.is_none());
        assert!(cfg.routes.is_empty());
        assert!(cfg.upstreams.is_empty());
    }

    #[test]
    fn normalize_reconnect_interval_applies_five_second_default() {
        assert_eq!(
            normalize_reconnect_interval(Duration::from_secs(0)),
            Duration::from_secs(5)
        );
        assert_eq!(
            normalize_reconnect_interval(Duration::from_secs(30)),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn file_overlay_fills_blanks_without_clobbering_existing_values() {
        let cfg = HubConfig::default();
        let json = r#"{
            "server": {"panel_auth_token": "secret"},
            "client": {"reconnect_interval_seconds": 10, "upstreams": [
                {"target_id": "T1", "url": "ws://sdk/a"}
            ]},
            "routes": [{"target_id": "T2", "url": "ws://sdk/b"}]
        }"#;
        let cfg = cfg.apply_file_overlay(json).expect("overlay parses");
        assert_eq!(cfg.listen_addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(cfg.panel_auth_token.as_deref(), Some("secret"));
        assert_eq!(cfg.reconnect_interval, Duration::from_secs(10));
        assert_eq!(cfg.upstreams.len(), 1);
        assert_eq!(cfg.routes.len(), 1);
    }

    #[test]
    fn file_overlay_zero_reconnect_interval_falls_back_to_default() {
        let cfg = HubConfig::default();
        let json = r#"{"client": {"reconnect_interval_seconds": 0}}"#;
        let cfg = cfg.apply_file_overlay(json).expect("overlay parses");
        assert_eq!(cfg.reconnect_interval, Duration::from_secs(5));
    }
}
