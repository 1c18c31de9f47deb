//! Configuration schema definitions.
//!
//! All application settings live in [`AppConfig`]. Every field has a
//! default, so an empty file or an empty settings table is a valid
//! configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::loader::ConfigError;

/// Root application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Log filter used when `RUST_LOG` is not set.
    pub log_level: String,

    /// Require an XSRF token on state-changing requests.
    pub xsrf_cookies: bool,

    /// Detailed error pages with backtraces.
    pub debug: bool,

    /// Key for signed cookies.
    pub cookie_secret: String,

    /// Lifetime of the XSRF cookie in seconds. 0 uses the built-in default.
    pub xsrf_expires: u64,

    /// Template directory. Defaults to `<cwd>/templates`.
    pub template_path: Option<PathBuf>,

    pub left_braces: String,
    pub right_braces: String,

    /// Static file root. When unset, `/static/`, `/favicon.ico` and
    /// `/robots.txt` are served from `<cwd>/static`.
    pub static_path: Option<PathBuf>,

    /// Compress responses when the client accepts gzip or deflate.
    pub gzip: bool,

    /// Host used when the request host matches no entry.
    pub default_host: String,

    /// Maximum buffered request body, in bytes.
    pub max_memory: usize,

    /// Seconds allowed for reading the request body. 0 disables.
    pub read_timeout: u64,

    /// Seconds allowed for producing the response. 0 disables.
    pub write_timeout: u64,

    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,

    /// Handlers provide their own `render_bytes`.
    pub custom_templates: bool,

    /// Value of the `Server` response header.
    pub server_name: String,

    /// Trust `X-Forwarded-*`, `X-Scheme` and `X-Real-Ip`.
    pub xheaders: bool,

    /// Worker threads for the runtime.
    pub num_cpu: usize,

    /// Settings the framework does not know, kept for handlers.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            log_level: "info".to_string(),
            xsrf_cookies: false,
            debug: true,
            cookie_secret: String::new(),
            xsrf_expires: 0,
            template_path: None,
            left_braces: "{{".to_string(),
            right_braces: "}}".to_string(),
            static_path: None,
            gzip: false,
            default_host: String::new(),
            max_memory: 64 * 1024 * 1024,
            read_timeout: 0,
            write_timeout: 0,
            cert_file: None,
            key_file: None,
            custom_templates: false,
            server_name: "LemonServer".to_string(),
            xheaders: false,
            num_cpu: 1,
            extra: Map::new(),
        }
    }
}

impl AppConfig {
    /// Build a configuration from a flat settings table.
    ///
    /// Known keys override defaults; unknown keys end up in `extra`.
    pub fn from_settings(settings: Map<String, Value>) -> Result<Self, ConfigError> {
        serde_json::from_value(Value::Object(settings))
            .map_err(|e| ConfigError::InvalidSetting(e.to_string()))
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout > 0).then(|| Duration::from_secs(self.read_timeout))
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        (self.write_timeout > 0).then(|| Duration::from_secs(self.write_timeout))
    }

    /// Both TLS files are configured.
    pub fn tls_enabled(&self) -> bool {
        self.cert_file.is_some() && self.key_file.is_some()
    }

    /// Template directory, resolved against `work_dir` when unset.
    pub fn template_dir(&self, work_dir: &Path) -> PathBuf {
        self.template_path
            .clone()
            .unwrap_or_else(|| work_dir.join("templates"))
    }

    /// Worker count clamped to `1..=available`.
    pub fn worker_threads(&self, available: usize) -> usize {
        self.num_cpu.clamp(1, available.max(1))
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.debug);
        assert!(!config.xsrf_cookies);
        assert_eq!(config.server_name, "LemonServer");
        assert_eq!(config.max_memory, 1 << 26);
        assert_eq!(config.left_braces, "{{");
        assert_eq!(config.num_cpu, 1);
        assert!(config.read_timeout().is_none());
    }

    #[test]
    fn test_from_settings_overrides_and_keeps_unknown_keys() {
        let config = AppConfig::from_settings(settings(json!({
            "xsrf_cookies": true,
            "read_timeout": 5,
            "cookie_secret": "s3cret",
            "site_title": "Lemon",
        })))
        .unwrap();

        assert!(config.xsrf_cookies);
        assert_eq!(config.read_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.cookie_secret, "s3cret");
        assert_eq!(config.extra.get("site_title"), Some(&json!("Lemon")));
        assert!(!config.extra.contains_key("xsrf_cookies"));
    }

    #[test]
    fn test_from_settings_rejects_wrong_type() {
        let err = AppConfig::from_settings(settings(json!({"debug": "yes"}))).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting(_)));
    }

    #[test]
    fn test_toml_with_listener() {
        let config: AppConfig = toml::from_str(
            r#"
            gzip = true
            write_timeout = 3

            [listener]
            bind_address = "127.0.0.1:9000"
            "#,
        )
        .unwrap();
        assert!(config.gzip);
        assert_eq!(config.write_timeout(), Some(Duration::from_secs(3)));
        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
    }

    #[test]
    fn test_worker_threads_clamped() {
        let mut config = AppConfig::default();
        config.num_cpu = 0;
        assert_eq!(config.worker_threads(8), 1);
        config.num_cpu = 16;
        assert_eq!(config.worker_threads(8), 8);
        config.num_cpu = 4;
        assert_eq!(config.worker_threads(8), 4);
    }
}
