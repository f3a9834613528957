use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// Plugin names, in chain order
    #[serde(default)]
    pub use_plugins: Vec<String>,
    /// Raw options per plugin name, validated at registration
    #[serde(default)]
    pub plugin_args: HashMap<String, Value>,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Prefix stripped from every request path, e.g. `/wd/hub`
    #[serde(default)]
    pub base_path: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    #[serde(default)]
    pub json: bool,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4723
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_path: String::new(),
        }
    }
}

impl Config {
    /// `host:port` the HTTP front end binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Base path without a trailing slash, empty when requests are served at `/`
    pub fn base_path(&self) -> &str {
        self.server.base_path.trim_end_matches('/')
    }
}
