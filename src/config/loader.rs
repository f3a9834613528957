use super::schema::Config;
use crate::error::{ConfigError, Result};
use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

const ENV_PREFIX: &str = "AUTOMATION_SERVER_";

/// Environment overrides, as (variable suffix, config key path).
///
/// `pluginArgs` can only be set from a config file. List values use figment's
/// array syntax, e.g. `AUTOMATION_SERVER_USE_PLUGINS=[command-log,deny-list]`.
const ENV_KEYS: &[(&str, &str)] = &[
    ("SERVER_HOST", "server.host"),
    ("SERVER_PORT", "server.port"),
    ("SERVER_BASE_PATH", "server.basePath"),
    ("USE_PLUGINS", "usePlugins"),
    ("LOG_JSON", "log.json"),
];

fn env_provider(prefix: &str) -> Env {
    Env::prefixed(prefix)
        .filter_map(|key| {
            ENV_KEYS
                .iter()
                .find(|(name, _)| key.as_str().eq_ignore_ascii_case(name))
                .map(|(_, path)| (*path).into())
        })
        .lowercase(false)
}

pub fn load_from_env_or_file() -> Result<Config> {
    let config: Config = Figment::new()
        .merge(Toml::file("automation-server.toml"))
        .merge(Json::file("automation-server.json"))
        .merge(Yaml::file("automation-server.yaml"))
        .merge(Yaml::file("automation-server.yml"))
        .merge(env_provider(ENV_PREFIX))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    finalize(config)
}

pub async fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Figment::new().merge(Toml::file(path)),
        Some("json") => Figment::new().merge(Json::file(path)),
        Some("yaml") | Some("yml") => Figment::new().merge(Yaml::file(path)),
        _ => {
            return Err(ConfigError::Parse(
                "Unsupported config file format. Use .toml, .json, .yaml, or .yml".into(),
            )
            .into())
        }
    };

    if !tokio::fs::try_exists(path).await? {
        return Err(ConfigError::Parse(format!("Config file {} not found", path.display())).into());
    }

    let config: Config = figment
        .merge(env_provider(ENV_PREFIX))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    finalize(config)
}

fn finalize(config: Config) -> Result<Config> {
    let config = apply_env_substitutions(config)?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        return Err(ConfigError::Validation("Server port must be greater than 0".into()).into());
    }

    let base_path = &config.server.base_path;
    if !base_path.is_empty() && !base_path.starts_with('/') {
        return Err(ConfigError::Validation(format!(
            "Base path '{base_path}' must start with '/'"
        ))
        .into());
    }

    let mut seen = HashSet::new();
    for name in &config.use_plugins {
        if name.trim().is_empty() {
            return Err(ConfigError::Validation("Plugin names must not be empty".into()).into());
        }
        if !seen.insert(name.as_str()) {
            return Err(
                ConfigError::Validation(format!("Plugin '{name}' is listed twice")).into(),
            );
        }
    }

    for name in config.plugin_args.keys() {
        if !seen.contains(name.as_str()) {
            warn!(plugin = %name, "Ignoring pluginArgs for a plugin that is not in use");
        }
    }

    Ok(())
}

fn apply_env_substitutions(mut config: Config) -> Result<Config> {
    config.server.host = substitute_env_vars(&config.server.host)?;
    config.server.base_path = substitute_env_vars(&config.server.base_path)?;

    for value in config.plugin_args.values_mut() {
        substitute_in_value(value)?;
    }

    Ok(config)
}

fn substitute_in_value(value: &mut Value) -> Result<()> {
    match value {
        Value::String(s) => *s = substitute_env_vars(s)?,
        Value::Array(items) => {
            for item in items {
                substitute_in_value(item)?;
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                substitute_in_value(item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Expand `${VAR}` and `${VAR:-default}` references.
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::Parse(e.to_string()))?;
    let mut result = input.to_string();

    for cap in re.captures_iter(input) {
        let reference = &cap[1];
        let (name, default) = match reference.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (reference, None),
        };

        let value = match (std::env::var(name), default) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.to_string(),
            (Err(_), None) => {
                return Err(ConfigError::EnvVar(format!(
                    "Environment variable '{name}' not found"
                ))
                .into())
            }
        };
        result = result.replace(&cap[0], &value);
    }

    Ok(result)
}
