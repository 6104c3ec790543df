use crate::domain::models::{
    ControllerConfig, DEFAULT_HISTORY_CAPACITY, DEFAULT_SERVER, DEFAULT_SETTLE_DELAY_SECONDS,
    DEFAULT_SYNC_INTERVAL_SECONDS,
};
use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

const APP_JSON: &str = "app.json";
const SYNC_JSON: &str = "sync.json";

pub const DEFAULT_COMMAND_ENDPOINT: &str = "http://127.0.0.1:12346/";
pub const COMMAND_ENDPOINT_ENV: &str = "NTP_CLIENT_COMMAND_ENDPOINT";

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigBundle {
    pub app: serde_json::Value,
    pub sync: serde_json::Value,
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "NTP Client",
                "popularServers": [
                    "pool.ntp.org",
                    "time.google.com",
                    "time.cloudflare.com",
                    "time.windows.com"
                ]
            }),
        ),
        (
            SYNC_JSON,
            serde_json::json!({
                "schema": 1,
                "defaultServer": DEFAULT_SERVER,
                "syncIntervalSeconds": DEFAULT_SYNC_INTERVAL_SECONDS,
                "settleDelaySeconds": DEFAULT_SETTLE_DELAY_SECONDS,
                "historyCapacity": DEFAULT_HISTORY_CAPACITY,
                "permissionWarning": true,
                "commandEndpoint": DEFAULT_COMMAND_ENDPOINT
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    Ok(ConfigBundle {
        app: read_config(&config_dir.join(APP_JSON))?,
        sync: read_config(&config_dir.join(SYNC_JSON))?,
    })
}

fn read_u64_field(value: &serde_json::Value, key: &str, default: u64) -> Result<u64, InfraError> {
    match value.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(field) => field.as_u64().ok_or_else(|| {
            InfraError::InvalidConfig(format!("{key} must be a non-negative integer"))
        }),
    }
}

pub fn read_controller_config(config_dir: &Path) -> Result<ControllerConfig, InfraError> {
    let sync = read_config(&config_dir.join(SYNC_JSON))?;
    let server = sync
        .get("defaultServer")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_SERVER)
        .to_string();
    let history_capacity = read_u64_field(&sync, "historyCapacity", DEFAULT_HISTORY_CAPACITY as u64)?;
    let permission_warning = match sync.get("permissionWarning") {
        None | Some(serde_json::Value::Null) => true,
        Some(flag) => flag.as_bool().ok_or_else(|| {
            InfraError::InvalidConfig("permissionWarning must be a boolean".to_string())
        })?,
    };

    let config = ControllerConfig {
        server,
        sync_interval: Duration::from_secs(read_u64_field(
            &sync,
            "syncIntervalSeconds",
            DEFAULT_SYNC_INTERVAL_SECONDS,
        )?),
        settle_delay: Duration::from_secs(read_u64_field(
            &sync,
            "settleDelaySeconds",
            DEFAULT_SETTLE_DELAY_SECONDS,
        )?),
        history_capacity: usize::try_from(history_capacity)
            .map_err(|_| InfraError::InvalidConfig("historyCapacity is too large".to_string()))?,
        permission_warning,
    };
    config.validate().map_err(InfraError::InvalidConfig)?;
    Ok(config)
}

pub fn read_popular_servers(config_dir: &Path) -> Result<Vec<String>, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    Ok(app
        .get("popularServers")
        .and_then(serde_json::Value::as_array)
        .map(|servers| {
            servers
                .iter()
                .filter_map(serde_json::Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default())
}

pub fn resolve_command_endpoint<F>(config_dir: &Path, env_lookup: F) -> Result<Url, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let from_env = env_lookup(COMMAND_ENDPOINT_ENV)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    let raw = match from_env {
        Some(value) => value,
        None => read_config(&config_dir.join(SYNC_JSON))?
            .get("commandEndpoint")
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_COMMAND_ENDPOINT)
            .to_string(),
    };

    let mut endpoint = Url::parse(&raw)
        .map_err(|error| InfraError::InvalidConfig(format!("invalid command endpoint '{raw}': {error}")))?;
    if endpoint.cannot_be_a_base() {
        return Err(InfraError::InvalidConfig(format!(
            "command endpoint '{raw}' cannot be used as a base URL"
        )));
    }
    if !endpoint.path().ends_with('/') {
        let path = format!("{}/", endpoint.path());
        endpoint.set_path(&path);
    }
    Ok(endpoint)
}
