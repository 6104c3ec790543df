use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SERVER: &str = "pool.ntp.org";
pub const DEFAULT_SYNC_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_SETTLE_DELAY_SECONDS: u64 = 2;
pub const DEFAULT_HISTORY_CAPACITY: usize = 3600;
pub const MAX_CONTROLLER_DELAY_SECONDS: u64 = 86_400;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    PermissionDenied,
    SidecarNotInstalled,
    SidecarNotRunning,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    #[serde(default)]
    pub server: String,
    #[serde(default, alias = "server_ip")]
    pub server_address: String,
    #[serde(default)]
    pub t1: f64,
    #[serde(default)]
    pub t2: f64,
    #[serde(default)]
    pub t3: f64,
    #[serde(default)]
    pub t4: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub delay: f64,
    #[serde(default, alias = "pre_sync_offset")]
    pub pre_sync_offset: f64,
    #[serde(default, alias = "post_sync_offset")]
    pub post_sync_offset: f64,
    #[serde(default, alias = "code", skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

impl SyncResult {
    pub fn validate(&self) -> Result<(), String> {
        let timings = [
            ("sync_result.t1", self.t1),
            ("sync_result.t2", self.t2),
            ("sync_result.t3", self.t3),
            ("sync_result.t4", self.t4),
            ("sync_result.offset", self.offset),
            ("sync_result.delay", self.delay),
            ("sync_result.pre_sync_offset", self.pre_sync_offset),
            ("sync_result.post_sync_offset", self.post_sync_offset),
        ];
        for (field, value) in timings {
            if !value.is_finite() {
                return Err(format!("{field} must be a finite number"));
            }
        }
        if self.success && self.error_code.is_some() {
            return Err("sync_result.error_code must be empty on success".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub result: SyncResult,
    pub captured_at_ms: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryReason {
    SidecarNotInstalled,
    SidecarNotRunning,
}

impl RecoveryReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SidecarNotInstalled => "sidecar_not_installed",
            Self::SidecarNotRunning => "sidecar_not_running",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncState {
    #[serde(rename_all = "camelCase")]
    Idle {
        last_result: Option<SyncResult>,
        seconds_until_next_sync: u64,
        last_failure: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Querying { last_result: Option<SyncResult> },
    #[serde(rename_all = "camelCase")]
    RecoveryRequired {
        reason: RecoveryReason,
        installing: bool,
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    PermissionWarning {
        last_result: SyncResult,
        seconds_until_next_sync: u64,
    },
}

impl SyncState {
    pub fn last_result(&self) -> Option<&SyncResult> {
        match self {
            Self::Idle { last_result, .. } | Self::Querying { last_result } => last_result.as_ref(),
            Self::PermissionWarning { last_result, .. } => Some(last_result),
            Self::RecoveryRequired { .. } => None,
        }
    }

    pub fn seconds_until_next_sync(&self) -> Option<u64> {
        match self {
            Self::Idle {
                seconds_until_next_sync,
                ..
            }
            | Self::PermissionWarning {
                seconds_until_next_sync,
                ..
            } => Some(*seconds_until_next_sync),
            Self::Querying { .. } => Some(0),
            Self::RecoveryRequired { .. } => None,
        }
    }

    pub fn is_querying(&self) -> bool {
        matches!(self, Self::Querying { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub time: DateTime<Utc>,
    pub offset: f64,
    pub delay: f64,
    pub server: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub server: String,
    pub sync_interval: Duration,
    pub settle_delay: Duration,
    pub history_capacity: usize,
    pub permission_warning: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECONDS),
            settle_delay: Duration::from_secs(DEFAULT_SETTLE_DELAY_SECONDS),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            permission_warning: true,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.server, "controller.server")?;
        if self.sync_interval.as_secs() == 0 {
            return Err("controller.sync_interval must be at least one second".to_string());
        }
        if self.sync_interval.as_secs() > MAX_CONTROLLER_DELAY_SECONDS {
            return Err(format!(
                "controller.sync_interval must be <= {MAX_CONTROLLER_DELAY_SECONDS} seconds"
            ));
        }
        if self.settle_delay.is_zero() {
            return Err("controller.settle_delay must be > 0".to_string());
        }
        if self.settle_delay > Duration::from_secs(MAX_CONTROLLER_DELAY_SECONDS) {
            return Err(format!(
                "controller.settle_delay must be <= {MAX_CONTROLLER_DELAY_SECONDS} seconds"
            ));
        }
        if self.history_capacity == 0 {
            return Err("controller.history_capacity must be >= 1".to_string());
        }
        Ok(())
    }

    pub fn sync_interval_seconds(&self) -> u64 {
        self.sync_interval.as_secs().max(1)
    }

    pub fn settle_delay_seconds(&self) -> u64 {
        self.settle_delay.as_secs_f64().ceil() as u64
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            other => Err(format!("unsupported theme: {other}")),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    #[serde(rename = "zh-Hant")]
    ZhHant,
    #[serde(rename = "ja-JP")]
    JaJp,
    #[serde(rename = "en-US")]
    EnUs,
}

impl Language {
    pub const SUPPORTED: [Language; 3] = [Language::ZhHant, Language::JaJp, Language::EnUs];

    pub fn parse(value: &str) -> Result<Self, String> {
        let value = value.trim();
        Self::SUPPORTED
            .into_iter()
            .find(|language| language.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| format!("unsupported language: {value}"))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ZhHant => "zh-Hant",
            Self::JaJp => "ja-JP",
            Self::EnUs => "en-US",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Preferences {
    pub theme: Theme,
    pub language: Language,
}

fn validate_non_empty(value: &str, field: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    Ok(())
}
