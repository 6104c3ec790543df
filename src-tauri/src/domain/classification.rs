use crate::domain::models::{ErrorCode, RecoveryReason, SyncResult};
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Display;

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Success(SyncResult),
    PermissionDenied(SyncResult),
    RecoveryRequired(RecoveryReason),
    Other(String),
}

impl Classification {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::PermissionDenied(_) => "permission_denied",
            Self::RecoveryRequired(RecoveryReason::SidecarNotInstalled) => "sidecar_not_installed",
            Self::RecoveryRequired(RecoveryReason::SidecarNotRunning) => "sidecar_not_running",
            Self::Other(_) => "other",
        }
    }
}

pub fn classify_sync_response<E: Display>(response: Result<&str, E>) -> Classification {
    let payload = match response {
        Ok(payload) => payload,
        Err(error) => return Classification::Other(format!("sync command failed: {error}")),
    };

    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(error) => return Classification::Other(format!("unparseable sync response: {error}")),
    };
    let failure_message = payload_message(&value);

    let result: SyncResult = match serde_json::from_value(value) {
        Ok(result) => result,
        Err(error) => return Classification::Other(format!("unparseable sync response: {error}")),
    };
    if let Err(message) = result.validate() {
        return Classification::Other(format!("invalid sync response: {message}"));
    }

    match (result.success, result.error_code) {
        (true, None) => Classification::Success(result),
        (false, Some(ErrorCode::PermissionDenied)) => Classification::PermissionDenied(result),
        (false, Some(ErrorCode::SidecarNotInstalled)) => {
            Classification::RecoveryRequired(RecoveryReason::SidecarNotInstalled)
        }
        (false, Some(ErrorCode::SidecarNotRunning)) => {
            Classification::RecoveryRequired(RecoveryReason::SidecarNotRunning)
        }
        _ => Classification::Other(
            failure_message.unwrap_or_else(|| "sync command reported failure".to_string()),
        ),
    }
}

fn payload_message(value: &Value) -> Option<String> {
    ["error", "message"]
        .into_iter()
        .filter_map(|key| value.get(key).and_then(Value::as_str))
        .map(str::trim)
        .find(|message| !message.is_empty())
        .map(ToOwned::to_owned)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed { message: Option<String> },
    Failed(String),
}

#[derive(Debug, Deserialize)]
struct InstallPayload {
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

pub fn classify_install_response<E: Display>(response: Result<&str, E>) -> InstallOutcome {
    let payload = match response {
        Ok(payload) => payload,
        Err(error) => return InstallOutcome::Failed(format!("install command failed: {error}")),
    };

    match serde_json::from_str::<InstallPayload>(payload) {
        Ok(InstallPayload {
            success: true,
            message,
        }) => InstallOutcome::Installed { message },
        Ok(InstallPayload {
            success: false,
            message,
        }) => InstallOutcome::Failed(
            message
                .filter(|message| !message.trim().is_empty())
                .unwrap_or_else(|| "helper installation failed".to_string()),
        ),
        Err(error) => InstallOutcome::Failed(format!("unparseable install response: {error}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SUCCESS_PAYLOAD: &str = r#"{
        "success": true,
        "message": "synchronized",
        "server": "time.cloudflare.com",
        "server_ip": "162.159.200.123",
        "offset": 12.5,
        "delay": 3.2,
        "t1": 1700000000000.0,
        "t2": 1700000000014.1,
        "t3": 1700000000014.3,
        "t4": 1700000000003.4,
        "pre_sync_offset": 12.5,
        "post_sync_offset": 0.3
    }"#;

    #[test]
    fn success_payload_is_classified_as_success() {
        let classification = classify_sync_response::<String>(Ok(SUCCESS_PAYLOAD));
        let Classification::Success(result) = classification else {
            panic!("expected success, got {classification:?}");
        };
        assert_eq!(result.offset, 12.5);
        assert_eq!(result.delay, 3.2);
        assert_eq!(result.server_address, "162.159.200.123");
    }

    #[test]
    fn permission_denied_keeps_measurement() {
        let classification = classify_sync_response::<String>(Ok(
            r#"{"success":false,"code":"PERMISSION_DENIED","offset":250.0}"#,
        ));
        match classification {
            Classification::PermissionDenied(result) => assert_eq!(result.offset, 250.0),
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn sidecar_codes_require_recovery() {
        assert_eq!(
            classify_sync_response::<String>(Ok(r#"{"success":false,"code":"SIDECAR_NOT_INSTALLED"}"#)),
            Classification::RecoveryRequired(RecoveryReason::SidecarNotInstalled)
        );
        assert_eq!(
            classify_sync_response::<String>(Ok(r#"{"success":false,"code":"SIDECAR_NOT_RUNNING"}"#)),
            Classification::RecoveryRequired(RecoveryReason::SidecarNotRunning)
        );
    }

    #[test]
    fn generic_failure_uses_payload_message() {
        let classification = classify_sync_response::<String>(Ok(
            r#"{"success":false,"error":"NTP query timed out","code":"NTP_ERROR"}"#,
        ));
        assert_eq!(
            classification,
            Classification::Other("NTP query timed out".to_string())
        );
    }

    #[test]
    fn transport_error_and_garbage_collapse_to_other() {
        let transport = classify_sync_response(Err("connection refused"));
        assert!(matches!(transport, Classification::Other(message) if message.contains("connection refused")));

        let garbage = classify_sync_response::<String>(Ok("<html>502</html>"));
        assert_eq!(garbage.label(), "other");

        let missing_success = classify_sync_response::<String>(Ok(r#"{"offset":1.0}"#));
        assert_eq!(missing_success.label(), "other");
    }

    #[test]
    fn install_response_classification() {
        assert_eq!(
            classify_install_response::<String>(Ok(r#"{"success":true,"message":"installed"}"#)),
            InstallOutcome::Installed {
                message: Some("installed".to_string())
            }
        );
        assert_eq!(
            classify_install_response::<String>(Ok(r#"{"success":false,"message":"denied by user"}"#)),
            InstallOutcome::Failed("denied by user".to_string())
        );
        assert!(matches!(
            classify_install_response(Err("timeout")),
            InstallOutcome::Failed(message) if message.contains("timeout")
        ));
    }

    fn code_strategy() -> impl Strategy<Value = Option<&'static str>> {
        prop::sample::select(vec![
            None,
            Some("PERMISSION_DENIED"),
            Some("SIDECAR_NOT_INSTALLED"),
            Some("SIDECAR_NOT_RUNNING"),
            Some("NTP_ERROR"),
        ])
    }

    proptest! {
        #[test]
        fn classification_is_idempotent(
            success in any::<bool>(),
            code in code_strategy(),
            offset in -10_000.0f64..10_000.0,
            delay in 0.0f64..1_000.0,
        ) {
            let mut payload = serde_json::json!({
                "success": success,
                "server": "pool.ntp.org",
                "offset": offset,
                "delay": delay,
            });
            if let Some(code) = code {
                payload["code"] = Value::String(code.to_string());
            }
            let raw = payload.to_string();

            let first = classify_sync_response::<String>(Ok(&raw));
            let second = classify_sync_response::<String>(Ok(&raw));
            prop_assert_eq!(&first, &second);
            if success && code.is_none() {
                prop_assert_eq!(first.label(), "success");
            }
        }

        #[test]
        fn arbitrary_text_never_yields_measurement(raw in "[^{}\\[\\]]{0,64}") {
            let classification = classify_sync_response::<String>(Ok(&raw));
            prop_assert!(matches!(classification, Classification::Other(_)));
        }
    }
}
