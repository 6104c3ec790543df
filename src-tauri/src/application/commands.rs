use crate::application::bootstrap::{bootstrap_workspace, BootstrapResult};
use crate::application::sync_controller::{SyncController, SyncControllerHandle, TriggerOutcome};
use crate::domain::models::{HistoryEntry, Language, Preferences, SyncState, Theme};
use crate::infrastructure::command_gateway::{CommandGateway, ReqwestCommandGateway};
use crate::infrastructure::config::{
    read_controller_config, read_popular_servers, resolve_command_endpoint,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::preferences::{PreferencesRepository, SqlitePreferencesRepository};
use crate::infrastructure::result_cache::SqliteResultCacheRepository;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    controller: SyncControllerHandle,
    preferences: Arc<dyn PreferencesRepository>,
    popular_servers: Vec<String>,
}

impl AppState {
    // Must be called inside a Tokio runtime.
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let endpoint = resolve_command_endpoint(&bootstrap.config_dir, |key| std::env::var(key).ok())?;
        info!(endpoint = %endpoint, "using command endpoint");
        let gateway: Arc<dyn CommandGateway> = Arc::new(ReqwestCommandGateway::new(endpoint)?);
        Self::assemble(bootstrap, gateway)
    }

    pub fn with_gateway(
        workspace_root: PathBuf,
        gateway: Arc<dyn CommandGateway>,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        Self::assemble(bootstrap, gateway)
    }

    fn assemble(
        bootstrap: BootstrapResult,
        gateway: Arc<dyn CommandGateway>,
    ) -> Result<Self, InfraError> {
        let controller_config = read_controller_config(&bootstrap.config_dir)?;
        let popular_servers = read_popular_servers(&bootstrap.config_dir)?;
        let cache = Arc::new(SqliteResultCacheRepository::new(&bootstrap.database_path));
        let preferences: Arc<dyn PreferencesRepository> =
            Arc::new(SqlitePreferencesRepository::new(&bootstrap.database_path));

        info!(
            server = %controller_config.server,
            interval_seconds = controller_config.sync_interval_seconds(),
            "starting sync controller"
        );
        let controller = SyncController::new(controller_config, gateway, cache).spawn();

        Ok(Self {
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path,
            logs_dir: bootstrap.logs_dir,
            controller,
            preferences,
            popular_servers,
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn controller(&self) -> &SyncControllerHandle {
        &self.controller
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        info!(command, "{message}");
    }

    pub fn log_error(&self, command: &str, message: &str) {
        error!(command, "{message}");
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        self.controller.shutdown();
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStateResponse {
    pub server: String,
    #[serde(flatten)]
    pub state: SyncState,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesResponse {
    pub theme: Theme,
    pub language: Language,
    pub supported_languages: Vec<Language>,
    pub popular_servers: Vec<String>,
}

fn to_preferences_response(state: &AppState, preferences: Preferences) -> PreferencesResponse {
    PreferencesResponse {
        theme: preferences.theme,
        language: preferences.language,
        supported_languages: Language::SUPPORTED.to_vec(),
        popular_servers: state.popular_servers.clone(),
    }
}

pub async fn get_sync_state_impl(state: &AppState) -> Result<SyncStateResponse, InfraError> {
    let server = state.controller.server().await?;
    Ok(SyncStateResponse {
        server,
        state: state.controller.state(),
    })
}

pub async fn sync_now_impl(state: &AppState) -> Result<TriggerOutcome, InfraError> {
    let outcome = state.controller.sync_now().await?;
    state.log_info("sync_now", &format!("outcome={outcome:?}"));
    Ok(outcome)
}

pub async fn change_server_impl(state: &AppState, server: String) -> Result<TriggerOutcome, InfraError> {
    let outcome = state.controller.change_server(&server).await?;
    state.log_info(
        "change_server",
        &format!("server={} outcome={outcome:?}", server.trim()),
    );
    Ok(outcome)
}

/// Requests helper installation and, when a call was started, waits until it
/// has completed.
pub async fn install_helper_impl(state: &AppState) -> Result<TriggerOutcome, InfraError> {
    let outcome = state.controller.install_helper().await?;
    if outcome == TriggerOutcome::Started {
        let mut states = state.controller.subscribe();
        loop {
            let installing = matches!(
                &*states.borrow_and_update(),
                SyncState::RecoveryRequired {
                    installing: true,
                    ..
                }
            );
            if !installing {
                break;
            }
            states
                .changed()
                .await
                .map_err(|_| InfraError::ControllerStopped)?;
        }
    }
    state.log_info("install_helper", &format!("outcome={outcome:?}"));
    Ok(outcome)
}

pub async fn get_history_impl(state: &AppState) -> Result<Vec<HistoryEntry>, InfraError> {
    state.controller.history().await
}

pub async fn clear_history_impl(state: &AppState) -> Result<(), InfraError> {
    state.controller.clear_history().await?;
    state.log_info("clear_history", "history cleared");
    Ok(())
}

pub fn get_preferences_impl(state: &AppState) -> Result<PreferencesResponse, InfraError> {
    let preferences = state.preferences.load()?;
    Ok(to_preferences_response(state, preferences))
}

pub fn set_theme_impl(state: &AppState, theme: String) -> Result<PreferencesResponse, InfraError> {
    let theme = Theme::parse(&theme).map_err(InfraError::InvalidConfig)?;
    state.preferences.save_theme(theme)?;
    state.log_info("set_theme", theme.as_str());
    get_preferences_impl(state)
}

pub fn set_language_impl(state: &AppState, language: String) -> Result<PreferencesResponse, InfraError> {
    let language = Language::parse(&language).map_err(InfraError::InvalidConfig)?;
    state.preferences.save_language(language)?;
    state.log_info("set_language", language.as_str());
    get_preferences_impl(state)
}
