pub mod application;
pub mod domain;
pub mod infrastructure;

#[cfg(feature = "desktop")]
mod desktop {
    use crate::application::bootstrap::bootstrap_workspace;
    use crate::application::commands::{
        change_server_impl, clear_history_impl, get_history_impl, get_preferences_impl,
        get_sync_state_impl, install_helper_impl, set_language_impl, set_theme_impl,
        sync_now_impl, AppState, PreferencesResponse, SyncStateResponse,
    };
    use crate::application::logging::init_logging;
    use crate::application::sync_controller::TriggerOutcome;
    use crate::domain::models::HistoryEntry;
    use serde::Serialize;
    use std::path::PathBuf;
    use tauri::{Emitter, Manager};

    const SYNC_STATE_EVENT: &str = "sync-state";
    const MAIN_WINDOW: &str = "main";

    #[derive(Debug, Serialize)]
    struct BootstrapResponse {
        workspace_root: String,
        database_path: String,
    }

    #[tauri::command]
    fn bootstrap(root: Option<String>) -> Result<BootstrapResponse, String> {
        let workspace_root = match root {
            Some(path) => PathBuf::from(path),
            None => std::env::current_dir().map_err(|error| error.to_string())?,
        };

        let result = bootstrap_workspace(&workspace_root).map_err(|error| error.to_string())?;
        Ok(BootstrapResponse {
            workspace_root: result.workspace_root.display().to_string(),
            database_path: result.database_path.display().to_string(),
        })
    }

    #[tauri::command]
    fn ping() -> &'static str {
        "pong"
    }

    #[tauri::command]
    async fn get_sync_state(state: tauri::State<'_, AppState>) -> Result<SyncStateResponse, String> {
        get_sync_state_impl(state.inner())
            .await
            .map_err(|error| state.command_error("get_sync_state", &error))
    }

    #[tauri::command]
    async fn sync_now(state: tauri::State<'_, AppState>) -> Result<TriggerOutcome, String> {
        sync_now_impl(state.inner())
            .await
            .map_err(|error| state.command_error("sync_now", &error))
    }

    #[tauri::command]
    async fn change_server(
        state: tauri::State<'_, AppState>,
        server: String,
    ) -> Result<TriggerOutcome, String> {
        change_server_impl(state.inner(), server)
            .await
            .map_err(|error| state.command_error("change_server", &error))
    }

    #[tauri::command]
    async fn install_helper(
        app: tauri::AppHandle,
        state: tauri::State<'_, AppState>,
    ) -> Result<TriggerOutcome, String> {
        let outcome = install_helper_impl(state.inner())
            .await
            .map_err(|error| state.command_error("install_helper", &error))?;
        // Elevation prompts steal focus from the main window.
        if let Some(window) = app.get_webview_window(MAIN_WINDOW) {
            if let Err(error) = window.set_focus() {
                state.log_error("install_helper", &format!("failed to restore focus: {error}"));
            }
        }
        Ok(outcome)
    }

    #[tauri::command]
    async fn get_history(state: tauri::State<'_, AppState>) -> Result<Vec<HistoryEntry>, String> {
        get_history_impl(state.inner())
            .await
            .map_err(|error| state.command_error("get_history", &error))
    }

    #[tauri::command]
    async fn clear_history(state: tauri::State<'_, AppState>) -> Result<(), String> {
        clear_history_impl(state.inner())
            .await
            .map_err(|error| state.command_error("clear_history", &error))
    }

    #[tauri::command]
    fn get_preferences(state: tauri::State<'_, AppState>) -> Result<PreferencesResponse, String> {
        get_preferences_impl(state.inner())
            .map_err(|error| state.command_error("get_preferences", &error))
    }

    #[tauri::command]
    fn set_theme(
        state: tauri::State<'_, AppState>,
        theme: String,
    ) -> Result<PreferencesResponse, String> {
        set_theme_impl(state.inner(), theme).map_err(|error| state.command_error("set_theme", &error))
    }

    #[tauri::command]
    fn set_language(
        state: tauri::State<'_, AppState>,
        language: String,
    ) -> Result<PreferencesResponse, String> {
        set_language_impl(state.inner(), language)
            .map_err(|error| state.command_error("set_language", &error))
    }

    pub fn run() {
        let workspace_root = std::env::current_dir().expect("failed to resolve current directory");
        let _log_guard =
            init_logging(&workspace_root.join("logs")).expect("failed to initialize logging");
        let app_state = tauri::async_runtime::block_on(async move { AppState::new(workspace_root) })
            .expect("failed to initialize app state");

        tauri::Builder::default()
            .manage(app_state)
            .setup(|app| {
                let handle = app.handle().clone();
                let mut states = app.state::<AppState>().controller().subscribe();
                tauri::async_runtime::spawn(async move {
                    loop {
                        let snapshot = states.borrow_and_update().clone();
                        if let Err(error) = handle.emit(SYNC_STATE_EVENT, &snapshot) {
                            tracing::warn!(error = %error, "failed to emit sync state");
                        }
                        if states.changed().await.is_err() {
                            break;
                        }
                    }
                });
                Ok(())
            })
            .invoke_handler(tauri::generate_handler![
                ping,
                bootstrap,
                get_sync_state,
                sync_now,
                change_server,
                install_helper,
                get_history,
                clear_history,
                get_preferences,
                set_theme,
                set_language
            ])
            .run(tauri::generate_context!())
            .expect("failed to run tauri app");
    }
}

#[cfg(feature = "desktop")]
pub use desktop::run;
