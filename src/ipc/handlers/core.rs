use crate::config::GradingConfig;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "skillDebounceMs": state.skill_writes.delay().as_millis() as u64,
            "pendingSkillWrites": state.skill_writes.len()
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    // Pending writes belong to the workspace that was open when they were typed.
    if !state.skill_writes.is_empty() {
        let flushed = state.flush_all_skill_writes();
        tracing::info!(
            written = flushed.written,
            failed = flushed.failed,
            "flushed skill writes before workspace switch"
        );
    }

    match db::open_db(&path) {
        Ok(conn) => {
            // Stored settings must not prevent the workspace from opening.
            let config = GradingConfig::load(&conn).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to load setup; using defaults");
                GradingConfig::default()
            });
            state.apply_config(config);
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            tracing::info!(path = %path.to_string_lossy(), "workspace opened");
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
