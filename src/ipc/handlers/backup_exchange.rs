use std::path::PathBuf;

use serde_json::json;

use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};

fn get_required_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(handle_export(state, req)),
        "backup.import" => Some(handle_import(state, req)),
        _ => None,
    }
}

fn handle_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(out_path) = get_required_str(&req.params, "outPath").map(PathBuf::from) else {
        return err(&req.id, "bad_params", "missing outPath", None);
    };

    match backup::export_workspace_bundle(&workspace, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "path": out_path.to_string_lossy(),
                "bundleFormat": summary.bundle_format,
                "entryCount": summary.entry_count,
                "dbSha256": summary.db_sha256,
            }),
        ),
        Err(e) => err(&req.id, "io_failed", e.to_string(), None),
    }
}

fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(in_path) = get_required_str(&req.params, "inPath").map(PathBuf::from) else {
        return err(&req.id, "bad_params", "missing inPath", None);
    };
    let target = match get_required_str(&req.params, "workspacePath") {
        Some(p) => PathBuf::from(p),
        None => match state.workspace.clone() {
            Some(p) => p,
            None => return err(&req.id, "no_workspace", "select a workspace first", None),
        },
    };

    // Importing over the open workspace requires releasing the connection first.
    let replaces_current = state.workspace.as_deref() == Some(target.as_path());
    if replaces_current {
        state.db = None;
    }

    let summary = match backup::import_workspace_bundle(&in_path, &target) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "io_failed", e.to_string(), None),
    };

    if replaces_current {
        match db::open_db(&target) {
            Ok(conn) => state.db = Some(conn),
            Err(e) => return err(&req.id, "db_open_failed", e.to_string(), None),
        }
    }

    ok(
        &req.id,
        json!({
            "workspacePath": target.to_string_lossy(),
            "bundleFormat": summary.bundle_format_detected,
            "checksumVerified": summary.checksum_verified,
            "reopened": replaces_current,
        }),
    )
}
