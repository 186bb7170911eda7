use crate::backup;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::required_str;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn export_bundle(params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let workspace = PathBuf::from(required_str(params, "workspacePath")?);
    let out_path = PathBuf::from(required_str(params, "outPath")?);

    let summary = backup::export_workspace_bundle(&workspace, &out_path)
        .map_err(|e| HandlerErr::new("bundle_export_failed", format!("{e:#}")))?;

    Ok(json!({
        "bundleFormat": summary.bundle_format,
        "entryCount": summary.entry_count,
        "dbSha256": summary.db_sha256,
        "outPath": out_path.to_string_lossy()
    }))
}

fn import_bundle(params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let workspace = PathBuf::from(required_str(params, "workspacePath")?);
    let in_path = PathBuf::from(required_str(params, "inPath")?);

    let summary = backup::import_workspace_bundle(&in_path, &workspace)
        .map_err(|e| HandlerErr::new("bundle_import_failed", format!("{e:#}")))?;

    Ok(json!({
        "bundleFormatDetected": summary.bundle_format_detected
    }))
}

pub fn try_handle(_state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    // Bundle operations address the workspace by explicit path; no
    // selected workspace is required.
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(match export_bundle(&req.params) {
            Ok(result) => ok(&req.id, result),
            Err(e) => e.response(&req.id),
        }),
        "backup.importWorkspaceBundle" => Some(match import_bundle(&req.params) {
            Ok(result) => ok(&req.id, result),
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
