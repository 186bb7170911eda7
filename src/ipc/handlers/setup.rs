use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Attendance,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "attendance" => Some(Self::Attendance),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Attendance => "setup.attendance",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Attendance => json!({
            "showArchivedStudents": false,
            "defaultMarkPresent": true
        }),
    }
}

fn merged_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut out = default_section(section);
    if let Some(stored) = db::settings_get_json(conn, section.key())? {
        if let (Some(base), Some(over)) = (out.as_object_mut(), stored.as_object()) {
            for (k, v) in over {
                base.insert(k.clone(), v.clone());
            }
        }
    }
    Ok(out)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section) = req
        .params
        .get("section")
        .and_then(|v| v.as_str())
        .and_then(SetupSection::parse)
    else {
        return err(&req.id, "bad_params", "unknown section", None);
    };

    match merged_section(conn, section) {
        Ok(values) => ok(&req.id, json!({ "values": values })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section) = req
        .params
        .get("section")
        .and_then(|v| v.as_str())
        .and_then(SetupSection::parse)
    else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    // Only keys the section defines are accepted; unknown keys are dropped.
    let defaults = default_section(section);
    let known = defaults.as_object().cloned().unwrap_or_default();
    let current = match merged_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let mut next: Map<String, Value> = current.as_object().cloned().unwrap_or_default();
    for (k, v) in patch {
        if known.contains_key(k) {
            next.insert(k.clone(), v.clone());
        }
    }

    let next = Value::Object(next);
    if let Err(e) = db::settings_set_json(conn, section.key(), &next) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "values": next }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
