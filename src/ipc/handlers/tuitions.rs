use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{now_ts, required_str, str_array};
use crate::ipc::types::{AppState, Request};
use crate::schedule;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Canonicalizes a user-supplied teaching-day list: full names in the
/// Saturday-first listing order. Individual entries that don't parse are
/// dropped; an input where nothing parses is an error because the
/// tuition would silently never be scheduled.
fn canonical_teaching_days(raw: &[String]) -> Result<String, HandlerErr> {
    let joined = raw.join(",");
    let days = schedule::parse_teaching_days(&joined);
    if days.is_empty() {
        return Err(HandlerErr::bad_params(
            "teachingDays contains no recognized weekday",
        ));
    }
    Ok(schedule::WEEKDAY_ORDER
        .iter()
        .filter(|d| days.contains(*d))
        .map(|d| schedule::weekday_name(*d))
        .collect::<Vec<_>>()
        .join(","))
}

fn teaching_days_json(stored: &str) -> (Vec<&'static str>, usize) {
    let days = schedule::parse_teaching_days(stored);
    let names: Vec<&'static str> = days.iter().map(|d| schedule::weekday_name(*d)).collect();
    let count = names.len();
    (names, count)
}

pub fn tuition_exists(conn: &Connection, tuition_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM tuitions WHERE id = ?", [tuition_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

pub fn teaching_days_for(conn: &Connection, tuition_id: &str) -> Result<String, HandlerErr> {
    conn.query_row(
        "SELECT teaching_days FROM tuitions WHERE id = ?",
        [tuition_id],
        |r| r.get::<_, String>(0),
    )
    .optional()
    .map_err(HandlerErr::query)?
    .ok_or_else(|| HandlerErr::not_found("tuition not found"))
}

fn tuitions_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT
               t.id,
               t.name,
               t.teaching_days,
               (SELECT COUNT(*) FROM students s WHERE s.tuition_id = t.id AND s.active = 1) AS student_count
             FROM tuitions t
             ORDER BY t.name",
        )
        .map_err(HandlerErr::query)?;

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let teaching_days: String = row.get(2)?;
            let student_count: i64 = row.get(3)?;
            Ok((id, name, teaching_days, student_count))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let tuitions: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|(id, name, teaching_days, student_count)| {
            let (names, days_per_week) = teaching_days_json(&teaching_days);
            json!({
                "id": id,
                "name": name,
                "teachingDays": names,
                "daysPerWeek": days_per_week,
                "studentCount": student_count
            })
        })
        .collect();

    Ok(json!({ "tuitions": tuitions }))
}

fn tuitions_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = required_str(params, "name")?;
    let raw_days = str_array(params, "teachingDays")?;
    let stored = canonical_teaching_days(&raw_days)?;

    let tuition_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO tuitions(id, name, teaching_days, created_at) VALUES(?, ?, ?, ?)",
        (&tuition_id, &name, &stored, &now_ts()),
    )
    .map_err(|e| HandlerErr::insert(e, "tuitions"))?;

    let (names, days_per_week) = teaching_days_json(&stored);
    Ok(json!({
        "tuitionId": tuition_id,
        "name": name,
        "teachingDays": names,
        "daysPerWeek": days_per_week
    }))
}

fn tuitions_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let tuition_id = required_str(params, "tuitionId")?;
    if !tuition_exists(conn, &tuition_id)? {
        return Err(HandlerErr::not_found("tuition not found"));
    }
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };

    if let Some(name) = patch.get("name").and_then(|v| v.as_str()) {
        let name = name.trim();
        if name.is_empty() {
            return Err(HandlerErr::bad_params("name must not be empty"));
        }
        conn.execute(
            "UPDATE tuitions SET name = ? WHERE id = ?",
            (name, &tuition_id),
        )
        .map_err(|e| HandlerErr::update(e, "tuitions"))?;
    }

    if let Some(raw) = patch.get("teachingDays").and_then(|v| v.as_array()) {
        let entries: Vec<String> = raw
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect();
        let stored = canonical_teaching_days(&entries)?;
        conn.execute(
            "UPDATE tuitions SET teaching_days = ? WHERE id = ?",
            (&stored, &tuition_id),
        )
        .map_err(|e| HandlerErr::update(e, "tuitions"))?;
    }

    let stored = teaching_days_for(conn, &tuition_id)?;
    let (names, days_per_week) = teaching_days_json(&stored);
    Ok(json!({
        "tuitionId": tuition_id,
        "teachingDays": names,
        "daysPerWeek": days_per_week
    }))
}

fn tuitions_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let tuition_id = required_str(params, "tuitionId")?;
    if !tuition_exists(conn, &tuition_id)? {
        return Err(HandlerErr::not_found("tuition not found"));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute("DELETE FROM fee_payments WHERE tuition_id = ?", [&tuition_id]) {
        let _ = tx.rollback();
        return Err(HandlerErr::delete(e, "fee_payments"));
    }
    if let Err(e) = tx.execute(
        "DELETE FROM attendance_records WHERE tuition_id = ?",
        [&tuition_id],
    ) {
        let _ = tx.rollback();
        return Err(HandlerErr::delete(e, "attendance_records"));
    }
    if let Err(e) = tx.execute("DELETE FROM class_logs WHERE tuition_id = ?", [&tuition_id]) {
        let _ = tx.rollback();
        return Err(HandlerErr::delete(e, "class_logs"));
    }
    if let Err(e) = tx.execute("DELETE FROM students WHERE tuition_id = ?", [&tuition_id]) {
        let _ = tx.rollback();
        return Err(HandlerErr::delete(e, "students"));
    }
    if let Err(e) = tx.execute("DELETE FROM tuitions WHERE id = ?", [&tuition_id]) {
        let _ = tx.rollback();
        return Err(HandlerErr::delete(e, "tuitions"));
    }

    tx.commit().map_err(HandlerErr::commit)?;
    Ok(json!({ "ok": true }))
}

fn with_conn(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&Connection) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tuitions.list" => Some(with_conn(state, req, tuitions_list)),
        "tuitions.create" => Some(with_conn(state, req, |c| tuitions_create(c, &req.params))),
        "tuitions.update" => Some(with_conn(state, req, |c| tuitions_update(c, &req.params))),
        "tuitions.delete" => Some(with_conn(state, req, |c| tuitions_delete(c, &req.params))),
        _ => None,
    }
}
