use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{now_ts, required_f64, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use super::tuitions::tuition_exists;

fn student_tuition(conn: &Connection, student_id: &str) -> Result<String, HandlerErr> {
    conn.query_row(
        "SELECT tuition_id FROM students WHERE id = ?",
        [student_id],
        |r| r.get::<_, String>(0),
    )
    .optional()
    .map_err(HandlerErr::query)?
    .ok_or_else(|| HandlerErr::not_found("student not found"))
}

fn students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let tuition_id = required_str(params, "tuitionId")?;
    if !tuition_exists(conn, &tuition_id)? {
        return Err(HandlerErr::not_found("tuition not found"));
    }
    let include_archived = params
        .get("includeArchived")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let sql = if include_archived {
        "SELECT id, name, monthly_fee, active, sort_order
         FROM students WHERE tuition_id = ? ORDER BY sort_order"
    } else {
        "SELECT id, name, monthly_fee, active, sort_order
         FROM students WHERE tuition_id = ? AND active = 1 ORDER BY sort_order"
    };
    let mut stmt = conn.prepare(sql).map_err(HandlerErr::query)?;
    let students = stmt
        .query_map([&tuition_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "monthlyFee": r.get::<_, f64>(2)?,
                "active": r.get::<_, i64>(3)? != 0,
                "sortOrder": r.get::<_, i64>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "students": students }))
}

fn students_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let tuition_id = required_str(params, "tuitionId")?;
    let name = required_str(params, "name")?;
    let monthly_fee = required_f64(params, "monthlyFee")?;
    if monthly_fee < 0.0 {
        return Err(HandlerErr::bad_params("monthlyFee must not be negative"));
    }
    if !tuition_exists(conn, &tuition_id)? {
        return Err(HandlerErr::not_found("tuition not found"));
    }

    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE tuition_id = ?",
            [&tuition_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, tuition_id, name, monthly_fee, active, sort_order, updated_at)
         VALUES(?, ?, ?, ?, 1, ?, ?)",
        (&student_id, &tuition_id, &name, monthly_fee, next_sort, &now_ts()),
    )
    .map_err(|e| HandlerErr::insert(e, "students"))?;

    Ok(json!({ "studentId": student_id, "name": name }))
}

fn students_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let _ = student_tuition(conn, &student_id)?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };

    if let Some(name) = patch.get("name").and_then(|v| v.as_str()) {
        let name = name.trim();
        if name.is_empty() {
            return Err(HandlerErr::bad_params("name must not be empty"));
        }
        conn.execute(
            "UPDATE students SET name = ?, updated_at = ? WHERE id = ?",
            (name, &now_ts(), &student_id),
        )
        .map_err(|e| HandlerErr::update(e, "students"))?;
    }

    if let Some(fee) = patch.get("monthlyFee").and_then(|v| v.as_f64()) {
        if fee < 0.0 {
            return Err(HandlerErr::bad_params("monthlyFee must not be negative"));
        }
        conn.execute(
            "UPDATE students SET monthly_fee = ?, updated_at = ? WHERE id = ?",
            (fee, &now_ts(), &student_id),
        )
        .map_err(|e| HandlerErr::update(e, "students"))?;
    }

    Ok(json!({ "ok": true }))
}

fn set_active(
    conn: &Connection,
    params: &serde_json::Value,
    active: bool,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let _ = student_tuition(conn, &student_id)?;
    conn.execute(
        "UPDATE students SET active = ?, updated_at = ? WHERE id = ?",
        (active as i64, &now_ts(), &student_id),
    )
    .map_err(|e| HandlerErr::update(e, "students"))?;
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
        "students.list" => Some(with_conn(state, req, |c| students_list(c, &req.params))),
        "students.create" => Some(with_conn(state, req, |c| students_create(c, &req.params))),
        "students.update" => Some(with_conn(state, req, |c| students_update(c, &req.params))),
        "students.archive" => Some(with_conn(state, req, |c| set_active(c, &req.params, false))),
        "students.restore" => Some(with_conn(state, req, |c| set_active(c, &req.params, true))),
        _ => None,
    }
}
