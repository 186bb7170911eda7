use crate::db;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{now_ts, optional_str, required_bool, required_str, str_array};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{self, MonthStats};
use chrono::{Datelike, Local, NaiveDate, Weekday};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::tuitions::{teaching_days_for, tuition_exists};

fn parse_today(params: &serde_json::Value) -> Result<NaiveDate, HandlerErr> {
    match optional_str(params, "today") {
        Some(raw) => {
            schedule::parse_date(&raw).ok_or_else(|| HandlerErr::bad_params("today must be YYYY-MM-DD"))
        }
        None => Ok(Local::now().date_naive()),
    }
}

fn parse_date_param(params: &serde_json::Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = required_str(params, key)?;
    schedule::parse_date(&raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

fn month_key_param(params: &serde_json::Value) -> Result<(String, i32, u32), HandlerErr> {
    let raw = required_str(params, "month")?;
    let (year, month) = schedule::parse_month_key(&raw)
        .ok_or_else(|| HandlerErr::bad_params("month must be YYYY-MM"))?;
    // Canonical form keeps the LIKE prefix queries honest.
    Ok((format!("{:04}-{:02}", year, month), year, month))
}

fn student_in_tuition(
    conn: &Connection,
    tuition_id: &str,
    student_id: &str,
) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM students WHERE tuition_id = ? AND id = ?",
        (tuition_id, student_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

/// Present flags for every attendance record of one (tuition, date).
fn present_flags_for_date(
    conn: &Connection,
    tuition_id: &str,
    date: &str,
) -> Result<Vec<bool>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT is_present FROM attendance_records WHERE tuition_id = ? AND date = ?")
        .map_err(HandlerErr::query)?;
    stmt.query_map((tuition_id, date), |r| Ok(r.get::<_, i64>(0)? != 0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)
}

/// Attendance-derived conducted flag per date of the month. A date with
/// no records at all is absent from the map, not false; the caller
/// decides whether the manual log fills the gap.
fn attendance_signals_for_month(
    conn: &Connection,
    tuition_id: &str,
    month_key: &str,
) -> Result<HashMap<String, bool>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT date, is_present FROM attendance_records
             WHERE tuition_id = ? AND date LIKE ?",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map((tuition_id, format!("{}-%", month_key)), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? != 0))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut by_date: HashMap<String, Vec<bool>> = HashMap::new();
    for (date, present) in rows {
        by_date.entry(date).or_default().push(present);
    }
    Ok(by_date
        .into_iter()
        .map(|(date, flags)| (date, schedule::was_conducted(flags)))
        .collect())
}

fn log_signals_for_month(
    conn: &Connection,
    tuition_id: &str,
    month_key: &str,
) -> Result<HashMap<String, bool>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT date, was_conducted FROM class_logs
             WHERE tuition_id = ? AND date LIKE ?",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map((tuition_id, format!("{}-%", month_key)), |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? != 0))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map(|rows| rows.into_iter().collect())
    .map_err(HandlerErr::query)
}

/// Reconciles the class log with the latest attendance derivation.
/// Only the conducted flag moves; a tutor's topic/notes survive. The
/// atomic upsert means two racing callers cannot create a second row.
fn sync_log_from_attendance(
    conn: &Connection,
    tuition_id: &str,
    date: &str,
    was_conducted: bool,
) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO class_logs(id, tuition_id, date, was_conducted, topic_covered, notes, updated_at)
         VALUES(?, ?, ?, ?, NULL, NULL, ?)
         ON CONFLICT(tuition_id, date) DO UPDATE SET
           was_conducted = excluded.was_conducted,
           updated_at = excluded.updated_at",
        (
            &Uuid::new_v4().to_string(),
            tuition_id,
            date,
            was_conducted as i64,
            &now_ts(),
        ),
    )
    .map_err(|e| HandlerErr::update(e, "class_logs"))?;
    Ok(())
}

pub struct MonthView {
    pub days: Vec<serde_json::Value>,
    pub stats: MonthStats,
}

/// Builds the per-day classification for the attendance-driven view:
/// attendance rows are authoritative where they exist, the manual log
/// flag fills the gaps, and both raw signals ride along in the output.
pub fn month_view_from_attendance(
    conn: &Connection,
    tuition_id: &str,
    teaching_days: &[Weekday],
    month_key: &str,
    year: i32,
    month: u32,
    today: NaiveDate,
) -> Result<MonthView, HandlerErr> {
    let attendance = attendance_signals_for_month(conn, tuition_id, month_key)?;
    let logs = log_signals_for_month(conn, tuition_id, month_key)?;

    let mut conducted_days: HashSet<u32> = HashSet::new();
    for day in 1..=schedule::days_in_month(year, month) {
        let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
            continue;
        };
        let key = date.format("%Y-%m-%d").to_string();
        if schedule::conducted_from_signals(
            attendance.get(&key).copied(),
            logs.get(&key).copied(),
        ) {
            conducted_days.insert(day);
        }
    }

    let classified = schedule::classify_month(teaching_days, year, month, &conducted_days, today);
    let days = classified
        .per_day
        .iter()
        .map(|(date, status)| {
            let key = date.format("%Y-%m-%d").to_string();
            json!({
                "date": key,
                "scheduled": schedule::is_scheduled_day(teaching_days, *date),
                "conductedByAttendance": attendance.get(&key).copied(),
                "logConducted": logs.get(&key).copied(),
                "status": status.as_str()
            })
        })
        .collect();

    Ok(MonthView {
        days,
        stats: classified.stats,
    })
}

pub fn stats_json(stats: &MonthStats) -> serde_json::Value {
    json!({
        "scheduled": stats.scheduled,
        "conducted": stats.conducted,
        "missed": stats.missed,
        "remaining": stats.remaining
    })
}

fn show_archived_students(conn: &Connection) -> bool {
    db::settings_get_json(conn, "setup.attendance")
        .ok()
        .flatten()
        .and_then(|v| v.get("showArchivedStudents").and_then(|b| b.as_bool()))
        .unwrap_or(false)
}

fn attendance_month_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let tuition_id = required_str(params, "tuitionId")?;
    let (month_key, year, month) = month_key_param(params)?;
    let today = parse_today(params)?;

    let stored_days = teaching_days_for(conn, &tuition_id)?;
    let teaching_days = schedule::parse_teaching_days(&stored_days);

    let include_archived = show_archived_students(conn);
    let sql = if include_archived {
        "SELECT id, name, active FROM students WHERE tuition_id = ? ORDER BY sort_order"
    } else {
        "SELECT id, name, active FROM students WHERE tuition_id = ? AND active = 1 ORDER BY sort_order"
    };
    let mut stmt = conn.prepare(sql).map_err(HandlerErr::query)?;
    let students = stmt
        .query_map([&tuition_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)? != 0,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut stmt = conn
        .prepare(
            "SELECT student_id, date, is_present FROM attendance_records
             WHERE tuition_id = ? AND date LIKE ?",
        )
        .map_err(HandlerErr::query)?;
    let records = stmt
        .query_map((&tuition_id, format!("{}-%", month_key)), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)? != 0,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut marks_by_student: HashMap<String, serde_json::Map<String, serde_json::Value>> =
        HashMap::new();
    for (student_id, date, present) in records {
        marks_by_student
            .entry(student_id)
            .or_default()
            .insert(date, json!(present));
    }

    let rows: Vec<serde_json::Value> = students
        .iter()
        .map(|(id, name, active)| {
            let marks = marks_by_student.remove(id).unwrap_or_default();
            json!({
                "studentId": id,
                "name": name,
                "active": active,
                "marks": marks
            })
        })
        .collect();

    let view = month_view_from_attendance(
        conn,
        &tuition_id,
        &teaching_days,
        &month_key,
        year,
        month,
        today,
    )?;

    Ok(json!({
        "month": month_key,
        "daysInMonth": schedule::days_in_month(year, month),
        "teachingDays": teaching_days.iter().map(|d| schedule::weekday_name(*d)).collect::<Vec<_>>(),
        "rows": rows,
        "days": view.days,
        "stats": stats_json(&view.stats)
    }))
}

/// Phases 2-4 of the mark pipeline, shared by single and bulk marks:
/// re-derive the conducted flag over the complete attendance set for the
/// date, reconcile the log, and hand back fresh day/month aggregates.
fn rederive_and_reconcile(
    conn: &Connection,
    tuition_id: &str,
    date: NaiveDate,
    today: NaiveDate,
) -> Result<serde_json::Value, HandlerErr> {
    let date_key = date.format("%Y-%m-%d").to_string();
    let flags = present_flags_for_date(conn, tuition_id, &date_key)?;
    let conducted = schedule::was_conducted(flags);

    sync_log_from_attendance(conn, tuition_id, &date_key, conducted)?;

    let stored_days = teaching_days_for(conn, tuition_id)?;
    let teaching_days = schedule::parse_teaching_days(&stored_days);
    let month_key = date.format("%Y-%m").to_string();
    let view = month_view_from_attendance(
        conn,
        tuition_id,
        &teaching_days,
        &month_key,
        date.year(),
        date.month(),
        today,
    )?;

    let scheduled = schedule::is_scheduled_day(&teaching_days, date);
    let status = schedule::classify_day(scheduled, conducted, date, today);

    Ok(json!({
        "date": date_key,
        "wasConducted": conducted,
        "dayStatus": status.as_str(),
        "days": view.days,
        "stats": stats_json(&view.stats)
    }))
}

fn attendance_mark(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let tuition_id = required_str(params, "tuitionId")?;
    let student_id = required_str(params, "studentId")?;
    let is_present = required_bool(params, "isPresent")?;
    let date = parse_date_param(params, "date")?;
    let today = parse_today(params)?;

    if !tuition_exists(conn, &tuition_id)? {
        return Err(HandlerErr::not_found("tuition not found"));
    }
    if !student_in_tuition(conn, &tuition_id, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    let date_key = date.format("%Y-%m-%d").to_string();
    conn.execute(
        "INSERT INTO attendance_records(tuition_id, student_id, date, is_present)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(tuition_id, student_id, date) DO UPDATE SET
           is_present = excluded.is_present",
        (&tuition_id, &student_id, &date_key, is_present as i64),
    )
    .map_err(|e| HandlerErr::update(e, "attendance_records"))?;

    rederive_and_reconcile(conn, &tuition_id, date, today)
}

fn attendance_mark_all(
    conn: &Connection,
    params: &serde_json::Value,
    is_present: bool,
) -> Result<serde_json::Value, HandlerErr> {
    let tuition_id = required_str(params, "tuitionId")?;
    let student_ids = str_array(params, "studentIds")?;
    let date = parse_date_param(params, "date")?;
    let today = parse_today(params)?;

    if !tuition_exists(conn, &tuition_id)? {
        return Err(HandlerErr::not_found("tuition not found"));
    }

    let date_key = date.format("%Y-%m-%d").to_string();

    // Phase 1 is one transaction; the log reconciliation stays outside it
    // so a failed log write never rolls back committed attendance.
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    for student_id in &student_ids {
        let exists = tx
            .query_row(
                "SELECT 1 FROM students WHERE tuition_id = ? AND id = ?",
                (&tuition_id, student_id),
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map_err(HandlerErr::query)?
            .is_some();
        if !exists {
            continue;
        }
        tx.execute(
            "INSERT INTO attendance_records(tuition_id, student_id, date, is_present)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(tuition_id, student_id, date) DO UPDATE SET
               is_present = excluded.is_present",
            (&tuition_id, student_id, &date_key, is_present as i64),
        )
        .map_err(|e| HandlerErr::update(e, "attendance_records"))?;
    }
    tx.commit().map_err(HandlerErr::commit)?;

    rederive_and_reconcile(conn, &tuition_id, date, today)
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
        "attendance.monthOpen" => Some(with_conn(state, req, |c| {
            attendance_month_open(c, &req.params)
        })),
        "attendance.mark" => Some(with_conn(state, req, |c| attendance_mark(c, &req.params))),
        "attendance.markAllPresent" => Some(with_conn(state, req, |c| {
            attendance_mark_all(c, &req.params, true)
        })),
        "attendance.markAllAbsent" => Some(with_conn(state, req, |c| {
            attendance_mark_all(c, &req.params, false)
        })),
        _ => None,
    }
}
