use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{now_ts, optional_str, required_bool, required_str};
use crate::ipc::types::{AppState, Request};
use crate::schedule;
use chrono::{Datelike, Local, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

use super::attendance::stats_json;
use super::tuitions::{teaching_days_for, tuition_exists};

struct LogRow {
    id: String,
    date: String,
    was_conducted: bool,
    topic_covered: Option<String>,
    notes: Option<String>,
}

impl LogRow {
    fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "date": self.date,
            "wasConducted": self.was_conducted,
            "topicCovered": self.topic_covered,
            "notes": self.notes
        })
    }
}

fn logs_for_month(
    conn: &Connection,
    tuition_id: &str,
    month_key: &str,
) -> Result<Vec<LogRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, date, was_conducted, topic_covered, notes FROM class_logs
             WHERE tuition_id = ? AND date LIKE ?
             ORDER BY date",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map((tuition_id, format!("{}-%", month_key)), |r| {
        Ok(LogRow {
            id: r.get(0)?,
            date: r.get(1)?,
            was_conducted: r.get::<_, i64>(2)? != 0,
            topic_covered: r.get(3)?,
            notes: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

fn parse_today(params: &serde_json::Value) -> Result<NaiveDate, HandlerErr> {
    match optional_str(params, "today") {
        Some(raw) => {
            schedule::parse_date(&raw).ok_or_else(|| HandlerErr::bad_params("today must be YYYY-MM-DD"))
        }
        None => Ok(Local::now().date_naive()),
    }
}

struct LogMonthView {
    logs: Vec<LogRow>,
    days: Vec<serde_json::Value>,
    stats: schedule::MonthStats,
}

/// The log-centric month view: here the class log alone decides what
/// counts as conducted, attendance rows are not consulted.
fn classify_from_logs(
    conn: &Connection,
    tuition_id: &str,
    month_key: &str,
    year: i32,
    month: u32,
    today: NaiveDate,
) -> Result<LogMonthView, HandlerErr> {
    let stored_days = teaching_days_for(conn, tuition_id)?;
    let teaching_days = schedule::parse_teaching_days(&stored_days);
    let logs = logs_for_month(conn, tuition_id, month_key)?;

    let mut conducted_days: HashSet<u32> = HashSet::new();
    for log in &logs {
        if !log.was_conducted {
            continue;
        }
        if let Some(date) = schedule::parse_date(&log.date) {
            conducted_days.insert(date.day());
        }
    }

    let classified = schedule::classify_month(&teaching_days, year, month, &conducted_days, today);
    let days: Vec<serde_json::Value> = classified
        .per_day
        .iter()
        .map(|(date, status)| {
            json!({
                "date": date.format("%Y-%m-%d").to_string(),
                "scheduled": schedule::is_scheduled_day(&teaching_days, *date),
                "status": status.as_str()
            })
        })
        .collect();

    Ok(LogMonthView {
        logs,
        days,
        stats: classified.stats,
    })
}

fn class_logs_month_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let tuition_id = required_str(params, "tuitionId")?;
    let month_raw = required_str(params, "month")?;
    let (year, month) = schedule::parse_month_key(&month_raw)
        .ok_or_else(|| HandlerErr::bad_params("month must be YYYY-MM"))?;
    let month_key = format!("{:04}-{:02}", year, month);
    let today = parse_today(params)?;

    let view = classify_from_logs(conn, &tuition_id, &month_key, year, month, today)?;
    let logs_json: Vec<serde_json::Value> = view.logs.iter().map(|l| l.to_json()).collect();

    Ok(json!({
        "month": month_key,
        "logs": logs_json,
        "days": view.days,
        "stats": stats_json(&view.stats)
    }))
}

fn class_logs_upsert(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let tuition_id = required_str(params, "tuitionId")?;
    let was_conducted = required_bool(params, "wasConducted")?;
    let date_raw = required_str(params, "date")?;
    let date = schedule::parse_date(&date_raw)
        .ok_or_else(|| HandlerErr::bad_params("date must be YYYY-MM-DD"))?;
    let today = parse_today(params)?;
    let topic_covered = optional_str(params, "topicCovered");
    let notes = optional_str(params, "notes");

    if !tuition_exists(conn, &tuition_id)? {
        return Err(HandlerErr::not_found("tuition not found"));
    }

    let date_key = date.format("%Y-%m-%d").to_string();

    // Manual edits own the whole record, unlike the attendance sync
    // which touches only the conducted flag.
    conn.execute(
        "INSERT INTO class_logs(id, tuition_id, date, was_conducted, topic_covered, notes, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(tuition_id, date) DO UPDATE SET
           was_conducted = excluded.was_conducted,
           topic_covered = excluded.topic_covered,
           notes = excluded.notes,
           updated_at = excluded.updated_at",
        (
            &Uuid::new_v4().to_string(),
            &tuition_id,
            &date_key,
            was_conducted as i64,
            &topic_covered,
            &notes,
            &now_ts(),
        ),
    )
    .map_err(|e| HandlerErr::update(e, "class_logs"))?;

    let log = conn
        .query_row(
            "SELECT id, date, was_conducted, topic_covered, notes FROM class_logs
             WHERE tuition_id = ? AND date = ?",
            (&tuition_id, &date_key),
            |r| {
                Ok(LogRow {
                    id: r.get(0)?,
                    date: r.get(1)?,
                    was_conducted: r.get::<_, i64>(2)? != 0,
                    topic_covered: r.get(3)?,
                    notes: r.get(4)?,
                })
            },
        )
        .map_err(HandlerErr::query)?;

    let month_key = date.format("%Y-%m").to_string();
    let view = classify_from_logs(
        conn,
        &tuition_id,
        &month_key,
        date.year(),
        date.month(),
        today,
    )?;

    Ok(json!({
        "log": log.to_json(),
        "days": view.days,
        "stats": stats_json(&view.stats)
    }))
}

fn class_logs_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let log_id = required_str(params, "logId")?;
    let exists = conn
        .query_row("SELECT 1 FROM class_logs WHERE id = ?", [&log_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("class log not found"));
    }

    conn.execute("DELETE FROM class_logs WHERE id = ?", [&log_id])
        .map_err(|e| HandlerErr::delete(e, "class_logs"))?;
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
        "classLogs.monthOpen" => Some(with_conn(state, req, |c| {
            class_logs_month_open(c, &req.params)
        })),
        "classLogs.upsert" => Some(with_conn(state, req, |c| class_logs_upsert(c, &req.params))),
        "classLogs.delete" => Some(with_conn(state, req, |c| class_logs_delete(c, &req.params))),
        _ => None,
    }
}
