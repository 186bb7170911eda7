use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{optional_str, required_f64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::schedule;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use super::tuitions::tuition_exists;

fn month_param(params: &serde_json::Value) -> Result<String, HandlerErr> {
    let raw = required_str(params, "month")?;
    schedule::parse_month_key(&raw)
        .map(|(year, month)| format!("{:04}-{:02}", year, month))
        .ok_or_else(|| HandlerErr::bad_params("month must be YYYY-MM"))
}

fn fees_month_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let tuition_id = required_str(params, "tuitionId")?;
    let month = month_param(params)?;
    if !tuition_exists(conn, &tuition_id)? {
        return Err(HandlerErr::not_found("tuition not found"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.name, s.monthly_fee, p.id, p.amount, p.paid_on
             FROM students s
             LEFT JOIN fee_payments p ON p.student_id = s.id AND p.month = ?
             WHERE s.tuition_id = ? AND s.active = 1
             ORDER BY s.sort_order",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map((&month, &tuition_id), |r| {
            let payment_id: Option<String> = r.get(3)?;
            let payment = match payment_id {
                Some(id) => json!({
                    "id": id,
                    "amount": r.get::<_, f64>(4)?,
                    "paidOn": r.get::<_, Option<String>>(5)?
                }),
                None => serde_json::Value::Null,
            };
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "monthlyFee": r.get::<_, f64>(2)?,
                "payment": payment
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let paid = rows
        .iter()
        .filter(|r| !r["payment"].is_null())
        .count();
    let unpaid = rows.len() - paid;

    Ok(json!({
        "month": month,
        "rows": rows,
        "paidCount": paid,
        "unpaidCount": unpaid
    }))
}

fn fees_record(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let tuition_id = required_str(params, "tuitionId")?;
    let student_id = required_str(params, "studentId")?;
    let month = month_param(params)?;
    let amount = required_f64(params, "amount")?;
    if amount < 0.0 {
        return Err(HandlerErr::bad_params("amount must not be negative"));
    }
    let paid_on = optional_str(params, "paidOn");

    let belongs = conn
        .query_row(
            "SELECT 1 FROM students WHERE tuition_id = ? AND id = ?",
            (&tuition_id, &student_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if !belongs {
        return Err(HandlerErr::not_found("student not found"));
    }

    conn.execute(
        "INSERT INTO fee_payments(id, tuition_id, student_id, month, amount, paid_on)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, month) DO UPDATE SET
           amount = excluded.amount,
           paid_on = excluded.paid_on",
        (
            &Uuid::new_v4().to_string(),
            &tuition_id,
            &student_id,
            &month,
            amount,
            &paid_on,
        ),
    )
    .map_err(|e| HandlerErr::update(e, "fee_payments"))?;

    let payment_id: String = conn
        .query_row(
            "SELECT id FROM fee_payments WHERE student_id = ? AND month = ?",
            (&student_id, &month),
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;

    Ok(json!({ "paymentId": payment_id }))
}

fn fees_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let payment_id = required_str(params, "paymentId")?;
    let exists = conn
        .query_row("SELECT 1 FROM fee_payments WHERE id = ?", [&payment_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("payment not found"));
    }

    conn.execute("DELETE FROM fee_payments WHERE id = ?", [&payment_id])
        .map_err(|e| HandlerErr::delete(e, "fee_payments"))?;
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
        "fees.monthOpen" => Some(with_conn(state, req, |c| fees_month_open(c, &req.params))),
        "fees.record" => Some(with_conn(state, req, |c| fees_record(c, &req.params))),
        "fees.delete" => Some(with_conn(state, req, |c| fees_delete(c, &req.params))),
        _ => None,
    }
}
