use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::{get_optional_f64, get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn term_exists(conn: &Connection, exam_term_id: &str) -> Result<bool, HandlerErr> {
    let row: Option<i64> = conn
        .query_row("SELECT 1 FROM exam_terms WHERE id = ?", [exam_term_id], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(row.is_some())
}

fn attendance_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let exam_term_id = get_required_str(params, "examTermId")?;
    if !term_exists(conn, &exam_term_id)? {
        return Err(HandlerErr::new("not_found", "exam term not found"));
    }

    let total_days: Option<f64> = conn
        .query_row(
            "SELECT total_days FROM attendance_terms WHERE exam_term_id = ?",
            [&exam_term_id],
            |r| r.get(0),
        )
        .optional()?;

    let mut stmt = conn.prepare(
        "SELECT student_id, present, absent, percentage
         FROM attendance_overrides
         WHERE exam_term_id = ?
         ORDER BY student_id",
    )?;
    let overrides = stmt
        .query_map([&exam_term_id], |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "present": r.get::<_, Option<f64>>(1)?,
                "absent": r.get::<_, Option<f64>>(2)?,
                "percentage": r.get::<_, Option<f64>>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    Ok(json!({
        "examTermId": exam_term_id,
        "totalDays": total_days,
        "students": overrides
    }))
}

fn attendance_set_total_days(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_term_id = get_required_str(params, "examTermId")?;
    if !term_exists(conn, &exam_term_id)? {
        return Err(HandlerErr::new("not_found", "exam term not found"));
    }

    // A null totalDays removes the config; results for the term then carry no
    // attendance block at all.
    match get_optional_f64(params, "totalDays")? {
        Some(total_days) => {
            if total_days < 0.0 {
                return Err(HandlerErr::new("bad_params", "totalDays must not be negative"));
            }
            conn.execute(
                "INSERT INTO attendance_terms(exam_term_id, total_days)
                 VALUES(?, ?)
                 ON CONFLICT(exam_term_id) DO UPDATE SET
                   total_days = excluded.total_days",
                (&exam_term_id, total_days),
            )
            .map_err(|e| {
                HandlerErr::with_details(
                    "db_update_failed",
                    e.to_string(),
                    json!({ "table": "attendance_terms" }),
                )
            })?;
        }
        None => {
            conn.execute(
                "DELETE FROM attendance_terms WHERE exam_term_id = ?",
                [&exam_term_id],
            )
            .map_err(|e| {
                HandlerErr::with_details(
                    "db_delete_failed",
                    e.to_string(),
                    json!({ "table": "attendance_terms" }),
                )
            })?;
        }
    }

    Ok(json!({ "ok": true }))
}

fn attendance_set_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_term_id = get_required_str(params, "examTermId")?;
    let student_id = get_required_str(params, "studentId")?;
    if !term_exists(conn, &exam_term_id)? {
        return Err(HandlerErr::new("not_found", "exam term not found"));
    }
    let student_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()?;
    if student_exists.is_none() {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let present = get_optional_f64(params, "present")?;
    let absent = get_optional_f64(params, "absent")?;
    let percentage = get_optional_f64(params, "percentage")?;

    // All fields null means the override is gone, not zeroed.
    if present.is_none() && absent.is_none() && percentage.is_none() {
        conn.execute(
            "DELETE FROM attendance_overrides
             WHERE exam_term_id = ? AND student_id = ?",
            (&exam_term_id, &student_id),
        )
        .map_err(|e| {
            HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": "attendance_overrides" }),
            )
        })?;
        return Ok(json!({ "ok": true }));
    }

    conn.execute(
        "INSERT INTO attendance_overrides(exam_term_id, student_id, present, absent, percentage)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(exam_term_id, student_id) DO UPDATE SET
           present = excluded.present,
           absent = excluded.absent,
           percentage = excluded.percentage",
        (&exam_term_id, &student_id, present, absent, percentage),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_update_failed",
            e.to_string(),
            json!({ "table": "attendance_overrides" }),
        )
    })?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.get" => Some(with_db(state, req, attendance_get)),
        "attendance.setTotalDays" => Some(with_db(state, req, attendance_set_total_days)),
        "attendance.setStudent" => Some(with_db(state, req, attendance_set_student)),
        _ => None,
    }
}
