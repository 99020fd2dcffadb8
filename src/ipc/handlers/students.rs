use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::{get_optional_f64, get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, HandlerErr> {
    let row: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(row.is_some())
}

fn students_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, last_name, first_name, roll_no, active, sort_order,
                attendance_present, attendance_total
         FROM students
         ORDER BY sort_order",
    )?;
    let students = stmt
        .query_map([], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "displayName": format!("{}, {}", last, first),
                "lastName": last,
                "firstName": first,
                "rollNo": r.get::<_, Option<String>>(3)?,
                "active": r.get::<_, i64>(4)? != 0,
                "sortOrder": r.get::<_, i64>(5)?,
                "attendancePresent": r.get::<_, Option<f64>>(6)?,
                "attendanceTotal": r.get::<_, Option<f64>>(7)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "students": students }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let last_name = get_required_str(params, "lastName")?;
    let first_name = get_required_str(params, "firstName")?;
    if last_name.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "lastName must not be empty"));
    }
    let roll_no = params
        .get("rollNo")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let active = params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    // Append at the end of the current roster order.
    let next_sort: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students",
        [],
        |r| r.get(0),
    )?;

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, last_name, first_name, roll_no, active, sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            last_name.trim(),
            first_name.trim(),
            &roll_no,
            active as i64,
            next_sort,
            now_rfc3339(),
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details("db_insert_failed", e.to_string(), json!({ "table": "students" }))
    })?;

    Ok(json!({ "studentId": student_id }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::new("bad_params", "missing patch"));
    };

    if let Some(v) = patch.get("lastName").and_then(|v| v.as_str()) {
        conn.execute(
            "UPDATE students SET last_name = ?, updated_at = ? WHERE id = ?",
            (v.trim(), now_rfc3339(), &student_id),
        )?;
    }
    if let Some(v) = patch.get("firstName").and_then(|v| v.as_str()) {
        conn.execute(
            "UPDATE students SET first_name = ?, updated_at = ? WHERE id = ?",
            (v.trim(), now_rfc3339(), &student_id),
        )?;
    }
    if patch.contains_key("rollNo") {
        let v = patch.get("rollNo").and_then(|v| v.as_str());
        conn.execute(
            "UPDATE students SET roll_no = ?, updated_at = ? WHERE id = ?",
            (v, now_rfc3339(), &student_id),
        )?;
    }
    if let Some(v) = patch.get("active").and_then(|v| v.as_bool()) {
        conn.execute(
            "UPDATE students SET active = ?, updated_at = ? WHERE id = ?",
            (v as i64, now_rfc3339(), &student_id),
        )?;
    }
    let patch_value = serde_json::Value::Object(patch.clone());
    if patch.contains_key("attendancePresent") {
        let v = get_optional_f64(&patch_value, "attendancePresent")?;
        conn.execute(
            "UPDATE students SET attendance_present = ?, updated_at = ? WHERE id = ?",
            (v, now_rfc3339(), &student_id),
        )?;
    }
    if patch.contains_key("attendanceTotal") {
        let v = get_optional_f64(&patch_value, "attendanceTotal")?;
        conn.execute(
            "UPDATE students SET attendance_total = ?, updated_at = ? WHERE id = ?",
            (v, now_rfc3339(), &student_id),
        )?;
    }

    Ok(json!({ "ok": true }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    // Dependent rows first; the schema has no ON DELETE CASCADE.
    tx.execute("DELETE FROM marks WHERE student_id = ?", [&student_id])
        .map_err(|e| {
            HandlerErr::with_details("db_delete_failed", e.to_string(), json!({ "table": "marks" }))
        })?;
    tx.execute(
        "DELETE FROM attendance_overrides WHERE student_id = ?",
        [&student_id],
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_delete_failed",
            e.to_string(),
            json!({ "table": "attendance_overrides" }),
        )
    })?;
    tx.execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| {
            HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": "students" }),
            )
        })?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(with_db(state, req, |c, _| students_list(c))),
        "students.create" => Some(with_db(state, req, students_create)),
        "students.update" => Some(with_db(state, req, students_update)),
        "students.delete" => Some(with_db(state, req, students_delete)),
        _ => None,
    }
}
