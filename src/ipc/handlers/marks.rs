use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::{get_optional_f64, get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct MarkValues {
    obtained_marks: Option<f64>,
    theory_marks: Option<f64>,
    practical_marks: Option<f64>,
}

fn parse_mark_values(params: &serde_json::Value) -> Result<MarkValues, HandlerErr> {
    let obtained_marks = get_optional_f64(params, "obtainedMarks")?;
    let theory_marks = get_optional_f64(params, "theoryMarks")?;
    let practical_marks = get_optional_f64(params, "practicalMarks")?;

    let has_split = theory_marks.is_some() || practical_marks.is_some();
    if obtained_marks.is_none() && !has_split {
        return Err(HandlerErr::new(
            "bad_params",
            "entry needs obtainedMarks or theory/practical marks",
        ));
    }
    // Split entries shadow obtainedMarks during computation; storing both
    // would only hide data from the grid, so reject the ambiguity up front.
    if obtained_marks.is_some() && has_split {
        return Err(HandlerErr::new(
            "bad_params",
            "obtainedMarks and split marks are mutually exclusive",
        ));
    }

    Ok(MarkValues {
        obtained_marks,
        theory_marks,
        practical_marks,
    })
}

fn require_row(
    conn: &Connection,
    sql: &'static str,
    id: &str,
    what: &'static str,
) -> Result<(), HandlerErr> {
    let row: Option<i64> = conn.query_row(sql, [id], |r| r.get(0)).optional()?;
    if row.is_none() {
        return Err(HandlerErr::new("not_found", format!("{} not found", what)));
    }
    Ok(())
}

fn upsert_mark(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
    exam_term_id: &str,
    values: &MarkValues,
) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO marks(id, student_id, subject_id, exam_term_id,
                           obtained_marks, theory_marks, practical_marks, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id, exam_term_id) DO UPDATE SET
           obtained_marks = excluded.obtained_marks,
           theory_marks = excluded.theory_marks,
           practical_marks = excluded.practical_marks,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            student_id,
            subject_id,
            exam_term_id,
            values.obtained_marks,
            values.theory_marks,
            values.practical_marks,
            chrono::Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details("db_update_failed", e.to_string(), json!({ "table": "marks" }))
    })?;
    Ok(())
}

fn marks_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let exam_term_id = get_required_str(params, "examTermId")?;
    let subject_id = params
        .get("subjectId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let mut sql = String::from(
        "SELECT student_id, subject_id, exam_term_id,
                obtained_marks, theory_marks, practical_marks
         FROM marks
         WHERE exam_term_id = ?",
    );
    if subject_id.is_some() {
        sql.push_str(" AND subject_id = ?");
    }
    sql.push_str(" ORDER BY subject_id, student_id");

    fn map_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "studentId": r.get::<_, String>(0)?,
            "subjectId": r.get::<_, String>(1)?,
            "examTermId": r.get::<_, String>(2)?,
            "obtainedMarks": r.get::<_, Option<f64>>(3)?,
            "theoryMarks": r.get::<_, Option<f64>>(4)?,
            "practicalMarks": r.get::<_, Option<f64>>(5)?
        }))
    }

    let mut stmt = conn.prepare(&sql)?;
    let entries = match &subject_id {
        Some(sid) => stmt
            .query_map((&exam_term_id, sid), map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())?,
        None => stmt
            .query_map([&exam_term_id], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())?,
    };
    Ok(json!({ "marks": entries }))
}

fn marks_set(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let exam_term_id = get_required_str(params, "examTermId")?;
    let values = parse_mark_values(params)?;

    require_row(conn, "SELECT 1 FROM students WHERE id = ?", &student_id, "student")?;
    require_row(conn, "SELECT 1 FROM subjects WHERE id = ?", &subject_id, "subject")?;
    require_row(conn, "SELECT 1 FROM exam_terms WHERE id = ?", &exam_term_id, "exam term")?;

    upsert_mark(conn, &student_id, &subject_id, &exam_term_id, &values)?;
    Ok(json!({ "ok": true }))
}

fn marks_bulk_set(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let exam_term_id = get_required_str(params, "examTermId")?;
    let Some(entries) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing entries"));
    };

    require_row(conn, "SELECT 1 FROM subjects WHERE id = ?", &subject_id, "subject")?;
    require_row(conn, "SELECT 1 FROM exam_terms WHERE id = ?", &exam_term_id, "exam term")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut written = 0_usize;
    let mut skipped = 0_usize;
    for entry in entries {
        let student_id = get_required_str(entry, "studentId")?;
        let values = parse_mark_values(entry)?;
        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
                r.get(0)
            })
            .optional()?;
        if exists.is_none() {
            skipped += 1;
            continue;
        }
        upsert_mark(&tx, &student_id, &subject_id, &exam_term_id, &values)?;
        written += 1;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "written": written, "skipped": skipped }))
}

fn marks_clear(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let exam_term_id = get_required_str(params, "examTermId")?;

    let deleted = conn
        .execute(
            "DELETE FROM marks
             WHERE student_id = ? AND subject_id = ? AND exam_term_id = ?",
            (&student_id, &subject_id, &exam_term_id),
        )
        .map_err(|e| {
            HandlerErr::with_details("db_delete_failed", e.to_string(), json!({ "table": "marks" }))
        })?;
    Ok(json!({ "deleted": deleted }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.list" => Some(with_db(state, req, marks_list)),
        "marks.set" => Some(with_db(state, req, marks_set)),
        "marks.bulkSet" => Some(with_db(state, req, marks_bulk_set)),
        "marks.clear" => Some(with_db(state, req, marks_clear)),
        _ => None,
    }
}
