use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::{get_optional_f64, get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct SubjectFields {
    name: String,
    total_marks: Option<f64>,
    theory_max: Option<f64>,
    practical_max: Option<f64>,
}

fn parse_subject_fields(params: &serde_json::Value) -> Result<SubjectFields, HandlerErr> {
    let name = get_required_str(params, "name")?;
    if name.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "name must not be empty"));
    }
    let total_marks = get_optional_f64(params, "totalMarks")?;
    let theory_max = get_optional_f64(params, "theoryMax")?;
    let practical_max = get_optional_f64(params, "practicalMax")?;

    // When both the total and a full split are given they must agree; a split
    // on its own defines the total implicitly.
    if let (Some(total), Some(theory), Some(practical)) = (total_marks, theory_max, practical_max) {
        if (theory + practical - total).abs() > 1e-9 {
            return Err(HandlerErr::with_details(
                "bad_params",
                "theoryMax + practicalMax must equal totalMarks",
                json!({ "totalMarks": total, "theoryMax": theory, "practicalMax": practical }),
            ));
        }
    }
    if total_marks.is_none() && theory_max.is_none() && practical_max.is_none() {
        return Err(HandlerErr::new(
            "bad_params",
            "subject needs totalMarks or a theory/practical split",
        ));
    }

    Ok(SubjectFields {
        name: name.trim().to_string(),
        total_marks,
        theory_max,
        practical_max,
    })
}

fn subjects_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, name, total_marks, theory_max, practical_max, sort_order
         FROM subjects
         ORDER BY sort_order",
    )?;
    let subjects = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "totalMarks": r.get::<_, Option<f64>>(2)?,
                "theoryMax": r.get::<_, Option<f64>>(3)?,
                "practicalMax": r.get::<_, Option<f64>>(4)?,
                "sortOrder": r.get::<_, i64>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "subjects": subjects }))
}

fn subjects_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let fields = parse_subject_fields(params)?;

    // The reserved attendance id may be supplied explicitly so attendance can
    // flow through the ordinary mark-entry pipeline.
    let subject_id = match params.get("id").and_then(|v| v.as_str()) {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => Uuid::new_v4().to_string(),
    };

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()?;
    if exists.is_some() {
        return Err(HandlerErr::new("conflict", "subject id already exists"));
    }

    let next_sort: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM subjects",
        [],
        |r| r.get(0),
    )?;
    conn.execute(
        "INSERT INTO subjects(id, name, total_marks, theory_max, practical_max, sort_order)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &subject_id,
            &fields.name,
            fields.total_marks,
            fields.theory_max,
            fields.practical_max,
            next_sort,
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details("db_insert_failed", e.to_string(), json!({ "table": "subjects" }))
    })?;

    Ok(json!({ "subjectId": subject_id }))
}

fn subjects_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "subject not found"));
    }

    let fields = parse_subject_fields(params)?;
    conn.execute(
        "UPDATE subjects
         SET name = ?, total_marks = ?, theory_max = ?, practical_max = ?
         WHERE id = ?",
        (
            &fields.name,
            fields.total_marks,
            fields.theory_max,
            fields.practical_max,
            &subject_id,
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details("db_update_failed", e.to_string(), json!({ "table": "subjects" }))
    })?;

    Ok(json!({ "ok": true }))
}

fn subjects_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute("DELETE FROM marks WHERE subject_id = ?", [&subject_id])
        .map_err(|e| {
            HandlerErr::with_details("db_delete_failed", e.to_string(), json!({ "table": "marks" }))
        })?;
    let deleted = tx
        .execute("DELETE FROM subjects WHERE id = ?", [&subject_id])
        .map_err(|e| {
            HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": "subjects" }),
            )
        })?;
    if deleted == 0 {
        let _ = tx.rollback();
        return Err(HandlerErr::new("not_found", "subject not found"));
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(with_db(state, req, |c, _| subjects_list(c))),
        "subjects.create" => Some(with_db(state, req, subjects_create)),
        "subjects.update" => Some(with_db(state, req, subjects_update)),
        "subjects.delete" => Some(with_db(state, req, subjects_delete)),
        _ => None,
    }
}
