use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::{get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn terms_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, name, sort_order FROM exam_terms ORDER BY sort_order",
    )?;
    let terms = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "sortOrder": r.get::<_, i64>(2)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "terms": terms }))
}

fn terms_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    if name.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "name must not be empty"));
    }
    let next_sort: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM exam_terms",
        [],
        |r| r.get(0),
    )?;
    let term_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO exam_terms(id, name, sort_order) VALUES(?, ?, ?)",
        (&term_id, name.trim(), next_sort),
    )
    .map_err(|e| {
        HandlerErr::with_details("db_insert_failed", e.to_string(), json!({ "table": "exam_terms" }))
    })?;
    Ok(json!({ "examTermId": term_id }))
}

fn terms_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let term_id = get_required_str(params, "examTermId")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute("DELETE FROM marks WHERE exam_term_id = ?", [&term_id])
        .map_err(|e| {
            HandlerErr::with_details("db_delete_failed", e.to_string(), json!({ "table": "marks" }))
        })?;
    tx.execute(
        "DELETE FROM attendance_overrides WHERE exam_term_id = ?",
        [&term_id],
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_delete_failed",
            e.to_string(),
            json!({ "table": "attendance_overrides" }),
        )
    })?;
    tx.execute(
        "DELETE FROM attendance_terms WHERE exam_term_id = ?",
        [&term_id],
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_delete_failed",
            e.to_string(),
            json!({ "table": "attendance_terms" }),
        )
    })?;
    let deleted = tx
        .execute("DELETE FROM exam_terms WHERE id = ?", [&term_id])
        .map_err(|e| {
            HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": "exam_terms" }),
            )
        })?;
    if deleted == 0 {
        let _ = tx.rollback();
        return Err(HandlerErr::new("not_found", "exam term not found"));
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "terms.list" => Some(with_db(state, req, |c, _| terms_list(c))),
        "terms.create" => Some(with_db(state, req, terms_create)),
        "terms.delete" => Some(with_db(state, req, terms_delete)),
        _ => None,
    }
}
