use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::with_db;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn grading_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT label, min_percentage
         FROM grading_rules
         ORDER BY min_percentage DESC, sort_order",
    )?;
    let rules = stmt
        .query_map([], |r| {
            Ok(json!({
                "label": r.get::<_, String>(0)?,
                "minPercentage": r.get::<_, f64>(1)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "rules": rules }))
}

fn grading_replace(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let Some(rules) = params.get("rules").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing rules"));
    };
    if rules.is_empty() {
        return Err(HandlerErr::new("bad_params", "rules must not be empty"));
    }

    let mut parsed: Vec<(String, f64)> = Vec::with_capacity(rules.len());
    for rule in rules {
        let label = rule
            .get("label")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HandlerErr::new("bad_params", "rule label must be a non-empty string"))?;
        let min_percentage = rule
            .get("minPercentage")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| HandlerErr::new("bad_params", "rule minPercentage must be a number"))?;
        if !(0.0..=100.0).contains(&min_percentage) {
            return Err(HandlerErr::with_details(
                "bad_params",
                "minPercentage must be between 0 and 100",
                json!({ "label": label, "minPercentage": min_percentage }),
            ));
        }
        parsed.push((label, min_percentage));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute("DELETE FROM grading_rules", []).map_err(|e| {
        HandlerErr::with_details(
            "db_delete_failed",
            e.to_string(),
            json!({ "table": "grading_rules" }),
        )
    })?;
    for (i, (label, min_percentage)) in parsed.iter().enumerate() {
        tx.execute(
            "INSERT INTO grading_rules(id, label, min_percentage, sort_order)
             VALUES(?, ?, ?, ?)",
            (Uuid::new_v4().to_string(), label, min_percentage, i as i64),
        )
        .map_err(|e| {
            HandlerErr::with_details(
                "db_insert_failed",
                e.to_string(),
                json!({ "table": "grading_rules" }),
            )
        })?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "count": parsed.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grading.list" => Some(with_db(state, req, |c, _| grading_list(c))),
        "grading.replace" => Some(with_db(state, req, grading_replace)),
        _ => None,
    }
}
