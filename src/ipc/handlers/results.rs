use crate::calc::{
    self, AttendanceConfig, AttendanceOverride, GradingRule, MarkEntry, Student, Subject,
};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::{get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

fn load_students(conn: &Connection, include_inactive: bool) -> Result<Vec<Student>, HandlerErr> {
    let sql = if include_inactive {
        "SELECT id, last_name, first_name, roll_no, attendance_present, attendance_total
         FROM students ORDER BY sort_order"
    } else {
        "SELECT id, last_name, first_name, roll_no, attendance_present, attendance_total
         FROM students WHERE active = 1 ORDER BY sort_order"
    };
    let mut stmt = conn.prepare(sql)?;
    let students = stmt
        .query_map([], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(Student {
                id: r.get(0)?,
                display_name: format!("{}, {}", last, first),
                roll_no: r.get(3)?,
                attendance_present: r.get(4)?,
                attendance_total: r.get(5)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(students)
}

fn load_subjects(conn: &Connection) -> Result<Vec<Subject>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, name, total_marks, theory_max, practical_max
         FROM subjects ORDER BY sort_order",
    )?;
    let subjects = stmt
        .query_map([], |r| {
            Ok(Subject {
                id: r.get(0)?,
                name: r.get(1)?,
                total_marks: r.get(2)?,
                theory_max: r.get(3)?,
                practical_max: r.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(subjects)
}

fn load_marks(conn: &Connection, exam_term_id: &str) -> Result<Vec<MarkEntry>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT student_id, subject_id, exam_term_id,
                obtained_marks, theory_marks, practical_marks
         FROM marks WHERE exam_term_id = ?",
    )?;
    let marks = stmt
        .query_map([exam_term_id], |r| {
            Ok(MarkEntry {
                student_id: r.get(0)?,
                subject_id: r.get(1)?,
                exam_term_id: r.get(2)?,
                obtained_marks: r.get(3)?,
                theory_marks: r.get(4)?,
                practical_marks: r.get(5)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(marks)
}

fn load_grading_rules(conn: &Connection) -> Result<Vec<GradingRule>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT label, min_percentage FROM grading_rules ORDER BY sort_order",
    )?;
    let rules = stmt
        .query_map([], |r| {
            Ok(GradingRule {
                label: r.get(0)?,
                min_percentage: r.get(1)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(rules)
}

/// An attendance config exists for a term only when a total-days row does;
/// without one the calculator leaves every attendance block undefined.
fn load_attendance_config(
    conn: &Connection,
    exam_term_id: &str,
) -> Result<Option<AttendanceConfig>, HandlerErr> {
    let total_days: Option<f64> = conn
        .query_row(
            "SELECT total_days FROM attendance_terms WHERE exam_term_id = ?",
            [exam_term_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(total_days) = total_days else {
        return Ok(None);
    };

    let mut students: HashMap<String, AttendanceOverride> = HashMap::new();
    let mut stmt = conn.prepare(
        "SELECT student_id, present, absent, percentage
         FROM attendance_overrides WHERE exam_term_id = ?",
    )?;
    let rows = stmt
        .query_map([exam_term_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                AttendanceOverride {
                    present: r.get(1)?,
                    absent: r.get(2)?,
                    percentage: r.get(3)?,
                },
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    for (student_id, override_row) in rows {
        students.insert(student_id, override_row);
    }

    Ok(Some(AttendanceConfig {
        total_days,
        students,
    }))
}

fn results_compute(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let exam_term_id = get_required_str(params, "examTermId")?;
    let include_inactive = params
        .get("includeInactive")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let term_name: Option<String> = conn
        .query_row(
            "SELECT name FROM exam_terms WHERE id = ?",
            [&exam_term_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(term_name) = term_name else {
        return Err(HandlerErr::new("not_found", "exam term not found"));
    };

    let students = load_students(conn, include_inactive)?;
    let subjects = load_subjects(conn)?;
    let marks = load_marks(conn, &exam_term_id)?;
    let grading_rules = load_grading_rules(conn)?;
    let attendance_config = load_attendance_config(conn, &exam_term_id)?;

    let results = calc::calculate_results(
        &students,
        &subjects,
        &marks,
        &grading_rules,
        attendance_config.as_ref(),
    );

    // Broadsheet columns: academic subjects only, in roster order.
    let subject_columns: Vec<serde_json::Value> = subjects
        .iter()
        .filter(|s| !s.is_attendance())
        .map(|s| {
            json!({
                "id": s.id,
                "name": s.name,
                "maxMarks": s.max_marks()
            })
        })
        .collect();

    let results_json = serde_json::to_value(&results)
        .map_err(|e| HandlerErr::new("serialize_failed", e.to_string()))?;

    Ok(json!({
        "examTermId": exam_term_id,
        "examTermName": term_name,
        "subjects": subject_columns,
        "results": results_json
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.compute" => Some(with_db(state, req, results_compute)),
        _ => None,
    }
}
