use rusqlite::Connection;
use std::path::Path;
use uuid::Uuid;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("results.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            roll_no TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL,
            attendance_present REAL,
            attendance_total REAL,
            updated_at TEXT
        )",
        [],
    )?;
    // Early workspaces predate roll numbers. Add the column when missing.
    ensure_students_roll_no(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_sort ON students(sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            total_marks REAL,
            theory_max REAL,
            practical_max REAL,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_sort ON subjects(sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_terms(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            exam_term_id TEXT NOT NULL,
            obtained_marks REAL,
            theory_marks REAL,
            practical_marks REAL,
            updated_at TEXT,
            UNIQUE(student_id, subject_id, exam_term_id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(exam_term_id) REFERENCES exam_terms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_term ON marks(exam_term_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_student ON marks(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_term_subject ON marks(exam_term_id, subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grading_rules(
            id TEXT PRIMARY KEY,
            label TEXT NOT NULL,
            min_percentage REAL NOT NULL,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_terms(
            exam_term_id TEXT PRIMARY KEY,
            total_days REAL NOT NULL,
            FOREIGN KEY(exam_term_id) REFERENCES exam_terms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_overrides(
            exam_term_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            present REAL,
            absent REAL,
            percentage REAL,
            PRIMARY KEY(exam_term_id, student_id),
            FOREIGN KEY(exam_term_id) REFERENCES exam_terms(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_overrides_student
         ON attendance_overrides(student_id)",
        [],
    )?;

    seed_default_grading_scale(&conn)?;

    Ok(conn)
}

/// Conventional scale installed into fresh workspaces. Callers replace it
/// wholesale through `grading.replace`; the catch-all F row keeps the scale
/// covering 0-100 from the start.
fn seed_default_grading_scale(conn: &Connection) -> anyhow::Result<()> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM grading_rules", [], |r| r.get(0))?;
    if count > 0 {
        return Ok(());
    }
    let defaults: [(&str, f64); 7] = [
        ("A+", 90.0),
        ("A", 80.0),
        ("B+", 70.0),
        ("B", 60.0),
        ("C", 50.0),
        ("D", 40.0),
        ("F", 0.0),
    ];
    for (i, (label, min_percentage)) in defaults.iter().enumerate() {
        conn.execute(
            "INSERT INTO grading_rules(id, label, min_percentage, sort_order)
             VALUES(?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                label,
                min_percentage,
                i as i64,
            ),
        )?;
    }
    Ok(())
}

fn ensure_students_roll_no(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "roll_no")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN roll_no TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
