use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("tuition.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tuitions(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            teaching_days TEXT NOT NULL,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            tuition_id TEXT NOT NULL,
            name TEXT NOT NULL,
            monthly_fee REAL NOT NULL DEFAULT 0,
            active INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(tuition_id) REFERENCES tuitions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_tuition ON students(tuition_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_tuition_sort ON students(tuition_id, sort_order)",
        [],
    )?;

    // Older workspaces predate per-student update stamps. Add if needed.
    ensure_students_updated_at(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            tuition_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            is_present INTEGER NOT NULL,
            PRIMARY KEY(tuition_id, student_id, date),
            FOREIGN KEY(tuition_id) REFERENCES tuitions(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_tuition_date ON attendance_records(tuition_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance_records(student_id)",
        [],
    )?;

    // One log per tuition per date. The composite UNIQUE makes the
    // reconciliation upsert atomic instead of look-up-then-write.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_logs(
            id TEXT PRIMARY KEY,
            tuition_id TEXT NOT NULL,
            date TEXT NOT NULL,
            was_conducted INTEGER NOT NULL,
            topic_covered TEXT,
            notes TEXT,
            updated_at TEXT,
            UNIQUE(tuition_id, date),
            FOREIGN KEY(tuition_id) REFERENCES tuitions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_logs_tuition ON class_logs(tuition_id)",
        [],
    )?;
    ensure_class_logs_updated_at(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_payments(
            id TEXT PRIMARY KEY,
            tuition_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            month TEXT NOT NULL,
            amount REAL NOT NULL,
            paid_on TEXT,
            UNIQUE(student_id, month),
            FOREIGN KEY(tuition_id) REFERENCES tuitions(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_payments_tuition_month ON fee_payments(tuition_id, month)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_payments_student ON fee_payments(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, &text),
    )?;
    Ok(())
}

fn ensure_students_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn ensure_class_logs_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "class_logs", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE class_logs ADD COLUMN updated_at TEXT", [])?;
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
