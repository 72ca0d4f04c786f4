use rusqlite::types::Value;
use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "lancenotas.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            professor_id TEXT NOT NULL,
            name TEXT NOT NULL,
            grade_level TEXT,
            section_letter TEXT,
            subject TEXT,
            period TEXT,
            academic_year INTEGER NOT NULL,
            current_trimester INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_professor_year ON classes(professor_id, academic_year)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            registration TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS roster_entries(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            student_id TEXT,
            full_name TEXT NOT NULL,
            call_number INTEGER,
            registration TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_roster_entries_class ON roster_entries(class_id, status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_roster_entries_student ON roster_entries(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignments(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            trimester INTEGER NOT NULL DEFAULT 1,
            weight REAL NOT NULL DEFAULT 1,
            max_score REAL NOT NULL DEFAULT 10,
            planned_lessons INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_class_trimester ON assignments(class_id, trimester)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lesson_slots(
            id TEXT PRIMARY KEY,
            assignment_id TEXT NOT NULL,
            number INTEGER NOT NULL,
            date TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(assignment_id) REFERENCES assignments(id),
            UNIQUE(assignment_id, number)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lesson_slots_assignment ON lesson_slots(assignment_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_entries(
            id TEXT PRIMARY KEY,
            slot_id TEXT NOT NULL,
            roster_entry_id TEXT NOT NULL,
            score REAL,
            note TEXT,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(slot_id) REFERENCES lesson_slots(id),
            FOREIGN KEY(roster_entry_id) REFERENCES roster_entries(id),
            UNIQUE(slot_id, roster_entry_id)
        )",
        [],
    )?;
    ensure_grade_entries_exempt(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_entries_slot ON grade_entries(slot_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_entries_roster ON grade_entries(roster_entry_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS trimester_closures(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            academic_year INTEGER NOT NULL,
            trimester INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'open',
            closed_at TEXT,
            closed_by TEXT,
            reopened_at TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(class_id, academic_year, trimester)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS trimester_snapshots(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            academic_year INTEGER NOT NULL,
            trimester INTEGER NOT NULL,
            final_average REAL,
            point_total REAL,
            evaluated_count INTEGER NOT NULL DEFAULT 0,
            expected_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(class_id, student_id, academic_year, trimester)
        )",
        [],
    )?;
    // Snapshot provenance arrived after the first closing release.
    ensure_snapshots_lock_columns(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_trimester_snapshots_student ON trimester_snapshots(student_id, academic_year, trimester)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_trimester_snapshots_origin ON trimester_snapshots(origin_class_id)",
        [],
    )?;

    Ok(conn)
}

/// `?,?,?` for an `IN (...)` clause with `n` bound values.
pub fn in_placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(",")
}

pub fn text_values<'a, I>(ids: I) -> Vec<Value>
where
    I: IntoIterator<Item = &'a String>,
{
    ids.into_iter().map(|id| Value::Text(id.clone())).collect()
}

fn ensure_grade_entries_exempt(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "grade_entries", "exempt")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE grade_entries ADD COLUMN exempt INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn ensure_snapshots_lock_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "trimester_snapshots", "origin_class_id")? {
        conn.execute(
            "ALTER TABLE trimester_snapshots ADD COLUMN origin_class_id TEXT REFERENCES classes(id)",
            [],
        )?;
    }
    if !table_has_column(conn, "trimester_snapshots", "locked")? {
        conn.execute(
            "ALTER TABLE trimester_snapshots ADD COLUMN locked INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn open_db_is_idempotent_and_adds_upgrade_columns() {
        let dir = std::env::temp_dir().join(format!(
            "lancenotas-db-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        let conn = open_db(&dir).expect("first open");
        drop(conn);
        let conn = open_db(&dir).expect("second open");

        assert!(table_has_column(&conn, "grade_entries", "exempt").expect("pragma"));
        assert!(table_has_column(&conn, "trimester_snapshots", "locked").expect("pragma"));
        assert!(table_has_column(&conn, "trimester_snapshots", "origin_class_id").expect("pragma"));
    }
}
