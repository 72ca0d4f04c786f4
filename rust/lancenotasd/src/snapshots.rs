//! Per-student trimester snapshots: the frozen results written by a close and
//! carried along by transfers.

use crate::db::{in_placeholders, text_values};
use crate::error::{CoreResult, StorageContext};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimesterSnapshot {
    pub id: String,
    pub class_id: String,
    pub student_id: String,
    pub academic_year: i64,
    pub trimester: i64,
    pub final_average: Option<f64>,
    pub point_total: Option<f64>,
    pub evaluated_count: i64,
    pub expected_count: i64,
    pub locked: bool,
    pub origin_class_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SnapshotValues {
    pub final_average: Option<f64>,
    pub point_total: Option<f64>,
    pub evaluated_count: i64,
    pub expected_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StudentTrimesterKey {
    pub student_id: String,
    pub trimester: i64,
}

const SNAPSHOT_COLUMNS: &str = "id, class_id, student_id, academic_year, trimester, final_average, point_total, evaluated_count, expected_count, locked, origin_class_id, created_at";

fn snapshot_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<TrimesterSnapshot> {
    Ok(TrimesterSnapshot {
        id: r.get(0)?,
        class_id: r.get(1)?,
        student_id: r.get(2)?,
        academic_year: r.get(3)?,
        trimester: r.get(4)?,
        final_average: r.get(5)?,
        point_total: r.get(6)?,
        evaluated_count: r.get(7)?,
        expected_count: r.get(8)?,
        locked: r.get::<_, i64>(9)? != 0,
        origin_class_id: r.get(10)?,
        created_at: r.get(11)?,
    })
}

/// Every snapshot of `student_ids` in `academic_year`, from any class, oldest first.
pub fn load_for_students(
    conn: &Connection,
    academic_year: i64,
    student_ids: &[String],
    trimester: Option<i64>,
) -> CoreResult<Vec<TrimesterSnapshot>> {
    if student_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut sql = format!(
        "SELECT {} FROM trimester_snapshots
         WHERE academic_year = ? AND student_id IN ({})",
        SNAPSHOT_COLUMNS,
        in_placeholders(student_ids.len())
    );
    let mut bind_values: Vec<Value> = Vec::with_capacity(student_ids.len() + 2);
    bind_values.push(Value::Integer(academic_year));
    bind_values.extend(text_values(student_ids));
    if let Some(t) = trimester {
        sql.push_str(" AND trimester = ?");
        bind_values.push(Value::Integer(t));
    }
    sql.push_str(" ORDER BY created_at, rowid");

    let mut stmt = conn.prepare(&sql).storage("db_query_failed")?;
    stmt.query_map(params_from_iter(bind_values), snapshot_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .storage("db_query_failed")
}

pub fn find(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
    academic_year: i64,
    trimester: i64,
) -> CoreResult<Option<TrimesterSnapshot>> {
    let sql = format!(
        "SELECT {} FROM trimester_snapshots
         WHERE class_id = ? AND student_id = ? AND academic_year = ? AND trimester = ?",
        SNAPSHOT_COLUMNS
    );
    conn.query_row(
        &sql,
        (class_id, student_id, academic_year, trimester),
        snapshot_from_row,
    )
    .optional()
    .storage("db_query_failed")
}

pub fn list_for_class_student(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
    academic_year: i64,
    max_trimester: i64,
) -> CoreResult<Vec<TrimesterSnapshot>> {
    let sql = format!(
        "SELECT {} FROM trimester_snapshots
         WHERE class_id = ? AND student_id = ? AND academic_year = ? AND trimester <= ?
         ORDER BY trimester",
        SNAPSHOT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).storage("db_query_failed")?;
    stmt.query_map(
        (class_id, student_id, academic_year, max_trimester),
        snapshot_from_row,
    )
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .storage("db_query_failed")
}

/// One snapshot per (student, trimester): the class's own one if present,
/// otherwise the most recent one held by any other class.
pub fn preferred_for_class(
    rows: Vec<TrimesterSnapshot>,
    class_id: &str,
) -> HashMap<StudentTrimesterKey, TrimesterSnapshot> {
    let mut best: HashMap<StudentTrimesterKey, TrimesterSnapshot> = HashMap::new();
    // `rows` is oldest first, so a later foreign row replaces an earlier foreign one.
    for r in rows {
        let key = StudentTrimesterKey {
            student_id: r.student_id.clone(),
            trimester: r.trimester,
        };
        match best.get(&key) {
            Some(current) if current.class_id == class_id && r.class_id != class_id => {}
            _ => {
                best.insert(key, r);
            }
        }
    }
    best
}

/// Latest snapshot per student held by a class other than `class_id`.
pub fn latest_foreign_by_student(
    rows: Vec<TrimesterSnapshot>,
    class_id: &str,
) -> HashMap<String, TrimesterSnapshot> {
    let mut best: HashMap<String, TrimesterSnapshot> = HashMap::new();
    for r in rows.into_iter().filter(|r| r.class_id != class_id) {
        best.insert(r.student_id.clone(), r);
    }
    best
}

/// Writes a freshly computed, unlocked snapshot. Returns false when the existing
/// row is locked and was left untouched.
pub fn upsert_computed(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
    academic_year: i64,
    trimester: i64,
    values: SnapshotValues,
) -> CoreResult<bool> {
    let changed = conn
        .execute(
            "INSERT INTO trimester_snapshots(
               id, class_id, student_id, academic_year, trimester,
               final_average, point_total, evaluated_count, expected_count,
               locked, origin_class_id, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 0, NULL, ?)
             ON CONFLICT(class_id, student_id, academic_year, trimester) DO UPDATE SET
               final_average = excluded.final_average,
               point_total = excluded.point_total,
               evaluated_count = excluded.evaluated_count,
               expected_count = excluded.expected_count,
               locked = 0,
               origin_class_id = NULL
             WHERE trimester_snapshots.locked = 0",
            (
                Uuid::new_v4().to_string(),
                class_id,
                student_id,
                academic_year,
                trimester,
                values.final_average,
                values.point_total,
                values.evaluated_count,
                values.expected_count,
                chrono::Utc::now().to_rfc3339(),
            ),
        )
        .storage("db_insert_failed")?;
    Ok(changed > 0)
}

/// Copies `source` into `class_id` as a locked snapshot originating from
/// `origin_class_id`. An unlocked destination row is overwritten; a locked one is
/// kept. Returns whether a row was written.
pub fn upsert_locked_copy(
    conn: &Connection,
    class_id: &str,
    source: &TrimesterSnapshot,
    origin_class_id: &str,
) -> CoreResult<bool> {
    write_locked_copy(conn, class_id, source, origin_class_id, true)
}

/// Like [`upsert_locked_copy`] but never touches an existing destination row.
pub fn insert_locked_copy_if_absent(
    conn: &Connection,
    class_id: &str,
    source: &TrimesterSnapshot,
    origin_class_id: &str,
) -> CoreResult<bool> {
    write_locked_copy(conn, class_id, source, origin_class_id, false)
}

fn write_locked_copy(
    conn: &Connection,
    class_id: &str,
    source: &TrimesterSnapshot,
    origin_class_id: &str,
    overwrite_unlocked: bool,
) -> CoreResult<bool> {
    let conflict = if overwrite_unlocked {
        "DO UPDATE SET
           final_average = excluded.final_average,
           point_total = excluded.point_total,
           evaluated_count = excluded.evaluated_count,
           expected_count = excluded.expected_count,
           locked = 1,
           origin_class_id = excluded.origin_class_id
         WHERE trimester_snapshots.locked = 0"
    } else {
        "DO NOTHING"
    };
    let sql = format!(
        "INSERT INTO trimester_snapshots(
           id, class_id, student_id, academic_year, trimester,
           final_average, point_total, evaluated_count, expected_count,
           locked, origin_class_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
         ON CONFLICT(class_id, student_id, academic_year, trimester) {}",
        conflict
    );
    let changed = conn
        .execute(
            &sql,
            (
                Uuid::new_v4().to_string(),
                class_id,
                &source.student_id,
                source.academic_year,
                source.trimester,
                source.final_average,
                source.point_total,
                source.evaluated_count,
                source.expected_count,
                origin_class_id,
                chrono::Utc::now().to_rfc3339(),
            ),
        )
        .storage("db_insert_failed")?;
    Ok(changed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(class_id: &str, student: &str, trimester: i64, avg: f64, created: &str) -> TrimesterSnapshot {
        TrimesterSnapshot {
            id: format!("{class_id}-{student}-{trimester}"),
            class_id: class_id.to_string(),
            student_id: student.to_string(),
            academic_year: 2026,
            trimester,
            final_average: Some(avg),
            point_total: None,
            evaluated_count: 0,
            expected_count: 0,
            locked: false,
            origin_class_id: None,
            created_at: created.to_string(),
        }
    }

    #[test]
    fn own_class_snapshot_wins_over_newer_foreign_one() {
        let rows = vec![
            snap("own", "s1", 1, 7.0, "2026-04-01"),
            snap("other", "s1", 1, 9.0, "2026-05-01"),
            snap("a", "s2", 1, 5.0, "2026-04-01"),
            snap("b", "s2", 1, 6.0, "2026-05-01"),
        ];
        let best = preferred_for_class(rows, "own");
        let k1 = StudentTrimesterKey {
            student_id: "s1".into(),
            trimester: 1,
        };
        let k2 = StudentTrimesterKey {
            student_id: "s2".into(),
            trimester: 1,
        };
        assert_eq!(best[&k1].final_average, Some(7.0));
        assert_eq!(best[&k2].class_id, "b");
    }

    #[test]
    fn latest_foreign_skips_own_rows() {
        let rows = vec![
            snap("a", "s1", 2, 5.0, "2026-04-01"),
            snap("own", "s1", 2, 8.0, "2026-06-01"),
            snap("b", "s1", 2, 6.0, "2026-05-01"),
        ];
        let best = latest_foreign_by_student(rows, "own");
        assert_eq!(best["s1"].class_id, "b");
    }
}
