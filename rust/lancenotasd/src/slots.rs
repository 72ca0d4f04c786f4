//! Lesson slots: lazy materialization and the "has this lesson started" rule.

use crate::context::parse_iso_date;
use crate::db::{in_placeholders, text_values};
use crate::error::{CoreError, CoreResult, StorageContext};
use chrono::NaiveDate;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonSlot {
    pub id: String,
    pub assignment_id: String,
    pub number: i64,
    pub date: Option<NaiveDate>,
}

/// A slot counts once its date has arrived or as soon as anything was recorded
/// against it, whichever comes first. Undated, untouched slots do not count.
pub fn is_started(date: Option<NaiveDate>, has_entries: bool, today: NaiveDate) -> bool {
    has_entries || date.map(|d| d <= today).unwrap_or(false)
}

fn slot_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<LessonSlot> {
    let date: Option<String> = r.get(3)?;
    Ok(LessonSlot {
        id: r.get(0)?,
        assignment_id: r.get(1)?,
        number: r.get(2)?,
        date: date.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
    })
}

pub fn load_slots(conn: &Connection, assignment_ids: &[String]) -> CoreResult<Vec<LessonSlot>> {
    if assignment_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT id, assignment_id, number, date
         FROM lesson_slots
         WHERE assignment_id IN ({})
         ORDER BY assignment_id, number",
        in_placeholders(assignment_ids.len())
    );
    let mut stmt = conn.prepare(&sql).storage("db_query_failed")?;
    stmt.query_map(params_from_iter(text_values(assignment_ids)), slot_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .storage("db_query_failed")
}

/// Subset of `slots` that is started as of `today`.
pub fn started_slot_ids(
    conn: &Connection,
    slots: &[LessonSlot],
    today: NaiveDate,
) -> CoreResult<HashSet<String>> {
    if slots.is_empty() {
        return Ok(HashSet::new());
    }
    let ids: Vec<String> = slots.iter().map(|s| s.id.clone()).collect();
    let sql = format!(
        "SELECT DISTINCT slot_id FROM grade_entries WHERE slot_id IN ({})",
        in_placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql).storage("db_query_failed")?;
    let with_entries: HashSet<String> = stmt
        .query_map(params_from_iter(text_values(&ids)), |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<HashSet<_>, _>>())
        .storage("db_query_failed")?;

    Ok(slots
        .iter()
        .filter(|s| is_started(s.date, with_entries.contains(&s.id), today))
        .map(|s| s.id.clone())
        .collect())
}

/// Creates any missing slot numbers up to `planned` (undated) and returns every
/// slot of the assignment ordered by number. Never removes slots.
pub fn ensure_lesson_slots(
    conn: &Connection,
    assignment_id: &str,
    planned: i64,
) -> CoreResult<Vec<LessonSlot>> {
    let target = planned.max(1);
    let existing = load_slots(conn, &[assignment_id.to_string()])?;
    if existing.len() as i64 >= target {
        return Ok(existing);
    }
    let present: HashSet<i64> = existing.iter().map(|s| s.number).collect();
    let now = chrono::Utc::now().to_rfc3339();
    for n in 1..=target {
        if present.contains(&n) {
            continue;
        }
        conn.execute(
            "INSERT INTO lesson_slots(id, assignment_id, number, date, created_at)
             VALUES(?, ?, ?, NULL, ?)
             ON CONFLICT(assignment_id, number) DO NOTHING",
            (Uuid::new_v4().to_string(), assignment_id, n, &now),
        )
        .storage("db_insert_failed")?;
    }
    load_slots(conn, &[assignment_id.to_string()])
}

/// Grows or shrinks the slot list to `planned`. Shrinking fails with `slots_in_use`
/// when any removed slot already has entries.
pub fn resize_lesson_slots(conn: &Connection, assignment_id: &str, planned: i64) -> CoreResult<()> {
    let planned = planned.max(1);
    let existing = load_slots(conn, &[assignment_id.to_string()])?;
    let to_remove: Vec<String> = existing
        .iter()
        .filter(|s| s.number > planned)
        .map(|s| s.id.clone())
        .collect();

    if !to_remove.is_empty() {
        let sql = format!(
            "SELECT COUNT(*) FROM grade_entries WHERE slot_id IN ({})",
            in_placeholders(to_remove.len())
        );
        let used: i64 = conn
            .query_row(&sql, params_from_iter(text_values(&to_remove)), |r| r.get(0))
            .storage("db_query_failed")?;
        if used > 0 {
            return Err(CoreError::precondition(
                "slots_in_use",
                "cannot reduce the number of lessons: the trailing lessons already have entries",
            ));
        }
        let sql = format!(
            "DELETE FROM lesson_slots WHERE id IN ({})",
            in_placeholders(to_remove.len())
        );
        conn.execute(&sql, params_from_iter(text_values(&to_remove)))
            .storage("db_delete_failed")?;
    }

    ensure_lesson_slots(conn, assignment_id, planned)?;
    Ok(())
}

/// Parses the optional per-lesson date list sent by planning forms.
/// `null`/empty strings clear a date; anything else must be `YYYY-MM-DD`.
pub fn parse_lesson_dates(raw: Option<&serde_json::Value>) -> CoreResult<Option<Vec<Option<NaiveDate>>>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(None);
    }
    let Some(items) = raw.as_array() else {
        return Err(CoreError::validation("lessonDates must be an array"));
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if item.is_null() {
            out.push(None);
            continue;
        }
        let Some(s) = item.as_str() else {
            return Err(CoreError::validation("lessonDates entries must be strings or null"));
        };
        if s.trim().is_empty() {
            out.push(None);
        } else {
            out.push(Some(parse_iso_date(s)?));
        }
    }
    Ok(Some(out))
}

/// Applies `dates[i]` to lesson number `i + 1`; extra dates are ignored.
pub fn apply_lesson_dates(
    conn: &Connection,
    assignment_id: &str,
    dates: &[Option<NaiveDate>],
) -> CoreResult<()> {
    for (i, d) in dates.iter().enumerate() {
        let number = i as i64 + 1;
        conn.execute(
            "UPDATE lesson_slots SET date = ? WHERE assignment_id = ? AND number = ?",
            (d.map(|d| d.format("%Y-%m-%d").to_string()), assignment_id, number),
        )
        .storage("db_update_failed")?;
    }
    Ok(())
}
