//! Per-lesson grade entry.

use crate::calc;
use crate::config::MAX_SCORE;
use crate::context::ClassRecord;
use crate::error::{CoreError, CoreResult, StorageContext};
use crate::slots::{self, LessonSlot};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// What the professor typed in the score cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreInput {
    Blank,
    Exempt,
    Score(f64),
}

/// Accepts a number, a numeric string with `.` or `,` decimals, `"A"` for an
/// exemption, or blank/null. Scores must lie in `0..=10`.
pub fn parse_score(raw: Option<&serde_json::Value>) -> CoreResult<ScoreInput> {
    let value = match raw {
        None => return Ok(ScoreInput::Blank),
        Some(v) if v.is_null() => return Ok(ScoreInput::Blank),
        Some(v) => v,
    };
    let score = if let Some(n) = value.as_f64() {
        n
    } else if let Some(s) = value.as_str() {
        let s = s.trim();
        if s.is_empty() {
            return Ok(ScoreInput::Blank);
        }
        if s.eq_ignore_ascii_case("a") {
            return Ok(ScoreInput::Exempt);
        }
        s.replace(',', ".")
            .parse::<f64>()
            .map_err(|_| CoreError::validation(format!("invalid score '{}': use 0-10 or 'A'", s)))?
    } else {
        return Err(CoreError::validation("score must be a number, a string or null"));
    };
    if !score.is_finite() || !(0.0..=MAX_SCORE).contains(&score) {
        return Err(CoreError::validation(format!(
            "score {} is outside 0-{}",
            score, MAX_SCORE
        )));
    }
    Ok(ScoreInput::Score(score))
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryInput {
    pub roster_entry_id: String,
    pub score: ScoreInput,
    pub exempt: bool,
    pub note: Option<String>,
}

pub fn parse_entries(params: &serde_json::Value) -> CoreResult<Vec<EntryInput>> {
    let Some(items) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(CoreError::validation("missing entries array"));
    };
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let Some(roster_entry_id) = item.get("rosterEntryId").and_then(|v| v.as_str()) else {
            return Err(CoreError::validation(format!("entries[{}].rosterEntryId is required", i)));
        };
        out.push(EntryInput {
            roster_entry_id: roster_entry_id.to_string(),
            score: parse_score(item.get("score"))?,
            exempt: item.get("exempt").and_then(|v| v.as_bool()).unwrap_or(false),
            note: item
                .get("note")
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        });
    }
    Ok(out)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonEntryRow {
    pub roster_entry_id: String,
    pub full_name: String,
    pub call_number: Option<i64>,
    pub score: Option<f64>,
    pub exempt: bool,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonSheet {
    pub assignment_id: String,
    pub lesson: LessonSlot,
    pub rows: Vec<LessonEntryRow>,
}

fn lesson_slot(
    conn: &Connection,
    class: &ClassRecord,
    assignment_id: &str,
    lesson: i64,
) -> CoreResult<LessonSlot> {
    let assignment = calc::load_assignment(conn, &class.id, assignment_id)?;
    slots::ensure_lesson_slots(conn, &assignment.id, assignment.planned_lessons)?
        .into_iter()
        .find(|s| s.number == lesson)
        .ok_or(CoreError::NotFound {
            what: "lesson",
            redirect: "assignments.slots",
        })
}

/// The active roster with whatever was recorded for one lesson.
pub fn lesson_sheet(
    conn: &Connection,
    class: &ClassRecord,
    assignment_id: &str,
    lesson: i64,
) -> CoreResult<LessonSheet> {
    let slot = lesson_slot(conn, class, assignment_id, lesson)?;
    let mut stmt = conn
        .prepare("SELECT roster_entry_id, score, exempt, note FROM grade_entries WHERE slot_id = ?")
        .storage("db_query_failed")?;
    let recorded: HashMap<String, (Option<f64>, bool, Option<String>)> = stmt
        .query_map([&slot.id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                (r.get(1)?, r.get::<_, i64>(2)? != 0, r.get(3)?),
            ))
        })
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        .storage("db_query_failed")?;

    let rows = calc::load_active_roster(conn, &class.id)?
        .into_iter()
        .map(|s| {
            let (score, exempt, note) = recorded
                .get(&s.roster_entry_id)
                .cloned()
                .unwrap_or((None, false, None));
            LessonEntryRow {
                roster_entry_id: s.roster_entry_id,
                full_name: s.full_name,
                call_number: s.call_number,
                score,
                exempt,
                note,
            }
        })
        .collect();

    Ok(LessonSheet {
        assignment_id: assignment_id.to_string(),
        lesson: slot,
        rows,
    })
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOutcome {
    pub saved: usize,
    pub cleared: usize,
}

/// Saves one lesson for a batch of students. An exemption drops the score; an
/// entry with nothing left in it is deleted. Runs inside the caller's transaction.
pub fn save_lesson(
    conn: &Connection,
    class: &ClassRecord,
    assignment_id: &str,
    lesson: i64,
    entries: &[EntryInput],
) -> CoreResult<SaveOutcome> {
    let slot = lesson_slot(conn, class, assignment_id, lesson)?;
    let active: HashSet<String> = calc::load_active_roster(conn, &class.id)?
        .into_iter()
        .map(|s| s.roster_entry_id)
        .collect();

    let now = chrono::Utc::now().to_rfc3339();
    let mut out = SaveOutcome::default();
    for e in entries {
        if !active.contains(&e.roster_entry_id) {
            return Err(CoreError::validation(format!(
                "roster entry {} is not active in this class",
                e.roster_entry_id
            )));
        }
        let exempt = e.exempt || e.score == ScoreInput::Exempt;
        let score = match e.score {
            ScoreInput::Score(v) if !exempt => Some(v),
            _ => None,
        };

        if !exempt && score.is_none() && e.note.is_none() {
            let removed = conn
                .execute(
                    "DELETE FROM grade_entries WHERE slot_id = ? AND roster_entry_id = ?",
                    (&slot.id, &e.roster_entry_id),
                )
                .storage("db_delete_failed")?;
            out.cleared += removed;
            continue;
        }

        conn.execute(
            "INSERT INTO grade_entries(id, slot_id, roster_entry_id, score, exempt, note, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(slot_id, roster_entry_id) DO UPDATE SET
               score = excluded.score,
               exempt = excluded.exempt,
               note = excluded.note,
               updated_at = excluded.updated_at",
            (
                Uuid::new_v4().to_string(),
                &slot.id,
                &e.roster_entry_id,
                score,
                exempt as i64,
                &e.note,
                &now,
            ),
        )
        .storage("db_upsert_failed")?;
        out.saved += 1;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_score_accepts_the_cell_formats() {
        assert_eq!(parse_score(None).expect("blank"), ScoreInput::Blank);
        assert_eq!(parse_score(Some(&json!(null))).expect("null"), ScoreInput::Blank);
        assert_eq!(parse_score(Some(&json!("  "))).expect("empty"), ScoreInput::Blank);
        assert_eq!(parse_score(Some(&json!("a"))).expect("exempt"), ScoreInput::Exempt);
        assert_eq!(parse_score(Some(&json!("7,5"))).expect("comma"), ScoreInput::Score(7.5));
        assert_eq!(parse_score(Some(&json!(10))).expect("number"), ScoreInput::Score(10.0));
    }

    #[test]
    fn parse_score_rejects_out_of_range_and_garbage() {
        for raw in [json!(10.5), json!(-1), json!("dez"), json!(true)] {
            let e = parse_score(Some(&raw)).expect_err("invalid score");
            assert_eq!(e.code(), "bad_params");
        }
    }
}
