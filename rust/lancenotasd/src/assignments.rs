//! Assignment planning: create, configure and list assignments and their lessons.

use crate::calc::{self, AssignmentDef};
use crate::config::MAX_TRIMESTER;
use crate::context::ClassRecord;
use crate::error::{CoreError, CoreResult, StorageContext};
use crate::slots::{self, LessonSlot};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentInput {
    pub title: String,
    pub description: Option<String>,
    pub trimester: i64,
    pub weight: f64,
    pub planned_lessons: i64,
    pub lesson_dates: Option<Vec<Option<NaiveDate>>>,
}

impl AssignmentInput {
    /// Missing fields fall back to `current` (configure) or to the defaults (create).
    pub fn from_params(
        params: &serde_json::Value,
        current: Option<&AssignmentDef>,
    ) -> CoreResult<Self> {
        let title = params
            .get("title")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .or_else(|| current.map(|c| c.title.clone()))
            .unwrap_or_default();
        if title.is_empty() {
            return Err(CoreError::validation("title must not be empty"));
        }

        let description = match params.get("description") {
            Some(v) => v
                .as_str()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            None => current.and_then(|c| c.description.clone()),
        };

        let trimester = match params.get("trimester").and_then(|v| v.as_i64()) {
            Some(t) if (1..=MAX_TRIMESTER).contains(&t) => t,
            Some(t) => {
                return Err(CoreError::validation(format!(
                    "trimester must be between 1 and {} (got {})",
                    MAX_TRIMESTER, t
                )))
            }
            None => current.map(|c| c.trimester).unwrap_or(1),
        };

        let weight = match params.get("weight").and_then(|v| v.as_f64()) {
            Some(w) if w > 0.0 && w.is_finite() => w,
            Some(w) => {
                return Err(CoreError::validation(format!(
                    "weight must be positive (got {})",
                    w
                )))
            }
            None => current.map(|c| c.weight).unwrap_or(1.0),
        };

        let planned_lessons = match params.get("plannedLessons").and_then(|v| v.as_i64()) {
            Some(n) if n >= 1 => n,
            Some(n) => {
                return Err(CoreError::validation(format!(
                    "plannedLessons must be at least 1 (got {})",
                    n
                )))
            }
            None => current.map(|c| c.planned_lessons).unwrap_or(1),
        };

        Ok(Self {
            title,
            description,
            trimester,
            weight,
            planned_lessons,
            lesson_dates: slots::parse_lesson_dates(params.get("lessonDates"))?,
        })
    }
}

/// Runs inside the caller's transaction.
pub fn create_assignment(
    conn: &Connection,
    class: &ClassRecord,
    input: &AssignmentInput,
) -> CoreResult<AssignmentDef> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO assignments(id, class_id, title, description, trimester, weight, max_score, planned_lessons, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, 10, ?, 'active', ?)",
        (
            &id,
            &class.id,
            &input.title,
            &input.description,
            input.trimester,
            input.weight,
            input.planned_lessons,
            chrono::Utc::now().to_rfc3339(),
        ),
    )
    .storage("db_insert_failed")?;
    slots::ensure_lesson_slots(conn, &id, input.planned_lessons)?;
    if let Some(dates) = &input.lesson_dates {
        slots::apply_lesson_dates(conn, &id, dates)?;
    }
    calc::load_assignment(conn, &class.id, &id)
}

/// Updates an assignment and resizes its lessons. Shrinking fails with
/// `slots_in_use` when a removed lesson has entries. Runs inside the caller's
/// transaction.
pub fn configure_assignment(
    conn: &Connection,
    class: &ClassRecord,
    assignment_id: &str,
    input: &AssignmentInput,
) -> CoreResult<AssignmentDef> {
    let current = calc::load_assignment(conn, &class.id, assignment_id)?;
    slots::resize_lesson_slots(conn, &current.id, input.planned_lessons)?;
    conn.execute(
        "UPDATE assignments
         SET title = ?, description = ?, trimester = ?, weight = ?, planned_lessons = ?
         WHERE id = ?",
        (
            &input.title,
            &input.description,
            input.trimester,
            input.weight,
            input.planned_lessons,
            &current.id,
        ),
    )
    .storage("db_update_failed")?;
    if let Some(dates) = &input.lesson_dates {
        slots::apply_lesson_dates(conn, &current.id, dates)?;
    }
    calc::load_assignment(conn, &class.id, &current.id)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentSummary {
    #[serde(flatten)]
    pub assignment: AssignmentDef,
    pub lesson_count: usize,
    pub started_lessons: usize,
}

pub fn list_assignments(
    conn: &Connection,
    class: &ClassRecord,
    trimester: Option<i64>,
    today: NaiveDate,
) -> CoreResult<Vec<AssignmentSummary>> {
    let book = calc::ClassGradebook::load(conn, &class.id, trimester, today)?;
    Ok(book
        .assignments
        .iter()
        .map(|a| AssignmentSummary {
            assignment: a.clone(),
            lesson_count: book.slots.iter().filter(|s| s.assignment_id == a.id).count(),
            started_lessons: book.started_slots(&a.id).count(),
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonView {
    #[serde(flatten)]
    pub slot: LessonSlot,
    pub started: bool,
}

/// Lessons of one assignment (materialized on demand) with their started flag.
pub fn assignment_lessons(
    conn: &Connection,
    class: &ClassRecord,
    assignment_id: &str,
    today: NaiveDate,
) -> CoreResult<(AssignmentDef, Vec<LessonView>)> {
    let assignment = calc::load_assignment(conn, &class.id, assignment_id)?;
    let lessons = slots::ensure_lesson_slots(conn, &assignment.id, assignment.planned_lessons)?;
    let started = slots::started_slot_ids(conn, &lessons, today)?;
    let views = lessons
        .into_iter()
        .map(|s| LessonView {
            started: started.contains(&s.id),
            slot: s,
        })
        .collect();
    Ok((assignment, views))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_defaults() {
        let input = AssignmentInput::from_params(&json!({ "title": " Prova 1 " }), None)
            .expect("input");
        assert_eq!(input.title, "Prova 1");
        assert_eq!(input.trimester, 1);
        assert_eq!(input.weight, 1.0);
        assert_eq!(input.planned_lessons, 1);
        assert_eq!(input.lesson_dates, None);
    }

    #[test]
    fn rejects_out_of_range_fields() {
        for params in [
            json!({ "title": "" }),
            json!({ "title": "P", "trimester": 4 }),
            json!({ "title": "P", "weight": 0 }),
            json!({ "title": "P", "plannedLessons": 0 }),
            json!({ "title": "P", "lessonDates": ["2026-13-01"] }),
        ] {
            let e = AssignmentInput::from_params(&params, None).expect_err("invalid");
            assert_eq!(e.code(), "bad_params");
        }
    }
}
