use crate::config::{clamp_trimester, MAX_TRIMESTER};
use crate::context::ClassRecord;
use crate::db::{in_placeholders, text_values};
use crate::error::{CoreError, CoreResult, StorageContext};
use crate::slots::{self, LessonSlot};
use crate::snapshots::{self, StudentTrimesterKey};
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// What was recorded for one student on one lesson.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryState {
    Scored(f64),
    /// Atestado: the lesson is excused and leaves the denominator.
    Exempt,
    /// Only an observation was written; counts like a missing grade.
    NoteOnly,
}

/// Two-decimal rounding used for every displayed or stored average.
pub fn round_2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Per (student, assignment) counters over the assignment's started lessons.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SlotTally {
    pub eligible: usize,
    pub exempt: usize,
    pub scored: usize,
    pub score_sum: f64,
}

impl SlotTally {
    /// Builds a tally from one item per started lesson (`None` = nothing recorded).
    pub fn from_states<I>(states: I) -> Self
    where
        I: IntoIterator<Item = Option<EntryState>>,
    {
        let mut t = SlotTally::default();
        for s in states {
            t.eligible += 1;
            match s {
                Some(EntryState::Exempt) => t.exempt += 1,
                Some(EntryState::Scored(v)) => {
                    t.scored += 1;
                    t.score_sum += v;
                }
                Some(EntryState::NoteOnly) | None => {}
            }
        }
        t
    }

    /// Lessons that count: started ones minus excused ones. Ungraded lessons stay in.
    pub fn denominator(&self) -> usize {
        self.eligible.saturating_sub(self.exempt)
    }

    /// Unrounded average, `None` when nothing counts.
    pub fn average(&self) -> Option<f64> {
        let denom = self.denominator();
        if denom == 0 {
            return None;
        }
        Some(self.score_sum / denom as f64)
    }
}

/// Σ(average × weight) / Σ(weight) over the parts that have an average.
/// Non-positive weights count as 1. Rounded; `None` when nothing contributes.
pub fn weighted_average<I>(parts: I) -> Option<f64>
where
    I: IntoIterator<Item = (Option<f64>, f64)>,
{
    let mut sum = 0.0_f64;
    let mut denom = 0.0_f64;
    for (avg, weight) in parts {
        let Some(avg) = avg else {
            continue;
        };
        let w = if weight > 0.0 { weight } else { 1.0 };
        sum += avg * w;
        denom += w;
    }
    if denom > 0.0 {
        Some(round_2(sum / denom))
    } else {
        None
    }
}

/// Mean of the trimesters that have a value; empty trimesters are skipped, not zeroed.
pub fn year_average<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let defined: Vec<f64> = values.into_iter().flatten().collect();
    if defined.is_empty() {
        return None;
    }
    Some(round_2(defined.iter().sum::<f64>() / defined.len() as f64))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotStudentKey {
    pub slot_id: String,
    pub roster_entry_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentDef {
    pub id: String,
    pub class_id: String,
    pub title: String,
    pub description: Option<String>,
    pub trimester: i64,
    pub weight: f64,
    pub max_score: f64,
    pub planned_lessons: i64,
    pub created_at: String,
}

pub const ASSIGNMENT_COLUMNS: &str =
    "id, class_id, title, description, trimester, weight, max_score, planned_lessons, created_at";

pub fn assignment_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<AssignmentDef> {
    Ok(AssignmentDef {
        id: r.get(0)?,
        class_id: r.get(1)?,
        title: r.get(2)?,
        description: r.get(3)?,
        trimester: clamp_trimester(r.get(4)?),
        weight: r.get(5)?,
        max_score: r.get(6)?,
        planned_lessons: r.get(7)?,
        created_at: r.get(8)?,
    })
}

pub fn load_assignments(
    conn: &Connection,
    class_id: &str,
    trimester: Option<i64>,
) -> CoreResult<Vec<AssignmentDef>> {
    let mut sql = format!(
        "SELECT {} FROM assignments WHERE class_id = ?",
        ASSIGNMENT_COLUMNS
    );
    let mut bind_values: Vec<Value> = vec![Value::Text(class_id.to_string())];
    if let Some(t) = trimester {
        sql.push_str(" AND trimester = ?");
        bind_values.push(Value::Integer(t));
    }
    sql.push_str(" ORDER BY created_at, rowid");

    let mut stmt = conn.prepare(&sql).storage("db_query_failed")?;
    stmt.query_map(params_from_iter(bind_values), assignment_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .storage("db_query_failed")
}

pub fn load_assignment(
    conn: &Connection,
    class_id: &str,
    assignment_id: &str,
) -> CoreResult<AssignmentDef> {
    let sql = format!(
        "SELECT {} FROM assignments WHERE id = ? AND class_id = ?",
        ASSIGNMENT_COLUMNS
    );
    conn.query_row(&sql, (assignment_id, class_id), assignment_from_row)
        .optional()
        .storage("db_query_failed")?
        .ok_or(CoreError::NotFound {
            what: "assignment",
            redirect: "assignments.list",
        })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterStudent {
    pub roster_entry_id: String,
    pub student_id: Option<String>,
    pub full_name: String,
    pub call_number: Option<i64>,
}

/// Active roster of a class in call order.
pub fn load_active_roster(conn: &Connection, class_id: &str) -> CoreResult<Vec<RosterStudent>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, student_id, full_name, call_number
             FROM roster_entries
             WHERE class_id = ? AND status = 'active'
             ORDER BY call_number IS NULL, call_number, full_name COLLATE NOCASE",
        )
        .storage("db_query_failed")?;
    stmt.query_map([class_id], |r| {
        Ok(RosterStudent {
            roster_entry_id: r.get(0)?,
            student_id: r.get(1)?,
            full_name: r.get(2)?,
            call_number: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .storage("db_query_failed")
}

/// Result of aggregating one trimester for one student.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimesterResult {
    pub average: Option<f64>,
    pub point_total: Option<f64>,
    pub evaluated: i64,
    pub expected: i64,
}

/// Assignments, lesson slots, eligibility and entries of one class, loaded once
/// per request and queried in memory.
#[derive(Debug, Clone)]
pub struct ClassGradebook {
    pub assignments: Vec<AssignmentDef>,
    pub slots: Vec<LessonSlot>,
    started: HashSet<String>,
    entries: HashMap<SlotStudentKey, EntryState>,
}

impl ClassGradebook {
    pub fn load(
        conn: &Connection,
        class_id: &str,
        trimester: Option<i64>,
        today: NaiveDate,
    ) -> CoreResult<Self> {
        let assignments = load_assignments(conn, class_id, trimester)?;
        Self::for_assignments(conn, assignments, today)
    }

    pub fn for_assignments(
        conn: &Connection,
        assignments: Vec<AssignmentDef>,
        today: NaiveDate,
    ) -> CoreResult<Self> {
        let assignment_ids: Vec<String> = assignments.iter().map(|a| a.id.clone()).collect();
        let slots = slots::load_slots(conn, &assignment_ids)?;
        let started = slots::started_slot_ids(conn, &slots, today)?;

        let mut entries: HashMap<SlotStudentKey, EntryState> = HashMap::new();
        let started_ids: Vec<String> = started.iter().cloned().collect();
        if !started_ids.is_empty() {
            let sql = format!(
                "SELECT slot_id, roster_entry_id, score, exempt
                 FROM grade_entries
                 WHERE slot_id IN ({})",
                in_placeholders(started_ids.len())
            );
            let mut stmt = conn.prepare(&sql).storage("db_query_failed")?;
            let rows = stmt
                .query_map(params_from_iter(text_values(&started_ids)), |r| {
                    let slot_id: String = r.get(0)?;
                    let roster_entry_id: String = r.get(1)?;
                    let score: Option<f64> = r.get(2)?;
                    let exempt: i64 = r.get(3)?;
                    Ok((slot_id, roster_entry_id, score, exempt != 0))
                })
                .storage("db_query_failed")?;
            for row in rows {
                let (slot_id, roster_entry_id, score, exempt) = row.storage("db_query_failed")?;
                let state = match (exempt, score) {
                    (true, _) => EntryState::Exempt,
                    (false, Some(v)) => EntryState::Scored(v),
                    (false, None) => EntryState::NoteOnly,
                };
                entries.insert(
                    SlotStudentKey {
                        slot_id,
                        roster_entry_id,
                    },
                    state,
                );
            }
        }

        Ok(Self {
            assignments,
            slots,
            started,
            entries,
        })
    }

    pub fn is_started(&self, slot_id: &str) -> bool {
        self.started.contains(slot_id)
    }

    /// Started slots of an assignment, in lesson order.
    pub fn started_slots<'a>(
        &'a self,
        assignment_id: &'a str,
    ) -> impl Iterator<Item = &'a LessonSlot> + 'a {
        self.slots
            .iter()
            .filter(move |s| s.assignment_id == assignment_id && self.started.contains(&s.id))
    }

    pub fn entry(&self, slot_id: &str, roster_entry_id: &str) -> Option<EntryState> {
        self.entries
            .get(&SlotStudentKey {
                slot_id: slot_id.to_string(),
                roster_entry_id: roster_entry_id.to_string(),
            })
            .copied()
    }

    pub fn tally(&self, assignment_id: &str, roster_entry_id: &str) -> SlotTally {
        SlotTally::from_states(
            self.started_slots(assignment_id)
                .map(|s| self.entry(&s.id, roster_entry_id)),
        )
    }

    /// Displayed per-assignment average (rounded).
    pub fn assignment_average(&self, assignment_id: &str, roster_entry_id: &str) -> Option<f64> {
        self.tally(assignment_id, roster_entry_id)
            .average()
            .map(round_2)
    }

    pub fn trimester_result(&self, trimester: i64, roster_entry_id: &str) -> TrimesterResult {
        let mut parts: Vec<(Option<f64>, f64)> = Vec::new();
        let mut expected = 0_i64;
        let mut evaluated = 0_i64;
        let mut points = 0.0_f64;
        for a in self.assignments.iter().filter(|a| a.trimester == trimester) {
            let t = self.tally(&a.id, roster_entry_id);
            evaluated += t.scored as i64;
            let Some(avg) = t.average() else {
                continue;
            };
            expected += t.denominator() as i64;
            points += t.score_sum;
            parts.push((Some(avg), a.weight));
        }
        TrimesterResult {
            average: weighted_average(parts),
            point_total: if expected > 0 {
                Some(round_2(points))
            } else {
                None
            },
            evaluated,
            expected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    Snapshot,
    Live,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimesterCell {
    pub trimester: i64,
    pub average: Option<f64>,
    pub source: ValueSource,
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_class_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentYearRow {
    pub roster_entry_id: String,
    pub student_id: Option<String>,
    pub full_name: String,
    pub call_number: Option<i64>,
    pub trimesters: Vec<TrimesterCell>,
    pub total: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassAveragesModel {
    pub class_id: String,
    pub class_name: String,
    pub academic_year: i64,
    pub students: Vec<StudentYearRow>,
}

/// Per-student trimester and yearly averages for a class. Snapshot values win
/// over live computation for every trimester that has one.
pub fn compute_class_averages(
    conn: &Connection,
    class: &ClassRecord,
    today: NaiveDate,
) -> CoreResult<ClassAveragesModel> {
    let roster = load_active_roster(conn, &class.id)?;
    let book = ClassGradebook::load(conn, &class.id, None, today)?;

    let student_ids: Vec<String> = roster.iter().filter_map(|s| s.student_id.clone()).collect();
    let snapshot_rows =
        snapshots::load_for_students(conn, class.academic_year, &student_ids, None)?;
    let preferred = snapshots::preferred_for_class(snapshot_rows, &class.id);

    let mut students = Vec::with_capacity(roster.len());
    for s in &roster {
        let mut cells = Vec::with_capacity(MAX_TRIMESTER as usize);
        for tri in 1..=MAX_TRIMESTER {
            let snap = s.student_id.as_ref().and_then(|sid| {
                preferred.get(&StudentTrimesterKey {
                    student_id: sid.clone(),
                    trimester: tri,
                })
            });
            // A snapshot without a stored average falls through to live data.
            if let Some(snap) = snap.filter(|sn| sn.final_average.is_some()) {
                cells.push(TrimesterCell {
                    trimester: tri,
                    average: snap.final_average.map(round_2),
                    source: ValueSource::Snapshot,
                    locked: snap.locked,
                    origin_class_id: snap.origin_class_id.clone(),
                });
                continue;
            }
            cells.push(TrimesterCell {
                trimester: tri,
                average: book.trimester_result(tri, &s.roster_entry_id).average,
                source: ValueSource::Live,
                locked: false,
                origin_class_id: None,
            });
        }
        let total = year_average(cells.iter().map(|c| c.average));
        students.push(StudentYearRow {
            roster_entry_id: s.roster_entry_id.clone(),
            student_id: s.student_id.clone(),
            full_name: s.full_name.clone(),
            call_number: s.call_number,
            trimesters: cells,
            total,
        });
    }

    Ok(ClassAveragesModel {
        class_id: class.id.clone(),
        class_name: class.name.clone(),
        academic_year: class.academic_year,
        students,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAssignmentAverage {
    pub roster_entry_id: String,
    pub full_name: String,
    pub call_number: Option<i64>,
    pub average: Option<f64>,
    pub counted_lessons: usize,
    pub exempt_lessons: usize,
    pub graded_lessons: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentAveragesModel {
    pub assignment: AssignmentDef,
    pub slots: Vec<SlotStatus>,
    pub started_lessons: usize,
    pub students: Vec<StudentAssignmentAverage>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotStatus {
    #[serde(flatten)]
    pub slot: LessonSlot,
    pub started: bool,
}

/// Per-student averages for one assignment. Materializes missing lesson slots.
pub fn compute_assignment_averages(
    conn: &Connection,
    class: &ClassRecord,
    assignment_id: &str,
    today: NaiveDate,
) -> CoreResult<AssignmentAveragesModel> {
    let assignment = load_assignment(conn, &class.id, assignment_id)?;
    slots::ensure_lesson_slots(conn, &assignment.id, assignment.planned_lessons)?;
    let roster = load_active_roster(conn, &class.id)?;
    let book = ClassGradebook::for_assignments(conn, vec![assignment.clone()], today)?;

    let students = roster
        .iter()
        .map(|s| {
            let t = book.tally(&assignment.id, &s.roster_entry_id);
            StudentAssignmentAverage {
                roster_entry_id: s.roster_entry_id.clone(),
                full_name: s.full_name.clone(),
                call_number: s.call_number,
                average: t.average().map(round_2),
                counted_lessons: t.denominator(),
                exempt_lessons: t.exempt,
                graded_lessons: t.scored,
            }
        })
        .collect();

    let slots: Vec<SlotStatus> = book
        .slots
        .iter()
        .map(|s| SlotStatus {
            slot: s.clone(),
            started: book.is_started(&s.id),
        })
        .collect();
    let started_lessons = slots.iter().filter(|s| s.started).count();

    Ok(AssignmentAveragesModel {
        assignment,
        slots,
        started_lessons,
        students,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exemption_leaves_the_denominator() {
        let t = SlotTally::from_states([Some(EntryState::Scored(8.0)), Some(EntryState::Exempt)]);
        assert_eq!(t.denominator(), 1);
        assert_eq!(t.average().map(round_2), Some(8.0));
    }

    #[test]
    fn ungraded_started_lessons_count_as_zero() {
        let t = SlotTally::from_states([None, None, None]);
        assert_eq!(t.denominator(), 3);
        assert_eq!(t.average(), Some(0.0));

        let t = SlotTally::from_states([Some(EntryState::Scored(9.0)), Some(EntryState::NoteOnly), None]);
        assert_eq!(t.average().map(round_2), Some(3.0));
    }

    #[test]
    fn all_exempt_or_nothing_started_is_undefined() {
        assert_eq!(SlotTally::from_states([Some(EntryState::Exempt)]).average(), None);
        assert_eq!(SlotTally::from_states(std::iter::empty()).average(), None);
    }

    #[test]
    fn average_matches_sum_over_counted_lessons() {
        for (scores, exempt) in [(vec![7.5, 8.25, 6.0], 0usize), (vec![10.0, 3.3], 2), (vec![1.0], 4)] {
            let mut states: Vec<Option<EntryState>> =
                scores.iter().copied().map(|v| Some(EntryState::Scored(v))).collect();
            states.extend(std::iter::repeat(Some(EntryState::Exempt)).take(exempt));
            let t = SlotTally::from_states(states);
            let expected = round_2(scores.iter().sum::<f64>() / scores.len() as f64);
            assert_eq!(t.average().map(round_2), Some(expected));
        }
    }

    #[test]
    fn weighted_average_skips_undefined_parts() {
        assert_eq!(weighted_average([(Some(8.0), 2.0), (None, 5.0), (Some(5.0), 1.0)]), Some(7.0));
        assert_eq!(weighted_average([(None, 1.0), (None, 2.0)]), None);
        assert_eq!(weighted_average([(Some(4.0), 0.0), (Some(6.0), 1.0)]), Some(5.0));
    }

    #[test]
    fn year_average_ignores_empty_trimesters() {
        assert_eq!(year_average([Some(6.0), None, Some(9.0)]), Some(7.5));
        assert_eq!(year_average([None, None, None]), None);
        assert_eq!(year_average([Some(0.0), None, None]), Some(0.0));
    }

    #[test]
    fn round_2_rounds_to_cents() {
        assert_eq!(round_2(7.666_666), 7.67);
        assert_eq!(round_2(3.0), 3.0);
        assert_eq!(round_2(0.004), 0.0);
    }
}
