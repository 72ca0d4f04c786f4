//! Trimester closing: completeness validation, snapshot build, close/reopen.
//!
//! Every function here expects to run inside the caller's transaction; nothing
//! commits on its own.

use crate::calc::{self, ClassGradebook, EntryState};
use crate::config::{CLOSE_ISSUE_LIMIT, MAX_TRIMESTER};
use crate::context::{ClassRecord, ViewingContext};
use crate::error::{CoreError, CoreResult, StorageContext};
use crate::slots;
use crate::snapshots::{self, SnapshotValues};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClosureStatus {
    Open,
    Closed,
}

impl ClosureStatus {
    fn as_str(self) -> &'static str {
        match self {
            ClosureStatus::Open => "open",
            ClosureStatus::Closed => "closed",
        }
    }

    fn parse(raw: &str) -> Self {
        if raw == "closed" {
            ClosureStatus::Closed
        } else {
            ClosureStatus::Open
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosureRecord {
    pub class_id: String,
    pub academic_year: i64,
    pub trimester: i64,
    pub status: ClosureStatus,
    pub closed_at: Option<String>,
    pub closed_by: Option<String>,
    pub reopened_at: Option<String>,
}

pub fn find_closure(
    conn: &Connection,
    class_id: &str,
    academic_year: i64,
    trimester: i64,
) -> CoreResult<Option<ClosureRecord>> {
    conn.query_row(
        "SELECT class_id, academic_year, trimester, status, closed_at, closed_by, reopened_at
         FROM trimester_closures
         WHERE class_id = ? AND academic_year = ? AND trimester = ?",
        (class_id, academic_year, trimester),
        |r| {
            let status: String = r.get(3)?;
            Ok(ClosureRecord {
                class_id: r.get(0)?,
                academic_year: r.get(1)?,
                trimester: r.get(2)?,
                status: ClosureStatus::parse(&status),
                closed_at: r.get(4)?,
                closed_by: r.get(5)?,
                reopened_at: r.get(6)?,
            })
        },
    )
    .optional()
    .storage("db_query_failed")
}

pub fn is_closed(
    conn: &Connection,
    class_id: &str,
    academic_year: i64,
    trimester: i64,
) -> CoreResult<bool> {
    Ok(find_closure(conn, class_id, academic_year, trimester)?
        .map(|c| c.status == ClosureStatus::Closed)
        .unwrap_or(false))
}

/// One started lesson that still lacks a grade or exemption for some students.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseIssue {
    pub assignment_id: String,
    pub assignment_title: String,
    pub lesson: i64,
    pub missing: usize,
}

impl std::fmt::Display for CloseIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (lesson {}): {} student(s) without grade/exemption",
            self.assignment_title, self.lesson, self.missing
        )
    }
}

/// Roster entries whose trimester result still has to come from this class's
/// grades: no identity, or an identity with neither a locked snapshot here nor
/// any snapshot elsewhere.
fn required_roster_entries(
    conn: &Connection,
    class: &ClassRecord,
    roster: &[calc::RosterStudent],
    trimester: i64,
) -> CoreResult<Vec<String>> {
    let student_ids: Vec<String> = roster.iter().filter_map(|s| s.student_id.clone()).collect();
    let rows =
        snapshots::load_for_students(conn, class.academic_year, &student_ids, Some(trimester))?;
    let covered: HashSet<String> = rows
        .into_iter()
        .filter(|r| r.class_id != class.id || r.locked)
        .map(|r| r.student_id)
        .collect();

    Ok(roster
        .iter()
        .filter(|s| match &s.student_id {
            None => true,
            Some(sid) => !covered.contains(sid),
        })
        .map(|s| s.roster_entry_id.clone())
        .collect())
}

/// Every started lesson of the trimester missing a grade or exemption for a
/// required student. Lesson slots are materialized first.
pub fn validate_complete(
    conn: &Connection,
    class: &ClassRecord,
    trimester: i64,
    today: NaiveDate,
) -> CoreResult<Vec<CloseIssue>> {
    let mut assignments = calc::load_assignments(conn, &class.id, Some(trimester))?;
    for a in &assignments {
        slots::ensure_lesson_slots(conn, &a.id, a.planned_lessons)?;
    }
    assignments.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.title.cmp(&b.title))
    });

    let roster = calc::load_active_roster(conn, &class.id)?;
    let required = required_roster_entries(conn, class, &roster, trimester)?;
    if required.is_empty() {
        return Ok(Vec::new());
    }

    let book = ClassGradebook::for_assignments(conn, assignments, today)?;
    let mut issues = Vec::new();
    for a in &book.assignments {
        for slot in book.started_slots(&a.id) {
            let missing = required
                .iter()
                .filter(|rid| {
                    !matches!(
                        book.entry(&slot.id, rid),
                        Some(EntryState::Scored(_)) | Some(EntryState::Exempt)
                    )
                })
                .count();
            if missing > 0 {
                issues.push(CloseIssue {
                    assignment_id: a.id.clone(),
                    assignment_title: a.title.clone(),
                    lesson: slot.number,
                    missing,
                });
            }
        }
    }
    Ok(issues)
}

fn incomplete_error(trimester: i64, issues: &[CloseIssue]) -> CoreError {
    let shown: Vec<String> = issues
        .iter()
        .take(CLOSE_ISSUE_LIMIT)
        .map(|i| i.to_string())
        .collect();
    let hidden = issues.len().saturating_sub(CLOSE_ISSUE_LIMIT);
    let mut message = format!(
        "cannot close trimester {}: {}",
        trimester,
        shown.join("; ")
    );
    if hidden > 0 {
        message.push_str(&format!("; and {} more", hidden));
    }
    CoreError::precondition("close_incomplete", message).with_details(json!({
        "issues": shown,
        "items": issues.iter().take(CLOSE_ISSUE_LIMIT).collect::<Vec<_>>(),
        "total": issues.len(),
        "truncated": hidden > 0,
    }))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotBuild {
    pub computed: usize,
    pub copied: usize,
    pub kept_locked: usize,
}

/// Writes one snapshot per active student with an identity. Results held by
/// another class are copied locked; the rest are computed from this class's grades.
pub fn build_snapshots(
    conn: &Connection,
    class: &ClassRecord,
    trimester: i64,
    today: NaiveDate,
) -> CoreResult<SnapshotBuild> {
    let roster = calc::load_active_roster(conn, &class.id)?;
    let student_ids: Vec<String> = roster.iter().filter_map(|s| s.student_id.clone()).collect();
    let foreign = snapshots::latest_foreign_by_student(
        snapshots::load_for_students(conn, class.academic_year, &student_ids, Some(trimester))?,
        &class.id,
    );
    let book = ClassGradebook::load(conn, &class.id, Some(trimester), today)?;

    let mut out = SnapshotBuild::default();
    for s in &roster {
        let Some(student_id) = s.student_id.as_deref() else {
            continue;
        };
        let written = match foreign.get(student_id) {
            Some(source) => {
                let w = snapshots::upsert_locked_copy(conn, &class.id, source, &source.class_id)?;
                if w {
                    out.copied += 1;
                }
                w
            }
            None => {
                let r = book.trimester_result(trimester, &s.roster_entry_id);
                let w = snapshots::upsert_computed(
                    conn,
                    &class.id,
                    student_id,
                    class.academic_year,
                    trimester,
                    SnapshotValues {
                        final_average: r.average,
                        point_total: r.point_total,
                        evaluated_count: r.evaluated,
                        expected_count: r.expected,
                    },
                )?;
                if w {
                    out.computed += 1;
                }
                w
            }
        };
        if !written {
            out.kept_locked += 1;
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseOutcome {
    pub closure: ClosureRecord,
    pub snapshots: SnapshotBuild,
    pub current_trimester: i64,
}

pub fn close_trimester(
    conn: &Connection,
    ctx: &ViewingContext,
    class: &ClassRecord,
    trimester: i64,
) -> CoreResult<CloseOutcome> {
    let issues = validate_complete(conn, class, trimester, ctx.today)?;
    if !issues.is_empty() {
        tracing::info!(
            class_id = %class.id,
            trimester,
            issues = issues.len(),
            "close rejected: trimester incomplete"
        );
        return Err(incomplete_error(trimester, &issues));
    }

    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO trimester_closures(id, class_id, academic_year, trimester, status, created_at)
         VALUES(?, ?, ?, ?, 'open', ?)
         ON CONFLICT(class_id, academic_year, trimester) DO NOTHING",
        (
            Uuid::new_v4().to_string(),
            &class.id,
            class.academic_year,
            trimester,
            &now,
        ),
    )
    .storage("db_insert_failed")?;

    let built = build_snapshots(conn, class, trimester, ctx.today)?;

    conn.execute(
        "UPDATE trimester_closures
         SET status = ?, closed_at = ?, closed_by = ?, reopened_at = NULL
         WHERE class_id = ? AND academic_year = ? AND trimester = ?",
        (
            ClosureStatus::Closed.as_str(),
            &now,
            &ctx.professor_id,
            &class.id,
            class.academic_year,
            trimester,
        ),
    )
    .storage("db_update_failed")?;

    conn.execute(
        "UPDATE classes SET current_trimester = ? WHERE id = ? AND current_trimester = ?",
        ((trimester + 1).min(MAX_TRIMESTER), &class.id, trimester),
    )
    .storage("db_update_failed")?;

    let closure = find_closure(conn, &class.id, class.academic_year, trimester)?.ok_or(
        CoreError::NotFound {
            what: "closure",
            redirect: "closing.status",
        },
    )?;
    let current_trimester: i64 = conn
        .query_row(
            "SELECT current_trimester FROM classes WHERE id = ?",
            [&class.id],
            |r| r.get(0),
        )
        .storage("db_query_failed")?;

    tracing::info!(
        class_id = %class.id,
        trimester,
        computed = built.computed,
        copied = built.copied,
        kept_locked = built.kept_locked,
        "trimester closed"
    );
    Ok(CloseOutcome {
        closure,
        snapshots: built,
        current_trimester,
    })
}

/// Reopens a trimester that has a closure record. Snapshots stay as they are.
pub fn reopen_trimester(
    conn: &Connection,
    class: &ClassRecord,
    trimester: i64,
) -> CoreResult<ClosureRecord> {
    if find_closure(conn, &class.id, class.academic_year, trimester)?.is_none() {
        return Err(CoreError::precondition(
            "not_closed",
            format!("trimester {} has never been closed", trimester),
        )
        .with_details(json!({ "trimester": trimester })));
    }
    conn.execute(
        "UPDATE trimester_closures SET status = ?, reopened_at = ?
         WHERE class_id = ? AND academic_year = ? AND trimester = ?",
        (
            ClosureStatus::Open.as_str(),
            chrono::Utc::now().to_rfc3339(),
            &class.id,
            class.academic_year,
            trimester,
        ),
    )
    .storage("db_update_failed")?;

    tracing::info!(class_id = %class.id, trimester, "trimester reopened");
    find_closure(conn, &class.id, class.academic_year, trimester)?.ok_or(CoreError::NotFound {
        what: "closure",
        redirect: "closing.status",
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimesterState {
    pub trimester: i64,
    pub status: ClosureStatus,
    pub closed_at: Option<String>,
    pub closed_by: Option<String>,
    pub reopened_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosingStatus {
    pub class_id: String,
    pub academic_year: i64,
    pub current_trimester: i64,
    /// First trimester that is not closed; the last one when all are.
    pub default_trimester: i64,
    pub trimesters: Vec<TrimesterState>,
}

pub fn closing_status(conn: &Connection, class: &ClassRecord) -> CoreResult<ClosingStatus> {
    let mut trimesters = Vec::with_capacity(MAX_TRIMESTER as usize);
    for t in 1..=MAX_TRIMESTER {
        let rec = find_closure(conn, &class.id, class.academic_year, t)?;
        trimesters.push(match rec {
            Some(r) => TrimesterState {
                trimester: t,
                status: r.status,
                closed_at: r.closed_at,
                closed_by: r.closed_by,
                reopened_at: r.reopened_at,
            },
            None => TrimesterState {
                trimester: t,
                status: ClosureStatus::Open,
                closed_at: None,
                closed_by: None,
                reopened_at: None,
            },
        });
    }
    let default_trimester = trimesters
        .iter()
        .find(|t| t.status == ClosureStatus::Open)
        .map(|t| t.trimester)
        .unwrap_or(MAX_TRIMESTER);

    Ok(ClosingStatus {
        class_id: class.id.clone(),
        academic_year: class.academic_year,
        current_trimester: class.current_trimester,
        default_trimester,
        trimesters,
    })
}
