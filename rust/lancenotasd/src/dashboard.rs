use crate::calc::{self, round_2, ClassGradebook, EntryState};
use crate::context::{class_from_row, ClassRecord, ViewingContext, CLASS_COLUMNS};
use crate::error::{CoreResult, StorageContext};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use std::cmp::Ordering;

/// Counters over (started lesson, active student) pairs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PairTally {
    pub eligible: usize,
    pub scored: usize,
    pub exempt: usize,
    pub score_sum: f64,
}

impl PairTally {
    pub fn add(&mut self, other: PairTally) {
        self.eligible += other.eligible;
        self.scored += other.scored;
        self.exempt += other.exempt;
        self.score_sum += other.score_sum;
    }

    pub fn pending(&self) -> usize {
        self.eligible.saturating_sub(self.scored + self.exempt)
    }

    pub fn average(&self) -> Option<f64> {
        let denom = self.eligible.saturating_sub(self.exempt);
        if denom == 0 {
            return None;
        }
        Some(round_2(self.score_sum / denom as f64))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRollup {
    pub class_id: String,
    pub name: String,
    pub grade_level: Option<String>,
    pub section_letter: Option<String>,
    pub subject: Option<String>,
    pub active_students: usize,
    pub pending: usize,
    pub evaluated: usize,
    pub average: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub academic_year: i64,
    pub class_count: usize,
    pub active_students: usize,
    pub pending: usize,
    pub evaluated: usize,
    pub average: Option<f64>,
    pub classes: Vec<ClassRollup>,
}

fn class_tally(
    conn: &Connection,
    class: &ClassRecord,
    today: NaiveDate,
) -> CoreResult<(usize, PairTally)> {
    let roster = calc::load_active_roster(conn, &class.id)?;
    let book = ClassGradebook::load(conn, &class.id, None, today)?;
    let mut t = PairTally::default();
    for a in &book.assignments {
        for slot in book.started_slots(&a.id) {
            for s in &roster {
                t.eligible += 1;
                match book.entry(&slot.id, &s.roster_entry_id) {
                    Some(EntryState::Scored(v)) => {
                        t.scored += 1;
                        t.score_sum += v;
                    }
                    Some(EntryState::Exempt) => t.exempt += 1,
                    Some(EntryState::NoteOnly) | None => {}
                }
            }
        }
    }
    Ok((roster.len(), t))
}

/// Highest average first, classes without one last, then by name.
pub fn compare_rollups(a: &ClassRollup, b: &ClassRollup) -> Ordering {
    match (a.average, b.average) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
}

pub fn professor_summary(conn: &Connection, ctx: &ViewingContext) -> CoreResult<DashboardSummary> {
    let academic_year = ctx.resolve_academic_year(conn)?;
    let sql = format!(
        "SELECT {} FROM classes WHERE professor_id = ? AND academic_year = ?",
        CLASS_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).storage("db_query_failed")?;
    let classes = stmt
        .query_map((&ctx.professor_id, academic_year), class_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .storage("db_query_failed")?;

    let mut total = PairTally::default();
    let mut active_students = 0;
    let mut rows = Vec::with_capacity(classes.len());
    for class in &classes {
        let (students, t) = class_tally(conn, class, ctx.today)?;
        active_students += students;
        total.add(t);
        rows.push(ClassRollup {
            class_id: class.id.clone(),
            name: class.name.clone(),
            grade_level: class.grade_level.clone(),
            section_letter: class.section_letter.clone(),
            subject: class.subject.clone(),
            active_students: students,
            pending: t.pending(),
            evaluated: t.scored,
            average: t.average(),
        });
    }
    rows.sort_by(compare_rollups);

    Ok(DashboardSummary {
        academic_year,
        class_count: classes.len(),
        active_students,
        pending: total.pending(),
        evaluated: total.scored,
        average: total.average(),
        classes: rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, average: Option<f64>) -> ClassRollup {
        ClassRollup {
            class_id: name.to_string(),
            name: name.to_string(),
            grade_level: None,
            section_letter: None,
            subject: None,
            active_students: 0,
            pending: 0,
            evaluated: 0,
            average,
        }
    }

    #[test]
    fn rollups_sort_by_average_then_name() {
        let mut rows = vec![
            row("b turma", None),
            row("Zeta", Some(6.0)),
            row("alfa", Some(6.0)),
            row("A turma", None),
            row("Top", Some(9.5)),
        ];
        rows.sort_by(compare_rollups);
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Top", "alfa", "Zeta", "A turma", "b turma"]);
    }

    #[test]
    fn pair_tally_counts_missing_as_zero() {
        let t = PairTally {
            eligible: 4,
            scored: 2,
            exempt: 1,
            score_sum: 15.0,
        };
        assert_eq!(t.pending(), 1);
        assert_eq!(t.average(), Some(5.0));
        assert_eq!(PairTally::default().average(), None);
    }
}
