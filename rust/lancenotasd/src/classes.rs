//! Class sections: validation of the class form, listing and explicit delete.

use crate::config::{MAX_ACADEMIC_YEAR, MIN_ACADEMIC_YEAR};
use crate::context::{class_from_row, load_owned_class, ClassRecord, ViewingContext, CLASS_COLUMNS};
use crate::error::{CoreError, CoreResult, StorageContext};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeSet;
use uuid::Uuid;

pub const GRADE_LEVELS: [&str; 7] = ["5º", "6º", "7º", "8º", "9º", "1º Ano", "2º Ano"];
pub const SECTION_LETTERS: &str = "ABCDEFGH";
pub const PERIODS: [&str; 3] = ["Manhã", "Tarde", "Noite"];

/// Sort rank of a grade level; unknown levels go last.
pub fn grade_rank(level: Option<&str>) -> i64 {
    match level.map(str::trim) {
        Some("5º") => 5,
        Some("6º") => 6,
        Some("7º") => 7,
        Some("8º") => 8,
        Some("9º") => 9,
        Some("1º Ano") => 10,
        Some("2º Ano") => 11,
        _ => 99,
    }
}

fn normalize_subject(raw: &str) -> String {
    let s = raw.trim();
    if s.eq_ignore_ascii_case("artes") {
        "Arte".to_string()
    } else {
        s.to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassInput {
    pub grade_level: String,
    pub section_letter: String,
    pub subject: String,
    pub period: Option<String>,
    pub academic_year: i64,
}

impl ClassInput {
    pub fn from_params(params: &serde_json::Value, default_year: i64) -> CoreResult<Self> {
        let text = |key: &str| {
            params
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let (Some(grade_level), Some(section_letter), Some(subject)) =
            (text("gradeLevel"), text("sectionLetter"), text("subject"))
        else {
            return Err(CoreError::validation(
                "gradeLevel, sectionLetter and subject are required",
            ));
        };
        if !GRADE_LEVELS.contains(&grade_level.as_str()) {
            return Err(CoreError::validation(format!(
                "invalid gradeLevel '{}'",
                grade_level
            )));
        }
        let section_letter = section_letter.to_uppercase();
        if section_letter.chars().count() != 1 || !SECTION_LETTERS.contains(section_letter.as_str()) {
            return Err(CoreError::validation(format!(
                "invalid sectionLetter '{}'",
                section_letter
            )));
        }
        let period = text("period");
        if let Some(p) = &period {
            if !PERIODS.contains(&p.as_str()) {
                return Err(CoreError::validation(format!("invalid period '{}'", p)));
            }
        }
        let academic_year = match params.get("academicYear") {
            None => default_year,
            Some(v) if v.is_null() => default_year,
            Some(v) => v
                .as_i64()
                .filter(|y| (MIN_ACADEMIC_YEAR..=MAX_ACADEMIC_YEAR).contains(y))
                .ok_or_else(|| CoreError::validation("invalid academicYear"))?,
        };

        Ok(Self {
            grade_level,
            section_letter,
            subject: normalize_subject(&subject),
            period,
            academic_year,
        })
    }

    /// `"7º B - Matemática - Tarde"`; the high-school levels drop their "Ano" suffix.
    pub fn display_name(&self) -> String {
        let level = self
            .grade_level
            .strip_suffix(" Ano")
            .unwrap_or(&self.grade_level);
        let mut name = format!("{} {} - {}", level, self.section_letter, self.subject);
        if let Some(p) = &self.period {
            name.push_str(" - ");
            name.push_str(p);
        }
        name
    }
}

pub fn create_class(
    conn: &Connection,
    ctx: &ViewingContext,
    input: &ClassInput,
) -> CoreResult<ClassRecord> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, professor_id, name, grade_level, section_letter, subject, period, academic_year, current_trimester, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &id,
            &ctx.professor_id,
            input.display_name(),
            &input.grade_level,
            &input.section_letter,
            &input.subject,
            &input.period,
            input.academic_year,
            chrono::Utc::now().to_rfc3339(),
        ),
    )
    .storage("db_insert_failed")?;
    tracing::debug!(class_id = %id, "class created");
    load_owned_class(conn, ctx, &id)
}

pub fn update_class(
    conn: &Connection,
    ctx: &ViewingContext,
    class_id: &str,
    input: &ClassInput,
) -> CoreResult<ClassRecord> {
    let class = load_owned_class(conn, ctx, class_id)?;
    conn.execute(
        "UPDATE classes
         SET name = ?, grade_level = ?, section_letter = ?, subject = ?, period = ?, academic_year = ?
         WHERE id = ?",
        (
            input.display_name(),
            &input.grade_level,
            &input.section_letter,
            &input.subject,
            &input.period,
            input.academic_year,
            &class.id,
        ),
    )
    .storage("db_update_failed")?;
    load_owned_class(conn, ctx, &class.id)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassCard {
    #[serde(flatten)]
    pub class: ClassRecord,
    pub active_students: i64,
    pub assignment_count: i64,
}

/// Classes of the viewing year in grade, letter, subject, name, creation order.
/// `query` filters on a case-insensitive substring of the name or subject.
pub fn list_classes(
    conn: &Connection,
    ctx: &ViewingContext,
    query: Option<&str>,
) -> CoreResult<(i64, Vec<ClassCard>)> {
    let academic_year = ctx.resolve_academic_year(conn)?;
    let sql = format!(
        "SELECT {},
           (SELECT COUNT(*) FROM roster_entries r WHERE r.class_id = classes.id AND r.status = 'active'),
           (SELECT COUNT(*) FROM assignments a WHERE a.class_id = classes.id)
         FROM classes
         WHERE professor_id = ? AND academic_year = ?",
        CLASS_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).storage("db_query_failed")?;
    let mut cards = stmt
        .query_map((&ctx.professor_id, academic_year), |r| {
            Ok(ClassCard {
                class: class_from_row(r)?,
                active_students: r.get(10)?,
                assignment_count: r.get(11)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .storage("db_query_failed")?;

    let needle = query
        .map(|q| q.trim().to_lowercase())
        .filter(|q| !q.is_empty());
    if let Some(q) = needle {
        cards.retain(|c| {
            c.class.name.to_lowercase().contains(&q)
                || c
                    .class
                    .subject
                    .as_deref()
                    .map(|s| s.to_lowercase().contains(&q))
                    .unwrap_or(false)
        });
    }

    cards.sort_by(|a, b| {
        let key = |c: &ClassCard| {
            (
                grade_rank(c.class.grade_level.as_deref()),
                c.class.section_letter.clone().unwrap_or_default(),
                c.class.subject.as_deref().unwrap_or("").to_lowercase(),
                c.class.name.to_lowercase(),
                c.class.created_at.clone(),
            )
        };
        key(a).cmp(&key(b))
    });
    Ok((academic_year, cards))
}

/// Deletes a class and everything it owns in dependency order. Runs inside the
/// caller's transaction.
pub fn delete_class(conn: &Connection, ctx: &ViewingContext, class_id: &str) -> CoreResult<()> {
    let class = load_owned_class(conn, ctx, class_id)?;
    // No ON DELETE CASCADE; keep this list in step with the schema.
    let steps: [&str; 7] = [
        "DELETE FROM grade_entries
         WHERE slot_id IN (
           SELECT s.id FROM lesson_slots s
           JOIN assignments a ON a.id = s.assignment_id
           WHERE a.class_id = ?
         )",
        "DELETE FROM lesson_slots
         WHERE assignment_id IN (SELECT id FROM assignments WHERE class_id = ?)",
        "DELETE FROM assignments WHERE class_id = ?",
        "DELETE FROM trimester_snapshots WHERE class_id = ?",
        "DELETE FROM trimester_closures WHERE class_id = ?",
        "DELETE FROM roster_entries WHERE class_id = ?",
        "DELETE FROM classes WHERE id = ?",
    ];
    for sql in steps {
        conn.execute(sql, [&class.id]).storage("db_delete_failed")?;
    }
    tracing::info!(class_id = %class.id, "class deleted");
    Ok(())
}

/// Years the professor can switch to: those with classes plus the selected
/// year and the one after it.
pub fn academic_years(conn: &Connection, ctx: &ViewingContext) -> CoreResult<(i64, Vec<i64>)> {
    let selected = ctx.resolve_academic_year(conn)?;
    let mut stmt = conn
        .prepare("SELECT DISTINCT academic_year FROM classes WHERE professor_id = ?")
        .storage("db_query_failed")?;
    let mut years: BTreeSet<i64> = stmt
        .query_map([&ctx.professor_id], |r| r.get::<_, i64>(0))
        .and_then(|it| it.collect::<Result<BTreeSet<_>, _>>())
        .storage("db_query_failed")?;
    years.insert(selected);
    if selected < MAX_ACADEMIC_YEAR {
        years.insert(selected + 1);
    }
    Ok((selected, years.into_iter().collect()))
}
