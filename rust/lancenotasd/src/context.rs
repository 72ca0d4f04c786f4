use crate::config::{MAX_ACADEMIC_YEAR, MIN_ACADEMIC_YEAR};
use crate::error::{CoreError, CoreResult, StorageContext};
use chrono::{Datelike, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

/// Who is asking, which academic year they are looking at, and what "today" is.
///
/// Supplied by the session collaborator on every request and threaded through
/// the core; nothing here is remembered between requests.
#[derive(Debug, Clone)]
pub struct ViewingContext {
    pub professor_id: String,
    pub academic_year: Option<i64>,
    pub today: NaiveDate,
}

impl ViewingContext {
    pub fn from_params(params: &serde_json::Value) -> CoreResult<Self> {
        let professor_id = params
            .get("professorId")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                CoreError::precondition("unauthorized", "missing authenticated professorId")
            })?;

        // Out-of-range years are ignored and resolved like an absent one.
        let academic_year = params
            .get("academicYear")
            .and_then(|v| v.as_i64())
            .filter(|y| (MIN_ACADEMIC_YEAR..=MAX_ACADEMIC_YEAR).contains(y));

        let today = match params.get("today") {
            None => chrono::Local::now().date_naive(),
            Some(v) if v.is_null() => chrono::Local::now().date_naive(),
            Some(v) => {
                let Some(s) = v.as_str() else {
                    return Err(CoreError::validation("today must be an ISO date string"));
                };
                parse_iso_date(s)?
            }
        };

        Ok(Self {
            professor_id,
            academic_year,
            today,
        })
    }

    /// Explicit year, else the latest year the professor has classes in, else the
    /// calendar year of `today`.
    pub fn resolve_academic_year(&self, conn: &Connection) -> CoreResult<i64> {
        if let Some(y) = self.academic_year {
            return Ok(y);
        }
        let max_year: Option<i64> = conn
            .query_row(
                "SELECT MAX(academic_year) FROM classes WHERE professor_id = ?",
                [&self.professor_id],
                |r| r.get(0),
            )
            .storage("db_query_failed")?;
        Ok(max_year.unwrap_or_else(|| i64::from(self.today.year())))
    }
}

pub fn parse_iso_date(raw: &str) -> CoreResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| CoreError::validation(format!("invalid date '{}', expected YYYY-MM-DD", raw)))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRecord {
    pub id: String,
    pub professor_id: String,
    pub name: String,
    pub grade_level: Option<String>,
    pub section_letter: Option<String>,
    pub subject: Option<String>,
    pub period: Option<String>,
    pub academic_year: i64,
    pub current_trimester: i64,
    pub created_at: String,
}

pub const CLASS_COLUMNS: &str = "id, professor_id, name, grade_level, section_letter, subject, period, academic_year, current_trimester, created_at";

pub fn class_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ClassRecord> {
    Ok(ClassRecord {
        id: r.get(0)?,
        professor_id: r.get(1)?,
        name: r.get(2)?,
        grade_level: r.get(3)?,
        section_letter: r.get(4)?,
        subject: r.get(5)?,
        period: r.get(6)?,
        academic_year: r.get(7)?,
        current_trimester: r.get(8)?,
        created_at: r.get(9)?,
    })
}

/// Loads a class only if it belongs to the acting professor.
pub fn load_owned_class(
    conn: &Connection,
    ctx: &ViewingContext,
    class_id: &str,
) -> CoreResult<ClassRecord> {
    let sql = format!(
        "SELECT {} FROM classes WHERE id = ? AND professor_id = ?",
        CLASS_COLUMNS
    );
    conn.query_row(&sql, (class_id, &ctx.professor_id), class_from_row)
        .optional()
        .storage("db_query_failed")?
        .ok_or_else(CoreError::class_not_found)
}
