//! Roster intake from parsed class lists, and roster listing.

use crate::context::ClassRecord;
use crate::error::{CoreError, CoreResult, StorageContext};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

/// One student line produced by the external class-list parser.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterRecord {
    pub full_name: String,
    pub call_number: Option<i64>,
    pub registration: Option<String>,
}

/// Class header printed on the parsed list, used only to warn about a mismatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListHeader {
    pub grade_level: Option<String>,
    pub section_letter: Option<String>,
    pub subject: Option<String>,
    pub period: Option<String>,
    pub academic_year: Option<i64>,
}

fn opt_text(v: &serde_json::Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(|x| x.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn parse_records(params: &serde_json::Value) -> CoreResult<Vec<RosterRecord>> {
    let Some(items) = params.get("students").and_then(|v| v.as_array()) else {
        return Err(CoreError::validation("missing students array"));
    };
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let Some(full_name) = opt_text(item, "fullName") else {
            return Err(CoreError::validation(format!("students[{}].fullName is required", i)));
        };
        let call_number = match item.get("callNumber") {
            None => None,
            Some(v) if v.is_null() => None,
            Some(v) => Some(
                v.as_i64()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| CoreError::validation(format!("students[{}].callNumber must be a positive integer", i)))?,
            ),
        };
        out.push(RosterRecord {
            full_name,
            call_number,
            registration: opt_text(item, "registration"),
        });
    }
    Ok(out)
}

pub fn parse_header(params: &serde_json::Value) -> Option<ListHeader> {
    let h = params.get("header").filter(|v| v.is_object())?;
    Some(ListHeader {
        grade_level: opt_text(h, "gradeLevel"),
        section_letter: opt_text(h, "sectionLetter"),
        subject: opt_text(h, "subject"),
        period: opt_text(h, "period"),
        academic_year: h.get("academicYear").and_then(|v| v.as_i64()),
    })
}

/// Lower-case, accent-free, single-spaced form used for name and header comparison.
/// Precomposed Latin letters are folded to their base letter; decomposed input
/// loses its combining marks.
pub fn normalize_text(raw: &str) -> String {
    let mut folded = String::with_capacity(raw.len());
    for c in raw.chars().filter(|c| !is_combining_mark(*c)) {
        match fold_latin(c) {
            Some(base) => folded.push_str(base),
            None => folded.push(c),
        }
    }
    folded
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn is_combining_mark(c: char) -> bool {
    matches!(c, '\u{0300}'..='\u{036F}' | '\u{1AB0}'..='\u{1AFF}' | '\u{1DC0}'..='\u{1DFF}' | '\u{20D0}'..='\u{20FF}')
}

fn fold_latin(c: char) -> Option<&'static str> {
    let base = match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' | 'Á' | 'À' | 'Â' | 'Ã' | 'Ä' | 'Å' | 'Ā' | 'Ă' | 'Ą' => "a",
        'æ' | 'Æ' => "ae",
        'ç' | 'ć' | 'č' | 'Ç' | 'Ć' | 'Č' => "c",
        'ď' | 'đ' | 'Ď' | 'Đ' => "d",
        'é' | 'è' | 'ê' | 'ë' | 'ē' | 'ė' | 'ę' | 'ě' | 'É' | 'È' | 'Ê' | 'Ë' | 'Ē' | 'Ė' | 'Ę' | 'Ě' => "e",
        'ğ' | 'Ğ' => "g",
        'í' | 'ì' | 'î' | 'ï' | 'ī' | 'į' | 'ı' | 'Í' | 'Ì' | 'Î' | 'Ï' | 'Ī' | 'Į' | 'İ' => "i",
        'ł' | 'ľ' | 'Ł' | 'Ľ' => "l",
        'ñ' | 'ń' | 'ň' | 'Ñ' | 'Ń' | 'Ň' => "n",
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ő' | 'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' | 'Ø' | 'Ō' | 'Ő' => "o",
        'œ' | 'Œ' => "oe",
        'ř' | 'Ř' => "r",
        'ś' | 'š' | 'ş' | 'Ś' | 'Š' | 'Ş' => "s",
        'ß' => "ss",
        'ť' | 'ţ' | 'Ť' | 'Ţ' => "t",
        'ú' | 'ù' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' | 'ų' | 'Ú' | 'Ù' | 'Û' | 'Ü' | 'Ū' | 'Ů' | 'Ű' | 'Ų' => "u",
        'ý' | 'ÿ' | 'Ý' | 'Ÿ' => "y",
        'ź' | 'ż' | 'ž' | 'Ź' | 'Ż' | 'Ž' => "z",
        _ => return None,
    };
    Some(base)
}

/// Header fields that disagree with the class they are imported into.
pub fn header_mismatches(class: &ClassRecord, header: &ListHeader) -> Vec<&'static str> {
    let differs = |a: &Option<String>, b: &Option<String>| match (a, b) {
        (Some(a), Some(b)) => normalize_text(a) != normalize_text(b),
        _ => false,
    };
    let mut out = Vec::new();
    if differs(&header.grade_level, &class.grade_level) {
        out.push("gradeLevel");
    }
    if differs(&header.section_letter, &class.section_letter) {
        out.push("sectionLetter");
    }
    if differs(&header.period, &class.period) {
        out.push("period");
    }
    if let Some(y) = header.academic_year {
        if y != class.academic_year {
            out.push("academicYear");
        }
    }
    // "Artes" and "Arte" are the same subject.
    if let (Some(a), Some(b)) = (&header.subject, &class.subject) {
        let a = normalize_text(a);
        let b = normalize_text(b);
        if a.trim_end_matches('s') != b.trim_end_matches('s') {
            out.push("subject");
        }
    }
    out
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub created: usize,
    pub skipped: usize,
    pub mismatch: Vec<&'static str>,
}

/// Creates a fresh Student identity and an active roster entry per record. Names
/// already on the class roster are skipped. Runs inside the caller's transaction.
pub fn import_roster(
    conn: &Connection,
    class: &ClassRecord,
    records: &[RosterRecord],
    header: Option<&ListHeader>,
) -> CoreResult<ImportOutcome> {
    let mut stmt = conn
        .prepare("SELECT full_name FROM roster_entries WHERE class_id = ?")
        .storage("db_query_failed")?;
    let mut existing: HashSet<String> = stmt
        .query_map([&class.id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .storage("db_query_failed")?
        .iter()
        .map(|n| normalize_text(n))
        .collect();

    let now = chrono::Utc::now().to_rfc3339();
    let mut created = 0;
    let mut skipped = 0;
    for rec in records {
        let key = normalize_text(&rec.full_name);
        if key.is_empty() || existing.contains(&key) {
            skipped += 1;
            continue;
        }

        // Identities are shared between classes only by a transfer.
        let student_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO students(id, full_name, registration, created_at) VALUES(?, ?, ?, ?)",
            (&student_id, &rec.full_name, &rec.registration, &now),
        )
        .storage("db_insert_failed")?;

        conn.execute(
            "INSERT INTO roster_entries(id, class_id, student_id, full_name, call_number, registration, status, created_at)
             VALUES(?, ?, ?, ?, ?, ?, 'active', ?)",
            (
                Uuid::new_v4().to_string(),
                &class.id,
                &student_id,
                &rec.full_name,
                rec.call_number,
                &rec.registration,
                &now,
            ),
        )
        .storage("db_insert_failed")?;
        existing.insert(key);
        created += 1;
    }

    let mismatch = header
        .map(|h| header_mismatches(class, h))
        .unwrap_or_default();
    tracing::info!(class_id = %class.id, created, skipped, "roster imported");
    Ok(ImportOutcome {
        created,
        skipped,
        mismatch,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterRow {
    pub roster_entry_id: String,
    pub student_id: Option<String>,
    pub full_name: String,
    pub call_number: Option<i64>,
    pub registration: Option<String>,
    pub status: String,
}

pub fn list_roster(
    conn: &Connection,
    class: &ClassRecord,
    include_transferred: bool,
) -> CoreResult<Vec<RosterRow>> {
    let sql = if include_transferred {
        "SELECT id, student_id, full_name, call_number, registration, status
         FROM roster_entries WHERE class_id = ?
         ORDER BY status = 'transferred', call_number IS NULL, call_number, full_name COLLATE NOCASE"
    } else {
        "SELECT id, student_id, full_name, call_number, registration, status
         FROM roster_entries WHERE class_id = ? AND status = 'active'
         ORDER BY call_number IS NULL, call_number, full_name COLLATE NOCASE"
    };
    let mut stmt = conn.prepare(sql).storage("db_query_failed")?;
    stmt.query_map([&class.id], |r| {
        Ok(RosterRow {
            roster_entry_id: r.get(0)?,
            student_id: r.get(1)?,
            full_name: r.get(2)?,
            call_number: r.get(3)?,
            registration: r.get(4)?,
            status: r.get(5)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .storage("db_query_failed")
}
