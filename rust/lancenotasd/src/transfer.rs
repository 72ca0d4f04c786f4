//! Moves a student to another class of the same professor, carrying the closed
//! trimester results along as locked snapshots.

use crate::context::{load_owned_class, ClassRecord, ViewingContext};
use crate::error::{CoreError, CoreResult, StorageContext};
use crate::{closing, snapshots};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

/// Why a transfer was refused. Checked in declaration order; the first failing
/// one is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferRejection {
    SameClass,
    DestinationNotFound,
    DifferentYear,
    NotActiveInSource,
    NoStudentIdentity,
    TrimesterNotClosed,
    NoSourceSnapshot,
    AlreadyInDestination,
}

impl TransferRejection {
    pub fn reason(self) -> &'static str {
        match self {
            Self::SameClass => "same_class",
            Self::DestinationNotFound => "destination_not_found",
            Self::DifferentYear => "different_year",
            Self::NotActiveInSource => "not_active_in_source",
            Self::NoStudentIdentity => "no_student_identity",
            Self::TrimesterNotClosed => "trimester_not_closed",
            Self::NoSourceSnapshot => "no_source_snapshot",
            Self::AlreadyInDestination => "already_in_destination",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::SameClass => "destination must be a different class",
            Self::DestinationNotFound => "destination not found",
            Self::DifferentYear => "destination belongs to a different academic year",
            Self::NotActiveInSource => "student is not active in the source class",
            Self::NoStudentIdentity => "student has no cross-class identity",
            Self::TrimesterNotClosed => "close the trimester in the source class before transferring",
            Self::NoSourceSnapshot => "no closed result for this student in the requested trimester",
            Self::AlreadyInDestination => "student is already active in the destination class",
        }
    }

    fn into_error(self, trimester: i64) -> CoreError {
        CoreError::precondition("transfer_rejected", self.message()).with_details(json!({
            "reason": self.reason(),
            "trimester": trimester,
        }))
    }
}

#[derive(Debug, Clone)]
struct SourceEntry {
    id: String,
    student_id: Option<String>,
    full_name: String,
    registration: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOutcome {
    pub student_id: String,
    pub source_roster_entry_id: String,
    pub destination_class_id: String,
    pub destination_roster_entry_id: String,
    pub call_number: i64,
    pub copied_trimesters: Vec<i64>,
    pub skipped_trimesters: Vec<i64>,
}

fn next_call_number(conn: &Connection, class_id: &str) -> CoreResult<i64> {
    let (max_call, active): (Option<i64>, i64) = conn
        .query_row(
            "SELECT MAX(call_number), COUNT(*) FROM roster_entries
             WHERE class_id = ? AND status = 'active'",
            [class_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .storage("db_query_failed")?;
    Ok(match max_call {
        Some(n) => n + 1,
        None => active + 1,
    })
}

/// Runs inside the caller's transaction.
pub fn transfer_student(
    conn: &Connection,
    ctx: &ViewingContext,
    source: &ClassRecord,
    roster_entry_id: &str,
    destination_class_id: &str,
    trimester: i64,
) -> CoreResult<TransferOutcome> {
    let reject = |r: TransferRejection| {
        tracing::info!(
            source_class_id = %source.id,
            destination_class_id,
            roster_entry_id,
            reason = r.reason(),
            "transfer rejected"
        );
        r.into_error(trimester)
    };

    if destination_class_id == source.id {
        return Err(reject(TransferRejection::SameClass));
    }
    let destination = match load_owned_class(conn, ctx, destination_class_id) {
        Ok(c) => c,
        Err(CoreError::NotFound { .. }) => {
            return Err(reject(TransferRejection::DestinationNotFound))
        }
        Err(e) => return Err(e),
    };
    if destination.academic_year != source.academic_year {
        return Err(reject(TransferRejection::DifferentYear));
    }

    let entry = conn
        .query_row(
            "SELECT id, student_id, full_name, registration FROM roster_entries
             WHERE id = ? AND class_id = ? AND status = 'active'",
            (roster_entry_id, &source.id),
            |r| {
                Ok(SourceEntry {
                    id: r.get(0)?,
                    student_id: r.get(1)?,
                    full_name: r.get(2)?,
                    registration: r.get(3)?,
                })
            },
        )
        .optional()
        .storage("db_query_failed")?;
    let Some(entry) = entry else {
        return Err(reject(TransferRejection::NotActiveInSource));
    };
    let Some(student_id) = entry.student_id.clone() else {
        return Err(reject(TransferRejection::NoStudentIdentity));
    };
    if !closing::is_closed(conn, &source.id, source.academic_year, trimester)? {
        return Err(reject(TransferRejection::TrimesterNotClosed));
    }
    if snapshots::find(conn, &source.id, &student_id, source.academic_year, trimester)?.is_none() {
        return Err(reject(TransferRejection::NoSourceSnapshot));
    }
    let already: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM roster_entries
             WHERE class_id = ? AND student_id = ? AND status = 'active'",
            (&destination.id, &student_id),
            |r| r.get(0),
        )
        .optional()
        .storage("db_query_failed")?;
    if already.is_some() {
        return Err(reject(TransferRejection::AlreadyInDestination));
    }

    let mut copied_trimesters = Vec::new();
    let mut skipped_trimesters = Vec::new();
    for snap in snapshots::list_for_class_student(
        conn,
        &source.id,
        &student_id,
        source.academic_year,
        trimester,
    )? {
        if snapshots::insert_locked_copy_if_absent(conn, &destination.id, &snap, &source.id)? {
            copied_trimesters.push(snap.trimester);
        } else {
            skipped_trimesters.push(snap.trimester);
        }
    }

    conn.execute(
        "UPDATE roster_entries SET status = 'transferred' WHERE id = ?",
        [&entry.id],
    )
    .storage("db_update_failed")?;

    let call_number = next_call_number(conn, &destination.id)?;
    let destination_roster_entry_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO roster_entries(id, class_id, student_id, full_name, call_number, registration, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, 'active', ?)",
        (
            &destination_roster_entry_id,
            &destination.id,
            &student_id,
            &entry.full_name,
            call_number,
            &entry.registration,
            chrono::Utc::now().to_rfc3339(),
        ),
    )
    .storage("db_insert_failed")?;

    tracing::info!(
        source_class_id = %source.id,
        destination_class_id = %destination.id,
        student_id = %student_id,
        trimester,
        copied = copied_trimesters.len(),
        skipped = skipped_trimesters.len(),
        "student transferred"
    );
    Ok(TransferOutcome {
        student_id,
        source_roster_entry_id: entry.id,
        destination_class_id: destination.id,
        destination_roster_entry_id,
        call_number,
        copied_trimesters,
        skipped_trimesters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_errors_carry_reason() {
        let e = TransferRejection::DestinationNotFound.into_error(1);
        assert_eq!(e.code(), "transfer_rejected");
        assert_eq!(e.to_string(), "destination not found");
        assert_eq!(
            e.details().expect("details")["reason"],
            "destination_not_found"
        );
    }
}
