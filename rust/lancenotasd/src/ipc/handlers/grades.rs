use crate::context::{load_owned_class, ViewingContext};
use crate::error::CoreResult;
use crate::grades;
use crate::ipc::helpers::{in_transaction, required_positive, required_str, run_domain, DomainFn};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn get(
    conn: &Connection,
    ctx: &ViewingContext,
    params: &serde_json::Value,
) -> CoreResult<serde_json::Value> {
    let class = load_owned_class(conn, ctx, &required_str(params, "classId")?)?;
    let assignment_id = required_str(params, "assignmentId")?;
    let lesson = required_positive(params, "lesson")?;
    let sheet = in_transaction(conn, |tx| {
        grades::lesson_sheet(tx, &class, &assignment_id, lesson)
    })?;
    Ok(json!(sheet))
}

fn save(
    conn: &Connection,
    ctx: &ViewingContext,
    params: &serde_json::Value,
) -> CoreResult<serde_json::Value> {
    let class = load_owned_class(conn, ctx, &required_str(params, "classId")?)?;
    let assignment_id = required_str(params, "assignmentId")?;
    let lesson = required_positive(params, "lesson")?;
    let entries = grades::parse_entries(params)?;
    let outcome = in_transaction(conn, |tx| {
        grades::save_lesson(tx, &class, &assignment_id, lesson, &entries)
    })?;
    Ok(json!(outcome))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: DomainFn = match req.method.as_str() {
        "grades.get" => get,
        "grades.save" => save,
        _ => return None,
    };
    Some(run_domain(state, req, f))
}
