use crate::assignments::{self, AssignmentInput};
use crate::calc;
use crate::context::{load_owned_class, ViewingContext};
use crate::error::CoreResult;
use crate::ipc::helpers::{in_transaction, optional_trimester, required_str, run_domain, DomainFn};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn create(
    conn: &Connection,
    ctx: &ViewingContext,
    params: &serde_json::Value,
) -> CoreResult<serde_json::Value> {
    let class = load_owned_class(conn, ctx, &required_str(params, "classId")?)?;
    let input = AssignmentInput::from_params(params, None)?;
    let assignment = in_transaction(conn, |tx| assignments::create_assignment(tx, &class, &input))?;
    Ok(json!({ "assignment": assignment }))
}

fn configure(
    conn: &Connection,
    ctx: &ViewingContext,
    params: &serde_json::Value,
) -> CoreResult<serde_json::Value> {
    let class = load_owned_class(conn, ctx, &required_str(params, "classId")?)?;
    let assignment_id = required_str(params, "assignmentId")?;
    let current = calc::load_assignment(conn, &class.id, &assignment_id)?;
    let input = AssignmentInput::from_params(params, Some(&current))?;
    let assignment = in_transaction(conn, |tx| {
        assignments::configure_assignment(tx, &class, &assignment_id, &input)
    })?;
    Ok(json!({ "assignment": assignment }))
}

fn list(
    conn: &Connection,
    ctx: &ViewingContext,
    params: &serde_json::Value,
) -> CoreResult<serde_json::Value> {
    let class = load_owned_class(conn, ctx, &required_str(params, "classId")?)?;
    let trimester = optional_trimester(params)?;
    let rows = assignments::list_assignments(conn, &class, trimester, ctx.today)?;
    Ok(json!({ "classId": class.id, "assignments": rows }))
}

fn slots(
    conn: &Connection,
    ctx: &ViewingContext,
    params: &serde_json::Value,
) -> CoreResult<serde_json::Value> {
    let class = load_owned_class(conn, ctx, &required_str(params, "classId")?)?;
    let assignment_id = required_str(params, "assignmentId")?;
    let (assignment, lessons) = in_transaction(conn, |tx| {
        assignments::assignment_lessons(tx, &class, &assignment_id, ctx.today)
    })?;
    Ok(json!({ "assignment": assignment, "lessons": lessons }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: DomainFn = match req.method.as_str() {
        "assignments.create" => create,
        "assignments.configure" => configure,
        "assignments.list" => list,
        "assignments.slots" => slots,
        _ => return None,
    };
    Some(run_domain(state, req, f))
}
