use crate::calc;
use crate::context::{load_owned_class, ViewingContext};
use crate::error::CoreResult;
use crate::ipc::helpers::{in_transaction, required_str, run_domain, DomainFn};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn class_averages(
    conn: &Connection,
    ctx: &ViewingContext,
    params: &serde_json::Value,
) -> CoreResult<serde_json::Value> {
    let class = load_owned_class(conn, ctx, &required_str(params, "classId")?)?;
    let model = calc::compute_class_averages(conn, &class, ctx.today)?;
    Ok(json!(model))
}

fn assignment_averages(
    conn: &Connection,
    ctx: &ViewingContext,
    params: &serde_json::Value,
) -> CoreResult<serde_json::Value> {
    let class = load_owned_class(conn, ctx, &required_str(params, "classId")?)?;
    let assignment_id = required_str(params, "assignmentId")?;
    // Materializes missing lesson slots, hence the transaction.
    let model = in_transaction(conn, |tx| {
        calc::compute_assignment_averages(tx, &class, &assignment_id, ctx.today)
    })?;
    Ok(json!(model))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: DomainFn = match req.method.as_str() {
        "calc.classAverages" => class_averages,
        "calc.assignmentAverages" => assignment_averages,
        _ => return None,
    };
    Some(run_domain(state, req, f))
}
