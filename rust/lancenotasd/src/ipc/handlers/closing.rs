use crate::closing;
use crate::context::{load_owned_class, ViewingContext};
use crate::error::{CoreResult, StorageContext};
use crate::ipc::helpers::{in_transaction, required_str, required_trimester, run_domain, DomainFn};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn status(
    conn: &Connection,
    ctx: &ViewingContext,
    params: &serde_json::Value,
) -> CoreResult<serde_json::Value> {
    let class = load_owned_class(conn, ctx, &required_str(params, "classId")?)?;
    Ok(json!(closing::closing_status(conn, &class)?))
}

/// Dry run of the completeness check; slot materialization is rolled back.
fn validate(
    conn: &Connection,
    ctx: &ViewingContext,
    params: &serde_json::Value,
) -> CoreResult<serde_json::Value> {
    let class = load_owned_class(conn, ctx, &required_str(params, "classId")?)?;
    let trimester = required_trimester(params)?;
    let tx = conn.unchecked_transaction().storage("db_tx_failed")?;
    let issues = closing::validate_complete(&tx, &class, trimester, ctx.today);
    let _ = tx.rollback();
    let issues = issues?;
    Ok(json!({
        "trimester": trimester,
        "complete": issues.is_empty(),
        "issues": issues.iter().map(|i| i.to_string()).collect::<Vec<_>>(),
        "items": issues,
    }))
}

fn close(
    conn: &Connection,
    ctx: &ViewingContext,
    params: &serde_json::Value,
) -> CoreResult<serde_json::Value> {
    let class = load_owned_class(conn, ctx, &required_str(params, "classId")?)?;
    let trimester = required_trimester(params)?;
    let outcome = in_transaction(conn, |tx| {
        closing::close_trimester(tx, ctx, &class, trimester)
    })?;
    Ok(json!(outcome))
}

fn reopen(
    conn: &Connection,
    ctx: &ViewingContext,
    params: &serde_json::Value,
) -> CoreResult<serde_json::Value> {
    let class = load_owned_class(conn, ctx, &required_str(params, "classId")?)?;
    let trimester = required_trimester(params)?;
    let closure = in_transaction(conn, |tx| closing::reopen_trimester(tx, &class, trimester))?;
    Ok(json!({ "closure": closure }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: DomainFn = match req.method.as_str() {
        "closing.status" => status,
        "closing.validate" => validate,
        "closing.close" => close,
        "closing.reopen" => reopen,
        _ => return None,
    };
    Some(run_domain(state, req, f))
}
