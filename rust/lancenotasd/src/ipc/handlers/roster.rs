use crate::context::{load_owned_class, ViewingContext};
use crate::error::CoreResult;
use crate::ipc::helpers::{in_transaction, required_str, required_trimester, run_domain, DomainFn};
use crate::ipc::types::{AppState, Request};
use crate::{roster, transfer};
use rusqlite::Connection;
use serde_json::json;

fn import(
    conn: &Connection,
    ctx: &ViewingContext,
    params: &serde_json::Value,
) -> CoreResult<serde_json::Value> {
    let class = load_owned_class(conn, ctx, &required_str(params, "classId")?)?;
    let records = roster::parse_records(params)?;
    let header = roster::parse_header(params);
    let outcome = in_transaction(conn, |tx| {
        roster::import_roster(tx, &class, &records, header.as_ref())
    })?;
    Ok(json!(outcome))
}

fn list(
    conn: &Connection,
    ctx: &ViewingContext,
    params: &serde_json::Value,
) -> CoreResult<serde_json::Value> {
    let class = load_owned_class(conn, ctx, &required_str(params, "classId")?)?;
    let include_transferred = params
        .get("includeTransferred")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let rows = roster::list_roster(conn, &class, include_transferred)?;
    Ok(json!({ "classId": class.id, "students": rows }))
}

fn transfer(
    conn: &Connection,
    ctx: &ViewingContext,
    params: &serde_json::Value,
) -> CoreResult<serde_json::Value> {
    let source = load_owned_class(conn, ctx, &required_str(params, "classId")?)?;
    let roster_entry_id = required_str(params, "rosterEntryId")?;
    let destination_class_id = required_str(params, "destinationClassId")?;
    let trimester = required_trimester(params)?;
    let outcome = in_transaction(conn, |tx| {
        transfer::transfer_student(
            tx,
            ctx,
            &source,
            &roster_entry_id,
            &destination_class_id,
            trimester,
        )
    })?;
    Ok(json!(outcome))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: DomainFn = match req.method.as_str() {
        "roster.import" => import,
        "roster.list" => list,
        "roster.transfer" => transfer,
        _ => return None,
    };
    Some(run_domain(state, req, f))
}
