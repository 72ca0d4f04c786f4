use crate::classes::{self, ClassInput};
use crate::context::ViewingContext;
use crate::error::CoreResult;
use crate::ipc::helpers::{in_transaction, required_str, run_domain, DomainFn};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn list(
    conn: &Connection,
    ctx: &ViewingContext,
    params: &serde_json::Value,
) -> CoreResult<serde_json::Value> {
    let query = params.get("query").and_then(|v| v.as_str());
    let (academic_year, cards) = classes::list_classes(conn, ctx, query)?;
    Ok(json!({ "academicYear": academic_year, "classes": cards }))
}

fn create(
    conn: &Connection,
    ctx: &ViewingContext,
    params: &serde_json::Value,
) -> CoreResult<serde_json::Value> {
    let input = ClassInput::from_params(params, ctx.resolve_academic_year(conn)?)?;
    let class = classes::create_class(conn, ctx, &input)?;
    Ok(json!({ "class": class }))
}

fn update(
    conn: &Connection,
    ctx: &ViewingContext,
    params: &serde_json::Value,
) -> CoreResult<serde_json::Value> {
    let class_id = required_str(params, "classId")?;
    let input = ClassInput::from_params(params, ctx.resolve_academic_year(conn)?)?;
    let class = classes::update_class(conn, ctx, &class_id, &input)?;
    Ok(json!({ "class": class }))
}

fn delete(
    conn: &Connection,
    ctx: &ViewingContext,
    params: &serde_json::Value,
) -> CoreResult<serde_json::Value> {
    let class_id = required_str(params, "classId")?;
    in_transaction(conn, |tx| classes::delete_class(tx, ctx, &class_id))?;
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: DomainFn = match req.method.as_str() {
        "classes.list" => list,
        "classes.create" => create,
        "classes.update" => update,
        "classes.delete" => delete,
        _ => return None,
    };
    Some(run_domain(state, req, f))
}
