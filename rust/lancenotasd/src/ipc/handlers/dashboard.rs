use crate::context::ViewingContext;
use crate::dashboard;
use crate::error::CoreResult;
use crate::ipc::helpers::run_domain;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn summary(
    conn: &Connection,
    ctx: &ViewingContext,
    _params: &serde_json::Value,
) -> CoreResult<serde_json::Value> {
    Ok(json!(dashboard::professor_summary(conn, ctx)?))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.summary" => Some(run_domain(state, req, summary)),
        _ => None,
    }
}
