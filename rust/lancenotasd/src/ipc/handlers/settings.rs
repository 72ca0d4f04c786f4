use crate::classes;
use crate::context::ViewingContext;
use crate::error::CoreResult;
use crate::ipc::helpers::run_domain;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn academic_years(
    conn: &Connection,
    ctx: &ViewingContext,
    _params: &serde_json::Value,
) -> CoreResult<serde_json::Value> {
    let (selected, years) = classes::academic_years(conn, ctx)?;
    Ok(json!({ "selected": selected, "years": years }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.academicYears" => Some(run_domain(state, req, academic_years)),
        _ => None,
    }
}
