use crate::config::MAX_TRIMESTER;
use crate::context::ViewingContext;
use crate::error::{CoreError, CoreResult, StorageContext};
use crate::ipc::error::{core_err, err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;

/// Signature shared by every professor-scoped method.
pub type DomainFn =
    fn(&Connection, &ViewingContext, &serde_json::Value) -> CoreResult<serde_json::Value>;

/// Checks the workspace and viewing context, runs `f` and wraps its result.
pub fn run_domain(state: &mut AppState, req: &Request, f: DomainFn) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let ctx = match ViewingContext::from_params(&req.params) {
        Ok(c) => c,
        Err(e) => return core_err(&req.id, &e),
    };
    tracing::debug!(request_id = %req.id, method = %req.method, "dispatch");
    match f(conn, &ctx, &req.params) {
        Ok(v) => ok(&req.id, v),
        Err(e) => core_err(&req.id, &e),
    }
}

/// Runs `f` in one transaction; any error rolls everything back.
pub fn in_transaction<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> CoreResult<T>,
) -> CoreResult<T> {
    let tx = conn.unchecked_transaction().storage("db_tx_failed")?;
    match f(&*tx) {
        Ok(v) => {
            tx.commit().storage("db_commit_failed")?;
            Ok(v)
        }
        Err(e) => {
            let _ = tx.rollback();
            Err(e)
        }
    }
}

pub fn required_str(params: &serde_json::Value, key: &str) -> CoreResult<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::validation(format!("missing {}", key)))
}

pub fn optional_trimester(params: &serde_json::Value) -> CoreResult<Option<i64>> {
    match params.get("trimester") {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => match v.as_i64() {
            Some(t) if (1..=MAX_TRIMESTER).contains(&t) => Ok(Some(t)),
            _ => Err(CoreError::validation(format!(
                "trimester must be an integer between 1 and {}",
                MAX_TRIMESTER
            ))),
        },
    }
}

pub fn required_trimester(params: &serde_json::Value) -> CoreResult<i64> {
    optional_trimester(params)?.ok_or_else(|| CoreError::validation("missing trimester"))
}

pub fn required_positive(params: &serde_json::Value, key: &str) -> CoreResult<i64> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .filter(|n| *n >= 1)
        .ok_or_else(|| CoreError::validation(format!("{} must be a positive integer", key)))
}
