use crate::error::CoreError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Maps a core failure onto the error envelope. Storage details stay in the log.
pub fn core_err(id: &str, e: &CoreError) -> serde_json::Value {
    match e {
        CoreError::Storage { action, source } => {
            tracing::error!(request_id = id, action, error = %source, "storage failure");
            err(id, action, "storage failure; nothing was changed", None)
        }
        CoreError::NotFound { .. } => err(id, e.code(), "not found", e.details()),
        _ => err(id, e.code(), e.to_string(), e.details()),
    }
}
