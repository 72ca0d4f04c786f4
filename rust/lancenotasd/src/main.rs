mod assignments;
mod calc;
mod classes;
mod closing;
mod config;
mod context;
mod dashboard;
mod db;
mod error;
mod grades;
mod ipc;
mod roster;
mod slots;
mod snapshots;
mod transfer;

use std::io::{self, BufRead, Write};
use tracing_subscriber::{fmt, prelude::*};

fn main() {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();
    let settings = config::Settings::from_env();

    // stdout carries the protocol, so logs go to stderr.
    let fmt = fmt::layer()
        .without_time()
        .with_target(false)
        .with_writer(io::stderr);
    tracing_subscriber::registry()
        .with(fmt)
        .with(settings.log_level)
        .init();

    let mut state = ipc::AppState::empty();
    if let Some(path) = settings.workspace.clone() {
        match db::open_db(&path) {
            Ok(conn) => {
                tracing::info!(workspace = %path.display(), "workspace opened from environment");
                state.workspace = Some(path);
                state.db = Some(conn);
            }
            Err(e) => {
                tracing::error!(workspace = %path.display(), error = ?e, "could not open workspace");
            }
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                tracing::warn!(error = %e, "malformed request line");
                let _ = writeln!(
                    stdout,
                    "{}",
                    serde_json::json!({
                        "ok": false,
                        "error": { "code": "bad_json", "message": e.to_string() }
                    })
                );
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
