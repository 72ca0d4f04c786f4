#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const PROFESSOR: &str = "prof-1";

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_lancenotasd");
    let mut child = Command::new(exe)
        .env_remove("LANCENOTAS_WORKSPACE")
        .env("LANCENOTAS_LOG", "off")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn lancenotasd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(json!({}))
}

/// A running daemon with an open workspace and a default viewing context.
pub struct Sidecar {
    pub workspace: PathBuf,
    pub today: String,
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    pub fn start(prefix: &str, today: &str) -> Self {
        let workspace = temp_dir(prefix);
        let (child, mut stdin, mut reader) = spawn_sidecar();
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "0",
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        Self {
            workspace,
            today: today.to_string(),
            child,
            stdin,
            reader,
            next_id: 1,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.workspace.join("lancenotas.sqlite3")
    }

    pub fn db(&self) -> rusqlite::Connection {
        open_db_file(&self.db_path())
    }

    /// Sends `params` untouched.
    pub fn raw(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let id = self.next_id.to_string();
        self.next_id += 1;
        request(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    /// Adds `professorId` and `today` unless `params` already sets them.
    pub fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let mut params = if params.is_object() { params } else { json!({}) };
        if params.get("professorId").is_none() {
            params["professorId"] = json!(PROFESSOR);
        }
        if params.get("today").is_none() {
            params["today"] = json!(self.today.clone());
        }
        self.raw(method, params)
    }

    pub fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.call(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or(json!({}))
    }

    /// Expects a failure and returns its `error` object.
    pub fn fail(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.call(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value.get("error").cloned().expect("error object")
    }

    pub fn create_class(&mut self, grade: &str, letter: &str, subject: &str) -> String {
        let res = self.ok(
            "classes.create",
            json!({
                "gradeLevel": grade,
                "sectionLetter": letter,
                "subject": subject,
                "academicYear": 2026
            }),
        );
        str_at(&res, "/class/id")
    }

    /// Imports `names` with call numbers 1..n and returns their roster entry ids.
    pub fn import_students(&mut self, class_id: &str, names: &[&str]) -> Vec<String> {
        let students: Vec<serde_json::Value> = names
            .iter()
            .enumerate()
            .map(|(i, n)| json!({ "fullName": n, "callNumber": i as i64 + 1 }))
            .collect();
        let _ = self.ok(
            "roster.import",
            json!({ "classId": class_id, "students": students }),
        );
        let list = self.ok("roster.list", json!({ "classId": class_id }));
        let rows = list["students"].as_array().expect("students").clone();
        names
            .iter()
            .map(|n| {
                rows.iter()
                    .find(|r| r["fullName"] == json!(n))
                    .and_then(|r| r["rosterEntryId"].as_str())
                    .expect("imported roster entry")
                    .to_string()
            })
            .collect()
    }

    pub fn create_assignment(
        &mut self,
        class_id: &str,
        title: &str,
        trimester: i64,
        weight: f64,
        dates: &[Option<&str>],
    ) -> String {
        let res = self.ok(
            "assignments.create",
            json!({
                "classId": class_id,
                "title": title,
                "trimester": trimester,
                "weight": weight,
                "plannedLessons": dates.len().max(1),
                "lessonDates": dates,
            }),
        );
        str_at(&res, "/assignment/id")
    }

    pub fn save(
        &mut self,
        class_id: &str,
        assignment_id: &str,
        lesson: i64,
        entries: serde_json::Value,
    ) -> serde_json::Value {
        self.ok(
            "grades.save",
            json!({
                "classId": class_id,
                "assignmentId": assignment_id,
                "lesson": lesson,
                "entries": entries,
            }),
        )
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn open_db_file(path: &Path) -> rusqlite::Connection {
    rusqlite::Connection::open(path).expect("open sqlite file")
}

pub fn str_at(v: &serde_json::Value, pointer: &str) -> String {
    v.pointer(pointer)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing string at {} in {}", pointer, v))
        .to_string()
}

pub fn f64_at(v: &serde_json::Value, pointer: &str) -> Option<f64> {
    v.pointer(pointer).and_then(|x| x.as_f64())
}

/// Row of `calc.classAverages` for one roster entry.
pub fn average_row<'a>(model: &'a serde_json::Value, roster_entry_id: &str) -> &'a serde_json::Value {
    model["students"]
        .as_array()
        .and_then(|rows| {
            rows.iter()
                .find(|r| r["rosterEntryId"] == json!(roster_entry_id))
        })
        .unwrap_or_else(|| panic!("no averages row for {}", roster_entry_id))
}
