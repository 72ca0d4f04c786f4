mod test_support;

use serde_json::json;
use std::io::{BufRead, Write};
use test_support::{request, request_ok, spawn_sidecar, temp_dir, PROFESSOR};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("lancenotas-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["workspacePath"].is_null());

    let before = request(
        &mut stdin,
        &mut reader,
        "2",
        "classes.list",
        json!({ "professorId": PROFESSOR }),
    );
    assert_eq!(before["error"]["code"], "no_workspace");

    let unknown = request(&mut stdin, &mut reader, "3", "marks.export", json!({}));
    assert_eq!(unknown["error"]["code"], "not_implemented");

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush garbage");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json response");
    let bad: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response");
    assert_eq!(bad["ok"], false);
    assert_eq!(bad["error"]["code"], "bad_json");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let health = request_ok(&mut stdin, &mut reader, "5", "health", json!({}));
    assert_eq!(health["workspacePath"], json!(workspace.to_string_lossy()));

    let ctx = |mut extra: serde_json::Value| {
        extra["professorId"] = json!(PROFESSOR);
        extra["today"] = json!("2026-04-01");
        extra
    };
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "classes.create",
        ctx(json!({ "gradeLevel": "5º", "sectionLetter": "A", "subject": "Arte" })),
    );
    let class_id = created["class"]["id"].as_str().expect("class id").to_string();
    let class = |extra: serde_json::Value| {
        let mut p = ctx(extra);
        p["classId"] = json!(class_id);
        p
    };

    // Every family answers, successfully or with a domain error, never "unknown method".
    let calls = [
        ("settings.academicYears", ctx(json!({}))),
        ("classes.list", ctx(json!({}))),
        ("classes.update", class(json!({ "gradeLevel": "5º", "sectionLetter": "B", "subject": "Arte" }))),
        ("roster.import", class(json!({ "students": [{ "fullName": "Ana", "callNumber": 1 }] }))),
        ("roster.list", class(json!({}))),
        ("roster.transfer", class(json!({ "rosterEntryId": "x", "destinationClassId": "y", "trimester": 1 }))),
        ("assignments.create", class(json!({ "title": "Colagem" }))),
        ("assignments.list", class(json!({}))),
        ("assignments.configure", class(json!({ "assignmentId": "missing" }))),
        ("assignments.slots", class(json!({ "assignmentId": "missing" }))),
        ("grades.get", class(json!({ "assignmentId": "missing", "lesson": 1 }))),
        ("grades.save", class(json!({ "assignmentId": "missing", "lesson": 1, "entries": [] }))),
        ("calc.classAverages", class(json!({}))),
        ("calc.assignmentAverages", class(json!({ "assignmentId": "missing" }))),
        ("closing.status", class(json!({}))),
        ("closing.validate", class(json!({ "trimester": 1 }))),
        ("closing.close", class(json!({ "trimester": 3 }))),
        ("closing.reopen", class(json!({ "trimester": 2 }))),
        ("dashboard.summary", ctx(json!({}))),
        ("classes.delete", class(json!({}))),
    ];
    for (i, (method, params)) in calls.into_iter().enumerate() {
        let id = format!("f{}", i);
        let value = request(&mut stdin, &mut reader, &id, method, params);
        if value["ok"] == json!(false) {
            assert_ne!(
                value["error"]["code"], "not_implemented",
                "unexpected unknown method for {}",
                method
            );
        }
    }

    let _ = child.kill();
    let _ = child.wait();
}
