mod test_support;

use serde_json::json;
use test_support::{f64_at, str_at, Sidecar};

#[test]
fn summary_rolls_up_started_lessons_of_the_viewing_year() {
    let mut sc = Sidecar::start("lancenotas-dashboard", "2026-05-10");

    let class_a = sc.create_class("7º", "A", "Matemática");
    let in_a = sc.import_students(&class_a, &["Ana", "Bruno", "Caio"]);
    let prova = sc.create_assignment(&class_a, "Prova", 1, 1.0, &[Some("2026-03-01")]);
    sc.save(&class_a, &prova, 1, json!([
        { "rosterEntryId": in_a[0], "score": 6 },
        { "rosterEntryId": in_a[1], "score": 8 }
    ]));

    // The second lesson of B is still in the future and owes nothing yet.
    let class_b = sc.create_class("8º", "B", "Ciências");
    let in_b = sc.import_students(&class_b, &["Duda"]);
    let lista = sc.create_assignment(
        &class_b,
        "Lista",
        2,
        2.0,
        &[Some("2026-04-20"), Some("2026-06-01")],
    );
    sc.save(&class_b, &lista, 1, json!([{ "rosterEntryId": in_b[0], "score": "9,0" }]));

    let class_c = sc.create_class("9º", "C", "História");

    // Neither another year nor another professor leaks into the summary.
    let old = sc.ok(
        "classes.create",
        json!({ "gradeLevel": "7º", "sectionLetter": "A", "subject": "Matemática", "academicYear": 2025 }),
    );
    let old_class = str_at(&old, "/class/id");
    let old_students = sc.import_students(&old_class, &["Ana"]);
    let old_task = sc.create_assignment(&old_class, "Prova", 1, 1.0, &[Some("2025-03-01")]);
    sc.save(&old_class, &old_task, 1, json!([{ "rosterEntryId": old_students[0], "score": 1 }]));
    let _ = sc.ok(
        "classes.create",
        json!({ "professorId": "prof-2", "gradeLevel": "6º", "sectionLetter": "A", "subject": "Arte" }),
    );

    let summary = sc.ok("dashboard.summary", json!({}));
    assert_eq!(summary["academicYear"], 2026);
    assert_eq!(summary["classCount"], 3);
    assert_eq!(summary["activeStudents"], 4);
    assert_eq!(summary["pending"], 1);
    assert_eq!(summary["evaluated"], 3);
    assert_eq!(f64_at(&summary, "/average"), Some(5.75));

    let order: Vec<String> = summary["classes"]
        .as_array()
        .expect("classes")
        .iter()
        .map(|c| str_at(c, "/classId"))
        .collect();
    assert_eq!(order, vec![class_b.clone(), class_a.clone(), class_c.clone()]);

    let rows = summary["classes"].as_array().expect("classes");
    assert_eq!(f64_at(&rows[0], "/average"), Some(9.0));
    assert_eq!(rows[0]["pending"], 0);
    assert_eq!(f64_at(&rows[1], "/average"), Some(4.67));
    assert_eq!(rows[1]["pending"], 1);
    assert_eq!(rows[1]["evaluated"], 2);
    assert_eq!(rows[1]["activeStudents"], 3);
    assert!(rows[2]["average"].is_null());
    assert_eq!(rows[2]["activeStudents"], 0);

    let last_year = sc.ok("dashboard.summary", json!({ "academicYear": 2025 }));
    assert_eq!(last_year["classCount"], 1);
    assert_eq!(f64_at(&last_year, "/average"), Some(1.0));
}

#[test]
fn exemptions_leave_the_denominator() {
    let mut sc = Sidecar::start("lancenotas-dashboard-exempt", "2026-05-10");
    let class_id = sc.create_class("6º", "D", "Geografia");
    let students = sc.import_students(&class_id, &["Ana", "Bruno"]);
    let task = sc.create_assignment(&class_id, "Mapa", 1, 1.0, &[None]);

    let summary = sc.ok("dashboard.summary", json!({}));
    assert_eq!(summary["pending"], 0);
    assert!(summary["average"].is_null());

    // Recording anything starts the undated lesson for the whole roster.
    sc.save(&class_id, &task, 1, json!([
        { "rosterEntryId": students[0], "score": 7 },
        { "rosterEntryId": students[1], "exempt": true }
    ]));
    let summary = sc.ok("dashboard.summary", json!({}));
    assert_eq!(summary["pending"], 0);
    assert_eq!(summary["evaluated"], 1);
    assert_eq!(f64_at(&summary, "/average"), Some(7.0));
}
