mod test_support;

use serde_json::json;
use test_support::{average_row, f64_at, Sidecar};

fn student_average(model: &serde_json::Value, roster_entry_id: &str) -> Option<f64> {
    model["students"]
        .as_array()
        .and_then(|rows| rows.iter().find(|r| r["rosterEntryId"] == json!(roster_entry_id)))
        .and_then(|r| r["average"].as_f64())
}

#[test]
fn exemption_leaves_denominator_and_missing_grades_count_as_zero() {
    let mut sc = Sidecar::start("lancenotas-avg-exempt", "2026-05-10");
    let class_id = sc.create_class("7º", "A", "Matemática");
    let ids = sc.import_students(&class_id, &["Ana", "Bruno", "Carla"]);
    let (ana, bruno, carla) = (&ids[0], &ids[1], &ids[2]);

    let prova = sc.create_assignment(
        &class_id,
        "Prova",
        1,
        1.0,
        &[Some("2026-03-01"), Some("2026-03-08")],
    );
    sc.save(&class_id, &prova, 1, json!([
        { "rosterEntryId": ana, "score": 8 },
        { "rosterEntryId": carla, "exempt": true }
    ]));
    sc.save(&class_id, &prova, 2, json!([
        { "rosterEntryId": ana, "score": "A" },
        { "rosterEntryId": carla, "exempt": true }
    ]));

    let model = sc.ok(
        "calc.assignmentAverages",
        json!({ "classId": class_id, "assignmentId": prova }),
    );
    assert_eq!(model["startedLessons"], 2);
    assert_eq!(student_average(&model, ana), Some(8.0));
    assert_eq!(student_average(&model, bruno), Some(0.0));
    assert_eq!(student_average(&model, carla), None);

    let ana_row = model["students"]
        .as_array()
        .and_then(|rows| rows.iter().find(|r| r["rosterEntryId"] == json!(ana)))
        .expect("ana row")
        .clone();
    assert_eq!(ana_row["countedLessons"], 1);
    assert_eq!(ana_row["exemptLessons"], 1);
    assert_eq!(ana_row["gradedLessons"], 1);
}

#[test]
fn three_due_lessons_without_entries_average_zero() {
    let mut sc = Sidecar::start("lancenotas-avg-zero", "2026-05-10");
    let class_id = sc.create_class("8º", "B", "História");
    let ids = sc.import_students(&class_id, &["Davi"]);
    let trabalho = sc.create_assignment(
        &class_id,
        "Trabalho",
        1,
        1.0,
        &[Some("2026-04-01"), Some("2026-04-02"), Some("2026-04-03")],
    );

    let model = sc.ok(
        "calc.assignmentAverages",
        json!({ "classId": class_id, "assignmentId": trabalho }),
    );
    assert_eq!(student_average(&model, &ids[0]), Some(0.0));
    assert_eq!(model["students"][0]["countedLessons"], 3);
}

#[test]
fn future_and_undated_lessons_only_count_once_something_is_recorded() {
    let mut sc = Sidecar::start("lancenotas-avg-eligibility", "2026-05-10");
    let class_id = sc.create_class("9º", "C", "Geografia");
    let ids = sc.import_students(&class_id, &["Eva", "Fábio"]);
    let seminario = sc.create_assignment(
        &class_id,
        "Seminário",
        2,
        1.0,
        &[Some("2026-09-01"), None],
    );

    let before = sc.ok(
        "calc.assignmentAverages",
        json!({ "classId": class_id, "assignmentId": seminario }),
    );
    assert_eq!(before["startedLessons"], 0);
    assert_eq!(student_average(&before, &ids[0]), None);

    sc.save(&class_id, &seminario, 1, json!([{ "rosterEntryId": ids[0], "score": "6,0" }]));

    let after = sc.ok(
        "calc.assignmentAverages",
        json!({ "classId": class_id, "assignmentId": seminario }),
    );
    assert_eq!(after["startedLessons"], 1);
    assert_eq!(after["slots"][0]["started"], true);
    assert_eq!(after["slots"][1]["started"], false);
    assert_eq!(student_average(&after, &ids[0]), Some(6.0));
    assert_eq!(student_average(&after, &ids[1]), Some(0.0));
}

#[test]
fn trimester_and_year_averages_are_weighted_and_skip_empty_trimesters() {
    let mut sc = Sidecar::start("lancenotas-avg-year", "2026-05-10");
    let class_id = sc.create_class("6º", "D", "Ciências");
    let ids = sc.import_students(&class_id, &["Gabi", "Hugo"]);
    let (gabi, hugo) = (&ids[0], &ids[1]);

    let prova = sc.create_assignment(&class_id, "Prova", 1, 1.0, &[Some("2026-03-01")]);
    let trabalho = sc.create_assignment(&class_id, "Trabalho", 1, 3.0, &[Some("2026-03-02")]);
    let quiz = sc.create_assignment(
        &class_id,
        "Quiz",
        3,
        1.0,
        &[Some("2026-04-01"), Some("2026-04-02"), Some("2026-04-03")],
    );
    // Trimester 2 has an assignment, but none of its lessons has started.
    let _ = sc.create_assignment(&class_id, "Projeto", 2, 1.0, &[Some("2026-12-01")]);

    sc.save(&class_id, &prova, 1, json!([{ "rosterEntryId": gabi, "score": 8 }]));
    sc.save(&class_id, &trabalho, 1, json!([
        { "rosterEntryId": gabi, "score": 0 },
        { "rosterEntryId": hugo, "score": 9 }
    ]));
    for (lesson, g, h) in [(1, 7.0, 7.0), (2, 8.0, 8.0), (3, 9.0, 8.0)] {
        sc.save(&class_id, &quiz, lesson, json!([
            { "rosterEntryId": gabi, "score": g },
            { "rosterEntryId": hugo, "score": h }
        ]));
    }

    let model = sc.ok("calc.classAverages", json!({ "classId": class_id }));
    let g = average_row(&model, gabi);
    // (8 * 1 + 0 * 3) / 4
    assert_eq!(f64_at(g, "/trimesters/0/average"), Some(2.0));
    assert_eq!(g["trimesters"][0]["source"], "live");
    assert!(g["trimesters"][1]["average"].is_null());
    assert_eq!(f64_at(g, "/trimesters/2/average"), Some(8.0));
    assert_eq!(f64_at(g, "/total"), Some(5.0));

    let h = average_row(&model, hugo);
    // (0 * 1 + 9 * 3) / 4
    assert_eq!(f64_at(h, "/trimesters/0/average"), Some(6.75));
    assert_eq!(f64_at(h, "/trimesters/2/average"), Some(7.67));
    assert_eq!(f64_at(h, "/total"), Some(7.21));
}

#[test]
fn grade_save_validates_and_blank_clears_the_entry() {
    let mut sc = Sidecar::start("lancenotas-grade-save", "2026-05-10");
    let class_id = sc.create_class("5º", "E", "Português");
    let ids = sc.import_students(&class_id, &["Iara"]);
    let prova = sc.create_assignment(&class_id, "Ditado", 1, 1.0, &[Some("2026-02-10")]);

    let e = sc.fail(
        "grades.save",
        json!({
            "classId": class_id,
            "assignmentId": prova,
            "lesson": 1,
            "entries": [{ "rosterEntryId": ids[0], "score": 11 }]
        }),
    );
    assert_eq!(e["code"], "bad_params");

    sc.save(&class_id, &prova, 1, json!([{ "rosterEntryId": ids[0], "score": "9,5", "note": "ótimo" }]));
    let sheet = sc.ok(
        "grades.get",
        json!({ "classId": class_id, "assignmentId": prova, "lesson": 1 }),
    );
    assert_eq!(f64_at(&sheet, "/rows/0/score"), Some(9.5));
    assert_eq!(sheet["rows"][0]["note"], "ótimo");

    let res = sc.save(&class_id, &prova, 1, json!([{ "rosterEntryId": ids[0], "score": "" }]));
    assert_eq!(res["cleared"], 1);
    let count: i64 = sc
        .db()
        .query_row("SELECT COUNT(*) FROM grade_entries", [], |r| r.get(0))
        .expect("count entries");
    assert_eq!(count, 0);

    let e = sc.fail(
        "grades.get",
        json!({ "classId": class_id, "assignmentId": prova, "lesson": 5 }),
    );
    assert_eq!(e["code"], "not_found");
}
