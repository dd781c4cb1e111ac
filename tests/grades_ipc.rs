use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_bulletind");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn bulletind");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request_ok(
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
    value["result"].clone()
}

/// Workspace with one student and one 80h subject, returning both ids.
fn seed_case(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> (String, String) {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student = request_ok(
        stdin,
        reader,
        "seed-st",
        "students.create",
        json!({ "name": "Grade Case", "registrationNumber": "GRD-1" }),
    );
    let subject = request_ok(
        stdin,
        reader,
        "seed-sub",
        "subjects.create",
        json!({ "name": "Test Bench", "code": "TST001", "workload": 80 }),
    );
    (
        student["student"]["id"].as_str().expect("id").to_string(),
        subject["subject"]["id"].as_str().expect("id").to_string(),
    )
}

#[test]
fn evaluation_rides_along_with_every_row() {
    let workspace = temp_dir("bulletin-grades-eval");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (student_id, subject_id) = seed_case(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.create",
        json!({
            "studentId": student_id,
            "subjectId": subject_id,
            "grade1": 80.0,
            "grade2": 70.0,
            "grade3": 90.0,
            "absences": 5
        }),
    );
    let grade = &created["grade"];
    let eval = &grade["evaluation"];
    assert_eq!(eval["finalGrade"].as_f64(), Some(80.0));
    assert!((eval["absencePercentage"].as_f64().expect("pct") - 6.25).abs() < 1e-9);
    assert_eq!(eval["status"].as_str(), Some("approved"));
    assert!(eval.get("failureReasons").is_none());

    let grade_id = grade["id"].as_str().expect("grade id").to_string();

    // Blowing the absence cap flips the status without touching scores.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.update",
        json!({ "gradeId": grade_id, "absences": 25 }),
    );
    let eval = &updated["grade"]["evaluation"];
    assert_eq!(eval["status"].as_str(), Some("failed"));
    assert_eq!(
        eval["failureReasons"],
        json!(["excessiveAbsences"]),
        "single failing reason is reported"
    );
    assert_eq!(eval["finalGrade"].as_f64(), Some(80.0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn null_clears_a_score_and_absent_key_keeps_it() {
    let workspace = temp_dir("bulletin-grades-patch");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (student_id, subject_id) = seed_case(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.create",
        json!({
            "studentId": student_id,
            "subjectId": subject_id,
            "grade1": 40.0,
            "grade2": 80.0
        }),
    );
    let grade_id = created["grade"]["id"].as_str().expect("id").to_string();
    assert_eq!(
        created["grade"]["evaluation"]["finalGrade"].as_f64(),
        Some(60.0),
        "missing third score is excluded from the mean"
    );

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.update",
        json!({ "gradeId": grade_id, "grade2": null }),
    );
    let grade = &updated["grade"];
    assert!(grade["grade2"].is_null());
    assert_eq!(grade["grade1"].as_f64(), Some(40.0), "untouched score kept");
    assert_eq!(grade["evaluation"]["finalGrade"].as_f64(), Some(40.0));
    assert_eq!(grade["evaluation"]["status"].as_str(), Some("failed"));
    assert_eq!(
        grade["evaluation"]["failureReasons"],
        json!(["insufficientGrade"])
    );

    // Clearing every score puts the row back to pending.
    let pending = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.update",
        json!({ "gradeId": grade_id, "grade1": null }),
    );
    assert_eq!(
        pending["grade"]["evaluation"]["status"].as_str(),
        Some("pending")
    );
    assert!(pending["grade"]["evaluation"]["finalGrade"].is_null());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn pair_uniqueness_and_validation() {
    let workspace = temp_dir("bulletin-grades-validation");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (student_id, subject_id) = seed_case(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.create",
        json!({ "studentId": student_id, "subjectId": subject_id }),
    );
    let dup = request(
        &mut stdin,
        &mut reader,
        "2",
        "grades.create",
        json!({ "studentId": student_id, "subjectId": subject_id }),
    );
    assert_eq!(dup["error"]["code"].as_str(), Some("conflict"));

    let out_of_range = request(
        &mut stdin,
        &mut reader,
        "3",
        "grades.create",
        json!({ "studentId": student_id, "subjectId": "missing", "grade1": 101.0 }),
    );
    assert_eq!(out_of_range["error"]["code"].as_str(), Some("bad_params"));

    let no_subject = request(
        &mut stdin,
        &mut reader,
        "4",
        "grades.create",
        json!({ "studentId": student_id, "subjectId": "missing" }),
    );
    assert_eq!(no_subject["error"]["code"].as_str(), Some("not_found"));

    let negative = request(
        &mut stdin,
        &mut reader,
        "5",
        "grades.create",
        json!({ "studentId": student_id, "subjectId": subject_id, "absences": -1 }),
    );
    assert_eq!(negative["error"]["code"].as_str(), Some("bad_params"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn list_filters_by_student_and_subject() {
    let workspace = temp_dir("bulletin-grades-filters");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (student_id, subject_id) = seed_case(&mut stdin, &mut reader, &workspace);

    let other = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        json!({ "name": "Other Kid", "registrationNumber": "GRD-2" }),
    );
    let other_id = other["student"]["id"].as_str().expect("id").to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.create",
        json!({ "studentId": student_id, "subjectId": subject_id, "grade1": 55.0 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.create",
        json!({ "studentId": other_id, "subjectId": subject_id, "grade1": 65.0 }),
    );

    let all = request_ok(&mut stdin, &mut reader, "4", "grades.list", json!({}));
    assert_eq!(all["grades"].as_array().map(|g| g.len()), Some(2));

    let one = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "grades.list",
        json!({ "studentId": student_id }),
    );
    let rows = one["grades"].as_array().expect("grades array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["studentName"].as_str(), Some("Grade Case"));
    assert_eq!(rows[0]["subjectName"].as_str(), Some("Test Bench"));

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "grades.delete",
        json!({ "gradeId": rows[0]["id"].as_str().expect("id") }),
    );
    assert_eq!(deleted["deleted"].as_bool(), Some(true));

    let gone = request(
        &mut stdin,
        &mut reader,
        "7",
        "grades.delete",
        json!({ "gradeId": rows[0]["id"].as_str().expect("id") }),
    );
    assert_eq!(gone["error"]["code"].as_str(), Some("not_found"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn dashboard_recomputes_statuses_from_rows() {
    let workspace = temp_dir("bulletin-dashboard");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (student_id, subject_id) = seed_case(&mut stdin, &mut reader, &workspace);

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "subjects.create",
        json!({ "name": "Second Bench", "code": "TST002", "workload": 40 }),
    );
    let second_id = second["subject"]["id"].as_str().expect("id").to_string();
    let third = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "subjects.create",
        json!({ "name": "Third Bench", "code": "TST003", "workload": 40 }),
    );
    let third_id = third["subject"]["id"].as_str().expect("id").to_string();

    // approved, failed, pending
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.create",
        json!({ "studentId": student_id, "subjectId": subject_id, "grade1": 90.0 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.create",
        json!({ "studentId": student_id, "subjectId": second_id, "grade1": 10.0 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "grades.create",
        json!({ "studentId": student_id, "subjectId": third_id }),
    );

    let stats = request_ok(&mut stdin, &mut reader, "6", "dashboard.stats", json!({}));
    assert_eq!(stats["studentCount"].as_i64(), Some(1));
    assert_eq!(stats["subjectCount"].as_i64(), Some(9), "6 seeded + 3 created");
    assert_eq!(stats["gradeCount"].as_i64(), Some(3));
    assert_eq!(stats["approvedCount"].as_i64(), Some(1));
    assert_eq!(stats["failedCount"].as_i64(), Some(1));
    assert_eq!(stats["pendingCount"].as_i64(), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
