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

#[test]
fn model_carries_every_status_family() {
    let workspace = temp_dir("bulletin-model");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "st",
        "students.create",
        json!({ "name": "Joao Pereira", "registrationNumber": "2026-042" }),
    );
    let student_id = student["student"]["id"].as_str().expect("id").to_string();

    // Four 80h subjects named so the rendered order is known upfront.
    let mut subject_ids = Vec::new();
    for (i, (name, code)) in [
        ("A Approved Subject", "AAA001"),
        ("B Failed By Grade", "BBB001"),
        ("C Failed By Both", "CCC001"),
        ("D Pending Subject", "DDD001"),
    ]
    .iter()
    .enumerate()
    {
        let created = request_ok(
            &mut stdin,
            &mut reader,
            &format!("sub{}", i),
            "subjects.create",
            json!({ "name": name, "code": code, "workload": 80 }),
        );
        subject_ids.push(created["subject"]["id"].as_str().expect("id").to_string());
    }

    let cases = [
        json!({ "studentId": student_id, "subjectId": subject_ids[0],
                "grade1": 80.0, "grade2": 70.0, "grade3": 90.0, "absences": 5 }),
        json!({ "studentId": student_id, "subjectId": subject_ids[1],
                "grade1": 30.0, "grade2": 40.0, "absences": 2 }),
        json!({ "studentId": student_id, "subjectId": subject_ids[2],
                "grade1": 20.0, "absences": 30 }),
        json!({ "studentId": student_id, "subjectId": subject_ids[3] }),
    ];
    for (i, params) in cases.iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("g{}", i),
            "grades.create",
            params.clone(),
        );
    }

    let model = request_ok(
        &mut stdin,
        &mut reader,
        "m",
        "bulletin.model",
        json!({ "studentId": student_id, "issueDate": "2026-08-29" }),
    );

    assert_eq!(model["student"]["name"].as_str(), Some("Joao Pereira"));
    assert_eq!(
        model["student"]["registrationNumber"].as_str(),
        Some("2026-042")
    );
    assert_eq!(model["issueDate"].as_str(), Some("2026-08-29"));

    let rows = model["rows"].as_array().expect("rows array");
    assert_eq!(rows.len(), 4);

    assert_eq!(rows[0]["subjectName"].as_str(), Some("A Approved Subject"));
    assert_eq!(rows[0]["statusLabel"].as_str(), Some("Approved"));
    assert_eq!(rows[0]["evaluation"]["finalGrade"].as_f64(), Some(80.0));

    assert_eq!(rows[1]["statusLabel"].as_str(), Some("Failed (Grade)"));
    assert_eq!(rows[1]["evaluation"]["finalGrade"].as_f64(), Some(35.0));

    assert_eq!(
        rows[2]["statusLabel"].as_str(),
        Some("Failed (Grade, Absences)")
    );
    assert!(
        (rows[2]["evaluation"]["absencePercentage"]
            .as_f64()
            .expect("pct")
            - 37.5)
            .abs()
            < 1e-9
    );

    assert_eq!(rows[3]["statusLabel"].as_str(), Some("Pending"));
    assert!(rows[3]["evaluation"]["finalGrade"].is_null());
    assert!(rows[3]["grade1"].is_null());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn model_rejects_unknown_students_and_bad_dates() {
    let workspace = temp_dir("bulletin-model-errors");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let missing = request(
        &mut stdin,
        &mut reader,
        "1",
        "bulletin.model",
        json!({ "studentId": "nope" }),
    );
    assert_eq!(missing["error"]["code"].as_str(), Some("not_found"));

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "name": "Date Case", "registrationNumber": "DTE-1" }),
    );
    let student_id = student["student"]["id"].as_str().expect("id").to_string();

    let bad_date = request(
        &mut stdin,
        &mut reader,
        "3",
        "bulletin.model",
        json!({ "studentId": student_id, "issueDate": "29/08/2026" }),
    );
    assert_eq!(bad_date["error"]["code"].as_str(), Some("bad_params"));

    // A student with no grades still gets a model, just an empty table.
    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "bulletin.model",
        json!({ "studentId": student_id, "issueDate": "2026-08-29" }),
    );
    assert_eq!(empty["rows"].as_array().map(|r| r.len()), Some(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
