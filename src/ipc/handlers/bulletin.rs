use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::report::{self, BulletinGrade, BulletinStudent, BulletinSubject};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::path::PathBuf;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn db(e: rusqlite::Error) -> HandlerErr {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }

    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

/// Optional fixed clock for the two date stamps; defaults to today.
fn parse_issue_date(params: &serde_json::Value) -> Result<NaiveDate, HandlerErr> {
    match params.get("issueDate").and_then(|v| v.as_str()) {
        None => Ok(chrono::Local::now().date_naive()),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| HandlerErr {
            code: "bad_params",
            message: format!("issueDate must be YYYY-MM-DD: {}", e),
            details: None,
        }),
    }
}

fn fetch_student(conn: &Connection, student_id: &str) -> Result<BulletinStudent, HandlerErr> {
    let row: Option<BulletinStudent> = conn
        .query_row(
            "SELECT name, registration_number, course FROM students WHERE id = ?",
            [student_id],
            |r| {
                Ok(BulletinStudent {
                    name: r.get(0)?,
                    registration_number: r.get(1)?,
                    course: r.get(2)?,
                })
            },
        )
        .optional()
        .map_err(HandlerErr::db)?;
    row.ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "student not found".to_string(),
        details: None,
    })
}

struct GradeRow {
    subject_id: String,
    subject_code: Option<String>,
    grade: BulletinGrade,
}

/// Grade rows in subject order. Every row must resolve its subject; a
/// dangling reference is a workspace integrity problem, not a row to
/// skip silently.
fn fetch_grade_rows(conn: &Connection, student_id: &str) -> Result<Vec<GradeRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT g.subject_id, sub.name, sub.code, sub.teacher_name, sub.workload,
                    g.grade_1, g.grade_2, g.grade_3, g.absences
             FROM grades g
             LEFT JOIN subjects sub ON sub.id = g.subject_id
             WHERE g.student_id = ?
             ORDER BY sub.name",
        )
        .map_err(HandlerErr::db)?;

    let raw = stmt
        .query_map([student_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, Option<String>>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, Option<i64>>(4)?,
                r.get::<_, Option<f64>>(5)?,
                r.get::<_, Option<f64>>(6)?,
                r.get::<_, Option<f64>>(7)?,
                r.get::<_, i64>(8)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut rows = Vec::with_capacity(raw.len());
    for (subject_id, name, code, teacher_name, workload, g1, g2, g3, absences) in raw {
        let (Some(name), Some(workload)) = (name, workload) else {
            return Err(HandlerErr {
                code: "integrity_error",
                message: "grade references a missing subject".to_string(),
                details: Some(json!({ "subjectId": subject_id })),
            });
        };
        rows.push(GradeRow {
            subject_id,
            subject_code: code,
            grade: BulletinGrade {
                grade_1: g1,
                grade_2: g2,
                grade_3: g3,
                absences,
                subject: BulletinSubject {
                    name,
                    teacher_name,
                    workload,
                },
            },
        });
    }
    Ok(rows)
}

fn bulletin_model(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let issue_date = parse_issue_date(params)?;
    let student = fetch_student(conn, &student_id)?;
    let rows = fetch_grade_rows(conn, &student_id)?;

    let row_models: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| {
            let evaluation = row.grade.evaluate();
            json!({
                "subjectId": row.subject_id,
                "subjectName": row.grade.subject.name,
                "subjectCode": row.subject_code,
                "teacherName": row.grade.subject.teacher_name,
                "workload": row.grade.subject.workload,
                "grade1": row.grade.grade_1,
                "grade2": row.grade.grade_2,
                "grade3": row.grade.grade_3,
                "absences": row.grade.absences,
                "statusLabel": report::status_label(&evaluation),
                "evaluation": evaluation,
            })
        })
        .collect();

    Ok(json!({
        "student": {
            "id": student_id,
            "name": student.name,
            "registrationNumber": student.registration_number,
            "course": student.course,
        },
        "issueDate": issue_date.format("%Y-%m-%d").to_string(),
        "rows": row_models,
    }))
}

fn bulletin_pdf(
    conn: &Connection,
    workspace: &std::path::Path,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let issue_date = parse_issue_date(params)?;
    let student = fetch_student(conn, &student_id)?;
    let rows = fetch_grade_rows(conn, &student_id)?;
    let grades: Vec<BulletinGrade> = rows.into_iter().map(|r| r.grade).collect();

    let bytes = report::render_bulletin(&student, &grades, issue_date);
    let file_name = report::suggested_file_name(&student);

    let out_path = match params.get("outPath").and_then(|v| v.as_str()) {
        Some(p) => PathBuf::from(p),
        None => workspace.join("exports").join(&file_name),
    };
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HandlerErr {
            code: "io_failed",
            message: format!("failed to create {}: {}", parent.to_string_lossy(), e),
            details: None,
        })?;
    }
    std::fs::write(&out_path, &bytes).map_err(|e| HandlerErr {
        code: "io_failed",
        message: format!("failed to write {}: {}", out_path.to_string_lossy(), e),
        details: None,
    })?;

    Ok(json!({
        "path": out_path.to_string_lossy(),
        "fileName": file_name,
        "contentType": report::BULLETIN_CONTENT_TYPE,
        "byteCount": bytes.len(),
        "gradeCount": grades.len(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "bulletin.model" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match bulletin_model(conn, &req.params) {
                Ok(result) => ok(&req.id, result),
                Err(e) => e.response(&req.id),
            })
        }
        "bulletin.pdf" => {
            let (Some(conn), Some(workspace)) = (state.db.as_ref(), state.workspace.as_ref())
            else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match bulletin_pdf(conn, workspace, &req.params) {
                Ok(result) => ok(&req.id, result),
                Err(e) => e.response(&req.id),
            })
        }
        _ => None,
    }
}
