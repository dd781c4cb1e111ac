use std::io::Write;
use std::path::PathBuf;

use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::db;
use crate::eval;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::report;

const DEFAULT_COURSE: &str = "Systems Development Technician";

struct HandlerErr {
    code: &'static str,
    message: String,
}

impl HandlerErr {
    fn bad_params(message: impl Into<String>) -> HandlerErr {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
        }
    }

    fn io(message: impl Into<String>) -> HandlerErr {
        HandlerErr {
            code: "io_failed",
            message: message.into(),
        }
    }

    fn db(code: &'static str, e: rusqlite::Error) -> HandlerErr {
        HandlerErr {
            code,
            message: e.to_string(),
        }
    }
}

fn get_required_path(params: &serde_json::Value, key: &str) -> Result<PathBuf, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Splits one CSV record. Handles double-quoted fields with "" escapes;
/// no multi-line fields, which the roster files never use.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut field));
            }
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

fn csv_quote(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn looks_like_header(fields: &[String]) -> bool {
    fields
        .first()
        .map(|f| {
            let f = f.trim().to_ascii_lowercase();
            f == "name" || f == "student" || f == "student_name"
        })
        .unwrap_or(false)
}

fn students_import_csv(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let path = get_required_path(params, "path")?;
    let course = params
        .get("course")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_COURSE.to_string());

    let text = std::fs::read_to_string(&path)
        .map_err(|e| HandlerErr::io(format!("failed to read {}: {}", path.to_string_lossy(), e)))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    let mut imported = 0usize;
    let mut skipped = 0usize;
    let mut total = 0usize;
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_csv_line(line);
        if idx == 0 && looks_like_header(&fields) {
            continue;
        }
        total += 1;

        // Columns: name, registration_number, [email], [phone], [course]
        let name = fields.first().map(|f| f.trim()).unwrap_or("");
        let registration = fields.get(1).map(|f| f.trim()).unwrap_or("");
        if name.chars().count() < 2 || registration.is_empty() {
            skipped += 1;
            continue;
        }
        let email = fields.get(2).map(|f| f.trim()).filter(|f| !f.is_empty());
        let phone = fields.get(3).map(|f| f.trim()).filter(|f| !f.is_empty());
        let row_course = fields
            .get(4)
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .unwrap_or(course.as_str());

        let exists: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM students WHERE registration_number = ?",
                [registration],
                |r| r.get(0),
            )
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;
        if exists > 0 {
            skipped += 1;
            continue;
        }

        tx.execute(
            "INSERT INTO students(id, name, registration_number, email, phone, course, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                name,
                registration,
                email,
                phone,
                row_course,
                db::now_rfc3339(),
            ),
        )
        .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
        imported += 1;
    }

    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    Ok(json!({
        "imported": imported,
        "skipped": skipped,
        "total": total,
    }))
}

fn fmt_score(score: Option<f64>) -> String {
    match score {
        Some(v) => format!("{:.1}", v),
        None => String::new(),
    }
}

fn grades_export_csv(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let path = get_required_path(params, "path")?;

    let mut stmt = conn
        .prepare(
            "SELECT st.name, st.registration_number, sub.name, sub.code, sub.workload,
                    g.grade_1, g.grade_2, g.grade_3, g.absences
             FROM grades g
             JOIN students st ON st.id = g.student_id
             JOIN subjects sub ON sub.id = g.subject_id
             ORDER BY st.name, sub.name",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, i64>(4)?,
                r.get::<_, Option<f64>>(5)?,
                r.get::<_, Option<f64>>(6)?,
                r.get::<_, Option<f64>>(7)?,
                r.get::<_, i64>(8)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            HandlerErr::io(format!(
                "failed to create directory {}: {}",
                parent.to_string_lossy(),
                e
            ))
        })?;
    }
    let mut out = std::fs::File::create(&path).map_err(|e| {
        HandlerErr::io(format!("failed to create {}: {}", path.to_string_lossy(), e))
    })?;

    let mut buf = String::new();
    buf.push_str(
        "student,registration_number,subject,code,grade_1,grade_2,grade_3,final_grade,absences,absence_percentage,status\n",
    );
    let row_count = rows.len();
    for (student, registration, subject, code, workload, g1, g2, g3, absences) in rows {
        let evaluation = eval::evaluate([g1, g2, g3], absences, workload);
        buf.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{:.1},{}\n",
            csv_quote(&student),
            csv_quote(&registration),
            csv_quote(&subject),
            csv_quote(&code),
            fmt_score(g1),
            fmt_score(g2),
            fmt_score(g3),
            fmt_score(evaluation.final_grade),
            absences,
            evaluation.absence_percentage,
            csv_quote(&report::status_label(&evaluation)),
        ));
    }
    out.write_all(buf.as_bytes()).map_err(|e| {
        HandlerErr::io(format!("failed to write {}: {}", path.to_string_lossy(), e))
    })?;

    Ok(json!({
        "path": path.to_string_lossy(),
        "rowCount": row_count,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let run = |f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
               state: &AppState| {
        let Some(conn) = state.db.as_ref() else {
            return err(&req.id, "no_workspace", "select a workspace first", None);
        };
        match f(conn, &req.params) {
            Ok(result) => ok(&req.id, result),
            Err(e) => err(&req.id, e.code, e.message, None),
        }
    };

    match req.method.as_str() {
        "students.importCsv" => Some(run(students_import_csv, state)),
        "grades.exportCsv" => Some(run(grades_export_csv, state)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_quoted_fields() {
        let fields = split_csv_line(r#""Silva, Ana",2024001,ana@example.com"#);
        assert_eq!(fields, vec!["Silva, Ana", "2024001", "ana@example.com"]);
    }

    #[test]
    fn splits_escaped_quotes() {
        let fields = split_csv_line(r#""say ""hi""",X"#);
        assert_eq!(fields, vec![r#"say "hi""#, "X"]);
    }

    #[test]
    fn header_row_detected() {
        assert!(looks_like_header(&[
            "Name".to_string(),
            "Registration".to_string()
        ]));
        assert!(!looks_like_header(&[
            "Ana Silva".to_string(),
            "2024001".to_string()
        ]));
    }

    #[test]
    fn quotes_only_when_needed() {
        assert_eq!(csv_quote("plain"), "plain");
        assert_eq!(csv_quote("a,b"), "\"a,b\"");
        assert_eq!(csv_quote("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
