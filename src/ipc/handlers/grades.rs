use crate::db;
use crate::eval;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const ABSENCES_MAX: i64 = 200;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn bad_params(message: impl Into<String>) -> HandlerErr {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    fn not_found(message: impl Into<String>) -> HandlerErr {
        HandlerErr {
            code: "not_found",
            message: message.into(),
            details: None,
        }
    }

    fn db(code: &'static str, e: rusqlite::Error) -> HandlerErr {
        HandlerErr {
            code,
            message: e.to_string(),
            details: None,
        }
    }

    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let v = params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    if v.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(v)
}

/// Scores come in as numbers in [0, 100] or null/absent for "not
/// entered yet".
fn parse_score(params: &serde_json::Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let n = v
                .as_f64()
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key)))?;
            if !(0.0..=100.0).contains(&n) {
                return Err(HandlerErr::bad_params(format!(
                    "{} must be between 0 and 100",
                    key
                )));
            }
            Ok(Some(n))
        }
    }
}

fn parse_absences(params: &serde_json::Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let n = v
                .as_i64()
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key)))?;
            if !(0..=ABSENCES_MAX).contains(&n) {
                return Err(HandlerErr::bad_params(format!(
                    "{} must be between 0 and {}",
                    key, ABSENCES_MAX
                )));
            }
            Ok(Some(n))
        }
    }
}

fn grade_row_json(conn: &Connection, grade_id: &str) -> Result<serde_json::Value, HandlerErr> {
    let row = conn
        .query_row(
            "SELECT g.id, g.student_id, st.name, g.subject_id, sub.name, sub.workload,
                    g.grade_1, g.grade_2, g.grade_3, g.absences, g.created_at, g.updated_at
             FROM grades g
             JOIN students st ON st.id = g.student_id
             JOIN subjects sub ON sub.id = g.subject_id
             WHERE g.id = ?",
            [grade_id],
            |r| {
                let grade_1: Option<f64> = r.get(6)?;
                let grade_2: Option<f64> = r.get(7)?;
                let grade_3: Option<f64> = r.get(8)?;
                let absences: i64 = r.get(9)?;
                let workload: i64 = r.get(5)?;
                let evaluation = eval::evaluate([grade_1, grade_2, grade_3], absences, workload);
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "studentId": r.get::<_, String>(1)?,
                    "studentName": r.get::<_, String>(2)?,
                    "subjectId": r.get::<_, String>(3)?,
                    "subjectName": r.get::<_, String>(4)?,
                    "workload": workload,
                    "grade1": grade_1,
                    "grade2": grade_2,
                    "grade3": grade_3,
                    "absences": absences,
                    "createdAt": r.get::<_, String>(10)?,
                    "updatedAt": r.get::<_, String>(11)?,
                    "evaluation": evaluation,
                }))
            },
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    row.ok_or_else(|| HandlerErr::not_found("grade not found"))
}

fn grades_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_filter = params
        .get("studentId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let subject_filter = params
        .get("subjectId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let mut stmt = conn
        .prepare(
            "SELECT g.id, g.student_id, st.name, g.subject_id, sub.name, sub.workload,
                    g.grade_1, g.grade_2, g.grade_3, g.absences, g.created_at, g.updated_at
             FROM grades g
             JOIN students st ON st.id = g.student_id
             JOIN subjects sub ON sub.id = g.subject_id
             WHERE (?1 IS NULL OR g.student_id = ?1)
               AND (?2 IS NULL OR g.subject_id = ?2)
             ORDER BY st.name, sub.name",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let grades = stmt
        .query_map((&student_filter, &subject_filter), |r| {
            let grade_1: Option<f64> = r.get(6)?;
            let grade_2: Option<f64> = r.get(7)?;
            let grade_3: Option<f64> = r.get(8)?;
            let absences: i64 = r.get(9)?;
            let workload: i64 = r.get(5)?;
            let evaluation = eval::evaluate([grade_1, grade_2, grade_3], absences, workload);
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "studentName": r.get::<_, String>(2)?,
                "subjectId": r.get::<_, String>(3)?,
                "subjectName": r.get::<_, String>(4)?,
                "workload": workload,
                "grade1": grade_1,
                "grade2": grade_2,
                "grade3": grade_3,
                "absences": absences,
                "createdAt": r.get::<_, String>(10)?,
                "updatedAt": r.get::<_, String>(11)?,
                "evaluation": evaluation,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    Ok(json!({ "grades": grades }))
}

fn grades_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let grade_1 = parse_score(params, "grade1")?;
    let grade_2 = parse_score(params, "grade2")?;
    let grade_3 = parse_score(params, "grade3")?;
    let absences = parse_absences(params, "absences")?.unwrap_or(0);

    let student_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if student_exists.is_none() {
        return Err(HandlerErr::not_found("student not found"));
    }
    let subject_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if subject_exists.is_none() {
        return Err(HandlerErr::not_found("subject not found"));
    }

    let pair_exists: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM grades WHERE student_id = ? AND subject_id = ?",
            (&student_id, &subject_id),
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if pair_exists > 0 {
        return Err(HandlerErr {
            code: "conflict",
            message: "a grade already exists for this student and subject".to_string(),
            details: Some(json!({ "studentId": student_id, "subjectId": subject_id })),
        });
    }

    let grade_id = Uuid::new_v4().to_string();
    let now = db::now_rfc3339();
    conn.execute(
        "INSERT INTO grades(id, student_id, subject_id, grade_1, grade_2, grade_3, absences,
                            created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &grade_id,
            &student_id,
            &subject_id,
            grade_1,
            grade_2,
            grade_3,
            absences,
            &now,
            &now,
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;

    grade_row_json(conn, &grade_id).map(|g| json!({ "grade": g }))
}

fn grades_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let grade_id = get_required_str(params, "gradeId")?;

    let current: Option<(Option<f64>, Option<f64>, Option<f64>, i64)> = conn
        .query_row(
            "SELECT grade_1, grade_2, grade_3, absences FROM grades WHERE id = ?",
            [&grade_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((cur_1, cur_2, cur_3, cur_absences)) = current else {
        return Err(HandlerErr::not_found("grade not found"));
    };

    // Absent key keeps the stored value; explicit null clears a score.
    let grade_1 = if params.get("grade1").is_some() {
        parse_score(params, "grade1")?
    } else {
        cur_1
    };
    let grade_2 = if params.get("grade2").is_some() {
        parse_score(params, "grade2")?
    } else {
        cur_2
    };
    let grade_3 = if params.get("grade3").is_some() {
        parse_score(params, "grade3")?
    } else {
        cur_3
    };
    let absences = parse_absences(params, "absences")?.unwrap_or(cur_absences);

    conn.execute(
        "UPDATE grades SET grade_1 = ?, grade_2 = ?, grade_3 = ?, absences = ?, updated_at = ?
         WHERE id = ?",
        (grade_1, grade_2, grade_3, absences, db::now_rfc3339(), &grade_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;

    grade_row_json(conn, &grade_id).map(|g| json!({ "grade": g }))
}

fn grades_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let grade_id = get_required_str(params, "gradeId")?;
    let deleted = conn
        .execute("DELETE FROM grades WHERE id = ?", [&grade_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if deleted == 0 {
        return Err(HandlerErr::not_found("grade not found"));
    }
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let run = |f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
               state: &AppState| {
        let Some(conn) = state.db.as_ref() else {
            return err(&req.id, "no_workspace", "select a workspace first", None);
        };
        match f(conn, &req.params) {
            Ok(result) => ok(&req.id, result),
            Err(e) => e.response(&req.id),
        }
    };

    match req.method.as_str() {
        "grades.list" => Some(run(grades_list, state)),
        "grades.create" => Some(run(grades_create, state)),
        "grades.update" => Some(run(grades_update, state)),
        "grades.delete" => Some(run(grades_delete, state)),
        _ => None,
    }
}
