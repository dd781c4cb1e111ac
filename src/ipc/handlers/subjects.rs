use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const WORKLOAD_MIN: i64 = 1;
const WORKLOAD_MAX: i64 = 1000;

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

    fn db(code: &'static str, e: rusqlite::Error) -> HandlerErr {
        HandlerErr {
            code,
            message: e.to_string(),
            details: None,
        }
    }

    fn conflict(message: impl Into<String>, details: serde_json::Value) -> HandlerErr {
        HandlerErr {
            code: "conflict",
            message: message.into(),
            details: Some(details),
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

fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate_workload(workload: i64) -> Result<i64, HandlerErr> {
    if !(WORKLOAD_MIN..=WORKLOAD_MAX).contains(&workload) {
        return Err(HandlerErr::bad_params(format!(
            "workload must be between {} and {} hours",
            WORKLOAD_MIN, WORKLOAD_MAX
        )));
    }
    Ok(workload)
}

fn name_or_code_taken(
    conn: &Connection,
    name: &str,
    code: &str,
    exclude_id: Option<&str>,
) -> Result<Option<&'static str>, HandlerErr> {
    let name_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM subjects WHERE name = ? AND id != COALESCE(?, '')",
            (name, exclude_id),
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if name_count > 0 {
        return Ok(Some("name"));
    }
    let code_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM subjects WHERE code = ? AND id != COALESCE(?, '')",
            (code, exclude_id),
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if code_count > 0 {
        return Ok(Some("code"));
    }
    Ok(None)
}

fn subject_json(conn: &Connection, subject_id: &str) -> Result<serde_json::Value, HandlerErr> {
    let row = conn
        .query_row(
            "SELECT id, name, code, workload, teacher_name, created_at,
                    (SELECT COUNT(*) FROM grades g WHERE g.subject_id = subjects.id)
             FROM subjects WHERE id = ?",
            [subject_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "code": r.get::<_, String>(2)?,
                    "workload": r.get::<_, i64>(3)?,
                    "teacherName": r.get::<_, Option<String>>(4)?,
                    "createdAt": r.get::<_, String>(5)?,
                    "gradeCount": r.get::<_, i64>(6)?,
                }))
            },
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    row.ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "subject not found".to_string(),
        details: None,
    })
}

fn subjects_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, code, workload, teacher_name, created_at,
                    (SELECT COUNT(*) FROM grades g WHERE g.subject_id = subjects.id)
             FROM subjects
             ORDER BY name",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let subjects = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, String>(2)?,
                "workload": r.get::<_, i64>(3)?,
                "teacherName": r.get::<_, Option<String>>(4)?,
                "createdAt": r.get::<_, String>(5)?,
                "gradeCount": r.get::<_, i64>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    Ok(json!({ "subjects": subjects }))
}

fn subjects_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let code = get_required_str(params, "code")?;
    let workload = params
        .get("workload")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params("missing workload"))?;
    let workload = validate_workload(workload)?;
    let teacher_name = get_optional_str(params, "teacherName");

    if let Some(field) = name_or_code_taken(conn, &name, &code, None)? {
        return Err(HandlerErr::conflict(
            format!("subject {} already exists", field),
            json!({ "field": field }),
        ));
    }

    let subject_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, name, code, workload, teacher_name, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &subject_id,
            &name,
            &code,
            workload,
            &teacher_name,
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;

    subject_json(conn, &subject_id).map(|s| json!({ "subject": s }))
}

fn subjects_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let current = subject_json(conn, &subject_id)?;

    let name = get_optional_str(params, "name")
        .unwrap_or_else(|| current["name"].as_str().unwrap_or_default().to_string());
    let code = get_optional_str(params, "code")
        .unwrap_or_else(|| current["code"].as_str().unwrap_or_default().to_string());
    let workload = match params.get("workload") {
        None => current["workload"].as_i64().unwrap_or(WORKLOAD_MIN),
        Some(v) => validate_workload(
            v.as_i64()
                .ok_or_else(|| HandlerErr::bad_params("workload must be an integer"))?,
        )?,
    };
    let teacher_name = match params.get("teacherName") {
        None => current["teacherName"].as_str().map(|s| s.to_string()),
        Some(v) if v.is_null() => None,
        Some(_) => get_optional_str(params, "teacherName"),
    };

    if let Some(field) = name_or_code_taken(conn, &name, &code, Some(&subject_id))? {
        return Err(HandlerErr::conflict(
            format!("subject {} already exists", field),
            json!({ "field": field }),
        ));
    }

    conn.execute(
        "UPDATE subjects SET name = ?, code = ?, workload = ?, teacher_name = ? WHERE id = ?",
        (&name, &code, workload, &teacher_name, &subject_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;

    subject_json(conn, &subject_id).map(|s| json!({ "subject": s }))
}

fn subjects_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if exists.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "subject not found".to_string(),
            details: None,
        });
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let deleted_grades = tx
        .execute("DELETE FROM grades WHERE subject_id = ?", [&subject_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.execute("DELETE FROM subjects WHERE id = ?", [&subject_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    Ok(json!({ "deleted": true, "deletedGrades": deleted_grades }))
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
        "subjects.list" => Some(run(subjects_list, state)),
        "subjects.create" => Some(run(subjects_create, state)),
        "subjects.update" => Some(run(subjects_update, state)),
        "subjects.delete" => Some(run(subjects_delete, state)),
        _ => None,
    }
}
