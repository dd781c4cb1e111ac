use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const DEFAULT_COURSE: &str = "Systems Development Technician";

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

fn registration_taken(
    conn: &Connection,
    registration_number: &str,
    exclude_id: Option<&str>,
) -> Result<bool, HandlerErr> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM students WHERE registration_number = ? AND id != COALESCE(?, '')",
            (registration_number, exclude_id),
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(count > 0)
}

fn student_json(conn: &Connection, student_id: &str) -> Result<serde_json::Value, HandlerErr> {
    let row = conn
        .query_row(
            "SELECT id, name, registration_number, email, phone, course, created_at,
                    (SELECT COUNT(*) FROM grades g WHERE g.student_id = students.id)
             FROM students WHERE id = ?",
            [student_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "registrationNumber": r.get::<_, String>(2)?,
                    "email": r.get::<_, Option<String>>(3)?,
                    "phone": r.get::<_, Option<String>>(4)?,
                    "course": r.get::<_, String>(5)?,
                    "createdAt": r.get::<_, String>(6)?,
                    "gradeCount": r.get::<_, i64>(7)?,
                }))
            },
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    row.ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "student not found".to_string(),
        details: None,
    })
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let search = get_optional_str(params, "search");

    let sql = "SELECT id, name, registration_number, email, phone, course, created_at,
                      (SELECT COUNT(*) FROM grades g WHERE g.student_id = students.id)
               FROM students
               WHERE (?1 IS NULL OR name LIKE '%' || ?1 || '%'
                              OR registration_number LIKE '%' || ?1 || '%')
               ORDER BY name";
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let students = stmt
        .query_map([&search], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "registrationNumber": r.get::<_, String>(2)?,
                "email": r.get::<_, Option<String>>(3)?,
                "phone": r.get::<_, Option<String>>(4)?,
                "course": r.get::<_, String>(5)?,
                "createdAt": r.get::<_, String>(6)?,
                "gradeCount": r.get::<_, i64>(7)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    Ok(json!({ "students": students }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    if name.chars().count() < 2 {
        return Err(HandlerErr::bad_params("name must have at least 2 characters"));
    }
    let registration_number = get_required_str(params, "registrationNumber")?;
    let email = get_optional_str(params, "email");
    let phone = get_optional_str(params, "phone");
    let course = get_optional_str(params, "course").unwrap_or_else(|| DEFAULT_COURSE.to_string());

    if registration_taken(conn, &registration_number, None)? {
        return Err(HandlerErr {
            code: "conflict",
            message: "registration number already exists".to_string(),
            details: Some(json!({ "registrationNumber": registration_number })),
        });
    }

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, name, registration_number, email, phone, course, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &name,
            &registration_number,
            &email,
            &phone,
            &course,
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;

    student_json(conn, &student_id).map(|s| json!({ "student": s }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    // Reads current values first so partial updates keep the rest.
    let current = student_json(conn, &student_id)?;

    let name = get_optional_str(params, "name")
        .unwrap_or_else(|| current["name"].as_str().unwrap_or_default().to_string());
    if name.chars().count() < 2 {
        return Err(HandlerErr::bad_params("name must have at least 2 characters"));
    }
    let registration_number = get_optional_str(params, "registrationNumber").unwrap_or_else(|| {
        current["registrationNumber"]
            .as_str()
            .unwrap_or_default()
            .to_string()
    });
    let course = get_optional_str(params, "course")
        .unwrap_or_else(|| current["course"].as_str().unwrap_or_default().to_string());
    let email = match params.get("email") {
        None => current["email"].as_str().map(|s| s.to_string()),
        Some(v) if v.is_null() => None,
        Some(_) => get_optional_str(params, "email"),
    };
    let phone = match params.get("phone") {
        None => current["phone"].as_str().map(|s| s.to_string()),
        Some(v) if v.is_null() => None,
        Some(_) => get_optional_str(params, "phone"),
    };

    if registration_taken(conn, &registration_number, Some(&student_id))? {
        return Err(HandlerErr {
            code: "conflict",
            message: "registration number already exists".to_string(),
            details: Some(json!({ "registrationNumber": registration_number })),
        });
    }

    conn.execute(
        "UPDATE students SET name = ?, registration_number = ?, email = ?, phone = ?, course = ?
         WHERE id = ?",
        (&name, &registration_number, &email, &phone, &course, &student_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;

    student_json(conn, &student_id).map(|s| json!({ "student": s }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if exists.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    }

    // Explicit cascade in dependency order (no ON DELETE CASCADE).
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let deleted_grades = tx
        .execute("DELETE FROM grades WHERE student_id = ?", [&student_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.execute("DELETE FROM students WHERE id = ?", [&student_id])
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
        "students.list" => Some(run(students_list, state)),
        "students.create" => Some(run(students_create, state)),
        "students.update" => Some(run(students_update, state)),
        "students.delete" => Some(run(students_delete, state)),
        _ => None,
    }
}
