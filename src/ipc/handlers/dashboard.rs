use crate::eval::{self, GradeStatus};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let count = |sql: &str| -> Result<i64, rusqlite::Error> {
        conn.query_row(sql, [], |r| r.get(0))
    };

    let student_count = match count("SELECT COUNT(*) FROM students") {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let subject_count = match count("SELECT COUNT(*) FROM subjects") {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let grade_count = match count("SELECT COUNT(*) FROM grades") {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Approval is recomputed per row; stored values are never trusted.
    let mut stmt = match conn.prepare(
        "SELECT g.grade_1, g.grade_2, g.grade_3, g.absences, sub.workload
         FROM grades g
         JOIN subjects sub ON sub.id = g.subject_id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, Option<f64>>(0)?,
                r.get::<_, Option<f64>>(1)?,
                r.get::<_, Option<f64>>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, i64>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut approved = 0_i64;
    let mut failed = 0_i64;
    let mut pending = 0_i64;
    for (g1, g2, g3, absences, workload) in rows {
        match eval::evaluate([g1, g2, g3], absences, workload).status {
            GradeStatus::Approved => approved += 1,
            GradeStatus::Failed => failed += 1,
            GradeStatus::Pending => pending += 1,
        }
    }

    ok(
        &req.id,
        json!({
            "studentCount": student_count,
            "subjectCount": subject_count,
            "gradeCount": grade_count,
            "approvedCount": approved,
            "failedCount": failed,
            "pendingCount": pending,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.stats" => Some(handle_stats(state, req)),
        _ => None,
    }
}
