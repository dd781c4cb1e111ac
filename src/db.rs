use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "bulletin.sqlite3";

/// Default subject catalog applied when a workspace opens. Seeding is
/// keyed on the subject code so repeated opens are no-ops.
const DEFAULT_SUBJECTS: [(&str, &str, i64); 6] = [
    ("Mathematics", "MAT001", 80),
    ("Portuguese", "POR001", 60),
    ("Biology", "BIO001", 60),
    ("Programming", "PRG001", 120),
    ("Databases", "BDA001", 80),
    ("Systems Analysis", "ANA001", 100),
];

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            registration_number TEXT NOT NULL UNIQUE,
            email TEXT,
            phone TEXT,
            course TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_name ON students(name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            code TEXT NOT NULL UNIQUE,
            workload INTEGER NOT NULL,
            teacher_name TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // Workspaces created before teachers were tracked per subject lack
    // the column. Add it; values stay NULL until edited.
    ensure_subjects_teacher_name(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            grade_1 REAL,
            grade_2 REAL,
            grade_3 REAL,
            absences INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(student_id, subject_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_subject ON grades(subject_id)",
        [],
    )?;

    // The final grade is always recomputed from the three scores at
    // read time; stored copies drifted across rule changes and are not
    // trusted. Drop the column from older workspaces.
    migrate_drop_stored_final_grade(&conn)?;

    Ok(conn)
}

pub fn seed_default_subjects(conn: &Connection) -> anyhow::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut created = 0;
    for (name, code, workload) in DEFAULT_SUBJECTS {
        let exists: i64 = tx.query_row(
            "SELECT COUNT(*) FROM subjects WHERE code = ?",
            [code],
            |r| r.get(0),
        )?;
        if exists > 0 {
            continue;
        }
        tx.execute(
            "INSERT INTO subjects(id, name, code, workload, teacher_name, created_at)
             VALUES(?, ?, ?, ?, NULL, ?)",
            (
                uuid::Uuid::new_v4().to_string(),
                name,
                code,
                workload,
                now_rfc3339(),
            ),
        )?;
        created += 1;
    }
    tx.commit()?;
    Ok(created)
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn ensure_subjects_teacher_name(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "subjects", "teacher_name")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE subjects ADD COLUMN teacher_name TEXT", [])?;
    Ok(())
}

fn migrate_drop_stored_final_grade(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "grades", "final_grade")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE grades DROP COLUMN final_grade", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
