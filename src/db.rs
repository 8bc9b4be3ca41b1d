use anyhow::{anyhow, Context};
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;

use crate::model::{CriterionSpec, ScoreMatrix, ScoreMode, StudentRecord, Subject, SubjectType};
use crate::skills::{SkillLevelSink, SkillWrite};

pub const DB_FILE_NAME: &str = "gradebook.sqlite3";

fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            grade TEXT NOT NULL,
            course TEXT,
            subject_type TEXT NOT NULL,
            adjust_point REAL,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS criteria(
            subject_id TEXT NOT NULL,
            idx INTEGER NOT NULL,
            name TEXT NOT NULL,
            percent REAL NOT NULL,
            mode TEXT NOT NULL,
            max REAL,
            PRIMARY KEY(subject_id, idx),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            grade TEXT NOT NULL,
            course_class TEXT NOT NULL,
            number INTEGER NOT NULL,
            name TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_grade ON students(grade)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS scores(
            subject_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            criterion_idx INTEGER NOT NULL,
            raw_text TEXT NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(subject_id, student_id, criterion_idx),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scores_subject ON scores(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS skill_levels(
            subject_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            level TEXT NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(subject_id, student_id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json, updated_at) VALUES(?, ?, ?)
         ON CONFLICT(key) DO UPDATE SET
           value_json = excluded.value_json,
           updated_at = excluded.updated_at",
        (key, serde_json::to_string(value)?, now_stamp()),
    )?;
    Ok(())
}

fn subject_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Subject> {
    let subject_type: String = r.get(4)?;
    Ok(Subject {
        id: r.get(0)?,
        name: r.get(1)?,
        grade: r.get(2)?,
        course: r.get(3)?,
        subject_type: SubjectType::parse_lenient(&subject_type),
        adjust_point: r.get(5)?,
    })
}

pub fn list_subjects(conn: &Connection) -> anyhow::Result<Vec<Subject>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, grade, course, subject_type, adjust_point
         FROM subjects
         ORDER BY grade, name",
    )?;
    let subjects = stmt
        .query_map([], subject_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(subjects)
}

pub fn get_subject(conn: &Connection, subject_id: &str) -> anyhow::Result<Option<Subject>> {
    let subject = conn
        .query_row(
            "SELECT id, name, grade, course, subject_type, adjust_point
             FROM subjects
             WHERE id = ?",
            [subject_id],
            subject_from_row,
        )
        .optional()?;
    Ok(subject)
}

/// Moves stored cells to follow their criterion by name after the criteria
/// sequence is replaced. The k-th old criterion with a given name maps to the
/// k-th new one; cells of criteria that no longer exist are deleted.
fn remap_scores(
    tx: &rusqlite::Transaction<'_>,
    subject_id: &str,
    old_names: &[String],
    criteria: &[CriterionSpec],
) -> anyhow::Result<()> {
    let mut new_slots: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, c) in criteria.iter().enumerate().rev() {
        new_slots.entry(c.name.as_str()).or_default().push(idx);
    }

    // Park every cell on a negative index so moves cannot collide.
    tx.execute(
        "UPDATE scores SET criterion_idx = -1 - criterion_idx WHERE subject_id = ?",
        [subject_id],
    )?;
    for (old_idx, name) in old_names.iter().enumerate() {
        let parked = -1 - old_idx as i64;
        match new_slots.get_mut(name.as_str()).and_then(|slots| slots.pop()) {
            Some(new_idx) => {
                tx.execute(
                    "UPDATE scores SET criterion_idx = ? WHERE subject_id = ? AND criterion_idx = ?",
                    (new_idx as i64, subject_id, parked),
                )?;
            }
            None => {
                tx.execute(
                    "DELETE FROM scores WHERE subject_id = ? AND criterion_idx = ?",
                    (subject_id, parked),
                )?;
            }
        }
    }
    let dropped = tx.execute(
        "DELETE FROM scores WHERE subject_id = ? AND criterion_idx < 0",
        [subject_id],
    )?;
    if dropped > 0 {
        tracing::debug!(subject = subject_id, dropped, "dropped cells without a criterion");
    }
    Ok(())
}

/// Replaces the subject row and its whole criteria sequence. Stored cells
/// follow their criterion by name.
pub fn upsert_subject(
    conn: &Connection,
    subject: &Subject,
    criteria: &[CriterionSpec],
) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO subjects(id, name, grade, course, subject_type, adjust_point, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           grade = excluded.grade,
           course = excluded.course,
           subject_type = excluded.subject_type,
           adjust_point = excluded.adjust_point,
           updated_at = excluded.updated_at",
        (
            &subject.id,
            &subject.name,
            &subject.grade,
            &subject.course,
            subject.subject_type.as_str(),
            subject.adjust_point,
            now_stamp(),
        ),
    )?;
    let old_names: Vec<String> = {
        let mut stmt = tx.prepare("SELECT name FROM criteria WHERE subject_id = ? ORDER BY idx")?;
        let names = stmt
            .query_map([&subject.id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        names
    };
    tx.execute("DELETE FROM criteria WHERE subject_id = ?", [&subject.id])?;
    for (idx, c) in criteria.iter().enumerate() {
        tx.execute(
            "INSERT INTO criteria(subject_id, idx, name, percent, mode, max)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &subject.id,
                idx as i64,
                &c.name,
                c.percent,
                c.mode.as_str(),
                c.max,
            ),
        )?;
    }
    remap_scores(&tx, &subject.id, &old_names, criteria)?;
    tx.commit()?;
    Ok(())
}

pub fn load_criteria(conn: &Connection, subject_id: &str) -> anyhow::Result<Vec<CriterionSpec>> {
    let mut stmt = conn.prepare(
        "SELECT name, percent, mode, max
         FROM criteria
         WHERE subject_id = ?
         ORDER BY idx",
    )?;
    let rows = stmt
        .query_map([subject_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, f64>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<f64>>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(name, percent, mode, max)| -> anyhow::Result<CriterionSpec> {
            let mode = ScoreMode::parse(&mode)?;
            CriterionSpec::new(name, percent, mode, max).map_err(|e| anyhow!(e))
        })
        .collect()
}

pub fn set_criterion_mode(
    conn: &Connection,
    subject_id: &str,
    idx: usize,
    mode: ScoreMode,
) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE criteria SET mode = ? WHERE subject_id = ? AND idx = ?",
        (mode.as_str(), subject_id, idx as i64),
    )?;
    Ok(changed > 0)
}

pub fn set_criterion_percent(
    conn: &Connection,
    subject_id: &str,
    idx: usize,
    percent: f64,
) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE criteria SET percent = ? WHERE subject_id = ? AND idx = ?",
        (percent, subject_id, idx as i64),
    )?;
    Ok(changed > 0)
}

pub fn upsert_students(conn: &Connection, students: &[StudentRecord]) -> anyhow::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let stamp = now_stamp();
    for s in students {
        tx.execute(
            "INSERT INTO students(id, grade, course_class, number, name, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               grade = excluded.grade,
               course_class = excluded.course_class,
               number = excluded.number,
               name = excluded.name,
               updated_at = excluded.updated_at",
            (
                &s.student_id,
                &s.grade,
                &s.course_class,
                s.number as i64,
                &s.name,
                &stamp,
            ),
        )?;
    }
    tx.commit()?;
    Ok(students.len())
}

pub fn list_students(conn: &Connection) -> anyhow::Result<Vec<StudentRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, grade, course_class, number, name
         FROM students
         ORDER BY grade, course_class, number, id",
    )?;
    let students = stmt
        .query_map([], |r| {
            Ok(StudentRecord {
                student_id: r.get(0)?,
                grade: r.get(1)?,
                course_class: r.get(2)?,
                number: r.get::<_, i64>(3)?.clamp(0, u32::MAX as i64) as u32,
                name: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(students)
}

/// Cells beyond `width` are not loaded.
pub fn load_score_matrix(
    conn: &Connection,
    subject_id: &str,
    width: usize,
) -> anyhow::Result<ScoreMatrix> {
    let mut stmt = conn.prepare(
        "SELECT student_id, criterion_idx, raw_text
         FROM scores
         WHERE subject_id = ?",
    )?;
    let rows = stmt
        .query_map([subject_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut matrix = ScoreMatrix::new(width);
    for (student_id, idx, raw_text) in rows {
        if idx < 0 {
            continue;
        }
        matrix.set(&student_id, idx as usize, raw_text);
    }
    Ok(matrix)
}

/// Blank text removes the stored cell.
pub fn save_score_row(
    conn: &Connection,
    subject_id: &str,
    student_id: &str,
    cells: &[String],
) -> anyhow::Result<()> {
    let stamp = now_stamp();
    for (idx, text) in cells.iter().enumerate() {
        if text.trim().is_empty() {
            conn.execute(
                "DELETE FROM scores WHERE subject_id = ? AND student_id = ? AND criterion_idx = ?",
                (subject_id, student_id, idx as i64),
            )?;
        } else {
            conn.execute(
                "INSERT INTO scores(subject_id, student_id, criterion_idx, raw_text, updated_at)
                 VALUES(?, ?, ?, ?, ?)
                 ON CONFLICT(subject_id, student_id, criterion_idx) DO UPDATE SET
                   raw_text = excluded.raw_text,
                   updated_at = excluded.updated_at",
                (subject_id, student_id, idx as i64, text, &stamp),
            )?;
        }
    }
    Ok(())
}

pub fn load_skill_levels(
    conn: &Connection,
    subject_id: &str,
) -> anyhow::Result<HashMap<String, String>> {
    let mut stmt =
        conn.prepare("SELECT student_id, level FROM skill_levels WHERE subject_id = ?")?;
    let levels = stmt
        .query_map([subject_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(levels)
}

pub fn set_skill_level(
    conn: &Connection,
    subject_id: &str,
    student_id: &str,
    level: Option<&str>,
) -> anyhow::Result<()> {
    match level {
        Some(level) => {
            conn.execute(
                "INSERT INTO skill_levels(subject_id, student_id, level, updated_at)
                 VALUES(?, ?, ?, ?)
                 ON CONFLICT(subject_id, student_id) DO UPDATE SET
                   level = excluded.level,
                   updated_at = excluded.updated_at",
                (subject_id, student_id, level, now_stamp()),
            )?;
        }
        None => {
            conn.execute(
                "DELETE FROM skill_levels WHERE subject_id = ? AND student_id = ?",
                (subject_id, student_id),
            )?;
        }
    }
    Ok(())
}

/// Skill-level sink backed by the workspace database.
pub struct DbSkillSink<'a>(pub &'a Connection);

impl SkillLevelSink for DbSkillSink<'_> {
    fn write(&mut self, write: &SkillWrite) -> anyhow::Result<()> {
        let value = write.value.trim();
        set_skill_level(
            self.0,
            &write.subject_id,
            &write.student_id,
            (!value.is_empty()).then_some(value),
        )
    }
}
