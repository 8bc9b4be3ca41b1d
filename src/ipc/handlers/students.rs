use serde_json::{json, Value};
use std::collections::HashSet;

use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{require_db, require_str, SubjectContext};
use crate::ipc::types::{AppState, Request};
use crate::model::StudentRecord;
use crate::roster::sort_by_skill_level;

fn parse_students(v: Option<&Value>) -> Result<Vec<StudentRecord>, HandlerErr> {
    let Some(items) = v.and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("students must be an array"));
    };
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let mut s: StudentRecord = serde_json::from_value(item.clone()).map_err(|e| {
            HandlerErr::bad_params(format!("students[{}]: {}", idx, e))
        })?;
        s.student_id = s.student_id.trim().to_string();
        s.grade = s.grade.trim().to_string();
        s.course_class = s.course_class.trim().to_string();
        if s.student_id.is_empty() {
            return Err(HandlerErr::bad_params(format!("students[{}].studentId required", idx)));
        }
        if !seen.insert(s.student_id.clone()) {
            return Err(HandlerErr::bad_params("duplicate studentId")
                .with_details(json!({ "studentId": s.student_id })));
        }
        out.push(s);
    }
    Ok(out)
}

fn students_import(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let students = parse_students(req.params.get("students"))?;
    let imported =
        db::upsert_students(conn, &students).map_err(HandlerErr::db("db_update_failed"))?;
    tracing::info!(imported, "students imported");
    Ok(json!({ "imported": imported }))
}

fn students_list(state: &AppState) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let students = db::list_students(conn).map_err(HandlerErr::db("db_query_failed"))?;
    Ok(json!({ "students": students }))
}

fn roster_view(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let subject_id = require_str(req, "subjectId")?;
    let ctx = SubjectContext::load(conn, &subject_id)?;
    Ok(json!({ "subjectId": subject_id, "students": ctx.roster }))
}

fn roster_sort_by_skill(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let subject_id = require_str(req, "subjectId")?;
    let ctx = SubjectContext::load(conn, &subject_id)?;
    let levels =
        db::load_skill_levels(conn, &subject_id).map_err(HandlerErr::db("db_query_failed"))?;
    let sorted = sort_by_skill_level(&ctx.roster, &levels);
    let students: Vec<Value> = sorted
        .iter()
        .map(|s| {
            let mut v = json!(s);
            v["skillLevel"] = json!(levels.get(&s.student_id));
            v
        })
        .collect();
    Ok(json!({ "subjectId": subject_id, "students": students }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.import" => students_import(state, req),
        "students.list" => students_list(state),
        "roster.view" => roster_view(state, req),
        "roster.sortBySkill" => roster_sort_by_skill(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
