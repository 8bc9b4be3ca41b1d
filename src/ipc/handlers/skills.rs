use std::time::Instant;

use serde_json::{json, Value};

use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{cell_text, require_db, require_str};
use crate::ipc::types::{AppState, Request};
use crate::skills::{debounce_key, SkillLevel, SkillWrite};

fn ensure_subject(state: &AppState, subject_id: &str) -> Result<(), HandlerErr> {
    let conn = require_db(state)?;
    match db::get_subject(conn, subject_id).map_err(HandlerErr::db("db_query_failed"))? {
        Some(_) => Ok(()),
        None => Err(HandlerErr::new("not_found", "subject not found")
            .with_details(json!({ "subjectId": subject_id }))),
    }
}

fn skills_set(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let subject_id = require_str(req, "subjectId")?;
    let student_id = require_str(req, "studentId")?;
    let value = cell_text(req.params.get("value"))?;
    ensure_subject(state, &subject_id)?;

    let key = debounce_key(&subject_id, &student_id);
    let replaced = state.skill_writes.is_pending(&key);
    let now = Instant::now();
    let due = state.skill_writes.schedule(
        key.clone(),
        SkillWrite {
            subject_id,
            student_id,
            value,
        },
        now,
    );
    Ok(json!({
        "scheduled": true,
        "replaced": replaced,
        "key": key,
        "dueInMs": due.saturating_duration_since(now).as_millis() as u64,
    }))
}

fn skills_cancel(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let subject_id = require_str(req, "subjectId")?;
    let student_id = require_str(req, "studentId")?;
    let cancelled = state
        .skill_writes
        .cancel(&debounce_key(&subject_id, &student_id));
    Ok(json!({ "cancelled": cancelled }))
}

/// Stored levels only; writes still inside their quiet period are not visible.
fn skills_get(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let subject_id = require_str(req, "subjectId")?;
    ensure_subject(state, &subject_id)?;
    let conn = require_db(state)?;
    let levels =
        db::load_skill_levels(conn, &subject_id).map_err(HandlerErr::db("db_query_failed"))?;

    let mut entries: Vec<(&String, &String)> = levels.iter().collect();
    entries.sort();
    let levels: Vec<Value> = entries
        .into_iter()
        .map(|(student_id, value)| {
            let level = SkillLevel::parse(value);
            json!({
                "studentId": student_id,
                "value": value,
                "level": level.map(SkillLevel::as_str),
                "rank": level.map(SkillLevel::rank),
            })
        })
        .collect();
    Ok(json!({
        "subjectId": subject_id,
        "levels": levels,
        "pendingWrites": state.skill_writes.len(),
    }))
}

fn skills_flush(state: &mut AppState) -> Result<Value, HandlerErr> {
    require_db(state)?;
    let report = state.flush_all_skill_writes();
    Ok(json!(report))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "skills.set" => skills_set(state, req),
        "skills.get" => skills_get(state, req),
        "skills.cancel" => skills_cancel(state, req),
        "skills.flush" => skills_flush(state),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
