use serde_json::{json, Value};

use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{optional_f64, optional_str, require_db, require_index, require_str, SubjectContext};
use crate::ipc::types::{AppState, Request};
use crate::model::{CriterionSpec, ScoreMode, Subject, SubjectType};

fn parse_criteria(v: Option<&Value>) -> Result<Vec<CriterionSpec>, HandlerErr> {
    let Some(items) = v.and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("criteria must be an array"));
    };
    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            return Err(HandlerErr::bad_params(format!("criteria[{}] must be an object", idx)));
        };
        let name = obj
            .get("name")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HandlerErr::bad_params(format!("criteria[{}].name required", idx)))?;
        let percent = optional_f64(obj.get("percent"), "percent")?.unwrap_or(0.0);
        let mode = match obj.get("mode").and_then(|v| v.as_str()) {
            Some(m) => ScoreMode::parse(m).map_err(|e| HandlerErr::bad_params(e.to_string()))?,
            None => ScoreMode::Scaled,
        };
        let max = optional_f64(obj.get("max"), "max")?;
        let spec = CriterionSpec::new(name, percent, mode, max)
            .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
        out.push(spec);
    }
    Ok(out)
}

fn subjects_list(state: &AppState) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let subjects = db::list_subjects(conn).map_err(HandlerErr::db("db_query_failed"))?;
    Ok(json!({ "subjects": subjects }))
}

fn subjects_upsert(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let p = &req.params;
    let id = optional_str(p.get("id"), "id")?.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let name = require_str(req, "name")?;
    let grade = require_str(req, "grade")?;
    let course = optional_str(p.get("course"), "course")?;
    let subject_type = match p.get("subjectType").and_then(|v| v.as_str()) {
        Some(t) => SubjectType::parse(t).map_err(|e| HandlerErr::bad_params(e.to_string()))?,
        None => SubjectType::Normal,
    };
    let adjust_point = optional_f64(p.get("adjustPoint"), "adjustPoint")?;
    let criteria = parse_criteria(p.get("criteria"))?;

    let subject = Subject {
        id,
        name,
        grade,
        course,
        subject_type,
        adjust_point,
    };
    db::upsert_subject(conn, &subject, &criteria).map_err(HandlerErr::db("db_update_failed"))?;
    tracing::info!(subject = %subject.id, criteria = criteria.len(), "subject saved");

    let ctx = SubjectContext::load(conn, &subject.id)?;
    let mut out = ctx.criteria_json();
    out["subjectId"] = json!(subject.id);
    Ok(out)
}

fn criteria_get(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let subject_id = require_str(req, "subjectId")?;
    let ctx = SubjectContext::load(conn, &subject_id)?;
    let mut out = ctx.criteria_json();
    out["subject"] = json!(ctx.subject);
    Ok(out)
}

fn criteria_set_mode(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let subject_id = require_str(req, "subjectId")?;
    let index = require_index(req, "index")?;
    let mode = ScoreMode::parse(&require_str(req, "mode")?)
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;

    let mut ctx = SubjectContext::load(conn, &subject_id)?;
    if !ctx.criteria.set_mode(index, mode) {
        return Err(HandlerErr::new("not_found", "criterion not found")
            .with_details(json!({ "index": index, "count": ctx.criteria.len() })));
    }
    db::set_criterion_mode(conn, &subject_id, index, mode)
        .map_err(HandlerErr::db("db_update_failed"))?;
    Ok(ctx.criteria_json())
}

fn criteria_set_percent(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let subject_id = require_str(req, "subjectId")?;
    let index = require_index(req, "index")?;
    let percent = match optional_f64(req.params.get("percent"), "percent")? {
        Some(p) if p >= 0.0 => p,
        _ => return Err(HandlerErr::bad_params("percent must be a number >= 0")),
    };

    let mut ctx = SubjectContext::load(conn, &subject_id)?;
    if !ctx.criteria.set_percent(index, percent) {
        return Err(HandlerErr::new("not_found", "criterion not found")
            .with_details(json!({ "index": index, "count": ctx.criteria.len() })));
    }
    db::set_criterion_percent(conn, &subject_id, index, percent)
        .map_err(HandlerErr::db("db_update_failed"))?;
    Ok(ctx.criteria_json())
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "subjects.list" => subjects_list(state),
        "subjects.upsert" => subjects_upsert(state, req),
        "criteria.get" => criteria_get(state, req),
        "criteria.setMode" => criteria_set_mode(state, req),
        "criteria.setPercent" => criteria_set_percent(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
