use rusqlite::Connection;
use serde_json::{json, Value};

use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::types::{AppState, Request};
use crate::model::{CriteriaState, ScoreMatrix, StudentRecord, Subject};
use crate::roster::{filter_for_subject, SubjectScope};

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn require_str(req: &Request, key: &str) -> Result<String, HandlerErr> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(HandlerErr::bad_params(format!("missing {}", key))),
    }
}

pub fn optional_str(v: Option<&Value>, key: &str) -> Result<Option<String>, HandlerErr> {
    match v {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be string or null", key))),
    }
}

pub fn optional_f64(v: Option<&Value>, key: &str) -> Result<Option<f64>, HandlerErr> {
    match v {
        None | Some(Value::Null) => Ok(None),
        Some(n) => n
            .as_f64()
            .filter(|f| f.is_finite())
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number or null", key))),
    }
}

pub fn require_index(req: &Request, key: &str) -> Result<usize, HandlerErr> {
    match req.params.get(key).and_then(|v| v.as_i64()) {
        Some(v) if v >= 0 => Ok(v as usize),
        _ => Err(HandlerErr::bad_params(format!("missing/invalid {}", key))),
    }
}

/// Cell text from a JSON value. Numbers are accepted as-is so clients can
/// send either what was typed or a parsed number.
pub fn cell_text(v: Option<&Value>) -> Result<String, HandlerErr> {
    match v {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(_) => Err(HandlerErr::bad_params("value must be string, number or null")),
    }
}

/// Everything a grid operation needs for one subject.
pub struct SubjectContext {
    pub subject: Subject,
    pub criteria: CriteriaState,
    pub roster: Vec<StudentRecord>,
}

impl SubjectContext {
    pub fn load(conn: &Connection, subject_id: &str) -> Result<Self, HandlerErr> {
        let subject = db::get_subject(conn, subject_id)
            .map_err(HandlerErr::db("db_query_failed"))?
            .ok_or_else(|| {
                HandlerErr::new("not_found", "subject not found")
                    .with_details(json!({ "subjectId": subject_id }))
            })?;
        let criteria = db::load_criteria(conn, subject_id).map_err(HandlerErr::db("db_query_failed"))?;
        let students = db::list_students(conn).map_err(HandlerErr::db("db_query_failed"))?;
        let roster = filter_for_subject(&students, &SubjectScope::from(&subject));
        Ok(Self {
            subject,
            criteria: CriteriaState::new(criteria),
            roster,
        })
    }

    pub fn load_matrix(&self, conn: &Connection) -> Result<ScoreMatrix, HandlerErr> {
        db::load_score_matrix(conn, &self.subject.id, self.criteria.len())
            .map_err(HandlerErr::db("db_query_failed"))
    }

    pub fn criteria_json(&self) -> Value {
        json!({
            "criteria": self.criteria.criteria(),
            "normalizedWeights": self.criteria.normalized_weights(),
            "rawTotal": self.criteria.raw_total(),
        })
    }
}
