use std::collections::HashMap;

use rusqlite::Connection;
use serde_json::{json, Value};

use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{require_db, require_str, SubjectContext};
use crate::ipc::types::{AppState, Request};
use crate::model::{ScoreMatrix, ScoreMode};
use crate::paste::{
    parse_paste, reconcile, ModeChoice, ModePrompt, ModeSelection, PasteOutcome, PasteTarget,
    PresetModes,
};

/// Stands in for an interactive prompt when the client has not chosen modes
/// yet: remembers what would have been asked and declines.
#[derive(Default)]
struct DeferredPrompt {
    asked: Option<Vec<ModeChoice>>,
}

impl ModePrompt for DeferredPrompt {
    fn select_modes(&mut self, choices: &[ModeChoice]) -> ModeSelection {
        self.asked = Some(choices.to_vec());
        ModeSelection::Cancel
    }
}

/// `modes` absent: the client has not been asked. `null`: the user cancelled.
/// Object: criterion index (as a string key) to `"raw"` / `"scaled"`.
enum ModesParam {
    NotAsked,
    Cancelled,
    Chosen(HashMap<usize, ScoreMode>),
}

fn parse_modes(v: Option<&Value>) -> Result<ModesParam, HandlerErr> {
    let obj = match v {
        None => return Ok(ModesParam::NotAsked),
        Some(Value::Null) => return Ok(ModesParam::Cancelled),
        Some(Value::Object(obj)) => obj,
        Some(_) => return Err(HandlerErr::bad_params("modes must be an object or null")),
    };
    let mut out = HashMap::new();
    for (k, v) in obj {
        let idx: usize = k
            .trim()
            .parse()
            .map_err(|_| HandlerErr::bad_params(format!("modes key must be an index: {}", k)))?;
        let mode = v
            .as_str()
            .ok_or_else(|| HandlerErr::bad_params("modes values must be strings"))
            .and_then(|s| ScoreMode::parse(s).map_err(|e| HandlerErr::bad_params(e.to_string())))?;
        out.insert(idx, mode);
    }
    Ok(ModesParam::Chosen(out))
}

fn optional_anchor(v: Option<&Value>) -> Result<Option<usize>, HandlerErr> {
    match v {
        None | Some(Value::Null) => Ok(None),
        Some(n) => match n.as_i64() {
            Some(i) if i >= 0 => Ok(Some(i as usize)),
            _ => Err(HandlerErr::bad_params("anchorColumn must be a non-negative integer")),
        },
    }
}

fn persist_outcome(
    conn: &Connection,
    subject_id: &str,
    outcome: &PasteOutcome,
    ctx: &SubjectContext,
    matrix: &ScoreMatrix,
) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    for &idx in &outcome.modes_changed {
        if let Some(c) = ctx.criteria.get(idx) {
            db::set_criterion_mode(&tx, subject_id, idx, c.mode)?;
        }
    }
    for row in &outcome.rows {
        if let Some(cells) = matrix.row(&row.student_id) {
            db::save_score_row(&tx, subject_id, &row.student_id, cells)?;
        }
    }
    tx.commit()?;
    Ok(())
}

fn paste_apply(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let subject_id = require_str(req, "subjectId")?;
    let Some(text) = req.params.get("text").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::bad_params("missing text"));
    };
    let anchor = optional_anchor(req.params.get("anchorColumn"))?;
    let modes = parse_modes(req.params.get("modes"))?;

    let grid = parse_paste(text);
    let max_rows = state.config.paste_max_rows;
    if grid.len() > max_rows {
        return Err(HandlerErr::new("paste_too_large", "pasted block has too many rows")
            .with_details(json!({ "rows": grid.len(), "maxRows": max_rows })));
    }

    let mut ctx = SubjectContext::load(conn, &subject_id)?;
    let mut matrix = ctx.load_matrix(conn)?;
    let risk = ctx.subject.risk_context();
    let mut alerts: Vec<String> = Vec::new();

    let mut deferred = DeferredPrompt::default();
    let mut preset;
    let prompt: &mut dyn ModePrompt = match modes {
        ModesParam::NotAsked => &mut deferred,
        ModesParam::Cancelled => {
            preset = PresetModes(None);
            &mut preset
        }
        ModesParam::Chosen(map) => {
            preset = PresetModes(Some(map));
            &mut preset
        }
    };

    let result = reconcile(
        &grid,
        anchor,
        PasteTarget {
            criteria: &mut ctx.criteria,
            roster: &ctx.roster,
            matrix: &mut matrix,
        },
        prompt,
        &risk,
        &mut alerts,
    );

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Some(choices) = deferred.asked.take() {
                return Ok(json!({
                    "status": "needs_mode_selection",
                    "needsModeSelection": true,
                    "choices": choices,
                }));
            }
            return Err(e.into());
        }
    };

    persist_outcome(conn, &subject_id, &outcome, &ctx, &matrix)
        .map_err(HandlerErr::db("db_update_failed"))?;

    Ok(json!({
        "status": "applied",
        "needsModeSelection": false,
        "outcome": outcome,
        "criteria": ctx.criteria_json(),
        "alerts": alerts,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "paste.apply" => Some(respond(&req.id, paste_apply(state, req))),
        _ => None,
    }
}
