use rusqlite::Connection;
use serde_json::{json, Value};

use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{cell_text, require_db, require_index, require_str, SubjectContext};
use crate::ipc::types::{AppState, Request};
use crate::model::ScoreMatrix;
use crate::row::{evaluate_all_rows, evaluate_row, RowIdentity};

fn row_cells(matrix: &ScoreMatrix, student_id: &str) -> Vec<String> {
    matrix
        .row(student_id)
        .map(|r| r.to_vec())
        .unwrap_or_else(|| vec![String::new(); matrix.width()])
}

/// Writes every roster row whose text differs from `before`.
fn persist_changed_rows(
    conn: &Connection,
    ctx: &SubjectContext,
    before: &ScoreMatrix,
    after: &ScoreMatrix,
) -> anyhow::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut updated = 0;
    for s in &ctx.roster {
        let new_cells = row_cells(after, &s.student_id);
        if row_cells(before, &s.student_id) != new_cells {
            db::save_score_row(&tx, &ctx.subject.id, &s.student_id, &new_cells)?;
            updated += 1;
        }
    }
    tx.commit()?;
    Ok(updated)
}

fn grid_get(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let subject_id = require_str(req, "subjectId")?;
    let ctx = SubjectContext::load(conn, &subject_id)?;
    let stored = ctx.load_matrix(conn)?;

    let cells: Vec<Vec<String>> = ctx
        .roster
        .iter()
        .map(|s| row_cells(&stored, &s.student_id))
        .collect();

    // Evaluate a scratch copy: reading the grid never rewrites stored text.
    let mut scratch = stored.clone();
    let mut alerts: Vec<String> = Vec::new();
    let table = evaluate_all_rows(
        &ctx.roster,
        &mut scratch,
        &ctx.criteria,
        &ctx.subject.risk_context(),
        &mut alerts,
    );

    Ok(json!({
        "subject": ctx.subject,
        "criteria": ctx.criteria_json(),
        "students": ctx.roster,
        "cells": cells,
        "rows": table.rows,
        "overCap": table.over_cap,
        "alerts": alerts,
    }))
}

fn grid_update_cell(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let subject_id = require_str(req, "subjectId")?;
    let ctx = SubjectContext::load(conn, &subject_id)?;
    let col = require_index(req, "col")?;
    if col >= ctx.criteria.len() {
        return Err(HandlerErr::bad_params("col out of range")
            .with_details(json!({ "col": col, "criteriaCount": ctx.criteria.len() })));
    }

    let row_index = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(id) => ctx.roster.iter().position(|s| s.student_id == id),
        None => {
            let row = require_index(req, "row")?;
            (row < ctx.roster.len()).then_some(row)
        }
    }
    .ok_or_else(|| HandlerErr::new("not_found", "student is not on this subject's roster"))?;
    let student = &ctx.roster[row_index];
    let value = cell_text(req.params.get("value"))?;

    let mut matrix = ctx.load_matrix(conn)?;
    let previous = matrix
        .get(&student.student_id, col)
        .unwrap_or_default()
        .to_string();
    matrix.set(&student.student_id, col, value);
    let cells = matrix.row_mut(&student.student_id);
    let mut alerts: Vec<String> = Vec::new();
    let result = evaluate_row(
        RowIdentity { row_index, student },
        cells,
        &ctx.criteria,
        &ctx.subject.risk_context(),
        &mut alerts,
    );
    db::save_score_row(conn, &subject_id, &student.student_id, cells)
        .map_err(HandlerErr::db("db_update_failed"))?;

    Ok(json!({
        "rowIndex": row_index,
        "previous": previous,
        "row": result,
        "cells": cells,
        "alerts": alerts,
    }))
}

fn grid_evaluate_all(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let subject_id = require_str(req, "subjectId")?;
    let ctx = SubjectContext::load(conn, &subject_id)?;
    let before = ctx.load_matrix(conn)?;
    let mut matrix = before.clone();
    let mut alerts: Vec<String> = Vec::new();
    let table = evaluate_all_rows(
        &ctx.roster,
        &mut matrix,
        &ctx.criteria,
        &ctx.subject.risk_context(),
        &mut alerts,
    );
    let rows_updated = persist_changed_rows(conn, &ctx, &before, &matrix)
        .map_err(HandlerErr::db("db_update_failed"))?;

    Ok(json!({
        "rows": table.rows,
        "overCap": table.over_cap,
        "alerts": alerts,
        "rowsUpdated": rows_updated,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "grid.get" => grid_get(state, req),
        "grid.updateCell" => grid_update_cell(state, req),
        "grid.evaluateAll" => grid_evaluate_all(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
