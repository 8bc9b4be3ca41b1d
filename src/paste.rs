//! Pasted spreadsheet blocks: parsing and reconciliation into the score matrix.

use serde::Serialize;
use std::collections::HashMap;
use std::ops::Range;
use thiserror::Error;

use crate::model::{CriteriaState, RiskContext, ScoreMatrix, ScoreMode, StudentRecord};
use crate::row::{evaluate_row, AlertSink, OverCapEntry, RowIdentity, RowResult};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PasteError {
    #[error("no target cell is focused; click a score cell before pasting")]
    NoAnchor,
    #[error("pasted block has {columns} column(s) but only {available} criteria remain from column {anchor}")]
    ColumnOverflow {
        anchor: usize,
        columns: usize,
        available: usize,
    },
    #[error("paste cancelled")]
    Cancelled,
}

impl PasteError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoAnchor => "no_anchor",
            Self::ColumnOverflow { .. } => "column_overflow",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeChoice {
    pub criterion_index: usize,
    pub criterion_name: String,
    pub current: ScoreMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModeSelection {
    /// Criterion index to mode; targets missing from the map keep their mode.
    Apply(HashMap<usize, ScoreMode>),
    Cancel,
}

/// Asked to confirm raw/scaled modes before an ambiguous paste is applied.
pub trait ModePrompt {
    fn select_modes(&mut self, choices: &[ModeChoice]) -> ModeSelection;
}

/// Answers every prompt with a fixed selection; used when the caller already
/// collected the user's choice.
pub struct PresetModes(pub Option<HashMap<usize, ScoreMode>>);

impl ModePrompt for PresetModes {
    fn select_modes(&mut self, _choices: &[ModeChoice]) -> ModeSelection {
        match self.0.take() {
            Some(map) => ModeSelection::Apply(map),
            None => ModeSelection::Cancel,
        }
    }
}

pub fn parse_paste(text: &str) -> Vec<Vec<String>> {
    let body = text
        .strip_suffix("\r\n")
        .or_else(|| text.strip_suffix('\n'))
        .or_else(|| text.strip_suffix('\r'))
        .unwrap_or(text);
    if body.is_empty() {
        return Vec::new();
    }

    let mut grid: Vec<Vec<String>> = body
        .split("\r\n")
        .flat_map(|chunk| chunk.split(['\n', '\r']))
        .map(|line| {
            line.split(['\t', ','])
                .map(|cell| cell.trim().to_string())
                .collect()
        })
        .collect();

    let width = grid.iter().map(|r| r.len()).max().unwrap_or(0);
    for row in &mut grid {
        row.resize(width, String::new());
    }
    grid
}

pub fn paste_col_count(grid: &[Vec<String>]) -> usize {
    grid.iter().map(|r| r.len()).max().unwrap_or(0)
}

/// Whether the targeted criteria need an explicit raw/scaled confirmation.
pub fn needs_mode_selection(criteria: &CriteriaState, targets: Range<usize>) -> bool {
    let modes: Vec<ScoreMode> = targets
        .clone()
        .filter_map(|i| criteria.get(i).map(|c| c.mode))
        .collect();
    match modes.as_slice() {
        [] => false,
        // A lone criterion has nothing to disagree with.
        [_] => false,
        [first, rest @ ..] => rest.iter().any(|m| m != first),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasteOutcome {
    pub rows_written: usize,
    pub cells_written: usize,
    pub ignored_rows: usize,
    pub modes_changed: Vec<usize>,
    pub rows: Vec<RowResult>,
    pub over_cap: Vec<OverCapEntry>,
}

pub struct PasteTarget<'a> {
    pub criteria: &'a mut CriteriaState,
    pub roster: &'a [StudentRecord],
    pub matrix: &'a mut ScoreMatrix,
}

/// Applies a parsed block at `anchor`. Every check runs before the first write,
/// so an `Err` leaves criteria and matrix untouched.
pub fn reconcile(
    grid: &[Vec<String>],
    anchor: Option<usize>,
    target: PasteTarget<'_>,
    prompt: &mut dyn ModePrompt,
    ctx: &RiskContext,
    alerts: &mut dyn AlertSink,
) -> Result<PasteOutcome, PasteError> {
    let PasteTarget {
        criteria,
        roster,
        matrix,
    } = target;

    let anchor = anchor.ok_or(PasteError::NoAnchor)?;
    let columns = paste_col_count(grid);
    let Some(end) = anchor
        .checked_add(columns)
        .filter(|end| *end <= criteria.len())
    else {
        return Err(PasteError::ColumnOverflow {
            anchor,
            columns,
            available: criteria.len().saturating_sub(anchor),
        });
    };
    let targets = anchor..end;

    let mut modes_changed = Vec::new();
    if needs_mode_selection(criteria, targets.clone()) {
        let choices: Vec<ModeChoice> = targets
            .clone()
            .filter_map(|i| {
                criteria.get(i).map(|c| ModeChoice {
                    criterion_index: i,
                    criterion_name: c.name.clone(),
                    current: c.mode,
                })
            })
            .collect();
        let selection = match prompt.select_modes(&choices) {
            ModeSelection::Cancel => {
                tracing::info!(anchor, columns, "paste cancelled at mode selection");
                return Err(PasteError::Cancelled);
            }
            ModeSelection::Apply(map) => map,
        };
        for choice in &choices {
            let Some(mode) = selection.get(&choice.criterion_index).copied() else {
                continue;
            };
            if mode != choice.current && criteria.set_mode(choice.criterion_index, mode) {
                modes_changed.push(choice.criterion_index);
            }
        }
    }

    let mut rows_written = 0;
    let mut cells_written = 0;
    for (grid_row, student) in grid.iter().zip(roster.iter()) {
        for (offset, value) in grid_row.iter().enumerate() {
            if matrix.set(&student.student_id, anchor + offset, value.as_str()) {
                cells_written += 1;
            }
        }
        rows_written += 1;
    }
    let ignored_rows = grid.len().saturating_sub(roster.len());

    // Mode changes affect every row, not just the pasted ones.
    let recompute_rows = if modes_changed.is_empty() {
        rows_written
    } else {
        roster.len()
    };

    let mut rows = Vec::with_capacity(recompute_rows);
    let mut over_cap = Vec::new();
    for (row_index, student) in roster.iter().enumerate().take(recompute_rows) {
        let cells = matrix.row_mut(&student.student_id);
        let result = evaluate_row(
            RowIdentity { row_index, student },
            cells,
            criteria,
            ctx,
            alerts,
        );
        over_cap.extend(result.over_cap.iter().cloned());
        rows.push(result);
    }

    tracing::info!(
        anchor,
        columns,
        rows_written,
        cells_written,
        ignored_rows,
        "paste applied"
    );

    Ok(PasteOutcome {
        rows_written,
        cells_written,
        ignored_rows,
        modes_changed,
        rows,
        over_cap,
    })
}
