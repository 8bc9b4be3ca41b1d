//! Per-row score evaluation: cell validation, contribution, totals, risk.

use serde::Serialize;

use crate::calc::{classify_risk, contribution, format_1_decimal};
use crate::model::{CriteriaState, RiskContext, ScoreMatrix, StudentRecord};

/// Sums within this distance below an integer floor to that integer, so that
/// rescaled weights adding back to a whole number are not lost to
/// representation error.
const TOTAL_EPSILON: f64 = 1e-9;

/// Receives user-facing messages when an entered value is rejected.
pub trait AlertSink {
    fn alert(&mut self, message: &str);
}

impl AlertSink for Vec<String> {
    fn alert(&mut self, message: &str) {
        self.push(message.to_string());
    }
}

impl<F: FnMut(&str)> AlertSink for F {
    fn alert(&mut self, message: &str) {
        self(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    Empty,
    InvalidCleared,
    OverCap,
    Valid,
    /// The criterion has no usable cap; the cell was not scored.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellOutcome {
    pub status: CellStatus,
    pub value: Option<f64>,
    pub converted: Option<f64>,
    pub display: Option<String>,
}

impl CellOutcome {
    fn bare(status: CellStatus, value: Option<f64>) -> Self {
        Self {
            status,
            value,
            converted: None,
            display: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverCapEntry {
    pub kind: &'static str,
    pub row_index: usize,
    pub student_id: String,
    pub student_name: String,
    pub criterion_index: usize,
    pub criterion_name: String,
    pub value: f64,
    pub cap: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellDiagnostic {
    pub criterion_index: usize,
    pub criterion_name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowResult {
    pub student_id: String,
    pub cells: Vec<CellOutcome>,
    pub total: Option<i64>,
    pub is_fully_filled: bool,
    pub is_failing: bool,
    pub is_excess: bool,
    pub over_cap: Vec<OverCapEntry>,
    pub diagnostics: Vec<CellDiagnostic>,
}

#[derive(Debug, Clone, Copy)]
pub struct RowIdentity<'a> {
    pub row_index: usize,
    pub student: &'a StudentRecord,
}

/// Keeps ASCII digits and the first decimal point; everything else is dropped.
pub fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut seen_point = false;
    for ch in input.chars() {
        if ch.is_ascii_digit() {
            out.push(ch);
        } else if ch == '.' && !seen_point {
            seen_point = true;
            out.push(ch);
        }
    }
    if out.chars().any(|c| c.is_ascii_digit()) {
        out
    } else {
        String::new()
    }
}

fn is_negative_entry(trimmed: &str) -> bool {
    let Some(rest) = trimmed.strip_prefix('-') else {
        return false;
    };
    rest.trim_start()
        .chars()
        .next()
        .map(|c| c.is_ascii_digit() || c == '.')
        .unwrap_or(false)
}

enum Parsed {
    Empty,
    Rejected(&'static str),
    Number(f64, String),
}

fn parse_cell(raw: &str) -> Parsed {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Parsed::Empty;
    }
    if is_negative_entry(trimmed) {
        return Parsed::Rejected("negative scores are not allowed");
    }
    let cleaned = sanitize(trimmed);
    if cleaned.is_empty() {
        return Parsed::Rejected("please enter a number");
    }
    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Parsed::Number(v, cleaned),
        _ => Parsed::Rejected("please enter a number"),
    }
}

pub fn evaluate_row(
    identity: RowIdentity<'_>,
    cells: &mut [String],
    criteria: &CriteriaState,
    ctx: &RiskContext,
    alerts: &mut dyn AlertSink,
) -> RowResult {
    let student = identity.student;
    let mut outcomes = Vec::with_capacity(criteria.len());
    let mut over_cap = Vec::new();
    let mut diagnostics = Vec::new();
    let mut sum = 0.0_f64;
    let mut any_value = false;
    let mut fully_filled = true;

    for (idx, criterion) in criteria.criteria().iter().enumerate() {
        let raw = cells.get(idx).cloned().unwrap_or_default();
        let (value, cleaned) = match parse_cell(&raw) {
            Parsed::Empty => {
                fully_filled = false;
                outcomes.push(CellOutcome::bare(CellStatus::Empty, None));
                continue;
            }
            Parsed::Rejected(reason) => {
                if let Some(cell) = cells.get_mut(idx) {
                    cell.clear();
                }
                alerts.alert(&format!(
                    "{} / {}: '{}' was rejected ({})",
                    student.name,
                    criterion.name,
                    raw.trim(),
                    reason
                ));
                fully_filled = false;
                outcomes.push(CellOutcome::bare(CellStatus::InvalidCleared, None));
                continue;
            }
            Parsed::Number(v, cleaned) => (v, cleaned),
        };

        if let Some(cell) = cells.get_mut(idx) {
            if *cell != cleaned {
                *cell = cleaned;
            }
        }
        any_value = true;

        let Some(cap) = criterion.cap() else {
            tracing::error!(
                criterion_index = idx,
                criterion = %criterion.name,
                "criterion has no usable cap; cell skipped"
            );
            diagnostics.push(CellDiagnostic {
                criterion_index: idx,
                criterion_name: criterion.name.clone(),
                message: format!(
                    "criterion '{}' is in raw mode without a max; check the criteria setup",
                    criterion.name
                ),
            });
            fully_filled = false;
            outcomes.push(CellOutcome::bare(CellStatus::Skipped, Some(value)));
            continue;
        };

        if value > cap {
            over_cap.push(OverCapEntry {
                kind: "over-cap",
                row_index: identity.row_index,
                student_id: student.student_id.clone(),
                student_name: student.name.clone(),
                criterion_index: idx,
                criterion_name: criterion.name.clone(),
                value,
                cap,
            });
            outcomes.push(CellOutcome::bare(CellStatus::OverCap, Some(value)));
            continue;
        }

        let converted = contribution(value, criteria.weight(idx), Some(cap));
        sum += converted;
        outcomes.push(CellOutcome {
            status: CellStatus::Valid,
            value: Some(value),
            converted: Some(converted),
            display: Some(format_1_decimal(converted)),
        });
    }

    let total = any_value.then(|| (sum + TOTAL_EPSILON).floor() as i64);
    let risk = classify_risk(total.map(|t| t as f64), ctx);

    RowResult {
        student_id: student.student_id.clone(),
        cells: outcomes,
        total,
        is_fully_filled: fully_filled,
        is_failing: risk.is_failing,
        is_excess: risk.is_excess,
        over_cap,
        diagnostics,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableResult {
    pub rows: Vec<RowResult>,
    pub over_cap: Vec<OverCapEntry>,
}

pub fn evaluate_all_rows(
    roster: &[StudentRecord],
    matrix: &mut ScoreMatrix,
    criteria: &CriteriaState,
    ctx: &RiskContext,
    alerts: &mut dyn AlertSink,
) -> TableResult {
    let mut rows = Vec::with_capacity(roster.len());
    let mut over_cap = Vec::new();
    for (row_index, student) in roster.iter().enumerate() {
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
    if !over_cap.is_empty() {
        tracing::debug!(count = over_cap.len(), "over-cap cells in table");
    }
    TableResult { rows, over_cap }
}
