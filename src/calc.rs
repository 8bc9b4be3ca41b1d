use serde::Serialize;

use crate::model::{RiskContext, SubjectType};

/// Weight sums inside this band are treated as hand-entered percentages that
/// were meant to total 100.
const TOLERANCE_LOW: f64 = 99.0;
const TOLERANCE_HIGH: f64 = 101.0;

/// Elective subjects use a fixed passing line instead of an adjust point.
pub const ELECTIVE_PASS_SCORE: f64 = 60.0;

/// One-decimal rounding used for converted-value display:
/// `Int(10*x + 0.5) / 10`
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

pub fn format_1_decimal(x: f64) -> String {
    format!("{:.1}", round_off_1_decimal(x))
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedWeights {
    pub normalized: Vec<f64>,
    pub raw_total: f64,
}

pub fn normalize_weights(weights: &[f64]) -> NormalizedWeights {
    let cleaned: Vec<f64> = weights
        .iter()
        .map(|w| if w.is_finite() { *w } else { 0.0 })
        .collect();
    let raw_total: f64 = cleaned.iter().sum();

    let normalized = if raw_total == 0.0 {
        vec![0.0; cleaned.len()]
    } else if (TOLERANCE_LOW..=TOLERANCE_HIGH).contains(&raw_total) {
        let factor = 100.0 / raw_total;
        cleaned.iter().map(|w| w * factor).collect()
    } else {
        // Point-based criteria: sums far from 100 are used as-is.
        tracing::debug!(raw_total, "criteria weights outside tolerance band; not scaled");
        cleaned
    };

    NormalizedWeights {
        normalized,
        raw_total,
    }
}

/// Portion of `weight` earned by `value`. Callers must only pass values that
/// are already validated to lie within `[0, cap]`.
pub fn contribution(value: f64, weight: f64, cap: Option<f64>) -> f64 {
    if !value.is_finite() || !weight.is_finite() {
        return 0.0;
    }
    match cap {
        Some(c) if c.is_finite() && c > 0.0 => (value / c) * weight,
        _ => value * weight / 100.0,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskFlags {
    pub is_failing: bool,
    pub is_excess: bool,
}

pub fn classify_risk(final_score: Option<f64>, ctx: &RiskContext) -> RiskFlags {
    let Some(score) = final_score.filter(|s| s.is_finite()) else {
        return RiskFlags::default();
    };
    match ctx.subject_type {
        SubjectType::Special | SubjectType::Unknown => RiskFlags::default(),
        SubjectType::Elective => RiskFlags {
            is_failing: score < ELECTIVE_PASS_SCORE,
            is_excess: false,
        },
        SubjectType::Normal | SubjectType::Skill => match ctx.adjust_point {
            Some(p) if p.is_finite() => RiskFlags {
                is_failing: score < p,
                is_excess: false,
            },
            _ => RiskFlags::default(),
        },
    }
}
