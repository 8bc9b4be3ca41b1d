use rusqlite::Connection;
use serde_json::{json, Map, Value};
use std::time::Duration;

use crate::db;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupSection {
    Grading,
    Paste,
}

impl SetupSection {
    pub const ALL: [SetupSection; 2] = [SetupSection::Grading, SetupSection::Paste];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "grading" => Some(Self::Grading),
            "paste" => Some(Self::Paste),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Grading => "grading",
            Self::Paste => "paste",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Grading => "setup.grading",
            Self::Paste => "setup.paste",
        }
    }
}

pub fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grading => json!({
            "skillDebounceMs": 500
        }),
        SetupSection::Paste => json!({
            "maxRows": 2000
        }),
    }
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

pub fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        let parsed = match (section, k.as_str()) {
            (SetupSection::Grading, "skillDebounceMs") => {
                json!(parse_i64_range(v, "skillDebounceMs", 50, 10_000)?)
            }
            (SetupSection::Paste, "maxRows") => json!(parse_i64_range(v, "maxRows", 1, 5000)?),
            _ => return Err(format!("unknown {} setting: {}", section.name(), k)),
        };
        obj.insert(k.clone(), parsed);
    }
    Ok(())
}

pub fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: a malformed stored value falls back to defaults.
            if let Err(e) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.name(), error = %e, "ignoring stored setup");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

pub fn save_section(conn: &Connection, section: SetupSection, value: &Value) -> anyhow::Result<()> {
    db::settings_set_json(conn, section.key(), value)
}

/// Typed view over the setup sections the engine consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GradingConfig {
    pub skill_debounce: Duration,
    pub paste_max_rows: usize,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            skill_debounce: crate::skills::DEFAULT_SKILL_DEBOUNCE,
            paste_max_rows: 2000,
        }
    }
}

impl GradingConfig {
    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        let grading = load_section(conn, SetupSection::Grading)?;
        let paste = load_section(conn, SetupSection::Paste)?;
        let defaults = Self::default();
        Ok(Self {
            skill_debounce: grading
                .get("skillDebounceMs")
                .and_then(|v| v.as_u64())
                .map(Duration::from_millis)
                .unwrap_or(defaults.skill_debounce),
            paste_max_rows: paste
                .get("maxRows")
                .and_then(|v| v.as_u64())
                .map(|n| n as usize)
                .unwrap_or(defaults.paste_max_rows),
        })
    }
}
