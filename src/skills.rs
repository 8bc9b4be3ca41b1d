//! Skill levels and their debounced persistence.
//!
//! Every keystroke in a skill-level cell schedules a write keyed by
//! `subjectId::studentId`. A newer keystroke for the same key replaces the
//! pending one, so only the value present after the quiet period is written.

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_SKILL_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkillLevel {
    S,
    A1,
    A2,
    A3,
}

impl SkillLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "S" => Some(Self::S),
            "A1" => Some(Self::A1),
            "A2" => Some(Self::A2),
            "A3" => Some(Self::A3),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::S => "S",
            Self::A1 => "A1",
            Self::A2 => "A2",
            Self::A3 => "A3",
        }
    }

    pub fn rank(self) -> u8 {
        match self {
            Self::S => 1,
            Self::A1 => 2,
            Self::A2 => 3,
            Self::A3 => 4,
        }
    }
}

pub fn debounce_key(subject_id: &str, student_id: &str) -> String {
    format!("{}::{}", subject_id, student_id)
}

/// A scheduled write. `generation` orders entries by when they were last
/// (re)scheduled.
#[derive(Debug)]
struct Pending<V> {
    due: Instant,
    generation: u64,
    value: V,
}

#[derive(Debug)]
pub struct DebounceScheduler<V> {
    delay: Duration,
    next_generation: u64,
    pending: HashMap<String, Pending<V>>,
}

impl<V> DebounceScheduler<V> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_generation: 0,
            pending: HashMap::new(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Applies to entries scheduled after the change.
    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = delay;
    }

    /// Schedules `value` under `key`, replacing any pending entry for that key.
    /// Returns the new deadline.
    pub fn schedule(&mut self, key: impl Into<String>, value: V, now: Instant) -> Instant {
        let key = key.into();
        self.next_generation += 1;
        let due = now + self.delay;
        let replaced = self
            .pending
            .insert(
                key.clone(),
                Pending {
                    due,
                    generation: self.next_generation,
                    value,
                },
            )
            .is_some();
        if replaced {
            tracing::trace!(key = %key, "debounced write replaced");
        }
        due
    }

    pub fn cancel(&mut self, key: &str) -> bool {
        self.pending.remove(key).is_some()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.due).min()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Removes and returns every entry whose deadline has passed, oldest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<(String, V)> {
        let due_keys: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.due <= now)
            .map(|(k, _)| k.clone())
            .collect();
        self.remove_sorted(due_keys)
    }

    pub fn drain_all(&mut self) -> Vec<(String, V)> {
        let keys: Vec<String> = self.pending.keys().cloned().collect();
        self.remove_sorted(keys)
    }

    fn remove_sorted(&mut self, keys: Vec<String>) -> Vec<(String, V)> {
        let mut out: Vec<(u64, String, V)> = keys
            .into_iter()
            .filter_map(|k| self.pending.remove(&k).map(|p| (p.generation, k, p.value)))
            .collect();
        out.sort_by_key(|(generation, _, _)| *generation);
        out.into_iter().map(|(_, k, v)| (k, v)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillWrite {
    pub subject_id: String,
    pub student_id: String,
    /// Text as typed; blank clears the stored level. Unrecognized text is
    /// stored as-is and ranks last when sorting.
    pub value: String,
}

pub trait SkillLevelSink {
    fn write(&mut self, write: &SkillWrite) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    pub written: usize,
    pub failed: usize,
}

fn write_all(
    writes: Vec<(String, SkillWrite)>,
    sink: &mut dyn SkillLevelSink,
) -> FlushReport {
    let mut report = FlushReport::default();
    for (key, write) in writes {
        match sink.write(&write) {
            Ok(()) => report.written += 1,
            Err(e) => {
                report.failed += 1;
                tracing::warn!(key = %key, error = %e, "skill level write failed");
            }
        }
    }
    report
}

/// Writes every due entry. Failures are logged and dropped.
pub fn flush_due(
    scheduler: &mut DebounceScheduler<SkillWrite>,
    sink: &mut dyn SkillLevelSink,
    now: Instant,
) -> FlushReport {
    write_all(scheduler.take_due(now), sink)
}

pub fn flush_all(
    scheduler: &mut DebounceScheduler<SkillWrite>,
    sink: &mut dyn SkillLevelSink,
) -> FlushReport {
    write_all(scheduler.drain_all(), sink)
}
