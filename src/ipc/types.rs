use std::path::PathBuf;
use std::time::Instant;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::GradingConfig;
use crate::db::DbSkillSink;
use crate::skills::{self, DebounceScheduler, FlushReport, SkillWrite};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub config: GradingConfig,
    pub skill_writes: DebounceScheduler<SkillWrite>,
}

impl AppState {
    pub fn new() -> Self {
        let config = GradingConfig::default();
        Self {
            workspace: None,
            db: None,
            config,
            skill_writes: DebounceScheduler::new(config.skill_debounce),
        }
    }

    pub fn apply_config(&mut self, config: GradingConfig) {
        self.config = config;
        self.skill_writes.set_delay(config.skill_debounce);
    }

    pub fn next_skill_deadline(&self) -> Option<Instant> {
        self.skill_writes.next_deadline()
    }

    pub fn flush_due_skill_writes(&mut self, now: Instant) -> FlushReport {
        let Some(conn) = self.db.as_ref() else {
            return self.drop_pending_without_workspace();
        };
        skills::flush_due(&mut self.skill_writes, &mut DbSkillSink(conn), now)
    }

    pub fn flush_all_skill_writes(&mut self) -> FlushReport {
        let Some(conn) = self.db.as_ref() else {
            return self.drop_pending_without_workspace();
        };
        skills::flush_all(&mut self.skill_writes, &mut DbSkillSink(conn))
    }

    fn drop_pending_without_workspace(&mut self) -> FlushReport {
        let dropped = self.skill_writes.drain_all().len();
        if dropped > 0 {
            tracing::warn!(dropped, "no workspace open; pending skill writes dropped");
        }
        FlushReport {
            written: 0,
            failed: dropped,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
