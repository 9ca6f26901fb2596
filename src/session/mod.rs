//! Session persistence — every debugging session is serialized into a
//! history directory at termination, with a JSON index for listings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::AgentContext;
use crate::error::TriageResult;
use crate::types::{CommandCapture, SessionOutcome};

/// The persisted record of one completed session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLog {
    pub id: String,
    pub session_type: String,
    pub timestamp: DateTime<Utc>,
    pub initial_command: CommandCapture,
    pub user_context: String,
    pub outcome: SessionOutcome,
    pub steps_taken: usize,
    pub final_context: AgentContext,
}

impl SessionLog {
    pub fn from_session(context: &AgentContext, outcome: SessionOutcome) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_type: "agentic".into(),
            timestamp: Utc::now(),
            initial_command: context.initial_command_run.clone(),
            user_context: context.initial_user_request.clone(),
            outcome,
            steps_taken: context.step_count(),
            final_context: context.clone(),
        }
    }
}

/// Summary row kept in the index file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub command: String,
    pub outcome: SessionOutcome,
    pub steps_taken: usize,
}

/// JSON-per-session store under a history directory.
pub struct SessionStore {
    base_dir: PathBuf,
}

impl SessionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(format!("{id}.json"))
    }

    fn index_path(&self) -> PathBuf {
        self.base_dir.join("sessions.json")
    }

    /// Persist a session log and register it in the index.
    pub async fn save(&self, log: &SessionLog) -> TriageResult<()> {
        tokio::fs::create_dir_all(&self.base_dir).await?;

        let json = serde_json::to_string_pretty(log)?;
        tokio::fs::write(self.session_path(&log.id), json).await?;

        let summary = SessionSummary {
            id: log.id.clone(),
            timestamp: log.timestamp,
            command: log.initial_command.command_string.clone(),
            outcome: log.outcome,
            steps_taken: log.steps_taken,
        };
        self.update_index(|rows| {
            rows.insert(summary.id.clone(), summary);
        })
        .await
    }

    pub async fn load(&self, id: &str) -> TriageResult<Option<SessionLog>> {
        let path = self.session_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub async fn list(&self) -> TriageResult<Vec<SessionSummary>> {
        self.load_index().await
    }

    pub async fn delete(&self, id: &str) -> TriageResult<()> {
        let path = self.session_path(id);
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        tokio::fs::create_dir_all(&self.base_dir).await?;
        self.update_index(|rows| {
            rows.remove(id);
        })
        .await
    }

    /// Load the index as an id-keyed map, apply one change, and write it back
    /// ordered by timestamp.
    async fn update_index<F>(&self, change: F) -> TriageResult<()>
    where
        F: FnOnce(&mut BTreeMap<String, SessionSummary>),
    {
        let mut rows: BTreeMap<String, SessionSummary> = self
            .load_index()
            .await?
            .into_iter()
            .map(|summary| (summary.id.clone(), summary))
            .collect();
        change(&mut rows);

        let mut ordered: Vec<SessionSummary> = rows.into_values().collect();
        ordered.sort_by_key(|summary| summary.timestamp);
        tokio::fs::write(self.index_path(), serde_json::to_string_pretty(&ordered)?).await?;
        Ok(())
    }

    async fn load_index(&self) -> TriageResult<Vec<SessionSummary>> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&content)?)
    }
}
