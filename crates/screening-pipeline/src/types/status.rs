//! Per-run processing status and its forward-only transition rule

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Pipeline status of one processing run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Pending,
    Parsing,
    ExtractingSkills,
    SkillsExtracted,
    Scoring,
    Completed,
    Failed,
}

impl ProcessingStatus {
    /// Position on the forward path; `None` for `Failed`
    pub fn rank(self) -> Option<u8> {
        match self {
            ProcessingStatus::Pending => Some(0),
            ProcessingStatus::Parsing => Some(1),
            ProcessingStatus::ExtractingSkills => Some(2),
            ProcessingStatus::SkillsExtracted => Some(3),
            ProcessingStatus::Scoring => Some(4),
            ProcessingStatus::Completed => Some(5),
            ProcessingStatus::Failed => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "PENDING",
            ProcessingStatus::Parsing => "PARSING",
            ProcessingStatus::ExtractingSkills => "EXTRACTING_SKILLS",
            ProcessingStatus::SkillsExtracted => "SKILLS_EXTRACTED",
            ProcessingStatus::Scoring => "SCORING",
            ProcessingStatus::Completed => "COMPLETED",
            ProcessingStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored status of one processing run, keyed by processing id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    /// Processing id
    pub id: String,
    pub resume_id: Option<String>,
    pub job_id: Option<String>,
    pub status: ProcessingStatus,
    /// Furthest non-failed status reached
    pub stage: ProcessingStatus,
    pub error: Option<String>,
    /// Times the run re-entered a stage after failing
    pub retries: u32,
    /// Stage-owned fields, merged on every write
    #[serde(default)]
    pub fields: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    /// New record for a run that was just enqueued
    pub fn pending(
        id: impl Into<String>,
        resume_id: impl Into<String>,
        job_id: impl Into<String>,
    ) -> Self {
        let mut record = Self::empty(id);
        record.resume_id = Some(resume_id.into());
        record.job_id = Some(job_id.into());
        record
    }

    /// Record with no routing metadata, used when a write arrives for an unknown id
    pub fn empty(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            resume_id: None,
            job_id: None,
            status: ProcessingStatus::Pending,
            stage: ProcessingStatus::Pending,
            error: None,
            retries: 0,
            fields: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `update` may be applied without moving the run backwards.
    ///
    /// `COMPLETED` is final. `FAILED` is accepted from any other state. A
    /// forward status is accepted when it is not behind the furthest stage
    /// reached, which lets a redelivered message re-enter the stage it failed in.
    pub fn accepts(&self, target: ProcessingStatus) -> bool {
        if self.status == ProcessingStatus::Completed {
            return false;
        }
        match (target.rank(), self.stage.rank()) {
            (None, _) => true,
            (Some(to), Some(reached)) => to >= reached,
            (Some(_), None) => false,
        }
    }

    /// Apply an update in place; returns false (and changes nothing) when rejected
    pub fn apply(&mut self, update: StatusUpdate) -> bool {
        if !self.accepts(update.status) {
            return false;
        }

        if update.status == ProcessingStatus::Failed {
            self.error = update.error;
        } else {
            if self.status == ProcessingStatus::Failed {
                self.retries += 1;
            }
            self.stage = update.status;
            self.error = None;
        }
        self.status = update.status;
        for (key, value) in update.fields {
            self.fields.insert(key, value);
        }
        self.updated_at = Utc::now();
        true
    }
}

/// A status write issued by a stage
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: ProcessingStatus,
    pub error: Option<String>,
    pub fields: Map<String, Value>,
}

impl StatusUpdate {
    pub fn to(status: ProcessingStatus) -> Self {
        Self {
            status,
            error: None,
            fields: Map::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ProcessingStatus::Failed,
            error: Some(error.into()),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProcessingStatus::*;

    #[test]
    fn test_forward_path() {
        let mut record = StatusRecord::pending("p1", "r1", "j1");
        for status in [Parsing, ExtractingSkills, SkillsExtracted, Scoring, Completed] {
            assert!(record.apply(StatusUpdate::to(status)));
            assert_eq!(record.status, status);
        }
        assert!(!record.apply(StatusUpdate::failed("late")));
        assert_eq!(record.status, Completed);
    }

    #[test]
    fn test_regression_is_ignored() {
        let mut record = StatusRecord::pending("p1", "r1", "j1");
        record.apply(StatusUpdate::to(SkillsExtracted));

        // stale duplicate of the parse stage
        assert!(!record.apply(StatusUpdate::to(Parsing)));
        assert_eq!(record.status, SkillsExtracted);

        // same-stage rewrite is idempotent
        assert!(record.apply(StatusUpdate::to(SkillsExtracted).with_field("model", "m")));
        assert_eq!(record.fields["model"], "m");
    }

    #[test]
    fn test_failed_then_redelivered() {
        let mut record = StatusRecord::pending("p1", "r1", "j1");
        record.apply(StatusUpdate::to(ExtractingSkills));
        assert!(record.apply(StatusUpdate::failed("timeout")));
        assert_eq!(record.status, Failed);
        assert_eq!(record.error.as_deref(), Some("timeout"));

        // earlier stages stay closed, the failed stage can be re-entered
        assert!(!record.apply(StatusUpdate::to(Parsing)));
        assert!(record.apply(StatusUpdate::to(ExtractingSkills)));
        assert_eq!(record.retries, 1);
        assert!(record.error.is_none());
    }

    #[test]
    fn test_serialized_names() {
        let json = serde_json::to_string(&SkillsExtracted).unwrap();
        assert_eq!(json, "\"SKILLS_EXTRACTED\"");
        assert_eq!(ExtractingSkills.to_string(), "EXTRACTING_SKILLS");
    }
}
