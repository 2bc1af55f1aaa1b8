//! Story, node and job types.
//!
//! Persisted rows (`StoryRecord`, `NarrativeNode`, `GenerationJob`) and the
//! client-facing views built from them. Wire format is snake_case JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{StoryError, StoryResult};

/// A labeled choice pointing at another node of the same story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeOption {
    pub text: String,
    pub node_id: i64,
}

/// One persisted point in a story.
#[derive(Debug, Clone, PartialEq)]
pub struct NarrativeNode {
    pub id: i64,
    pub story_id: i64,
    pub content: String,
    pub is_root: bool,
    pub is_ending: bool,
    pub is_winning_ending: bool,
    pub options: Vec<NodeOption>,
}

/// Column values for a node that has not been inserted yet.
#[derive(Debug, Clone, Copy)]
pub struct NewNode<'a> {
    pub story_id: i64,
    pub content: &'a str,
    pub is_root: bool,
    pub is_ending: bool,
    pub is_winning_ending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoryRecord {
    pub id: i64,
    pub title: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Generation jobs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks one story generation request from submission to terminal status.
///
/// The status only moves Pending -> Processing -> Completed | Failed. The
/// transition methods keep `story_id`, `error` and `completed_at` consistent
/// with the status and reject every other move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub job_id: String,
    pub session_id: String,
    pub theme: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub story_id: Option<i64>,
}

impl GenerationJob {
    pub fn new(session_id: impl Into<String>, theme: impl Into<String>) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            theme: theme.into(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
            story_id: None,
        }
    }

    pub fn mark_processing(&mut self) -> StoryResult<()> {
        self.transition(JobStatus::Processing)
    }

    pub fn mark_completed(&mut self, story_id: i64) -> StoryResult<()> {
        self.transition(JobStatus::Completed)?;
        self.story_id = Some(story_id);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) -> StoryResult<()> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    fn transition(&mut self, to: JobStatus) -> StoryResult<()> {
        let allowed = matches!(
            (self.status, to),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        );
        if !allowed {
            return Err(StoryError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

// ============================================================================
// Read-side views
// ============================================================================

/// A node addressed by identifier, with options pointing at other views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeView {
    pub id: i64,
    pub content: String,
    pub is_ending: bool,
    pub is_winning_ending: bool,
    #[serde(default)]
    pub options: Vec<NodeOption>,
}

impl From<NarrativeNode> for NodeView {
    fn from(node: NarrativeNode) -> Self {
        Self {
            id: node.id,
            content: node.content,
            is_ending: node.is_ending,
            is_winning_ending: node.is_winning_ending,
            options: node.options,
        }
    }
}

/// A whole story as served to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteStoryView {
    pub id: i64,
    pub title: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub root_nodes: Vec<NodeView>,
    pub all_nodes: BTreeMap<i64, NodeView>,
}

// ============================================================================
// Model output drafts
// ============================================================================

/// A validated node of the nested model output.
///
/// Ending drafts never carry options.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDraft {
    pub content: String,
    pub is_ending: bool,
    pub is_winning_ending: bool,
    pub options: Vec<OptionDraft>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionDraft {
    pub text: String,
    pub next_node: NodeDraft,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_happy_path() {
        let mut job = GenerationJob::new("sess", "pirates");
        assert_eq!(job.status, JobStatus::Pending);

        job.mark_processing().unwrap();
        job.mark_completed(42).unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.story_id, Some(42));
        assert!(job.error.is_none());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_job_failure_sets_error_only() {
        let mut job = GenerationJob::new("sess", "pirates");
        job.mark_processing().unwrap();
        job.mark_failed("ModelCallError: boom").unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("ModelCallError: boom"));
        assert!(job.story_id.is_none());
    }

    #[test]
    fn test_job_never_regresses() {
        let mut job = GenerationJob::new("sess", "pirates");
        assert!(matches!(
            job.mark_completed(1),
            Err(StoryError::InvalidTransition { .. })
        ));

        job.mark_processing().unwrap();
        assert!(job.mark_processing().is_err());
        job.mark_failed("x").unwrap();

        assert!(job.mark_processing().is_err());
        assert!(job.mark_completed(1).is_err());
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.story_id.is_none());
    }

    #[test]
    fn test_job_wire_format() {
        let job = GenerationJob::new("sess", "space");
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["status"], "PENDING");
        assert!(json["completed_at"].is_null());
        assert!(json["error"].is_null());
        assert!(json["story_id"].is_null());
        assert_eq!(json["theme"], "space");
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("pending"), None);
    }
}
