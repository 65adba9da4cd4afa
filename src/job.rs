//! Job data model for the delivery core.
//!
//! This module defines the types a job takes through its lifecycle:
//!
//! - `JobStatus`: lifecycle state stored in the job record
//! - `JobRecord`: the per-job status record, the single source of truth
//! - `Envelope`: the minimal in-flight form carried by the queue
//! - `DeadLetterEntry`: terminal envelope plus failure reason
//!
//! # Lifecycle
//!
//! ```text
//! queued → processing → completed
//!                     → queued     (retry, attempts < MAX_ATTEMPTS)
//!                     → failed     (dead letter)
//! ```
//!
//! `completed` and `failed` are absorbing states and are never revisited.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while parsing a job record from its stored hash.
#[derive(Debug, Error)]
pub enum RecordError {
    /// A required field is absent from the hash.
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    /// A field is present but holds an unparseable value.
    #[error("invalid value '{value}' for field '{field}'")]
    InvalidField { field: &'static str, value: String },
}

/// Lifecycle state of a job.
///
/// The wire names (lowercase) are what the record store and the status
/// API use; `Display`/`FromStr` round-trip them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the queue for a worker.
    Queued,
    /// Claimed by a worker and executing.
    Processing,
    /// Finished successfully. Absorbing.
    Completed,
    /// Exhausted retries or was force-failed. Absorbing.
    Failed,
}

impl JobStatus {
    /// Returns whether this status is terminal (completed or failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(RecordError::InvalidField {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// The minimal in-flight representation of a job.
///
/// Envelopes are what the queue and the dead letter store carry. They are
/// a re-derivable projection of the job record: id, payload, attempt
/// counter and original creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Identity of the job this envelope belongs to.
    pub id: Uuid,
    /// Opaque task payload.
    pub task: String,
    /// Number of delivery attempts so far.
    pub attempts: u32,
    /// When the job was originally submitted.
    pub created_at: DateTime<Utc>,
}

impl Envelope {
    /// Creates a fresh envelope for a newly submitted job (zero attempts).
    pub fn new(id: Uuid, task: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            task: task.into(),
            attempts: 0,
            created_at,
        }
    }

    /// Returns a copy of this envelope carrying the given attempt count.
    ///
    /// Used when requeueing after a failure; the original `created_at`
    /// is preserved.
    pub fn with_attempts(&self, attempts: u32) -> Self {
        Self {
            attempts,
            ..self.clone()
        }
    }
}

/// Terminal envelope plus failure reason, as stored in the dead letter list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// The envelope at the moment the job was given up on.
    pub envelope: Envelope,
    /// Why the job was dead-lettered.
    pub error: String,
    /// When the job was moved to the dead letter store.
    pub moved_at: DateTime<Utc>,
}

/// The per-job status record.
///
/// Parsed from the Redis hash `job:{id}`. Fields beyond `status` and
/// `attempts` are optional: `result`/`completed_at` are present iff the
/// job completed, `error`/`failed_at` iff it failed, and `task` can be
/// absent on a corrupt or partially-written hash. The reconciler treats
/// a missing `task` as unrecoverable payload, not as a parse error.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: Uuid,
    pub status: JobStatus,
    pub task: Option<String>,
    pub attempts: u32,
    pub created_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub result: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Parses a record from the field map stored in Redis.
    ///
    /// `status` is required; `attempts` defaults to 0 when absent.
    /// Timestamps are RFC 3339 strings.
    pub fn from_hash(id: Uuid, fields: &HashMap<String, String>) -> Result<Self, RecordError> {
        let status = fields
            .get("status")
            .ok_or(RecordError::MissingField("status"))?
            .parse::<JobStatus>()?;

        let attempts = match fields.get("attempts") {
            Some(raw) => raw.parse::<u32>().map_err(|_| RecordError::InvalidField {
                field: "attempts",
                value: raw.clone(),
            })?,
            None => 0,
        };

        Ok(Self {
            id,
            status,
            task: fields.get("task").cloned(),
            attempts,
            created_at: parse_timestamp(fields, "created_at")?,
            worker_id: fields.get("worker_id").cloned(),
            result: fields.get("result").cloned(),
            completed_at: parse_timestamp(fields, "completed_at")?,
            error: fields.get("error").cloned(),
            failed_at: parse_timestamp(fields, "failed_at")?,
        })
    }
}

fn parse_timestamp(
    fields: &HashMap<String, String>,
    field: &'static str,
) -> Result<Option<DateTime<Utc>>, RecordError> {
    match fields.get(field) {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| RecordError::InvalidField {
                field,
                value: raw.clone(),
            }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_status_display_roundtrip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            let parsed: JobStatus = status.to_string().parse().expect("should parse back");
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_status_rejects_unknown() {
        assert!("cancelled".parse::<JobStatus>().is_err());
        assert!("".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_status_terminal() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_envelope_serialization() {
        let envelope = Envelope::new(Uuid::new_v4(), "hello", Utc::now());
        let json = serde_json::to_string(&envelope).expect("serialization should work");
        let parsed: Envelope = serde_json::from_str(&json).expect("deserialization should work");

        assert_eq!(parsed, envelope);
        assert_eq!(parsed.attempts, 0);
    }

    #[test]
    fn test_envelope_missing_id_rejected() {
        let json = r#"{"task":"hello","attempts":0,"created_at":"2025-02-03T12:00:00Z"}"#;
        assert!(serde_json::from_str::<Envelope>(json).is_err());
    }

    #[test]
    fn test_envelope_with_attempts_preserves_origin() {
        let envelope = Envelope::new(Uuid::new_v4(), "hello", Utc::now());
        let retried = envelope.with_attempts(2);

        assert_eq!(retried.attempts, 2);
        assert_eq!(retried.id, envelope.id);
        assert_eq!(retried.created_at, envelope.created_at);
    }

    #[test]
    fn test_record_from_hash_completed() {
        let id = Uuid::new_v4();
        let fields = hash(&[
            ("status", "completed"),
            ("task", "hello"),
            ("attempts", "1"),
            ("created_at", "2025-02-03T12:00:00+00:00"),
            ("result", "Processed task: hello"),
            ("completed_at", "2025-02-03T12:00:02+00:00"),
        ]);

        let record = JobRecord::from_hash(id, &fields).expect("should parse");
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.task.as_deref(), Some("hello"));
        assert_eq!(record.attempts, 1);
        assert_eq!(record.result.as_deref(), Some("Processed task: hello"));
        assert!(record.completed_at.is_some());
        assert!(record.error.is_none());
        assert!(record.failed_at.is_none());
    }

    #[test]
    fn test_record_from_hash_missing_task_is_not_an_error() {
        let fields = hash(&[("status", "processing"), ("attempts", "0")]);

        let record = JobRecord::from_hash(Uuid::new_v4(), &fields).expect("should parse");
        assert_eq!(record.status, JobStatus::Processing);
        assert!(record.task.is_none());
    }

    #[test]
    fn test_record_from_hash_missing_status_fails() {
        let fields = hash(&[("task", "hello")]);
        assert!(JobRecord::from_hash(Uuid::new_v4(), &fields).is_err());
    }

    #[test]
    fn test_record_from_hash_defaults_attempts() {
        let fields = hash(&[("status", "queued"), ("task", "hello")]);
        let record = JobRecord::from_hash(Uuid::new_v4(), &fields).expect("should parse");
        assert_eq!(record.attempts, 0);
    }

    #[test]
    fn test_record_from_hash_bad_timestamp() {
        let fields = hash(&[("status", "queued"), ("created_at", "not-a-date")]);
        assert!(JobRecord::from_hash(Uuid::new_v4(), &fields).is_err());
    }

    #[test]
    fn test_dead_letter_entry_structure() {
        let entry = DeadLetterEntry {
            envelope: Envelope::new(Uuid::new_v4(), "fail", Utc::now()).with_attempts(4),
            error: "Simulated failure for task 'fail'".to_string(),
            moved_at: Utc::now(),
        };

        let serialized = serde_json::to_string(&entry).expect("entry should serialize");
        let parsed: serde_json::Value =
            serde_json::from_str(&serialized).expect("should parse back");

        assert!(parsed.get("envelope").is_some());
        assert!(parsed.get("error").is_some());
        assert!(parsed.get("moved_at").is_some());
        assert_eq!(parsed["envelope"]["attempts"], 4);
    }
}
