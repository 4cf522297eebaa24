//! Backend-agnostic `Database` trait and the persisted entity types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{DatabaseError, TransitionError};

/// Lifecycle state of a pending announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    /// Assembled, waiting for a release-time confirmation reply.
    AwaitingConfirmation,
    /// Confirmed; exactly one scheduled job references it.
    Scheduled,
    /// The job fired and the announcement was sent.
    Dispatched,
}

impl PendingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingState::AwaitingConfirmation => "awaiting_confirmation",
            PendingState::Scheduled => "scheduled",
            PendingState::Dispatched => "dispatched",
        }
    }

    pub fn parse(s: &str) -> Option<PendingState> {
        match s {
            "awaiting_confirmation" => Some(PendingState::AwaitingConfirmation),
            "scheduled" => Some(PendingState::Scheduled),
            "dispatched" => Some(PendingState::Dispatched),
            _ => None,
        }
    }
}

/// An assembled announcement awaiting confirmation or dispatch.
///
/// `id` is the originating message id; replies are correlated against it.
#[derive(Debug, Clone)]
pub struct PendingAnnouncement {
    pub id: String,
    pub channel_id: String,
    pub content: String,
    /// Opaque flyer handle; never re-validated.
    pub image_url: String,
    pub state: PendingState,
    pub created_at: DateTime<Utc>,
}

impl PendingAnnouncement {
    pub fn new(id: &str, channel_id: &str, content: &str, image_url: &str) -> Self {
        Self {
            id: id.to_string(),
            channel_id: channel_id.to_string(),
            content: content.to_string(),
            image_url: image_url.to_string(),
            state: PendingState::AwaitingConfirmation,
            created_at: Utc::now(),
        }
    }
}

/// Execution status of a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Fired,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Fired => "fired",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "fired" => Some(JobStatus::Fired),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// A durable deferred job. Fire time and payload are immutable once
/// enqueued; only `status` changes, and only through the store's own
/// claim/fail operations.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub id: Uuid,
    pub announcement_id: String,
    pub fire_at: DateTime<Utc>,
    pub content: String,
    pub image_url: String,
    pub channel_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

impl ScheduledJob {
    pub fn new(
        announcement_id: &str,
        fire_at: DateTime<Utc>,
        content: &str,
        image_url: &str,
        channel_id: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            announcement_id: announcement_id.to_string(),
            fire_at,
            content: content.to_string(),
            image_url: image_url.to_string(),
            channel_id: channel_id.to_string(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// Backend-agnostic persistence for pending announcements and jobs.
#[async_trait]
pub trait Database: Send + Sync {
    // ── Pending announcements ───────────────────────────────────────

    /// Insert a new pending announcement (state AwaitingConfirmation).
    async fn insert_pending(&self, pending: &PendingAnnouncement) -> Result<(), DatabaseError>;

    /// Get a pending announcement by id.
    async fn get_pending(&self, id: &str)
    -> Result<Option<PendingAnnouncement>, DatabaseError>;

    /// Compare-and-set state transition. Fails with
    /// `TransitionError::Conflict` if the current state is not `from`,
    /// which is what makes duplicate or out-of-order replies safe.
    async fn transition_pending(
        &self,
        id: &str,
        from: PendingState,
        to: PendingState,
    ) -> Result<(), TransitionError>;

    // ── Scheduled jobs ──────────────────────────────────────────────

    /// Persist a new job (status Pending).
    async fn insert_job(&self, job: &ScheduledJob) -> Result<(), DatabaseError>;

    /// Get a job by id.
    async fn get_job(&self, id: Uuid) -> Result<Option<ScheduledJob>, DatabaseError>;

    /// Atomically claim a Pending job for execution (Pending → Fired).
    /// Returns true for exactly one caller; a recovery pass and a live
    /// timer racing on the same job cannot both claim it.
    async fn claim_job(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// Mark a job Failed with an operational reason.
    async fn mark_job_failed(&self, id: Uuid, reason: &str) -> Result<(), DatabaseError>;

    /// All Pending jobs, ascending fire time. Used by startup recovery.
    async fn list_pending_jobs(&self) -> Result<Vec<ScheduledJob>, DatabaseError>;
}
