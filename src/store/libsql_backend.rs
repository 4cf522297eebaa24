//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. The state transitions
//! that carry correctness weight (`transition_pending`, `claim_job`) are
//! single guarded UPDATEs checked by affected-row count, so concurrent
//! callers observe exactly one winner.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Row, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DatabaseError, TransitionError};
use crate::store::migrations;
use crate::store::traits::{
    Database, JobStatus, PendingAnnouncement, PendingState, ScheduledJob,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&backend.conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&backend.conn).await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn row_to_pending(row: &Row) -> Result<PendingAnnouncement, DatabaseError> {
    let id: String = row.get(0).map_err(col_err)?;
    let channel_id: String = row.get(1).map_err(col_err)?;
    let content: String = row.get(2).map_err(col_err)?;
    let image_url: String = row.get(3).map_err(col_err)?;
    let state_str: String = row.get(4).map_err(col_err)?;
    let created_at: String = row.get(5).map_err(col_err)?;

    let state = PendingState::parse(&state_str).ok_or_else(|| {
        DatabaseError::Serialization(format!("unknown pending state: {state_str}"))
    })?;

    Ok(PendingAnnouncement {
        id,
        channel_id,
        content,
        image_url,
        state,
        created_at: parse_datetime(&created_at),
    })
}

fn row_to_job(row: &Row) -> Result<ScheduledJob, DatabaseError> {
    let id_str: String = row.get(0).map_err(col_err)?;
    let announcement_id: String = row.get(1).map_err(col_err)?;
    let fire_at: String = row.get(2).map_err(col_err)?;
    let content: String = row.get(3).map_err(col_err)?;
    let image_url: String = row.get(4).map_err(col_err)?;
    let channel_id: String = row.get(5).map_err(col_err)?;
    let status_str: String = row.get(6).map_err(col_err)?;
    let created_at: String = row.get(7).map_err(col_err)?;

    let id = Uuid::parse_str(&id_str)
        .map_err(|e| DatabaseError::Serialization(format!("bad job id {id_str}: {e}")))?;
    let status = JobStatus::parse(&status_str)
        .ok_or_else(|| DatabaseError::Serialization(format!("unknown job status: {status_str}")))?;

    Ok(ScheduledJob {
        id,
        announcement_id,
        fire_at: parse_datetime(&fire_at),
        content,
        image_url,
        channel_id,
        status,
        created_at: parse_datetime(&created_at),
    })
}

fn col_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::Serialization(format!("row parse: {e}"))
}

const PENDING_COLUMNS: &str = "id, channel_id, content, image_url, state, created_at";
const JOB_COLUMNS: &str =
    "id, announcement_id, fire_at, content, image_url, channel_id, status, created_at";

// ── Database trait implementation ───────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn insert_pending(&self, pending: &PendingAnnouncement) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO pending_announcements (id, channel_id, content, image_url, state, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    pending.id.as_str(),
                    pending.channel_id.as_str(),
                    pending.content.as_str(),
                    pending.image_url.as_str(),
                    pending.state.as_str(),
                    pending.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_pending: {e}")))?;

        debug!(announcement_id = %pending.id, "Pending announcement inserted");
        Ok(())
    }

    async fn get_pending(
        &self,
        id: &str,
    ) -> Result<Option<PendingAnnouncement>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PENDING_COLUMNS} FROM pending_announcements WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_pending: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_pending(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_pending: {e}"))),
        }
    }

    async fn transition_pending(
        &self,
        id: &str,
        from: PendingState,
        to: PendingState,
    ) -> Result<(), TransitionError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE pending_announcements SET state = ?1 WHERE id = ?2 AND state = ?3",
                params![to.as_str(), id, from.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("transition_pending: {e}")))?;

        if affected == 1 {
            debug!(announcement_id = %id, from = from.as_str(), to = to.as_str(), "State transition");
            return Ok(());
        }

        // Lost the CAS — distinguish missing from out-of-state for logs.
        match self.get_pending(id).await? {
            None => Err(TransitionError::NotFound { id: id.to_string() }),
            Some(current) => Err(TransitionError::Conflict {
                id: id.to_string(),
                expected: from.as_str().to_string(),
                actual: current.state.as_str().to_string(),
            }),
        }
    }

    async fn insert_job(&self, job: &ScheduledJob) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO scheduled_jobs (id, announcement_id, fire_at, content, image_url, channel_id, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    job.id.to_string(),
                    job.announcement_id.as_str(),
                    job.fire_at.to_rfc3339(),
                    job.content.as_str(),
                    job.image_url.as_str(),
                    job.channel_id.as_str(),
                    job.status.as_str(),
                    job.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_job: {e}")))?;

        debug!(job_id = %job.id, fire_at = %job.fire_at, "Job persisted");
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<ScheduledJob>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_job: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_job: {e}"))),
        }
    }

    async fn claim_job(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE scheduled_jobs SET status = 'fired' WHERE id = ?1 AND status = 'pending'",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_job: {e}")))?;

        Ok(affected == 1)
    }

    async fn mark_job_failed(&self, id: Uuid, reason: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE scheduled_jobs SET status = 'failed', fail_reason = ?1 WHERE id = ?2",
                params![reason, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_job_failed: {e}")))?;
        Ok(())
    }

    async fn list_pending_jobs(&self) -> Result<Vec<ScheduledJob>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE status = 'pending' ORDER BY fire_at ASC"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_pending_jobs: {e}")))?;

        let mut jobs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_pending_jobs: {e}")))?
        {
            jobs.push(row_to_job(&row)?);
        }
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn backend() -> Arc<LibSqlBackend> {
        Arc::new(LibSqlBackend::new_memory().await.unwrap())
    }

    fn pending(id: &str) -> PendingAnnouncement {
        PendingAnnouncement::new(id, "chan-1", "【🎤Live🎤】", "https://cdn.example/flyer.png")
    }

    fn job(announcement_id: &str, fire_at: DateTime<Utc>) -> ScheduledJob {
        ScheduledJob::new(
            announcement_id,
            fire_at,
            "content",
            "https://cdn.example/flyer.png",
            "chan-1",
        )
    }

    // ── Pending announcements ───────────────────────────────────────

    #[tokio::test]
    async fn insert_and_get_pending() {
        let db = backend().await;
        db.insert_pending(&pending("msg-1")).await.unwrap();

        let loaded = db.get_pending("msg-1").await.unwrap().unwrap();
        assert_eq!(loaded.id, "msg-1");
        assert_eq!(loaded.channel_id, "chan-1");
        assert_eq!(loaded.state, PendingState::AwaitingConfirmation);
    }

    #[tokio::test]
    async fn get_pending_missing_is_none() {
        let db = backend().await;
        assert!(db.get_pending("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transition_happy_path() {
        let db = backend().await;
        db.insert_pending(&pending("msg-1")).await.unwrap();

        db.transition_pending(
            "msg-1",
            PendingState::AwaitingConfirmation,
            PendingState::Scheduled,
        )
        .await
        .unwrap();

        let loaded = db.get_pending("msg-1").await.unwrap().unwrap();
        assert_eq!(loaded.state, PendingState::Scheduled);
    }

    #[tokio::test]
    async fn transition_wrong_state_is_conflict() {
        let db = backend().await;
        db.insert_pending(&pending("msg-1")).await.unwrap();

        let err = db
            .transition_pending("msg-1", PendingState::Scheduled, PendingState::Dispatched)
            .await
            .unwrap_err();
        assert!(matches!(err, TransitionError::Conflict { .. }));
    }

    #[tokio::test]
    async fn transition_missing_is_not_found() {
        let db = backend().await;
        let err = db
            .transition_pending(
                "ghost",
                PendingState::AwaitingConfirmation,
                PendingState::Scheduled,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransitionError::NotFound { .. }));
    }

    #[tokio::test]
    async fn concurrent_transitions_have_one_winner() {
        let db = backend().await;
        db.insert_pending(&pending("msg-1")).await.unwrap();

        let a = {
            let db = Arc::clone(&db);
            tokio::spawn(async move {
                db.transition_pending(
                    "msg-1",
                    PendingState::AwaitingConfirmation,
                    PendingState::Scheduled,
                )
                .await
            })
        };
        let b = {
            let db = Arc::clone(&db);
            tokio::spawn(async move {
                db.transition_pending(
                    "msg-1",
                    PendingState::AwaitingConfirmation,
                    PendingState::Scheduled,
                )
                .await
            })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(TransitionError::Conflict { .. })))
        );
    }

    // ── Scheduled jobs ──────────────────────────────────────────────

    #[tokio::test]
    async fn insert_and_get_job() {
        let db = backend().await;
        let j = job("msg-1", Utc::now() + Duration::hours(1));
        db.insert_job(&j).await.unwrap();

        let loaded = db.get_job(j.id).await.unwrap().unwrap();
        assert_eq!(loaded.announcement_id, "msg-1");
        assert_eq!(loaded.status, JobStatus::Pending);
        // RFC 3339 round-trip keeps the instant.
        assert_eq!(loaded.fire_at.timestamp(), j.fire_at.timestamp());
    }

    #[tokio::test]
    async fn claim_job_succeeds_exactly_once() {
        let db = backend().await;
        let j = job("msg-1", Utc::now());
        db.insert_job(&j).await.unwrap();

        assert!(db.claim_job(j.id).await.unwrap());
        assert!(!db.claim_job(j.id).await.unwrap());

        let loaded = db.get_job(j.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Fired);
    }

    #[tokio::test]
    async fn claim_missing_job_is_false() {
        let db = backend().await;
        assert!(!db.claim_job(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn failed_job_leaves_pending_list() {
        let db = backend().await;
        let j = job("msg-1", Utc::now());
        db.insert_job(&j).await.unwrap();

        db.mark_job_failed(j.id, "gateway send failed").await.unwrap();

        assert!(db.list_pending_jobs().await.unwrap().is_empty());
        let loaded = db.get_job(j.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn pending_jobs_listed_in_fire_order() {
        let db = backend().await;
        let now = Utc::now();
        let late = job("a", now + Duration::hours(2));
        let early = job("b", now + Duration::hours(1));
        db.insert_job(&late).await.unwrap();
        db.insert_job(&early).await.unwrap();

        let listed = db.list_pending_jobs().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, early.id);
        assert_eq!(listed[1].id, late.id);
    }
}
