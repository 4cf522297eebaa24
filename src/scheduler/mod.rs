//! Durable deferred-job engine.
//!
//! Every job is persisted before its in-memory timer is armed, so a
//! crash between the two cannot lose a job — startup recovery re-arms
//! it. Firing is guarded by the store's claim CAS, which is what makes
//! a recovery pass and a live timer racing on the same job safe: at
//! most one of them runs the dispatch callback.
//!
//! A job whose fire time is already past is not rejected — it fires on
//! an immediately spawned task. A same-day confirmation should post
//! right away.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, JobError};
use crate::store::{Database, ScheduledJob};

/// Callback invoked when a job's fire time arrives.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, job: &ScheduledJob) -> Result<(), Error>;
}

/// Schedules and executes durable deferred jobs.
pub struct Scheduler {
    store: Arc<dyn Database>,
    dispatch: Arc<dyn Dispatch>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Database>, dispatch: Arc<dyn Dispatch>) -> Arc<Self> {
        Arc::new(Self { store, dispatch })
    }

    /// Persist a job, then arm its timer (write-then-arm ordering).
    pub async fn enqueue(self: &Arc<Self>, job: ScheduledJob) -> Result<Uuid, Error> {
        let job_id = job.id;
        self.store.insert_job(&job).await?;
        tracing::info!(job_id = %job_id, fire_at = %job.fire_at, "Job enqueued");
        self.arm(job);
        Ok(job_id)
    }

    /// Load all pending jobs and re-arm them. Run once at startup.
    ///
    /// Overdue jobs fire immediately, sequentially, in ascending fire
    /// time order. Returns the number of jobs recovered.
    pub async fn recover(self: &Arc<Self>) -> Result<usize, Error> {
        let jobs = self.store.list_pending_jobs().await?;
        let count = jobs.len();
        let now = Utc::now();

        for job in jobs {
            if job.fire_at <= now {
                tracing::warn!(job_id = %job.id, fire_at = %job.fire_at, "Firing overdue job");
                self.fire(&job).await;
            } else {
                self.arm(job);
            }
        }

        if count > 0 {
            tracing::info!(count, "Recovered scheduled jobs");
        }
        Ok(count)
    }

    /// Cancel a pending job. Operational surface only — there is no
    /// poster-facing undo.
    pub async fn cancel(&self, job_id: Uuid) -> Result<(), JobError> {
        if self.store.claim_job(job_id).await? {
            self.store.mark_job_failed(job_id, "cancelled").await?;
            tracing::info!(job_id = %job_id, "Job cancelled");
            return Ok(());
        }
        match self.store.get_job(job_id).await? {
            None => Err(JobError::NotFound { id: job_id }),
            Some(_) => Err(JobError::AlreadyResolved { id: job_id }),
        }
    }

    /// Arm a timer for the job. Any still-pending armed job that was
    /// cancelled or claimed elsewhere loses the claim CAS and is a no-op.
    fn arm(self: &Arc<Self>, job: ScheduledJob) {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let now = Utc::now();
            if job.fire_at > now {
                let delay = (job.fire_at - now).to_std().unwrap_or_default();
                tokio::time::sleep(delay).await;
            }
            scheduler.fire(&job).await;
        });
    }

    /// Claim and execute a job. The Pending → Fired transition happens
    /// exactly once per job; losers of the claim return silently.
    ///
    /// A dispatch callback error marks the job Failed and is logged —
    /// there is no automatic retry.
    pub async fn fire(&self, job: &ScheduledJob) {
        match self.store.claim_job(job.id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(job_id = %job.id, "Job already resolved, skipping fire");
                return;
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, "Failed to claim job: {e}");
                return;
            }
        }

        if let Err(e) = self.dispatch.dispatch(job).await {
            tracing::error!(job_id = %job.id, "Dispatch failed: {e}");
            if let Err(mark_err) = self.store.mark_job_failed(job.id, &e.to_string()).await {
                tracing::error!(job_id = %job.id, "Failed to record dispatch failure: {mark_err}");
            }
        } else {
            tracing::info!(job_id = %job.id, "Job dispatched");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;

    use crate::error::GatewayError;
    use crate::store::{JobStatus, LibSqlBackend};

    /// Records dispatched job ids; optionally fails every dispatch.
    struct RecordingDispatch {
        fired: Mutex<Vec<Uuid>>,
        fail: bool,
    }

    impl RecordingDispatch {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fired: Mutex::new(Vec::new()),
                fail,
            })
        }

        fn fired(&self) -> Vec<Uuid> {
            self.fired.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Dispatch for RecordingDispatch {
        async fn dispatch(&self, job: &ScheduledJob) -> Result<(), Error> {
            self.fired.lock().unwrap().push(job.id);
            if self.fail {
                return Err(GatewayError::SendFailed {
                    name: "test".to_string(),
                    reason: "boom".to_string(),
                }
                .into());
            }
            Ok(())
        }
    }

    async fn store() -> Arc<LibSqlBackend> {
        Arc::new(LibSqlBackend::new_memory().await.unwrap())
    }

    fn job_at(offset: ChronoDuration) -> ScheduledJob {
        ScheduledJob::new(
            "msg-1",
            Utc::now() + offset,
            "content",
            "https://cdn.example/flyer.png",
            "chan-1",
        )
    }

    #[tokio::test]
    async fn past_fire_time_fires_immediately() {
        let store = store().await;
        let dispatch = RecordingDispatch::new(false);
        let scheduler = Scheduler::new(store.clone(), dispatch.clone());

        let job = job_at(ChronoDuration::hours(-1));
        let job_id = scheduler.enqueue(job).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(dispatch.fired(), vec![job_id]);
        let loaded = store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Fired);
    }

    #[tokio::test]
    async fn future_job_does_not_fire_early() {
        let store = store().await;
        let dispatch = RecordingDispatch::new(false);
        let scheduler = Scheduler::new(store.clone(), dispatch.clone());

        scheduler.enqueue(job_at(ChronoDuration::hours(1))).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(dispatch.fired().is_empty());
        assert_eq!(store.list_pending_jobs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dispatch_error_marks_job_failed() {
        let store = store().await;
        let dispatch = RecordingDispatch::new(true);
        let scheduler = Scheduler::new(store.clone(), dispatch.clone());

        let job_id = scheduler.enqueue(job_at(ChronoDuration::hours(-1))).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let loaded = store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn concurrent_fire_executes_dispatch_once() {
        let store = store().await;
        let dispatch = RecordingDispatch::new(false);
        let scheduler = Scheduler::new(store.clone(), dispatch.clone());

        let job = job_at(ChronoDuration::hours(-1));
        store.insert_job(&job).await.unwrap();

        let a = {
            let scheduler = Arc::clone(&scheduler);
            let job = job.clone();
            tokio::spawn(async move { scheduler.fire(&job).await })
        };
        let b = {
            let scheduler = Arc::clone(&scheduler);
            let job = job.clone();
            tokio::spawn(async move { scheduler.fire(&job).await })
        };
        a.await.unwrap();
        b.await.unwrap();

        assert_eq!(dispatch.fired().len(), 1);
    }

    #[tokio::test]
    async fn recover_fires_overdue_jobs_in_fire_order() {
        let store = store().await;
        let now = Utc::now();
        let later = ScheduledJob::new("a", now - ChronoDuration::minutes(5), "c", "i", "ch");
        let earlier = ScheduledJob::new("b", now - ChronoDuration::minutes(30), "c", "i", "ch");
        store.insert_job(&later).await.unwrap();
        store.insert_job(&earlier).await.unwrap();

        let dispatch = RecordingDispatch::new(false);
        let scheduler = Scheduler::new(store.clone(), dispatch.clone());
        let count = scheduler.recover().await.unwrap();

        assert_eq!(count, 2);
        assert_eq!(dispatch.fired(), vec![earlier.id, later.id]);
    }

    #[tokio::test]
    async fn recover_rearms_future_jobs_without_firing() {
        let store = store().await;
        let job = job_at(ChronoDuration::hours(1));
        store.insert_job(&job).await.unwrap();

        let dispatch = RecordingDispatch::new(false);
        let scheduler = Scheduler::new(store.clone(), dispatch.clone());
        assert_eq!(scheduler.recover().await.unwrap(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(dispatch.fired().is_empty());
    }

    #[tokio::test]
    async fn cancelled_job_never_dispatches() {
        let store = store().await;
        let dispatch = RecordingDispatch::new(false);
        let scheduler = Scheduler::new(store.clone(), dispatch.clone());

        let job = job_at(ChronoDuration::milliseconds(150));
        let job_id = scheduler.enqueue(job).await.unwrap();
        scheduler.cancel(job_id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(dispatch.fired().is_empty());
        assert_eq!(
            store.get_job(job_id).await.unwrap().unwrap().status,
            JobStatus::Failed
        );
    }

    #[tokio::test]
    async fn cancel_after_fire_is_already_resolved() {
        let store = store().await;
        let dispatch = RecordingDispatch::new(false);
        let scheduler = Scheduler::new(store.clone(), dispatch.clone());

        let job = job_at(ChronoDuration::hours(-1));
        store.insert_job(&job).await.unwrap();
        scheduler.fire(&job).await;

        let err = scheduler.cancel(job.id).await.unwrap_err();
        assert!(matches!(err, JobError::AlreadyResolved { .. }));
    }

    #[tokio::test]
    async fn cancel_unknown_job_is_not_found() {
        let store = store().await;
        let scheduler = Scheduler::new(store, RecordingDispatch::new(false));
        let err = scheduler.cancel(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, JobError::NotFound { .. }));
    }
}
