//! Routes inbound gateway messages through the announcement pipeline.
//!
//! Each message is handled on its own spawned task, so a slow
//! extraction call blocks only that announcement. The pending store's
//! compare-and-set transition is the only synchronization between
//! concurrent handlers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Local, LocalResult, TimeZone, Utc};
use futures::StreamExt;

use crate::announce::Assembler;
use crate::error::{Error, TemporalError, TransitionError};
use crate::extract::Extractor;
use crate::gateway::{Gateway, InboundMessage, OutboundMessage};
use crate::scheduler::{Dispatch, Scheduler};
use crate::store::{Database, PendingAnnouncement, PendingState, ScheduledJob};
use crate::temporal::TemporalNormalizer;

const ATTACH_HINT: &str =
    "Attach a flyer image to your announcement text and I'll draft the post.";

const DATE_FORMAT_HINT: &str = "I couldn't read that as a date/time. \
     Reply with something like 7/30, 7月30日 19:00, or 2025-07-30 20:00.";

const NO_PENDING: &str = "No announcement is awaiting a schedule for that message.";

/// Drives the announcement pipeline off the gateway message stream.
pub struct Orchestrator {
    gateway: Arc<dyn Gateway>,
    store: Arc<dyn Database>,
    scheduler: Arc<Scheduler>,
    extractor: Extractor,
    assembler: Assembler,
    normalizer: TemporalNormalizer,
    announce_channel: String,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        store: Arc<dyn Database>,
        scheduler: Arc<Scheduler>,
        extractor: Extractor,
        assembler: Assembler,
        normalizer: TemporalNormalizer,
        announce_channel: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            store,
            scheduler,
            extractor,
            assembler,
            normalizer,
            announce_channel,
        })
    }

    /// Consume the gateway stream until it ends. Each message gets its
    /// own task; handler errors are logged, never fatal.
    pub async fn run(self: Arc<Self>) -> Result<(), Error> {
        let mut stream = self.gateway.start().await?;

        while let Some(message) = stream.next().await {
            let orchestrator = Arc::clone(&self);
            tokio::spawn(async move {
                let message_id = message.id.clone();
                if let Err(e) = orchestrator.handle_message(message).await {
                    tracing::error!(%message_id, "Message handling failed: {e}");
                }
            });
        }

        tracing::info!("Gateway stream ended");
        Ok(())
    }

    pub async fn handle_message(&self, message: InboundMessage) -> Result<(), Error> {
        if message.author_is_bot {
            return Ok(());
        }

        if let Some(parent_id) = message.reference.clone() {
            self.handle_confirmation(&message, &parent_id).await
        } else if message.first_attachment_url().is_some() {
            self.handle_announcement(&message).await
        } else {
            self.reply(&message, ATTACH_HINT).await
        }
    }

    /// Fresh announcement: extract, validate, render, park it awaiting a
    /// release-time confirmation.
    async fn handle_announcement(&self, message: &InboundMessage) -> Result<(), Error> {
        let image_url = match message.first_attachment_url() {
            Some(url) => url.to_string(),
            None => return Ok(()),
        };

        let extracted = match self.extractor.extract(&message.content).await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(message_id = %message.id, "Extraction failed: {e}");
                return self
                    .reply(
                        message,
                        "I couldn't read that announcement. Please post it again.",
                    )
                    .await;
            }
        };

        let rendered = match self.assembler.assemble(&extracted) {
            Ok(r) => r,
            Err(e) => return self.reply(message, &e.to_string()).await,
        };

        if rendered.link_suppressed {
            tracing::info!(message_id = %message.id, "Ticket link suppressed by denylist");
        }

        let pending = PendingAnnouncement::new(
            &message.id,
            &self.announce_channel,
            &rendered.content,
            &image_url,
        );
        self.store.insert_pending(&pending).await?;
        tracing::info!(message_id = %message.id, "Announcement awaiting confirmation");

        let prompt = format!(
            "{}\n\nWhen should I post this? Reply to your announcement with a \
             date and time (e.g. 7/30 20:00).",
            rendered.content
        );
        self.reply(message, &prompt).await
    }

    /// Confirmation reply: resolve the date/time and commit the job.
    ///
    /// The Awaiting → Scheduled CAS happens before enqueue; if the
    /// enqueue itself fails the transition is rolled back so the poster
    /// can reply again.
    async fn handle_confirmation(
        &self,
        message: &InboundMessage,
        parent_id: &str,
    ) -> Result<(), Error> {
        let Some(pending) = self.store.get_pending(parent_id).await? else {
            return self.reply(message, NO_PENDING).await;
        };

        let fire_at = match self.resolve_fire_time(&message.content) {
            Ok(instant) => instant,
            Err(e) => {
                tracing::debug!(parent_id, "Unusable confirmation reply: {e}");
                return self.reply(message, DATE_FORMAT_HINT).await;
            }
        };

        match self
            .store
            .transition_pending(
                parent_id,
                PendingState::AwaitingConfirmation,
                PendingState::Scheduled,
            )
            .await
        {
            Ok(()) => {}
            Err(TransitionError::Conflict { .. } | TransitionError::NotFound { .. }) => {
                return self.reply(message, NO_PENDING).await;
            }
            Err(TransitionError::Database(e)) => return Err(e.into()),
        }

        let job = ScheduledJob::new(
            parent_id,
            fire_at,
            &pending.content,
            &pending.image_url,
            &pending.channel_id,
        );

        if let Err(e) = self.scheduler.enqueue(job).await {
            // Roll back so a later reply can still schedule it.
            if let Err(rollback) = self
                .store
                .transition_pending(
                    parent_id,
                    PendingState::Scheduled,
                    PendingState::AwaitingConfirmation,
                )
                .await
            {
                tracing::error!(parent_id, "Rollback after enqueue failure failed: {rollback}");
            }
            return Err(e);
        }

        tracing::info!(parent_id, fire_at = %fire_at, "Announcement scheduled");
        let local = fire_at.with_timezone(&Local);
        self.reply(
            message,
            &format!("Scheduled for {}.", local.format("%Y-%m-%d %H:%M")),
        )
        .await
    }

    /// Normalize reply text into an absolute instant. The reference
    /// year is the year the reply is processed in.
    fn resolve_fire_time(
        &self,
        raw: &str,
    ) -> Result<chrono::DateTime<Utc>, TemporalError> {
        let naive = self.normalizer.normalize(raw, Local::now().year())?;
        match Local.from_local_datetime(&naive) {
            LocalResult::Single(local) | LocalResult::Ambiguous(local, _) => {
                Ok(local.with_timezone(&Utc))
            }
            LocalResult::None => Err(TemporalError::Unparseable {
                input: raw.to_string(),
            }),
        }
    }

    async fn reply(&self, message: &InboundMessage, content: &str) -> Result<(), Error> {
        self.gateway
            .send(
                &message.channel_id,
                OutboundMessage::text(content).in_reply_to(&message.id),
            )
            .await?;
        Ok(())
    }
}

/// Fire-time callback: posts the announcement and settles its state.
pub struct JobDispatcher {
    gateway: Arc<dyn Gateway>,
    store: Arc<dyn Database>,
}

impl JobDispatcher {
    pub fn new(gateway: Arc<dyn Gateway>, store: Arc<dyn Database>) -> Arc<Self> {
        Arc::new(Self { gateway, store })
    }
}

#[async_trait]
impl Dispatch for JobDispatcher {
    async fn dispatch(&self, job: &ScheduledJob) -> Result<(), Error> {
        self.gateway
            .send(
                &job.channel_id,
                OutboundMessage::text(&job.content).with_attachment(&job.image_url),
            )
            .await?;

        // The send succeeded; a settle failure here must not fail the job.
        if let Err(e) = self
            .store
            .transition_pending(
                &job.announcement_id,
                PendingState::Scheduled,
                PendingState::Dispatched,
            )
            .await
        {
            tracing::warn!(
                announcement_id = %job.announcement_id,
                "Dispatched but could not settle announcement state: {e}"
            );
        }

        Ok(())
    }
}
