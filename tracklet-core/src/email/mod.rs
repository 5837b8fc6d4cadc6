//! Email ingestion: poll the mailbox, extract tracking candidates,
//! validate them against carriers, and materialize shipments.

pub mod extract;
pub mod llm;
pub mod mailbox;
pub mod sanitize;

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracklet_config::EmailSettings;
use tracklet_model::{
    EmailProcessingRecord, EmailProcessingStatus, EmailScanMethod,
    MailMessage, NewShipment, RefreshCaller, TrackingCandidate,
};

use crate::database::Database;
use crate::error::TrackerError;
use crate::refresh::RefreshCoordinator;
pub use llm::{ExtractionModel, HttpExtractionModel, LlmError};
pub use mailbox::{ImapMailbox, Mailbox};

/// The background mailbox worker. One instance per process; messages are
/// processed oldest first, each reaching a terminal processing record
/// before the worker advances.
pub struct EmailIngestWorker {
    db: Database,
    coordinator: Arc<RefreshCoordinator>,
    mailbox: Arc<dyn Mailbox>,
    model: Option<Arc<dyn ExtractionModel>>,
    poll_interval: std::time::Duration,
    scan_window_days: i64,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for EmailIngestWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailIngestWorker")
            .field("poll_interval", &self.poll_interval)
            .field("scan_window_days", &self.scan_window_days)
            .field("llm_enabled", &self.model.is_some())
            .finish()
    }
}

impl EmailIngestWorker {
    pub fn new(
        db: Database,
        coordinator: Arc<RefreshCoordinator>,
        mailbox: Arc<dyn Mailbox>,
        model: Option<Arc<dyn ExtractionModel>>,
        settings: &EmailSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            db,
            coordinator,
            mailbox,
            model,
            poll_interval: settings.poll_interval,
            scan_window_days: settings.scan_window_days,
            shutdown,
        }
    }

    /// The poll loop. Runs until shutdown.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(
            tokio::time::MissedTickBehavior::Skip,
        );

        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            scan_window_days = self.scan_window_days,
            "email ingestion worker running"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("email ingestion worker stopping");
                    break;
                }
                _ = ticker.tick() => {}
            }
            self.run_poll().await;
        }
    }

    /// One mailbox pass.
    pub async fn run_poll(&self) {
        let cutoff = Utc::now() - Duration::days(self.scan_window_days);
        let mut messages =
            match self.mailbox.fetch_unread_since(cutoff).await {
                Ok(messages) => messages,
                Err(err) => {
                    error!(error = %err, "mailbox fetch failed");
                    return;
                }
            };

        messages.sort_by_key(|m| m.received_at);

        for message in messages {
            // Cancellation is observed between messages; the message in
            // flight reaches its terminal record first.
            if self.shutdown.is_cancelled() {
                return;
            }
            if let Err(err) = self.process_message(&message).await {
                error!(
                    message_id = %message.message_id,
                    error = %err,
                    "message processing failed"
                );
            }
        }
    }

    async fn process_message(
        &self,
        message: &MailMessage,
    ) -> crate::error::Result<()> {
        if self.db.emails().has_processed(&message.message_id).await? {
            debug!(
                message_id = %message.message_id,
                "message already processed, skipping"
            );
            return Ok(());
        }

        let candidates = self.extract_candidates(message).await;

        if candidates.is_empty() {
            self.record(message, EmailProcessingStatus::Skipped, &[], None)
                .await?;
            return Ok(());
        }

        let mut created: Vec<String> = Vec::new();
        let mut rejections: Vec<String> = Vec::new();

        for candidate in &candidates {
            match self.materialize(candidate).await {
                Ok(Some(tracking_number)) => {
                    created.push(tracking_number);
                }
                Ok(None) => {
                    // Already tracked; counts as handled, not rejected.
                    created.push(candidate.tracking_number.clone());
                }
                Err(err) => {
                    // Enough context to debug the rejection offline.
                    warn!(
                        message_id = %message.message_id,
                        subject = %message.subject,
                        body_excerpt = %excerpt(&message.body_text),
                        tracking_number = %candidate.tracking_number,
                        carrier = %candidate.carrier,
                        error = %err,
                        "candidate rejected"
                    );
                    rejections.push(format!(
                        "{}: {err}",
                        candidate.tracking_number
                    ));
                }
            }
        }

        if created.is_empty() {
            self.record(
                message,
                EmailProcessingStatus::Failed,
                &[],
                Some(rejections.join("; ")),
            )
            .await?;
        } else {
            let error = (!rejections.is_empty())
                .then(|| rejections.join("; "));
            self.record(
                message,
                EmailProcessingStatus::Processed,
                &created,
                error,
            )
            .await?;
        }
        Ok(())
    }

    /// Run the hybrid extraction pipeline for one message.
    async fn extract_candidates(
        &self,
        message: &MailMessage,
    ) -> Vec<TrackingCandidate> {
        let combined =
            format!("{}\n{}", message.body_text, message.body_html);
        let searchable = sanitize::strip_html(&combined);
        let regex_candidates = extract::extract_regex(&searchable);

        let Some(model) = &self.model else {
            return regex_candidates;
        };

        let sanitized_body =
            sanitize::sanitize_for_llm(&combined);
        if !sanitize::is_safe_for_llm(&sanitized_body) {
            warn!(
                message_id = %message.message_id,
                "content failed the safety check, regex-only extraction"
            );
            return regex_candidates;
        }

        let prompt = llm::extraction_prompt(
            &sanitize::sanitize_for_llm(&message.subject),
            &sanitized_body,
        );
        let llm_candidates = match model.complete(&prompt).await {
            Ok(reply) => extract::parse_llm_candidates(&reply),
            Err(err) => {
                warn!(
                    message_id = %message.message_id,
                    error = %err,
                    "LLM extraction failed, regex-only extraction"
                );
                Vec::new()
            }
        };

        extract::merge_candidates(regex_candidates, llm_candidates)
    }

    /// Validate a candidate with its carrier and create the shipment,
    /// seeded with the events the validation returned.
    ///
    /// `Ok(None)` means the shipment already existed.
    async fn materialize(
        &self,
        candidate: &TrackingCandidate,
    ) -> crate::error::Result<Option<String>> {
        let snapshot = self
            .coordinator
            .validate_candidate(
                &candidate.tracking_number,
                candidate.carrier,
            )
            .await?;

        let new = NewShipment::new(
            candidate.tracking_number.clone(),
            candidate.carrier,
            candidate.shipment_description(),
        );
        let shipment = match self.db.shipments().create(&new).await {
            Ok(shipment) => shipment,
            Err(TrackerError::Validation(_)) => {
                debug!(
                    tracking_number = %candidate.tracking_number,
                    "shipment already tracked"
                );
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let events = snapshot.events.len();
        self.coordinator
            .ingest_snapshot(
                &shipment,
                snapshot,
                RefreshCaller::EmailValidator,
            )
            .await?;

        info!(
            shipment_id = shipment.id,
            tracking_number = %candidate.tracking_number,
            carrier = %candidate.carrier,
            events,
            "shipment created from email"
        );
        Ok(Some(candidate.tracking_number.clone()))
    }

    async fn record(
        &self,
        message: &MailMessage,
        status: EmailProcessingStatus,
        tracking_numbers: &[String],
        error: Option<String>,
    ) -> crate::error::Result<()> {
        let record = EmailProcessingRecord {
            message_id: message.message_id.clone(),
            thread_id: message.thread_id.clone(),
            from: message.from.clone(),
            subject: message.subject.clone(),
            received_at: message.received_at,
            body_text: message.body_text.clone(),
            body_html: message.body_html.clone(),
            scan_method: EmailScanMethod::TimeWindow,
            processed_at: Utc::now(),
            status,
            tracking_numbers: tracking_numbers.to_vec(),
            error,
        };
        self.db.emails().record(&record).await
    }
}

fn excerpt(body: &str) -> String {
    let cleaned: String = body
        .chars()
        .filter(|c| !c.is_control())
        .take(120)
        .collect();
    cleaned
}
