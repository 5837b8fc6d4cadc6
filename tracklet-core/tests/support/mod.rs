//! Shared fixtures for the integration tests: an in-memory database,
//! scripted carrier clients, and fake mailbox/LLM implementations.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracklet_config::{
    CacheSettings, EmailSettings, RateLimitSettings, SchedulerSettings,
};
use tracklet_core::carriers::{
    CarrierClient, CarrierError, FallbackClient, TrackingSnapshot,
};
use tracklet_core::email::{
    EmailIngestWorker, ExtractionModel, LlmError, Mailbox,
};
use tracklet_core::refresh::CarrierClientProvider;
use tracklet_core::{
    AutoUpdateScheduler, Database, RefreshCache, RefreshCoordinator,
};
use tracklet_model::{
    Carrier, MailMessage, NewShipment, NewTrackingEvent, Shipment,
};

/// A carrier client whose per-number responses are scripted up front.
/// Numbers without a script answer with a single fresh event.
pub struct ScriptedClient {
    scripts: std::sync::Mutex<
        HashMap<String, Vec<Result<TrackingSnapshot, CarrierError>>>,
    >,
    pub calls: AtomicUsize,
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            scripts: std::sync::Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue the next responses for one tracking number, in order. The
    /// last response repeats once the queue drains.
    pub fn script(
        &self,
        tracking_number: &str,
        responses: Vec<Result<TrackingSnapshot, CarrierError>>,
    ) {
        self.scripts
            .lock()
            .unwrap()
            .insert(tracking_number.to_string(), responses);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CarrierClient for ScriptedClient {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch(
        &self,
        tracking_number: &str,
    ) -> Result<TrackingSnapshot, CarrierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(tracking_number) {
            Some(queue) if queue.len() > 1 => queue.remove(0),
            Some(queue) => queue[0].clone(),
            None => Ok(delivered_snapshot()),
        }
    }
}

/// Hands the same scripted client out for every carrier.
pub struct ScriptedProvider {
    pub client: Arc<ScriptedClient>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            client: Arc::new(ScriptedClient::new()),
        }
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CarrierClientProvider for ScriptedProvider {
    fn client(&self, carrier: Carrier) -> FallbackClient {
        FallbackClient::new(carrier, vec![self.client.clone()])
    }
}

pub fn delivered_snapshot() -> TrackingSnapshot {
    snapshot_with_events(vec![
        event("Delivered", Utc::now()),
        event("Out for Delivery", Utc::now() - Duration::hours(4)),
    ])
}

pub fn in_transit_snapshot() -> TrackingSnapshot {
    snapshot_with_events(vec![event(
        "Departed regional facility",
        Utc::now() - Duration::hours(1),
    )])
}

pub fn snapshot_with_events(
    events: Vec<NewTrackingEvent>,
) -> TrackingSnapshot {
    TrackingSnapshot::from_events(events, None)
}

pub fn event(
    description: &str,
    at: DateTime<Utc>,
) -> NewTrackingEvent {
    NewTrackingEvent {
        event_time: at,
        location: "PORTLAND, OR".to_string(),
        status: description.to_string(),
        description: description.to_string(),
    }
}

/// Everything a coordinator-level test needs, wired together.
pub struct Harness {
    pub db: Database,
    pub cache: Arc<RefreshCache>,
    pub coordinator: Arc<RefreshCoordinator>,
    pub provider: Arc<ScriptedProvider>,
}

pub async fn harness() -> Harness {
    harness_with(
        CacheSettings::default(),
        RateLimitSettings::default(),
    )
    .await
}

pub async fn harness_with(
    cache_settings: CacheSettings,
    rate_limit: RateLimitSettings,
) -> Harness {
    let db = Database::in_memory().await.expect("in-memory database");
    let cache =
        RefreshCache::initialize(db.refresh_cache(), &cache_settings)
            .await
            .expect("cache");
    let provider = Arc::new(ScriptedProvider::new());
    let coordinator = Arc::new(RefreshCoordinator::new(
        db.clone(),
        cache.clone(),
        provider.clone(),
        &rate_limit,
    ));
    Harness {
        db,
        cache,
        coordinator,
        provider,
    }
}

impl Harness {
    pub fn scheduler(
        &self,
        settings: SchedulerSettings,
        shutdown: CancellationToken,
    ) -> Arc<AutoUpdateScheduler> {
        Arc::new(AutoUpdateScheduler::new(
            self.db.clone(),
            self.coordinator.clone(),
            self.provider.clone(),
            settings,
            &RateLimitSettings::default(),
            shutdown,
        ))
    }

    pub async fn insert_shipment(
        &self,
        tracking_number: &str,
        carrier: Carrier,
    ) -> Shipment {
        self.db
            .shipments()
            .create(&NewShipment::new(
                tracking_number,
                carrier,
                "test shipment",
            ))
            .await
            .expect("create shipment")
    }
}

/// Mailbox fake: a fixed set of messages.
pub struct FakeMailbox {
    pub messages: Vec<MailMessage>,
}

#[async_trait]
impl Mailbox for FakeMailbox {
    async fn fetch_unread_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> tracklet_core::Result<Vec<MailMessage>> {
        Ok(self
            .messages
            .iter()
            .filter(|m| m.received_at >= cutoff)
            .cloned()
            .collect())
    }
}

/// LLM fake: replies with a canned string and remembers the prompts it saw.
pub struct FakeModel {
    pub reply: String,
    pub prompts: std::sync::Mutex<Vec<String>>,
}

impl FakeModel {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            prompts: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ExtractionModel for FakeModel {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.reply.clone())
    }
}

pub fn mail_message(
    message_id: &str,
    subject: &str,
    body: &str,
    received_at: DateTime<Utc>,
) -> MailMessage {
    MailMessage {
        uid: 1,
        message_id: message_id.to_string(),
        thread_id: None,
        from: "orders@acme.example".to_string(),
        subject: subject.to_string(),
        received_at,
        body_text: body.to_string(),
        body_html: String::new(),
    }
}

pub fn email_settings() -> EmailSettings {
    EmailSettings {
        imap_host: "imap.example.com".to_string(),
        imap_port: 993,
        username: "tracklet@example.com".to_string(),
        password: "secret".to_string(),
        poll_interval: std::time::Duration::from_secs(300),
        scan_window_days: 30,
    }
}

pub fn email_worker(
    harness: &Harness,
    mailbox: Arc<dyn Mailbox>,
    model: Option<Arc<dyn ExtractionModel>>,
    shutdown: CancellationToken,
) -> Arc<EmailIngestWorker> {
    Arc::new(EmailIngestWorker::new(
        harness.db.clone(),
        harness.coordinator.clone(),
        mailbox,
        model,
        &email_settings(),
        shutdown,
    ))
}
