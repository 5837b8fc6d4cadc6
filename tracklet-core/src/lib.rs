//! Core library for the Tracklet package-tracking server.
//!
//! The crate owns the pieces where the engineering lives: the SQLite
//! persistence layer, the carrier client factory with its fallback
//! strategies, the two-tier refresh cache, the refresh coordinator (the
//! single path to a carrier), the auto-update scheduler, and the email
//! ingestion worker. The server binary wires these together; HTTP handlers
//! stay thin call-sites over this crate.

pub mod cache;
pub mod carriers;
pub mod database;
pub mod email;
pub mod error;
pub mod refresh;
pub mod scheduler;

pub use cache::{CacheKeys, RefreshCache};
pub use carriers::{
    CarrierClient, CarrierError, ClientFactory, FallbackClient,
    TrackingSnapshot,
};
pub use database::{
    AutoRefreshOutcome, Database, EmailStore, EventStore,
    RefreshCacheStore, RefreshStamp, ShipmentStore,
};
pub use email::{EmailIngestWorker, ImapMailbox, Mailbox};
pub use error::{Result, TrackerError};
pub use refresh::{
    CarrierClientProvider, RateLimitDecision, RateLimitReason,
    RefreshCoordinator, check_rate_limit,
};
pub use scheduler::{
    AutoUpdateScheduler, SchedulerState, SchedulerStatus,
};
