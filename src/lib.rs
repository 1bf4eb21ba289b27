#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Payflow Core
//!
//! Payment request pipeline: accepts payment intents from upstream business
//! systems, drives them through external payment channels, and reports the
//! outcome back, surviving channel failures, duplicate callbacks and worker
//! crashes.
//!
//! ## Architecture
//!
//! Two lifecycles are tracked side by side:
//!
//! - a **PayOrder** per business payment intent
//!   (`INIT → PENDING → SUCCESS | FAILED | CLOSED`, and `SUCCESS → BOUNCED`)
//! - a **ChannelRequest** per outbound interaction series
//!   (`INIT → PENDING ⇄ FAILED → SUCCESS | CLOSED`)
//!
//! The request scheduler is the only active component. Concurrent schedulers
//! coordinate purely through conditional writes on the persisted rows; there is
//! no in-process shared state to keep consistent across hosts.
//!
//! ## Module Organization
//!
//! - [`state_machine`] - status enums, events and transition validation
//! - [`orchestration`] - scheduler, claimer, classifier, idempotency, payment service
//! - [`persistence`] - store traits with PostgreSQL and in-memory implementations
//! - [`channel`] - channel adapter trait, routing registry, HTTP notification sender
//! - [`models`] - `PayOrder` and `ChannelRequest`
//! - [`config`] - YAML configuration with environment overrides
//! - [`logging`] - structured logging setup
//! - [`error`] - crate-wide error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use payflow_core::channel::{ChannelRegistry, HttpNotificationSender};
//! use payflow_core::config::ConfigManager;
//! use payflow_core::orchestration::RequestScheduler;
//! use payflow_core::persistence::{self, PgChannelRequestStore, PgPayOrderStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! payflow_core::logging::init_structured_logging();
//! let manager = ConfigManager::load()?;
//! let config = manager.config();
//!
//! let pool = persistence::postgres::connect(&config.database).await?;
//! let channels = Arc::new(ChannelRegistry::new());
//! channels.set_notification_sender(Arc::new(HttpNotificationSender::new(&config.notification)?));
//!
//! let scheduler = Arc::new(RequestScheduler::new(
//!     config.env.clone(),
//!     config.scheduler.clone(),
//!     Arc::new(PgPayOrderStore::new(pool.clone())),
//!     Arc::new(PgChannelRequestStore::new(pool)),
//!     channels,
//! ));
//!
//! let (shutdown, signal) = tokio::sync::watch::channel(false);
//! let handle = scheduler.spawn(signal);
//! // ...
//! shutdown.send(true)?;
//! handle.await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod persistence;
pub mod state_machine;

pub use error::{PayflowError, Result};
pub use models::{ChannelRequest, PayOrder, RequestType};
pub use orchestration::{PaymentService, RequestScheduler};
pub use state_machine::{ChannelRequestStatus, PayOrderStatus};
