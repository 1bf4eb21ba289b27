//! # Request Claimer
//!
//! Claims due channel requests with a single conditional write per row.
//!
//! A claim moves the row to PENDING, bumps its `version`, and pushes
//! `gmt_next_execution` to the end of the lease. Other pollers stop seeing the
//! row as due until the lease runs out; if the owning worker dies the row
//! becomes due again and any worker may claim it (PENDING to PENDING).
//!
//! ```rust
//! use payflow_core::orchestration::request_claimer::RequestClaimer;
//! use payflow_core::persistence::InMemoryChannelRequestStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let claimer = RequestClaimer::new(
//!     Arc::new(InMemoryChannelRequestStore::new()),
//!     Duration::from_secs(60),
//! );
//! assert!(claimer.worker_id().starts_with("payflow-worker-"));
//! ```

use super::to_chrono_duration;
use crate::error::Result;
use crate::models::ChannelRequest;
use crate::persistence::ChannelRequestStoreRef;
use crate::state_machine::{ChannelRequestEvent, ChannelRequestStateMachine};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, instrument};

#[derive(Clone)]
pub struct RequestClaimer {
    machine: ChannelRequestStateMachine,
    worker_id: String,
    lease: Duration,
}

impl RequestClaimer {
    pub fn new(store: ChannelRequestStoreRef, lease: Duration) -> Self {
        Self::with_worker_id(
            store,
            lease,
            format!("payflow-worker-{}", uuid::Uuid::new_v4()),
        )
    }

    pub fn with_worker_id(store: ChannelRequestStoreRef, lease: Duration, worker_id: String) -> Self {
        Self {
            machine: ChannelRequestStateMachine::new(store),
            worker_id,
            lease,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Try to take the lease on `request` as observed by the poller.
    ///
    /// `Ok(None)` means another worker got there first or the snapshot is no
    /// longer due; neither is an error.
    #[instrument(skip(self, request), fields(worker_id = %self.worker_id, request_id = request.id))]
    pub async fn claim(
        &self,
        request: &ChannelRequest,
        now: DateTime<Utc>,
    ) -> Result<Option<ChannelRequest>> {
        if !request.is_due(now) {
            debug!(status = %request.status, "Request no longer due, skipping");
            return Ok(None);
        }

        let event = ChannelRequestEvent::Claim {
            lease_until: now + to_chrono_duration(self.lease),
        };

        match self.machine.transition(request, &event, now).await {
            Ok(claimed) => {
                info!(
                    pay_order_no = %claimed.pay_order_no,
                    request_type = %claimed.request_type,
                    retry_count = claimed.retry_count,
                    lease_until = %claimed.gmt_next_execution,
                    "{}",
                    crate::constants::events::REQUEST_CLAIMED
                );
                Ok(Some(claimed))
            }
            Err(e) if e.is_conflict() => {
                debug!("Lost claim race, moving on");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
