use crate::common::{new_order, scheduler_config, secs, t0, Harness, Step, TEST_ENV};
use payflow_core::channel::{ChannelResponse, DispatchError};
use payflow_core::config::SchedulerConfig;
use payflow_core::constants::close_reasons;
use payflow_core::models::RequestType;
use payflow_core::orchestration::{
    ClassifiedError, ErrorCode, RequestClaimer, RequestOutcome, RequestOutcomeProcessor,
};
use async_trait::async_trait;
use payflow_core::models::PayOrder;
use payflow_core::orchestration::{
    CallbackOutcome, CallbackResult, ChannelCallback, PaymentService, RequestScheduler,
};
use payflow_core::persistence::{
    ChannelRequestStore, InMemoryPayOrderStore, PayOrderStore, PersistenceResult,
};
use payflow_core::state_machine::{ChannelRequestStatus, PayOrderStatus};
use payflow_core::PayflowError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn transport_error() -> DispatchError {
    DispatchError::Transport("connection reset by peer".to_string())
}

#[tokio::test]
async fn test_successful_payment_completes_order_and_notifies() {
    let harness = Harness::new();
    let order = harness.accept("S-1", true).await;
    let scheduler = harness.scheduler(scheduler_config());

    let summary = scheduler.run_once_at(t0()).await.unwrap();
    assert_eq!(summary.polled, 1);
    assert_eq!(summary.claimed, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(
        serde_json::to_value(&summary).unwrap()["succeeded"],
        serde_json::json!(1)
    );

    let paid = harness.order(&order.pay_order_no).await;
    let payment = harness.payment(&order).await;
    assert_eq!(paid.status, PayOrderStatus::Success);
    assert_eq!(paid.timestamps.gmt_payment_begin, Some(t0()));
    assert_eq!(paid.timestamps.gmt_payment_success, Some(t0()));
    assert_eq!(
        paid.channel_payment_trace_no,
        Some(format!("TRACE-{}", payment.id))
    );
    assert_eq!(payment.status, ChannelRequestStatus::Success);
    assert_eq!(payment.retry_count, 0);

    let notification = harness
        .request(&order, RequestType::BasicNotification)
        .await
        .expect("basic notification queued");
    assert_eq!(notification.status, ChannelRequestStatus::Init);
    assert_eq!(notification.request_addr, "http://mall.local/notify");
    assert_eq!(notification.request_params["status"], "SUCCESS");

    // The notification goes out on the next pass
    let summary = scheduler.run_once_at(t0()).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(harness.notifier.dispatch_count(), 1);
    assert_eq!(
        harness
            .request(&order, RequestType::BasicNotification)
            .await
            .unwrap()
            .status,
        ChannelRequestStatus::Success
    );
    assert_eq!(harness.order(&order.pay_order_no).await, paid);

    let summary = scheduler.run_once_at(t0() + secs(3600)).await.unwrap();
    assert_eq!(summary.polled, 0);
}

// Two retryable failures, then a definitive rejection
#[tokio::test]
async fn test_non_retryable_failure_after_retries_closes_request() {
    let harness = Harness::new();
    let order = harness.accept("D-1", false).await;
    let scheduler = harness.scheduler(scheduler_config());

    harness.card.push(Step::Fail(transport_error()));
    harness.card.push(Step::Fail(transport_error()));
    harness.card.push(Step::Fail(DispatchError::Rejected {
        code: "51".to_string(),
        message: "insufficient funds".to_string(),
    }));

    scheduler.run_once_at(t0()).await.unwrap();
    let payment = harness.payment(&order).await;
    assert_eq!(payment.status, ChannelRequestStatus::Failed);
    assert_eq!(payment.retry_count, 1);
    assert_eq!(payment.gmt_next_execution, t0() + secs(300));
    assert_eq!(
        harness.order(&order.pay_order_no).await.status,
        PayOrderStatus::Pending
    );

    let early = scheduler.run_once_at(t0() + secs(299)).await.unwrap();
    assert_eq!(early.polled, 0);

    scheduler.run_once_at(t0() + secs(300)).await.unwrap();
    let payment = harness.payment(&order).await;
    assert_eq!(payment.retry_count, 2);
    assert_eq!(payment.gmt_next_execution, t0() + secs(900));

    let summary = scheduler.run_once_at(t0() + secs(900)).await.unwrap();
    assert_eq!(summary.closed, 1);

    let payment = harness.payment(&order).await;
    assert_eq!(payment.status, ChannelRequestStatus::Closed);
    assert_eq!(payment.retry_count, 2);
    assert_eq!(
        payment.close_reason.as_deref(),
        Some(close_reasons::NOT_RETRYABLE_REQUEST)
    );
    assert!(payment
        .request_exception
        .as_deref()
        .unwrap()
        .contains("insufficient funds"));

    let failed = harness.order(&order.pay_order_no).await;
    assert_eq!(failed.status, PayOrderStatus::Failed);
    assert_eq!(failed.channel_error_code.as_deref(), Some("THIRD_BIZ_REJECTED"));
    assert_eq!(failed.timestamps.gmt_payment_failure, Some(t0() + secs(900)));

    let due = harness
        .requests
        .find_due(TEST_ENV, t0() + secs(1_000_000), 10)
        .await
        .unwrap();
    assert!(due.is_empty());
    assert_eq!(harness.card.dispatch_count(), 3);
}

#[tokio::test]
async fn test_backoff_grows_linearly_with_retry_count() {
    let harness = Harness::new();
    let order = harness.accept("B-1", false).await;
    let scheduler = harness.scheduler(scheduler_config());

    let mut attempt_at = t0();
    let mut previous_gap = chrono::Duration::zero();
    for n in 1..=5 {
        harness.card.push(Step::Fail(transport_error()));
        let summary = scheduler.run_once_at(attempt_at).await.unwrap();
        assert_eq!(summary.retried, 1);

        let payment = harness.payment(&order).await;
        assert_eq!(payment.retry_count, n);
        assert_eq!(payment.gmt_last_execution, Some(attempt_at));

        let gap = payment.gmt_next_execution - attempt_at;
        assert_eq!(gap, secs(300 * i64::from(n)));
        assert!(gap > previous_gap);

        previous_gap = gap;
        attempt_at = payment.gmt_next_execution;
    }
}

#[tokio::test]
async fn test_dispatch_timeout_is_retryable() {
    let harness = Harness::new();
    let order = harness.accept("T-1", false).await;
    let scheduler = harness.scheduler(SchedulerConfig {
        dispatch_timeout_ms: 50,
        ..scheduler_config()
    });

    harness.card.push(Step::Hang);
    let summary = scheduler.run_once_at(t0()).await.unwrap();
    assert_eq!(summary.retried, 1);

    let payment = harness.payment(&order).await;
    assert_eq!(payment.status, ChannelRequestStatus::Failed);
    assert_eq!(payment.retry_count, 1);
    assert_eq!(payment.gmt_next_execution, t0() + secs(300));
    assert!(payment
        .request_exception
        .as_deref()
        .unwrap()
        .contains("DISPATCH_TIMEOUT"));
    assert_eq!(
        harness.order(&order.pay_order_no).await.status,
        PayOrderStatus::Pending
    );

    // The retry goes through normally
    scheduler.run_once_at(t0() + secs(300)).await.unwrap();
    assert_eq!(
        harness.order(&order.pay_order_no).await.status,
        PayOrderStatus::Success
    );
}

#[tokio::test]
async fn test_concurrent_claims_have_exactly_one_winner() {
    let harness = Harness::new();
    let order = harness.accept("E-1", false).await;
    let snapshot = harness.payment(&order).await;

    let a = RequestClaimer::new(harness.requests.clone(), Duration::from_secs(60));
    let b = RequestClaimer::new(harness.requests.clone(), Duration::from_secs(60));
    let (first, second) = tokio::join!(a.claim(&snapshot, t0()), b.claim(&snapshot, t0()));
    let winners = [first.unwrap(), second.unwrap()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();

    assert_eq!(winners.len(), 1);
    let stored = harness.payment(&order).await;
    assert_eq!(stored.status, ChannelRequestStatus::Pending);
    assert_eq!(stored.version, snapshot.version + 1);
    assert_eq!(stored.gmt_next_execution, t0() + secs(60));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_claim_race_across_threads() {
    let harness = Harness::new();
    let order = harness.accept("E-2", false).await;
    let snapshot = harness.payment(&order).await;
    let claimer = RequestClaimer::new(harness.requests.clone(), Duration::from_secs(60));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let claimer = claimer.clone();
            let snapshot = snapshot.clone();
            tokio::spawn(async move { claimer.claim(&snapshot, t0()).await })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(harness.payment(&order).await.version, snapshot.version + 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_competing_schedulers_dispatch_once() {
    let harness = Harness::new();
    let order = harness.accept("E-3", false).await;
    let first = Arc::new(harness.scheduler(scheduler_config()));
    let second = Arc::new(harness.scheduler(scheduler_config()));
    assert_ne!(first.worker_id(), second.worker_id());

    let (a, b) = tokio::join!(
        tokio::spawn({
            let s = first.clone();
            async move { s.run_once_at(t0()).await }
        }),
        tokio::spawn({
            let s = second.clone();
            async move { s.run_once_at(t0()).await }
        }),
    );
    let (a, b) = (a.unwrap().unwrap(), b.unwrap().unwrap());

    assert_eq!(a.claimed + b.claimed, 1);
    assert_eq!(harness.card.dispatch_count(), 1);
    assert_eq!(
        harness.order(&order.pay_order_no).await.status,
        PayOrderStatus::Success
    );
}

#[tokio::test]
async fn test_payments_dispatch_before_older_notifications() {
    let harness = Harness::new();
    // One adapter for both legs so the call log has a single order
    harness.channels.set_notification_sender(harness.card.clone());
    let scheduler = harness.scheduler(scheduler_config());

    let notified = harness.accept("P-1", true).await;
    scheduler.run_once_at(t0()).await.unwrap();

    let later = harness
        .service
        .accept_payment_at(new_order("P-2", false), t0() + secs(10))
        .await
        .unwrap()
        .order;
    scheduler.run_once_at(t0() + secs(20)).await.unwrap();

    let calls = harness.card.calls();
    let later_payment = harness.payment(&later).await;
    let notification = harness
        .request(&notified, RequestType::BasicNotification)
        .await
        .unwrap();

    assert_eq!(calls.len(), 3);
    assert_eq!(calls[1], (later_payment.id, RequestType::Payment));
    assert_eq!(calls[2], (notification.id, RequestType::BasicNotification));
}

#[tokio::test]
async fn test_expired_lease_is_reclaimed() {
    let harness = Harness::new();
    let order = harness.accept("L-1", false).await;
    let scheduler = harness.scheduler(scheduler_config());

    // A worker claims and then disappears
    let crashed = RequestClaimer::new(harness.requests.clone(), Duration::from_secs(60));
    let abandoned = crashed
        .claim(&harness.payment(&order).await, t0())
        .await
        .unwrap()
        .unwrap();

    let hidden = scheduler.run_once_at(t0() + secs(30)).await.unwrap();
    assert_eq!(hidden.polled, 0);

    let summary = scheduler.run_once_at(t0() + secs(60)).await.unwrap();
    assert_eq!(summary.claimed, 1);
    assert_eq!(summary.succeeded, 1);

    let payment = harness.payment(&order).await;
    assert_eq!(payment.status, ChannelRequestStatus::Success);
    assert_eq!(payment.version, 3);

    let paid = harness.order(&order.pay_order_no).await;
    assert_eq!(paid.status, PayOrderStatus::Success);

    // The original holder coming back late loses on the version check
    let processor = RequestOutcomeProcessor::new(harness.orders.clone(), harness.requests.clone());
    let late = processor
        .apply_success(&abandoned, &ChannelResponse::accepted("LATE"), t0() + secs(61))
        .await;
    assert!(matches!(late, Err(PayflowError::StateMachine(e)) if e.is_conflict()));
    assert_eq!(harness.order(&order.pay_order_no).await, paid);
}

#[tokio::test]
async fn test_retry_cap_closes_request() {
    let harness = Harness::new();
    let order = harness.accept("C-1", true).await;
    let scheduler = harness.scheduler(SchedulerConfig {
        max_retry_count: Some(2),
        ..scheduler_config()
    });

    for _ in 0..3 {
        harness.card.push(Step::Fail(transport_error()));
    }

    scheduler.run_once_at(t0()).await.unwrap();
    scheduler.run_once_at(t0() + secs(300)).await.unwrap();
    let summary = scheduler.run_once_at(t0() + secs(900)).await.unwrap();
    assert_eq!(summary.closed, 1);

    let payment = harness.payment(&order).await;
    assert_eq!(payment.status, ChannelRequestStatus::Closed);
    assert_eq!(payment.retry_count, 2);
    assert_eq!(
        payment.close_reason.as_deref(),
        Some(close_reasons::RETRY_LIMIT_EXCEEDED)
    );

    let failed = harness.order(&order.pay_order_no).await;
    assert_eq!(failed.status, PayOrderStatus::Failed);
    assert_eq!(failed.channel_error_code.as_deref(), Some("RPC_INVOKE_ERROR"));

    let notification = harness
        .request(&order, RequestType::BasicNotification)
        .await
        .unwrap();
    assert_eq!(notification.request_params["status"], "FAILED");
    assert_eq!(notification.request_params["channelErrorCode"], "RPC_INVOKE_ERROR");
}

#[tokio::test]
async fn test_unknown_channel_fails_order() {
    let harness = Harness::new();
    let order = harness
        .service
        .accept_payment_at(
            payflow_core::models::NewPayOrder {
                request_addr: "wallet://acme".to_string(),
                ..new_order("N-1", false)
            },
            t0(),
        )
        .await
        .unwrap()
        .order;
    let scheduler = harness.scheduler(scheduler_config());

    let summary = scheduler.run_once_at(t0()).await.unwrap();
    assert_eq!(summary.closed, 1);
    assert_eq!(harness.card.dispatch_count(), 0);

    let payment = harness.payment(&order).await;
    assert_eq!(payment.status, ChannelRequestStatus::Closed);
    assert_eq!(payment.retry_count, 0);

    let failed = harness.order(&order.pay_order_no).await;
    assert_eq!(failed.status, PayOrderStatus::Failed);
    assert_eq!(
        failed.channel_error_code.as_deref(),
        Some("CHANNEL_NOT_CONFIGURED")
    );

    // Registering the channel afterwards does not revive the request
    harness
        .channels
        .register_payment_adapter("wallet", harness.card.clone());
    let summary = scheduler.run_once_at(t0() + secs(3600)).await.unwrap();
    assert_eq!(summary.polled, 0);
}

#[tokio::test]
async fn test_notification_failure_leaves_order_alone() {
    let harness = Harness::new();
    let order = harness.accept("NF-1", true).await;
    let scheduler = harness.scheduler(scheduler_config());

    scheduler.run_once_at(t0()).await.unwrap();
    let paid = harness.order(&order.pay_order_no).await;

    harness.notifier.push(Step::Fail(DispatchError::Classified(ClassifiedError::new(
        ErrorCode::NotifyDeliveryFailed,
        "merchant returned 502",
    ))));
    let summary = scheduler.run_once_at(t0() + secs(1)).await.unwrap();
    assert_eq!(summary.retried, 1);

    let notification = harness
        .request(&order, RequestType::BasicNotification)
        .await
        .unwrap();
    assert_eq!(notification.status, ChannelRequestStatus::Failed);
    assert_eq!(notification.gmt_next_execution, t0() + secs(301));
    assert_eq!(harness.order(&order.pay_order_no).await, paid);

    scheduler.run_once_at(t0() + secs(301)).await.unwrap();
    let notification = harness
        .request(&order, RequestType::BasicNotification)
        .await
        .unwrap();
    assert_eq!(notification.status, ChannelRequestStatus::Success);
    assert_eq!(notification.retry_count, 1);
}

#[tokio::test]
async fn test_reversal_in_response_bounces_order() {
    let harness = Harness::new();
    let order = harness.accept("R-1", true).await;
    let scheduler = harness.scheduler(scheduler_config());

    harness.card.push(Step::Respond(ChannelResponse {
        trace_no: Some("T-R1".to_string()),
        reversal: true,
        ..Default::default()
    }));
    let summary = scheduler.run_once_at(t0()).await.unwrap();
    assert_eq!(
        summary.succeeded, 1,
        "the payment leg itself completed"
    );

    let bounced = harness.order(&order.pay_order_no).await;
    assert_eq!(bounced.status, PayOrderStatus::Bounced);
    assert_eq!(bounced.channel_payment_trace_no.as_deref(), Some("T-R1"));
    assert!(bounced.timestamps.gmt_payment_success.is_some());
    assert!(bounced.timestamps.gmt_payment_bounced.is_some());

    assert!(harness
        .request(&order, RequestType::BasicNotification)
        .await
        .is_some());
    let bounced_notification = harness
        .request(&order, RequestType::BouncedNotification)
        .await
        .unwrap();
    assert_eq!(bounced_notification.request_params["status"], "BOUNCED");
}

#[tokio::test]
async fn test_scheduler_only_sees_its_environment() {
    let harness = Harness::new();
    let order = harness
        .service
        .accept_payment_at(
            payflow_core::models::NewPayOrder {
                env: "production".to_string(),
                ..new_order("ENV-1", false)
            },
            t0(),
        )
        .await
        .unwrap()
        .order;

    let test_scheduler = harness.scheduler(scheduler_config());
    assert_eq!(test_scheduler.env(), TEST_ENV);
    assert_eq!(test_scheduler.run_once_at(t0()).await.unwrap().polled, 0);

    let production = harness.scheduler_for("production", scheduler_config());
    let summary = production.run_once_at(t0()).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(
        harness.order(&order.pay_order_no).await.status,
        PayOrderStatus::Success
    );
}

#[tokio::test]
async fn test_retryable_outcome_reports_schedule() {
    let harness = Harness::new();
    let order = harness.accept("O-1", false).await;
    let scheduler = harness.scheduler(scheduler_config());
    let claimer = RequestClaimer::new(harness.requests.clone(), Duration::from_secs(60));

    harness.card.push(Step::Fail(transport_error()));
    let claimed = claimer
        .claim(&harness.payment(&order).await, t0())
        .await
        .unwrap()
        .unwrap();
    let outcome = scheduler.process_claimed(claimed, t0()).await;

    assert_eq!(
        outcome,
        payflow_core::orchestration::ProcessOutcome::Completed(RequestOutcome::Retrying {
            retry_count: 1,
            next_execution: t0() + secs(300),
        })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_pool_drains_due_requests_and_stops() {
    let harness = Harness::new();
    let mut orders = Vec::new();
    for i in 0..6 {
        orders.push(harness.accept(&format!("W-{i}"), false).await);
    }

    let first = Arc::new(harness.scheduler(SchedulerConfig {
        worker_count: 3,
        ..scheduler_config()
    }));
    let second = Arc::new(harness.scheduler(scheduler_config()));
    let (shutdown, signal) = tokio::sync::watch::channel(false);
    let handles = vec![first.spawn(signal.clone()), second.spawn(signal)];

    let mut settled = false;
    for _ in 0..100 {
        let mut all_paid = true;
        for order in &orders {
            if harness.order(&order.pay_order_no).await.status != PayOrderStatus::Success {
                all_paid = false;
            }
        }
        if all_paid {
            settled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(settled, "worker pool did not drain the due requests");

    shutdown.send(true).unwrap();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler stopped after shutdown")
            .unwrap();
    }

    assert_eq!(harness.card.dispatch_count(), orders.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_dispatch_never_outlives_the_lease_of_queued_requests() {
    let harness = Harness::new();
    let mut orders = Vec::new();
    for i in 0..4 {
        orders.push(harness.accept(&format!("SL-{i}"), false).await);
        harness.card.push(Step::Slow(Duration::from_millis(800)));
    }

    // One worker and a lease barely longer than each dispatch: the last
    // request waits in the queue well past one lease length.
    let scheduler = Arc::new(harness.scheduler(SchedulerConfig {
        worker_count: 1,
        lease_seconds: 1,
        dispatch_timeout_ms: 1000,
        ..scheduler_config()
    }));
    let (shutdown, signal) = tokio::sync::watch::channel(false);
    let handle = scheduler.spawn(signal);

    let mut settled = false;
    for _ in 0..200 {
        let mut all_paid = true;
        for order in &orders {
            if harness.order(&order.pay_order_no).await.status != PayOrderStatus::Success {
                all_paid = false;
            }
        }
        if all_paid {
            settled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(settled, "slow requests were not all paid");

    shutdown.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler stopped after shutdown")
        .unwrap();

    let mut dispatched: Vec<i64> = harness.card.calls().into_iter().map(|(id, _)| id).collect();
    dispatched.sort_unstable();
    dispatched.dedup();
    assert_eq!(dispatched.len(), orders.len());
    assert_eq!(harness.card.dispatch_count(), orders.len());
    for order in &orders {
        let payment = harness.payment(order).await;
        assert_eq!(payment.status, ChannelRequestStatus::Success);
        assert_eq!(payment.retry_count, 0);
    }
}

/// Order store that loses every write moving an order to SUCCESS while stalled
struct StalledOrderStore {
    inner: Arc<InMemoryPayOrderStore>,
    stalled: AtomicBool,
}

#[async_trait]
impl PayOrderStore for StalledOrderStore {
    async fn insert(&self, order: &PayOrder) -> PersistenceResult<()> {
        self.inner.insert(order).await
    }

    async fn find_by_pay_order_no(&self, pay_order_no: &str) -> PersistenceResult<Option<PayOrder>> {
        self.inner.find_by_pay_order_no(pay_order_no).await
    }

    async fn find_by_biz_key(
        &self,
        biz_identify_no: &str,
        biz_unique_no: &str,
    ) -> PersistenceResult<Option<PayOrder>> {
        self.inner.find_by_biz_key(biz_identify_no, biz_unique_no).await
    }

    async fn compare_and_update(
        &self,
        order: &PayOrder,
        expected_status: PayOrderStatus,
        expected_version: i64,
    ) -> PersistenceResult<bool> {
        if order.status == PayOrderStatus::Success && self.stalled.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner
            .compare_and_update(order, expected_status, expected_version)
            .await
    }
}

fn stalled_store(harness: &Harness) -> Arc<StalledOrderStore> {
    Arc::new(StalledOrderStore {
        inner: harness.orders.clone(),
        stalled: AtomicBool::new(true),
    })
}

#[tokio::test]
async fn test_order_left_behind_committed_success_is_reported_and_reconciled() {
    let harness = Harness::new();
    let order = harness.accept("ST-1", true).await;
    let orders = stalled_store(&harness);
    let scheduler = RequestScheduler::new(
        TEST_ENV,
        scheduler_config(),
        orders.clone(),
        harness.requests.clone(),
        harness.channels.clone(),
    );

    let summary = scheduler.run_once_at(t0()).await.unwrap();
    assert_eq!(summary.claimed, 1);
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.conflicts, 0);
    assert_eq!(summary.succeeded, 0);

    let payment = harness.payment(&order).await;
    assert_eq!(payment.status, ChannelRequestStatus::Success);
    let trace_no = format!("TRACE-{}", payment.id);
    assert_eq!(payment.channel_trace_no.as_deref(), Some(trace_no.as_str()));
    assert_eq!(harness.order(&order.pay_order_no).await.status, PayOrderStatus::Pending);
    assert!(harness
        .request(&order, RequestType::BasicNotification)
        .await
        .is_none());

    // The payment leg is decided, so later passes never revisit it
    let later = scheduler.run_once_at(t0() + secs(600)).await.unwrap();
    assert_eq!(later.polled, 0);

    orders.stalled.store(false, Ordering::SeqCst);
    let service = PaymentService::new(orders.clone(), harness.requests.clone());
    let repaired = service
        .reconcile_order_at(&order.pay_order_no, t0() + secs(601))
        .await
        .unwrap();
    assert_eq!(repaired.status, PayOrderStatus::Success);
    assert_eq!(repaired.channel_payment_trace_no.as_deref(), Some(trace_no.as_str()));

    let notification = harness
        .request(&order, RequestType::BasicNotification)
        .await
        .expect("notification queued once the order settled");
    assert_eq!(notification.request_params["status"], "SUCCESS");
    assert_eq!(harness.card.dispatch_count(), 1);
}

#[tokio::test]
async fn test_callback_reports_order_left_behind_committed_success() {
    let harness = Harness::new();
    let order = harness.accept("ST-2", false).await;
    let orders = stalled_store(&harness);
    let service = PaymentService::new(orders.clone(), harness.requests.clone());

    let callback = ChannelCallback {
        biz_identify_no: order.biz_identify_no.clone(),
        biz_unique_no: order.biz_unique_no.clone(),
        request_type: RequestType::Payment,
        result: CallbackResult::Success {
            trace_no: Some("CB-1".to_string()),
            params: None,
        },
    };

    match service.handle_callback_at(callback.clone(), t0() + secs(1)).await {
        Err(PayflowError::OrderSettlementFailed { pay_order_no, .. }) => {
            assert_eq!(pay_order_no, order.pay_order_no);
        }
        other => panic!("expected OrderSettlementFailed, got {other:?}"),
    }
    assert_eq!(harness.payment(&order).await.status, ChannelRequestStatus::Success);
    assert_eq!(harness.order(&order.pay_order_no).await.status, PayOrderStatus::Init);

    // A replay stays discarded; reconciling settles the order
    assert_eq!(
        service.handle_callback_at(callback, t0() + secs(2)).await.unwrap(),
        CallbackOutcome::Discarded
    );
    orders.stalled.store(false, Ordering::SeqCst);
    let repaired = service
        .reconcile_order_at(&order.pay_order_no, t0() + secs(3))
        .await
        .unwrap();
    assert_eq!(repaired.status, PayOrderStatus::Success);
    assert_eq!(repaired.channel_payment_trace_no.as_deref(), Some("CB-1"));
}
