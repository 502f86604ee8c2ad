//! Refresh-engine behavior against a scriptable control plane: registry
//! deduplication, steady-state caching, fatal metadata validation, the forced
//! refresh rate gate, transient-failure recovery, and shutdown.
//!
//! All tests run with a paused clock so the 55-minute and 60-second timers
//! can be driven deterministically.

mod common;

use std::sync::Arc;
use std::time::Duration;

use cloudsql::admin::ApiError;
use cloudsql::{Connector, Error, InstanceName, RefreshError, IP_TYPE_PUBLIC};
use common::{instance_info, StubAdmin, PKI};

const NAME: &str = "proj:region:db";

fn connector_with(stub: &Arc<StubAdmin>) -> Connector {
    Connector::builder(Arc::clone(stub) as Arc<dyn cloudsql::AdminApi>)
        .key_pair(Arc::clone(&PKI.client_keys))
        .build()
        .expect("connector build")
}

fn default_stub() -> Arc<StubAdmin> {
    StubAdmin::new(
        instance_info("region", &[("PUBLIC", "1.2.3.4")], &PKI.ca_pem),
        &PKI.ephemeral_pem,
    )
}

#[tokio::test(start_paused = true)]
async fn registry_returns_the_same_engine_for_a_name() {
    let stub = default_stub();
    let connector = connector_with(&stub);
    let name = InstanceName::new(NAME).unwrap();

    let first = connector.get_or_create(&name).unwrap();
    for _ in 0..3 {
        let again = connector.get_or_create(&name).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
    }

    let other = connector
        .get_or_create(&InstanceName::new("proj:region:other").unwrap())
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &other));
}

#[tokio::test(start_paused = true)]
async fn steady_state_reads_do_not_refetch() {
    let stub = default_stub();
    let connector = connector_with(&stub);
    let refresher = connector
        .get_or_create(&InstanceName::new(NAME).unwrap())
        .unwrap();

    let first = refresher.current_data().await.unwrap();
    let second = refresher.current_data().await.unwrap();

    assert_eq!(stub.metadata_calls(), 1);
    assert_eq!(stub.cert_calls(), 1);
    assert_eq!(
        first.metadata().preferred_ip(&[IP_TYPE_PUBLIC]),
        second.metadata().preferred_ip(&[IP_TYPE_PUBLIC]),
    );
}

#[tokio::test(start_paused = true)]
async fn follow_up_refresh_fires_55_minutes_after_success() {
    let stub = default_stub();
    let connector = connector_with(&stub);
    let refresher = connector
        .get_or_create(&InstanceName::new(NAME).unwrap())
        .unwrap();

    refresher.current_data().await.unwrap();
    assert_eq!(stub.metadata_calls(), 1);

    // Just short of the refresh interval: nothing fires.
    tokio::time::advance(Duration::from_secs(54 * 60)).await;
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(stub.metadata_calls(), 1);

    tokio::time::advance(Duration::from_secs(61)).await;
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(stub.metadata_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn region_mismatch_fails_every_read() {
    let stub = StubAdmin::new(
        instance_info("us-west1", &[("PUBLIC", "1.2.3.4")], &PKI.ca_pem),
        &PKI.ephemeral_pem,
    );
    let connector = connector_with(&stub);
    let refresher = connector
        .get_or_create(&InstanceName::new("proj:us-east1:db").unwrap())
        .unwrap();

    for _ in 0..2 {
        let err = refresher.current_data().await.unwrap_err();
        match err {
            Error::Refresh(RefreshError::RegionMismatch { actual, .. }) => {
                assert_eq!(actual, "us-west1");
            }
            other => panic!("expected region mismatch, got {other:?}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn empty_ip_addresses_fail_the_refresh() {
    let stub = StubAdmin::new(
        instance_info("region", &[], &PKI.ca_pem),
        &PKI.ephemeral_pem,
    );
    let connector = connector_with(&stub);
    let refresher = connector
        .get_or_create(&InstanceName::new(NAME).unwrap())
        .unwrap();

    let err = refresher.current_data().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Refresh(RefreshError::NoIpAddresses { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn forced_refresh_is_rate_limited_to_one_per_minute() {
    let stub = default_stub();
    let connector = connector_with(&stub);
    let refresher = connector
        .get_or_create(&InstanceName::new(NAME).unwrap())
        .unwrap();
    refresher.current_data().await.unwrap();

    assert!(refresher.force_refresh());
    assert!(!refresher.force_refresh());

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(refresher.force_refresh());
    assert!(!refresher.force_refresh());
}

#[tokio::test(start_paused = true)]
async fn forced_refresh_makes_readers_wait_for_new_data() {
    let stub = default_stub();
    let connector = connector_with(&stub);
    let refresher = connector
        .get_or_create(&InstanceName::new(NAME).unwrap())
        .unwrap();

    let before = refresher.current_data().await.unwrap();
    assert_eq!(
        before.metadata().preferred_ip(&[IP_TYPE_PUBLIC]),
        Some("1.2.3.4".parse().unwrap())
    );

    stub.set_instance(instance_info("region", &[("PUBLIC", "5.6.7.8")], &PKI.ca_pem));
    assert!(refresher.force_refresh());

    let after = refresher.current_data().await.unwrap();
    assert_eq!(
        after.metadata().preferred_ip(&[IP_TYPE_PUBLIC]),
        Some("5.6.7.8".parse().unwrap())
    );
    assert_eq!(stub.metadata_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn force_during_a_running_refresh_does_not_start_a_second() {
    let stub = default_stub();
    let release = stub.gate_next_metadata();
    let connector = connector_with(&stub);
    let refresher = connector
        .get_or_create(&InstanceName::new(NAME).unwrap())
        .unwrap();

    // Let the initial cycle start and park inside the control-plane call.
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    assert_eq!(stub.metadata_calls(), 1);

    // The running cycle cannot be cancelled; the force must not spawn a
    // parallel one, just make callers wait for the in-flight result.
    assert!(refresher.force_refresh());
    release.send(()).unwrap();

    let data = refresher.current_data().await.unwrap();
    assert_eq!(
        data.metadata().preferred_ip(&[IP_TYPE_PUBLIC]),
        Some("1.2.3.4".parse().unwrap())
    );
    assert_eq!(stub.metadata_calls(), 1, "no second refresh may run");
}

#[tokio::test(start_paused = true)]
async fn reader_blocked_on_a_cancelled_cycle_follows_the_forced_one() {
    let stub = default_stub();
    // Two failures: the first retry is immediate, so after it fails the next
    // retry sits pending on a backoff timer.
    for _ in 0..2 {
        stub.queue_instance_response(Err(ApiError::Api {
            status: 503,
            reason: None,
            message: "backend error".to_string(),
        }));
    }
    let connector = connector_with(&stub);
    let refresher = connector
        .get_or_create(&InstanceName::new(NAME).unwrap())
        .unwrap();

    assert!(refresher.current_data().await.is_err());

    // Let the immediate retry run and fail too; afterwards the next retry
    // sits pending on its backoff timer.
    while stub.metadata_calls() < 2 {
        tokio::task::yield_now().await;
    }
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }

    // Park a reader on the pending backoff retry. Plain yields keep the
    // paused clock from auto-advancing onto its timer.
    let reader = tokio::spawn({
        let refresher = Arc::clone(&refresher);
        async move { refresher.current_data().await }
    });
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }

    // The force cancels the pending retry and replaces it; the parked reader
    // must carry over to the replacement, not error out.
    assert!(refresher.force_refresh());
    let data = reader.await.unwrap().unwrap();
    assert_eq!(
        data.metadata().preferred_ip(&[IP_TYPE_PUBLIC]),
        Some("1.2.3.4".parse().unwrap())
    );
    // Initial + immediate retry + forced cycle; the backoff retry never ran.
    assert_eq!(stub.metadata_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_recovers_without_a_forced_refresh() {
    let stub = default_stub();
    stub.queue_instance_response(Err(ApiError::Api {
        status: 503,
        reason: None,
        message: "backend error".to_string(),
    }));
    let connector = connector_with(&stub);
    let refresher = connector
        .get_or_create(&InstanceName::new(NAME).unwrap())
        .unwrap();

    // The first reader observes the failed initial cycle, message intact.
    let err = refresher.current_data().await.unwrap_err();
    match err {
        Error::Refresh(RefreshError::Api { message }) => {
            assert!(message.contains(&format!("[{NAME}]")), "message: {message}");
            assert!(message.contains("backend error"), "message: {message}");
        }
        other => panic!("expected an api refresh error, got {other:?}"),
    }

    // The immediate automatic retry serves the next reader.
    let data = refresher.current_data().await.unwrap();
    assert_eq!(
        data.metadata().preferred_ip(&[IP_TYPE_PUBLIC]),
        Some("1.2.3.4".parse().unwrap())
    );
    assert_eq!(stub.metadata_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn closed_engine_rejects_reads_and_forces() {
    let stub = default_stub();
    let connector = connector_with(&stub);
    let refresher = connector
        .get_or_create(&InstanceName::new(NAME).unwrap())
        .unwrap();
    refresher.current_data().await.unwrap();

    refresher.close();
    assert!(refresher.is_closed());
    assert!(matches!(
        refresher.current_data().await.unwrap_err(),
        Error::Closed
    ));
    assert!(!refresher.force_refresh());
}

#[tokio::test(start_paused = true)]
async fn closed_connector_rejects_new_engines() {
    let stub = default_stub();
    let connector = connector_with(&stub);
    let refresher = connector
        .get_or_create(&InstanceName::new(NAME).unwrap())
        .unwrap();

    connector.close();
    assert!(matches!(
        connector
            .get_or_create(&InstanceName::new(NAME).unwrap())
            .unwrap_err(),
        Error::Closed
    ));
    assert!(refresher.is_closed());

    // Idempotent.
    connector.close();
}

#[tokio::test(start_paused = true)]
async fn force_refresh_through_the_connector_parses_the_name() {
    let stub = default_stub();
    let connector = connector_with(&stub);

    assert!(connector.force_refresh(NAME).unwrap());
    assert!(matches!(
        connector.force_refresh("not-a-name").unwrap_err(),
        Error::InvalidInstanceName { .. }
    ));
}
