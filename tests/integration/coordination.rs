//! Refresh coordinator behavior: tick-driven polling, collapse of
//! concurrent refreshes, stale-snapshot retention

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{Semaphore, broadcast};
use wiremock::MockServer;

use zbx_evt_sensors::actors::coordinator::CoordinatorHandle;
use zbx_evt_sensors::client::{RawProblem, RawService, ZabbixApi, ZabbixClient};
use zbx_evt_sensors::error::ZbxResult;

use crate::helpers::*;

/// Fake API whose problem fetches block until a permit is released.
struct GatedApi {
    gate: Arc<Semaphore>,
    fetch_calls: AtomicUsize,
}

impl GatedApi {
    fn new() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let api = Arc::new(Self {
            gate: Arc::clone(&gate),
            fetch_calls: AtomicUsize::new(0),
        });
        (api, gate)
    }
}

#[async_trait]
impl ZabbixApi for GatedApi {
    async fn fetch_problems(&self) -> ZbxResult<Vec<RawProblem>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let permit = self.gate.acquire().await.expect("gate closed");
        permit.forget();
        Ok(vec![
            serde_json::from_value(json!({
                "eventid": "1",
                "name": "CPU high",
                "severity": "4",
                "tags": [{ "tag": "env", "value": "prod" }]
            }))
            .unwrap(),
        ])
    }

    async fn fetch_services(&self) -> ZbxResult<Vec<RawService>> {
        Ok(vec![])
    }

    async fn resolve_hosts(&self, _event_ids: &[String]) -> ZbxResult<HashMap<String, String>> {
        Ok(HashMap::from([("1".to_string(), "srv1".to_string())]))
    }
}

#[tokio::test]
async fn concurrent_refreshes_collapse_to_one_fetch() {
    let (api, gate) = GatedApi::new();
    let (snapshot_tx, _rx) = broadcast::channel(16);

    // interval long enough that only the startup tick fires
    let handle = CoordinatorHandle::spawn(
        Arc::clone(&api) as Arc<dyn ZabbixApi>,
        false,
        3600,
        snapshot_tx,
    );

    // wait for the startup fetch to be in flight
    while api.fetch_calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // two refresh requests land while the fetch is blocked
    let tasks = vec![
        tokio::spawn({
            let handle = handle.clone();
            async move { handle.refresh_now().await }
        }),
        tokio::spawn({
            let handle = handle.clone();
            async move { handle.refresh_now().await }
        }),
    ];

    // give the requests time to reach the actor, then release the fetch
    tokio::time::sleep(Duration::from_millis(50)).await;
    gate.add_permits(1);

    for result in futures::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }

    assert_eq!(
        api.fetch_calls.load(Ordering::SeqCst),
        1,
        "collapsed refreshes must not trigger extra fetches"
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn ticks_drive_refreshes_without_manual_requests() {
    let (api, gate) = GatedApi::new();
    // two cycles can pass the gate immediately
    gate.add_permits(2);

    let (snapshot_tx, mut snapshot_rx) = broadcast::channel(16);
    let handle = CoordinatorHandle::spawn(
        Arc::clone(&api) as Arc<dyn ZabbixApi>,
        false,
        1,
        snapshot_tx,
    );

    let first = tokio::time::timeout(Duration::from_secs(3), snapshot_rx.recv())
        .await
        .expect("startup tick produced no snapshot")
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(3), snapshot_rx.recv())
        .await
        .expect("interval tick produced no snapshot")
        .unwrap();

    assert!(first.snapshot.same_groups(&second.snapshot));
    assert!(second.snapshot.fetched_at >= first.snapshot.fetched_at);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_cycle_retains_previous_snapshot_for_subscribers() {
    let server = MockServer::start().await;
    mount_version(&server).await;

    // the first cycle succeeds, every later one hits a 500
    mount_method(
        &server,
        "event.get",
        rpc_result(event_hosts(&[("1", "srv1")])),
    )
    .await;
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .and(wiremock::matchers::path(API_PATH))
        .and(wiremock::matchers::body_partial_json(
            json!({ "method": "problem.get" }),
        ))
        .respond_with(rpc_result(json!([problem_record(
            "1",
            "CPU high",
            4,
            &[("env", "prod")]
        )])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_method(
        &server,
        "problem.get",
        wiremock::ResponseTemplate::new(500),
    )
    .await;

    let client = ZabbixClient::login(&test_config(&server)).await.unwrap();
    let (snapshot_tx, mut snapshot_rx) = broadcast::channel(16);
    let handle = CoordinatorHandle::spawn(Arc::new(client), false, 3600, snapshot_tx);

    // the startup tick runs the first (successful) cycle
    let published = snapshot_rx.recv().await.unwrap();

    // second cycle fails; the exposed snapshot must be the first one
    assert!(handle.refresh_now().await.is_err());

    let retained = handle.latest().await.unwrap().unwrap();
    assert!(retained.same_groups(&published.snapshot));

    // and no second snapshot event was broadcast
    let extra = tokio::time::timeout(Duration::from_millis(100), snapshot_rx.recv()).await;
    assert!(extra.is_err(), "failed cycle must not publish a snapshot");

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn all_subscribers_receive_each_snapshot() {
    let (api, gate) = GatedApi::new();
    gate.add_permits(1);

    let (snapshot_tx, mut first_rx) = broadcast::channel(16);
    let mut second_rx = snapshot_tx.subscribe();

    let handle = CoordinatorHandle::spawn(
        Arc::clone(&api) as Arc<dyn ZabbixApi>,
        false,
        3600,
        snapshot_tx,
    );

    // the startup tick publishes to everyone who subscribed beforehand
    let a = first_rx.recv().await.unwrap();
    let b = second_rx.recv().await.unwrap();
    assert!(a.snapshot.same_groups(&b.snapshot));

    handle.shutdown().await.unwrap();
}
