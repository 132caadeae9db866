//! End-to-end aggregation through the real client against a mock endpoint

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::MockServer;

use zbx_evt_sensors::aggregator::{self, worst_severity};
use zbx_evt_sensors::client::ZabbixClient;
use zbx_evt_sensors::sensors::{SensorKind, TagSensor};

use crate::helpers::*;

#[tokio::test]
async fn problem_is_grouped_and_rendered_end_to_end() {
    let server = MockServer::start().await;
    mount_version(&server).await;
    mount_method(
        &server,
        "problem.get",
        rpc_result(json!([problem_record(
            "1",
            "CPU high",
            4,
            &[("env", "prod")]
        )])),
    )
    .await;
    mount_method(
        &server,
        "event.get",
        rpc_result(event_hosts(&[("1", "srv1")])),
    )
    .await;
    mount_method(&server, "service.get", rpc_result(json!([]))).await;

    let client = ZabbixClient::login(&test_config(&server)).await.unwrap();
    let snapshot = aggregator::collect(&client, true).await.unwrap();

    let group = &snapshot.problems["env:prod"];
    assert_eq!(group.len(), 1);
    assert_eq!(group[0].to_string(), "srv1: CPU high (4)");
    assert_eq!(worst_severity(group), 4);
}

#[tokio::test]
async fn multi_tag_problems_fan_out_across_groups() {
    let server = MockServer::start().await;
    mount_version(&server).await;
    mount_method(
        &server,
        "problem.get",
        rpc_result(json!([
            problem_record("1", "Disk full", 3, &[("env", "prod"), ("team", "infra")]),
            problem_record("2", "Load high", 2, &[("env", "prod")]),
        ])),
    )
    .await;
    mount_method(
        &server,
        "event.get",
        rpc_result(event_hosts(&[("1", "srv1"), ("2", "srv2")])),
    )
    .await;

    let client = ZabbixClient::login(&test_config(&server)).await.unwrap();
    let snapshot = aggregator::collect(&client, false).await.unwrap();

    assert_eq!(snapshot.problems["env:prod"].len(), 2);
    assert_eq!(snapshot.problems["team:infra"].len(), 1);
    assert_eq!(worst_severity(&snapshot.problems["env:prod"]), 3);
}

#[tokio::test]
async fn only_root_services_become_events() {
    let server = MockServer::start().await;
    mount_version(&server).await;
    mount_method(&server, "problem.get", rpc_result(json!([]))).await;
    mount_method(
        &server,
        "service.get",
        rpc_result(json!([
            service_record("10", "Webshop", 4, 0, &[("tier", "web")]),
            service_record("11", "Webshop DB", 5, 1, &[("tier", "web")]),
            service_record("12", "Mail", 0, 0, &[("tier", "mail")]),
        ])),
    )
    .await;

    let client = ZabbixClient::login(&test_config(&server)).await.unwrap();
    let snapshot = aggregator::collect(&client, true).await.unwrap();

    assert_eq!(snapshot.services["tier:web"].len(), 1);
    assert_eq!(snapshot.services["tier:web"][0].to_string(), "service: Webshop (4)");
    assert_eq!(snapshot.services["tier:mail"].len(), 1);
}

#[tokio::test]
async fn unresolved_hosts_degrade_to_sentinel() {
    let server = MockServer::start().await;
    mount_version(&server).await;
    mount_method(
        &server,
        "problem.get",
        rpc_result(json!([
            problem_record("1", "Known", 2, &[("env", "prod")]),
            problem_record("2", "Unknown", 5, &[("env", "prod")]),
        ])),
    )
    .await;
    // only event 1 resolves to a host
    mount_method(
        &server,
        "event.get",
        rpc_result(event_hosts(&[("1", "srv1")])),
    )
    .await;

    let client = ZabbixClient::login(&test_config(&server)).await.unwrap();
    let snapshot = aggregator::collect(&client, false).await.unwrap();

    let group = &snapshot.problems["env:prod"];
    assert_eq!(group[0].to_string(), "srv1: Known (2)");
    assert_eq!(group[1].to_string(), "N/A: Unknown (5)");
}

#[tokio::test]
async fn sensor_reflects_aggregated_group() {
    let server = MockServer::start().await;
    mount_version(&server).await;
    mount_method(
        &server,
        "problem.get",
        rpc_result(json!([problem_record(
            "1",
            "CPU high",
            4,
            &[("env", "prod")]
        )])),
    )
    .await;
    mount_method(
        &server,
        "event.get",
        rpc_result(event_hosts(&[("1", "srv1")])),
    )
    .await;

    let client = ZabbixClient::login(&test_config(&server)).await.unwrap();
    let snapshot = aggregator::collect(&client, false).await.unwrap();

    let mut sensor = TagSensor::new(SensorKind::Problem, "env:prod", "zabbix");
    sensor.apply(&snapshot);

    assert_eq!(sensor.state(), 4);
    assert_eq!(sensor.events(), ["srv1: CPU high (4)"]);
}
