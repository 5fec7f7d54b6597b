// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

use chrono::Utc;
use gridplane_core::domain::agent::AgentId;
use gridplane_core::domain::api::{ContainerApi, DeploySpec};
use gridplane_core::domain::error::ApiError;
use gridplane_core::infrastructure::http::HttpContainerApi;
use serde_json::json;

fn spec(agent_id: AgentId) -> DeploySpec {
    DeploySpec {
        agent_id,
        agent_type: "worker".to_string(),
        agent_config: json!({}),
        resource_requirements: json!({}),
        deployment_timestamp: Utc::now(),
        migration: false,
        previous_container: None,
        agent_state: None,
    }
}

#[tokio::test]
async fn deploy_posts_the_spec_and_returns_the_body() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/agents/deploy")
        .match_header("content-type", "application/json")
        .with_status(200)
        .with_body(r#"{"status":"deployed"}"#)
        .create_async()
        .await;

    let api = HttpContainerApi::new().unwrap();
    let body = api.deploy_agent(&server.url(), &spec(AgentId::new())).await.unwrap();
    assert_eq!(body["status"], json!("deployed"));
    mock.assert_async().await;
}

#[tokio::test]
async fn non_success_status_is_surfaced_with_the_body() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/agents/deploy")
        .with_status(503)
        .with_body("overloaded")
        .create_async()
        .await;

    let api = HttpContainerApi::new().unwrap();
    let err = api
        .deploy_agent(&server.url(), &spec(AgentId::new()))
        .await
        .unwrap_err();
    match err {
        ApiError::Status { code, body } => {
            assert_eq!(code, 503);
            assert_eq!(body, "overloaded");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn stop_targets_the_agent_path() {
    let agent_id = AgentId::new();
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", format!("/agents/{agent_id}/stop").as_str())
        .with_status(200)
        .create_async()
        .await;

    let api = HttpContainerApi::new().unwrap();
    api.stop_agent(&server.url(), agent_id).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn missing_state_maps_404_to_none() {
    let agent_id = AgentId::new();
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", format!("/agents/{agent_id}/state").as_str())
        .with_status(404)
        .create_async()
        .await;

    let api = HttpContainerApi::new().unwrap();
    let state = api.fetch_state(&server.url(), agent_id).await.unwrap();
    assert!(state.is_none());
}

#[tokio::test]
async fn health_probe_reports_status() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/health")
        .with_status(200)
        .create_async()
        .await;

    let api = HttpContainerApi::new().unwrap();
    assert!(api.health(&server.url()).await.unwrap());
}

#[tokio::test]
async fn proxy_normalizes_json_and_plain_text_bodies() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/metrics/summary")
        .with_status(200)
        .with_header("x-worker", "w1")
        .with_body(r#"{"agents":3}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/version")
        .with_status(200)
        .with_body("1.4.0")
        .create_async()
        .await;

    let api = HttpContainerApi::new().unwrap();

    let response = api
        .proxy(&server.url(), "get", "/metrics/summary", None)
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.data, json!({"agents": 3}));
    assert_eq!(response.headers.get("x-worker").map(String::as_str), Some("w1"));

    let response = api.proxy(&server.url(), "GET", "version", None).await.unwrap();
    assert_eq!(response.data, json!("1.4.0"));
}
