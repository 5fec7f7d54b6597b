// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

mod common;

use common::FakeContainerApi;
use gridplane_core::config::HubSettings;
use gridplane_core::domain::container::ContainerId;
use gridplane_core::CommunicationHub;
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn targeted_message_reaches_subscriber() {
    let api = FakeContainerApi::new();
    let (hub, _store) = common::hub_with(api, false).await;

    let target = ContainerId::new("w1");
    hub.register_container(target.clone(), None).await.unwrap();
    let mut rx = hub.subscribe_target(&target);

    hub.send_command(target.clone(), json!({"op": "ping"}))
        .await
        .unwrap();

    let msg = rx.recv().await.unwrap();
    assert_eq!(msg.target_container, Some(target));
    assert_eq!(msg.payload, json!({"op": "ping"}));
    assert!(!msg.encrypted);
    assert_eq!(hub.stats().sent, 1);
}

#[tokio::test]
async fn payload_is_sealed_on_the_wire_and_opens_cleanly() {
    let api = FakeContainerApi::new();
    let (hub, _store) = common::hub_with(api, true).await;
    assert!(hub.encryption_enabled());

    let target = ContainerId::new("w1");
    hub.register_container(target.clone(), None).await.unwrap();
    let mut rx = hub.subscribe_target(&target);

    let original = json!({"op": "ping", "n": 7});
    hub.send_command(target, original.clone()).await.unwrap();

    let msg = rx.recv().await.unwrap();
    assert!(msg.encrypted);
    assert_ne!(msg.payload, original);
    assert_eq!(hub.open_payload(&msg).unwrap(), original);
}

#[tokio::test]
async fn two_hubs_share_one_persisted_key() {
    let api = FakeContainerApi::new();
    let (hub_a, store) = common::hub_with(api.clone(), true).await;
    let hub_b = CommunicationHub::new(
        ContainerId::new("standby"),
        store,
        api,
        HubSettings::default(),
    )
    .await;

    let target = ContainerId::new("w1");
    hub_a.register_container(target.clone(), None).await.unwrap();
    let mut rx = hub_a.subscribe_target(&target);

    hub_a
        .send_command(target, json!({"secret": true}))
        .await
        .unwrap();
    let msg = rx.recv().await.unwrap();
    assert_eq!(hub_b.open_payload(&msg).unwrap(), json!({"secret": true}));
}

#[tokio::test]
async fn unanswered_query_times_out_with_none() {
    let api = FakeContainerApi::new();
    let (hub, _store) = common::hub_with(api, false).await;

    let target = ContainerId::new("silent");
    hub.register_container(target.clone(), None).await.unwrap();

    let id = hub.send_query(target, json!({"q": "anyone?"})).await.unwrap();
    let started = tokio::time::Instant::now();
    let answer = hub.wait_for_response(id, 2).await.unwrap();
    assert!(answer.is_none());
    assert!(started.elapsed().as_secs_f64() >= 2.0);
}

#[tokio::test]
async fn response_slot_round_trip() {
    let api = FakeContainerApi::new();
    let (hub, _store) = common::hub_with(api, false).await;

    let target = ContainerId::new("w1");
    hub.register_container(target.clone(), None).await.unwrap();
    let id = hub.send_query(target.clone(), json!({"q": "state"})).await.unwrap();

    hub.send_response(id, &target, json!({"state": "idle"}))
        .await
        .unwrap();

    let answer = hub.wait_for_response(id, 5).await.unwrap().unwrap();
    assert_eq!(answer["data"], json!({"state": "idle"}));
    assert_eq!(answer["source"], json!("w1"));

    // The slot is consumed on read.
    assert!(hub.wait_for_response(id, 1).await.unwrap().is_none());
}

#[tokio::test]
async fn hub_status_query_is_answered_by_the_default_handler() {
    let api = FakeContainerApi::new();
    let (hub, _store) = common::hub_with(api, false).await;

    let cancel = CancellationToken::new();
    let handles = hub.spawn_loops(cancel.clone());

    let id = hub
        .send_query(hub.source().clone(), json!({"query": "hub_status"}))
        .await
        .unwrap();
    let answer = hub.wait_for_response(id, 5).await.unwrap().unwrap();
    assert!(answer["data"]["sent"].as_u64().unwrap() >= 1);

    cancel.cancel();
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn subscriptions_show_up_in_stats() {
    let api = FakeContainerApi::new();
    let (hub, _store) = common::hub_with(api, false).await;

    let id = ContainerId::new("w1");
    hub.register_container(id.clone(), None).await.unwrap();
    hub.subscribe_container(&id, "alerts").await.unwrap();
    hub.subscribe_container(&id, "jobs").await.unwrap();
    assert_eq!(hub.stats().subscriptions, 2);
    assert_eq!(hub.stats().active_containers, 1);

    hub.unsubscribe_container(&id, "alerts").await.unwrap();
    assert_eq!(hub.stats().subscriptions, 1);

    hub.unregister_container(&id).await.unwrap();
    assert_eq!(hub.stats().active_containers, 0);
}

#[tokio::test]
async fn proxy_goes_through_the_directory_endpoint() {
    let api = FakeContainerApi::new();
    let (hub, _store) = common::hub_with(api, false).await;

    let target = ContainerId::new("w1");
    hub.register_container(target.clone(), Some("http://10.0.0.1:9000".to_string()))
        .await
        .unwrap();

    let response = hub
        .proxy_request(&target, "GET", "/metrics", None)
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.data, json!({"path": "/metrics"}));

    let unknown = hub
        .proxy_request(&ContainerId::new("ghost"), "GET", "/metrics", None)
        .await;
    assert!(matches!(
        unknown,
        Err(gridplane_core::domain::error::HubError::UnknownContainer(_))
    ));
}
