// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

mod common;

use common::{record, stale_record, FakeContainerApi};
use gridplane_core::domain::container::{Capability, ContainerId, ContainerStatus, HeartbeatPayload};
use std::time::Duration;

#[tokio::test]
async fn double_registration_keeps_one_record_with_latest_snapshot() {
    let api = FakeContainerApi::new();
    let (registry, _hub, _store) = common::registry_with(api, Duration::from_secs(60)).await;

    let first = record("c1");
    assert!(!registry.register_container(first).await.unwrap());

    let mut second = record("c1");
    second.health_score = 70;
    second.capabilities.insert(Capability::GpuCompute);
    assert!(registry.register_container(second).await.unwrap());

    let containers = registry.list_containers().await.unwrap();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].health_score, 70);
    assert!(containers[0].has_capability(Capability::GpuCompute));
}

#[tokio::test]
async fn capability_index_tracks_capability_set() {
    let api = FakeContainerApi::new();
    let (registry, _hub, _store) = common::registry_with(api, Duration::from_secs(60)).await;

    let mut r = record("c1");
    r.capabilities.insert(Capability::GpuCompute);
    registry.register_container(r).await.unwrap();

    let gpu = registry
        .containers_with_capability(Capability::GpuCompute)
        .await
        .unwrap();
    assert_eq!(gpu.len(), 1);

    // Re-registration without the capability must drop the index entry.
    registry.register_container(record("c1")).await.unwrap();
    let gpu = registry
        .containers_with_capability(Capability::GpuCompute)
        .await
        .unwrap();
    assert!(gpu.is_empty());
    let runners = registry
        .containers_with_capability(Capability::AgentRunner)
        .await
        .unwrap();
    assert_eq!(runners.len(), 1);
}

#[tokio::test]
async fn heartbeat_refreshes_known_and_rejects_unknown() {
    let api = FakeContainerApi::new();
    let (registry, _hub, _store) = common::registry_with(api, Duration::from_secs(60)).await;

    registry
        .register_container(stale_record("c1", 30))
        .await
        .unwrap();

    let accepted = registry
        .heartbeat(HeartbeatPayload {
            container_id: ContainerId::new("c1"),
            health_score: Some(80),
            resources: None,
            active_agents: 2,
        })
        .await
        .unwrap();
    assert!(accepted);

    let c = registry
        .get_container(&ContainerId::new("c1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(c.health_score, 80);
    assert!((chrono::Utc::now() - c.last_heartbeat).num_seconds() < 5);

    let unknown = registry
        .heartbeat(HeartbeatPayload {
            container_id: ContainerId::new("ghost"),
            health_score: None,
            resources: None,
            active_agents: 0,
        })
        .await
        .unwrap();
    assert!(!unknown);
}

#[tokio::test]
async fn cleanup_evicts_only_stale_containers() {
    let api = FakeContainerApi::new();
    let (registry, _hub, _store) = common::registry_with(api, Duration::from_secs(60)).await;

    registry.register_container(record("fresh")).await.unwrap();
    registry
        .register_container(stale_record("stale", 120))
        .await
        .unwrap();

    let evicted = registry.run_cleanup_cycle().await.unwrap();
    assert_eq!(evicted, 1);

    let remaining = registry.list_containers().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, ContainerId::new("fresh"));

    let archived = registry
        .get_archived(&ContainerId::new("stale"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(archived.reason, "heartbeat_timeout");
    assert_eq!(archived.record.status, ContainerStatus::Terminated);
}

#[tokio::test]
async fn deregistration_clears_every_index() {
    let api = FakeContainerApi::new();
    let (registry, _hub, _store) = common::registry_with(api, Duration::from_secs(60)).await;

    let mut r = record("c1");
    r.capabilities.insert(Capability::Storage);
    registry.register_container(r).await.unwrap();
    registry
        .deregister_container(&ContainerId::new("c1"), "test")
        .await
        .unwrap();

    assert!(registry
        .get_container(&ContainerId::new("c1"))
        .await
        .unwrap()
        .is_none());
    assert!(registry
        .get_container_by_name("worker-c1")
        .await
        .unwrap()
        .is_none());
    assert!(registry
        .containers_with_capability(Capability::Storage)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn cluster_status_aggregates_active_containers_only() {
    let api = FakeContainerApi::new();
    let (registry, _hub, _store) = common::registry_with(api, Duration::from_secs(60)).await;

    registry.register_container(record("a")).await.unwrap();
    let mut sick = record("b");
    sick.status = ContainerStatus::Unhealthy;
    registry.register_container(sick).await.unwrap();

    let status = registry.get_cluster_status().await.unwrap();
    assert_eq!(status.total_containers, 2);
    assert_eq!(status.active_containers, 1);
    assert_eq!(status.inactive_containers, 1);
    assert_eq!(status.total_cpu_cores, 4);
    assert_eq!(
        status.capability_distribution.get(&Capability::AgentRunner),
        Some(&2)
    );
}

struct CountingHandler {
    seen: std::sync::atomic::AtomicUsize,
}

impl gridplane_core::application::registry::ContainerEventHandler for CountingHandler {
    fn name(&self) -> &str {
        "counting"
    }

    fn on_event(&self, _event: &gridplane_core::domain::events::ContainerEvent) {
        self.seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

#[tokio::test]
async fn handlers_receive_events_until_unregistered() {
    let api = FakeContainerApi::new();
    let (registry, _hub, _store) = common::registry_with(api, Duration::from_secs(60)).await;

    let handler = std::sync::Arc::new(CountingHandler {
        seen: std::sync::atomic::AtomicUsize::new(0),
    });
    registry.register_handler(handler.clone());
    let cancel = tokio_util::sync::CancellationToken::new();
    let handles = registry.spawn_loops(cancel.clone());

    registry.register_container(record("c1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let after_first = handler.seen.load(std::sync::atomic::Ordering::SeqCst);
    assert!(after_first >= 1);

    assert!(registry.unregister_handler("counting"));
    registry.register_container(record("c2")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        handler.seen.load(std::sync::atomic::Ordering::SeqCst),
        after_first
    );

    cancel.cancel();
    for handle in handles {
        handle.await.unwrap();
    }
}
