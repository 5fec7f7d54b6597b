// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::container::{ContainerId, ResourceSnapshot};
use crate::domain::engine::{ContainerEngine, WorkloadDetails, WorkloadSummary};
use crate::domain::error::EngineError;
use async_trait::async_trait;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::models::{ContainerStatsResponse, ContainerSummary, ContainerSummaryStateEnum};
use bollard::query_parameters::{
    InspectContainerOptions, ListContainersOptionsBuilder, StatsOptionsBuilder,
};
use bollard::Docker;
use futures::StreamExt;

/// Container engine backed by the local Docker daemon.
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    pub fn new(socket_path: Option<String>) -> Result<Self, EngineError> {
        // Connect to Docker daemon (custom socket or auto-detect)
        let docker = if let Some(path) = socket_path {
            #[cfg(unix)]
            let result = Docker::connect_with_unix(&path, 120, bollard::API_DEFAULT_VERSION);

            #[cfg(windows)]
            let result = Docker::connect_with_named_pipe(&path, 120, bollard::API_DEFAULT_VERSION);

            result.map_err(|e| {
                EngineError::Engine(format!(
                    "Failed to connect to Docker at {}: {}. \
                     Ensure Docker is running and the socket path is correct.",
                    path, e
                ))
            })?
        } else {
            Docker::connect_with_local_defaults().map_err(|e| {
                EngineError::Engine(format!(
                    "Failed to connect to Docker: {}. \
                     Check that the daemon is running and the socket is accessible.",
                    e
                ))
            })?
        };

        Ok(Self { docker })
    }

    /// Verify the Docker daemon is reachable.
    pub async fn healthcheck(&self) -> Result<(), EngineError> {
        self.docker
            .ping()
            .await
            .map_err(|e| EngineError::Engine(format!("Docker healthcheck failed: {}", e)))?;
        Ok(())
    }

    fn map_error(id: &ContainerId, e: bollard::errors::Error) -> EngineError {
        match e {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            } => EngineError::NotFound(id.clone()),
            other => EngineError::Engine(other.to_string()),
        }
    }
}

fn trim_name(names: Option<Vec<String>>) -> String {
    names
        .and_then(|n| n.into_iter().next())
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default()
}

fn summarize(c: ContainerSummary) -> Option<WorkloadSummary> {
    let id = c.id?;
    Some(WorkloadSummary {
        id: ContainerId::new(id),
        name: trim_name(c.names),
        labels: c.labels.unwrap_or_default(),
        running: c.state == Some(ContainerSummaryStateEnum::RUNNING),
    })
}

/// Standard Docker cpu% derivation: usage delta over system delta, scaled
/// by the number of online cpus. Every field in the stats model is
/// optional; absent values are treated as zero.
fn snapshot_from_stats(stats: ContainerStatsResponse) -> ResourceSnapshot {
    let cpu_stats = stats.cpu_stats.unwrap_or_default();
    let precpu_stats = stats.precpu_stats.unwrap_or_default();
    let total_usage = cpu_stats
        .cpu_usage
        .as_ref()
        .and_then(|u| u.total_usage)
        .unwrap_or(0);
    let prev_total_usage = precpu_stats
        .cpu_usage
        .as_ref()
        .and_then(|u| u.total_usage)
        .unwrap_or(0);
    let cpu_delta = total_usage.saturating_sub(prev_total_usage) as f64;
    let system_delta = cpu_stats
        .system_cpu_usage
        .unwrap_or(0)
        .saturating_sub(precpu_stats.system_cpu_usage.unwrap_or(0)) as f64;
    let online_cpus = cpu_stats.online_cpus.unwrap_or(1).max(1);
    let cpu_percent = if system_delta > 0.0 {
        (cpu_delta / system_delta) * online_cpus as f64 * 100.0
    } else {
        0.0
    };

    let memory_stats = stats.memory_stats.unwrap_or_default();
    let memory_used = memory_stats.usage.unwrap_or(0);
    let memory_limit = memory_stats.limit.unwrap_or(0);
    let memory_percent = if memory_limit > 0 {
        (memory_used as f64 / memory_limit as f64) * 100.0
    } else {
        0.0
    };

    let (rx, tx) = stats
        .networks
        .map(|networks| {
            networks.values().fold((0u64, 0u64), |(rx, tx), n| {
                (rx + n.rx_bytes.unwrap_or(0), tx + n.tx_bytes.unwrap_or(0))
            })
        })
        .unwrap_or((0, 0));

    ResourceSnapshot {
        cpu_cores: online_cpus as u32,
        cpu_percent,
        memory_limit_bytes: memory_limit,
        memory_used_bytes: memory_used,
        memory_percent,
        network_rx_bytes: rx,
        network_tx_bytes: tx,
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn list_workloads(&self) -> Result<Vec<WorkloadSummary>, EngineError> {
        let options = ListContainersOptionsBuilder::default().all(false).build();
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| EngineError::Engine(e.to_string()))?;

        Ok(containers.into_iter().filter_map(summarize).collect())
    }

    async fn inspect(&self, id: &ContainerId) -> Result<WorkloadDetails, EngineError> {
        let inspect = self
            .docker
            .inspect_container(id.as_str(), None::<InspectContainerOptions>)
            .await
            .map_err(|e| Self::map_error(id, e))?;

        let name = inspect
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default();

        let config = inspect.config.unwrap_or_default();
        let labels = config.labels.unwrap_or_default();
        let env = config.env.unwrap_or_default();

        // First network with an assigned address wins; bridge networking in
        // practice has exactly one.
        let host_address = inspect
            .network_settings
            .and_then(|settings| settings.networks)
            .and_then(|networks| {
                networks
                    .into_values()
                    .filter_map(|n| n.ip_address)
                    .find(|ip| !ip.is_empty())
            })
            .unwrap_or_else(|| "127.0.0.1".to_string());

        Ok(WorkloadDetails {
            id: id.clone(),
            name,
            host_address,
            labels,
            env,
        })
    }

    async fn sample_resources(&self, id: &ContainerId) -> Result<ResourceSnapshot, EngineError> {
        let options = StatsOptionsBuilder::default()
            .stream(false)
            .one_shot(false)
            .build();
        let stats: ContainerStatsResponse = self
            .docker
            .stats(id.as_str(), Some(options))
            .next()
            .await
            .ok_or_else(|| EngineError::NotFound(id.clone()))?
            .map_err(|e| Self::map_error(id, e))?;

        Ok(snapshot_from_stats(stats))
    }

    async fn exec_probe(&self, id: &ContainerId, command: &[&str]) -> Result<bool, EngineError> {
        let exec_config = CreateExecOptions {
            attach_stdout: Some(false),
            attach_stderr: Some(false),
            cmd: Some(command.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(id.as_str(), exec_config)
            .await
            .map_err(|e| Self::map_error(id, e))?;

        let start_opts = StartExecOptions {
            detach: false,
            ..Default::default()
        };
        let res = self
            .docker
            .start_exec(&exec.id, Some(start_opts))
            .await
            .map_err(|e| Self::map_error(id, e))?;

        // Drain any attached output so the exec runs to completion before the
        // exit code is inspected.
        if let StartExecResults::Attached { mut output, .. } = res {
            while output.next().await.is_some() {}
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| Self::map_error(id, e))?;

        Ok(inspect.exit_code.unwrap_or(-1) == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{
        ContainerCpuStats, ContainerCpuUsage, ContainerMemoryStats, ContainerNetworkStats,
    };
    use std::collections::HashMap;

    #[test]
    fn summary_maps_state_name_and_labels() {
        let summary = ContainerSummary {
            id: Some("abc123".to_string()),
            names: Some(vec!["/worker-1".to_string()]),
            labels: Some(HashMap::from([(
                "gridplane.enabled".to_string(),
                "true".to_string(),
            )])),
            state: Some(ContainerSummaryStateEnum::RUNNING),
            ..Default::default()
        };

        let workload = summarize(summary).unwrap();
        assert_eq!(workload.id, ContainerId::new("abc123"));
        assert_eq!(workload.name, "worker-1");
        assert!(workload.running);
        assert_eq!(
            workload.labels.get("gridplane.enabled").map(String::as_str),
            Some("true")
        );

        let stopped = ContainerSummary {
            id: Some("def456".to_string()),
            state: Some(ContainerSummaryStateEnum::EXITED),
            ..Default::default()
        };
        assert!(!summarize(stopped).unwrap().running);
        assert!(summarize(ContainerSummary::default()).is_none());
    }

    #[test]
    fn stats_derive_cpu_and_memory_percentages() {
        let stats = ContainerStatsResponse {
            cpu_stats: Some(ContainerCpuStats {
                cpu_usage: Some(ContainerCpuUsage {
                    total_usage: Some(400),
                    ..Default::default()
                }),
                system_cpu_usage: Some(2_000),
                online_cpus: Some(2),
                ..Default::default()
            }),
            precpu_stats: Some(ContainerCpuStats {
                cpu_usage: Some(ContainerCpuUsage {
                    total_usage: Some(200),
                    ..Default::default()
                }),
                system_cpu_usage: Some(1_000),
                ..Default::default()
            }),
            memory_stats: Some(ContainerMemoryStats {
                usage: Some(512),
                limit: Some(2_048),
                ..Default::default()
            }),
            networks: Some(HashMap::from([(
                "eth0".to_string(),
                ContainerNetworkStats {
                    rx_bytes: Some(10),
                    tx_bytes: Some(20),
                    ..Default::default()
                },
            )])),
            ..Default::default()
        };

        let snapshot = snapshot_from_stats(stats);
        assert_eq!(snapshot.cpu_cores, 2);
        assert!((snapshot.cpu_percent - 40.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.memory_used_bytes, 512);
        assert_eq!(snapshot.memory_limit_bytes, 2_048);
        assert!((snapshot.memory_percent - 25.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.network_rx_bytes, 10);
        assert_eq!(snapshot.network_tx_bytes, 20);
    }

    #[test]
    fn empty_stats_degrade_to_zeroed_snapshot() {
        let snapshot = snapshot_from_stats(ContainerStatsResponse::default());
        assert_eq!(snapshot.cpu_percent, 0.0);
        assert_eq!(snapshot.memory_percent, 0.0);
        assert_eq!(snapshot.cpu_cores, 1);
    }
}
