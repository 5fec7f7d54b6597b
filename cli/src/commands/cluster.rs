// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Offline cluster inspection against the embedded store.

use anyhow::Result;
use colored::Colorize;
use gridplane_core::domain::agent::AgentDeploymentRecord;
use gridplane_core::domain::container::{ContainerRecord, ContainerStatus};
use gridplane_core::domain::store::SharedStore;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Print an aggregated view of the registered containers.
pub async fn status(config_path: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let store = super::open_store(&config)?;

    let mut records = Vec::new();
    for (_, value) in store.hash_entries("containers").await? {
        if let Ok(record) = serde_json::from_value::<ContainerRecord>(value) {
            records.push(record);
        }
    }

    if records.is_empty() {
        println!("{}", "No containers registered.".yellow());
        return Ok(());
    }

    let active = records
        .iter()
        .filter(|r| r.status == ContainerStatus::Active)
        .count();
    let mut capabilities: BTreeMap<String, usize> = BTreeMap::new();
    for record in &records {
        for cap in &record.capabilities {
            *capabilities.entry(cap.to_string()).or_default() += 1;
        }
    }

    println!("{}", "Cluster status".bold());
    println!("  containers: {} ({} active)", records.len(), active);
    for (cap, count) in capabilities {
        println!("  {cap}: {count}");
    }
    println!();
    for record in &records {
        let status = match record.status {
            ContainerStatus::Active => record.status.to_string().green(),
            ContainerStatus::Unhealthy => record.status.to_string().red(),
            _ => record.status.to_string().yellow(),
        };
        println!(
            "  {} {} [{}] health={} last_heartbeat={}",
            record.id,
            record.name.bold(),
            status,
            record.health_score,
            record.last_heartbeat.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(())
}

/// Print the live agent placement map.
pub async fn agents(config_path: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let store = super::open_store(&config)?;

    let mut deployments = Vec::new();
    for (_, value) in store.hash_entries("deployments").await? {
        if let Ok(record) = serde_json::from_value::<AgentDeploymentRecord>(value) {
            deployments.push(record);
        }
    }

    if deployments.is_empty() {
        println!("{}", "No agents placed.".yellow());
        return Ok(());
    }

    deployments.sort_by(|a, b| a.deployed_at.cmp(&b.deployed_at));
    println!("{}", "Agent placements".bold());
    for d in &deployments {
        println!(
            "  {} {} on {} (strategy={}, since={})",
            d.agent_id,
            d.agent_type.bold(),
            d.container_id,
            d.strategy,
            d.deployed_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(())
}
