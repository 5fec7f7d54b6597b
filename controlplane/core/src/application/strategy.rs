// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Placement strategies.
//!
//! Pure selection functions over candidate load snapshots. The manager owns
//! the candidate filtering (activity, constraints) and the round-robin
//! cursor persistence; these functions only rank.

use crate::domain::agent::DeploymentStrategy;
use crate::domain::container::{Capability, ContainerRecord};

/// A placement candidate with its current agent load.
#[derive(Debug, Clone)]
pub struct CandidateLoad {
    pub record: ContainerRecord,
    /// Agents of any type currently placed on this container.
    pub agent_count: usize,
    /// Agents of the type being deployed currently placed here.
    pub same_type_count: usize,
}

/// Capabilities an agent type benefits from, used by the capability-matched
/// strategy to rank candidates. Types without an entry rank on capability
/// breadth alone.
pub fn preferred_capabilities(agent_type: &str) -> &'static [Capability] {
    match agent_type {
        "inference" | "training" => &[Capability::GpuCompute, Capability::HighMemory],
        "analytics" => &[Capability::HighMemory],
        "archiver" | "indexer" => &[Capability::Storage],
        _ => &[],
    }
}

/// Pick a candidate index according to `strategy`. `cursor` is the current
/// round-robin position; every strategy other than round-robin ignores it.
/// Returns `None` only for an empty candidate list.
pub fn select(
    strategy: DeploymentStrategy,
    agent_type: &str,
    candidates: &[CandidateLoad],
    cursor: u64,
) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }
    let index = match strategy {
        DeploymentStrategy::RoundRobin => (cursor as usize) % candidates.len(),
        DeploymentStrategy::LeastLoaded => least_loaded(candidates),
        DeploymentStrategy::ResourceBased => resource_based(candidates),
        DeploymentStrategy::CapabilityBased => capability_matched(agent_type, candidates),
        DeploymentStrategy::AffinityBased => affinity_based(candidates),
    };
    Some(index)
}

/// Composite load score: each placed agent weighs 100 points, plus the
/// container's current cpu and memory percentages. Lowest score wins, so
/// resource pressure breaks agent-count ties.
fn least_loaded(candidates: &[CandidateLoad]) -> usize {
    let score = |c: &CandidateLoad| {
        c.agent_count as f64 * 100.0
            + c.record.resources.cpu_percent
            + c.record.resources.memory_percent
    };
    let mut best = 0;
    for (i, c) in candidates.iter().enumerate().skip(1) {
        if score(c) < score(&candidates[best]) {
            best = i;
        }
    }
    best
}

/// Headroom score: free CPU share plus free memory share. Candidates already
/// above 80% on either axis are excluded; falls back to least-loaded when
/// every candidate is saturated.
fn resource_based(candidates: &[CandidateLoad]) -> usize {
    let headroom = |c: &CandidateLoad| {
        let r = &c.record.resources;
        r.free_cpu_percent() + (100.0 - r.memory_percent).clamp(0.0, 100.0)
    };
    let eligible: Vec<usize> = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.record.resources.cpu_percent < 80.0 && c.record.resources.memory_percent < 80.0)
        .map(|(i, _)| i)
        .collect();
    if eligible.is_empty() {
        return least_loaded(candidates);
    }
    let mut best = eligible[0];
    for &i in &eligible[1..] {
        if headroom(&candidates[i]) > headroom(&candidates[best]) {
            best = i;
        }
    }
    best
}

/// Most preferred-capability matches wins, then capability breadth, then the
/// lighter agent load.
fn capability_matched(agent_type: &str, candidates: &[CandidateLoad]) -> usize {
    let preferred = preferred_capabilities(agent_type);
    let score = |c: &CandidateLoad| {
        let matches = preferred
            .iter()
            .filter(|cap| c.record.has_capability(**cap))
            .count();
        (matches, c.record.capabilities.len())
    };
    let mut best = 0;
    for (i, c) in candidates.iter().enumerate().skip(1) {
        let incumbent = &candidates[best];
        let (s, b) = score(c);
        let (is, ib) = score(incumbent);
        if (s, b) > (is, ib) || ((s, b) == (is, ib) && c.agent_count < incumbent.agent_count) {
            best = i;
        }
    }
    best
}

/// Co-locate with agents of the same type; falls back to least-loaded when
/// no candidate hosts one yet.
fn affinity_based(candidates: &[CandidateLoad]) -> usize {
    let mut best: Option<usize> = None;
    for (i, c) in candidates.iter().enumerate() {
        if c.same_type_count == 0 {
            continue;
        }
        match best {
            None => best = Some(i),
            Some(b) if c.same_type_count > candidates[b].same_type_count => best = Some(i),
            _ => {}
        }
    }
    best.unwrap_or_else(|| least_loaded(candidates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::container::{ContainerId, ContainerStatus, ResourceSnapshot};
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn candidate(id: &str, agent_count: usize, same_type: usize) -> CandidateLoad {
        CandidateLoad {
            record: ContainerRecord {
                id: ContainerId::new(id),
                name: id.to_string(),
                host_address: "10.0.0.1".into(),
                api_endpoint: None,
                capabilities: BTreeSet::from([Capability::AgentRunner]),
                resources: ResourceSnapshot::default(),
                status: ContainerStatus::Active,
                health_score: 100,
                registered_at: Utc::now(),
                last_heartbeat: Utc::now(),
            },
            agent_count,
            same_type_count: same_type,
        }
    }

    #[test]
    fn empty_candidates_select_nothing() {
        for strategy in [
            DeploymentStrategy::RoundRobin,
            DeploymentStrategy::LeastLoaded,
            DeploymentStrategy::ResourceBased,
            DeploymentStrategy::CapabilityBased,
            DeploymentStrategy::AffinityBased,
        ] {
            assert_eq!(select(strategy, "worker", &[], 0), None);
        }
    }

    #[test]
    fn round_robin_cycles_by_cursor() {
        let candidates = vec![candidate("a", 0, 0), candidate("b", 0, 0), candidate("c", 0, 0)];
        let picks: Vec<_> = (0..6)
            .map(|cursor| {
                select(DeploymentStrategy::RoundRobin, "worker", &candidates, cursor).unwrap()
            })
            .collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn least_loaded_weighs_agents_over_resource_pressure() {
        // One extra agent (100 points) outweighs any cpu/mem difference.
        let mut candidates = vec![candidate("busy", 2, 0), candidate("calm", 1, 0)];
        candidates[1].record.resources.cpu_percent = 95.0;
        candidates[1].record.resources.memory_percent = 95.0;
        assert_eq!(
            select(DeploymentStrategy::LeastLoaded, "worker", &candidates, 0),
            Some(1)
        );
    }

    #[test]
    fn least_loaded_breaks_agent_ties_on_resource_pressure() {
        let mut candidates = vec![candidate("hot", 1, 0), candidate("cold", 1, 0)];
        candidates[0].record.resources.cpu_percent = 90.0;
        candidates[0].record.resources.memory_percent = 90.0;
        assert_eq!(
            select(DeploymentStrategy::LeastLoaded, "worker", &candidates, 0),
            Some(1)
        );
    }

    #[test]
    fn resource_based_skips_saturated_containers() {
        let mut candidates = vec![candidate("hot", 0, 0), candidate("cool", 5, 0)];
        candidates[0].record.resources.cpu_percent = 92.0;
        candidates[1].record.resources.cpu_percent = 20.0;
        candidates[1].record.resources.memory_percent = 30.0;
        assert_eq!(
            select(DeploymentStrategy::ResourceBased, "worker", &candidates, 0),
            Some(1)
        );
    }

    #[test]
    fn resource_based_falls_back_when_all_saturated() {
        let mut candidates = vec![candidate("a", 4, 0), candidate("b", 1, 0)];
        for c in &mut candidates {
            c.record.resources.memory_percent = 95.0;
        }
        assert_eq!(
            select(DeploymentStrategy::ResourceBased, "worker", &candidates, 0),
            Some(1)
        );
    }

    #[test]
    fn capability_matched_prefers_gpu_for_inference() {
        let mut candidates = vec![candidate("plain", 0, 0), candidate("gpu", 2, 0)];
        candidates[1].record.capabilities.insert(Capability::GpuCompute);
        candidates[1].record.capabilities.insert(Capability::HighMemory);
        assert_eq!(
            select(
                DeploymentStrategy::CapabilityBased,
                "inference",
                &candidates,
                0
            ),
            Some(1)
        );
    }

    #[test]
    fn affinity_colocates_with_same_type() {
        let candidates = vec![candidate("empty", 0, 0), candidate("peers", 4, 2)];
        assert_eq!(
            select(DeploymentStrategy::AffinityBased, "worker", &candidates, 0),
            Some(1)
        );
    }

    #[test]
    fn affinity_falls_back_to_least_loaded() {
        let candidates = vec![candidate("a", 2, 0), candidate("b", 0, 0)];
        assert_eq!(
            select(DeploymentStrategy::AffinityBased, "worker", &candidates, 0),
            Some(1)
        );
    }
}
