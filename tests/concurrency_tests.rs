//! Concurrent ensures of the same key. Both callers are forced to list before either creates.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Barrier;

use role_orchestrator::{
    AssignmentKey, EnsureOutcome, IdStrategy, InMemoryBackend, OrchestratorConfig, RoleAssignmentOrchestrator,
};

const RG: &str = "/subscriptions/s1/resourceGroups/rg1";

fn orchestrator(backend: &InMemoryBackend, id_strategy: IdStrategy) -> RoleAssignmentOrchestrator {
    role_orchestrator::logging::init_test_tracing();
    let config = OrchestratorConfig { id_strategy, ..OrchestratorConfig::default() };
    RoleAssignmentOrchestrator::new(Arc::new(backend.clone()), &config)
}

#[tokio::test]
async fn deterministic_ids_collapse_racing_creates() -> Result<()> {
    let backend = InMemoryBackend::new();
    let orch = orchestrator(&backend, IdStrategy::Deterministic);
    backend.set_list_gate(Arc::new(Barrier::new(2)));

    let (a, b) = tokio::join!(orch.ensure_role(RG, "reader", "p1"), orch.ensure_role(RG, "reader", "p1"));
    backend.clear_list_gate();
    let (a, b) = (a?, b?);

    let expected = AssignmentKey::new(RG, "reader", "p1").deterministic_id();
    assert_eq!(a.assignment_id(), expected);
    assert_eq!(b.assignment_id(), expected);
    let created = [&a, &b].iter().filter(|o| o.created()).count();
    let concurrent = [&a, &b].iter().filter(|o| matches!(o, EnsureOutcome::ConcurrentlyCreated { .. })).count();
    assert_eq!((created, concurrent), (1, 1));

    assert_eq!(backend.counts().create, 2);
    assert_eq!(backend.assignments().len(), 1);
    assert!(orch.has_role(RG, "p1", "reader").await?);
    Ok(())
}

#[tokio::test]
async fn random_ids_can_duplicate_under_race() -> Result<()> {
    let backend = InMemoryBackend::new();
    let orch = orchestrator(&backend, IdStrategy::Random);
    backend.set_list_gate(Arc::new(Barrier::new(2)));

    let (a, b) = tokio::join!(orch.ensure_role(RG, "reader", "p1"), orch.ensure_role(RG, "reader", "p1"));
    backend.clear_list_gate();
    let (a, b) = (a?, b?);

    assert!(a.created() && b.created());
    assert_ne!(a.assignment_id(), b.assignment_id());
    assert_eq!(backend.assignments().len(), 2);

    // revoke cleans up both duplicates
    assert_eq!(orch.remove_role(RG, "p1").await?, 2);
    assert!(backend.assignments().is_empty());
    Ok(())
}

#[tokio::test]
async fn distinct_keys_do_not_interfere() -> Result<()> {
    let backend = InMemoryBackend::new();
    let orch = orchestrator(&backend, IdStrategy::Deterministic);

    let (a, b, c) = tokio::join!(
        orch.ensure_role(RG, "reader", "p1"),
        orch.ensure_role(RG, "contributor", "p1"),
        orch.ensure_role(RG, "reader", "p2"),
    );
    assert!(a?.created() && b?.created() && c?.created());
    assert_eq!(backend.assignments().len(), 3);
    Ok(())
}

#[tokio::test]
async fn racing_spellings_of_one_scope_share_an_id() -> Result<()> {
    let backend = InMemoryBackend::new();
    let orch = orchestrator(&backend, IdStrategy::Deterministic);
    backend.set_list_gate(Arc::new(Barrier::new(2)));

    let trailing = format!("{RG}/");
    let (a, b) = tokio::join!(orch.ensure_role(RG, "reader", "p1"), orch.ensure_role(&trailing, "reader", "p1"));
    backend.clear_list_gate();
    let (a, b) = (a?, b?);

    assert_eq!(a.assignment_id(), b.assignment_id());
    assert_eq!([a.created(), b.created()].iter().filter(|c| **c).count(), 1);
    let records = backend.assignments();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].scope, RG);
    Ok(())
}
