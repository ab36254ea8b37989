//! # Status Writer Tests
//!
//! Conflict retry, no-op detection and timestamp preservation of the status writer.

mod common;

use assistant_operator::constants::{SINGLETON_NAME, STATUS_UPDATE_ATTEMPTS};
use assistant_operator::controller::reconciler::status::{write_status, StatusUpdate, StatusWrite};
use assistant_operator::crd::{Condition, ConditionType, OverallStatus};
use assistant_operator::store::WriteVerb;
use common::*;

fn api_ready(ready: bool, reason: &str) -> StatusUpdate {
    StatusUpdate {
        conditions: vec![Condition::new(
            ConditionType::ApiReady,
            ready,
            reason,
            "assistant-app-server",
            Some(1),
        )],
        replace_conditions: true,
        diagnostics: Some(Vec::new()),
        observed_generation: Some(1),
    }
}

#[tokio::test]
async fn test_conflicts_are_retried_until_written() {
    let (memory, store) = memory_store();
    memory.seed(&desired_state(SPEC_YAML)).unwrap();
    memory.inject_status_conflicts(2);

    let outcome = write_status(&store, SINGLETON_NAME, &api_ready(true, "DeploymentAvailable"))
        .await
        .unwrap();

    assert_eq!(outcome, StatusWrite::Written);
    let status = stored_config(&store).await.unwrap().status.unwrap();
    assert_eq!(status.overall_status, Some(OverallStatus::Ready));
    assert_eq!(memory.writes().len(), 1);
    assert_eq!(memory.writes()[0].verb, WriteVerb::ReplaceStatus);
}

#[tokio::test]
async fn test_conflicts_surface_after_last_attempt() {
    let (memory, store) = memory_store();
    memory.seed(&desired_state(SPEC_YAML)).unwrap();
    memory.inject_status_conflicts(STATUS_UPDATE_ATTEMPTS);

    let err = write_status(&store, SINGLETON_NAME, &api_ready(true, "DeploymentAvailable"))
        .await
        .unwrap_err();

    assert!(err.is_conflict());
    assert_eq!(memory.write_count(), 0);
}

#[tokio::test]
async fn test_identical_status_is_not_rewritten() {
    let (memory, store) = memory_store();
    memory.seed(&desired_state(SPEC_YAML)).unwrap();
    let update = api_ready(false, "DeploymentProgressing");
    write_status(&store, SINGLETON_NAME, &update).await.unwrap();
    let first = stored_config(&store).await.unwrap().status.unwrap();
    memory.clear_writes();

    let outcome = write_status(&store, SINGLETON_NAME, &update).await.unwrap();

    assert_eq!(outcome, StatusWrite::Unchanged);
    assert_eq!(memory.write_count(), 0);
    assert_eq!(stored_config(&store).await.unwrap().status.unwrap(), first);
}

#[tokio::test]
async fn test_unchanged_transition_keeps_timestamp_across_message_change() {
    let (memory, store) = memory_store();
    memory.seed(&desired_state(SPEC_YAML)).unwrap();
    write_status(&store, SINGLETON_NAME, &api_ready(false, "DeploymentProgressing"))
        .await
        .unwrap();
    let first = stored_config(&store).await.unwrap().status.unwrap().conditions[0]
        .last_transition_time
        .clone();

    let mut update = api_ready(false, "DeploymentProgressing");
    update.conditions[0].message = "2 of 3 replicas updated".to_string();
    write_status(&store, SINGLETON_NAME, &update).await.unwrap();

    let condition = stored_config(&store).await.unwrap().status.unwrap().conditions[0].clone();
    assert_eq!(condition.message, "2 of 3 replicas updated");
    assert_eq!(condition.last_transition_time, first);
}

#[tokio::test]
async fn test_missing_desired_state_is_gone() {
    let (memory, store) = memory_store();

    let outcome = write_status(&store, SINGLETON_NAME, &api_ready(true, "DeploymentAvailable"))
        .await
        .unwrap();

    assert_eq!(outcome, StatusWrite::Gone);
    assert_eq!(memory.write_count(), 0);
}
