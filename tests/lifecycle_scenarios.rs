//! Lifecycle scenario tests
//!
//! Drives the event dispatcher end to end against the in-memory management
//! API. Time is paused so status polling completes instantly.

use agentform::api::{ApiCall, ExecutorPermissions, InMemoryAgentApi, Operation};
use agentform::controller::Controller;
use agentform::core::{ActionGroupRecord, AgentStatus, AgentformError, S3Location};
use agentform::event::EventDispatcher;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const AGENT_NAME: &str = "knock-knock-agent";

/// Dispatcher over a fresh in-memory backend
fn setup() -> (Arc<InMemoryAgentApi>, EventDispatcher) {
    let api = Arc::new(InMemoryAgentApi::new().with_settle_after(2));
    let controller = Controller::new(api.clone());
    (api, EventDispatcher::new(controller, Duration::from_secs(300)))
}

fn group(name: &str, executor: Option<&str>) -> Value {
    json!({
        "actionGroupName": name,
        "actionGroupExecutor": executor.unwrap_or("Undefined"),
        "s3BucketName": "agent-specs",
        "s3ObjectKey": format!("{}/openapi.json", name),
        "description": "Undefined",
    })
}

/// Group with an explicit schema key and description
fn group_with(name: &str, executor: Option<&str>, key: &str, description: &str) -> Value {
    let mut group = group(name, executor);
    group["s3ObjectKey"] = json!(key);
    group["description"] = json!(description);
    group
}

type GroupState = (String, Option<String>, Option<S3Location>, Option<String>);

fn expected_groups(groups: &[Value]) -> Vec<GroupState> {
    let defined = |v: &Value| {
        v.as_str()
            .filter(|s| *s != "Undefined")
            .map(str::to_string)
    };
    let mut expected: Vec<GroupState> = groups
        .iter()
        .map(|g| {
            (
                g["actionGroupName"].as_str().unwrap().to_string(),
                defined(&g["actionGroupExecutor"]),
                Some(S3Location::new(
                    g["s3BucketName"].as_str().unwrap(),
                    g["s3ObjectKey"].as_str().unwrap(),
                )),
                defined(&g["description"]),
            )
        })
        .collect();
    expected.sort_by(|a, b| a.0.cmp(&b.0));
    expected
}

fn observed_groups(api: &InMemoryAgentApi, agent_id: &str) -> Vec<GroupState> {
    api.action_groups(agent_id)
        .into_iter()
        .map(|g| (g.name, g.executor, g.api_schema, g.description))
        .collect()
}

fn props(instruction: &str, groups: &[Value]) -> Value {
    json!({
        "AgentName": AGENT_NAME,
        "Instruction": instruction,
        "FoundationModel": "anthropic.claude-v2",
        "AgentResourceRoleArn": "arn:aws:iam::123456789012:role/AgentRole",
        "Description": "Undefined",
        "IdleSessionTTLInSeconds": "600",
        "ActionGroups": serde_json::to_string(groups).unwrap(),
    })
}

fn create_event(request_id: &str, props: Value) -> Value {
    json!({
        "RequestType": "Create",
        "RequestId": request_id,
        "LogicalResourceId": "Agent",
        "ResourceProperties": props,
    })
}

fn update_event(request_id: &str, physical_id: &str, props: Value, old: Value) -> Value {
    json!({
        "RequestType": "Update",
        "RequestId": request_id,
        "PhysicalResourceId": physical_id,
        "ResourceProperties": props,
        "OldResourceProperties": old,
    })
}

fn delete_event(request_id: &str, physical_id: &str) -> Value {
    json!({
        "RequestType": "Delete",
        "RequestId": request_id,
        "PhysicalResourceId": physical_id,
    })
}

fn action_group_mutations(api: &InMemoryAgentApi) -> Vec<ApiCall> {
    api.calls()
        .into_iter()
        .filter(|c| c.is_action_group_mutation())
        .collect()
}

fn position(calls: &[ApiCall], pred: impl Fn(&ApiCall) -> bool) -> usize {
    calls.iter().position(pred).expect("call not found")
}

#[tokio::test(start_paused = true)]
async fn test_scenario_a_create_without_action_groups() {
    let (api, dispatcher) = setup();

    let outcome = dispatcher
        .handle(&create_event("req-a", props("Tell jokes.", &[])))
        .await;

    assert!(outcome.is_success(), "{:?}", outcome.reason);
    let agent = api.agent(&outcome.physical_resource_id).unwrap();
    assert_eq!(agent.status, AgentStatus::Prepared);
    assert!(action_group_mutations(&api).is_empty());

    let result = outcome.to_provider_json();
    assert_eq!(result["PhysicalResourceId"], agent.id.as_str());
    assert_eq!(result["Data"]["AgentId"], agent.id.as_str());
    assert_eq!(result["Data"]["AgentStatus"], "PREPARED");
    assert_eq!(result["Data"]["ActionGroupCount"], 0);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_b_create_with_one_action_group() {
    let (api, dispatcher) = setup();
    let executor = "arn:aws:lambda:us-east-1:123456789012:function:demo";

    let outcome = dispatcher
        .handle(&create_event(
            "req-b",
            props("Tell jokes.", &[group("demo-action", Some(executor))]),
        ))
        .await;

    assert!(outcome.is_success(), "{:?}", outcome.reason);
    let agent_id = outcome.physical_resource_id.clone();
    assert_eq!(
        api.mutations(),
        vec![
            ApiCall::CreateAgent {
                name: AGENT_NAME.to_string()
            },
            ApiCall::CreateActionGroup {
                agent_id: agent_id.clone(),
                name: "demo-action".to_string()
            },
            ApiCall::PrepareAgent {
                agent_id: agent_id.clone()
            },
        ]
    );

    // The action group is waited on before the prepare
    let calls = api.calls();
    let created = position(&calls, |c| matches!(c, ApiCall::CreateActionGroup { .. }));
    let prepared = position(&calls, |c| matches!(c, ApiCall::PrepareAgent { .. }));
    assert!(calls[created..prepared]
        .iter()
        .any(|c| matches!(c, ApiCall::GetActionGroup { .. })));

    let groups = api.action_groups(&agent_id);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].executor.as_deref(), Some(executor));
    assert_eq!(
        groups[0].api_schema,
        Some(S3Location::new("agent-specs", "demo-action/openapi.json"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_scenario_c_instruction_change_only() {
    let (api, dispatcher) = setup();
    let groups = [group("demo-action", Some("fn:demo")), group("lookup", None)];
    let old = props("Tell jokes.", &groups);

    let created = dispatcher.handle(&create_event("req-c1", old.clone())).await;
    assert!(created.is_success());
    api.clear_calls();

    let new = props("Tell better jokes.", &groups);
    let outcome = dispatcher
        .handle(&update_event("req-c2", &created.physical_resource_id, new, old))
        .await;

    assert!(outcome.is_success(), "{:?}", outcome.reason);
    assert_eq!(outcome.physical_resource_id, created.physical_resource_id);
    assert_eq!(
        api.mutations(),
        vec![
            ApiCall::UpdateAgent {
                agent_id: created.physical_resource_id.clone()
            },
            ApiCall::PrepareAgent {
                agent_id: created.physical_resource_id.clone()
            },
        ]
    );
    let agent = api.agent(&created.physical_resource_id).unwrap();
    assert_eq!(agent.instruction, "Tell better jokes.");
}

#[tokio::test(start_paused = true)]
async fn test_scenario_d_remove_one_of_two_action_groups() {
    let (api, dispatcher) = setup();
    let old = props("Tell jokes.", &[group("keep", None), group("drop", None)]);

    let created = dispatcher.handle(&create_event("req-d1", old.clone())).await;
    assert!(created.is_success());
    let agent_id = created.physical_resource_id.clone();
    let dropped_id = api
        .action_groups(&agent_id)
        .into_iter()
        .find(|g| g.name == "drop")
        .unwrap()
        .id;
    api.clear_calls();

    let new = props("Tell jokes.", &[group("keep", None)]);
    let outcome = dispatcher
        .handle(&update_event("req-d2", &agent_id, new, old))
        .await;
    assert!(outcome.is_success(), "{:?}", outcome.reason);

    assert_eq!(
        action_group_mutations(&api),
        vec![ApiCall::DeleteActionGroup {
            agent_id: agent_id.clone(),
            action_group_id: dropped_id.clone()
        }]
    );

    // Deletion stabilizes before the agent is prepared again
    let calls = api.calls();
    let deleted = position(&calls, |c| matches!(c, ApiCall::DeleteActionGroup { .. }));
    let prepared = position(&calls, |c| matches!(c, ApiCall::PrepareAgent { .. }));
    assert!(deleted < prepared);
    assert!(calls[deleted..prepared].iter().any(|c| matches!(
        c,
        ApiCall::GetActionGroup { action_group_id, .. } if *action_group_id == dropped_id
    )));

    let names: Vec<String> = api
        .action_groups(&agent_id)
        .into_iter()
        .map(|g| g.name)
        .collect();
    assert_eq!(names, vec!["keep".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_e_delete_absent_agent() {
    let (api, dispatcher) = setup();

    let outcome = dispatcher
        .handle(&delete_event("req-e", "A000000404"))
        .await;

    assert!(outcome.is_success(), "{:?}", outcome.reason);
    assert_eq!(outcome.physical_resource_id, "A000000404");
    assert!(api.mutations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_create_then_identical_update_is_idempotent() {
    let (api, dispatcher) = setup();
    let state = props("Tell jokes.", &[group("demo-action", Some("fn:demo"))]);

    let created = dispatcher.handle(&create_event("req-i1", state.clone())).await;
    let before: Vec<ActionGroupRecord> = api.action_groups(&created.physical_resource_id);
    api.clear_calls();

    let updated = dispatcher
        .handle(&update_event(
            "req-i2",
            &created.physical_resource_id,
            state.clone(),
            state,
        ))
        .await;

    assert!(updated.is_success(), "{:?}", updated.reason);
    assert_eq!(updated.physical_resource_id, created.physical_resource_id);
    assert_eq!(api.agent_count(), 1);
    assert_eq!(api.action_groups(&created.physical_resource_id), before);
    assert!(action_group_mutations(&api).is_empty());
    assert!(!api
        .mutations()
        .iter()
        .any(|c| matches!(c, ApiCall::UpdateAgent { .. } | ApiCall::CreateAgent { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_retried_create_adopts_existing_agent() {
    let (api, dispatcher) = setup();
    let state = props("Tell jokes.", &[group("demo-action", None)]);

    let first = dispatcher.handle(&create_event("req-r1", state.clone())).await;
    let second = dispatcher.handle(&create_event("req-r2", state)).await;

    assert!(first.is_success() && second.is_success());
    assert_eq!(first.physical_resource_id, second.physical_resource_id);
    assert_eq!(api.agent_count(), 1);
    assert_eq!(api.action_groups(&first.physical_resource_id).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_redelivered_create_reuses_client_token() {
    let (api, dispatcher) = setup();
    let event = create_event("req-same", props("Tell jokes.", &[]));

    let first = dispatcher.handle(&event).await;
    let second = dispatcher.handle(&event).await;

    assert_eq!(first.physical_resource_id, second.physical_resource_id);
    assert_eq!(api.agent_count(), 1);
    // Same token means no name lookup was needed
    assert!(!api
        .calls()
        .iter()
        .any(|c| matches!(c, ApiCall::FindAgent { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_delete_twice_succeeds() {
    let (api, dispatcher) = setup();
    let created = dispatcher
        .handle(&create_event(
            "req-x1",
            props("Tell jokes.", &[group("a", None), group("b", None)]),
        ))
        .await;
    let id = created.physical_resource_id;

    let first = dispatcher.handle(&delete_event("req-x2", &id)).await;
    let second = dispatcher.handle(&delete_event("req-x3", &id)).await;

    assert!(first.is_success(), "{:?}", first.reason);
    assert!(second.is_success(), "{:?}", second.reason);
    assert_eq!(api.agent_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_delete_removes_action_groups_before_agent() {
    let (api, dispatcher) = setup();
    let created = dispatcher
        .handle(&create_event(
            "req-o1",
            props(
                "Tell jokes.",
                &[group("a", None), group("b", None), group("c", None)],
            ),
        ))
        .await;
    api.clear_calls();

    let outcome = dispatcher
        .handle(&delete_event("req-o2", &created.physical_resource_id))
        .await;
    assert!(outcome.is_success(), "{:?}", outcome.reason);

    let mutations = api.mutations();
    assert_eq!(mutations.len(), 4);
    assert!(mutations[..3]
        .iter()
        .all(|c| matches!(c, ApiCall::DeleteActionGroup { .. })));
    assert!(matches!(mutations[3], ApiCall::DeleteAgent { .. }));

    // Every group was seen gone before the agent delete was issued
    let calls = api.calls();
    let agent_delete = position(&calls, |c| matches!(c, ApiCall::DeleteAgent { .. }));
    let last_group_read = calls
        .iter()
        .rposition(|c| matches!(c, ApiCall::GetActionGroup { .. }))
        .unwrap();
    assert!(last_group_read < agent_delete);
}

#[tokio::test(start_paused = true)]
async fn test_action_group_sets_converge() {
    let sets: Vec<Vec<Value>> = vec![
        vec![],
        vec![group("a", Some("fn:a"))],
        vec![group("a", Some("fn:a2")), group("b", None), group("c", Some("fn:c"))],
        vec![group("c", None), group("d", Some("fn:d"))],
        vec![group_with("a", Some("fn:a"), "a/v2/openapi.json", "Undefined")],
        vec![group_with("a", Some("fn:a"), "a/openapi.json", "Looks up jokes")],
    ];

    for d1 in &sets {
        for d2 in &sets {
            let (api, dispatcher) = setup();
            let old = props("Tell jokes.", d1);
            let new = props("Tell jokes.", d2);

            let created = dispatcher.handle(&create_event("req-1", old.clone())).await;
            let updated = dispatcher
                .handle(&update_event("req-2", &created.physical_resource_id, new, old))
                .await;
            assert!(updated.is_success(), "{:?}", updated.reason);

            assert_eq!(
                observed_groups(&api, &updated.physical_resource_id),
                expected_groups(d2)
            );
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_schema_or_description_change_updates_in_place() {
    let base = vec![group("a", Some("fn:a"))];
    let changes = [
        vec![group_with("a", Some("fn:a"), "a/v2/openapi.json", "Undefined")],
        vec![group_with("a", Some("fn:a"), "a/openapi.json", "Looks up jokes")],
    ];

    for changed in &changes {
        let (api, dispatcher) = setup();
        let old = props("Tell jokes.", &base);
        let created = dispatcher.handle(&create_event("req-1", old.clone())).await;
        let agent_id = created.physical_resource_id.clone();
        api.clear_calls();

        let updated = dispatcher
            .handle(&update_event("req-2", &agent_id, props("Tell jokes.", changed), old))
            .await;
        assert!(updated.is_success(), "{:?}", updated.reason);

        assert_eq!(
            action_group_mutations(&api),
            vec![ApiCall::UpdateActionGroup {
                agent_id: agent_id.clone(),
                name: "a".to_string(),
            }]
        );
        assert_eq!(observed_groups(&api, &agent_id), expected_groups(changed));
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_action_group_reports_partial_apply() {
    let (api, dispatcher) = setup();
    api.fail_action_group("broken");

    let outcome = dispatcher
        .handle(&create_event(
            "req-p",
            props("Tell jokes.", &[group("fine", None), group("broken", None)]),
        ))
        .await;

    assert!(!outcome.is_success());
    let reason = outcome.reason.clone().unwrap();
    assert!(reason.contains("'broken'"), "{}", reason);

    // The created agent is reported and left in place
    let agent = api.agent(&outcome.physical_resource_id).unwrap();
    assert_ne!(agent.status, AgentStatus::Prepared);
    assert!(!api
        .mutations()
        .iter()
        .any(|c| matches!(c, ApiCall::DeleteAgent { .. } | ApiCall::PrepareAgent { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_failed_create_reports_placeholder_and_delete_skips_it() {
    let (api, dispatcher) = setup();
    api.fail_next(
        Operation::CreateAgent,
        AgentformError::Rejected {
            status: 400,
            message: "foundation model not available".to_string(),
        },
    );

    let created = dispatcher
        .handle(&create_event("req-f", props("Tell jokes.", &[])))
        .await;
    assert!(!created.is_success());
    assert_eq!(
        created.physical_resource_id,
        "agentform-unprovisioned-req-f"
    );

    api.clear_calls();
    let deleted = dispatcher
        .handle(&delete_event("req-f2", &created.physical_resource_id))
        .await;
    assert!(deleted.is_success());
    assert!(api.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_update_recreates_vanished_agent() {
    let (api, dispatcher) = setup();
    let state = props("Tell jokes.", &[]);
    let created = dispatcher.handle(&create_event("req-v1", state.clone())).await;
    api.remove_agent(&created.physical_resource_id);

    let updated = dispatcher
        .handle(&update_event(
            "req-v2",
            &created.physical_resource_id,
            state.clone(),
            state,
        ))
        .await;

    assert!(updated.is_success(), "{:?}", updated.reason);
    assert_ne!(updated.physical_resource_id, created.physical_resource_id);
    assert_eq!(api.agent_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_event_is_reported_without_remote_calls() {
    let (api, dispatcher) = setup();
    let mut bad = props("Tell jokes.", &[]);
    bad["IdleSessionTTLInSeconds"] = json!("0");

    let outcome = dispatcher.handle(&create_event("req-bad", bad)).await;

    assert!(!outcome.is_success());
    assert_eq!(outcome.physical_resource_id, "agentform-unprovisioned-req-bad");
    assert!(api.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stuck_agent_times_out_before_deadline() {
    let api = Arc::new(InMemoryAgentApi::new().with_settle_after(100_000));
    let dispatcher = EventDispatcher::new(Controller::new(api.clone()), Duration::from_secs(60));
    let started = tokio::time::Instant::now();

    let outcome = dispatcher
        .handle(&create_event("req-t", props("Tell jokes.", &[])))
        .await;

    assert!(!outcome.is_success());
    assert!(outcome.reason.unwrap().contains("Timed out"));
    assert!(started.elapsed() <= Duration::from_secs(60));
    assert!(api.agent(&outcome.physical_resource_id).is_some());
}

#[derive(Default)]
struct RecordingPermissions {
    grants: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ExecutorPermissions for RecordingPermissions {
    async fn grant_invoke(
        &self,
        executor: &str,
        _agent_name: &str,
        agent_arn: &str,
    ) -> agentform::Result<()> {
        self.grants
            .lock()
            .unwrap()
            .push((executor.to_string(), agent_arn.to_string()));
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_executor_permission_granted_for_each_executor() {
    let api = Arc::new(InMemoryAgentApi::new());
    let permissions = Arc::new(RecordingPermissions::default());
    let controller = Controller::new(api.clone()).with_permissions(permissions.clone());
    let dispatcher = EventDispatcher::new(controller, Duration::from_secs(300));

    let outcome = dispatcher
        .handle(&create_event(
            "req-g",
            props(
                "Tell jokes.",
                &[group("with-fn", Some("fn:demo")), group("without-fn", None)],
            ),
        ))
        .await;
    assert!(outcome.is_success(), "{:?}", outcome.reason);

    let agent = api.agent(&outcome.physical_resource_id).unwrap();
    let grants = permissions.grants.lock().unwrap().clone();
    assert_eq!(grants, vec![("fn:demo".to_string(), agent.arn)]);
}
