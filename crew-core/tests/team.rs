//! Team and Auto tasks: coordinators dispatching through both backends
#![cfg(unix)]

mod common;

use std::path::Path;
use std::time::{Duration, Instant};

use common::{ScriptLauncher, config, manager, succeed};
use crew_core::session::UNATTRIBUTED_ROLE;
use crew_core::{
    CrewEvent, DISPATCH_URL_ENV, DispatchMode, DispatchRequest, DispatchResponse, EventBus,
    OrchestratorConfig, TASK_ID_ENV, TaskId, TaskRequest, TaskState,
};

const ROLES: [&str; 2] = ["development", "review"];

/// Coordinator that waits for the test to drop a marker file, then finishes
fn coordinator_until(marker: &Path) -> String {
    format!(
        "while [ ! -f '{}' ]; do sleep 0.05; done\n{}",
        marker.display(),
        succeed("Team finished", 0.1)
    )
}

fn remote_config() -> OrchestratorConfig {
    OrchestratorConfig {
        dispatch_mode: DispatchMode::Remote,
        ..config()
    }
}

async fn dispatch(url: &str, task_id: &TaskId, request: DispatchRequest) -> DispatchResponse {
    let request = DispatchRequest {
        task_id: Some(task_id.to_string()),
        ..request
    };
    reqwest::Client::new()
        .post(format!("{url}/dispatch"))
        .json(&request)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

// ==================== Remote Dispatch Tests ====================

#[tokio::test]
async fn remote_dispatches_are_attributed_by_role() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("release");
    let launcher = ScriptLauncher::new();
    launcher.script("coordinator", coordinator_until(&marker));
    launcher.script("development", succeed("Endpoint implemented", 0.2));
    launcher.script("review", succeed("Looks good", 0.3));
    let (manager, bus) = manager(launcher.clone(), &ROLES, remote_config());

    let id = manager
        .submit(TaskRequest::team("Add a health endpoint").with_working_dir(dir.path()))
        .await
        .unwrap();
    let coordinator = launcher.wait_for_launch("coordinator").await;
    assert_eq!(coordinator.env[TASK_ID_ENV], id.to_string());
    assert!(coordinator.allowed_tools.contains(&"Bash(crew dispatch:*)".to_string()));
    assert!(coordinator.prompt.contains("- development: Handles development work"));
    let url = coordinator.env[DISPATCH_URL_ENV].clone();

    let development =
        dispatch(&url, &id, DispatchRequest::new("development", "Add GET /health")).await;
    assert!(development.ok);
    assert_eq!(development.output, "Endpoint implemented");
    assert_eq!(development.label, "development#1");

    let review = dispatch(&url, &id, DispatchRequest::new("review", "Review the change")).await;
    assert!(review.ok);
    assert_eq!(review.output, "Looks good");

    std::fs::write(&marker, "").unwrap();
    let snapshot = manager.wait(&id).await.unwrap();

    assert_eq!(snapshot.state, TaskState::Completed);
    let developments: Vec<_> = snapshot.dispatches_for("development").collect();
    let reviews: Vec<_> = snapshot.dispatches_for("review").collect();
    assert_eq!(developments.len(), 1);
    assert_eq!(reviews.len(), 1);
    assert_eq!(developments[0].output, "Endpoint implemented");
    assert_eq!(reviews[0].output, "Looks good");
    assert!((snapshot.cost_usd - 0.6).abs() < 1e-9);

    let summary = snapshot.summary();
    assert!(summary.contains("development [development#1]  ok"));
    assert!(summary.contains("review [review#1]  ok"));

    let review_spec = launcher.spec_for("review#1").unwrap();
    assert!(review_spec.prompt.contains("Endpoint implemented"));
    assert!(review_spec.prompt.contains("Review the change"));

    let dispatch_events = bus
        .task_events(&id)
        .into_iter()
        .filter(|(_, e)| matches!(e, CrewEvent::DispatchCompleted { .. }))
        .count();
    assert_eq!(dispatch_events, 2);
}

#[tokio::test]
async fn team_rejects_unregistered_role_without_failing_task() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("release");
    let launcher = ScriptLauncher::new();
    launcher.script("coordinator", coordinator_until(&marker));
    let (manager, _bus) = manager(launcher.clone(), &ROLES, remote_config());

    let id = manager
        .submit(TaskRequest::team("x").with_working_dir(dir.path()))
        .await
        .unwrap();
    let url = launcher.wait_for_launch("coordinator").await.env[DISPATCH_URL_ENV].clone();

    let response = dispatch(&url, &id, DispatchRequest::new("marketing", "Write copy")).await;
    assert!(!response.ok);
    assert!(response.error.unwrap().contains("Available agents: development, review"));

    std::fs::write(&marker, "").unwrap();
    let snapshot = manager.wait(&id).await.unwrap();
    assert_eq!(snapshot.state, TaskState::Completed);
    assert!(!snapshot.dispatches[0].ok);
    assert!(!launcher.launched().iter().any(|s| s.starts_with("marketing")));
}

#[tokio::test]
async fn failed_dispatch_is_returned_to_coordinator() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("release");
    let launcher = ScriptLauncher::new();
    launcher.script("coordinator", coordinator_until(&marker));
    launcher.script("development", "echo 'disk full' >&2\nexit 2");
    let (manager, _bus) = manager(launcher.clone(), &ROLES, remote_config());

    let id = manager
        .submit(TaskRequest::team("x").with_working_dir(dir.path()))
        .await
        .unwrap();
    let url = launcher.wait_for_launch("coordinator").await.env[DISPATCH_URL_ENV].clone();

    let response = dispatch(&url, &id, DispatchRequest::new("development", "Build")).await;
    assert!(!response.ok);
    assert!(response.error.unwrap().contains("disk full"));

    std::fs::write(&marker, "").unwrap();
    assert_eq!(manager.wait(&id).await.unwrap().state, TaskState::Completed);
}

#[tokio::test]
async fn dispatches_queue_beyond_parallel_limit() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("release");
    let launcher = ScriptLauncher::new();
    launcher.script("coordinator", coordinator_until(&marker));
    launcher.script("development", format!("sleep 0.4\n{}", succeed("done", 0.1)));
    let config = OrchestratorConfig {
        max_parallel_workers: 1,
        ..remote_config()
    };
    let (manager, _bus) = manager(launcher.clone(), &ROLES, config);

    let id = manager
        .submit(TaskRequest::team("x").with_working_dir(dir.path()))
        .await
        .unwrap();
    let url = launcher.wait_for_launch("coordinator").await.env[DISPATCH_URL_ENV].clone();

    let started = Instant::now();
    let (first, second) = tokio::join!(
        dispatch(&url, &id, DispatchRequest::new("development", "part one")),
        dispatch(&url, &id, DispatchRequest::new("development", "part two")),
    );
    assert!(first.ok && second.ok);
    assert!(started.elapsed() >= Duration::from_millis(800));
    assert_ne!(first.label, second.label);

    std::fs::write(&marker, "").unwrap();
    manager.wait(&id).await.unwrap();
}

#[tokio::test]
async fn stop_tears_down_coordinator_and_dispatches() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("never");
    let launcher = ScriptLauncher::new();
    launcher.script("coordinator", coordinator_until(&marker));
    launcher.script("development", "sleep 30");
    let (manager, _bus) = manager(launcher.clone(), &ROLES, remote_config());

    let id = manager
        .submit(TaskRequest::team("x").with_working_dir(dir.path()))
        .await
        .unwrap();
    let url = launcher.wait_for_launch("coordinator").await.env[DISPATCH_URL_ENV].clone();

    let request_id = id.clone();
    let in_flight = tokio::spawn(async move {
        dispatch(&url, &request_id, DispatchRequest::new("development", "Build")).await
    });
    launcher.wait_for_launch("development#1").await;

    assert!(manager.stop(&id).await.unwrap());
    let snapshot = manager.status(&id).await.unwrap();
    assert_eq!(snapshot.state, TaskState::Stopped);
    assert_eq!(manager.runner().active_count().await, 0);
    in_flight.abort();
}

// ==================== Auto Tests ====================

#[tokio::test]
async fn auto_runs_ad_hoc_roles() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("release");
    let launcher = ScriptLauncher::new();
    launcher.script("coordinator", coordinator_until(&marker));
    launcher.script("translator", succeed("Bonjour", 0.05));
    // Spawn is configured, but invented roles need the remote backend
    let (manager, _bus) = manager(launcher.clone(), &ROLES, config());

    let id = manager
        .submit(TaskRequest::auto("Translate the README").with_working_dir(dir.path()))
        .await
        .unwrap();
    let coordinator = launcher.wait_for_launch("coordinator").await;
    assert!(coordinator.system_prompt.contains("--system-prompt"));
    let url = coordinator.env[DISPATCH_URL_ENV].clone();

    let request = DispatchRequest {
        system_prompt: Some("You translate to French.".to_string()),
        allowed_tools: Some(vec!["Read".to_string()]),
        ..DispatchRequest::new("translator", "Translate: Hello")
    };
    let response = dispatch(&url, &id, request).await;
    assert!(response.ok);
    assert_eq!(response.output, "Bonjour");

    let spec = launcher.spec_for("translator#1").unwrap();
    assert_eq!(spec.system_prompt, "You translate to French.");
    assert_eq!(spec.allowed_tools, vec!["Read"]);

    std::fs::write(&marker, "").unwrap();
    let snapshot = manager.wait(&id).await.unwrap();
    assert_eq!(snapshot.state, TaskState::Completed);
    assert!(snapshot.dispatches[0].ad_hoc);
    assert_eq!(snapshot.dispatches[0].role, "translator");
}

// ==================== Spawn Dispatch Tests ====================

#[tokio::test]
async fn spawned_children_are_reconstructed_from_stream() {
    let launcher = ScriptLauncher::new();
    let result = common::result_line(0.4, "All done");
    let script = [
        r#"echo '{"type":"assistant","message":{"content":[{"type":"tool_use","id":"toolu_1","name":"Task","input":{"description":"impl","prompt":"Build it","subagent_type":"development"}}]}}'"#,
        r#"echo '{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"toolu_1","content":"Endpoint implemented"}]}}'"#,
        r#"echo '{"type":"assistant","message":{"content":[{"type":"tool_use","id":"toolu_2","name":"Task","input":{"prompt":"Audit it","subagent_type":"security"}}]}}'"#,
        r#"echo '{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"toolu_2","content":"No issues"}]}}'"#,
        result.as_str(),
    ]
    .join("\n");
    launcher.script("coordinator", script);
    let (manager, _bus) = manager(launcher.clone(), &ROLES, config());
    let dir = tempfile::tempdir().unwrap();

    let id = manager
        .submit(TaskRequest::team("x").with_working_dir(dir.path()))
        .await
        .unwrap();
    let snapshot = manager.wait(&id).await.unwrap();

    assert_eq!(snapshot.state, TaskState::Completed);
    assert_eq!(launcher.launched(), vec!["coordinator"]);
    let coordinator = launcher.spec_for("coordinator").unwrap();
    assert!(coordinator.extra_args.contains(&"--agents".to_string()));
    assert!(coordinator.allowed_tools.contains(&"Task".to_string()));

    let roles: Vec<_> = snapshot.dispatches.iter().map(|d| d.role.as_str()).collect();
    assert_eq!(roles, vec!["development", UNATTRIBUTED_ROLE]);
    assert_eq!(snapshot.dispatches[0].output, "Endpoint implemented");
    assert_eq!(snapshot.dispatches[1].output, "No issues");
    assert!((snapshot.cost_usd - 0.4).abs() < 1e-9);
}

#[tokio::test]
async fn failing_coordinator_fails_task() {
    let launcher = ScriptLauncher::new();
    launcher.script("coordinator", "echo 'auth expired' >&2\nexit 1");
    let (manager, _bus) = manager(launcher, &ROLES, config());
    let dir = tempfile::tempdir().unwrap();

    let id = manager
        .submit(TaskRequest::team("x").with_working_dir(dir.path()))
        .await
        .unwrap();
    let snapshot = manager.wait(&id).await.unwrap();

    let TaskState::Failed { reason } = &snapshot.state else {
        panic!("expected failure, got {:?}", snapshot.state);
    };
    assert!(reason.contains("coordinator failed"));
    assert!(reason.contains("auth expired"));
}
