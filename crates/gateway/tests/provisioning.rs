//! End-to-end provisioning: create → pipeline → healthy, plus the
//! failure legs.

mod common;

use common::*;

use rk_domain::audit::AuditResult;
use rk_domain::fleet::{AgentStatus, ProvisioningState};
use rk_gateway::ports::ContainerState;

#[tokio::test]
async fn happy_path_create_reaches_healthy() {
    let world = TestWorld::new().await;

    let reply = world
        .say(
            ALICE,
            "/ruriko agents create --name warren --template cron-agent --image img:1",
        )
        .await
        .unwrap();
    assert!(reply.contains("Creating agent `warren`"), "{reply}");

    // The reply lands while the pipeline still runs.
    let agent = world.state.agents.get("warren").unwrap();
    assert_eq!(agent.status, AgentStatus::Creating);

    world
        .wait_for_provisioning("warren", ProvisioningState::Healthy)
        .await;

    let agent = world.state.agents.get("warren").unwrap();
    assert_eq!(agent.status, AgentStatus::Running);
    assert_eq!(agent.applied_config_version, Some(1));

    // The agent echoed the hash we pushed.
    let pushed = world.agent_plane.applied_hash.lock().clone().unwrap();
    assert_eq!(agent.desired_config_hash.as_deref(), Some(pushed.as_str()));
    assert_eq!(agent.actual_config_hash.as_deref(), Some(pushed.as_str()));

    // Config v1 was stored and matches the push.
    let v1 = world.state.versions.latest("warren").unwrap();
    assert_eq!(v1.version, 1);
    assert_eq!(v1.hash, pushed);

    // Final audit row: agents.provision success.
    let rows = world.state.audit.tail(50).unwrap();
    let provision = rows
        .iter()
        .find(|r| r.action == "agents.provision")
        .unwrap();
    assert_eq!(provision.result, AuditResult::Success);
    assert_eq!(provision.actor, ALICE);

    // Breadcrumbs went to the originating room.
    let notices = world.rooms.notices.lock();
    assert!(notices.iter().all(|(room, _)| room == ROOM));
    assert!(notices
        .iter()
        .any(|(_, msg)| msg.contains("warren is healthy")));
}

#[tokio::test]
async fn duplicate_create_conflicts_without_second_spawn() {
    let world = TestWorld::new().await;

    world
        .say(ALICE, "/ruriko agents create --name warren --template cron-agent")
        .await
        .unwrap();
    world
        .wait_for_provisioning("warren", ProvisioningState::Healthy)
        .await;

    let reply = world
        .say(ALICE, "/ruriko agents create --name warren --template cron-agent")
        .await
        .unwrap();
    assert!(reply.contains("conflict"), "{reply}");
    assert_eq!(world.runtime.spawned.lock().len(), 1);
    assert_eq!(world.state.agents.count(), 1);
}

#[tokio::test]
async fn exited_container_fails_step_one() {
    let world = TestWorld::new().await;
    // The container dies right after spawn.
    *world.runtime.spawn_state.lock() = ContainerState::Exited;

    world
        .say(ALICE, "/ruriko agents create --name doomed --template default")
        .await
        .unwrap();

    world
        .wait_for_provisioning("doomed", ProvisioningState::Error)
        .await;

    let agent = world.state.agents.get("doomed").unwrap();
    assert_eq!(agent.status, AgentStatus::Error);

    let rows = world.state.audit.tail(50).unwrap();
    let provision = rows
        .iter()
        .find(|r| r.action == "agents.provision" && r.result == AuditResult::Error)
        .unwrap();
    assert_eq!(provision.payload.as_ref().unwrap()["step"], 1);
}

#[tokio::test]
async fn mismatched_echo_hash_fails_step_five() {
    let world = TestWorld::new().await;
    *world.agent_plane.echo_override.lock() = Some("f".repeat(64));

    world
        .say(ALICE, "/ruriko agents create --name drifty --template default")
        .await
        .unwrap();
    world
        .wait_for_provisioning("drifty", ProvisioningState::Error)
        .await;

    let rows = world.state.audit.tail(50).unwrap();
    let provision = rows
        .iter()
        .find(|r| r.action == "agents.provision" && r.result == AuditResult::Error)
        .unwrap();
    assert_eq!(provision.payload.as_ref().unwrap()["step"], 5);
}

#[tokio::test]
async fn bound_secrets_are_pushed_after_healthy() {
    let world = TestWorld::new().await;
    world.state.secrets.create("openai-key").unwrap();
    world.state.secrets.bind("openai-key", "warren").unwrap();

    world
        .say(ALICE, "/ruriko agents create --name warren --template default")
        .await
        .unwrap();
    world
        .wait_for_provisioning("warren", ProvisioningState::Healthy)
        .await;

    // Give the non-fatal step a beat to finish.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let pushes = world.distributor.pushes.lock();
    assert!(pushes.contains(&("warren".to_owned(), "openai-key".to_owned())));
}

#[tokio::test]
async fn spawn_failure_marks_agent_errored() {
    let world = TestWorld::new().await;
    world
        .runtime
        .fail_spawn
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let reply = world
        .say(ALICE, "/ruriko agents create --name broken --template default")
        .await
        .unwrap();
    assert!(reply.contains("⚠️"), "{reply}");

    let agent = world.state.agents.get("broken").unwrap();
    assert_eq!(agent.status, AgentStatus::Error);
}
