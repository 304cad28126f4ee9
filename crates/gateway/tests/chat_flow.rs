//! Chat surface end to end: approvals with four-eyes, config history,
//! the guardrail, and the KV allowlist.

mod common;

use common::*;

use rk_domain::approval::ApprovalStatus;
use rk_domain::audit::AuditResult;
use rk_domain::fleet::Agent;
use rk_gateway::guardrail::GUARDRAIL_REPLY;

fn seed_agent(world: &TestWorld, id: &str) {
    world
        .state
        .agents
        .insert(Agent::new(id, id, "default", None))
        .unwrap();
}

// ── Gated delete with four-eyes ─────────────────────────────────────

#[tokio::test]
async fn gated_delete_requires_a_second_operator() {
    let world = TestWorld::new().await;
    seed_agent(&world, "warren");

    // Requesting the delete parks an approval instead of executing.
    let prompt = world
        .say(ALICE, "/ruriko agents delete warren")
        .await
        .unwrap();
    assert!(prompt.contains("needs a second operator"), "{prompt}");
    let id = extract_approval_id(&prompt);
    assert!(world.state.agents.get("warren").is_some());

    // Self-approval is refused, nothing changes.
    let refused = world.say(ALICE, &format!("approve {id}")).await.unwrap();
    assert!(refused.contains("Self-approval"), "{refused}");
    assert_eq!(
        world.state.approvals.get(&id).unwrap().status,
        ApprovalStatus::Pending
    );

    // A second operator approves; the delete runs as the requestor.
    let approved = world.say(BOB, &format!("approve {id}")).await.unwrap();
    assert!(approved.contains("granted"), "{approved}");
    assert!(world.state.agents.get("warren").is_none());

    // Audit trail: a pending request row and a success row, both
    // attributed to the original requestor.
    let rows = world.state.audit.tail(50).unwrap();
    let requested = rows
        .iter()
        .find(|r| r.action == "agents.delete.approval_requested")
        .unwrap();
    assert_eq!(requested.actor, ALICE);
    assert_eq!(requested.result, AuditResult::Pending);

    let executed = rows
        .iter()
        .find(|r| r.action == "agents.delete" && r.result == AuditResult::Success)
        .unwrap();
    assert_eq!(executed.actor, ALICE);
}

#[tokio::test]
async fn deny_resolves_without_executing() {
    let world = TestWorld::new().await;
    seed_agent(&world, "warren");

    let prompt = world
        .say(ALICE, "/ruriko agents delete warren")
        .await
        .unwrap();
    let id = extract_approval_id(&prompt);

    // Deny is open to anyone, including the requestor.
    let denied = world
        .say(ALICE, &format!("deny {id} reason=\"wrong agent\""))
        .await
        .unwrap();
    assert!(denied.contains("wrong agent"), "{denied}");
    assert!(world.state.agents.get("warren").is_some());
    assert_eq!(
        world.state.approvals.get(&id).unwrap().status,
        ApprovalStatus::Denied
    );

    // The decision is terminal.
    let again = world.say(BOB, &format!("approve {id}")).await.unwrap();
    assert!(again.contains("already"), "{again}");
}

#[tokio::test]
async fn unknown_approval_id_is_reported() {
    let world = TestWorld::new().await;
    let reply = world.say(BOB, "approve deadbeef").await.unwrap();
    assert!(reply.contains("No approval"), "{reply}");
}

// ── Config history ──────────────────────────────────────────────────

#[tokio::test]
async fn rollback_to_identical_content_is_a_no_op() {
    let world = TestWorld::new().await;
    seed_agent(&world, "warren");
    // v1 via the template path.
    let doc = rk_gateway::templates::render(
        "default",
        &rk_gateway::templates::TemplateParams {
            agent_name: "warren",
            display_name: "warren",
            operator_mxid: ALICE,
        },
    )
    .unwrap();
    world.state.versions.write_doc("warren", &doc, ALICE).unwrap();

    // Rollback to v1 while v1 is still the latest: gated, then no-op.
    let prompt = world
        .say(ALICE, "/ruriko config rollback warren --to 1")
        .await
        .unwrap();
    let id = extract_approval_id(&prompt);
    let reply = world.say(BOB, &format!("approve {id}")).await.unwrap();

    assert!(reply.contains("unchanged"), "{reply}");
    assert_eq!(world.state.versions.list("warren").len(), 1);
}

#[tokio::test]
async fn set_persona_creates_a_new_version_and_diff_shows_it() {
    let world = TestWorld::new().await;
    seed_agent(&world, "warren");
    let doc = rk_gateway::templates::render(
        "default",
        &rk_gateway::templates::TemplateParams {
            agent_name: "warren",
            display_name: "warren",
            operator_mxid: ALICE,
        },
    )
    .unwrap();
    world.state.versions.write_doc("warren", &doc, ALICE).unwrap();

    let prompt = world
        .say(ALICE, "/ruriko config set-persona warren You are a meticulous scheduler.")
        .await
        .unwrap();
    let id = extract_approval_id(&prompt);
    let reply = world.say(BOB, &format!("approve {id}")).await.unwrap();
    assert!(reply.contains("v2"), "{reply}");

    let diff = world.say(ALICE, "/ruriko config diff warren").await.unwrap();
    assert!(diff.contains("changed sections: persona"), "{diff}");
    assert!(diff.contains("meticulous"), "{diff}");
}

// ── Guardrail ───────────────────────────────────────────────────────

#[tokio::test]
async fn credential_shaped_messages_are_blocked() {
    let world = TestWorld::new().await;
    let reply = world
        .say(
            ALICE,
            "my key is sk-abcdefghijklmnopqrstuvwxyz1234567890abcd",
        )
        .await
        .unwrap();
    assert_eq!(reply, GUARDRAIL_REPLY);
    // Nothing was routed or audited.
    assert!(world.state.audit.tail(10).unwrap().is_empty());
}

#[tokio::test]
async fn base64_on_command_lines_passes_the_guardrail() {
    let world = TestWorld::new().await;
    seed_agent(&world, "warren");
    let payload = "QQ".repeat(40); // long base64-ish run
    let reply = world
        .say(ALICE, &format!("/ruriko config set warren --content {payload}"))
        .await
        .unwrap();
    // Gated action prompt, not the guardrail reply.
    assert!(reply.contains("second operator"), "{reply}");
}

// ── Router security invariant ───────────────────────────────────────

#[tokio::test]
async fn injected_internal_flags_do_not_bypass_the_gate() {
    let world = TestWorld::new().await;
    seed_agent(&world, "warren");

    let reply = world
        .say(ALICE, "/ruriko agents delete warren --_approved true")
        .await
        .unwrap();
    // Still parked for approval; the marker was stripped.
    assert!(reply.contains("needs a second operator"), "{reply}");
    assert!(world.state.agents.get("warren").is_some());
}

// ── KV allowlist ────────────────────────────────────────────────────

#[tokio::test]
async fn kv_accepts_only_the_allowlisted_keys() {
    let world = TestWorld::new().await;

    let ok = world
        .say(ALICE, "/ruriko kv set nlp.model llama3")
        .await
        .unwrap();
    assert!(ok.contains("nlp.model = llama3"), "{ok}");

    let rejected = world
        .say(ALICE, "/ruriko kv set server.port 1")
        .await
        .unwrap();
    assert!(rejected.contains("permitted keys"), "{rejected}");

    let listed = world.say(ALICE, "/ruriko kv list").await.unwrap();
    assert!(listed.contains("nlp.model = llama3"), "{listed}");
    assert!(!listed.contains("server.port"), "{listed}");
}

// ── Trace replay ────────────────────────────────────────────────────

#[tokio::test]
async fn trace_command_replays_the_audit_trail() {
    let world = TestWorld::new().await;
    seed_agent(&world, "warren");

    let prompt = world
        .say(ALICE, "/ruriko agents delete warren")
        .await
        .unwrap();
    let id = extract_approval_id(&prompt);
    world.say(BOB, &format!("approve {id}")).await.unwrap();

    let rows = world.state.audit.tail(50).unwrap();
    let trace_id = rows
        .iter()
        .find(|r| r.action == "agents.delete")
        .unwrap()
        .trace_id
        .clone();

    let replay = world
        .say(ALICE, &format!("/ruriko trace {trace_id}"))
        .await
        .unwrap();
    assert!(replay.contains("agents.delete"), "{replay}");
    assert!(replay.contains(&trace_id), "{replay}");
}
