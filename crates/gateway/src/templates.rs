//! Built-in agent config templates and mesh-topology injection.
//!
//! Templates are typed document builders, not text templating: each one
//! assembles an [`AgentConfigDoc`] from the agent's identity, which then
//! flows through the same validate/canonicalise/hash path as any other
//! write.

use rk_domain::doc::{
    AgentConfigDoc, InstructionContext, Instructions, Messaging, MessagingTarget, Metadata,
    Persona, Trust, WorkflowStep, API_VERSION,
};
use rk_domain::error::{Error, Result};
use rk_store::VersionStore;

/// Template names the control plane knows how to render.
pub const KNOWN_TEMPLATES: &[&str] = &["default", "cron-agent", "chat-agent"];

/// Identity fed into a template render.
#[derive(Debug, Clone)]
pub struct TemplateParams<'a> {
    pub agent_name: &'a str,
    pub display_name: &'a str,
    pub operator_mxid: &'a str,
}

pub fn is_known(template: &str) -> bool {
    KNOWN_TEMPLATES.contains(&template)
}

/// Render a named template into a document.
pub fn render(template: &str, params: &TemplateParams<'_>) -> Result<AgentConfigDoc> {
    let doc = match template {
        "default" => base_doc(params, "assistant", "You are {name}, a general-purpose assistant agent."),
        "cron-agent" => {
            let mut doc = base_doc(
                params,
                "scheduler",
                "You are {name}. You run scheduled jobs and report results concisely.",
            );
            doc.instructions.workflow = vec![WorkflowStep {
                trigger: "schedule.tick".into(),
                action: "run pending jobs and post a summary".into(),
            }];
            doc
        }
        "chat-agent" => {
            let mut doc = base_doc(
                params,
                "conversationalist",
                "You are {name}. You answer operator questions in chat.",
            );
            doc.instructions.workflow = vec![WorkflowStep {
                trigger: "message.received".into(),
                action: "reply in the originating room".into(),
            }];
            doc
        }
        other => {
            return Err(Error::Validation(format!(
                "unknown template {other:?}; known templates: {}",
                KNOWN_TEMPLATES.join(", ")
            )))
        }
    };
    doc.validate()?;
    Ok(doc)
}

fn base_doc(params: &TemplateParams<'_>, role: &str, prompt_pattern: &str) -> AgentConfigDoc {
    AgentConfigDoc {
        api_version: API_VERSION.into(),
        metadata: Metadata {
            name: params.agent_name.to_owned(),
        },
        trust: Trust {
            allowed_rooms: Vec::new(),
            allowed_senders: vec![params.operator_mxid.to_owned()],
            admin_room: String::new(),
        },
        persona: Persona {
            system_prompt: prompt_pattern.replace("{name}", params.display_name),
            llm_provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            temperature: None,
        },
        instructions: Instructions {
            role: role.into(),
            workflow: Vec::new(),
            context: InstructionContext {
                user: params.operator_mxid.to_owned(),
                peers: Vec::new(),
            },
        },
        messaging: Messaging::default(),
        gateways: Vec::new(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mesh topology injection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolve each referenced peer's admin room from that peer's latest
/// stored config and inject the results as `messaging.allowedTargets`.
///
/// Gated on the document's `apiVersion`; older documents pass through
/// untouched. Missing peers (no stored config, unparseable config, or
/// no admin room) are logged and skipped. An existing
/// `maxMessagesPerMinute` is preserved; absent, the default is pinned.
///
/// Returns how many targets were injected.
pub fn inject_mesh_topology(doc: &mut AgentConfigDoc, versions: &VersionStore) -> usize {
    if doc.api_version != API_VERSION {
        return 0;
    }

    let mut injected = 0;
    for peer in &doc.instructions.context.peers {
        let Some(latest) = versions.latest(&peer.name) else {
            tracing::warn!(peer = %peer.name, "mesh: peer has no stored config, skipping");
            continue;
        };
        let peer_doc = match AgentConfigDoc::from_yaml(&latest.yaml) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(peer = %peer.name, error = %e, "mesh: peer config unreadable, skipping");
                continue;
            }
        };
        if peer_doc.trust.admin_room.is_empty() {
            tracing::warn!(peer = %peer.name, "mesh: peer has no admin room, skipping");
            continue;
        }
        let already = doc
            .messaging
            .allowed_targets
            .iter()
            .any(|t| t.room_id == peer_doc.trust.admin_room);
        if !already {
            doc.messaging.allowed_targets.push(MessagingTarget {
                room_id: peer_doc.trust.admin_room.clone(),
                alias: format!("{}-admin", peer.name),
            });
            injected += 1;
        }
    }

    if doc.messaging.max_messages_per_minute.is_none() {
        doc.messaging.max_messages_per_minute =
            Some(rk_domain::doc::DEFAULT_MAX_MESSAGES_PER_MINUTE);
    }

    injected
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
