//! The versioned agent configuration document.
//!
//! This is the YAML pushed to each agent over the control protocol. It is
//! parsed into typed sections, validated on every write, and re-marshalled
//! canonically before hashing so that byte-equality is a reliable no-op
//! check for both full writes and section patches.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fleet::validate_agent_id;

/// The `apiVersion` this control plane emits. Mesh-topology injection is
/// gated on a rendered template matching this constant.
pub const API_VERSION: &str = "ruriko/v1";

/// Default `messaging.maxMessagesPerMinute` when a document omits it.
pub const DEFAULT_MAX_MESSAGES_PER_MINUTE: u32 = 30;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Document sections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trust {
    #[serde(default)]
    pub allowed_rooms: Vec<String>,
    #[serde(default)]
    pub allowed_senders: Vec<String>,
    #[serde(default)]
    pub admin_room: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub system_prompt: String,
    pub llm_provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub trigger: String,
    pub action: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub name: String,
    pub role: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstructionContext {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub peers: Vec<Peer>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instructions {
    pub role: String,
    #[serde(default)]
    pub workflow: Vec<WorkflowStep>,
    #[serde(default)]
    pub context: InstructionContext,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagingTarget {
    #[serde(rename = "roomID")]
    pub room_id: String,
    #[serde(default)]
    pub alias: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Messaging {
    #[serde(default)]
    pub allowed_targets: Vec<MessagingTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_messages_per_minute: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gateway {
    pub name: String,
    #[serde(default)]
    pub config: serde_yaml::Mapping,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Document
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfigDoc {
    pub api_version: String,
    pub metadata: Metadata,
    #[serde(default)]
    pub trust: Trust,
    pub persona: Persona,
    #[serde(default)]
    pub instructions: Instructions,
    #[serde(default)]
    pub messaging: Messaging,
    #[serde(default)]
    pub gateways: Vec<Gateway>,
}

impl AgentConfigDoc {
    /// Parse and schema-validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let doc: AgentConfigDoc = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Validation(format!("malformed agent config: {e}")))?;
        doc.validate()?;
        Ok(doc)
    }

    /// Canonical marshal: stable field order from the struct definitions,
    /// so identical documents always produce identical bytes.
    pub fn canonical_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(Error::Yaml)
    }

    /// Schema validation beyond what serde enforces.
    pub fn validate(&self) -> Result<()> {
        if self.api_version.is_empty() {
            return Err(Error::Validation("apiVersion must not be empty".into()));
        }
        validate_agent_id(&self.metadata.name)
            .map_err(|e| Error::Validation(format!("metadata.name: {e}")))?;
        if self.persona.system_prompt.is_empty() {
            return Err(Error::Validation(
                "persona.systemPrompt must not be empty".into(),
            ));
        }
        if self.persona.model.is_empty() {
            return Err(Error::Validation("persona.model must not be empty".into()));
        }
        if let Some(t) = self.persona.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(Error::Validation(format!(
                    "persona.temperature out of range [0, 2]: {t}"
                )));
            }
        }
        for step in &self.instructions.workflow {
            if step.trigger.is_empty() || step.action.is_empty() {
                return Err(Error::Validation(
                    "instructions.workflow entries need trigger and action".into(),
                ));
            }
        }
        for target in &self.messaging.allowed_targets {
            if target.room_id.is_empty() {
                return Err(Error::Validation(
                    "messaging.allowedTargets entries need a roomID".into(),
                ));
            }
        }
        for gw in &self.gateways {
            if gw.name.is_empty() {
                return Err(Error::Validation("gateways entries need a name".into()));
            }
        }
        Ok(())
    }

    /// Effective messaging rate, applying the document default.
    pub fn max_messages_per_minute(&self) -> u32 {
        self.messaging
            .max_messages_per_minute
            .unwrap_or(DEFAULT_MAX_MESSAGES_PER_MINUTE)
    }

    /// Marshal the persona, instructions, and remaining sections
    /// independently, for byte-compare section-change annotation.
    pub fn section_fingerprints(&self) -> Result<SectionFingerprints> {
        let persona = serde_yaml::to_string(&self.persona).map_err(Error::Yaml)?;
        let instructions = serde_yaml::to_string(&self.instructions).map_err(Error::Yaml)?;
        let mut rest = self.clone();
        rest.persona = Persona::default();
        rest.instructions = Instructions::default();
        let rest = serde_yaml::to_string(&rest).map_err(Error::Yaml)?;
        Ok(SectionFingerprints {
            persona,
            instructions,
            rest,
        })
    }
}

/// Per-section canonical YAML, used to report which logical sections of
/// a document changed between two versions.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionFingerprints {
    pub persona: String,
    pub instructions: String,
    pub rest: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AgentConfigDoc {
        AgentConfigDoc {
            api_version: API_VERSION.into(),
            metadata: Metadata {
                name: "warren".into(),
            },
            trust: Trust {
                allowed_rooms: vec!["!ops:example.org".into()],
                allowed_senders: vec!["@alice:example.org".into()],
                admin_room: "!admin:example.org".into(),
            },
            persona: Persona {
                system_prompt: "You are Warren.".into(),
                llm_provider: "openai".into(),
                model: "gpt-4o".into(),
                temperature: Some(0.3),
            },
            instructions: Instructions {
                role: "scheduler".into(),
                workflow: vec![WorkflowStep {
                    trigger: "daily".into(),
                    action: "report".into(),
                }],
                context: InstructionContext {
                    user: "@alice:example.org".into(),
                    peers: vec![Peer {
                        name: "saito".into(),
                        role: "researcher".into(),
                    }],
                },
            },
            messaging: Messaging {
                allowed_targets: vec![MessagingTarget {
                    room_id: "!peers:example.org".into(),
                    alias: "saito-admin".into(),
                }],
                max_messages_per_minute: None,
            },
            gateways: vec![],
        }
    }

    #[test]
    fn yaml_round_trip_is_canonical() {
        let doc = sample();
        let a = doc.canonical_yaml().unwrap();
        let parsed = AgentConfigDoc::from_yaml(&a).unwrap();
        let b = parsed.canonical_yaml().unwrap();
        assert_eq!(a, b, "re-marshalling must be byte-stable");
        assert_eq!(doc, parsed);
    }

    #[test]
    fn camel_case_keys_on_the_wire() {
        let yaml = sample().canonical_yaml().unwrap();
        assert!(yaml.contains("apiVersion:"));
        assert!(yaml.contains("systemPrompt:"));
        assert!(yaml.contains("allowedTargets:"));
        assert!(yaml.contains("roomID:"));
        assert!(!yaml.contains("api_version"));
    }

    #[test]
    fn rejects_bad_metadata_name() {
        let mut doc = sample();
        doc.metadata.name = "Not Valid".into();
        assert!(doc.validate().is_err());
    }

    #[test]
    fn rejects_empty_system_prompt() {
        let mut doc = sample();
        doc.persona.system_prompt = String::new();
        assert!(doc.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let mut doc = sample();
        doc.persona.temperature = Some(3.5);
        assert!(doc.validate().is_err());
    }

    #[test]
    fn rejects_malformed_yaml() {
        assert!(AgentConfigDoc::from_yaml("not: [valid").is_err());
        assert!(AgentConfigDoc::from_yaml("just a string").is_err());
    }

    #[test]
    fn default_message_rate_applied() {
        let mut doc = sample();
        assert_eq!(doc.max_messages_per_minute(), 30);
        doc.messaging.max_messages_per_minute = Some(5);
        assert_eq!(doc.max_messages_per_minute(), 5);
    }

    #[test]
    fn section_fingerprints_isolate_changes() {
        let a = sample();
        let mut b = sample();
        b.persona.model = "gpt-4o-mini".into();

        let fa = a.section_fingerprints().unwrap();
        let fb = b.section_fingerprints().unwrap();
        assert_ne!(fa.persona, fb.persona);
        assert_eq!(fa.instructions, fb.instructions);
        assert_eq!(fa.rest, fb.rest);
    }
}
