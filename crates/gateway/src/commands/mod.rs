//! Chat-line lexing into structured commands.
//!
//! Grammar: `<prefix> <name> [<subcommand>] [<args>…] [--flag value | --flag]`.
//! Flag values are single whitespace-separated tokens; quoting is not
//! supported on the chat surface.

pub mod router;

pub use router::Router;

use std::collections::HashMap;

use rk_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chat event
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A normalized inbound chat event as delivered by a connector.
#[derive(Debug, Clone)]
pub struct ChatEvent {
    pub room_id: String,
    pub sender: String,
    pub body: String,
    /// Connector-supplied idempotency key.
    pub event_id: Option<String>,
}

impl ChatEvent {
    /// Shallow copy with the sender overwritten. Used by the approval
    /// re-dispatch path so audit rows attribute the operation to the
    /// original requestor.
    pub fn with_sender(&self, sender: &str) -> Self {
        Self {
            sender: sender.to_owned(),
            ..self.clone()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Command
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A parsed command line.
#[derive(Debug, Clone, Default)]
pub struct Command {
    pub name: String,
    pub subcommand: Option<String>,
    pub args: Vec<String>,
    pub flags: HashMap<String, String>,
    pub raw: String,
}

impl Command {
    /// The dotted action key: `name.subcommand`, or `name` alone.
    pub fn action(&self) -> String {
        match &self.subcommand {
            Some(sub) => format!("{}.{sub}", self.name),
            None => self.name.clone(),
        }
    }

    pub fn flag(&self, name: &str) -> Option<&str> {
        self.flags.get(name).map(String::as_str)
    }

    /// A flag the handler cannot proceed without.
    pub fn require_flag(&self, name: &str) -> Result<&str> {
        self.flag(name)
            .ok_or_else(|| Error::Validation(format!("missing required flag --{name}")))
    }

    /// First positional argument or required-flag fallback; most
    /// handlers accept `agents show warren` and `agents show --name warren`.
    pub fn target(&self, flag_name: &str) -> Result<&str> {
        if let Some(first) = self.args.first() {
            return Ok(first.as_str());
        }
        self.require_flag(flag_name)
    }

    /// Drop every flag whose name starts with `_`.
    ///
    /// Internal markers (`_approved`, `_approval_id`, `_trace_id`) are
    /// only legitimate on the dispatch back door; anything arriving via
    /// the parser is an injection attempt.
    pub fn strip_internal_flags(&mut self) {
        self.flags.retain(|name, _| !name.starts_with('_'));
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parser
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lex a raw chat line into a [`Command`].
///
/// Lines not starting with the prefix fail with the `NotACommand`
/// sentinel so the caller can route them to the decision parser and the
/// NL pipeline instead.
pub fn parse(prefix: &str, line: &str) -> Result<Command> {
    let trimmed = line.trim();
    let rest = match trimmed.strip_prefix(prefix) {
        // The prefix must be its own token: `/ruriko agents`, not `/rurikoagents`.
        Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => rest,
        _ => return Err(Error::NotACommand),
    };

    let tokens: Vec<&str> = rest.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(Error::Validation("empty command".into()));
    }

    let name = tokens[0].to_owned();
    let mut subcommand = None;
    let mut i = 1;
    if let Some(tok) = tokens.get(1) {
        if !tok.starts_with('-') {
            subcommand = Some((*tok).to_owned());
            i = 2;
        }
    }

    let mut args = Vec::new();
    let mut flags = HashMap::new();
    while i < tokens.len() {
        let tok = tokens[i];
        if let Some(key) = tok.strip_prefix("--") {
            if key.is_empty() {
                return Err(Error::Validation("empty flag name".into()));
            }
            match tokens.get(i + 1) {
                // The next token is another flag: record a bare boolean.
                Some(next) if next.starts_with("--") => {
                    flags.insert(key.to_owned(), "true".to_owned());
                    i += 1;
                }
                Some(value) => {
                    flags.insert(key.to_owned(), (*value).to_owned());
                    i += 2;
                }
                None => {
                    flags.insert(key.to_owned(), "true".to_owned());
                    i += 1;
                }
            }
        } else {
            args.push(tok.to_owned());
            i += 1;
        }
    }

    Ok(Command {
        name,
        subcommand,
        args,
        flags,
        raw: trimmed.to_owned(),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_command_round_trip() {
        let cmd = parse(
            "/ruriko",
            "/ruriko agents create --name warren --template cron-agent --image img:1",
        )
        .unwrap();
        assert_eq!(cmd.name, "agents");
        assert_eq!(cmd.subcommand.as_deref(), Some("create"));
        assert_eq!(cmd.action(), "agents.create");
        assert!(cmd.args.is_empty());
        assert_eq!(cmd.flag("name"), Some("warren"));
        assert_eq!(cmd.flag("template"), Some("cron-agent"));
        assert_eq!(cmd.flag("image"), Some("img:1"));
    }

    #[test]
    fn positional_args_accumulate_in_order() {
        let cmd = parse("/ruriko", "/ruriko config diff warren --from 1 --to 3").unwrap();
        assert_eq!(cmd.args, vec!["warren"]);
        assert_eq!(cmd.flag("from"), Some("1"));
        assert_eq!(cmd.flag("to"), Some("3"));
    }

    #[test]
    fn bare_flag_records_literal_true() {
        let cmd = parse("/ruriko", "/ruriko agents list --all").unwrap();
        assert_eq!(cmd.flag("all"), Some("true"));

        let cmd = parse("/ruriko", "/ruriko agents list --all --verbose x").unwrap();
        assert_eq!(cmd.flag("all"), Some("true"));
        assert_eq!(cmd.flag("verbose"), Some("x"));
    }

    #[test]
    fn name_only_command() {
        let cmd = parse("/ruriko", "/ruriko ping").unwrap();
        assert_eq!(cmd.name, "ping");
        assert!(cmd.subcommand.is_none());
        assert_eq!(cmd.action(), "ping");
    }

    #[test]
    fn non_prefixed_line_is_the_sentinel() {
        assert!(matches!(
            parse("/ruriko", "hello there"),
            Err(Error::NotACommand)
        ));
        assert!(matches!(
            parse("/ruriko", "approve ab12cd34"),
            Err(Error::NotACommand)
        ));
        // The prefix must be a whole token.
        assert!(matches!(
            parse("/ruriko", "/rurikoagents list"),
            Err(Error::NotACommand)
        ));
    }

    #[test]
    fn empty_command_is_a_validation_error() {
        assert!(matches!(
            parse("/ruriko", "/ruriko"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            parse("/ruriko", "  /ruriko   "),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn internal_flags_are_strippable() {
        let mut cmd = parse(
            "/ruriko",
            "/ruriko agents delete warren --_approved true --_trace_id abc --force",
        )
        .unwrap();
        cmd.strip_internal_flags();
        assert!(cmd.flags.keys().all(|k| !k.starts_with('_')));
        assert_eq!(cmd.flag("force"), Some("true"));
    }

    #[test]
    fn target_prefers_positional() {
        let cmd = parse("/ruriko", "/ruriko agents show warren").unwrap();
        assert_eq!(cmd.target("name").unwrap(), "warren");

        let cmd = parse("/ruriko", "/ruriko agents show --name warren").unwrap();
        assert_eq!(cmd.target("name").unwrap(), "warren");

        let cmd = parse("/ruriko", "/ruriko agents show").unwrap();
        assert!(cmd.target("name").is_err());
    }

    #[test]
    fn with_sender_overwrites_only_sender() {
        let event = ChatEvent {
            room_id: "!ops:hs".into(),
            sender: "@approver:hs".into(),
            body: "approve ab12cd34".into(),
            event_id: Some("e1".into()),
        };
        let redispatched = event.with_sender("@requestor:hs");
        assert_eq!(redispatched.sender, "@requestor:hs");
        assert_eq!(redispatched.room_id, event.room_id);
        assert_eq!(redispatched.body, event.body);
    }
}
