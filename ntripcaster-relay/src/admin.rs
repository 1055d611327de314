//! Relay administration: the `relay` console command, the `relay` config
//! directive, and the reader for legacy `ntripcaster.conf` files.

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::context::CasterContext;
use crate::error::{RelayError, RelayResult};
use crate::relay::descriptor::RelayKey;
use crate::relay::parse::parse_relay_spec;
use crate::relay::registry::RelayRegistry;

pub const RELAY_SYNTAX: &str = "Syntax: relay <pull|del|list|kick> <arguments>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayCommand {
    /// Add or redefine a relay.
    Pull(String),
    /// Remove the relay selected by the descriptor string.
    Del(String),
    List,
    /// Close a live relay connection by id.
    Kick(u64),
}

impl RelayCommand {
    /// Parse the arguments following the `relay` keyword.
    pub fn parse(args: &str) -> RelayResult<Self> {
        let args = args.trim();
        let (command, rest) = match args.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (args, ""),
        };

        match command {
            "pull" => Ok(Self::Pull(rest.to_string())),
            "del" => Ok(Self::Del(rest.to_string())),
            "list" => Ok(Self::List),
            "kick" => rest
                .parse()
                .map(Self::Kick)
                .map_err(|_| RelayError::Syntax(format!("invalid connection id '{rest}'"))),
            "" => Err(RelayError::NullArgument("relay command")),
            other => Err(RelayError::Syntax(format!("unknown relay command '{other}'"))),
        }
    }

    /// Run the command and return the reply lines.
    pub fn execute(&self, ctx: &CasterContext) -> Vec<String> {
        match self {
            Self::Pull(spec) => match apply_pull(&ctx.registry, spec) {
                Ok(_) => vec!["Relay added".to_string()],
                Err(e) => vec![error_reply(&e)],
            },
            Self::Del(spec) => delete(&ctx.registry, spec),
            Self::List => list(&ctx.registry),
            Self::Kick(id) => match ctx.registry.kick(*id) {
                Ok(key) => vec![format!("Relay [{key}] kicked")],
                Err(_) => vec![format!("No relay connection with id {id}")],
            },
        }
    }
}

/// Parse and run one console line such as `pull -m test http://host/A`.
pub fn handle_relay_command(ctx: &CasterContext, args: &str) -> Vec<String> {
    match RelayCommand::parse(args) {
        Ok(command) => command.execute(ctx),
        Err(e) => vec![error_reply(&e)],
    }
}

fn error_reply(err: &RelayError) -> String {
    match err {
        RelayError::ArgumentRequired(_) => "Argument required for option".to_string(),
        RelayError::NotFound(_) => "No such source".to_string(),
        _ => RELAY_SYNTAX.to_string(),
    }
}

fn delete(registry: &RelayRegistry, spec: &str) -> Vec<String> {
    if spec.is_empty() {
        return vec![error_reply(&RelayError::NullArgument("relay url"))];
    }
    let relay = match parse_relay_spec(spec) {
        Ok(relay) => relay,
        Err(e) => return vec![error_reply(&e)],
    };

    let target = &relay.target;
    match registry.remove_by_key(target, relay.local_mount.as_deref()) {
        Ok(_) => vec![format!("Relay [{target}] removed")],
        Err(_) => vec![format!("Could not remove [{target}]")],
    }
}

fn list(registry: &RelayRegistry) -> Vec<String> {
    let relays = registry.list();
    let mut lines = Vec::with_capacity(relays.len() + 2);
    lines.push("Listing relays:".to_string());
    for relay in &relays {
        lines.push(format!(
            "Remote: [{}] Local: [{}] Connected: [{}] Type: [pull] Reconnects: [{}]",
            relay.target,
            relay.local_mount.as_deref().unwrap_or(&relay.target.path),
            if relay.connected_or_pending() { "yes" } else { "no" },
            relay.reconnect_count,
        ));
    }
    lines.push("End of relay listing".to_string());
    lines
}

/// Parse `spec` and insert it into the registry.
pub fn apply_pull(registry: &RelayRegistry, spec: &str) -> RelayResult<RelayKey> {
    let relay = parse_relay_spec(spec)?;
    let key = relay.key();
    registry.insert_or_replace(relay);
    Ok(key)
}

/// Apply one config-file line of the form `relay [pull] <spec>`.
pub fn apply_directive(registry: &RelayRegistry, line: &str) -> RelayResult<RelayKey> {
    let rest = line
        .trim()
        .strip_prefix("relay")
        .ok_or_else(|| RelayError::Syntax(format!("not a relay directive: {line}")))?
        .trim_start();
    let spec = match rest.strip_prefix("pull") {
        Some(spec) if spec.is_empty() || spec.starts_with(char::is_whitespace) => spec,
        _ => rest,
    };
    apply_pull(registry, spec)
}

/// Apply every directive, logging the ones that fail. Returns how many
/// relays were added or redefined.
pub fn apply_directives<'a, I>(registry: &RelayRegistry, specs: I) -> usize
where
    I: IntoIterator<Item = &'a str>,
{
    specs
        .into_iter()
        .filter(|spec| match apply_pull(registry, spec) {
            Ok(key) => {
                info!(relay = %key, "Relay loaded from configuration");
                true
            }
            Err(e) => {
                warn!(spec = %spec, error = %e, "Ignoring invalid relay definition");
                false
            }
        })
        .count()
}

/// Relay settings found in a legacy `ntripcaster.conf`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyRelayConfig {
    /// Descriptor strings, without the `relay [pull]` prefix.
    pub relays: Vec<String>,
    pub reconnect_time: Option<u64>,
    pub reconnect_max: Option<i64>,
}

impl LegacyRelayConfig {
    pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    #[must_use]
    pub fn parse(contents: &str) -> Self {
        let mut legacy = Self::default();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (word, rest) = match line.split_once(char::is_whitespace) {
                Some((word, rest)) => (word, rest.trim()),
                None => (line, ""),
            };

            match word {
                "relay" => {
                    let spec = rest
                        .strip_prefix("pull")
                        .filter(|s| s.is_empty() || s.starts_with(char::is_whitespace))
                        .map_or(rest, str::trim_start);
                    if !spec.is_empty() {
                        legacy.relays.push(spec.to_string());
                    }
                }
                "relay_reconnect_time" => match rest.parse() {
                    Ok(secs) => legacy.reconnect_time = Some(secs),
                    Err(_) => warn!(value = rest, "Invalid relay_reconnect_time"),
                },
                "relay_reconnect_max" => match rest.parse() {
                    Ok(max) => legacy.reconnect_max = Some(max),
                    Err(_) => warn!(value = rest, "Invalid relay_reconnect_max"),
                },
                _ => {}
            }
        }

        legacy
    }
}
