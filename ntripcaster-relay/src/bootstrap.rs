use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::info;

use crate::admin::{apply_directives, LegacyRelayConfig};
use crate::config::Config;
use crate::context::CasterContext;
use crate::relay::transport::TcpConnector;
use crate::source::{SourceIngest, SourceTable};

const CONFIG_PATH_ENV: &str = "NTRIPCASTER_CONFIG_PATH";
const CWD_CONFIG: &str = "ntripcaster.yaml";
const SYSTEM_CONFIG: &str = "/etc/ntripcaster/ntripcaster.yaml";

/// Config file to load: explicit path > env var > CWD > /etc.
#[must_use]
pub fn find_config_file(explicit: Option<&str>) -> Option<String> {
    explicit.map(str::to_string).or_else(|| {
        std::env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|p| Path::new(p).exists())
            .or_else(|| {
                [CWD_CONFIG, SYSTEM_CONFIG]
                    .into_iter()
                    .find(|p| Path::new(p).exists())
                    .map(str::to_string)
            })
    })
}

/// Load, merge the legacy relay file into, and validate the configuration.
///
/// Runs before logging is initialised, so progress goes to stderr.
pub fn load_config(explicit: Option<&str>) -> Result<Config> {
    let mut config = match find_config_file(explicit) {
        Some(path) => {
            if !Path::new(&path).exists() {
                anyhow::bail!("Config file {path} does not exist");
            }
            eprintln!("Loading config from {path}");
            Config::from_file(&path).with_context(|| format!("Failed to load {path}"))?
        }
        None => {
            eprintln!("No config file found, using defaults and environment variables");
            Config::from_env().context("Failed to load config from environment")?
        }
    };

    if let Some(path) = config.relay.legacy_file.clone() {
        let legacy = LegacyRelayConfig::from_file(&path)
            .with_context(|| format!("Failed to read legacy config {path}"))?;
        merge_legacy(&mut config, legacy);
    }

    if let Err(errors) = config.validate() {
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    Ok(config)
}

/// Legacy settings override the YAML ones; legacy relays are appended.
fn merge_legacy(config: &mut Config, legacy: LegacyRelayConfig) {
    if let Some(secs) = legacy.reconnect_time {
        config.relay.reconnect_interval_seconds = secs;
    }
    if let Some(max) = legacy.reconnect_max {
        config.relay.reconnect_tries = max;
    }
    config.relay.pull.extend(legacy.relays);
}

/// Build the caster context with the TCP/TLS connector and the source table.
pub fn build_context(config: &Config) -> Result<(Arc<CasterContext>, Arc<SourceTable>)> {
    let sources = Arc::new(SourceTable::new(config.caster.max_sources));
    let connector = TcpConnector::new().context("Failed to set up TLS client")?;
    let ctx = CasterContext::from_config(
        config,
        Arc::new(connector),
        Arc::new(SourceIngest::new(Arc::clone(&sources))),
    );
    Ok((Arc::new(ctx), sources))
}

/// Insert every relay defined in `config`. Returns how many were accepted.
pub fn load_relays(ctx: &CasterContext, config: &Config) -> usize {
    let loaded = apply_directives(&ctx.registry, config.relay.pull.iter().map(String::as_str));
    info!(loaded, total = ctx.registry.len(), "Relays loaded");
    loaded
}

/// Re-read the configuration and apply it to a running caster.
///
/// Settings are swapped and relays are (re)defined in place. Existing
/// entries keep their reconnect state, so a relay that used up its tries
/// stays idle; new entries get an immediate attempt.
pub fn rehash(ctx: &CasterContext, explicit: Option<&str>) -> Result<()> {
    let config = load_config(explicit)?;
    ctx.update_settings(config.relay_settings());
    load_relays(ctx, &config);
    info!(relays = ctx.registry.len(), "Configuration reloaded");
    Ok(())
}
