// Line-oriented admin console on stdin

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ntripcaster_relay::admin::handle_relay_command;
use ntripcaster_relay::bootstrap::rehash;
use ntripcaster_relay::{CasterContext, SourceTable};

const HELP: &[&str] = &[
    "relay pull [-m mount] [-i user:pass] [-p proxy] [-n] [-2] [-s] <url>",
    "relay del [-m mount] <url>",
    "relay list",
    "relay kick <connection id>",
    "sources",
    "rehash",
    "shutdown",
];

pub async fn run(
    ctx: Arc<CasterContext>,
    sources: Arc<SourceTable>,
    config_path: Option<String>,
    shutdown: CancellationToken,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            () = shutdown.cancelled() => return,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                for reply in execute(&ctx, &sources, config_path.as_deref(), &shutdown, &line) {
                    println!("{reply}");
                }
            }
            Ok(None) => {
                debug!("Admin console closed");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Admin console read failed");
                return;
            }
        }
    }
}

fn execute(
    ctx: &CasterContext,
    sources: &SourceTable,
    config_path: Option<&str>,
    shutdown: &CancellationToken,
    line: &str,
) -> Vec<String> {
    let line = line.trim();
    let (command, args) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(command, args)| (command, args.trim()));

    match command {
        "" => Vec::new(),
        "relay" => handle_relay_command(ctx, args),
        "sources" => list_sources(sources),
        "rehash" => match rehash(ctx, config_path) {
            Ok(()) => vec!["Rehashing config".to_string()],
            Err(e) => vec![format!("Rehash failed: {e:#}")],
        },
        "shutdown" | "quit" => {
            shutdown.cancel();
            vec!["Shutting down".to_string()]
        }
        "help" => HELP.iter().map(|h| (*h).to_string()).collect(),
        other => vec![format!("Unknown command '{other}', try help")],
    }
}

fn list_sources(sources: &SourceTable) -> Vec<String> {
    let mut lines = vec!["Listing sources:".to_string()];
    for source in sources.mounts().iter().filter_map(|m| sources.get(m)) {
        lines.push(format!(
            "Mount: [{}] Id: [{}] Agent: [{}] Bytes: [{}] Since: [{}]",
            source.mount,
            source.connection_id,
            source.source_agent,
            source.bytes_read(),
            source.connected_at.format("%Y-%m-%d %H:%M:%S"),
        ));
    }
    lines.push(format!("End of source listing ({} listed)", sources.len()));
    lines
}
