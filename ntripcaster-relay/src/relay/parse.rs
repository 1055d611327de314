//! Parser for relay definitions as written in the config file or typed at the
//! admin console: `[-m mount] [-i user:pass] [-p proxy] [-n] [-2] [-s] <url>`.
//!
//! Parsing never touches the registry; callers insert the result.

use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::debug;

use super::descriptor::{NtripVersion, RelayDescriptor, RelayMode};
use super::request::RequestDescriptor;
use crate::error::{RelayError, RelayResult};

pub fn parse_relay_spec(spec: &str) -> RelayResult<RelayDescriptor> {
    let mut tokens = spec.split_whitespace().peekable();

    let mut local_mount = None;
    let mut credentials = None;
    let mut proxy = None;
    let mut raw = false;
    let mut ntrip2 = false;
    let mut tls = false;

    while let Some(option) = tokens.next_if(|t| t.starts_with('-')) {
        match option {
            "-m" => local_mount = Some(required_argument(&mut tokens, option)?),
            "-i" => credentials = Some(required_argument(&mut tokens, option)?),
            "-p" => proxy = Some(required_argument(&mut tokens, option)?),
            "-n" => raw = true,
            "-2" => ntrip2 = true,
            "-s" => {
                tls = true;
                ntrip2 = true;
            }
            unknown => debug!("Ignoring unknown relay option {unknown}"),
        }
    }

    let url = tokens
        .next()
        .ok_or_else(|| RelayError::Syntax("missing relay url".to_string()))?;
    if let Some(extra) = tokens.next() {
        return Err(RelayError::Syntax(format!("unexpected argument '{extra}'")));
    }

    let target = RequestDescriptor::parse(url)?;
    if target.path.is_empty() {
        return Err(RelayError::Syntax(format!("no path in {url}")));
    }

    let mut relay = RelayDescriptor::new(target);

    if raw || relay.target.is_empty() {
        relay.mode = RelayMode::RawPassthrough;
    }
    if ntrip2 {
        relay.ntrip_version = NtripVersion::V2;
    }
    relay.tls = tls;
    relay.local_mount = local_mount.map(|m| slashalize(&m));
    relay.credentials = credentials.map(|c| STANDARD.encode(c));

    if let Some(proxy) = proxy {
        let proxy = RequestDescriptor::parse(&proxy)?;
        if proxy.is_empty() {
            return Err(RelayError::Syntax("proxy has no host".to_string()));
        }
        relay.proxy = Some(proxy);
    }

    Ok(relay)
}

impl FromStr for RelayDescriptor {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_relay_spec(s)
    }
}

fn required_argument<'a, I>(tokens: &mut I, option: &str) -> RelayResult<String>
where
    I: Iterator<Item = &'a str>,
{
    tokens
        .next()
        .map(str::to_string)
        .ok_or_else(|| RelayError::ArgumentRequired(option.to_string()))
}

/// Mountpoint names always carry exactly one leading slash.
#[must_use]
pub fn slashalize(mount: &str) -> String {
    format!("/{}", mount.trim_start_matches('/'))
}
