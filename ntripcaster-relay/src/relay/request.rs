//! Parsed remote endpoint (host, port, path).

use std::fmt;

use url::Url;

use crate::error::{RelayError, RelayResult};

const DEFAULT_HTTP_PORT: u16 = 80;
const DEFAULT_HTTPS_PORT: u16 = 443;

/// A remote endpoint: the relay target or an HTTP proxy.
///
/// A descriptor whose `host` is empty is the *empty request*. Relays built
/// from one have no upstream protocol and run as raw pass-through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestDescriptor {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub session_id: u64,
    pub cseq: u32,
}

impl RequestDescriptor {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            path: path.into(),
            session_id: 0,
            cseq: 0,
        }
    }

    /// Parse `scheme://host[:port]/path`, `host[:port]/path` or a bare `/path`.
    pub fn parse(input: &str) -> RelayResult<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(RelayError::Syntax("empty url".to_string()));
        }

        // Path only: no upstream host at all
        if input.starts_with('/') {
            return Ok(Self::new(String::new(), 0, input));
        }

        let (normalized, default_port) = match input.split_once("://") {
            Some((scheme, rest)) => match scheme.to_ascii_lowercase().as_str() {
                "http" | "ntrip" => (format!("http://{rest}"), DEFAULT_HTTP_PORT),
                "https" => (format!("https://{rest}"), DEFAULT_HTTPS_PORT),
                other => {
                    return Err(RelayError::Syntax(format!(
                        "unsupported scheme '{other}' in {input}"
                    )))
                }
            },
            None => (format!("http://{input}"), DEFAULT_HTTP_PORT),
        };

        let url = Url::parse(&normalized)
            .map_err(|e| RelayError::Syntax(format!("{input}: {e}")))?;

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| RelayError::Syntax(format!("missing host in {input}")))?
            .to_string();

        let mut path = url.path().to_string();
        if path.is_empty() {
            path.push('/');
        }
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self::new(host, url.port().unwrap_or(default_port), path))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    /// `host:port` for socket connects.
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}{}", self.host, self.port, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_url() {
        let req = RequestDescriptor::parse("http://caster.example.com:2101/MOUNT").unwrap();
        assert_eq!(req.host, "caster.example.com");
        assert_eq!(req.port, 2101);
        assert_eq!(req.path, "/MOUNT");
        assert!(!req.is_empty());
    }

    #[test]
    fn test_parse_default_ports() {
        assert_eq!(RequestDescriptor::parse("http://host/A").unwrap().port, 80);
        assert_eq!(RequestDescriptor::parse("https://host/A").unwrap().port, 443);
        assert_eq!(RequestDescriptor::parse("host/A").unwrap().port, 80);
        assert_eq!(RequestDescriptor::parse("ntrip://host:2102/A").unwrap().port, 2102);
    }

    #[test]
    fn test_parse_without_path() {
        let req = RequestDescriptor::parse("proxy.local:3128").unwrap();
        assert_eq!(req.host, "proxy.local");
        assert_eq!(req.port, 3128);
        assert_eq!(req.path, "/");
    }

    #[test]
    fn test_parse_path_only_is_empty_request() {
        let req = RequestDescriptor::parse("/RAW").unwrap();
        assert!(req.is_empty());
        assert_eq!(req.path, "/RAW");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(RequestDescriptor::parse(""), Err(RelayError::Syntax(_))));
        assert!(matches!(
            RequestDescriptor::parse("ftp://host/x"),
            Err(RelayError::Syntax(_))
        ));
        assert!(matches!(
            RequestDescriptor::parse("http://host:notaport/x"),
            Err(RelayError::Syntax(_))
        ));
    }

    #[test]
    fn test_display() {
        let req = RequestDescriptor::new("host", 2101, "/MOUNT");
        assert_eq!(req.to_string(), "host:2101/MOUNT");
    }
}
