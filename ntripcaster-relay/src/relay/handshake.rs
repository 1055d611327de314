//! Client-side login on an upstream caster.
//!
//! Sends one `GET` for the mountpoint and classifies the answer:
//! - `ICY 200 OK`: NTRIP 1.0 / legacy shoutcast style, data follows directly.
//! - `HTTP/1.x 200 OK`: NTRIP 2.0, a header block follows and may announce
//!   `Transfer-Encoding: chunked`.
//! - anything else is a refusal whose status text is kept for the log.
//!
//! Timeouts and short reads are transmission errors, not refusals.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

use super::connection::{ComProtocol, RelayConnection};
use super::descriptor::{NtripVersion, RelayDescriptor};
use super::transport::BoxedStream;
use crate::context::AgentInfo;
use crate::error::{RelayError, RelayResult};

/// Longest refusal reason kept from a status line.
const MAX_REASON_LEN: usize = 100;
/// Longest accepted status or header line.
const MAX_LINE_LEN: usize = 1024;
/// Upper bound on header lines in an NTRIP 2.0 response.
const MAX_HEADER_LINES: usize = 100;

const ICY_OK: &str = "ICY 200 OK";
const HTTP10_OK: &str = "HTTP/1.0 200 OK";
const HTTP11_OK: &str = "HTTP/1.1 200 OK";

/// Build the request head for `relay`, including the terminating blank line.
#[must_use]
pub fn build_request(relay: &RelayDescriptor, agent: &AgentInfo) -> String {
    let target = &relay.target;
    let ntrip2 = relay.ntrip_version == NtripVersion::V2;
    let minor = u8::from(ntrip2);

    let mut request = if relay.uses_proxy() {
        format!(
            "GET http://{}:{}{} HTTP/1.{minor}\r\n",
            target.host, target.port, target.path
        )
    } else {
        format!("GET {} HTTP/1.{minor}\r\n", target.path)
    };

    request.push_str(&format!("Host: {}\r\n", target.host));
    if ntrip2 {
        request.push_str("Ntrip-Version: Ntrip/2.0\r\n");
    }
    request.push_str(&format!("User-Agent: {}\r\n", agent.user_agent()));
    request.push_str("Referer: RELAY\r\n");
    request.push_str("Connection: close\r\n");
    if let Some(credentials) = &relay.credentials {
        request.push_str(&format!("Authorization: Basic {credentials}\r\n"));
    }
    request.push_str("\r\n");
    request
}

/// Log in on the upstream over the already attached stream of `conn`.
///
/// On success the connection's headers hold the response headers plus a
/// synthesized `Source-Agent`, and chunked decoding is armed when announced.
pub async fn login(
    conn: &mut RelayConnection,
    relay: &RelayDescriptor,
    agent: &AgentInfo,
    timeout: Duration,
) -> RelayResult<()> {
    let request = build_request(relay, agent);
    let stream = conn
        .stream_mut()
        .ok_or_else(|| RelayError::Transmission("connection has no socket".to_string()))?;

    with_timeout(timeout, async {
        let writer = stream.get_mut();
        writer.write_all(request.as_bytes()).await?;
        writer.flush().await
    })
    .await?;

    let status = read_line(stream, timeout).await?;
    if status.is_empty() {
        return Err(RelayError::Transmission(
            "connection closed before response".to_string(),
        ));
    }
    let status_text = String::from_utf8_lossy(&status).into_owned();
    debug!(status = %status_text.trim_end(), "Relay login response");

    if status_text.starts_with(HTTP11_OK) || status_text.starts_with(HTTP10_OK) {
        let headers = read_header_block(conn, status, timeout).await?;
        for (name, value) in headers {
            conn.headers.insert(&name, value);
        }
        conn.protocol = match relay.ntrip_version {
            NtripVersion::V2 => ComProtocol::Ntrip2,
            NtripVersion::V1 => ComProtocol::Ntrip1,
        };

        let chunked = conn
            .headers
            .get("Transfer-Encoding")
            .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));
        debug!(chunked, "Relay NTRIP 2.0 transfer encoding");
        if chunked {
            conn.enable_chunked();
        }

        let source_agent = match conn.headers.get("Server") {
            Some(server) => format!("{server} (relay v2)"),
            None => agent.relay_source_agent(),
        };
        conn.headers.insert("Source-Agent", source_agent);
        Ok(())
    } else if status_text.starts_with(ICY_OK) {
        conn.protocol = ComProtocol::Ntrip1;
        conn.headers.insert("Source-Agent", agent.relay_source_agent());
        Ok(())
    } else {
        Err(RelayError::Header(refusal_reason(&status_text)))
    }
}

/// Prepare a raw pass-through connection: no bytes are exchanged.
pub fn login_raw(conn: &mut RelayConnection, agent: &AgentInfo) {
    conn.protocol = ComProtocol::Raw;
    conn.headers.insert("Source-Agent", agent.direct_source_agent());
}

/// Read the rest of the response head after `status` and parse it.
///
/// Only a blank line ends the block; EOF before it is a short read.
async fn read_header_block(
    conn: &mut RelayConnection,
    status: Vec<u8>,
    timeout: Duration,
) -> RelayResult<Vec<(String, String)>> {
    let stream = conn
        .stream_mut()
        .ok_or_else(|| RelayError::Transmission("connection has no socket".to_string()))?;

    let mut head = status;
    let mut lines = 0;
    loop {
        let line = read_line(stream, timeout).await?;
        if line.is_empty() {
            return Err(RelayError::Transmission(
                "connection closed inside response headers".to_string(),
            ));
        }
        head.extend_from_slice(&line);
        if line == b"\r\n" || line == b"\n" {
            break;
        }
        lines += 1;
        if lines > MAX_HEADER_LINES {
            return Err(RelayError::Header("too many response headers".to_string()));
        }
    }

    let mut slots = [httparse::EMPTY_HEADER; MAX_HEADER_LINES];
    let mut response = httparse::Response::new(&mut slots);
    match response.parse(&head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(RelayError::Transmission(
                "incomplete response headers".to_string(),
            ))
        }
        Err(e) => return Err(RelayError::Header(format!("malformed response headers: {e}"))),
    }

    Ok(response
        .headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).trim().to_string(),
            )
        })
        .collect())
}

/// Read one line including its terminator. Returns nothing at a clean EOF.
///
/// A line cut off by EOF is a short read; a line longer than
/// `MAX_LINE_LEN` is refused.
async fn read_line(
    stream: &mut BufReader<BoxedStream>,
    timeout: Duration,
) -> RelayResult<Vec<u8>> {
    let mut buf = Vec::new();
    with_timeout(timeout, async {
        (&mut *stream)
            .take(MAX_LINE_LEN as u64)
            .read_until(b'\n', &mut buf)
            .await
    })
    .await?;

    match buf.last() {
        None | Some(b'\n') => Ok(buf),
        Some(_) if buf.len() >= MAX_LINE_LEN => {
            Err(RelayError::Header("response line too long".to_string()))
        }
        Some(_) => Err(RelayError::Transmission(
            "connection closed mid-line".to_string(),
        )),
    }
}

async fn with_timeout<T, F>(timeout: Duration, fut: F) -> RelayResult<T>
where
    F: std::future::Future<Output = std::io::Result<T>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| {
            RelayError::Transmission(format!("timed out after {}s", timeout.as_secs()))
        })?
        .map_err(RelayError::from)
}

/// Printable prefix of a status line, at most `MAX_REASON_LEN` characters.
fn refusal_reason(status: &str) -> String {
    status
        .chars()
        .take_while(|c| (' '..'\u{7f}').contains(c))
        .take(MAX_REASON_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::connection::ConnectionHandle;
    use crate::relay::parse::parse_relay_spec;
    use tokio::io::{duplex, DuplexStream};

    fn agent() -> AgentInfo {
        AgentInfo::new("NTRIP Test", "1.0")
    }

    fn connection() -> (RelayConnection, DuplexStream) {
        let (client, server) = duplex(8192);
        let mut conn = RelayConnection::new(ConnectionHandle::new(1), "host", "/MOUNT");
        conn.attach(Box::new(client));
        (conn, server)
    }

    /// Drive `login` against a peer that answers with `response`.
    async fn login_with(
        spec: &str,
        response: &[u8],
    ) -> (RelayResult<()>, RelayConnection, String) {
        let relay = parse_relay_spec(spec).unwrap();
        let (mut conn, mut server) = connection();
        let response = response.to_vec();

        let peer = tokio::spawn(async move {
            let mut head = String::new();
            {
                let mut reader = BufReader::new(&mut server);
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).await.unwrap();
                    head.push_str(&line);
                    if line == "\r\n" || line.is_empty() {
                        break;
                    }
                }
            }
            server.write_all(&response).await.unwrap();
            head
        });

        let result = login(&mut conn, &relay, &agent(), Duration::from_secs(2)).await;
        let head = peer.await.unwrap();
        (result, conn, head)
    }

    #[test]
    fn test_build_request_ntrip1() {
        let relay = parse_relay_spec("-i user:pass http://host:2101/MOUNT").unwrap();
        let request = build_request(&relay, &agent());
        assert_eq!(
            request,
            "GET /MOUNT HTTP/1.0\r\n\
             Host: host\r\n\
             User-Agent: NTRIP Test/1.0\r\n\
             Referer: RELAY\r\n\
             Connection: close\r\n\
             Authorization: Basic dXNlcjpwYXNz\r\n\
             \r\n"
        );
    }

    #[test]
    fn test_build_request_ntrip2_via_proxy() {
        let relay = parse_relay_spec("-2 -p proxy:3128 http://host:2101/MOUNT").unwrap();
        let request = build_request(&relay, &agent());
        assert!(request.starts_with("GET http://host:2101/MOUNT HTTP/1.1\r\n"));
        assert!(request.contains("Ntrip-Version: Ntrip/2.0\r\n"));
        assert!(!request.contains("Authorization"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_icy_ok() {
        let (result, conn, head) =
            login_with("http://host:2101/MOUNT", b"ICY 200 OK\r\n").await;
        assert!(result.is_ok());
        assert!(head.starts_with("GET /MOUNT HTTP/1.0"));
        assert_eq!(conn.protocol, ComProtocol::Ntrip1);
        assert_eq!(conn.source_agent(), Some("NTRIP Test/1.0 (relay)"));
        assert!(!conn.is_chunked());
    }

    #[tokio::test]
    async fn test_http_404_is_header_error() {
        let (result, _, _) =
            login_with("http://host:2101/MOUNT", b"HTTP/1.1 404 Not Found\r\n\r\n").await;
        assert_eq!(
            result.unwrap_err(),
            RelayError::Header("HTTP/1.1 404 Not Found".to_string())
        );
    }

    #[tokio::test]
    async fn test_ntrip2_chunked() {
        let (result, conn, head) = login_with(
            "-2 http://host:2101/MOUNT",
            b"HTTP/1.1 200 OK\r\nServer: Upstream/2.1\r\nTransfer-Encoding: chunked\r\n\r\n",
        )
        .await;
        assert!(result.is_ok());
        assert!(head.contains("Ntrip-Version: Ntrip/2.0"));
        assert_eq!(conn.protocol, ComProtocol::Ntrip2);
        assert!(conn.is_chunked());
        assert!(conn.chunk.is_some());
        assert_eq!(conn.source_agent(), Some("Upstream/2.1 (relay v2)"));
    }

    #[tokio::test]
    async fn test_ntrip2_without_chunked() {
        let (result, conn, _) = login_with(
            "-2 http://host:2101/MOUNT",
            b"HTTP/1.0 200 OK\r\nContent-Type: gnss/data\r\n\r\n",
        )
        .await;
        assert!(result.is_ok());
        assert!(!conn.is_chunked());
        assert!(conn.chunk.is_none());
        assert_eq!(conn.source_agent(), Some("NTRIP Test/1.0 (relay)"));
        assert_eq!(conn.headers.get("content-type"), Some("gnss/data"));
    }

    #[tokio::test]
    async fn test_data_after_headers_is_kept() {
        let (result, mut conn, _) = login_with(
            "-2 http://host:2101/MOUNT",
            b"HTTP/1.1 200 OK\r\n\r\nRTCM",
        )
        .await;
        assert!(result.is_ok());
        let mut body = [0u8; 4];
        conn.stream_mut().unwrap().read_exact(&mut body).await.unwrap();
        assert_eq!(&body, b"RTCM");
    }

    #[tokio::test]
    async fn test_closed_before_response_is_transmission_error() {
        let relay = parse_relay_spec("http://host:2101/MOUNT").unwrap();
        let (mut conn, server) = connection();
        drop(server);
        let result = login(&mut conn, &relay, &agent(), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(RelayError::Transmission(_))));
    }

    #[tokio::test]
    async fn test_eof_inside_headers_is_transmission_error() {
        let (result, _, _) =
            login_with("-2 http://host:2101/MOUNT", b"HTTP/1.1 200 OK\r\nServer: Up").await;
        assert!(matches!(result, Err(RelayError::Transmission(_))));

        let (result, _, _) = login_with("-2 http://host:2101/MOUNT", b"HTTP/1.1 200 OK\r\n").await;
        assert!(matches!(result, Err(RelayError::Transmission(_))));
    }

    #[tokio::test]
    async fn test_status_without_newline_is_transmission_error() {
        let (result, _, _) = login_with("-2 http://host:2101/MOUNT", b"HTTP/1.1 200 OK").await;
        assert!(matches!(result, Err(RelayError::Transmission(_))));

        let (result, _, _) = login_with("http://host:2101/MOUNT", b"ICY 200 OK").await;
        assert!(matches!(result, Err(RelayError::Transmission(_))));
    }

    #[tokio::test]
    async fn test_overlong_header_line_is_refused() {
        let mut response = b"HTTP/1.1 200 OK\r\nX-Long: ".to_vec();
        response.extend(std::iter::repeat(b'a').take(1500));
        response.extend_from_slice(b"Transfer-Encoding: chunked\r\n\r\n");

        let (result, conn, _) = login_with("-2 http://host:2101/MOUNT", &response).await;
        assert_eq!(
            result.unwrap_err(),
            RelayError::Header("response line too long".to_string())
        );
        assert!(!conn.is_chunked());
    }

    #[tokio::test]
    async fn test_malformed_header_is_refused() {
        let (result, _, _) = login_with(
            "-2 http://host:2101/MOUNT",
            b"HTTP/1.1 200 OK\r\nnot a header\r\n\r\n",
        )
        .await;
        assert!(matches!(result, Err(RelayError::Header(_))));
    }

    #[tokio::test]
    async fn test_too_many_headers_is_refused() {
        let mut response = b"HTTP/1.1 200 OK\r\n".to_vec();
        for i in 0..=MAX_HEADER_LINES {
            response.extend_from_slice(format!("X-H{i}: v\r\n").as_bytes());
        }
        response.extend_from_slice(b"\r\n");

        let (result, _, _) = login_with("-2 http://host:2101/MOUNT", &response).await;
        assert_eq!(
            result.unwrap_err(),
            RelayError::Header("too many response headers".to_string())
        );
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        tokio::time::pause();
        let relay = parse_relay_spec("http://host:2101/MOUNT").unwrap();
        let (mut conn, _server) = connection();
        let result = login(&mut conn, &relay, &agent(), Duration::from_secs(15)).await;
        assert!(matches!(result, Err(RelayError::Transmission(_))));
    }

    #[test]
    fn test_refusal_reason_truncation() {
        assert_eq!(refusal_reason("SOURCETABLE 200 OK\r\n"), "SOURCETABLE 200 OK");
        let long = "x".repeat(300);
        assert_eq!(refusal_reason(&long).len(), MAX_REASON_LEN);
        assert_eq!(refusal_reason("bad\u{1}tail"), "bad");
    }

    #[test]
    fn test_login_raw() {
        let mut conn = RelayConnection::new(ConnectionHandle::new(1), "host", "/RAW");
        login_raw(&mut conn, &agent());
        assert_eq!(conn.protocol, ComProtocol::Raw);
        assert_eq!(conn.source_agent(), Some("NTRIP Test/1.0 (direct access)"));
    }
}
