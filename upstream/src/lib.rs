//! Upstream HTTP plumbing.
//!
//! This crate owns everything that touches the upstream wire: the shared
//! HTTP client, SSE line scanning, capped error-body reads, the request
//! envelope, endpoint failover, and retry-hint extraction from error bodies.

mod client;
pub mod hints;

pub use client::{
    Endpoint, UpstreamClient, UpstreamError, UpstreamStream, default_endpoints, resolve_endpoint,
};

use std::sync::OnceLock;
use std::time::Duration;

/// Connection timeout for upstream requests.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Bound on bytes held while waiting for a line terminator. A well-behaved
/// upstream never comes close; hitting this means the stream is garbage.
const MAX_PENDING_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Error bodies are read up to this many bytes and then cut off.
const MAX_ERROR_SNIPPET_BYTES: usize = 32 * 1024;

/// Shared HTTP client for all upstream requests.
///
/// Connect timeout only - SSE streams run for minutes. Redirects are
/// disabled; the upstream never redirects and a redirect would leak the
/// bearer token.
pub fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("build shared HTTP client")
    })
}

/// Incremental scanner over an SSE byte stream.
///
/// The generate stream carries exactly one JSON document (or the `[DONE]`
/// marker) per `data:` line, so the scanner works in line units: bytes
/// accumulate until a `\n`, each complete line is classified, and only
/// `data:` payloads surface. Comment keep-alives and `event:` fields are
/// skipped; the JSON carries its own discriminators.
#[derive(Debug, Default)]
pub(crate) struct SseLineScanner {
    pending: Vec<u8>,
}

impl SseLineScanner {
    pub(crate) fn feed(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// True once the unterminated tail outgrows the buffer bound.
    pub(crate) fn over_capacity(&self) -> bool {
        self.pending.len() > MAX_PENDING_LINE_BYTES
    }

    /// Next `data:` payload, or `None` when more bytes are needed.
    pub(crate) fn next_data_payload(&mut self) -> Option<String> {
        while let Some(line) = self.take_line() {
            // Lossy conversion: one mangled byte should not kill a stream
            // that has been healthy for minutes. Broken payloads fail JSON
            // parsing downstream instead.
            let text = String::from_utf8_lossy(&line);
            if let Some(payload) = text.strip_prefix("data:") {
                let payload = payload.strip_prefix(' ').unwrap_or(payload);
                return Some(payload.to_string());
            }
        }
        None
    }

    /// Split the next complete line off the buffer, without its terminator
    /// (`\n` or `\r\n`).
    fn take_line(&mut self) -> Option<Vec<u8>> {
        let terminator = self.pending.iter().position(|b| *b == b'\n')?;
        let rest = self.pending.split_off(terminator + 1);
        let mut line = std::mem::replace(&mut self.pending, rest);
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }
}

/// Read as much of an error body as the cap allows and render it for logs
/// and error envelopes.
pub(crate) async fn error_snippet(mut response: reqwest::Response) -> String {
    let mut collected: Vec<u8> = Vec::new();
    let mut cut_off = false;

    while let Ok(Some(bytes)) = response.chunk().await {
        let room = MAX_ERROR_SNIPPET_BYTES - collected.len();
        if bytes.len() >= room {
            collected.extend_from_slice(&bytes[..room]);
            cut_off = true;
            break;
        }
        collected.extend_from_slice(&bytes);
    }

    let mut snippet = String::from_utf8_lossy(&collected).into_owned();
    if cut_off {
        snippet.push_str("…(truncated)");
    }
    snippet
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fed(input: &str) -> SseLineScanner {
        let mut scanner = SseLineScanner::default();
        scanner.feed(input.as_bytes());
        scanner
    }

    #[test]
    fn yields_payloads_line_by_line() {
        let mut scanner = fed("data: one\ndata: two\n");
        assert_eq!(scanner.next_data_payload().as_deref(), Some("one"));
        assert_eq!(scanner.next_data_payload().as_deref(), Some("two"));
        assert_eq!(scanner.next_data_payload(), None);
    }

    #[test]
    fn holds_partial_lines_until_terminated() {
        let mut scanner = fed("data: par");
        assert_eq!(scanner.next_data_payload(), None);
        scanner.feed(b"tial\n");
        assert_eq!(scanner.next_data_payload().as_deref(), Some("partial"));
    }

    #[test]
    fn skips_comments_and_other_fields() {
        let mut scanner = fed(": keepalive\nevent: chunk\n\ndata: real\n");
        assert_eq!(scanner.next_data_payload().as_deref(), Some("real"));
    }

    #[test]
    fn handles_crlf_terminators() {
        let mut scanner = fed("data: one\r\ndata: two\r\n");
        assert_eq!(scanner.next_data_payload().as_deref(), Some("one"));
        assert_eq!(scanner.next_data_payload().as_deref(), Some("two"));
    }

    #[test]
    fn strips_at_most_one_leading_space() {
        let mut scanner = fed("data:  two spaces\ndata:none\n");
        assert_eq!(scanner.next_data_payload().as_deref(), Some(" two spaces"));
        assert_eq!(scanner.next_data_payload().as_deref(), Some("none"));
    }

    #[test]
    fn capacity_flag_tracks_the_unterminated_tail() {
        let mut scanner = fed("data: done\nleft over");
        assert!(!scanner.over_capacity());
        assert_eq!(scanner.next_data_payload().as_deref(), Some("done"));
        assert_eq!(scanner.pending, b"left over");
    }
}
