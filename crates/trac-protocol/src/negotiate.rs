// SPDX-License-Identifier: MIT OR Apache-2.0
//! Protocol Negotiator (C6): identifies which codec to install on a newly
//! accepted connection by buffering its first bytes.

/// The HTTP/2 connection preface, sent by a client using prior-knowledge
/// (no ALPN) to signal HTTP/2 without an upgrade handshake.
pub const HTTP2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// The protocol a connection should be treated as, once enough bytes have
/// arrived to tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionProtocol {
    /// Install an HTTP/2 frame codec.
    Http2,
    /// Install an HTTP/1.1 codec (upgrade to WebSocket or H2 happens later).
    Http1,
}

/// Outcome of inspecting the buffered prefix of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SniffOutcome {
    /// Enough bytes were seen to decide.
    Decided(ConnectionProtocol),
    /// Not enough bytes buffered yet; keep reading.
    NeedMoreBytes,
}

/// Inspect the bytes buffered so far from a newly accepted connection.
///
/// `alpn_protocol` carries the negotiated ALPN identifier when TLS was
/// terminated in-process (`Some("h2")` or `Some("http/1.1")`); pass `None`
/// for plaintext connections, where the decision falls back to sniffing
/// the HTTP/2 connection preface in `buffered`.
#[must_use]
pub fn sniff_protocol(alpn_protocol: Option<&str>, buffered: &[u8]) -> SniffOutcome {
    match alpn_protocol {
        Some("h2") => return SniffOutcome::Decided(ConnectionProtocol::Http2),
        Some(_) => return SniffOutcome::Decided(ConnectionProtocol::Http1),
        None => {}
    }

    if buffered.len() >= HTTP2_PREFACE.len() {
        return if buffered.starts_with(HTTP2_PREFACE) {
            SniffOutcome::Decided(ConnectionProtocol::Http2)
        } else {
            SniffOutcome::Decided(ConnectionProtocol::Http1)
        };
    }

    if !HTTP2_PREFACE.starts_with(buffered) {
        // Already diverged from the preface; no point waiting for more bytes.
        return SniffOutcome::Decided(ConnectionProtocol::Http1);
    }

    SniffOutcome::NeedMoreBytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpn_h2_decides_immediately() {
        assert_eq!(
            sniff_protocol(Some("h2"), b""),
            SniffOutcome::Decided(ConnectionProtocol::Http2)
        );
    }

    #[test]
    fn alpn_http11_decides_immediately() {
        assert_eq!(
            sniff_protocol(Some("http/1.1"), b""),
            SniffOutcome::Decided(ConnectionProtocol::Http1)
        );
    }

    #[test]
    fn preface_bytes_decide_http2() {
        assert_eq!(
            sniff_protocol(None, HTTP2_PREFACE),
            SniffOutcome::Decided(ConnectionProtocol::Http2)
        );
    }

    #[test]
    fn ordinary_http_request_decides_http1_on_divergence() {
        assert_eq!(
            sniff_protocol(None, b"GET / HTTP/1.1\r\n"),
            SniffOutcome::Decided(ConnectionProtocol::Http1)
        );
    }

    #[test]
    fn partial_preface_match_waits_for_more_bytes() {
        assert_eq!(sniff_protocol(None, b"PRI * HTTP"), SniffOutcome::NeedMoreBytes);
    }
}
