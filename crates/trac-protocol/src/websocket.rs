// SPDX-License-Identifier: MIT OR Apache-2.0
//! WebSocket ↔ gRPC bridging (§4.8.3): relays binary frames onto a gRPC
//! target as HTTP/2 DATA frames, rejects text frames, and sequences the
//! close handshake so no frame is ever sent after a close frame.

use bytes::Bytes;

use crate::TranslationError;

/// A minimal model of what the bridge sees: binary/text/close frames in
/// either direction. The gateway's actual WebSocket transport (e.g.
/// `tokio-tungstenite`) maps onto this before/after the bridge runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsFrame {
    Binary(Bytes),
    Text(String),
    Close(CloseReason),
}

/// A close frame's payload, mirroring RFC 6455 close codes relevant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Normal,
    InvalidMessageType,
}

/// The opening DATA frame synthesized from the first binary frame on a
/// newly upgraded socket: HTTP/2 pseudo-headers plus all forwarded
/// `trac_*` headers, followed by the frame's payload.
#[derive(Debug, Clone)]
pub struct OpeningFrame {
    pub pseudo_headers: Vec<(&'static str, String)>,
    pub forwarded_headers: Vec<(String, String)>,
    pub payload: Bytes,
}

/// Tracks which side has sent a close frame, so the bridge can enforce
/// "no frame after close" and the echo/await rules from §4.8.3.
#[derive(Debug, Default)]
pub struct CloseState {
    client_sent_close: bool,
    backend_sent_close: bool,
}

impl CloseState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.client_sent_close && self.backend_sent_close
    }

    fn ensure_not_closed(&self) -> Result<(), TranslationError> {
        if self.client_sent_close || self.backend_sent_close {
            return Err(TranslationError::SentAfterClose);
        }
        Ok(())
    }
}

/// Build the opening DATA frame from the first binary frame received after
/// upgrade, synthesizing `:method POST`, `:scheme http`, `:path <upgrade URI>`
/// plus the forwarded `trac_*` headers.
pub fn build_opening_frame(
    upgrade_uri: &str,
    upgrade_headers: &[(String, String)],
    first_frame: Bytes,
) -> OpeningFrame {
    let forwarded: Vec<(String, String)> = upgrade_headers
        .iter()
        .filter(|(name, _)| name.starts_with("trac_"))
        .cloned()
        .collect();

    OpeningFrame {
        pseudo_headers: vec![
            (":method", "POST".to_string()),
            (":scheme", "http".to_string()),
            (":path", upgrade_uri.to_string()),
        ],
        forwarded_headers: forwarded,
        payload: first_frame,
    }
}

/// Process one inbound client frame. Returns the relayed payload for a
/// binary frame, or an error/close outcome otherwise.
pub fn relay_inbound(state: &mut CloseState, frame: &WsFrame) -> Result<RelayOutcome, TranslationError> {
    match frame {
        WsFrame::Binary(payload) => {
            state.ensure_not_closed()?;
            Ok(RelayOutcome::Relay(payload.clone()))
        }
        WsFrame::Text(_) => Err(TranslationError::TextFrameRejected),
        WsFrame::Close(_) => {
            let echo = !state.backend_sent_close;
            state.client_sent_close = true;
            if echo {
                Ok(RelayOutcome::EchoCloseThenTeardown)
            } else {
                Ok(RelayOutcome::TeardownImmediately)
            }
        }
    }
}

/// Process one outbound close originated by the backend.
pub fn relay_backend_close(state: &mut CloseState) -> Result<RelayOutcome, TranslationError> {
    state.ensure_not_closed()?;
    state.backend_sent_close = true;
    Ok(RelayOutcome::SendThenAwaitClientReply)
}

/// What the transport layer should do in response to [`relay_inbound`] or
/// [`relay_backend_close`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Relay(Bytes),
    EchoCloseThenTeardown,
    TeardownImmediately,
    SendThenAwaitClientReply,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_frame_carries_upgrade_uri_and_trac_headers_only() {
        let headers = vec![
            ("trac_tenant".to_string(), "acme".to_string()),
            ("user-agent".to_string(), "curl/8".to_string()),
        ];
        let frame = build_opening_frame("/trac.v1.JobService/Watch", &headers, Bytes::from_static(b"hello"));
        assert_eq!(frame.forwarded_headers.len(), 1);
        assert_eq!(frame.forwarded_headers[0].0, "trac_tenant");
        assert!(frame.pseudo_headers.contains(&(":path", "/trac.v1.JobService/Watch".to_string())));
    }

    #[test]
    fn text_frame_is_rejected() {
        let mut state = CloseState::new();
        let err = relay_inbound(&mut state, &WsFrame::Text("hi".into())).unwrap_err();
        assert!(matches!(err, TranslationError::TextFrameRejected));
    }

    #[test]
    fn client_close_with_no_prior_close_is_echoed() {
        let mut state = CloseState::new();
        let outcome = relay_inbound(&mut state, &WsFrame::Close(CloseReason::Normal)).unwrap();
        assert_eq!(outcome, RelayOutcome::EchoCloseThenTeardown);
    }

    #[test]
    fn client_close_after_backend_close_tears_down_immediately() {
        let mut state = CloseState::new();
        relay_backend_close(&mut state).unwrap();
        let outcome = relay_inbound(&mut state, &WsFrame::Close(CloseReason::Normal)).unwrap();
        assert_eq!(outcome, RelayOutcome::TeardownImmediately);
    }

    #[test]
    fn no_frame_relayed_after_close_sent() {
        let mut state = CloseState::new();
        relay_backend_close(&mut state).unwrap();
        let err = relay_inbound(&mut state, &WsFrame::Binary(Bytes::from_static(b"x"))).unwrap_err();
        assert!(matches!(err, TranslationError::SentAfterClose));
    }
}
