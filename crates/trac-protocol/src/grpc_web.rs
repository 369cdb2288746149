// SPDX-License-Identifier: MIT OR Apache-2.0
//! gRPC ↔ gRPC-Web translation (§4.8.1): content-type rewriting on the
//! request side, and trailer-to-DATA-frame collapsing on the response side.

use bytes::{BufMut, Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue};

use crate::TranslationError;

const GRPC_WEB_CONTENT_TYPE: &str = "application/grpc-web";
const GRPC_CONTENT_TYPE: &str = "application/grpc";

/// Marks a gRPC-Web message frame as carrying trailers rather than a
/// message, per the gRPC-Web wire spec.
const TRAILER_FRAME_FLAG: u8 = 0x80;

/// Rewrite an inbound gRPC-Web request's headers into gRPC form: swap the
/// content-type and require trailers from the upstream.
pub fn rewrite_request_headers(headers: &mut HeaderMap) -> Result<(), TranslationError> {
    if let Some(ct) = headers.get(http::header::CONTENT_TYPE) {
        let ct_str = ct.to_str().unwrap_or_default();
        if ct_str.starts_with(GRPC_WEB_CONTENT_TYPE) {
            headers.insert(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static(GRPC_CONTENT_TYPE),
            );
        }
    }
    headers.insert(
        HeaderName::from_static("te"),
        HeaderValue::from_static("trailers"),
    );
    Ok(())
}

/// Rewrite an outbound gRPC response's content-type back to gRPC-Web.
pub fn rewrite_response_headers(headers: &mut HeaderMap) {
    if let Some(ct) = headers.get(http::header::CONTENT_TYPE) {
        let ct_str = ct.to_str().unwrap_or_default().to_string();
        if ct_str.starts_with(GRPC_CONTENT_TYPE) && !ct_str.starts_with(GRPC_WEB_CONTENT_TYPE) {
            headers.insert(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static(GRPC_WEB_CONTENT_TYPE),
            );
        }
    }
}

/// Collapse a set of HTTP/2 trailer fields into a length-prefixed gRPC-Web
/// trailer frame: 1 byte (MSB set), 4-byte big-endian length, then the
/// trailers encoded as HTTP/1-style `name: value\r\n` lines.
#[must_use]
pub fn encode_trailer_frame(trailers: &HeaderMap) -> Bytes {
    let mut body = String::new();
    for (name, value) in trailers {
        body.push_str(name.as_str());
        body.push_str(": ");
        body.push_str(value.to_str().unwrap_or(""));
        body.push_str("\r\n");
    }
    let body_bytes = body.into_bytes();

    let mut frame = BytesMut::with_capacity(5 + body_bytes.len());
    frame.put_u8(TRAILER_FRAME_FLAG);
    frame.put_u32(body_bytes.len() as u32);
    frame.put_slice(&body_bytes);
    frame.freeze()
}

/// Parse a trailer frame back into header fields, the inverse of
/// [`encode_trailer_frame`]. Used by test harnesses and by clients that
/// need to decode a server's trailer frame directly.
pub fn decode_trailer_frame(frame: &[u8]) -> Result<HeaderMap, TranslationError> {
    if frame.len() < 5 {
        return Err(TranslationError::MalformedTrailerFrame("frame shorter than header".into()));
    }
    if frame[0] & TRAILER_FRAME_FLAG == 0 {
        return Err(TranslationError::MalformedTrailerFrame("MSB not set".into()));
    }
    let len = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
    let body = frame
        .get(5..5 + len)
        .ok_or_else(|| TranslationError::MalformedTrailerFrame("declared length exceeds frame".into()))?;
    let text = std::str::from_utf8(body)
        .map_err(|e| TranslationError::MalformedTrailerFrame(e.to_string()))?;

    let mut headers = HeaderMap::new();
    for line in text.split("\r\n").filter(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| TranslationError::MalformedTrailerFrame(format!("missing ':' in line: {line}")))?;
        let name = HeaderName::try_from(name.trim())
            .map_err(|e| TranslationError::MalformedTrailerFrame(e.to_string()))?;
        let value = HeaderValue::try_from(value.trim())
            .map_err(|e| TranslationError::MalformedTrailerFrame(e.to_string()))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_content_type_and_te_rewritten() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/grpc-web+proto"));
        rewrite_request_headers(&mut headers).unwrap();
        assert_eq!(headers.get(http::header::CONTENT_TYPE).unwrap(), "application/grpc");
        assert_eq!(headers.get("te").unwrap(), "trailers");
    }

    #[test]
    fn response_content_type_rewritten_back() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
        rewrite_response_headers(&mut headers);
        assert_eq!(headers.get(http::header::CONTENT_TYPE).unwrap(), "application/grpc-web");
    }

    #[test]
    fn trailer_frame_round_trips() {
        let mut trailers = HeaderMap::new();
        trailers.insert("grpc-status", HeaderValue::from_static("0"));
        trailers.insert("grpc-message", HeaderValue::from_static("ok"));

        let frame = encode_trailer_frame(&trailers);
        assert_eq!(frame[0] & TRAILER_FRAME_FLAG, TRAILER_FRAME_FLAG);

        let decoded = decode_trailer_frame(&frame).unwrap();
        assert_eq!(decoded.get("grpc-status").unwrap(), "0");
        assert_eq!(decoded.get("grpc-message").unwrap(), "ok");
    }

    #[test]
    fn decode_rejects_frame_without_trailer_flag() {
        let frame = [0u8, 0, 0, 0, 0];
        assert!(decode_trailer_frame(&frame).is_err());
    }
}
