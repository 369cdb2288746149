// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP/1 → HTTP/2 framing promotion (§4.8.2): wraps a single HTTP/1.1
//! transaction into the HEADERS+DATA frames of a new HTTP/2 stream, one
//! transaction per stream, preserving per-connection ordering.

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};

use crate::chunk_for_frames;

/// A synthesized HTTP/2 HEADERS frame.
#[derive(Debug, Clone)]
pub struct HeadersFrame {
    pub stream_id: u32,
    pub pseudo_headers: Vec<(&'static str, String)>,
    pub headers: HeaderMap,
    pub end_stream: bool,
}

/// A synthesized HTTP/2 DATA frame.
#[derive(Debug, Clone)]
pub struct DataFrame {
    pub stream_id: u32,
    pub payload: Bytes,
    pub end_stream: bool,
}

/// One promoted HTTP/1.1 transaction: its HEADERS frame and zero or more
/// DATA frames, in the order they must be written to the HTTP/2 connection.
#[derive(Debug, Clone)]
pub struct PromotedRequest {
    pub headers: HeadersFrame,
    pub data: Vec<DataFrame>,
}

/// Promote an HTTP/1.1 request into HTTP/2 frames bound to `stream_id`.
/// `max_frame_size` bounds each DATA frame per the connection's negotiated
/// `SETTINGS_MAX_FRAME_SIZE`.
#[must_use]
pub fn promote_request(
    stream_id: u32,
    method: &Method,
    uri: &Uri,
    headers: HeaderMap,
    body: &[u8],
    max_frame_size: u32,
) -> PromotedRequest {
    let pseudo_headers = vec![
        (":method", method.as_str().to_string()),
        (":scheme", uri.scheme_str().unwrap_or("http").to_string()),
        (":authority", uri.authority().map(ToString::to_string).unwrap_or_default()),
        (":path", uri.path_and_query().map(ToString::to_string).unwrap_or_else(|| "/".to_string())),
    ];

    if body.is_empty() {
        return PromotedRequest {
            headers: HeadersFrame { stream_id, pseudo_headers, headers, end_stream: true },
            data: Vec::new(),
        };
    }

    let chunks = chunk_for_frames(body, max_frame_size);
    let last_index = chunks.len() - 1;
    let data = chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| DataFrame {
            stream_id,
            payload: Bytes::copy_from_slice(chunk),
            end_stream: i == last_index,
        })
        .collect();

    PromotedRequest {
        headers: HeadersFrame { stream_id, pseudo_headers, headers, end_stream: false },
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_marks_end_stream_on_headers() {
        let promoted = promote_request(1, &Method::GET, &"/health".parse().unwrap(), HeaderMap::new(), b"", 16_384);
        assert!(promoted.headers.end_stream);
        assert!(promoted.data.is_empty());
    }

    #[test]
    fn body_marks_end_stream_on_final_data_frame_only() {
        let body = vec![7u8; 40_000];
        let promoted = promote_request(3, &Method::POST, &"/trac.v1.JobService/Submit".parse().unwrap(), HeaderMap::new(), &body, 16_384);
        assert!(!promoted.headers.end_stream);
        assert!(promoted.data.len() > 1);
        for frame in &promoted.data[..promoted.data.len() - 1] {
            assert!(!frame.end_stream);
        }
        assert!(promoted.data.last().unwrap().end_stream);
        let total: usize = promoted.data.iter().map(|f| f.payload.len()).sum();
        assert_eq!(total, body.len());
    }

    #[test]
    fn all_frames_carry_the_same_stream_id() {
        let body = vec![1u8; 100];
        let promoted = promote_request(5, &Method::PUT, &"/x".parse().unwrap(), HeaderMap::new(), &body, 50);
        assert!(promoted.data.iter().all(|f| f.stream_id == 5));
        assert_eq!(promoted.headers.stream_id, 5);
    }
}
