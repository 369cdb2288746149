// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Gateway-side protocol plumbing: connection-protocol detection, route
//! resolution, and translation between the wire protocols a TRAC gateway
//! fronts (HTTP/1.1, gRPC-Web, WebSocket, REST) and the gRPC/HTTP-2 backend
//! every route ultimately targets.

pub mod grpc_web;
pub mod h2_promote;
pub mod negotiate;
pub mod rest;
pub mod route;
pub mod websocket;

pub use negotiate::{sniff_protocol, ConnectionProtocol};
pub use route::{Route, RouteProtocol, RouteTable, RouteTarget};
pub use trac_stream::{chunk_for_frames, FlowWindow, StreamTable, DEFAULT_INITIAL_WINDOW, DEFAULT_MAX_FRAME_SIZE};

use thiserror::Error;

/// Errors specific to protocol translation, distinct from the closed
/// `trac-error` taxonomy because these are wire-format violations rather
/// than domain failures — callers typically wrap them in
/// `trac_error::ErrorCode::Validation` before surfacing to a client.
#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("no route matched {method} {path}")]
    NoRouteMatched { method: String, path: String },

    #[error("malformed gRPC-Web trailer frame: {0}")]
    MalformedTrailerFrame(String),

    #[error("text frame rejected on a gRPC-bridged WebSocket")]
    TextFrameRejected,

    #[error("message sent after close frame")]
    SentAfterClose,

    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("field '{field}' could not be mapped to the target message: {reason}")]
    FieldMapping { field: String, reason: String },
}
