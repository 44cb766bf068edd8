//! C5 — a minimal JSON-RPC 2.0 stdio transport shared by the sidecar
//! client and (potentially) other RPC-speaking children.

pub mod client;
pub mod message;

pub use client::Protocol;
pub use message::{
    IncomingMessage, Notification, Request, Response, RpcError, CONNECTION_ERROR, INTERNAL_ERROR,
    INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, NOT_READY_ERROR, PARSE_ERROR,
    TIMEOUT_ERROR,
};
