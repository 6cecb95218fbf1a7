//! JSON-RPC layer over line-delimited JSON
//!
//! - **framing**: incremental JSONL decoder
//! - **message**: inbound classification and outbound wire shapes
//! - **correlator**: request ids and the pending request table
//! - **jsonrpc_utils**: error codes and reply builders

pub mod correlator;
pub mod framing;
pub mod jsonrpc_utils;
pub mod message;

pub use correlator::{PendingRequest, RequestCorrelator, RequestOutcome};
pub use framing::{DecodeOutput, LineDecoder, MAX_BUFFERED_BYTES};
pub use jsonrpc_utils::{error_codes, error_reply, method_not_found_reply, success_reply};
pub use message::{
    IncomingMessage, OutgoingNotification, OutgoingRequest, OutgoingResponse, RequestId,
    ResponsePayload, RpcErrorObject, encode_line,
};
