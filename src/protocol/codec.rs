//! JSON text encoding of requests and replies

use super::{Reply, Request};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("Malformed message: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

#[derive(Error, Debug)]
#[error("Failed to encode message: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

pub fn encode_request(request: &Request) -> Result<String, EncodeError> {
    Ok(serde_json::to_string(request)?)
}

pub fn decode_request(payload: &str) -> Result<Request, DecodeError> {
    Ok(serde_json::from_str(payload.trim())?)
}

pub fn encode_reply(reply: &Reply) -> Result<String, EncodeError> {
    Ok(serde_json::to_string(reply)?)
}

pub fn decode_reply(payload: &str) -> Result<Reply, DecodeError> {
    Ok(serde_json::from_str(payload.trim())?)
}
