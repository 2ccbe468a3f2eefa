//! Smart-account call payloads
//!
//! A relaying smart account receives each call as the ABI-encoded parameter
//! tuple `(address to, uint256 value, bytes data)`.

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolValue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Decoding failed: {0}")]
    DecodingFailed(String),
}

/// One call to be executed by a smart account
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallPayload {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

impl CallPayload {
    pub fn new(to: Address, value: U256, data: impl Into<Bytes>) -> Self {
        Self {
            to,
            value,
            data: data.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        encode_call_payload(self)
    }
}

pub fn encode_call_payload(payload: &CallPayload) -> Bytes {
    (payload.to, payload.value, payload.data.clone())
        .abi_encode_params()
        .into()
}

pub fn decode_call_payload(data: &[u8]) -> Result<CallPayload, PayloadError> {
    let (to, value, data) = <(Address, U256, Bytes)>::abi_decode_params(data)
        .map_err(|e| PayloadError::DecodingFailed(e.to_string()))?;
    Ok(CallPayload { to, value, data })
}
