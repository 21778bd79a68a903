//! Wire format for the socket transport
//!
//! One JSON object per datagram. Calls travel from the caller to the
//! owner's socket; replies travel back to the caller's rendezvous socket,
//! whose address embeds the call id and the invocation serial.

use serde::{Deserialize, Serialize};

use crate::call::CallId;
use crate::error::{FusionError, FusionResult};
use crate::world::FusionId;

/// Maximum datagram size accepted by the socket transport
pub const MAX_WIRE_MESSAGE_SIZE: usize = 4096;

/// Serial used for one-way calls (no reply expected)
pub const ONEWAY_SERIAL: u32 = u32::MAX;

/// A message exchanged between worlds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Invoke a call owned by the receiving world
    Call {
        caller: FusionId,
        call_id: CallId,
        arg: i32,
        ptr: u64,
        serial: u32,
    },
    /// Value returned by the handler
    Return { call_id: CallId, serial: u32, value: i32 },
    /// The call no longer has a handler
    Destroyed { call_id: CallId, serial: u32 },
    /// The receiving world never registered the call
    Unknown { call_id: CallId, serial: u32 },
}

impl WireMessage {
    /// Encode for sending
    pub fn encode(&self) -> FusionResult<Vec<u8>> {
        let bytes = serde_json::to_vec(self)?;
        if bytes.len() > MAX_WIRE_MESSAGE_SIZE {
            return Err(FusionError::MessageTooLarge {
                size: bytes.len(),
                max: MAX_WIRE_MESSAGE_SIZE,
            });
        }
        Ok(bytes)
    }

    /// Decode a received datagram
    pub fn decode(bytes: &[u8]) -> FusionResult<Self> {
        if bytes.len() > MAX_WIRE_MESSAGE_SIZE {
            return Err(FusionError::MessageTooLarge {
                size: bytes.len(),
                max: MAX_WIRE_MESSAGE_SIZE,
            });
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}
