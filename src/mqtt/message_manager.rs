//! Switchboard wire envelope and inbound message representation
//!
//! Every board publishes a `SwitchBoardMsgOut` protobuf message. The origin
//! field tells listeners which board produced it, since all boards share one
//! broker connection.

use chrono::{DateTime, Local};
use prost::Message;
use std::fmt;
use thiserror::Error;
use tracing::warn;

use crate::switchboard::codec::{CodecError, EncodedBankValue};

/// Publisher tag carried in every envelope
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Origin {
    Unspecified = 0,
    Switchboard1 = 1,
    Switchboard2 = 2,
    Switchboard3 = 3,
    Switchboard4 = 4,
    Switchboard5 = 5,
    Switchboard6 = 6,
    Switchboard7 = 7,
    Switchboard8 = 8,
}

impl Origin {
    /// Origin tag of the board with the given 1-based index
    ///
    /// Boards without a dedicated tag share `Switchboard1`.
    pub fn for_board(index: usize) -> Self {
        match i32::try_from(index).ok().map(Origin::try_from) {
            Some(Ok(origin)) if origin != Origin::Unspecified => origin,
            _ => {
                warn!(
                    "No origin tag for switchboard {}, falling back to {:?}",
                    index,
                    Origin::Switchboard1
                );
                Origin::Switchboard1
            }
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct Switches {
    #[prost(uint32, tag = "1")]
    pub value: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct SwitchBoardOutData {
    #[prost(message, optional, tag = "1")]
    pub switches: Option<Switches>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SwitchBoardMsgOut {
    #[prost(enumeration = "Origin", tag = "1")]
    pub origin: i32,
    #[prost(message, optional, tag = "2")]
    pub data: Option<SwitchBoardOutData>,
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Unparsable envelope: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Envelope origin {found} does not match expected {expected:?}")]
    OriginMismatch { expected: Origin, found: i32 },

    #[error("Envelope carries no switch data")]
    MissingData,

    #[error("Invalid switch value: {0}")]
    Value(#[from] CodecError),
}

/// Wraps a packed bank in the board's envelope
pub fn encode_envelope(origin: Origin, value: EncodedBankValue) -> Vec<u8> {
    SwitchBoardMsgOut {
        origin: origin as i32,
        data: Some(SwitchBoardOutData {
            switches: Some(Switches {
                value: u32::from(value.get()),
            }),
        }),
    }
    .encode_to_vec()
}

/// Unwraps an envelope published for the board tagged `expected`
pub fn decode_envelope(
    expected: Origin,
    payload: &[u8],
) -> Result<EncodedBankValue, EnvelopeError> {
    let msg = SwitchBoardMsgOut::decode(payload)?;
    if msg.origin != expected as i32 {
        return Err(EnvelopeError::OriginMismatch {
            expected,
            found: msg.origin,
        });
    }
    let switches = msg
        .data
        .and_then(|data| data.switches)
        .ok_or(EnvelopeError::MissingData)?;
    Ok(EncodedBankValue::try_from(switches.value)?)
}

/// A publish received from the broker, stamped on arrival
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Local>,
}

impl InboundMessage {
    pub fn from_topic(topic: String, payload: Vec<u8>) -> Self {
        InboundMessage {
            topic,
            payload,
            received_at: Local::now(),
        }
    }
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} - {} ({} bytes)",
            self.received_at.format("%H:%M:%S%.3f"),
            self.topic,
            self.payload.len()
        )
    }
}
