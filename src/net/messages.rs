//! Wire message types shared by hub, servers, and clients.
//!
//! Every envelope is one WebSocket text frame: a single tag byte followed by
//! a JSON object. The tag selects the variant:
//!
//! - `%` aircraft update (delta)
//! - `@` controller update (delta)
//! - `*` authoritative snapshot push
//! - `$` direct text message
//! - `#` channel (frequency) text message
//! - `!` kill
//!
//! A missing or unrecognised tag decodes to the base variant, which receivers
//! accept and drop. A recognised tag with an unparseable body is an invalid
//! message.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{SimnetError, SimnetResult};
use crate::model::delta::{AircraftDelta, ControllerDelta};

/// A radio frequency, held as an integer count of 10 Hz units so that
/// fractional-kHz channels never pick up floating-point drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frequency(pub u32);

impl Frequency {
    /// From megahertz, rounded to the nearest 10 Hz.
    pub fn from_mhz(mhz: f64) -> Self {
        Frequency((mhz * 100_000.0).round() as u32)
    }

    pub fn as_mhz(&self) -> f64 {
        self.0 as f64 / 100_000.0
    }

    /// The channel's derived recipient identifier: the frequency in kHz
    /// rendered with two decimals, dot removed, padded to eight digits, as
    /// the leading group of a nil-tailed uuid.
    ///
    /// `134.565 MHz -> 13456500-0000-0000-0000-000000000000`
    pub fn channel_id(&self) -> Uuid {
        let digits = format!("{:08}", self.0 % 100_000_000);
        let text = format!("{}-0000-0000-0000-000000000000", digits);
        // eight decimal digits are always valid hex
        Uuid::parse_str(&text).unwrap_or(Uuid::nil())
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}", self.as_mhz())
    }
}

impl Serialize for Frequency {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_mhz())
    }
}

impl<'de> Deserialize<'de> for Frequency {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mhz = f64::deserialize(deserializer)?;
        Ok(Frequency::from_mhz(mhz))
    }
}

/// Complete-state snapshot pushed from a server to one controller; the
/// receiver clears its local store and repopulates from the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthoritativeUpdate {
    pub recipient: Uuid,
    pub controllers: Vec<ControllerDelta>,
    pub aircraft: Vec<AircraftDelta>,
}

/// Point-to-point chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMessage {
    pub from: Uuid,
    pub to: Uuid,
    pub message: String,
}

/// Chat addressed to everyone tuned to a frequency. The recipient id is
/// derived from the frequency, never carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub from: Uuid,
    pub frequency: Frequency,
    pub message: String,
}

impl ChannelMessage {
    pub fn to(&self) -> Uuid {
        self.frequency.channel_id()
    }
}

/// Remove one aircraft from the owning server's store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KillMessage {
    pub victim: Uuid,
}

/// The closed envelope sum. `Base` is the untagged ancestor: accepted,
/// carried nowhere.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkMessage {
    Base,
    AircraftUpdate(AircraftDelta),
    ControllerUpdate(ControllerDelta),
    AuthoritativeUpdate(AuthoritativeUpdate),
    Text(TextMessage),
    Channel(ChannelMessage),
    Kill(KillMessage),
}

impl NetworkMessage {
    /// Serialise as one text frame: tag byte plus a single JSON line.
    pub fn encode(&self) -> SimnetResult<String> {
        let line = match self {
            NetworkMessage::Base => String::from("{}"),
            NetworkMessage::AircraftUpdate(m) => format!("%{}", serde_json::to_string(m)?),
            NetworkMessage::ControllerUpdate(m) => format!("@{}", serde_json::to_string(m)?),
            NetworkMessage::AuthoritativeUpdate(m) => format!("*{}", serde_json::to_string(m)?),
            NetworkMessage::Text(m) => format!("${}", serde_json::to_string(m)?),
            NetworkMessage::Channel(m) => format!("#{}", serde_json::to_string(m)?),
            NetworkMessage::Kill(m) => format!("!{}", serde_json::to_string(m)?),
        };
        Ok(line)
    }

    /// Parse one received frame. Unknown or missing tags fall back to the
    /// base variant; a recognised tag with a malformed body is an error.
    pub fn decode(frame: &str) -> SimnetResult<NetworkMessage> {
        let mut chars = frame.chars();
        let tag = match chars.next() {
            Some(t) => t,
            None => return Ok(NetworkMessage::Base),
        };
        let body = chars.as_str();

        let invalid = |e: serde_json::Error| {
            SimnetError::InvalidMessage(format!("tag '{}': {}", tag, e))
        };

        match tag {
            '%' => Ok(NetworkMessage::AircraftUpdate(serde_json::from_str(body).map_err(invalid)?)),
            '@' => Ok(NetworkMessage::ControllerUpdate(serde_json::from_str(body).map_err(invalid)?)),
            '*' => Ok(NetworkMessage::AuthoritativeUpdate(serde_json::from_str(body).map_err(invalid)?)),
            '$' => Ok(NetworkMessage::Text(serde_json::from_str(body).map_err(invalid)?)),
            '#' => Ok(NetworkMessage::Channel(serde_json::from_str(body).map_err(invalid)?)),
            '!' => Ok(NetworkMessage::Kill(serde_json::from_str(body).map_err(invalid)?)),
            _ => Ok(NetworkMessage::Base),
        }
    }
}
