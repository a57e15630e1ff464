//! Broadcast protocol vocabulary shared by coordinator and endpoints.

pub mod codec;

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::protocol_constants::{TOKEN_ALPHABET, TOKEN_LENGTH};

/// Identifies one prepare/play exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Mints a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EventId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// The group token is not five characters of `A-Z1-9`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid group token '{0}'")]
pub struct InvalidGroupId(pub String);

/// Logical channel binding endpoints to one operator chat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupId(String);

impl GroupId {
    /// Validates a token against `^[A-Z1-9]{5}$`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidGroupId`] for anything else.
    pub fn parse(raw: &str) -> Result<Self, InvalidGroupId> {
        let valid = raw.len() == TOKEN_LENGTH
            && raw
                .bytes()
                .all(|b| b.is_ascii_uppercase() || (b'1'..=b'9').contains(&b));
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(InvalidGroupId(raw.to_string()))
        }
    }

    /// Generates a random token.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let token = (0..TOKEN_LENGTH)
            .map(|_| char::from(TOKEN_ALPHABET[rng.random_range(0..TOKEN_ALPHABET.len())]))
            .collect();
        Self(token)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for GroupId {
    type Error = InvalidGroupId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<GroupId> for String {
    fn from(value: GroupId) -> Self {
        value.0
    }
}

/// Transport-assigned identifier of one connected endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A command sent from the coordinator to endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Stage `pcm` for `event_id`. Acknowledged once staged.
    Prepare { event_id: EventId, pcm: Bytes },
    /// Play the staged clip. Acknowledged after playback ends.
    Play { event_id: EventId },
    /// Cancel whatever is staged or playing.
    Stop,
}

impl Command {
    /// Short name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Prepare { .. } => "prepare",
            Self::Play { .. } => "play",
            Self::Stop => "stop",
        }
    }
}

/// An endpoint's answer to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub endpoint_id: EndpointId,
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_id_accepts_valid_tokens() {
        for token in ["ABCDE", "A1B2C", "99999", "ZZZZ1"] {
            assert!(GroupId::parse(token).is_ok(), "{token} should be valid");
        }
    }

    #[test]
    fn group_id_rejects_invalid_tokens() {
        for token in ["", "ABCD", "ABCDEF", "abcde", "ABCD0", "AB-DE", "ÄBCDE"] {
            assert!(GroupId::parse(token).is_err(), "{token} should be invalid");
        }
    }

    #[test]
    fn generated_tokens_are_valid() {
        for _ in 0..200 {
            let token = GroupId::generate();
            assert!(GroupId::parse(token.as_str()).is_ok());
            assert!(!token.as_str().contains('0'));
        }
    }

    #[test]
    fn group_id_deserialization_validates() {
        assert!(serde_json::from_str::<GroupId>(r#""ABCDE""#).is_ok());
        assert!(serde_json::from_str::<GroupId>(r#""abc""#).is_err());
    }

    #[test]
    fn event_id_round_trips_through_string() {
        let id = EventId::new();
        let parsed: EventId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_ne!(EventId::new(), EventId::new());
    }
}
