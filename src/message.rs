//! Module that contains the token circulated in the ring and the events a node reacts to.

use crate::error::TokenError;
use color_print::cformat;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two complementary token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Ping,
    Pong,
}

/// Struct that represents a token sent between nodes.
///
/// The sign of `value` is the kind (`> 0` Ping, `< 0` Pong) and its magnitude
/// is the generation. `sender` is the node that last forwarded it and is only
/// used for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub value: i64,
    #[serde(default)]
    pub sender: String,
}

/// Events serialized through a node's single event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// A token was delivered by the predecessor.
    TokenArrived(Token),
    /// The critical section occupancy timer ran out.
    CsTimerExpired,
    /// The demand scheduler decided the node wants the critical section.
    WantsCs,
}

impl TokenKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::Pong => "PONG",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Self::Ping => Self::Pong,
            Self::Pong => Self::Ping,
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Token {
    /// Function that creates the Ping of `generation`.
    pub fn ping(generation: i64) -> Self {
        Self {
            value: generation,
            sender: String::new(),
        }
    }

    /// Function that creates the Pong of `generation`.
    pub fn pong(generation: i64) -> Self {
        Self {
            value: -generation,
            sender: String::new(),
        }
    }

    pub fn kind(&self) -> TokenKind {
        if self.value > 0 {
            TokenKind::Ping
        } else {
            TokenKind::Pong
        }
    }

    pub fn is_ping(&self) -> bool {
        self.kind() == TokenKind::Ping
    }

    /// Magnitude of the value. Decoded tokens never carry `i64::MIN`, so this cannot overflow.
    pub fn generation(&self) -> i64 {
        self.value.saturating_abs()
    }

    /// Returns the same token stamped with the forwarding node's address.
    pub fn with_sender(mut self, sender: &str) -> Self {
        self.sender = sender.to_string();
        self
    }

    /// Checks the value against the wire invariants.
    pub fn validate(&self) -> Result<(), TokenError> {
        match self.value {
            0 => Err(TokenError::ZeroValue),
            i64::MIN => Err(TokenError::OutOfRange(self.value)),
            _ => Ok(()),
        }
    }

    /// Function that returns the token as a JSON formatted `String`.
    pub fn to_json_string(&self) -> Result<String, TokenError> {
        self.validate()?;
        Ok(serde_json::to_string(self)?)
    }

    /// Function that parses and validates a token from a JSON formatted `String`.
    pub fn from_json_string(token: &str) -> Result<Self, TokenError> {
        let token = serde_json::from_str::<Self>(token)?;
        token.validate()?;
        Ok(token)
    }

    /// Colored one-line description used by the diagnostics.
    pub fn describe(&self) -> String {
        match self.kind() {
            TokenKind::Ping => {
                cformat!("<green, bold>PING</green, bold> <bold>{}</bold>", self.value)
            }
            TokenKind::Pong => {
                cformat!("<blue, bold>PONG</blue, bold> <bold>{}</bold>", self.value)
            }
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.value)
    }
}
